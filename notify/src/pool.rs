use crate::connection::{Channel, ConnectionId, ConnectionState};
use crate::error::{connection_error, timed_out, ConnectionErrorKind, Result};
use crate::registry::{fan_out, Delivery};
use dashmap::DashMap;
use log::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// The set of accepted connections, independent of any subscription.
pub struct ConnectionPool {
    connections: DashMap<ConnectionId, Arc<dyn Channel>>,
    delivery_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            delivery_timeout,
        }
    }

    /// Performs the accept handshake, then tracks the connection.
    pub async fn connect(&self, channel: Arc<dyn Channel>) -> Result<()> {
        channel.accept().await?;
        let connection_id = channel.id().clone();
        self.connections.insert(connection_id.clone(), channel);
        info!("Accepted connection {}", connection_id);
        Ok(())
    }

    /// Stops tracking the connection and closes it.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Result<Arc<dyn Channel>> {
        match self.connections.remove(connection_id) {
            Some((_, channel)) => {
                channel.close();
                info!("Disconnected connection {}", connection_id);
                Ok(channel)
            }
            None => Err(connection_error(ConnectionErrorKind::NotFound, connection_id)),
        }
    }

    /// Sends directly to one connection.
    pub async fn send_message(&self, channel: &dyn Channel, message: &Value) -> Result<()> {
        match channel.state() {
            ConnectionState::Closed => {
                return Err(connection_error(ConnectionErrorKind::Closed, channel.id()))
            }
            ConnectionState::Pending => {
                return Err(connection_error(
                    ConnectionErrorKind::NotAccepted,
                    channel.id(),
                ))
            }
            ConnectionState::Accepted => {}
        }

        match tokio::time::timeout(self.delivery_timeout, channel.send_json(message)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(channel.id(), self.delivery_timeout)),
        }
    }

    /// Sends to a pooled connection by id.
    pub async fn send_to(&self, connection_id: &ConnectionId, message: &Value) -> Result<()> {
        let channel = self
            .get(connection_id)
            .ok_or_else(|| connection_error(ConnectionErrorKind::NotFound, connection_id))?;
        self.send_message(channel.as_ref(), message).await
    }

    /// Best-effort delivery to every pooled connection.
    pub async fn broadcast(&self, message: &Value) -> Delivery {
        let snapshot: Vec<Arc<dyn Channel>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        fan_out(&snapshot, message, self.delivery_timeout).await
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<dyn Channel>> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::error::ErrorKind;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_connect_accepts_and_tracks() {
        let pool = ConnectionPool::new(TIMEOUT);
        let (connection, _out) = Connection::new(4);

        pool.connect(connection.clone()).await.unwrap();

        assert_eq!(connection.state(), ConnectionState::Accepted);
        assert!(pool.contains(connection.id()));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_double_connect_keeps_single_entry() {
        let pool = ConnectionPool::new(TIMEOUT);
        let (connection, _out) = Connection::new(4);

        pool.connect(connection.clone()).await.unwrap();
        pool.connect(connection.clone()).await.unwrap();

        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_closed_connection_fails() {
        let pool = ConnectionPool::new(TIMEOUT);
        let (connection, _out) = Connection::new(4);
        connection.close();

        let err = pool.connect(connection.clone()).await.unwrap_err();
        assert!(err.is_connection_closed());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_send_after_disconnect_fails_with_closed() {
        let pool = ConnectionPool::new(TIMEOUT);
        let (connection, _out) = Connection::new(4);

        pool.connect(connection.clone()).await.unwrap();
        pool.disconnect(connection.id()).unwrap();

        let err = pool
            .send_message(connection.as_ref(), &json!({"msg": "late"}))
            .await
            .unwrap_err();
        assert!(err.is_connection_closed());
    }

    #[tokio::test]
    async fn test_disconnect_untracked_connection_is_not_found() {
        let pool = ConnectionPool::new(TIMEOUT);
        let Err(err) = pool.disconnect(&ConnectionId::new()) else {
            panic!("untracked connection should not disconnect");
        };
        assert_eq!(
            err.error_kind,
            ErrorKind::Connection(ConnectionErrorKind::NotFound)
        );
    }

    #[tokio::test]
    async fn test_send_message_delivers_to_one_connection() {
        let pool = ConnectionPool::new(TIMEOUT);
        let (connection, mut out) = Connection::new(4);
        pool.connect(connection.clone()).await.unwrap();

        pool.send_message(connection.as_ref(), &json!({"hello": "patient"}))
            .await
            .unwrap();

        let frame = out.recv().await.unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&frame).unwrap(),
            json!({"hello": "patient"})
        );
    }

    #[tokio::test]
    async fn test_send_message_to_pending_connection_fails() {
        let pool = ConnectionPool::new(TIMEOUT);
        let (connection, _out) = Connection::new(4);

        let err = pool
            .send_message(connection.as_ref(), &json!(1))
            .await
            .unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Connection(ConnectionErrorKind::NotAccepted)
        );
    }

    #[tokio::test]
    async fn test_send_message_times_out_on_full_queue() {
        let pool = ConnectionPool::new(Duration::from_millis(30));
        let (connection, _out) = Connection::new(1);
        pool.connect(connection.clone()).await.unwrap();
        pool.send_message(connection.as_ref(), &json!(1)).await.unwrap();

        let err = pool
            .send_message(connection.as_ref(), &json!(2))
            .await
            .unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Connection(ConnectionErrorKind::TimedOut)
        );
    }

    #[tokio::test]
    async fn test_send_to_unknown_id_is_not_found() {
        let pool = ConnectionPool::new(TIMEOUT);
        let err = pool.send_to(&ConnectionId::new(), &json!(1)).await.unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Connection(ConnectionErrorKind::NotFound)
        );
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let pool = ConnectionPool::new(TIMEOUT);
        let (first, mut first_out) = Connection::new(4);
        let (second, mut second_out) = Connection::new(4);
        pool.connect(first).await.unwrap();
        pool.connect(second).await.unwrap();

        let delivery = pool.broadcast(&json!("maintenance")).await;

        assert_eq!(delivery.delivered, 2);
        assert!(first_out.recv().await.is_some());
        assert!(second_out.recv().await.is_some());
    }
}
