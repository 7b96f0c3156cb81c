use crate::connection::{Channel, ConnectionId};
use crate::error::Result;
use crate::message::{ClientMessage, Event, Message, MessageScope};
use crate::pool::ConnectionPool;
use crate::registry::{Delivery, DeliveryFailure, SubscriberKey, SubscriptionRegistry};
use log::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Connection lifecycle layer: owns the pool and the subscription registry,
/// and removes connections that turn out to be dead during a fan-out.
pub struct Manager {
    registry: Arc<SubscriptionRegistry>,
    pool: Arc<ConnectionPool>,
}

impl Manager {
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new(delivery_timeout)),
            pool: Arc::new(ConnectionPool::new(delivery_timeout)),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Accept a new connection and start tracking it
    pub async fn connect(&self, channel: Arc<dyn Channel>) -> Result<()> {
        self.pool.connect(channel).await
    }

    /// Close a connection and drop every subscription it holds
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Result<()> {
        let result = self.pool.disconnect(connection_id).map(|_| ());
        let keys = self.registry.unsubscribe_all(connection_id);
        debug!(
            "Connection {} released {} subscription(s)",
            connection_id, keys
        );
        result
    }

    pub fn subscribe(&self, channel: Arc<dyn Channel>, key: SubscriberKey) -> bool {
        self.registry.subscribe(channel, key)
    }

    pub fn unsubscribe(&self, connection_id: &ConnectionId, key: &SubscriberKey) -> bool {
        self.registry.unsubscribe(connection_id, key)
    }

    /// Deliver a raw JSON payload to everyone subscribed to `key`
    pub async fn notify_subscribers(&self, key: &SubscriberKey, message: &Value) -> Delivery {
        let delivery = self.registry.notify_subscribers(key, message).await;
        self.prune(&delivery);
        delivery
    }

    /// Send a typed event based on its scope
    pub async fn send_message(&self, message: Message) -> Delivery {
        let payload = match serde_json::to_value(&message.event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize event: {e}");
                return Delivery::default();
            }
        };

        let delivery = match message.scope {
            MessageScope::Subscriber { key } => {
                self.registry.notify_subscribers(&key, &payload).await
            }
            MessageScope::Connection { connection_id } => {
                let mut delivery = Delivery {
                    attempted: 1,
                    ..Delivery::default()
                };
                match self.pool.send_to(&connection_id, &payload).await {
                    Ok(()) => delivery.delivered = 1,
                    Err(error) => {
                        warn!(
                            "Failed to send event to connection {}: {}",
                            connection_id, error
                        );
                        delivery.failures.push(DeliveryFailure {
                            connection_id,
                            error,
                        })
                    }
                }
                delivery
            }
            MessageScope::Broadcast => self.pool.broadcast(&payload).await,
        };

        self.prune(&delivery);
        delivery
    }

    /// Apply a control frame received from `channel` and reply on the same channel.
    pub async fn handle_client_message(&self, channel: &Arc<dyn Channel>, text: &str) -> Result<()> {
        let reply = match ClientMessage::parse(text) {
            Ok(ClientMessage::Subscribe { user_id, .. })
            | Ok(ClientMessage::Unsubscribe { user_id, .. })
                if user_id.trim().is_empty() =>
            {
                Event::Error {
                    reason: "user_id must not be blank".to_string(),
                }
            }
            Ok(ClientMessage::Subscribe { user_type, user_id }) => {
                self.subscribe(
                    channel.clone(),
                    SubscriberKey::new(user_type, user_id.clone()),
                );
                Event::Subscribed { user_type, user_id }
            }
            Ok(ClientMessage::Unsubscribe { user_type, user_id }) => {
                self.unsubscribe(
                    channel.id(),
                    &SubscriberKey::new(user_type, user_id.clone()),
                );
                Event::Unsubscribed { user_type, user_id }
            }
            Ok(ClientMessage::Ping) => Event::Pong,
            Err(e) => {
                debug!("Rejected frame from connection {}: {}", channel.id(), e);
                Event::Error {
                    reason: e.to_string(),
                }
            }
        };

        let payload = serde_json::to_value(&reply)?;
        let result = self.pool.send_message(channel.as_ref(), &payload).await;
        if let Err(e) = &result {
            if e.is_stale_connection() {
                self.release_stale(channel.id());
            }
        }
        result
    }

    /// Disconnect every connection whose delivery showed it is no longer usable.
    fn prune(&self, delivery: &Delivery) {
        for failure in &delivery.failures {
            if failure.error.is_stale_connection() {
                self.release_stale(&failure.connection_id);
            }
        }
    }

    fn release_stale(&self, connection_id: &ConnectionId) {
        if let Err(e) = self.disconnect(connection_id) {
            trace!("Stale connection {} already gone: {}", connection_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, Outbound};
    use events::UserRole;
    use serde_json::json;

    fn manager() -> Manager {
        Manager::new(Duration::from_millis(200))
    }

    async fn connected(manager: &Manager) -> (Arc<dyn Channel>, Outbound) {
        let (connection, outbound) = Connection::new(8);
        let channel: Arc<dyn Channel> = connection;
        manager.connect(channel.clone()).await.unwrap();
        (channel, outbound)
    }

    async fn next_json(outbound: &mut Outbound) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    fn patient() -> SubscriberKey {
        SubscriberKey::new(UserRole::Patient, "patient001")
    }

    #[tokio::test]
    async fn test_disconnect_removes_connection_and_subscriptions() {
        let manager = manager();
        let (channel, _out) = connected(&manager).await;
        manager.subscribe(channel.clone(), patient());

        manager.disconnect(channel.id()).unwrap();

        assert!(!manager.pool().contains(channel.id()));
        assert!(!manager.registry().contains_key(&patient()));
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_send_message_to_subscriber_scope() {
        let manager = manager();
        let (channel, mut out) = connected(&manager).await;
        manager.subscribe(channel.clone(), patient());

        let delivery = manager
            .send_message(Message {
                event: Event::PatientAssigned {
                    doctor_id: "doctor001".to_string(),
                    patient_id: "patient001".to_string(),
                },
                scope: MessageScope::Subscriber { key: patient() },
            })
            .await;

        assert_eq!(delivery.delivered, 1);
        let value = next_json(&mut out).await;
        assert_eq!(value["type"], json!("patient_assigned"));
        assert_eq!(value["data"]["patient_id"], json!("patient001"));
    }

    #[tokio::test]
    async fn test_send_message_to_connection_scope() {
        let manager = manager();
        let (channel, mut out) = connected(&manager).await;

        let delivery = manager
            .send_message(Message {
                event: Event::Pong,
                scope: MessageScope::Connection {
                    connection_id: channel.id().clone(),
                },
            })
            .await;

        assert_eq!(delivery.delivered, 1);
        assert_eq!(next_json(&mut out).await, json!({"type": "pong"}));
    }

    #[tokio::test]
    async fn test_broadcast_scope_reaches_unsubscribed_connections() {
        let manager = manager();
        let (_a, mut a_out) = connected(&manager).await;
        let (_b, mut b_out) = connected(&manager).await;

        let delivery = manager
            .send_message(Message {
                event: Event::Error {
                    reason: "server restarting".to_string(),
                },
                scope: MessageScope::Broadcast,
            })
            .await;

        assert_eq!(delivery.delivered, 2);
        assert_eq!(next_json(&mut a_out).await["type"], json!("error"));
        assert_eq!(next_json(&mut b_out).await["type"], json!("error"));
    }

    #[tokio::test]
    async fn test_dead_connections_are_pruned_after_fan_out() {
        let manager = manager();
        let (dead, dead_out) = connected(&manager).await;
        let (alive, mut alive_out) = connected(&manager).await;
        manager.subscribe(dead.clone(), patient());
        manager.subscribe(alive.clone(), patient());
        drop(dead_out);

        let delivery = manager.notify_subscribers(&patient(), &json!("vitals")).await;

        assert_eq!(delivery.delivered, 1);
        assert_eq!(next_json(&mut alive_out).await, json!("vitals"));
        assert!(!manager.pool().contains(dead.id()));
        assert_eq!(manager.registry().subscriber_count(&patient()), 1);
    }

    #[tokio::test]
    async fn test_client_subscribe_then_unsubscribe() {
        let manager = manager();
        let (channel, mut out) = connected(&manager).await;

        manager
            .handle_client_message(
                &channel,
                r#"{"action": "subscribe", "type": "patient", "user_id": "patient001"}"#,
            )
            .await
            .unwrap();
        assert_eq!(
            next_json(&mut out).await,
            json!({"type": "subscribed", "data": {"user_type": "patient", "user_id": "patient001"}})
        );
        assert_eq!(manager.registry().subscriber_count(&patient()), 1);

        manager
            .handle_client_message(
                &channel,
                r#"{"action": "unsubscribe", "type": "patient", "user_id": "patient001"}"#,
            )
            .await
            .unwrap();
        assert_eq!(next_json(&mut out).await["type"], json!("unsubscribed"));
        assert!(!manager.registry().contains_key(&patient()));
    }

    #[tokio::test]
    async fn test_failed_reply_releases_connection() {
        let manager = manager();
        let (channel, out) = connected(&manager).await;
        manager.subscribe(channel.clone(), patient());
        drop(out);

        let err = manager
            .handle_client_message(&channel, r#"{"action": "ping"}"#)
            .await
            .unwrap_err();

        assert!(err.is_stale_connection());
        assert!(channel.is_closed());
        assert!(!manager.pool().contains(channel.id()));
        assert!(!manager.registry().contains_key(&patient()));
    }

    #[tokio::test]
    async fn test_client_ping_gets_pong() {
        let manager = manager();
        let (channel, mut out) = connected(&manager).await;

        manager
            .handle_client_message(&channel, r#"{"action": "ping"}"#)
            .await
            .unwrap();
        assert_eq!(next_json(&mut out).await, json!({"type": "pong"}));
    }

    #[tokio::test]
    async fn test_bad_client_frames_get_error_replies() {
        let manager = manager();
        let (channel, mut out) = connected(&manager).await;

        manager
            .handle_client_message(&channel, "not json")
            .await
            .unwrap();
        assert_eq!(next_json(&mut out).await["type"], json!("error"));

        manager
            .handle_client_message(
                &channel,
                r#"{"action": "subscribe", "type": "doctor", "user_id": " "}"#,
            )
            .await
            .unwrap();
        let reply = next_json(&mut out).await;
        assert_eq!(reply["data"]["reason"], json!("user_id must not be blank"));
        assert_eq!(manager.registry().key_count(), 0);
    }
}
