use crate::connection::{Channel, ConnectionId};
use crate::error::{timed_out, Error};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::{Recipient, UserId, UserRole};
use futures::future::join_all;
use log::*;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The class half of a [`SubscriberKey`].
pub type SubscriberClass = UserRole;

/// Identifies whose updates a set of channels wants to receive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberKey {
    class: SubscriberClass,
    id: UserId,
}

impl SubscriberKey {
    /// # Panics
    ///
    /// Panics if `id` is blank. Callers validate identities before they get here.
    pub fn new(class: SubscriberClass, id: impl Into<UserId>) -> Self {
        let id = id.into();
        assert!(!id.trim().is_empty(), "subscriber id must not be blank");
        Self { class, id }
    }

    pub fn class(&self) -> SubscriberClass {
        self.class
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl From<&Recipient> for SubscriberKey {
    fn from(recipient: &Recipient) -> Self {
        SubscriberKey::new(recipient.role, recipient.user_id.clone())
    }
}

impl fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

/// A single failed delivery within a fan-out.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub connection_id: ConnectionId,
    pub error: Error,
}

/// Outcome of a best-effort fan-out.
#[derive(Debug, Default)]
pub struct Delivery {
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl Delivery {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sends `message` to every channel at once, each under its own timeout.
/// Failures are collected, never propagated.
pub(crate) async fn fan_out(
    channels: &[Arc<dyn Channel>],
    message: &Value,
    delivery_timeout: Duration,
) -> Delivery {
    let outcomes = join_all(channels.iter().map(|channel| async move {
        let result = match tokio::time::timeout(delivery_timeout, channel.send_json(message)).await
        {
            Ok(result) => result,
            Err(_) => Err(timed_out(channel.id(), delivery_timeout)),
        };
        (channel.id().clone(), result)
    }))
    .await;

    let mut delivery = Delivery {
        attempted: outcomes.len(),
        ..Delivery::default()
    };
    for (connection_id, result) in outcomes {
        match result {
            Ok(()) => delivery.delivered += 1,
            Err(error) => {
                warn!(
                    "Failed to deliver message to connection {}: {}",
                    connection_id, error
                );
                delivery.failures.push(DeliveryFailure {
                    connection_id,
                    error,
                });
            }
        }
    }
    delivery
}

/// Maps subscriber keys to the channels interested in them.
///
/// Both maps are sharded (`DashMap`), so operations on unrelated keys do not
/// contend. Every mutation of a key's channel list happens under that key's
/// shard lock, and a key never outlives its last channel.
pub struct SubscriptionRegistry {
    /// Primary storage: channels per subscriber key.
    subscriptions: DashMap<SubscriberKey, Vec<Arc<dyn Channel>>>,

    /// Secondary index: keys per connection, for disconnect cleanup.
    connection_index: DashMap<ConnectionId, HashSet<SubscriberKey>>,

    delivery_timeout: Duration,
}

impl SubscriptionRegistry {
    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            subscriptions: DashMap::new(),
            connection_index: DashMap::new(),
            delivery_timeout,
        }
    }

    /// Registers `channel` under `key`. A channel is listed at most once per key,
    /// so it receives each notification exactly once. Returns `false` if it was
    /// already subscribed.
    pub fn subscribe(&self, channel: Arc<dyn Channel>, key: SubscriberKey) -> bool {
        let connection_id = channel.id().clone();
        let mut channels = self.subscriptions.entry(key.clone()).or_default();
        if channels.iter().any(|c| c.id() == &connection_id) {
            return false;
        }
        channels.push(channel);

        // Lock order: subscriptions entry, then connection_index.
        self.connection_index
            .entry(connection_id.clone())
            .or_default()
            .insert(key.clone());
        drop(channels);

        debug!("Connection {} subscribed to {}", connection_id, key);
        true
    }

    /// Removes the connection from `key`. Unknown keys and channels that were
    /// never subscribed are ignored. Returns whether anything was removed.
    pub fn unsubscribe(&self, connection_id: &ConnectionId, key: &SubscriberKey) -> bool {
        let mut occupied = match self.subscriptions.entry(key.clone()) {
            Entry::Occupied(occupied) => occupied,
            Entry::Vacant(_) => return false,
        };

        let channels = occupied.get_mut();
        let before = channels.len();
        channels.retain(|c| c.id() != connection_id);
        if channels.len() == before {
            return false;
        }

        if let Entry::Occupied(mut keys) = self.connection_index.entry(connection_id.clone()) {
            keys.get_mut().remove(key);
            if keys.get().is_empty() {
                keys.remove();
            }
        }
        if occupied.get().is_empty() {
            occupied.remove();
        }

        debug!("Connection {} unsubscribed from {}", connection_id, key);
        true
    }

    /// Removes the connection from every key it is subscribed to.
    /// Returns the number of keys it was removed from.
    pub fn unsubscribe_all(&self, connection_id: &ConnectionId) -> usize {
        let keys = match self.connection_index.remove(connection_id) {
            Some((_, keys)) => keys,
            None => return 0,
        };

        let mut removed = 0;
        for key in keys {
            if let Entry::Occupied(mut occupied) = self.subscriptions.entry(key) {
                let channels = occupied.get_mut();
                let before = channels.len();
                channels.retain(|c| c.id() != connection_id);
                if channels.len() != before {
                    removed += 1;
                }
                if channels.is_empty() {
                    occupied.remove();
                }
            }
        }
        removed
    }

    /// Delivers `message` to every channel subscribed to `key`.
    ///
    /// The channel list is copied under the lock and the lock is released
    /// before any send, so subscriptions made while the fan-out is in flight
    /// are not included in it. A missing key delivers to nobody.
    pub async fn notify_subscribers(&self, key: &SubscriberKey, message: &Value) -> Delivery {
        let snapshot = match self.subscriptions.get(key) {
            Some(channels) => channels.value().clone(),
            None => {
                trace!("No subscribers for {}", key);
                return Delivery::default();
            }
        };

        let delivery = fan_out(&snapshot, message, self.delivery_timeout).await;
        debug!(
            "Notified {}/{} subscriber(s) of {}",
            delivery.delivered, delivery.attempted, key
        );
        delivery
    }

    pub fn subscriber_count(&self, key: &SubscriberKey) -> usize {
        self.subscriptions.get(key).map_or(0, |c| c.len())
    }

    pub fn contains_key(&self, key: &SubscriberKey) -> bool {
        self.subscriptions.contains_key(key)
    }

    pub fn key_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn keys_for(&self, connection_id: &ConnectionId) -> Vec<SubscriberKey> {
        self.connection_index
            .get(connection_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}
