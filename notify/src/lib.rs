//! WebSocket notification infrastructure for Care Notify.
//!
//! Pushes real-time updates about patients, doctors and their device data to
//! every connected client that asked to hear about them.
//!
//! # Architecture
//!
//! - **Connection pool**: every accepted socket, tracked by a server-generated
//!   `ConnectionId`, with direct send-to-one and broadcast.
//! - **Subscription registry**: `(role, user id)` keys mapped to the channels
//!   interested in them, with a secondary per-connection index so a disconnect
//!   can drop all of a socket's subscriptions at once.
//! - **Best-effort fan-out**: a notification snapshots the subscriber list,
//!   then sends to every channel concurrently, each with its own timeout. One
//!   slow or dead client never holds up the others, and failures never surface
//!   to the publisher.
//! - **Ephemeral messages**: nothing is persisted or retried. A client that is
//!   offline misses the event.
//!
//! # Message Flow
//!
//! 1. A client opens `/ws/{user_type}/{user_id}` (or `/ws` and sends subscribe frames)
//! 2. The socket becomes a `Connection`, is accepted into the pool and subscribed
//! 3. The record layer publishes a `DomainEvent` naming its recipients
//! 4. `NotifyDomainEventHandler` turns it into an `Event` per recipient
//! 5. The registry fans the event out. Dead sockets found on the way are
//!    disconnected by the `Manager`
//!
//! # Modules
//!
//! - `connection`: the `Channel` trait and the queue-backed `Connection`
//! - `registry`: `SubscriberKey` and `SubscriptionRegistry`
//! - `pool`: `ConnectionPool`
//! - `manager`: lifecycle layer over the pool and the registry
//! - `message`: typed events, scopes and client control frames

pub mod connection;
pub mod domain_event_handler;
pub mod error;
pub mod manager;
pub mod message;
pub mod pool;
pub mod registry;

pub use manager::Manager;
