//! WebSocket HTTP handlers for the web layer.
//!
//! This module only upgrades sockets and pumps frames. Connection tracking,
//! subscriptions and fan-out live in the `notify` crate.

pub mod handler;
