//! Event system infrastructure for Care Notify.
//!
//! This crate lets the record-keeping side of the application (admins, doctors,
//! patients and their device data) announce changes without knowing anything
//! about how those changes reach connected clients.
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing all business events in the system
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates. Record data is carried as
//! serialized JSON values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// User identifiers are free-form strings handed out by the account layer
/// (e.g. "doctor001").
pub type UserId = String;

/// The kind of account a user holds. Notifications are addressed by role and id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Doctor,
    Patient,
}

#[derive(Debug, PartialEq, Eq)]
pub struct UserRoleParseError;

impl fmt::Display for UserRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected one of: admin, doctor, patient")
    }
}

impl std::error::Error for UserRoleParseError {}

impl FromStr for UserRole {
    type Err = UserRoleParseError;
    fn from_str(role: &str) -> Result<UserRole, Self::Err> {
        match role.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "doctor" => Ok(UserRole::Doctor),
            "patient" => Ok(UserRole::Patient),
            _ => Err(UserRoleParseError),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Doctor => write!(f, "doctor"),
            UserRole::Patient => write!(f, "patient"),
        }
    }
}

/// A user who should hear about an event.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Recipient {
    pub role: UserRole,
    pub user_id: UserId,
}

impl Recipient {
    pub fn new(role: UserRole, user_id: impl Into<UserId>) -> Self {
        Self {
            role,
            user_id: user_id.into(),
        }
    }
}

/// Domain events that represent business-level changes in the system.
/// These events are emitted after the record layer has validated and stored a change.
///
/// Events include the recipients for notification routing. The record layer is
/// responsible for determining who should be notified (typically the patient and
/// their assigned doctor).
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A device uploaded a new batch of time-series readings for a patient.
    DeviceDataRecorded {
        patient_id: UserId,
        device_id: String,
        data_id: String,
        /// Raw readings exactly as the device submitted them.
        series: Value,
        /// `YYYY-MM-DD`
        created_date: String,
        /// `HH:MM:SS`
        created_time: String,
        notify: Vec<Recipient>,
    },
    /// Readings for a device were purged over a date/time window.
    DeviceDataDeleted {
        device_id: String,
        start_date: String,
        start_time: String,
        end_date: String,
        end_time: String,
        notify: Vec<Recipient>,
    },
    /// A patient was placed under a doctor's care.
    PatientAssigned {
        doctor_id: UserId,
        patient_id: UserId,
        notify: Vec<Recipient>,
    },
    /// A video was attached to a patient's record.
    PatientVideoAdded {
        patient_id: UserId,
        video: Value,
        notify: Vec<Recipient>,
    },
}

impl DomainEvent {
    /// Users that should receive a notification for this event.
    pub fn recipients(&self) -> &[Recipient] {
        match self {
            DomainEvent::DeviceDataRecorded { notify, .. }
            | DomainEvent::DeviceDataDeleted { notify, .. }
            | DomainEvent::PatientAssigned { notify, .. }
            | DomainEvent::PatientVideoAdded { notify, .. } => notify,
        }
    }
}

/// Trait for handling domain events.
/// Implementations can perform side effects like sending notifications,
/// updating caches, logging, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Returns a new publisher that includes the additional handler.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Publish an event to all registered handlers, one after another.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
