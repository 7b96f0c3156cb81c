use crate::connection::ConnectionId;
use crate::error::{invalid_client_message, Result};
use crate::registry::SubscriberKey;
use events::{UserId, UserRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trait for getting the wire name of an event
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// Everything the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    // Device data (patient-scoped)
    #[serde(rename = "device_data_recorded")]
    DeviceDataRecorded {
        patient_id: String,
        device_id: String,
        data_id: String,
        series: Value,
        created_date: String,
        created_time: String,
    },
    #[serde(rename = "device_data_deleted")]
    DeviceDataDeleted {
        device_id: String,
        start_date: String,
        start_time: String,
        end_date: String,
        end_time: String,
    },

    // Care relationships
    #[serde(rename = "patient_assigned")]
    PatientAssigned {
        doctor_id: String,
        patient_id: String,
    },
    #[serde(rename = "patient_video_added")]
    PatientVideoAdded { patient_id: String, video: Value },

    // Replies to client control frames
    #[serde(rename = "subscribed")]
    Subscribed { user_type: UserRole, user_id: UserId },
    #[serde(rename = "unsubscribed")]
    Unsubscribed { user_type: UserRole, user_id: UserId },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { reason: String },
}

impl EventType for Event {
    fn event_type(&self) -> &'static str {
        match self {
            Event::DeviceDataRecorded { .. } => "device_data_recorded",
            Event::DeviceDataDeleted { .. } => "device_data_deleted",
            Event::PatientAssigned { .. } => "patient_assigned",
            Event::PatientVideoAdded { .. } => "patient_video_added",
            Event::Subscribed { .. } => "subscribed",
            Event::Unsubscribed { .. } => "unsubscribed",
            Event::Pong => "pong",
            Event::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub event: Event,
    pub scope: MessageScope,
}

#[derive(Debug, Clone)]
pub enum MessageScope {
    /// Send to every connection subscribed to a user
    Subscriber { key: SubscriberKey },
    /// Send to a single connection
    Connection { connection_id: ConnectionId },
    /// Send to all pooled connections
    Broadcast,
}

/// Control frames a client may send over its socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "type")]
        user_type: UserRole,
        user_id: UserId,
    },
    Unsubscribe {
        #[serde(rename = "type")]
        user_type: UserRole,
        user_id: UserId,
    },
    Ping,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| invalid_client_message(&e.to_string()))
    }
}
