use crate::message::{Event, EventType, Message, MessageScope};
use crate::registry::SubscriberKey;
use crate::Manager;
use async_trait::async_trait;
use events::{DomainEvent, EventHandler, Recipient};
use log::*;
use std::sync::Arc;

/// Handles domain events by converting them to notifications and delivering
/// them to the recipients listed on each event.
///
/// The record layer decides who is notified; this handler only routes.
pub struct NotifyDomainEventHandler {
    manager: Arc<Manager>,
}

impl NotifyDomainEventHandler {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    async fn send_to_recipients(&self, event: Event, recipients: &[Recipient]) {
        for recipient in recipients {
            if recipient.user_id.trim().is_empty() {
                warn!("Skipping {} recipient with blank user id", recipient.role);
                continue;
            }
            self.manager
                .send_message(Message {
                    event: event.clone(),
                    scope: MessageScope::Subscriber {
                        key: SubscriberKey::from(recipient),
                    },
                })
                .await;
        }

        debug!("Sent event to {} recipient(s)", recipients.len());
    }
}

fn to_event(event: &DomainEvent) -> Event {
    match event {
        DomainEvent::DeviceDataRecorded {
            patient_id,
            device_id,
            data_id,
            series,
            created_date,
            created_time,
            ..
        } => Event::DeviceDataRecorded {
            patient_id: patient_id.clone(),
            device_id: device_id.clone(),
            data_id: data_id.clone(),
            series: series.clone(),
            created_date: created_date.clone(),
            created_time: created_time.clone(),
        },
        DomainEvent::DeviceDataDeleted {
            device_id,
            start_date,
            start_time,
            end_date,
            end_time,
            ..
        } => Event::DeviceDataDeleted {
            device_id: device_id.clone(),
            start_date: start_date.clone(),
            start_time: start_time.clone(),
            end_date: end_date.clone(),
            end_time: end_time.clone(),
        },
        DomainEvent::PatientAssigned {
            doctor_id,
            patient_id,
            ..
        } => Event::PatientAssigned {
            doctor_id: doctor_id.clone(),
            patient_id: patient_id.clone(),
        },
        DomainEvent::PatientVideoAdded {
            patient_id, video, ..
        } => Event::PatientVideoAdded {
            patient_id: patient_id.clone(),
            video: video.clone(),
        },
    }
}

#[async_trait]
impl EventHandler for NotifyDomainEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        let notification = to_event(event);
        debug!("Handling domain event as {}", notification.event_type());
        self.send_to_recipients(notification, event.recipients())
            .await;
    }
}
