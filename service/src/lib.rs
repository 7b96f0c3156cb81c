use config::Config;
use events::EventPublisher;
use log::info;
use notify::domain_event_handler::NotifyDomainEventHandler;
use notify::Manager;
use std::sync::Arc;

pub mod config;
pub mod logging;

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub notify_manager: Arc<Manager>,
    pub event_publisher: EventPublisher,
}

impl AppState {
    /// Builds the notification manager and a publisher that routes domain
    /// events into it.
    pub fn new(app_config: Config) -> Self {
        info!(
            "Notification config: delivery_timeout={}ms, outbound_queue_capacity={}, ws_ping_interval={}s",
            app_config.delivery_timeout_ms,
            app_config.outbound_queue_capacity,
            app_config.ws_ping_interval_secs,
        );

        let notify_manager = Arc::new(Manager::new(app_config.delivery_timeout()));
        let event_publisher = EventPublisher::new().with_handler(Arc::new(
            NotifyDomainEventHandler::new(notify_manager.clone()),
        ));

        Self {
            config: app_config,
            notify_manager,
            event_publisher,
        }
    }
}
