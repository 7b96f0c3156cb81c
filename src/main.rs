use log::*;
use service::{config::Config, logging::Logger, AppState};

#[tokio::main]
async fn main() {
    let config = get_config();

    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting Care Notify in {} mode (log level {})",
        config.runtime_env(),
        config.log_level_filter
    );

    let app_state = AppState::new(config);

    if let Err(e) = web::init_server(app_state).await {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}

// This is where we parse the command line arguments and environment variables
fn get_config() -> Config {
    Config::new()
}
