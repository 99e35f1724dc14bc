use std::path::Path;
use std::process::ExitCode;

use tracing::{error, info};

use relaychat::Config;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration
    let config = if Path::new(CONFIG_PATH).exists() {
        Config::load_with_env(CONFIG_PATH)
    } else {
        let mut config = Config::default();
        config.apply_env_overrides().map(|()| config)
    };
    let config = match config.and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    if let Err(e) = relaychat::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        relaychat::logging::init_console_only(&config.logging.level);
    }

    info!("relaychat starting");
    info!(
        "Server configured on {}:{}",
        config.server.host, config.server.port
    );

    match relaychat::services::run(config).await {
        Ok(()) => {
            info!("relaychat stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            eprintln!("relaychat: {e}");
            ExitCode::FAILURE
        }
    }
}
