use stasis_orchestrator::application::{CallDispatcher, SessionSettings};
use stasis_orchestrator::config::Config;
use stasis_orchestrator::domain::dial_plan::DialPlan;
use stasis_orchestrator::infrastructure::ari;
use stasis_orchestrator::interface::api::{build_router, init_metrics, ApiState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ARI_* variables may come from a .env file
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting stasis orchestrator for application {}", config.ari.application);
    info!(
        "Ring timeout {:?}, {} ring groups",
        config.dial.ring_timeout(),
        config.dial.ring_groups.len()
    );

    let prometheus = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    let connection = ari::connect(&config.ari).await?;

    let dispatcher = Arc::new(CallDispatcher::new(
        Arc::new(connection.client.clone()),
        DialPlan::from_config(&config.dial),
        SessionSettings {
            originate_app: config.ari.originate_app.clone(),
            ring_timeout: config.dial.ring_timeout(),
        },
    ));

    // Start the operational API
    let api_server_handle = if config.server.enabled {
        let app = build_router(ApiState {
            prometheus,
            active_sessions: dispatcher.active_counter(),
        });
        let address = format!("{}:{}", config.server.host, config.server.port);
        let listener = tokio::net::TcpListener::bind(&address).await?;
        info!("API server listening on {}", address);

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("API server failed: {}", e);
            }
        }))
    } else {
        None
    };

    let stop = CancellationToken::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                signal_stop.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    dispatcher.run(connection.calls, stop).await;

    connection.reader.abort();
    if let Some(handle) = api_server_handle {
        handle.abort();
    }

    info!("Stasis orchestrator stopped");
    Ok(())
}
