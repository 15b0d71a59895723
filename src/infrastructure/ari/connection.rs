//! ARI event feed
//!
//! Opens the websocket for the configured applications and pumps decoded
//! events into the router until the server closes the feed.

use crate::config::AriConfig;
use crate::domain::call::CallStart;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::infrastructure::ari::client::AriClient;
use crate::infrastructure::ari::events::EventRouter;
use crate::infrastructure::ari::model::AriEvent;
use futures::StreamExt;
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Live connection to Asterisk
pub struct AriConnection {
    pub client: AriClient,
    /// Call-start occurrences of our application
    pub calls: mpsc::UnboundedReceiver<CallStart>,
    /// Feed reader; ends when the websocket closes
    pub reader: JoinHandle<()>,
}

/// Event feed URL with the applications and credentials as query parameters
pub fn events_url(config: &AriConfig) -> Result<Url> {
    let apps = config.event_apps().join(",");
    let api_key = format!("{}:{}", config.username, config.password);
    Url::parse_with_params(
        &config.websocket_url,
        &[("app", apps.as_str()), ("api_key", api_key.as_str())],
    )
    .map_err(|e| DomainError::Config(format!("invalid websocket url '{}': {}", config.websocket_url, e)))
}

pub async fn connect(config: &AriConfig) -> Result<AriConnection> {
    let url = events_url(config)?;
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let router = Arc::new(EventRouter::new(calls_tx).accept_calls_for(config.application.clone()));
    let client = AriClient::new(config, router.clone())?;

    let (mut stream, _) = tokio_tungstenite::connect_async(url.to_string())
        .await
        .map_err(|e| DomainError::Transport(format!("Failed to open ARI event feed: {}", e)))?;
    info!(
        "Connected to ARI at {} for applications {:?}",
        config.websocket_url,
        config.event_apps()
    );

    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<AriEvent>(&text) {
                    Ok(event) => router.route(event),
                    Err(e) => warn!("Undecodable ARI event: {}", e),
                },
                Ok(Message::Close(frame)) => {
                    info!("ARI closed the event feed: {:?}", frame);
                    break;
                }
                Ok(_) => debug!("Ignoring non-text frame"),
                Err(e) => {
                    error!("ARI event feed failed: {}", e);
                    break;
                }
            }
        }
        router.close();
    });

    Ok(AriConnection {
        client,
        calls,
        reader,
    })
}
