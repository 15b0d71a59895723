//! ARI REST client
//!
//! Implements the signaling ports over the Asterisk REST interface. Channel
//! and bridge ids are generated here so subscriptions can be keyed before the
//! server knows the resource.

use crate::config::AriConfig;
use crate::domain::call::{LegEventKind, LegState};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BridgeId, LegId};
use crate::domain::signaling::{BridgeHandle, LegHandle, OriginateRequest, SignalingClient, Subscription};
use crate::infrastructure::ari::events::EventRouter;
use crate::infrastructure::ari::model::{AriBridge, AriChannel};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

/// Name given to every mixing bridge we create
const BRIDGE_NAME: &str = "child-call-bridge";

struct AriInner {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    router: Arc<EventRouter>,
}

#[derive(Clone)]
pub struct AriClient {
    inner: Arc<AriInner>,
}

impl AriClient {
    pub fn new(config: &AriConfig, router: Arc<EventRouter>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DomainError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(AriInner {
                http,
                base_url: config.url.trim_end_matches('/').to_string(),
                username: config.username.clone(),
                password: config.password.clone(),
                router,
            }),
        })
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.inner.router
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.inner
            .http
            .request(method, format!("{}/{}", self.inner.base_url, path))
            .basic_auth(&self.inner.username, Some(&self.inner.password))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DomainError::Timeout(format!("{}: {}", what, e))
            } else {
                DomainError::Transport(format!("{}: {}", what, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, what, &body))
    }

    pub async fn get_channel(&self, id: &LegId) -> Result<AriChannel> {
        let what = format!("get channel {}", id);
        let response = self
            .send(self.request(Method::GET, &format!("channels/{}", id)), &what)
            .await?;
        response
            .json::<AriChannel>()
            .await
            .map_err(|e| DomainError::Transport(format!("{}: bad response: {}", what, e)))
    }

    fn channel(&self, id: LegId) -> Arc<AriChannelHandle> {
        Arc::new(AriChannelHandle {
            client: self.clone(),
            id,
        })
    }
}

/// Map a non-success HTTP status onto the error taxonomy
fn status_error(status: StatusCode, what: &str, body: &str) -> DomainError {
    let message = if body.trim().is_empty() {
        format!("{}: HTTP {}", what, status.as_u16())
    } else {
        format!("{}: HTTP {}: {}", what, status.as_u16(), body.trim())
    };

    match status {
        StatusCode::NOT_FOUND => DomainError::NotFound(message),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => DomainError::State(message),
        _ => DomainError::Transport(message),
    }
}

#[async_trait]
impl SignalingClient for AriClient {
    async fn originate(&self, request: OriginateRequest) -> Result<Arc<dyn LegHandle>> {
        let id = LegId::generate();
        let what = format!("originate to {}", request.destination);

        let builder = self.request(Method::POST, "channels").query(&[
            ("endpoint", request.destination.endpoint()),
            ("app", request.app.as_str()),
            ("callerId", request.caller_identity.as_str()),
            ("channelId", id.as_str()),
        ]);
        self.send(builder, &what).await?;

        debug!("Originated channel {} to {}", id, request.destination);
        Ok(self.channel(id))
    }

    async fn create_mixing_point(&self, scope: &LegId) -> Result<Arc<dyn BridgeHandle>> {
        let requested = BridgeId::generate();
        let what = format!("create bridge for {}", scope);

        let builder = self.request(Method::POST, "bridges").query(&[
            ("type", "mixing"),
            ("name", BRIDGE_NAME),
            ("bridgeId", requested.as_str()),
        ]);
        let response = self.send(builder, &what).await?;
        let bridge = response
            .json::<AriBridge>()
            .await
            .map_err(|e| DomainError::Transport(format!("{}: bad response: {}", what, e)))?;

        Ok(Arc::new(AriBridgeHandle {
            client: self.clone(),
            id: BridgeId::new(bridge.id),
        }))
    }

    fn leg(&self, id: &LegId) -> Arc<dyn LegHandle> {
        self.channel(id.clone())
    }
}

/// One ARI channel
pub struct AriChannelHandle {
    client: AriClient,
    id: LegId,
}

#[async_trait]
impl LegHandle for AriChannelHandle {
    fn id(&self) -> &LegId {
        &self.id
    }

    fn subscribe(&self, kind: LegEventKind) -> Subscription {
        self.client.router().subscribe(&self.id, kind)
    }

    async fn current_state(&self) -> Result<LegState> {
        match self.client.get_channel(&self.id).await {
            Ok(channel) => Ok(channel.leg_state()),
            // a channel the server no longer knows has been destroyed
            Err(e) if e.is_not_found() => Ok(LegState::Down),
            Err(e) => Err(e),
        }
    }

    async fn answer(&self) -> Result<()> {
        let builder = self
            .client
            .request(Method::POST, &format!("channels/{}/answer", self.id));
        self.client.send(builder, &format!("answer {}", self.id)).await?;
        Ok(())
    }

    async fn hang_up(&self) -> Result<()> {
        let builder = self
            .client
            .request(Method::DELETE, &format!("channels/{}", self.id));
        self.client.send(builder, &format!("hang up {}", self.id)).await?;
        Ok(())
    }
}

/// One ARI mixing bridge
pub struct AriBridgeHandle {
    client: AriClient,
    id: BridgeId,
}

#[async_trait]
impl BridgeHandle for AriBridgeHandle {
    fn id(&self) -> &BridgeId {
        &self.id
    }

    async fn add_member(&self, leg: &LegId) -> Result<()> {
        let builder = self
            .client
            .request(Method::POST, &format!("bridges/{}/addChannel", self.id))
            .query(&[("channel", leg.as_str())]);
        self.client
            .send(builder, &format!("add {} to bridge {}", leg, self.id))
            .await?;
        Ok(())
    }
}
