//! HTTP side of the game server: the join handshake and the debug queries.
//!
//! [`MatchServerApi`] is the seam the simulator talks through. The default
//! [`HttpMatchServer`] speaks to a real server with `reqwest`; tests and the
//! scripted demo plug in their own implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SimulatorConfig;
use crate::error::{JoinError, QueryError, Result, SimulatorError};
use crate::protocol::{JoinErrorBody, JoinRequest, JoinResponse};

/// Path of the join endpoint.
pub const JOIN_PATH: &str = "/api/join-match";
/// Path of the match state debug query.
pub const MATCH_PATH: &str = "/api/match";
/// Path of the planes and scores debug query.
pub const PLANES_PATH: &str = "/api/planes";

/// Reason used when a rejection carries no `error` field.
const FALLBACK_REJECTION: &str = "Join failed";

/// Requests a simulated client can make of the game server.
#[async_trait]
pub trait MatchServerApi: Send + Sync + 'static {
    /// Ask the server to admit a client to the current match. One attempt, no
    /// retries. Never touches session state.
    async fn join(&self, request: &JoinRequest) -> std::result::Result<JoinResponse, JoinError>;

    /// Current match state, as the server reports it.
    async fn match_snapshot(&self) -> std::result::Result<Value, QueryError>;

    /// Registered planes and their scores.
    async fn planes(&self) -> std::result::Result<Value, QueryError>;
}

/// [`MatchServerApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMatchServer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMatchServer {
    /// Client for the server at `base_url`. A trailing `/` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Config`] if the URL does not parse or the
    /// HTTP client cannot be built.
    pub fn new(base_url: &str, request_timeout: Option<Duration>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| SimulatorError::Config(format!("invalid server url {base_url}: {e}")))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| SimulatorError::Config(format!("http client: {e}")))?;

        Ok(Self { base_url, client })
    }

    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_config(config: &SimulatorConfig) -> Result<Self> {
        Self::new(&config.server_url, config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json(&self, path: &str) -> std::result::Result<Value, QueryError> {
        let query_error = |detail: String| QueryError {
            endpoint: path.to_string(),
            detail,
        };

        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| query_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(query_error(format!("HTTP {status}")));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| query_error(e.to_string()))
    }
}

#[async_trait]
impl MatchServerApi for HttpMatchServer {
    async fn join(&self, request: &JoinRequest) -> std::result::Result<JoinResponse, JoinError> {
        debug!(plane_id = %request.plane_id, user_id = %request.user_id, "sending join request");

        let response = self
            .client
            .post(self.url(JOIN_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| JoinError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| JoinError::Transport(e.to_string()))?;
            // An empty body or one without `error` is still a rejection.
            let body = if text.trim().is_empty() {
                JoinErrorBody::default()
            } else {
                serde_json::from_str::<JoinErrorBody>(&text).map_err(|e| {
                    JoinError::Transport(format!("unreadable rejection ({status}): {e}"))
                })?
            };
            let reason = body.error.unwrap_or_else(|| FALLBACK_REJECTION.to_string());
            info!(plane_id = %request.plane_id, %status, reason = %reason, "join rejected");
            return Err(JoinError::Rejected(reason));
        }

        let mut joined = response
            .json::<JoinResponse>()
            .await
            .map_err(|e| JoinError::Transport(format!("invalid join response: {e}")))?;

        if joined.auth_token.is_empty() {
            warn!(plane_id = %request.plane_id, "join response carried an empty authToken");
            return Err(JoinError::Transport(
                "join response carried an empty authToken".to_string(),
            ));
        }

        joined.ws_url = joined
            .ws_url
            .map(|target| resolve_channel_target(&self.base_url, &target));
        Ok(joined)
    }

    async fn match_snapshot(&self) -> std::result::Result<Value, QueryError> {
        self.get_json(MATCH_PATH).await
    }

    async fn planes(&self) -> std::result::Result<Value, QueryError> {
        self.get_json(PLANES_PATH).await
    }
}

/// Turn a `wsUrl` from the join response into an absolute channel URL.
///
/// Absolute URLs pass through. Relative ones are joined onto the server URL
/// with `http` mapped to `ws` and `https` to `wss`. Anything unparseable is
/// returned as given and left for the connector to reject.
pub fn resolve_channel_target(base_url: &str, ws_url: &str) -> String {
    if Url::parse(ws_url).is_ok() {
        return ws_url.to_string();
    }

    let Ok(mut url) = Url::parse(base_url).and_then(|base| base.join(ws_url)) else {
        return ws_url.to_string();
    };
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            debug!(scheme = other, "leaving channel target scheme unchanged");
            return url.to_string();
        }
    };
    if url.set_scheme(scheme).is_err() {
        return ws_url.to_string();
    }
    url.to_string()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn absolute_targets_pass_through() {
        assert_eq!(
            resolve_channel_target("http://aeroduel.local:45045", "ws://10.0.0.2:45046/ws"),
            "ws://10.0.0.2:45046/ws"
        );
    }

    #[test]
    fn relative_targets_follow_server_scheme() {
        assert_eq!(
            resolve_channel_target("http://aeroduel.local:45045", "/ws"),
            "ws://aeroduel.local:45045/ws"
        );
        assert_eq!(
            resolve_channel_target("https://example.com", "/events?m=1"),
            "wss://example.com/events?m=1"
        );
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = HttpMatchServer::new("http://localhost:45045/", None).unwrap();
        assert_eq!(api.base_url(), "http://localhost:45045");
        assert_eq!(api.url(JOIN_PATH), "http://localhost:45045/api/join-match");
    }

    #[test]
    fn invalid_server_url_is_a_config_error() {
        let err = HttpMatchServer::new("not a url", None).unwrap_err();
        assert!(matches!(err, SimulatorError::Config(_)));
    }
}
