//! ClientBuilder for fluent OperationClient configuration
//!
//! # Examples
//!
//! ```no_run
//! use gql_operation_client::ClientBuilder;
//!
//! # fn main() -> gql_operation_client::Result<()> {
//! // Application service on a local node
//! let client = ClientBuilder::local_application(
//!     8080,
//!     "8b989678cac87a890dea6fd94052a8a2e84a514b6e833ef2a2cdcc21b756956c",
//!     "05938fa64b00152e46b4b8e0cf589466e791fddb949877ae4574f9848cc27235",
//! )
//! .build()?;
//!
//! // Any GraphQL endpoint
//! let client = ClientBuilder::new()
//!     .http_url("https://api.example.com/graphql")
//!     .ws_url("wss://api.example.com/graphql")
//!     .header("Authorization", "Bearer token")
//!     .request_timeout_secs(10)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::client::OperationClient;
use crate::error::{ClientError, Result};
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Environment variable holding the HTTP endpoint
pub const ENV_HTTP_URL: &str = "GRAPHQL_HTTP_URL";
/// Environment variable holding the WebSocket endpoint
pub const ENV_WS_URL: &str = "GRAPHQL_WS_URL";
/// Environment variable holding the request timeout, in seconds
pub const ENV_REQUEST_TIMEOUT: &str = "GRAPHQL_REQUEST_TIMEOUT_SECS";

/// Connection parameters shared by every operation of one client
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Endpoint for queries and mutations
    pub http_url: String,
    /// Endpoint for subscriptions
    pub ws_url: Option<String>,
    /// Headers sent with every HTTP request and the WebSocket handshake
    pub headers: HashMap<String, String>,
    /// TCP/WebSocket connect timeout
    pub connect_timeout: Duration,
    /// Whole-request deadline for HTTP operations
    pub request_timeout: Duration,
    /// How long to wait for `connection_ack`
    pub ack_timeout: Duration,
    /// Client `ping` period on the streaming connection
    pub keep_alive_interval: Option<Duration>,
    /// Payload of the `connection_init` message
    pub connection_params: Option<Value>,
    pub user_agent: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            http_url: String::new(),
            ws_url: None,
            headers: HashMap::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            keep_alive_interval: None,
            connection_params: None,
            user_agent: format!("gql-operation-client/{}", crate::VERSION),
        }
    }
}

/// Builder for creating OperationClient instances with fluent API
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    http_url: Option<String>,
    ws_url: Option<String>,
    headers: HashMap<String, String>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    ack_timeout: Option<Duration>,
    keep_alive_interval: Option<Duration>,
    connection_params: Option<Value>,
    user_agent: Option<String>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        ClientBuilder {
            http_url: None,
            ws_url: None,
            headers: HashMap::new(),
            connect_timeout: None,
            request_timeout: None,
            ack_timeout: None,
            keep_alive_interval: None,
            connection_params: None,
            user_agent: None,
        }
    }

    /// Set the endpoint for queries and mutations
    pub fn http_url<S: Into<String>>(mut self, url: S) -> Self {
        self.http_url = Some(url.into());
        self
    }

    /// Set the endpoint for subscriptions
    pub fn ws_url<S: Into<String>>(mut self, url: S) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Add a header sent on both transports
    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add several headers at once
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn request_timeout_secs(self, seconds: u64) -> Self {
        self.request_timeout(Duration::from_secs(seconds))
    }

    /// How long to wait for the server's `connection_ack`
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    /// Send a `ping` on the streaming connection at this period
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Payload for `connection_init`, typically auth parameters
    pub fn connection_params(mut self, params: Value) -> Self {
        self.connection_params = Some(params);
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Endpoints of one application on a node.
    ///
    /// Queries and mutations go to
    /// `{http_base}/chains/{chain_id}/applications/{application_id}`,
    /// subscriptions to `{ws_base}/ws`.
    pub fn application(
        http_base: &str,
        ws_base: &str,
        chain_id: &str,
        application_id: &str,
    ) -> Self {
        let http_base = http_base.trim_end_matches('/');
        let ws_base = ws_base.trim_end_matches('/');
        Self::new()
            .http_url(format!(
                "{}/chains/{}/applications/{}",
                http_base, chain_id, application_id
            ))
            .ws_url(format!("{}/ws", ws_base))
    }

    /// [`application`](Self::application) on `localhost:{port}`
    pub fn local_application(port: u16, chain_id: &str, application_id: &str) -> Self {
        Self::application(
            &format!("http://localhost:{}", port),
            &format!("ws://localhost:{}", port),
            chain_id,
            application_id,
        )
    }

    /// Read endpoints and timeout from the environment.
    ///
    /// Missing variables leave the corresponding setting unset; a request
    /// timeout that is not a number is a configuration error.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::new();

        if let Ok(url) = env::var(ENV_HTTP_URL) {
            builder = builder.http_url(url);
        }
        if let Ok(url) = env::var(ENV_WS_URL) {
            builder = builder.ws_url(url);
        }
        if let Ok(raw) = env::var(ENV_REQUEST_TIMEOUT) {
            let seconds = raw.trim().parse::<u64>().map_err(|_| {
                ClientError::Configuration(format!(
                    "{} must be a whole number of seconds, got {:?}",
                    ENV_REQUEST_TIMEOUT, raw
                ))
            })?;
            builder = builder.request_timeout_secs(seconds);
        }

        Ok(builder)
    }

    fn validate(&self) -> Result<()> {
        let http_url = self
            .http_url
            .as_deref()
            .ok_or_else(|| ClientError::Configuration("An HTTP URL must be specified".into()))?;

        if !http_url.starts_with("http://") && !http_url.starts_with("https://") {
            return Err(ClientError::Configuration(format!(
                "Invalid HTTP URL format: {}",
                http_url
            )));
        }

        if let Some(ws_url) = self.ws_url.as_deref() {
            if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
                return Err(ClientError::Configuration(format!(
                    "Invalid WebSocket URL format: {}",
                    ws_url
                )));
            }
        }

        for (name, timeout) in [
            ("Connection timeout", self.connect_timeout),
            ("Request timeout", self.request_timeout),
            ("Acknowledgement timeout", self.ack_timeout),
        ] {
            if let Some(timeout) = timeout {
                if timeout.is_zero() || timeout > Duration::from_secs(600) {
                    return Err(ClientError::Configuration(format!(
                        "{} must be between 1ms and 600 seconds",
                        name
                    )));
                }
            }
        }

        if self.keep_alive_interval.is_some_and(|period| period.is_zero()) {
            return Err(ClientError::Configuration(
                "Keep-alive interval must be greater than zero".into(),
            ));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ClientError::Configuration(format!("Invalid header name: {}", name))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                ClientError::Configuration(format!("Invalid value for header {}", name))
            })?;
        }

        Ok(())
    }

    /// Validate and produce the endpoint configuration
    pub fn config(self) -> Result<EndpointConfig> {
        self.validate()?;

        let defaults = EndpointConfig::default();
        Ok(EndpointConfig {
            http_url: self.http_url.unwrap_or_default(),
            ws_url: self.ws_url,
            headers: self.headers,
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            ack_timeout: self.ack_timeout.unwrap_or(defaults.ack_timeout),
            keep_alive_interval: self.keep_alive_interval,
            connection_params: self.connection_params,
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
        })
    }

    /// Build the client with the configured settings
    pub fn build(self) -> Result<OperationClient> {
        OperationClient::new(self.config()?)
    }
}
