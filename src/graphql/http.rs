//! Request/response executor over HTTP

use crate::client::EndpointConfig;
use crate::error::{ClientError, Result};
use crate::graphql::GraphQLResponse;
use crate::operation::Operation;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes one query or mutation and returns the result envelope
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, operation: &Operation) -> Result<Value>;
}

/// HTTP transport for queries and mutations
#[derive(Clone)]
pub struct HttpExecutor {
    config: Arc<EndpointConfig>,
    headers: HeaderMap,
    http_client: Client,
}

impl HttpExecutor {
    pub fn new(config: Arc<EndpointConfig>) -> Result<Self> {
        let headers = header_map(&config)?;

        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| {
                ClientError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(HttpExecutor {
            config,
            headers,
            http_client,
        })
    }
}

fn header_map(config: &EndpointConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            ClientError::Configuration(format!("Invalid header name: {}", name))
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            ClientError::Configuration(format!("Invalid value for header {}", name))
        })?;
        headers.insert(name, value);
    }

    Ok(headers)
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, operation: &Operation) -> Result<Value> {
        debug!(
            kind = %operation.kind(),
            operation_name = operation.operation_name(),
            "POST {}",
            self.config.http_url
        );

        let response = self
            .http_client
            .post(&self.config.http_url)
            .headers(self.headers.clone())
            .json(&operation.request())
            .send()
            .await
            .map_err(ClientError::from_network_error)?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(ClientError::from_network_error)?;

        let parsed = serde_json::from_slice::<GraphQLResponse>(&body);

        if !status.is_success() {
            warn!("GraphQL endpoint answered HTTP {}", status);
            // Servers commonly pair 4xx with a regular errors body
            if let Ok(GraphQLResponse {
                errors: Some(errors),
                ..
            }) = parsed
            {
                if !errors.is_empty() {
                    return Err(ClientError::graphql(errors).with_status(status.as_u16()));
                }
            }
            return Err(ClientError::protocol(format!("HTTP error: {}", status))
                .with_status(status.as_u16()));
        }

        let response = parsed.map_err(|e| {
            ClientError::protocol(format!("Invalid GraphQL response body: {}", e))
                .with_status(status.as_u16())
        })?;

        response
            .into_result()
            .map_err(|e| e.with_status(status.as_u16()))
    }
}
