//! GraphQL wire types and transport executors
//!
//! # Transports
//!
//! - [`HttpExecutor`]: one POST per query or mutation
//! - [`StreamExecutor`]: one shared `graphql-transport-ws` connection carrying
//!   every subscription of a client
//! - [`RetryPolicy`]: an opt-in wrapper for request/response calls
//!
//! Both executors turn server answers into the same envelope:
//! `Ok(data)` or a [`ClientError`](crate::ClientError).

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod http;
mod retry_policy;
mod websocket;

pub use http::{HttpExecutor, RequestExecutor};
pub use retry_policy::{
    execute_with_retry, RetryCondition, RetryExecutor, RetryPolicy, RetryStrategy,
};
pub use websocket::{StreamExecutor, Subscription, GRAPHQL_TRANSPORT_WS_PROTOCOL};

/// GraphQL request body, shared by the HTTP body and the `subscribe` payload
#[derive(Debug, Clone, Serialize)]
pub struct GraphQLRequest<'a> {
    /// Operation source text
    pub query: &'a str,
    /// Variables for the operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<&'a Value>,
    /// Operation to run when the document holds several
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<&'a str>,
}

/// GraphQL response structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GraphQLResponse {
    /// Response data
    #[serde(default)]
    pub data: Option<Value>,
    /// GraphQL errors if any
    #[serde(default)]
    pub errors: Option<Vec<GraphQLError>>,
    /// Response extensions (server metadata)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

/// GraphQL error structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GraphQLError {
    /// Error message
    pub message: String,
    /// Error locations in the query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ErrorLocation>>,
    /// Error path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    /// Error extensions (custom error data)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

/// GraphQL error location
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

impl GraphQLResponse {
    /// Collapse the response into the result envelope.
    ///
    /// A non-empty `errors` array wins over any partial `data`.
    pub fn into_result(self) -> Result<Value> {
        match (self.data, self.errors) {
            (_, Some(errors)) if !errors.is_empty() => Err(ClientError::graphql(errors)),
            (Some(data), _) if !data.is_null() => Ok(data),
            _ => Err(ClientError::protocol(
                "response carried neither data nor errors",
            )),
        }
    }
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }

    /// Read an `errors` payload that may be an array or a single object
    pub(crate) fn list_from_value(payload: Value) -> Vec<GraphQLError> {
        match payload {
            Value::Array(_) => serde_json::from_value(payload.clone()).unwrap_or_else(|_| {
                vec![GraphQLError::new(payload.to_string())]
            }),
            Value::Object(_) => match serde_json::from_value::<GraphQLError>(payload.clone()) {
                Ok(error) => vec![error],
                Err(_) => vec![GraphQLError::new(payload.to_string())],
            },
            Value::String(message) => vec![GraphQLError::new(message)],
            other => vec![GraphQLError::new(other.to_string())],
        }
    }
}
