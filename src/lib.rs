//! GraphQL operation client
//!
//! Sends GraphQL queries and mutations over HTTP and subscriptions over a
//! shared `graphql-transport-ws` WebSocket connection, picking the transport
//! from the operation document itself.
//!
//! # Features
//!
//! - **Transport selection**: [`classify`] is pure and looks only at the
//!   operation's kind
//! - **Uniform results**: every call returns `Ok(data)` or a [`ClientError`]
//!   whose [`ErrorKind`] callers match on
//! - **Shared streaming connection**: opened on first subscription, reused,
//!   cancelled subscriptions are completed on the server
//! - **Opt-in retries**: [`RetryPolicy`] wraps request/response calls only
//!   when asked to
//!
//! # Quick Start
//!
//! ```no_run
//! use gql_operation_client::{ClientBuilder, Operation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new()
//!         .http_url("http://localhost:8080/chains/abc/applications/def")
//!         .ws_url("ws://localhost:8080/ws")
//!         .build()?;
//!
//!     let increment = Operation::new("mutation { increment(value: 1) }")?;
//!     let data = client.execute(&increment).await?;
//!     println!("Increment result: {}", data);
//!
//!     Ok(())
//! }
//! ```

/// Crate version constant
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod client;
pub mod error;
pub mod graphql;
pub mod operation;

pub use client::{ClientBuilder, Dispatch, EndpointConfig, OperationClient};
pub use error::{ClientError, ErrorKind, Result};
pub use graphql::{
    execute_with_retry, ErrorLocation, GraphQLError, GraphQLRequest, GraphQLResponse,
    HttpExecutor, RequestExecutor, RetryCondition, RetryExecutor, RetryPolicy, RetryStrategy,
    StreamExecutor, Subscription, GRAPHQL_TRANSPORT_WS_PROTOCOL,
};
pub use operation::{classify, classify_source, Operation, OperationKind, Transport};
