//! Operation client facade
//!
//! [`OperationClient`] is the one entry point callers need: it classifies an
//! operation, sends queries and mutations over HTTP and subscriptions over the
//! shared WebSocket connection, and hands back the result envelope unchanged.
//!
//! ```no_run
//! use futures::StreamExt;
//! use gql_operation_client::{ClientBuilder, Dispatch, Operation};
//!
//! # async fn run() -> gql_operation_client::Result<()> {
//! let client = ClientBuilder::local_application(8080, "chain", "application").build()?;
//!
//! let increment = Operation::new("mutation { increment(value: 1) }")?;
//! match client.dispatch(increment).await {
//!     Dispatch::Response(result) => println!("Increment result: {:?}", result),
//!     Dispatch::Stream(_) => unreachable!("mutations never stream"),
//! }
//!
//! let mut notifications = client
//!     .subscribe(&Operation::new("subscription { notifications(chainId: \"chain\") }")?)
//!     .await?;
//! while let Some(event) = notifications.next().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;

pub use builder::{ClientBuilder, EndpointConfig};

use crate::error::{ClientError, Result};
use crate::graphql::{
    HttpExecutor, RequestExecutor, RetryPolicy, StreamExecutor, Subscription,
};
use crate::operation::{classify, Operation, OperationKind, Transport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of [`OperationClient::dispatch`], shaped by the operation's transport
#[derive(Debug)]
pub enum Dispatch {
    /// Query or mutation result
    Response(Result<Value>),
    /// Subscription results
    Stream(Subscription),
}

impl Dispatch {
    /// The response envelope, or `None` for a stream
    pub fn into_response(self) -> Option<Result<Value>> {
        match self {
            Dispatch::Response(result) => Some(result),
            Dispatch::Stream(_) => None,
        }
    }

    /// The subscription, or `None` for a response
    pub fn into_stream(self) -> Option<Subscription> {
        match self {
            Dispatch::Stream(subscription) => Some(subscription),
            Dispatch::Response(_) => None,
        }
    }
}

/// Long-lived client bound to one endpoint configuration.
///
/// Cheap to clone; clones share the HTTP connection pool and the streaming
/// connection.
#[derive(Clone)]
pub struct OperationClient {
    config: Arc<EndpointConfig>,
    requests: Arc<dyn RequestExecutor>,
    streams: StreamExecutor,
}

impl OperationClient {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let config = Arc::new(config);
        let requests = Arc::new(HttpExecutor::new(config.clone())?);
        Ok(Self::with_executor(config, requests))
    }

    /// Use a custom request/response executor, e.g. a test double
    pub fn with_executor(config: Arc<EndpointConfig>, requests: Arc<dyn RequestExecutor>) -> Self {
        OperationClient {
            streams: StreamExecutor::new(config.clone()),
            config,
            requests,
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Transport `operation` would be dispatched on
    pub fn classify(&self, operation: &Operation) -> Transport {
        classify(operation)
    }

    /// Send an operation over the transport its kind selects
    pub async fn dispatch(&self, operation: Operation) -> Dispatch {
        match classify(&operation) {
            Transport::RequestResponse => Dispatch::Response(self.requests.execute(&operation).await),
            Transport::Streaming => Dispatch::Stream(
                self.streams
                    .subscribe(&operation)
                    .await
                    .unwrap_or_else(Subscription::failed),
            ),
        }
    }

    /// Run a query or mutation
    pub async fn execute(&self, operation: &Operation) -> Result<Value> {
        match classify(operation) {
            Transport::RequestResponse => self.requests.execute(operation).await,
            Transport::Streaming => Err(ClientError::malformed(
                "subscriptions must be started with subscribe()",
            )),
        }
    }

    /// Run a query or mutation under a caller deadline.
    ///
    /// When the deadline passes the in-flight request is dropped and the
    /// result is a timeout failure.
    pub async fn execute_with_timeout(
        &self,
        operation: &Operation,
        deadline: Duration,
    ) -> Result<Value> {
        tokio::time::timeout(deadline, self.execute(operation))
            .await
            .map_err(|_| ClientError::Timeout(format!("no response within {:?}", deadline)))?
    }

    /// Run a query or mutation, retrying as `policy` allows
    pub async fn execute_with_retry(
        &self,
        operation: &Operation,
        policy: &RetryPolicy,
    ) -> Result<Value> {
        policy
            .executor()
            .execute(|| self.execute(operation))
            .await
    }

    /// Run a `graphql_client` operation and decode its response data
    pub async fn execute_typed<Q>(&self, variables: Q::Variables) -> Result<Q::ResponseData>
    where
        Q: graphql_client::GraphQLQuery,
    {
        let body = Q::build_query(variables);
        let operation = Operation::from_query_body(&body)?;
        let data = self.execute(&operation).await?;
        serde_json::from_value(data).map_err(|e| {
            ClientError::protocol(format!(
                "response data does not match {}: {}",
                body.operation_name, e
            ))
        })
    }

    /// Parse and run a query; any other kind is rejected
    pub async fn query(&self, source: &str, variables: Option<Value>) -> Result<Value> {
        let operation = expect_kind(source, OperationKind::Query)?;
        self.execute(&with_variables(operation, variables)).await
    }

    /// Parse and run a mutation; any other kind is rejected
    pub async fn mutate(&self, source: &str, variables: Option<Value>) -> Result<Value> {
        let operation = expect_kind(source, OperationKind::Mutation)?;
        self.execute(&with_variables(operation, variables)).await
    }

    /// Start a subscription on the shared streaming connection
    pub async fn subscribe(&self, operation: &Operation) -> Result<Subscription> {
        self.streams.subscribe(operation).await
    }

    /// Whether the streaming connection is currently open
    pub async fn is_streaming_connected(&self) -> bool {
        self.streams.is_connected().await
    }

    /// Dispose of the streaming connection.
    ///
    /// Active subscriptions end with a `TransportClosed` failure. The next
    /// subscription opens a fresh connection.
    pub async fn close(&self) {
        debug!("closing streaming connection");
        self.streams.close().await;
    }
}

fn expect_kind(source: &str, expected: OperationKind) -> Result<Operation> {
    let operation = Operation::new(source)?;
    if operation.kind() != expected {
        return Err(ClientError::malformed(format!(
            "expected a {}, got a {}",
            expected,
            operation.kind()
        )));
    }
    Ok(operation)
}

fn with_variables(operation: Operation, variables: Option<Value>) -> Operation {
    match variables {
        Some(variables) => operation.with_variables(variables),
        None => operation,
    }
}
