//! Operations and transport classification
//!
//! An [`Operation`] is parsed once, at construction, so its kind is always
//! known afterwards. [`classify`] is then a pure lookup: subscriptions stream
//! over the WebSocket connection, queries and mutations go over HTTP.

use crate::error::{ClientError, Result};
use crate::graphql::GraphQLRequest;
use async_graphql_parser::types::OperationType;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Kind of the operation's selected top-level definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// Transport an operation is carried over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// One HTTP request, one response
    RequestResponse,
    /// A subscription on the shared WebSocket connection
    Streaming,
}

/// An immutable GraphQL request: document, selected operation and variables
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    source: String,
    kind: OperationKind,
    operation_name: Option<String>,
    variables: Option<Value>,
}

impl From<OperationType> for OperationKind {
    fn from(ty: OperationType) -> Self {
        match ty {
            OperationType::Query => OperationKind::Query,
            OperationType::Mutation => OperationKind::Mutation,
            OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        };
        f.write_str(name)
    }
}

impl Operation {
    /// Parse a document holding exactly one operation
    pub fn new(source: impl Into<String>) -> Result<Self> {
        Self::build(source.into(), None)
    }

    /// Parse a document and select the operation called `name`
    pub fn named(source: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        Self::build(source.into(), Some(name.into()))
    }

    /// Build from a `graphql_client` query body
    pub fn from_query_body<V: Serialize>(body: &graphql_client::QueryBody<V>) -> Result<Self> {
        let variables = serde_json::to_value(&body.variables).map_err(|e| {
            ClientError::malformed(format!("variables are not serializable: {}", e))
        })?;
        let operation = Self::named(body.query, body.operation_name)?;
        Ok(operation.with_variables(variables))
    }

    fn build(source: String, operation_name: Option<String>) -> Result<Self> {
        let kind = parse_kind(&source, operation_name.as_deref())?;
        Ok(Operation {
            source,
            kind,
            operation_name,
            variables: None,
        })
    }

    /// Attach variables; `null` is treated as "no variables"
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = if variables.is_null() {
            None
        } else {
            Some(variables)
        };
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    pub fn variables(&self) -> Option<&Value> {
        self.variables.as_ref()
    }

    /// Transport this operation must be dispatched on
    pub fn transport(&self) -> Transport {
        classify(self)
    }

    /// Request body / subscribe payload for this operation
    pub(crate) fn request(&self) -> GraphQLRequest<'_> {
        GraphQLRequest {
            query: &self.source,
            variables: self.variables.as_ref(),
            operation_name: self.operation_name.as_deref(),
        }
    }
}

/// Select the transport for an operation.
pub fn classify(operation: &Operation) -> Transport {
    match operation.kind {
        OperationKind::Subscription => Transport::Streaming,
        OperationKind::Query | OperationKind::Mutation => Transport::RequestResponse,
    }
}

/// Classify raw operation text without building an [`Operation`]
pub fn classify_source(source: &str, operation_name: Option<&str>) -> Result<Transport> {
    Ok(Operation::build(source.to_string(), operation_name.map(str::to_string))?.transport())
}

fn parse_kind(source: &str, operation_name: Option<&str>) -> Result<OperationKind> {
    if source.trim().is_empty() {
        return Err(ClientError::malformed("empty document"));
    }

    let document = async_graphql_parser::parse_query(source)
        .map_err(|e| ClientError::malformed(e.to_string()))?;

    let selected = match operation_name {
        Some(name) => document
            .operations
            .iter()
            .find(|(op_name, _)| op_name.map(|n| n.as_str()) == Some(name))
            .ok_or_else(|| {
                ClientError::malformed(format!("no operation named `{}` in document", name))
            })?,
        None => {
            let mut operations = document.operations.iter();
            let first = operations
                .next()
                .ok_or_else(|| ClientError::malformed("document contains no operation"))?;
            if operations.next().is_some() {
                return Err(ClientError::malformed(
                    "document contains several operations; an operation name is required",
                ));
            }
            first
        }
    };

    Ok(selected.1.node.ty.into())
}
