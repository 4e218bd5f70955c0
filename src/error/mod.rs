//! Error types for the operation client
//!
//! Every remote failure is converted into a [`ClientError`] value. Callers are
//! expected to match on [`ClientError::kind`]; nothing in this crate retries
//! implicitly.

use crate::graphql::GraphQLError;
use thiserror::Error;

/// Failure taxonomy shared by both transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation document could not be classified
    MalformedOperation,
    /// Connection refused, DNS failure, reset
    Network,
    /// No response within the deadline
    Timeout,
    /// The server answered with a well-formed `errors` array
    GraphQL,
    /// Unexpected or unparseable message on either transport
    Protocol,
    /// The stream connection ended while a subscription was active
    TransportClosed,
    /// Invalid client configuration
    Configuration,
}

/// Main error type for the operation client
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Operation text could not be parsed or has no usable definition
    #[error("Malformed operation: {0}")]
    MalformedOperation(String),

    /// Network communication error
    #[error("Network error: {message}")]
    Network {
        message: String,
        status: Option<u16>,
    },

    /// Deadline exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// GraphQL errors returned by the server
    #[error("GraphQL errors: {}", join_messages(.errors))]
    GraphQL {
        errors: Vec<GraphQLError>,
        status: Option<u16>,
    },

    /// Response or frame did not have the expected shape
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        status: Option<u16>,
    },

    /// Streaming connection went away mid-subscription
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// Configuration or builder validation error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Results using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

fn join_messages(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ClientError {
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        ClientError::MalformedOperation(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        ClientError::Network {
            message: msg.into(),
            status: None,
        }
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        ClientError::Protocol {
            message: msg.into(),
            status: None,
        }
    }

    pub fn transport_closed<S: Into<String>>(msg: S) -> Self {
        ClientError::TransportClosed(msg.into())
    }

    pub fn graphql(errors: Vec<GraphQLError>) -> Self {
        ClientError::GraphQL {
            errors,
            status: None,
        }
    }

    /// Map a reqwest failure onto the taxonomy.
    ///
    /// Connect-phase failures are network errors even when they were caused by
    /// the connect timeout; only a request that was sent and not answered in
    /// time is a [`ErrorKind::Timeout`].
    pub fn from_network_error(error: reqwest::Error) -> Self {
        let status = error.status().map(|s| s.as_u16());
        if error.is_connect() {
            ClientError::Network {
                message: error.to_string(),
                status,
            }
        } else if error.is_timeout() {
            ClientError::Timeout(error.to_string())
        } else if error.is_decode() {
            ClientError::Protocol {
                message: error.to_string(),
                status,
            }
        } else {
            ClientError::Network {
                message: error.to_string(),
                status,
            }
        }
    }

    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::MalformedOperation(_) => ErrorKind::MalformedOperation,
            ClientError::Network { .. } => ErrorKind::Network,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::GraphQL { .. } => ErrorKind::GraphQL,
            ClientError::Protocol { .. } => ErrorKind::Protocol,
            ClientError::TransportClosed(_) => ErrorKind::TransportClosed,
            ClientError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Raw HTTP status, where the transport reported one
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Network { status, .. }
            | ClientError::GraphQL { status, .. }
            | ClientError::Protocol { status, .. } => *status,
            _ => None,
        }
    }

    /// Server-reported errors for [`ErrorKind::GraphQL`]
    pub fn graphql_errors(&self) -> &[GraphQLError] {
        match self {
            ClientError::GraphQL { errors, .. } => errors,
            _ => &[],
        }
    }

    pub(crate) fn with_status(self, status: u16) -> Self {
        match self {
            ClientError::Network { message, .. } => ClientError::Network {
                message,
                status: Some(status),
            },
            ClientError::GraphQL { errors, .. } => ClientError::GraphQL {
                errors,
                status: Some(status),
            },
            ClientError::Protocol { message, .. } => ClientError::Protocol {
                message,
                status: Some(status),
            },
            other => other,
        }
    }

    /// Check if this error came from the network layer
    pub fn is_network_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::TransportClosed
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        ClientError::from_network_error(error)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        ClientError::protocol(error.to_string())
    }
}

impl From<tungstenite::Error> for ClientError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                ClientError::transport_closed(error.to_string())
            }
            tungstenite::Error::Io(_) | tungstenite::Error::Tls(_) | tungstenite::Error::Url(_) => {
                ClientError::network(error.to_string())
            }
            tungstenite::Error::Http(ref response) => ClientError::Network {
                message: error.to_string(),
                status: Some(response.status().as_u16()),
            },
            other => ClientError::protocol(other.to_string()),
        }
    }
}
