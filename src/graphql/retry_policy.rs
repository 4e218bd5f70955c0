//! Opt-in retry policies for request/response operations
//!
//! Nothing in the executors retries on its own. Callers that want retries wrap
//! a call in a [`RetryExecutor`] (or [`OperationClient::execute_with_retry`])
//! and pick the conditions that are safe for their operation; retrying a
//! mutation may apply it twice.
//!
//! [`OperationClient::execute_with_retry`]: crate::OperationClient::execute_with_retry

use crate::error::{ClientError, ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy for request/response operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Strategy to use for retries
    pub strategy: RetryStrategy,
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Failures that may be retried
    pub retry_conditions: Vec<RetryCondition>,
}

/// How the delay grows between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    Fixed,
    ExponentialBackoff { multiplier: f64 },
    LinearBackoff { increment: Duration },
}

/// Failures that should trigger a retry
#[derive(Debug, Clone, PartialEq)]
pub enum RetryCondition {
    /// Connection refused, DNS, reset
    NetworkError,
    /// Request deadline exceeded
    Timeout,
    /// Any HTTP 5xx status
    ServerError,
    /// One specific HTTP status
    HttpStatus(u16),
    /// HTTP 429, or a GraphQL error mentioning a rate limit
    RateLimit,
    /// GraphQL errors whose message contains the text (case-insensitive)
    GraphQLMessage { contains: String },
    /// Streaming connection lost
    TransportClosed,
}

/// Runs an operation under a [`RetryPolicy`]
pub struct RetryExecutor {
    policy: RetryPolicy,
    current_attempt: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            strategy: RetryStrategy::ExponentialBackoff { multiplier: 2.0 },
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
            retry_conditions: vec![
                RetryCondition::NetworkError,
                RetryCondition::Timeout,
                RetryCondition::ServerError,
                RetryCondition::RateLimit,
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never retry; useful as an explicit "off" value
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            retry_conditions: Vec::new(),
            ..Self::default()
        }
    }

    /// Retry only failures where the request most likely never reached the
    /// service. Reasonable for mutations.
    pub fn connection_only() -> Self {
        RetryPolicy {
            strategy: RetryStrategy::ExponentialBackoff { multiplier: 2.0 },
            max_attempts: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
            retry_conditions: vec![RetryCondition::NetworkError],
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<RetryCondition>) -> Self {
        self.retry_conditions = conditions;
        self
    }

    pub fn add_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_conditions.push(condition);
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let steps = attempt - 1;
        let base_delay = match self.strategy {
            RetryStrategy::Fixed => self.initial_delay,
            RetryStrategy::ExponentialBackoff { multiplier } => {
                let delay_ms =
                    self.initial_delay.as_millis() as f64 * multiplier.powi(steps as i32);
                Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64)
            }
            RetryStrategy::LinearBackoff { increment } => {
                self.initial_delay.saturating_add(increment.saturating_mul(steps))
            }
        };

        let capped_delay = base_delay.min(self.max_delay);

        if self.jitter_factor > 0.0 {
            let jitter_ms =
                (capped_delay.as_millis() as f64 * self.jitter_factor * rand::random::<f64>()) as u64;
            let jitter = Duration::from_millis(jitter_ms);

            if rand::random::<bool>() {
                (capped_delay + jitter).min(self.max_delay)
            } else {
                capped_delay.saturating_sub(jitter)
            }
        } else {
            capped_delay
        }
    }

    /// Check if an error should trigger a retry
    pub fn should_retry(&self, error: &ClientError) -> bool {
        self.retry_conditions
            .iter()
            .any(|condition| condition.matches(error))
    }

    pub fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.clone())
    }
}

impl RetryCondition {
    fn matches(&self, error: &ClientError) -> bool {
        match self {
            RetryCondition::NetworkError => error.kind() == ErrorKind::Network,
            RetryCondition::Timeout => error.kind() == ErrorKind::Timeout,
            RetryCondition::TransportClosed => error.kind() == ErrorKind::TransportClosed,
            RetryCondition::ServerError => error.status().is_some_and(|s| (500..600).contains(&s)),
            RetryCondition::HttpStatus(status) => error.status() == Some(*status),
            RetryCondition::RateLimit => {
                error.status() == Some(429)
                    || error
                        .graphql_errors()
                        .iter()
                        .any(|e| e.message.to_lowercase().contains("rate limit"))
            }
            RetryCondition::GraphQLMessage { contains } => {
                let needle = contains.to_lowercase();
                error
                    .graphql_errors()
                    .iter()
                    .any(|e| e.message.to_lowercase().contains(&needle))
            }
        }
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryExecutor {
            policy,
            current_attempt: 0,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts. The last error is returned unchanged.
    pub async fn execute<F, Fut, T>(&mut self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_if(operation, |_| false).await
    }

    /// Like [`execute`](Self::execute), with an extra caller-supplied condition
    pub async fn execute_if<F, Fut, T, C>(&mut self, operation: F, also_retry: C) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&ClientError) -> bool,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.current_attempt = attempt;

            let error = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Operation succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            if !(self.policy.should_retry(&error) || also_retry(&error)) {
                debug!("Error does not match retry conditions: {}", error);
                return Err(error);
            }

            if attempt >= max_attempts {
                warn!("Max retry attempts ({}) reached, failing", max_attempts);
                return Err(error);
            }

            let delay = self.policy.calculate_delay(attempt);
            warn!(
                "Operation failed on attempt {} ({}), retrying in {:?}",
                attempt, error, delay
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }

            attempt += 1;
        }
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Convenience function to execute an operation with retry logic
pub async fn execute_with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    policy.executor().execute(operation).await
}
