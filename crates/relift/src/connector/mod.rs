//! Capability connector: the uniform client wrapping one external
//! capability provider.
//!
//! The connector owns the reliability policy so callers never do:
//! per-attempt timeout, retry with exponential backoff for transient
//! failures, structured failure classification, and one audit row per
//! attempt. Stage executors see classified `ConnectorError`s, never raw
//! provider errors.

pub mod logger;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::InvokeConfig;
use crate::db::DatabaseError;

pub use logger::InvocationLogger;

/// How a provider call failed, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network-level or timeout failure; retried locally.
    Transient,
    /// The provider refused the input; surfaced immediately, never retried.
    Rejected,
    /// The provider cannot serve at all; triggers in-stage fallback.
    Unavailable,
}

/// A classified failure returned by a provider client.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Rejected,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Unavailable,
            message: message.into(),
        }
    }
}

/// The single invocation contract every capability provider implements.
///
/// Parameters and payloads are JSON values so they stay serializable for
/// the audit trail.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError>;
}

/// Retry tuning applied by a connector to transient failures only.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(invoke: &InvokeConfig) -> Self {
        Self {
            max_attempts: invoke.max_attempts.max(1),
            initial_backoff: Duration::from_millis(invoke.initial_backoff_ms),
            max_backoff: Duration::from_millis(invoke.max_backoff_ms),
        }
    }

    /// Backoff before the retry following `attempt` (1-based): doubles
    /// per attempt up to the ceiling.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt - 1).min(16);
        (self.initial_backoff * factor).min(self.max_backoff)
    }
}

/// Failures a connector surfaces to its stage executor.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("{provider} rejected '{operation}': {message}")]
    Rejected {
        provider: String,
        operation: String,
        message: String,
    },

    #[error("{provider} unavailable for '{operation}': {message}")]
    Unavailable {
        provider: String,
        operation: String,
        message: String,
    },

    #[error("{provider} '{operation}' failed after {attempts} attempts: {message}")]
    Exhausted {
        provider: String,
        operation: String,
        attempts: u32,
        message: String,
    },

    /// The audit row could not be written. Logging is on the critical
    /// path, so the call fails with it.
    #[error("Failed to record invocation: {0}")]
    Audit(#[from] DatabaseError),
}

/// Uniform client around one provider: timeout, retry, classification,
/// audit.
pub struct Connector {
    provider: Box<dyn ProviderClient>,
    timeout: Duration,
    retry: RetryPolicy,
    logger: InvocationLogger,
}

impl Connector {
    pub fn new(
        provider: Box<dyn ProviderClient>,
        timeout: Duration,
        retry: RetryPolicy,
        logger: InvocationLogger,
    ) -> Self {
        Self {
            provider,
            timeout,
            retry,
            logger,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Invokes the provider. Each attempt, including every retry,
    /// appends exactly one invocation-log row before this returns.
    pub async fn invoke(
        &self,
        operation: &str,
        params: &Value,
        job_id: Option<&str>,
    ) -> Result<Value, ConnectorError> {
        let provider = self.provider.name();
        let mut attempt: u32 = 1;

        loop {
            debug!(
                provider,
                operation,
                attempt,
                timeout_ms = self.timeout.as_millis() as u64,
                "Invoking capability provider"
            );

            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.timeout,
                self.provider.call(operation, params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::transient(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                ))),
            };
            let duration_ms = started.elapsed().as_millis() as i64;

            self.logger
                .record(job_id, provider, operation, params, &outcome, duration_ms)?;

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => match e.kind {
                    FailureKind::Rejected => {
                        return Err(ConnectorError::Rejected {
                            provider: provider.to_string(),
                            operation: operation.to_string(),
                            message: e.message,
                        });
                    }
                    FailureKind::Unavailable => {
                        return Err(ConnectorError::Unavailable {
                            provider: provider.to_string(),
                            operation: operation.to_string(),
                            message: e.message,
                        });
                    }
                    FailureKind::Transient => {
                        if attempt >= self.retry.max_attempts {
                            return Err(ConnectorError::Exhausted {
                                provider: provider.to_string(),
                                operation: operation.to_string(),
                                attempts: attempt,
                                message: e.message,
                            });
                        }
                        let backoff = self.retry.backoff_for(attempt);
                        warn!(
                            provider,
                            operation,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e.message,
                            "Transient failure, will retry"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::invocation_repo;
    use crate::db::Database;
    use serde_json::json;
    use std::sync::Mutex;

    /// Scripted provider for tests: pops one outcome per call.
    pub(crate) struct ScriptedProvider {
        pub name: &'static str,
        pub outcomes: Mutex<Vec<Result<Value, ProviderError>>>,
    }

    impl ScriptedProvider {
        pub fn new(name: &'static str, outcomes: Vec<Result<Value, ProviderError>>) -> Self {
            Self {
                name,
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn call(&self, _operation: &str, _params: &Value) -> Result<Value, ProviderError> {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Err(ProviderError::unavailable("script exhausted"));
            }
            outcomes.remove(0)
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn connector_with(db: &Database, provider: ScriptedProvider) -> Connector {
        Connector::new(
            Box::new(provider),
            Duration::from_millis(200),
            fast_retry(),
            InvocationLogger::new(db.clone(), false),
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_success_logs_one_row() {
        let db = Database::open_in_memory().unwrap();
        let connector = connector_with(
            &db,
            ScriptedProvider::new("analyzer", vec![Ok(json!({"ok": true}))]),
        );

        let value = connector.invoke("analyze", &json!({}), None).await.unwrap();
        assert_eq!(value, json!({"ok": true}));

        let (rows, total) =
            invocation_repo::query(&db, &Default::default()).unwrap();
        assert_eq!(total, 1);
        assert!(rows[0].success);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let db = Database::open_in_memory().unwrap();
        let connector = connector_with(
            &db,
            ScriptedProvider::new(
                "analyzer",
                vec![
                    Err(ProviderError::transient("reset")),
                    Err(ProviderError::transient("reset again")),
                    Ok(json!({"ok": true})),
                ],
            ),
        );

        let value = connector.invoke("analyze", &json!({}), None).await.unwrap();
        assert_eq!(value, json!({"ok": true}));

        // Three attempts, three rows: two failures then one success.
        let (rows, total) = invocation_repo::query(&db, &Default::default()).unwrap();
        assert_eq!(total, 3);
        assert!(!rows[0].success);
        assert!(!rows[1].success);
        assert!(rows[2].success);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_after_max_attempts() {
        let db = Database::open_in_memory().unwrap();
        let connector = connector_with(
            &db,
            ScriptedProvider::new(
                "analyzer",
                vec![
                    Err(ProviderError::transient("reset")),
                    Err(ProviderError::transient("reset")),
                    Err(ProviderError::transient("reset")),
                ],
            ),
        );

        let result = connector.invoke("analyze", &json!({}), None).await;
        match result {
            Err(ConnectorError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("Expected Exhausted, got {:?}", other.map(|_| ())),
        }

        let (_, total) = invocation_repo::query(&db, &Default::default()).unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let db = Database::open_in_memory().unwrap();
        let connector = connector_with(
            &db,
            ScriptedProvider::new(
                "analyzer",
                vec![Err(ProviderError::rejected("empty source"))],
            ),
        );

        let result = connector.invoke("analyze", &json!({}), None).await;
        assert!(matches!(result, Err(ConnectorError::Rejected { .. })));

        let (_, total) = invocation_repo::query(&db, &Default::default()).unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_unavailable_is_not_retried() {
        let db = Database::open_in_memory().unwrap();
        let connector = connector_with(
            &db,
            ScriptedProvider::new(
                "publisher",
                vec![Err(ProviderError::unavailable("no endpoint configured"))],
            ),
        );

        let result = connector.invoke("publish", &json!({}), None).await;
        assert!(matches!(result, Err(ConnectorError::Unavailable { .. })));

        let (_, total) = invocation_repo::query(&db, &Default::default()).unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_timeout_classifies_as_transient() {
        struct SlowProvider;

        #[async_trait]
        impl ProviderClient for SlowProvider {
            fn name(&self) -> &'static str {
                "slow"
            }

            async fn call(&self, _op: &str, _params: &Value) -> Result<Value, ProviderError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!({}))
            }
        }

        let db = Database::open_in_memory().unwrap();
        let connector = Connector::new(
            Box::new(SlowProvider),
            Duration::from_millis(10),
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            InvocationLogger::new(db.clone(), false),
        );

        let result = connector.invoke("call", &json!({}), None).await;
        match result {
            Err(ConnectorError::Exhausted { attempts, message, .. }) => {
                assert_eq!(attempts, 2);
                assert!(message.contains("timed out"));
            }
            other => panic!("Expected Exhausted, got {:?}", other.map(|_| ())),
        }

        let (rows, total) = invocation_repo::query(&db, &Default::default()).unwrap();
        assert_eq!(total, 2);
        assert!(rows[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_job_id_tagged_on_rows() {
        let db = Database::open_in_memory().unwrap();
        crate::db::job_repo::insert(&db, &crate::db::job_repo::tests::sample_job("j1")).unwrap();
        let connector = connector_with(
            &db,
            ScriptedProvider::new("analyzer", vec![Ok(json!({}))]),
        );

        connector.invoke("analyze", &json!({}), Some("j1")).await.unwrap();

        assert_eq!(invocation_repo::count_for_job(&db, "j1").unwrap(), 1);
    }
}
