//! Durable audit logging for capability calls.
//!
//! Every connector attempt produces exactly one invocation-log row, on
//! the call's critical path: when the row cannot be written the call
//! itself fails. Payloads are truncated unless full-payload logging is
//! enabled via the debug config flag.

use chrono::Utc;
use serde_json::Value;

use crate::db::invocation_repo::{self, NewInvocation};
use crate::db::{Database, DatabaseError};
use crate::sanitize::truncate_payload;

use super::ProviderError;

/// Maximum rendered payload length when full-payload logging is off.
const TRUNCATED_PAYLOAD_LEN: usize = 2048;

#[derive(Clone)]
pub struct InvocationLogger {
    db: Database,
    full_payloads: bool,
}

impl InvocationLogger {
    pub fn new(db: Database, full_payloads: bool) -> Self {
        Self { db, full_payloads }
    }

    /// Appends one row for a single call attempt.
    pub fn record(
        &self,
        job_id: Option<&str>,
        provider: &str,
        operation: &str,
        params: &Value,
        outcome: &Result<Value, ProviderError>,
        duration_ms: i64,
    ) -> Result<i64, DatabaseError> {
        let (response, error, success) = match outcome {
            Ok(value) => (Some(self.render(value)), None, true),
            Err(e) => (None, Some(e.message.clone()), false),
        };

        invocation_repo::insert(
            &self.db,
            &NewInvocation {
                job_id: job_id.map(|s| s.to_string()),
                provider: provider.to_string(),
                operation: operation.to_string(),
                parameters: self.render(params),
                response,
                error,
                success,
                duration_ms,
                created_at: Utc::now().to_rfc3339(),
            },
        )
    }

    fn render(&self, value: &Value) -> String {
        let rendered = value.to_string();
        if self.full_payloads {
            rendered
        } else {
            truncate_payload(&rendered, TRUNCATED_PAYLOAD_LEN)
        }
    }
}
