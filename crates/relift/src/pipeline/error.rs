use thiserror::Error;

use super::stage::Stage;

/// A hard stage failure: no fallback remains and the pipeline must stop.
///
/// Provider errors are classified and contained at the executor
/// boundary; this is the only failure shape the runner ever observes.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}
