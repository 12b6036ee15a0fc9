pub mod broadcast;
pub mod config;
pub mod connector;
pub mod db;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod sanitize;
pub mod storage;

pub use broadcast::{JobSubscription, ProgressBroadcaster, ProgressEvent};
pub use config::{load_config, Config};
pub use connector::{
    Connector, ConnectorError, FailureKind, InvocationLogger, ProviderClient, ProviderError,
    RetryPolicy,
};
pub use error::{ConfigError, OrchestratorError, ReliftError, Result, StorageError};
pub use orchestrator::{JobStatusView, Orchestrator, SourceArtifact};
pub use pipeline::{
    derive_job_status, JobStatus, PipelineContext, PipelineRunner, Stage, StageExecutors,
    StageStatus,
};
pub use storage::ArtifactStore;
