//! The fixed five-stage pipeline and its status vocabulary.

use serde::{Deserialize, Serialize};

use crate::db::stage_repo::StageRow;

/// One of the five fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyze,
    Plan,
    Generate,
    Validate,
    Deploy,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Analyze,
        Stage::Plan,
        Stage::Generate,
        Stage::Validate,
        Stage::Deploy,
    ];

    /// Stage names in pipeline order, as stored in stage records.
    pub const NAMES: [&'static str; 5] = ["analyze", "plan", "generate", "validate", "deploy"];

    /// 1-based pipeline index.
    pub fn index(self) -> u8 {
        match self {
            Stage::Analyze => 1,
            Stage::Plan => 2,
            Stage::Generate => 3,
            Stage::Validate => 4,
            Stage::Deploy => 5,
        }
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[(self.index() - 1) as usize]
    }

    pub fn from_index(index: u8) -> Option<Stage> {
        Stage::ALL.get(index.checked_sub(1)? as usize).copied()
    }

    /// The job status that marks this stage as running.
    pub fn active_job_status(self) -> JobStatus {
        match self {
            Stage::Analyze => JobStatus::Analyzing,
            Stage::Plan => JobStatus::Planning,
            Stage::Generate => JobStatus::Generating,
            Stage::Validate => JobStatus::Validating,
            Stage::Deploy => JobStatus::Deploying,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Overall job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Analyzing,
    Planning,
    Generating,
    Validating,
    Deploying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Planning => "planning",
            JobStatus::Generating => "generating",
            JobStatus::Validating => "validating",
            JobStatus::Deploying => "deploying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "uploaded" => Some(JobStatus::Uploaded),
            "analyzing" => Some(JobStatus::Analyzing),
            "planning" => Some(JobStatus::Planning),
            "generating" => Some(JobStatus::Generating),
            "validating" => Some(JobStatus::Validating),
            "deploying" => Some(JobStatus::Deploying),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            JobStatus::Analyzing
                | JobStatus::Planning
                | JobStatus::Generating
                | JobStatus::Validating
                | JobStatus::Deploying
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::NotStarted => "not_started",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<StageStatus> {
        match s {
            "not_started" => Some(StageStatus::NotStarted),
            "in_progress" => Some(StageStatus::InProgress),
            "completed" => Some(StageStatus::Completed),
            "failed" => Some(StageStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the overall job status from its five stage records.
///
/// The overall status is a pure function of the stage rows: any failed
/// stage means FAILED; a terminal fifth stage means COMPLETED (a degraded
/// deploy still counts); otherwise the first non-completed stage decides.
pub fn derive_job_status(stages: &[StageRow]) -> JobStatus {
    if stages.iter().any(|s| s.status == "failed") {
        return JobStatus::Failed;
    }

    let first_open = stages.iter().find(|s| s.status != "completed");
    match first_open {
        None => JobStatus::Completed,
        Some(record) => {
            let stage = Stage::from_index(record.stage_index).unwrap_or(Stage::Analyze);
            if record.status == "in_progress" {
                stage.active_job_status()
            } else if record.stage_index == 1 {
                JobStatus::Uploaded
            } else {
                // Between stages: the predecessor completed, this one is
                // about to start.
                stage.active_job_status()
            }
        }
    }
}
