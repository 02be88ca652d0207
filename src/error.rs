use std::fmt;

/// Step of a replay run at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStage {
    Validate,
    CloneFunction,
    PruneHistory,
    ApplyConfiguration,
    Replay,
    Evaluate,
    UpdateAutotune,
    Cleanup,
}

impl ReplayStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayStage::Validate => "validate",
            ReplayStage::CloneFunction => "clone_function",
            ReplayStage::PruneHistory => "prune_history",
            ReplayStage::ApplyConfiguration => "apply_configuration",
            ReplayStage::Replay => "replay",
            ReplayStage::Evaluate => "evaluate",
            ReplayStage::UpdateAutotune => "update_autotune",
            ReplayStage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for ReplayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a replay run.
///
/// `Setup` failures happen before the clone is trustworthy and leave nothing
/// further behind. `Execution` and `Persistence` failures leave the clone in
/// place; it can be found by its deterministic name.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay setup failed at {stage}: {error:#}")]
    Setup {
        stage: ReplayStage,
        clone_id: Option<i64>,
        error: anyhow::Error,
    },
    #[error("replay execution failed at {stage} (clone {clone_id}): {error:#}")]
    Execution {
        stage: ReplayStage,
        clone_id: i64,
        error: anyhow::Error,
    },
    #[error("replay persistence failed at {stage} (clone {clone_id}): {error:#}")]
    Persistence {
        stage: ReplayStage,
        clone_id: i64,
        error: anyhow::Error,
    },
}

impl ReplayError {
    pub fn stage(&self) -> ReplayStage {
        match self {
            ReplayError::Setup { stage, .. }
            | ReplayError::Execution { stage, .. }
            | ReplayError::Persistence { stage, .. } => *stage,
        }
    }

    /// Id of the clone left behind, if one was created.
    pub fn clone_id(&self) -> Option<i64> {
        match self {
            ReplayError::Setup { clone_id, .. } => *clone_id,
            ReplayError::Execution { clone_id, .. } | ReplayError::Persistence { clone_id, .. } => {
                Some(*clone_id)
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ReplayError::Setup { .. } => "setup_failure",
            ReplayError::Execution { .. } => "execution_failure",
            ReplayError::Persistence { .. } => "persistence_failure",
        }
    }
}

/// Error returned by the autotune store's versioned update.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("autotune record {id} was modified concurrently (expected version {expected_version})")]
    Conflict { id: i64, expected_version: i64 },
    #[error("autotune record {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Other(err.into())
    }
}
