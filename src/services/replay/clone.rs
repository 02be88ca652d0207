use super::collaborators::{AnomalyStore, FunctionStore};
use super::types::{CandidateParameters, ReplayWindow};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

/// Creates and disposes of the throwaway function copies replays run against.
#[derive(Clone)]
pub struct CloneManager {
    functions: Arc<dyn FunctionStore>,
    anomalies: Arc<dyn AnomalyStore>,
}

impl CloneManager {
    pub fn new(functions: Arc<dyn FunctionStore>, anomalies: Arc<dyn AnomalyStore>) -> Self {
        Self {
            functions,
            anomalies,
        }
    }

    /// `<source name>_clone_<k1>_<v1>...`, stable for a given source and parameter set.
    pub fn clone_name(source_name: &str, parameters: &CandidateParameters) -> String {
        format!("{}_{}", source_name, parameters.clone_tag())
    }

    /// Copies `source_id` under `name` and returns the clone's id.
    ///
    /// A function already carrying `name` is reused and refreshed from the
    /// source, so re-running the same candidate lands on the same clone. History
    /// is copied only when the clone is new, atomically with its creation.
    /// Clones start inactive and without an alert filter.
    pub async fn clone_function(&self, source_id: i64, name: &str, copy_history: bool) -> Result<i64> {
        let source = self
            .functions
            .get_function(source_id)
            .await
            .with_context(|| format!("failed to load function {source_id}"))?
            .ok_or_else(|| anyhow!("function {source_id} not found"))?;

        let mut clone = source.clone();
        clone.function_name = name.to_string();
        clone.active = false;
        clone.alert_filter = None;

        if let Some(existing) = self
            .functions
            .find_function_by_name(name)
            .await
            .with_context(|| format!("failed to look up function named {name}"))?
        {
            if existing.id == source_id {
                anyhow::bail!("clone name {name} collides with its own source function {source_id}");
            }
            clone.id = existing.id;
            self.functions
                .update_function(&clone)
                .await
                .with_context(|| format!("failed to refresh existing clone {}", existing.id))?;
            tracing::info!(
                source_id,
                clone_id = existing.id,
                clone_name = %name,
                "reusing existing clone"
            );
            return Ok(existing.id);
        }

        let history_from = copy_history.then_some(source_id);
        let (clone_id, copied) = self
            .functions
            .insert_function_with_history(&clone, history_from)
            .await
            .with_context(|| format!("failed to create clone {name}"))?;
        if copy_history {
            tracing::debug!(source_id, clone_id, copied, "copied history into clone");
        }

        tracing::info!(source_id, clone_id, clone_name = %name, "created clone");
        Ok(clone_id)
    }

    pub async fn delete_results_in_range(&self, function_id: i64, window: ReplayWindow) -> Result<u64> {
        self.anomalies
            .delete_results_in_range(function_id, window)
            .await
            .with_context(|| format!("failed to delete anomalies of {function_id} in {window}"))
    }

    /// Removes the clone's results from the epoch through `end_ms`, then the clone itself.
    pub async fn purge(&self, clone_id: i64, end_ms: i64) -> Result<u64> {
        let removed = self
            .delete_results_in_range(clone_id, ReplayWindow::new(0, end_ms))
            .await?;
        self.functions
            .delete_function(clone_id)
            .await
            .with_context(|| format!("failed to delete clone {clone_id}"))?;
        tracing::info!(clone_id, removed, "purged clone");
        Ok(removed)
    }
}
