use super::acceleration;
use super::clone::CloneManager;
use super::collaborators::{AutotuneStore, FunctionStore, ReplayEngine, Scorer};
use super::compare::{self, TrialOutcome};
use super::types::{AnomalyFunction, ReplayReport, ReplayRun};
use crate::error::{ReplayError, ReplayStage, StoreError};
use anyhow::{anyhow, Context};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_AUTOTUNE_MAX_ATTEMPTS: u32 = 5;

/// Drives one replay trial end to end and owns the clone it creates.
///
/// Steps run strictly in order: clone, prune, configure, replay, score and
/// record, clean up. Nothing is retried except the versioned autotune update.
pub struct ReplayOrchestrator {
    functions: Arc<dyn FunctionStore>,
    autotune: Arc<dyn AutotuneStore>,
    clones: CloneManager,
    engine: Arc<dyn ReplayEngine>,
    scorer: Arc<dyn Scorer>,
    autotune_max_attempts: u32,
}

impl ReplayOrchestrator {
    pub fn new(
        functions: Arc<dyn FunctionStore>,
        autotune: Arc<dyn AutotuneStore>,
        clones: CloneManager,
        engine: Arc<dyn ReplayEngine>,
        scorer: Arc<dyn Scorer>,
    ) -> Self {
        Self {
            functions,
            autotune,
            clones,
            engine,
            scorer,
            autotune_max_attempts: DEFAULT_AUTOTUNE_MAX_ATTEMPTS,
        }
    }

    pub fn with_autotune_max_attempts(mut self, attempts: u32) -> Self {
        self.autotune_max_attempts = attempts.max(1);
        self
    }

    pub async fn execute(&self, run: &ReplayRun) -> Result<ReplayReport, ReplayError> {
        let started = Instant::now();
        let target_id = run.tuning_function_id;
        let window = run.window;

        if !window.is_valid() {
            return Err(ReplayError::Setup {
                stage: ReplayStage::Validate,
                clone_id: None,
                error: anyhow!("replay window {window} ends before it starts"),
            });
        }

        // Clone and prune. Failures here abort before anything else is touched.
        let target = self
            .functions
            .get_function(target_id)
            .await
            .with_context(|| format!("failed to load tuning function {target_id}"))
            .and_then(|found| found.ok_or_else(|| anyhow!("tuning function {target_id} not found")))
            .map_err(|error| ReplayError::Setup {
                stage: ReplayStage::CloneFunction,
                clone_id: None,
                error,
            })?;

        let clone_name = CloneManager::clone_name(&target.function_name, &run.parameters);
        let clone_id = self
            .clones
            .clone_function(target_id, &clone_name, run.options.clone_anomaly)
            .await
            .map_err(|error| {
                tracing::error!(
                    function_id = target_id,
                    clone_name = %clone_name,
                    error = %error,
                    "unable to clone tuning function"
                );
                ReplayError::Setup {
                    stage: ReplayStage::CloneFunction,
                    clone_id: None,
                    error,
                }
            })?;

        let pruned_results = self
            .clones
            .delete_results_in_range(clone_id, window)
            .await
            .map_err(|error| {
                tracing::error!(clone_id, error = %error, "unable to prune clone history");
                ReplayError::Setup {
                    stage: ReplayStage::PruneHistory,
                    clone_id: Some(clone_id),
                    error,
                }
            })?;
        tracing::info!(
            phase = "prune_history",
            clone_id,
            pruned_results,
            window = %window,
            "pruned clone history in replay window"
        );

        let mut clone = self.configure_clone(clone_id, run).await?;

        let replay_started = Instant::now();
        tracing::info!(phase = "replay", clone_id, window = %window, force = run.options.force_backfill, "replay started");
        self.engine
            .backfill_synchronous(clone_id, window, run.options.force_backfill)
            .await
            .map_err(|error| execution(ReplayStage::Replay, clone_id, error))?;
        tracing::info!(
            phase = "replay",
            clone_id,
            duration_ms = replay_started.elapsed().as_millis() as u64,
            "replay finished"
        );

        let mut performance = None;
        let mut improved = None;
        if let Some(autotune_id) = run.autotune_config_id {
            let outcome = self.score_and_record(run, autotune_id, clone_id, started).await?;
            performance = Some(outcome.performance);
            improved = Some(outcome.improved);
        }

        let clone_removed = run.options.self_kill;
        if clone_removed {
            self.clones
                .purge(clone_id, window.end_ms)
                .await
                .map_err(|error| persistence(ReplayStage::Cleanup, clone_id, error))?;
        } else {
            self.restore_clone(&mut clone, target_id).await?;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            phase = "complete",
            function_id = target_id,
            clone_id,
            clone_removed,
            performance = ?performance,
            improved = ?improved,
            duration_ms,
            "replay run finished"
        );

        Ok(ReplayReport {
            tuning_function_id: target_id,
            clone_id,
            clone_name,
            window,
            pruned_results,
            performance,
            improved,
            clone_removed,
            duration_ms,
        })
    }

    /// Strips alerting, optionally accelerates, applies the candidate and activates the clone.
    async fn configure_clone(&self, clone_id: i64, run: &ReplayRun) -> Result<AnomalyFunction, ReplayError> {
        let stage = ReplayStage::ApplyConfiguration;
        let mut clone = self
            .functions
            .get_function(clone_id)
            .await
            .with_context(|| format!("failed to load clone {clone_id}"))
            .and_then(|found| found.ok_or_else(|| anyhow!("clone {clone_id} disappeared")))
            .map_err(|error| execution(stage, clone_id, error))?;

        clone.alert_filter = None;
        if run.options.speed_up {
            acceleration::speed_up(&mut clone);
        }
        clone.update_properties(&run.parameters);
        clone.active = true;

        self.functions
            .update_function(&clone)
            .await
            .with_context(|| format!("failed to persist configuration of clone {clone_id}"))
            .map_err(|error| execution(stage, clone_id, error))?;

        tracing::debug!(
            clone_id,
            window_size = clone.window_size,
            window_unit = %clone.window_unit,
            cron = %clone.cron,
            "configured clone"
        );
        Ok(clone)
    }

    async fn score_and_record(
        &self,
        run: &ReplayRun,
        autotune_id: i64,
        clone_id: i64,
        started: Instant,
    ) -> Result<TrialOutcome, ReplayError> {
        let performance = self
            .scorer
            .evaluate(run.method, run.tuning_function_id, clone_id, run.window)
            .await
            .map_err(|error| execution(ReplayStage::Evaluate, clone_id, error))?;
        tracing::info!(
            phase = "evaluate",
            clone_id,
            method = run.method.metric_key(),
            performance,
            goal = run.goal,
            "scored replay"
        );

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut record = self
                .autotune
                .find_autotune(autotune_id)
                .await
                .with_context(|| format!("failed to load autotune record {autotune_id}"))
                .and_then(|found| found.ok_or_else(|| anyhow!("autotune record {autotune_id} not found")))
                .map_err(|error| execution(ReplayStage::Evaluate, clone_id, error))?;

            let outcome = compare::apply_trial(
                &mut record,
                &run.parameters,
                run.method.metric_key(),
                performance,
                run.goal,
                started.elapsed().as_secs() as i64,
                Utc::now().timestamp_millis(),
            );

            match self.autotune.update_autotune(&record).await {
                Ok(()) => {
                    tracing::info!(
                        phase = "update_autotune",
                        autotune_id,
                        improved = outcome.improved,
                        attempt,
                        "recorded trial"
                    );
                    return Ok(outcome);
                }
                Err(StoreError::Conflict { .. }) if attempt < self.autotune_max_attempts => {
                    tracing::warn!(autotune_id, attempt, "autotune record changed underneath; reloading");
                }
                Err(err) => {
                    return Err(persistence(ReplayStage::UpdateAutotune, clone_id, err.into()));
                }
            }
        }
    }

    /// Puts the target's current window, schedule and alerting back on a kept clone.
    async fn restore_clone(&self, clone: &mut AnomalyFunction, target_id: i64) -> Result<(), ReplayError> {
        let clone_id = clone.id;
        let original = self
            .functions
            .get_function(target_id)
            .await
            .with_context(|| format!("failed to reload tuning function {target_id}"))
            .and_then(|found| found.ok_or_else(|| anyhow!("tuning function {target_id} not found")))
            .map_err(|error| persistence(ReplayStage::Cleanup, clone_id, error))?;

        clone.restore_schedule_from(&original);
        self.functions
            .update_function(clone)
            .await
            .with_context(|| format!("failed to restore clone {clone_id}"))
            .map_err(|error| persistence(ReplayStage::Cleanup, clone_id, error))?;
        tracing::info!(clone_id, "kept clone with the target's window and schedule");
        Ok(())
    }
}

fn execution(stage: ReplayStage, clone_id: i64, error: anyhow::Error) -> ReplayError {
    tracing::error!(stage = %stage, clone_id, error = %error, "replay execution failed; clone left in place");
    ReplayError::Execution {
        stage,
        clone_id,
        error,
    }
}

fn persistence(stage: ReplayStage, clone_id: i64, error: anyhow::Error) -> ReplayError {
    tracing::error!(stage = %stage, clone_id, error = %error, "replay persistence failed");
    ReplayError::Persistence {
        stage,
        clone_id,
        error,
    }
}
