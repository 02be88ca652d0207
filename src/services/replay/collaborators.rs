use super::types::{
    AnomalyFunction, AnomalyResult, AutotuneRecord, PerformanceEvaluationMethod, ReplayWindow,
};
use crate::error::StoreError;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait FunctionStore: Send + Sync {
    async fn get_function(&self, id: i64) -> Result<Option<AnomalyFunction>>;

    async fn find_function_by_name(&self, name: &str) -> Result<Option<AnomalyFunction>>;

    /// Inserts `function` under a fresh id (its `id` field is ignored) and, when
    /// `history_from` is set, copies that function's anomaly results onto it.
    /// Both happen or neither does. Returns the new id and the copied count.
    async fn insert_function_with_history(
        &self,
        function: &AnomalyFunction,
        history_from: Option<i64>,
    ) -> Result<(i64, u64)>;

    async fn update_function(&self, function: &AnomalyFunction) -> Result<()>;

    /// Deleting a function also drops any anomaly results still attached to it.
    async fn delete_function(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait AutotuneStore: Send + Sync {
    async fn find_autotune(&self, id: i64) -> Result<Option<AutotuneRecord>>;

    /// Succeeds only if the stored version still equals `record.version`; the
    /// stored version is then incremented.
    async fn update_autotune(&self, record: &AutotuneRecord) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AnomalyStore: Send + Sync {
    /// Results of `function_id` lying entirely inside `window` (bounds inclusive).
    async fn list_results(&self, function_id: i64, window: ReplayWindow) -> Result<Vec<AnomalyResult>>;

    /// Deletes the results `list_results` would return and reports how many went.
    async fn delete_results_in_range(&self, function_id: i64, window: ReplayWindow) -> Result<u64>;
}

/// Runs detection for a function over a window and blocks until it is done.
#[async_trait]
pub trait ReplayEngine: Send + Sync {
    async fn backfill_synchronous(
        &self,
        function_id: i64,
        window: ReplayWindow,
        force: bool,
    ) -> Result<()>;
}

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn evaluate(
        &self,
        method: PerformanceEvaluationMethod,
        baseline_function_id: i64,
        candidate_function_id: i64,
        window: ReplayWindow,
    ) -> Result<f64>;
}
