use crate::error::StoreError;
use crate::services::replay::{
    AnomalyFunction, AnomalyResult, AnomalyStore, AutotuneRecord, AutotuneStore, FunctionStore,
    PerformanceEvaluationMethod, ReplayEngine, ReplayWindow, Scorer, TimeUnit,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const HOUR_MS: i64 = 3_600_000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

pub fn function(id: i64, name: &str) -> AnomalyFunction {
    let mut properties = BTreeMap::new();
    properties.insert("threshold".to_string(), "2.0".to_string());
    properties.insert("seasonality".to_string(), "weekly".to_string());
    AnomalyFunction {
        id,
        function_name: name.to_string(),
        window_size: 1,
        window_unit: TimeUnit::Hours,
        cron: "0 0 * * * ? *".to_string(),
        active: true,
        alert_filter: Some(serde_json::json!({ "type": "alpha_beta", "alpha": "0.5" })),
        properties,
    }
}

pub fn anomaly(function_id: i64, start_ms: i64, end_ms: i64) -> AnomalyResult {
    AnomalyResult {
        id: 0,
        function_id,
        start_ms,
        end_ms,
        score: 1.0,
        weight: 0.1,
        feedback: None,
    }
}

pub fn autotune(id: i64, function_id: i64) -> AutotuneRecord {
    AutotuneRecord {
        id,
        function_id,
        configuration: BTreeMap::new(),
        performance: BTreeMap::new(),
        message: String::new(),
        avg_running_time_secs: 0,
        last_update_timestamp: 0,
        version: 0,
    }
}

#[derive(Default)]
struct StoreState {
    functions: BTreeMap<i64, AnomalyFunction>,
    results: Vec<AnomalyResult>,
    autotune: BTreeMap<i64, AutotuneRecord>,
    next_id: i64,
    failures: HashSet<&'static str>,
    calls: Vec<&'static str>,
    concurrent_writes: VecDeque<String>,
}

impl StoreState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        1_000 + self.next_id
    }

    fn enter(&mut self, op: &'static str) -> Result<()> {
        self.calls.push(op);
        if self.failures.contains(op) {
            bail!("injected failure: {op}");
        }
        Ok(())
    }
}

/// In-memory function, autotune and anomaly store with failure injection.
#[derive(Default)]
pub struct InMemoryReplayStore {
    state: Mutex<StoreState>,
}

impl InMemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_function(&self, function: AnomalyFunction) {
        self.state.lock().await.functions.insert(function.id, function);
    }

    pub async fn put_result(&self, mut result: AnomalyResult) -> i64 {
        let mut state = self.state.lock().await;
        result.id = state.allocate_id();
        let id = result.id;
        state.results.push(result);
        id
    }

    pub async fn put_autotune(&self, record: AutotuneRecord) {
        self.state.lock().await.autotune.insert(record.id, record);
    }

    pub async fn function(&self, id: i64) -> Option<AnomalyFunction> {
        self.state.lock().await.functions.get(&id).cloned()
    }

    pub async fn function_by_name(&self, name: &str) -> Option<AnomalyFunction> {
        self.state
            .lock()
            .await
            .functions
            .values()
            .find(|f| f.function_name == name)
            .cloned()
    }

    pub async fn function_count(&self) -> usize {
        self.state.lock().await.functions.len()
    }

    pub async fn results_for(&self, function_id: i64) -> Vec<AnomalyResult> {
        self.state
            .lock()
            .await
            .results
            .iter()
            .filter(|r| r.function_id == function_id)
            .cloned()
            .collect()
    }

    pub async fn result_count(&self) -> usize {
        self.state.lock().await.results.len()
    }

    pub async fn autotune(&self, id: i64) -> Option<AutotuneRecord> {
        self.state.lock().await.autotune.get(&id).cloned()
    }

    pub async fn fail_on(&self, op: &'static str) {
        self.state.lock().await.failures.insert(op);
    }

    pub async fn calls(&self) -> Vec<&'static str> {
        self.state.lock().await.calls.clone()
    }

    /// The next `update_autotune` first sees another writer append `entry` to the log.
    pub async fn queue_concurrent_write(&self, entry: &str) {
        self.state
            .lock()
            .await
            .concurrent_writes
            .push_back(entry.to_string());
    }
}

#[async_trait]
impl FunctionStore for InMemoryReplayStore {
    async fn get_function(&self, id: i64) -> Result<Option<AnomalyFunction>> {
        let mut state = self.state.lock().await;
        state.enter("get_function")?;
        Ok(state.functions.get(&id).cloned())
    }

    async fn find_function_by_name(&self, name: &str) -> Result<Option<AnomalyFunction>> {
        let mut state = self.state.lock().await;
        state.enter("find_function_by_name")?;
        Ok(state
            .functions
            .values()
            .find(|f| f.function_name == name)
            .cloned())
    }

    async fn insert_function_with_history(
        &self,
        function: &AnomalyFunction,
        history_from: Option<i64>,
    ) -> Result<(i64, u64)> {
        let mut state = self.state.lock().await;
        state.enter("insert_function")?;
        if history_from.is_some() {
            state.enter("copy_results")?;
        }
        let id = state.allocate_id();
        let mut function = function.clone();
        function.id = id;
        state.functions.insert(id, function);

        let copies: Vec<AnomalyResult> = match history_from {
            Some(source_id) => state
                .results
                .iter()
                .filter(|r| r.function_id == source_id)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let copied = copies.len() as u64;
        for mut result in copies {
            result.id = state.allocate_id();
            result.function_id = id;
            state.results.push(result);
        }
        Ok((id, copied))
    }

    async fn update_function(&self, function: &AnomalyFunction) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter("update_function")?;
        if !state.functions.contains_key(&function.id) {
            bail!("function {} not found", function.id);
        }
        state.functions.insert(function.id, function.clone());
        Ok(())
    }

    async fn delete_function(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter("delete_function")?;
        state.functions.remove(&id);
        state.results.retain(|r| r.function_id != id);
        Ok(())
    }
}

#[async_trait]
impl AutotuneStore for InMemoryReplayStore {
    async fn find_autotune(&self, id: i64) -> Result<Option<AutotuneRecord>> {
        let mut state = self.state.lock().await;
        state.enter("find_autotune")?;
        Ok(state.autotune.get(&id).cloned())
    }

    async fn update_autotune(&self, record: &AutotuneRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.enter("update_autotune")?;
        let concurrent = state.concurrent_writes.pop_front();
        let Some(stored) = state.autotune.get_mut(&record.id) else {
            return Err(StoreError::NotFound(record.id));
        };
        if let Some(entry) = concurrent {
            stored.message = if stored.message.is_empty() {
                entry
            } else {
                format!("{};{}", stored.message, entry)
            };
            stored.version += 1;
        }
        if stored.version != record.version {
            return Err(StoreError::Conflict {
                id: record.id,
                expected_version: record.version,
            });
        }
        let mut next = record.clone();
        next.version += 1;
        *stored = next;
        Ok(())
    }
}

#[async_trait]
impl AnomalyStore for InMemoryReplayStore {
    async fn list_results(&self, function_id: i64, window: ReplayWindow) -> Result<Vec<AnomalyResult>> {
        let mut state = self.state.lock().await;
        state.enter("list_results")?;
        Ok(state
            .results
            .iter()
            .filter(|r| r.function_id == function_id && window.contains(r.start_ms, r.end_ms))
            .cloned()
            .collect())
    }

    async fn delete_results_in_range(&self, function_id: i64, window: ReplayWindow) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.enter("delete_results_in_range")?;
        let before = state.results.len();
        state
            .results
            .retain(|r| !(r.function_id == function_id && window.contains(r.start_ms, r.end_ms)));
        Ok((before - state.results.len()) as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillCall {
    pub function: AnomalyFunction,
    pub window: ReplayWindow,
    pub force: bool,
}

/// Deterministic detector: one anomaly covering the first hour of the window per day.
pub struct FakeEngine {
    store: Arc<InMemoryReplayStore>,
    calls: Mutex<Vec<BackfillCall>>,
    fail: bool,
    update_during_replay: Option<AnomalyFunction>,
}

impl FakeEngine {
    pub fn new(store: Arc<InMemoryReplayStore>) -> Self {
        Self {
            store,
            calls: Mutex::new(Vec::new()),
            fail: false,
            update_during_replay: None,
        }
    }

    /// Stores `function` while the replay is in flight, as an operator editing the target would.
    pub fn updating_during_replay(store: Arc<InMemoryReplayStore>, function: AnomalyFunction) -> Self {
        Self {
            update_during_replay: Some(function),
            ..Self::new(store)
        }
    }

    pub fn failing(store: Arc<InMemoryReplayStore>) -> Self {
        Self {
            fail: true,
            ..Self::new(store)
        }
    }

    pub async fn calls(&self) -> Vec<BackfillCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ReplayEngine for FakeEngine {
    async fn backfill_synchronous(&self, function_id: i64, window: ReplayWindow, force: bool) -> Result<()> {
        let function = match self.store.function(function_id).await {
            Some(function) => function,
            None => bail!("function {function_id} not found"),
        };
        self.calls.lock().await.push(BackfillCall {
            function,
            window,
            force,
        });
        if let Some(update) = &self.update_during_replay {
            self.store.put_function(update.clone()).await;
        }
        if self.fail {
            bail!("detection engine unavailable");
        }
        let mut day_start = window.start_ms;
        while day_start < window.end_ms {
            let end = (day_start + HOUR_MS).min(window.end_ms);
            self.store.put_result(anomaly(function_id, day_start, end)).await;
            day_start += DAY_MS;
        }
        Ok(())
    }
}

/// Returns queued scores in order, then `fallback`.
pub struct FakeScorer {
    scores: Mutex<VecDeque<f64>>,
    fallback: f64,
    calls: Mutex<Vec<(i64, i64, ReplayWindow)>>,
    fail: bool,
}

impl FakeScorer {
    pub fn new(scores: impl IntoIterator<Item = f64>) -> Self {
        Self {
            scores: Mutex::new(scores.into_iter().collect()),
            fallback: 0.0,
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new([])
        }
    }

    pub async fn calls(&self) -> Vec<(i64, i64, ReplayWindow)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Scorer for FakeScorer {
    async fn evaluate(
        &self,
        _method: PerformanceEvaluationMethod,
        baseline_function_id: i64,
        candidate_function_id: i64,
        window: ReplayWindow,
    ) -> Result<f64> {
        self.calls
            .lock()
            .await
            .push((baseline_function_id, candidate_function_id, window));
        if self.fail {
            bail!("scorer failed");
        }
        Ok(self.scores.lock().await.pop_front().unwrap_or(self.fallback))
    }
}
