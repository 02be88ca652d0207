use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of every clone name; stray clones are found by searching for it.
pub const CLONE_NAME_TAG: &str = "clone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 7] = [
        TimeUnit::Nanoseconds,
        TimeUnit::Microseconds,
        TimeUnit::Milliseconds,
        TimeUnit::Seconds,
        TimeUnit::Minutes,
        TimeUnit::Hours,
        TimeUnit::Days,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "NANOSECONDS",
            TimeUnit::Microseconds => "MICROSECONDS",
            TimeUnit::Milliseconds => "MILLISECONDS",
            TimeUnit::Seconds => "SECONDS",
            TimeUnit::Minutes => "MINUTES",
            TimeUnit::Hours => "HOURS",
            TimeUnit::Days => "DAYS",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        TimeUnit::ALL
            .into_iter()
            .find(|unit| unit.as_str().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detection function definition. Tuning targets and their clones share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFunction {
    pub id: i64,
    pub function_name: String,
    pub window_size: i32,
    pub window_unit: TimeUnit,
    pub cron: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_filter: Option<JsonValue>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl AnomalyFunction {
    /// Candidate keys override existing properties; other keys are kept.
    pub fn update_properties(&mut self, parameters: &CandidateParameters) {
        for (key, value) in parameters.iter() {
            self.properties.insert(key.to_string(), value.to_string());
        }
    }

    /// Copies the window, schedule and alerting fields of `other` onto `self`.
    pub fn restore_schedule_from(&mut self, other: &AnomalyFunction) {
        self.window_size = other.window_size;
        self.window_unit = other.window_unit;
        self.cron = other.cron.clone();
        self.alert_filter = other.alert_filter.clone();
    }
}

/// One trial configuration. Keys are kept sorted so the same set always
/// renders the same clone name and log label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateParameters(BTreeMap<String, String>);

impl CandidateParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// `clone_<k1>_<v1>_<k2>_<v2>...`
    pub fn clone_tag(&self) -> String {
        let mut tag = String::from(CLONE_NAME_TAG);
        for (key, value) in self.iter() {
            tag.push('_');
            tag.push_str(key);
            tag.push('_');
            tag.push_str(value);
        }
        tag
    }

    /// `{k1=v1, k2=v2}`; used in the autotune running log.
    pub fn label(&self) -> String {
        let pairs: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{{{}}}", pairs.join(", "))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CandidateParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for CandidateParameters {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// Half-open replay interval `[start_ms, end_ms)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl ReplayWindow {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn is_valid(&self) -> bool {
        self.start_ms <= self.end_ms
    }

    pub fn is_empty(&self) -> bool {
        self.start_ms >= self.end_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms.saturating_sub(self.start_ms).max(0)
    }

    pub fn contains(&self, start_ms: i64, end_ms: i64) -> bool {
        start_ms >= self.start_ms && end_ms <= self.end_ms
    }
}

impl fmt::Display for ReplayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_ms, self.end_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyFeedback {
    Anomaly,
    AnomalyNoAction,
    NotAnomaly,
}

impl AnomalyFeedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyFeedback::Anomaly => "anomaly",
            AnomalyFeedback::AnomalyNoAction => "anomaly_no_action",
            AnomalyFeedback::NotAnomaly => "not_anomaly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "anomaly" => Some(AnomalyFeedback::Anomaly),
            "anomaly_no_action" => Some(AnomalyFeedback::AnomalyNoAction),
            "not_anomaly" => Some(AnomalyFeedback::NotAnomaly),
            _ => None,
        }
    }

    pub fn is_true_anomaly(&self) -> bool {
        matches!(self, AnomalyFeedback::Anomaly | AnomalyFeedback::AnomalyNoAction)
    }
}

/// A merged anomaly produced by a detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub id: i64,
    pub function_id: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub score: f64,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<AnomalyFeedback>,
}

impl AnomalyResult {
    pub fn overlaps(&self, other: &AnomalyResult) -> bool {
        self.start_ms < other.end_ms && other.start_ms < self.end_ms
    }
}

/// The shared "best configuration" ledger of one tuning target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutotuneRecord {
    pub id: i64,
    pub function_id: i64,
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
    #[serde(default)]
    pub performance: BTreeMap<String, f64>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub avg_running_time_secs: i64,
    #[serde(default)]
    pub last_update_timestamp: i64,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceEvaluationMethod {
    #[default]
    AnomalyPercentage,
    Precision,
    Recall,
    F1Score,
}

impl PerformanceEvaluationMethod {
    /// Key under which the score is stored in `AutotuneRecord::performance`.
    pub fn metric_key(&self) -> &'static str {
        match self {
            PerformanceEvaluationMethod::AnomalyPercentage => "ANOMALY_PERCENTAGE",
            PerformanceEvaluationMethod::Precision => "PRECISION",
            PerformanceEvaluationMethod::Recall => "RECALL",
            PerformanceEvaluationMethod::F1Score => "F1_SCORE",
        }
    }
}

/// Behaviour switches of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOptions {
    /// Apply the accelerated window and weekly schedule to the clone.
    #[serde(default = "default_true")]
    pub speed_up: bool,
    #[serde(default = "default_true")]
    pub force_backfill: bool,
    /// Copy the target's historical anomalies into a newly created clone.
    #[serde(default = "default_true")]
    pub clone_anomaly: bool,
    /// Delete the clone and its results once the run finishes.
    #[serde(default = "default_true")]
    pub self_kill: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            speed_up: true,
            force_backfill: true,
            clone_anomaly: true,
            self_kill: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Flat job input accepted from callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayJobParams {
    pub tuning_function_id: i64,
    #[serde(default)]
    pub tuning_parameters: CandidateParameters,
    pub replay_start: i64,
    pub replay_end: i64,
    #[serde(default)]
    pub goal: f64,
    #[serde(default)]
    pub autotune_config_id: Option<i64>,
    #[serde(default)]
    pub performance_evaluation_method: PerformanceEvaluationMethod,
    #[serde(flatten)]
    pub options: ReplayOptions,
}

impl ReplayJobParams {
    pub fn into_run(self) -> ReplayRun {
        ReplayRun {
            tuning_function_id: self.tuning_function_id,
            parameters: self.tuning_parameters,
            window: ReplayWindow::new(self.replay_start, self.replay_end),
            goal: self.goal,
            autotune_config_id: self.autotune_config_id,
            method: self.performance_evaluation_method,
            options: self.options,
        }
    }
}

/// Everything one orchestrator invocation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRun {
    pub tuning_function_id: i64,
    pub parameters: CandidateParameters,
    pub window: ReplayWindow,
    pub goal: f64,
    pub autotune_config_id: Option<i64>,
    pub method: PerformanceEvaluationMethod,
    pub options: ReplayOptions,
}

impl ReplayRun {
    pub fn new(tuning_function_id: i64, parameters: CandidateParameters, window: ReplayWindow) -> Self {
        Self {
            tuning_function_id,
            parameters,
            window,
            goal: 0.0,
            autotune_config_id: None,
            method: PerformanceEvaluationMethod::default(),
            options: ReplayOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub tuning_function_id: i64,
    pub clone_id: i64,
    pub clone_name: String,
    pub window: ReplayWindow,
    pub pruned_results: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improved: Option<bool>,
    pub clone_removed: bool,
    pub duration_ms: u64,
}
