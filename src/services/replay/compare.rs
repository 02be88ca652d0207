use super::types::{AutotuneRecord, CandidateParameters};

/// A trial beats the recorded one when nothing is recorded yet or it lands
/// strictly closer to `goal`. Distance is absolute, so the goal may be a
/// minimum or a maximum depending on the metric.
pub fn is_improvement(previous: Option<f64>, new: f64, goal: f64) -> bool {
    match previous {
        None => true,
        Some(previous) => (previous - goal).abs() > (new - goal).abs(),
    }
}

/// Outcome of folding one trial into an autotune record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialOutcome {
    pub improved: bool,
    pub performance: f64,
}

/// Folds a finished trial into `record`.
///
/// The champion fields (configuration, performance entry, running time, update
/// timestamp) change only on improvement. The running log gets a
/// `<parameters>:<score>` entry for every trial.
pub fn apply_trial(
    record: &mut AutotuneRecord,
    parameters: &CandidateParameters,
    metric_key: &str,
    performance: f64,
    goal: f64,
    elapsed_secs: i64,
    now_ms: i64,
) -> TrialOutcome {
    let previous = if record.performance.is_empty() {
        None
    } else {
        record.performance.get(metric_key).copied()
    };

    let improved = is_improvement(previous, performance, goal);
    if improved {
        record.configuration = parameters.as_map().clone();
        record.performance.insert(metric_key.to_string(), performance);
        record.avg_running_time_secs = elapsed_secs;
        record.last_update_timestamp = now_ms;
    }

    let entry = format!("{}:{:?}", parameters.label(), performance);
    if record.message.is_empty() {
        record.message = entry;
    } else {
        record.message = format!("{};{}", record.message, entry);
    }

    TrialOutcome {
        improved,
        performance,
    }
}
