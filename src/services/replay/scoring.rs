use super::collaborators::{AnomalyStore, Scorer};
use super::types::{AnomalyResult, PerformanceEvaluationMethod, ReplayWindow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Scores a replay from the anomalies stored for the baseline and candidate functions.
///
/// Labels come from the baseline: its results carrying a positive feedback label
/// are the ground truth precision and recall are measured against.
#[derive(Clone)]
pub struct StoredResultScorer {
    anomalies: Arc<dyn AnomalyStore>,
}

impl StoredResultScorer {
    pub fn new(anomalies: Arc<dyn AnomalyStore>) -> Self {
        Self { anomalies }
    }

    async fn labels(&self, baseline_function_id: i64, window: ReplayWindow) -> Result<Vec<AnomalyResult>> {
        let results = self
            .anomalies
            .list_results(baseline_function_id, window)
            .await
            .with_context(|| format!("failed to load anomalies of baseline {baseline_function_id}"))?;
        Ok(results
            .into_iter()
            .filter(|r| r.feedback.map(|f| f.is_true_anomaly()).unwrap_or(false))
            .collect())
    }
}

#[async_trait]
impl Scorer for StoredResultScorer {
    async fn evaluate(
        &self,
        method: PerformanceEvaluationMethod,
        baseline_function_id: i64,
        candidate_function_id: i64,
        window: ReplayWindow,
    ) -> Result<f64> {
        let candidate = self
            .anomalies
            .list_results(candidate_function_id, window)
            .await
            .with_context(|| format!("failed to load anomalies of candidate {candidate_function_id}"))?;

        let value = match method {
            PerformanceEvaluationMethod::AnomalyPercentage => anomaly_percentage(&candidate, window),
            PerformanceEvaluationMethod::Precision => {
                precision(&candidate, &self.labels(baseline_function_id, window).await?)
            }
            PerformanceEvaluationMethod::Recall => {
                recall(&candidate, &self.labels(baseline_function_id, window).await?)
            }
            PerformanceEvaluationMethod::F1Score => {
                f1_score(&candidate, &self.labels(baseline_function_id, window).await?)
            }
        };
        Ok(value)
    }
}

/// Share of the window covered by at least one anomaly, in `[0, 1]`.
pub fn anomaly_percentage(results: &[AnomalyResult], window: ReplayWindow) -> f64 {
    let duration = window.duration_ms();
    if duration == 0 {
        return 0.0;
    }

    let mut spans: Vec<(i64, i64)> = results
        .iter()
        .map(|r| (r.start_ms.max(window.start_ms), r.end_ms.min(window.end_ms)))
        .filter(|(start, end)| end > start)
        .collect();
    spans.sort();

    let mut covered: i64 = 0;
    let mut current: Option<(i64, i64)> = None;
    for (start, end) in spans {
        match current {
            Some((cur_start, cur_end)) if start <= cur_end => {
                current = Some((cur_start, cur_end.max(end)));
            }
            Some((cur_start, cur_end)) => {
                covered += cur_end - cur_start;
                current = Some((start, end));
            }
            None => current = Some((start, end)),
        }
    }
    if let Some((cur_start, cur_end)) = current {
        covered += cur_end - cur_start;
    }

    covered as f64 / duration as f64
}

/// Fraction of candidate anomalies overlapping a labeled anomaly; 0 without candidates.
pub fn precision(candidate: &[AnomalyResult], labels: &[AnomalyResult]) -> f64 {
    if candidate.is_empty() {
        return 0.0;
    }
    let hits = candidate
        .iter()
        .filter(|c| labels.iter().any(|l| c.overlaps(l)))
        .count();
    hits as f64 / candidate.len() as f64
}

/// Fraction of labeled anomalies overlapped by a candidate anomaly; 0 without labels.
pub fn recall(candidate: &[AnomalyResult], labels: &[AnomalyResult]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let found = labels
        .iter()
        .filter(|l| candidate.iter().any(|c| c.overlaps(l)))
        .count();
    found as f64 / labels.len() as f64
}

pub fn f1_score(candidate: &[AnomalyResult], labels: &[AnomalyResult]) -> f64 {
    let p = precision(candidate, labels);
    let r = recall(candidate, labels);
    if p + r <= f64::EPSILON {
        return 0.0;
    }
    2.0 * p * r / (p + r)
}
