mod acceleration;
mod clone;
mod collaborators;
mod compare;
mod engine;
mod orchestrator;
mod scoring;
mod store;
mod types;

pub use acceleration::{speed_up, ACCELERATED_CRON, ACCELERATED_WINDOW_SIZE, ACCELERATED_WINDOW_UNIT};
pub use clone::CloneManager;
pub use collaborators::{AnomalyStore, AutotuneStore, FunctionStore, ReplayEngine, Scorer};
pub use compare::{apply_trial, is_improvement, TrialOutcome};
pub use engine::HttpReplayEngine;
pub use orchestrator::{ReplayOrchestrator, DEFAULT_AUTOTUNE_MAX_ATTEMPTS};
pub use scoring::{anomaly_percentage, f1_score, precision, recall, StoredResultScorer};
pub use store::PgReplayStore;
pub use types::*;
