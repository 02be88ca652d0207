use anyhow::{Context, Result};
use autotune_replay::cli::Args;
use autotune_replay::config::Config;
use autotune_replay::db;
use autotune_replay::services::replay::{
    CandidateParameters, CloneManager, HttpReplayEngine, PerformanceEvaluationMethod,
    PgReplayStore, ReplayJobParams, ReplayOptions, ReplayOrchestrator, StoredResultScorer,
};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::Instrument;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,autotune_replay=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

fn params_template() -> ReplayJobParams {
    let mut tuning_parameters = CandidateParameters::new();
    tuning_parameters.insert("threshold", "3.0");
    ReplayJobParams {
        tuning_function_id: 42,
        tuning_parameters,
        replay_start: 1_483_228_800_000,
        replay_end: 1_485_820_800_000,
        goal: 0.05,
        autotune_config_id: Some(7),
        performance_evaluation_method: PerformanceEvaluationMethod::AnomalyPercentage,
        options: ReplayOptions::default(),
    }
}

async fn read_params(path: &Path) -> Result<ReplayJobParams> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("failed to read job parameters from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&raw).with_context(|| format!("invalid job parameters in {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing()?;

    if args.print_params_template {
        println!("{}", serde_json::to_string_pretty(&params_template())?);
        return Ok(());
    }
    let Some(params_path) = args.params.as_deref() else {
        anyhow::bail!("--params is required");
    };

    let config = Config::from_env()?;
    let pool = db::connect_lazy(&config.database_url, config.db_max_connections)?;
    let store = Arc::new(PgReplayStore::new(pool));
    let engine = Arc::new(HttpReplayEngine::new(&config.engine_url, config.engine_timeout)?);
    let scorer = Arc::new(StoredResultScorer::new(store.clone()));
    let clones = CloneManager::new(store.clone(), store.clone());
    let orchestrator = ReplayOrchestrator::new(store.clone(), store, clones, engine, scorer)
        .with_autotune_max_attempts(config.autotune_max_attempts);

    let run = read_params(params_path).await?.into_run();
    let span = tracing::info_span!(
        "autotune_replay",
        function_id = run.tuning_function_id,
        autotune_config_id = ?run.autotune_config_id,
        window = %run.window,
    );

    match orchestrator.execute(&run).instrument(span).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(err) => {
            tracing::error!(
                code = err.code(),
                stage = %err.stage(),
                clone_id = ?err.clone_id(),
                "autotune replay failed"
            );
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn template_round_trips_through_json() {
        let json = serde_json::to_string(&params_template()).unwrap();
        let parsed: ReplayJobParams = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, params_template());
    }

    #[tokio::test]
    async fn reads_params_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tuning_function_id": 42, "tuning_parameters": {{"threshold": "3.0"}},
                "replay_start": 0, "replay_end": 86400000, "self_kill": false}}"#
        )
        .unwrap();

        let run = read_params(file.path()).await.unwrap().into_run();
        assert_eq!(run.tuning_function_id, 42);
        assert_eq!(run.window.end_ms, 86_400_000);
        assert!(!run.options.self_kill);
        assert!(run.options.speed_up);
        assert_eq!(run.autotune_config_id, None);
    }

    #[tokio::test]
    async fn malformed_params_name_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"tuning_function_id\": \"forty-two\"}}").unwrap();
        let err = read_params(file.path()).await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid job parameters"));
    }
}
