use super::collaborators::{AnomalyStore, AutotuneStore, FunctionStore};
use super::types::{
    AnomalyFeedback, AnomalyFunction, AnomalyResult, AutotuneRecord, ReplayWindow, TimeUnit,
};
use crate::error::StoreError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::types::Json as SqlJson;
use sqlx::PgPool;
use std::collections::BTreeMap;

/// Postgres-backed function, autotune and anomaly store.
#[derive(Debug, Clone)]
pub struct PgReplayStore {
    db: PgPool,
}

impl PgReplayStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
struct AnomalyFunctionRow {
    id: i64,
    function_name: String,
    window_size: i32,
    window_unit: String,
    cron: String,
    is_active: bool,
    alert_filter: Option<SqlJson<JsonValue>>,
    properties: SqlJson<BTreeMap<String, String>>,
}

impl AnomalyFunctionRow {
    fn into_function(self) -> Result<AnomalyFunction> {
        let window_unit = TimeUnit::parse(&self.window_unit).ok_or_else(|| {
            anyhow!(
                "function {} has unknown window unit {}",
                self.id,
                self.window_unit
            )
        })?;
        Ok(AnomalyFunction {
            id: self.id,
            function_name: self.function_name,
            window_size: self.window_size,
            window_unit,
            cron: self.cron,
            active: self.is_active,
            alert_filter: self.alert_filter.map(|value| value.0),
            properties: self.properties.0,
        })
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
struct AutotuneConfigRow {
    id: i64,
    function_id: i64,
    configuration: SqlJson<BTreeMap<String, String>>,
    performance: SqlJson<BTreeMap<String, f64>>,
    message: String,
    avg_running_time: i64,
    last_update_timestamp: i64,
    version: i64,
}

impl From<AutotuneConfigRow> for AutotuneRecord {
    fn from(row: AutotuneConfigRow) -> Self {
        AutotuneRecord {
            id: row.id,
            function_id: row.function_id,
            configuration: row.configuration.0,
            performance: row.performance.0,
            message: row.message,
            avg_running_time_secs: row.avg_running_time,
            last_update_timestamp: row.last_update_timestamp,
            version: row.version,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone)]
struct MergedAnomalyRow {
    id: i64,
    function_id: i64,
    start_time: i64,
    end_time: i64,
    score: f64,
    weight: f64,
    feedback: Option<String>,
}

impl From<MergedAnomalyRow> for AnomalyResult {
    fn from(row: MergedAnomalyRow) -> Self {
        let feedback = row.feedback.as_deref().and_then(|raw| {
            let parsed = AnomalyFeedback::parse(raw);
            if parsed.is_none() {
                tracing::warn!(anomaly_id = row.id, feedback = %raw, "unknown anomaly feedback; ignoring");
            }
            parsed
        });
        AnomalyResult {
            id: row.id,
            function_id: row.function_id,
            start_ms: row.start_time,
            end_ms: row.end_time,
            score: row.score,
            weight: row.weight,
            feedback,
        }
    }
}

#[async_trait]
impl FunctionStore for PgReplayStore {
    async fn get_function(&self, id: i64) -> Result<Option<AnomalyFunction>> {
        let row: Option<AnomalyFunctionRow> = sqlx::query_as(
            r#"
            SELECT id, function_name, window_size, window_unit, cron, is_active, alert_filter, properties
            FROM anomaly_functions
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(AnomalyFunctionRow::into_function).transpose()
    }

    async fn find_function_by_name(&self, name: &str) -> Result<Option<AnomalyFunction>> {
        let row: Option<AnomalyFunctionRow> = sqlx::query_as(
            r#"
            SELECT id, function_name, window_size, window_unit, cron, is_active, alert_filter, properties
            FROM anomaly_functions
            WHERE function_name = $1
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await?;
        row.map(AnomalyFunctionRow::into_function).transpose()
    }

    async fn insert_function_with_history(
        &self,
        function: &AnomalyFunction,
        history_from: Option<i64>,
    ) -> Result<(i64, u64)> {
        let mut tx = self.db.begin().await?;
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO anomaly_functions (
                function_name, window_size, window_unit, cron, is_active, alert_filter, properties,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now())
            RETURNING id
            "#,
        )
        .bind(&function.function_name)
        .bind(function.window_size)
        .bind(function.window_unit.as_str())
        .bind(&function.cron)
        .bind(function.active)
        .bind(function.alert_filter.clone().map(SqlJson))
        .bind(SqlJson(&function.properties))
        .fetch_one(&mut *tx)
        .await?;
        let function_id = row.0;

        let mut copied = 0;
        if let Some(source_id) = history_from {
            let result = sqlx::query(
                r#"
                INSERT INTO merged_anomaly_results (
                    function_id, start_time, end_time, score, weight, feedback, created_at
                )
                SELECT $2, start_time, end_time, score, weight, feedback, now()
                FROM merged_anomaly_results
                WHERE function_id = $1
                "#,
            )
            .bind(source_id)
            .bind(function_id)
            .execute(&mut *tx)
            .await?;
            copied = result.rows_affected();
        }

        tx.commit().await?;
        Ok((function_id, copied))
    }

    async fn update_function(&self, function: &AnomalyFunction) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE anomaly_functions
            SET function_name = $2,
                window_size = $3,
                window_unit = $4,
                cron = $5,
                is_active = $6,
                alert_filter = $7,
                properties = $8,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(function.id)
        .bind(&function.function_name)
        .bind(function.window_size)
        .bind(function.window_unit.as_str())
        .bind(&function.cron)
        .bind(function.active)
        .bind(function.alert_filter.clone().map(SqlJson))
        .bind(SqlJson(&function.properties))
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("function {} not found", function.id);
        }
        Ok(())
    }

    async fn delete_function(&self, id: i64) -> Result<()> {
        // merged_anomaly_results cascades on function deletion.
        sqlx::query("DELETE FROM anomaly_functions WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AutotuneStore for PgReplayStore {
    async fn find_autotune(&self, id: i64) -> Result<Option<AutotuneRecord>> {
        let row: Option<AutotuneConfigRow> = sqlx::query_as(
            r#"
            SELECT
                id, function_id, configuration, performance, message,
                avg_running_time, last_update_timestamp, version
            FROM autotune_configs
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(AutotuneRecord::from))
    }

    async fn update_autotune(&self, record: &AutotuneRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE autotune_configs
            SET configuration = $3,
                performance = $4,
                message = $5,
                avg_running_time = $6,
                last_update_timestamp = $7,
                version = version + 1,
                updated_at = now()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(record.id)
        .bind(record.version)
        .bind(SqlJson(&record.configuration))
        .bind(SqlJson(&record.performance))
        .bind(&record.message)
        .bind(record.avg_running_time_secs)
        .bind(record.last_update_timestamp)
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM autotune_configs WHERE id = $1")
            .bind(record.id)
            .fetch_optional(&self.db)
            .await?;
        match exists {
            Some(_) => Err(StoreError::Conflict {
                id: record.id,
                expected_version: record.version,
            }),
            None => Err(StoreError::NotFound(record.id)),
        }
    }
}

#[async_trait]
impl AnomalyStore for PgReplayStore {
    async fn list_results(&self, function_id: i64, window: ReplayWindow) -> Result<Vec<AnomalyResult>> {
        let rows: Vec<MergedAnomalyRow> = sqlx::query_as(
            r#"
            SELECT id, function_id, start_time, end_time, score, weight, feedback
            FROM merged_anomaly_results
            WHERE function_id = $1
              AND start_time >= $2
              AND end_time <= $3
            ORDER BY start_time ASC, id ASC
            "#,
        )
        .bind(function_id)
        .bind(window.start_ms)
        .bind(window.end_ms)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(AnomalyResult::from).collect())
    }

    async fn delete_results_in_range(&self, function_id: i64, window: ReplayWindow) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM merged_anomaly_results
            WHERE function_id = $1
              AND start_time >= $2
              AND end_time <= $3
            "#,
        )
        .bind(function_id)
        .bind(window.start_ms)
        .bind(window.end_ms)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}
