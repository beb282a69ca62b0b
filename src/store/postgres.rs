//! Postgres-backed store
//!
//! Key columns are stored natively for filtering; full records are kept as
//! serialized JSON payloads.

use super::PredictiveStore;
use crate::error::PipelineError;
use crate::models::{
    Explanation, ExplanationMethod, Forecast, HistoricalDataPoint, MortgageSnapshot, PipelineRunSummary,
    ScenarioSimulationResult, Series, WatchlistItem,
};
use crate::Result;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS historical_data_points (
      series TEXT NOT NULL,
      region TEXT NOT NULL,
      date DATE NOT NULL,
      value DOUBLE PRECISION NOT NULL,
      PRIMARY KEY (series, region, date)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS forecasts (
      id UUID PRIMARY KEY,
      generation_id UUID NOT NULL,
      series TEXT NOT NULL,
      region TEXT NOT NULL,
      user_id UUID,
      target_date DATE NOT NULL,
      payload TEXT NOT NULL
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_forecasts_scope
    ON forecasts (series, region, user_id, target_date);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mortgage_snapshots (
      user_id UUID PRIMARY KEY,
      active BOOLEAN NOT NULL,
      payload TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS watchlist_items (
      id UUID PRIMARY KEY,
      user_id UUID NOT NULL,
      created_at TIMESTAMPTZ NOT NULL,
      payload TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS simulation_results (
      simulation_id UUID PRIMARY KEY,
      user_id UUID NOT NULL,
      payload TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS explanations (
      id UUID PRIMARY KEY,
      forecast_id UUID NOT NULL,
      method TEXT NOT NULL,
      payload TEXT NOT NULL,
      UNIQUE (forecast_id, method)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pipeline_runs (
      run_id UUID PRIMARY KEY,
      run_at TIMESTAMPTZ NOT NULL,
      payload TEXT NOT NULL
    );
    "#,
];

pub struct PgStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgStore {
    /// Create a lazily-connected store; the schema is created on first use
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                PipelineError::PersistenceFailure(format!("Failed to create postgres pool: {}", e))
            })?;

        info!("Predictive store backend: postgres");

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                for statement in SCHEMA {
                    sqlx::query(statement).execute(&self.pool).await?;
                }
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                PipelineError::PersistenceFailure(format!(
                    "Failed to initialize predictive schema: {}",
                    e
                ))
            })?;
        Ok(())
    }
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> PipelineError {
    move |e| PipelineError::PersistenceFailure(format!("{}: {}", context, e))
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(row: &sqlx::postgres::PgRow) -> Result<T> {
    let payload: String = row
        .try_get("payload")
        .map_err(db_error("Failed to read payload column"))?;
    Ok(serde_json::from_str(&payload)?)
}

#[async_trait::async_trait]
impl PredictiveStore for PgStore {
    async fn upsert_historical(&self, points: &[HistoricalDataPoint]) -> Result<usize> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin historical upsert"))?;

        for point in points {
            sqlx::query(
                r#"
                INSERT INTO historical_data_points (series, region, date, value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (series, region, date) DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(point.series.as_str())
            .bind(&point.region)
            .bind(point.date)
            .bind(point.value)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to upsert historical point"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit historical upsert"))?;

        Ok(points.len())
    }

    async fn historical_range(
        &self,
        series: Series,
        region: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoricalDataPoint>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT date, value FROM historical_data_points
            WHERE series = $1 AND region = $2 AND date BETWEEN $3 AND $4
            ORDER BY date ASC
            "#,
        )
        .bind(series.as_str())
        .bind(region)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load historical data"))?;

        rows.iter()
            .map(|row| {
                Ok(HistoricalDataPoint {
                    series,
                    region: region.to_string(),
                    date: row.try_get("date").map_err(db_error("Invalid date column"))?,
                    value: row.try_get("value").map_err(db_error("Invalid value column"))?,
                })
            })
            .collect()
    }

    async fn insert_forecasts(&self, forecasts: &[Forecast]) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin forecast insert"))?;

        for forecast in forecasts {
            sqlx::query(
                r#"
                INSERT INTO forecasts (id, generation_id, series, region, user_id, target_date, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(forecast.id)
            .bind(forecast.generation_id)
            .bind(forecast.series.as_str())
            .bind(&forecast.region)
            .bind(forecast.user_id)
            .bind(forecast.target_date)
            .bind(encode(forecast)?)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to insert forecast"))?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit forecast insert"))?;
        Ok(())
    }

    async fn forecasts_for(
        &self,
        series: Series,
        region: &str,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Forecast>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT payload FROM forecasts
            WHERE series = $1 AND region = $2 AND user_id IS NOT DISTINCT FROM $3
            ORDER BY target_date ASC
            "#,
        )
        .bind(series.as_str())
        .bind(region)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load forecasts"))?;

        rows.iter().map(decode).collect()
    }

    async fn load_forecast(&self, id: Uuid) -> Result<Option<Forecast>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT payload FROM forecasts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load forecast"))?;

        row.as_ref().map(decode).transpose()
    }

    async fn upsert_mortgage(&self, snapshot: &MortgageSnapshot) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO mortgage_snapshots (user_id, active, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET active = EXCLUDED.active, payload = EXCLUDED.payload
            "#,
        )
        .bind(snapshot.user_id)
        .bind(snapshot.active)
        .bind(encode(snapshot)?)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to upsert mortgage snapshot"))?;
        Ok(())
    }

    async fn load_mortgage(&self, user_id: Uuid) -> Result<Option<MortgageSnapshot>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT payload FROM mortgage_snapshots WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load mortgage snapshot"))?;

        row.as_ref().map(decode).transpose()
    }

    async fn active_mortgages(&self) -> Result<Vec<MortgageSnapshot>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT payload FROM mortgage_snapshots WHERE active = TRUE ORDER BY user_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load active mortgages"))?;

        rows.iter().map(decode).collect()
    }

    async fn insert_watchlist_item(&self, item: &WatchlistItem) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO watchlist_items (id, user_id, created_at, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(item.id)
        .bind(item.user_id)
        .bind(item.created_at)
        .bind(encode(item)?)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to insert watchlist item"))?;
        Ok(())
    }

    async fn update_watchlist_item(&self, item: &WatchlistItem) -> Result<()> {
        self.ensure_schema().await?;

        let result = sqlx::query("UPDATE watchlist_items SET payload = $2 WHERE id = $1")
            .bind(item.id)
            .bind(encode(item)?)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to update watchlist item"))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(format!("watchlist item {}", item.id)));
        }
        Ok(())
    }

    async fn load_watchlist_item(&self, id: Uuid) -> Result<Option<WatchlistItem>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT payload FROM watchlist_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load watchlist item"))?;

        row.as_ref().map(decode).transpose()
    }

    async fn watchlist_for_user(&self, user_id: Uuid) -> Result<Vec<WatchlistItem>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT payload FROM watchlist_items WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load watchlist"))?;

        rows.iter().map(decode).collect()
    }

    async fn insert_simulation(&self, result: &ScenarioSimulationResult) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            "INSERT INTO simulation_results (simulation_id, user_id, payload) VALUES ($1, $2, $3)",
        )
        .bind(result.simulation_id)
        .bind(result.user_id)
        .bind(encode(result)?)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to insert simulation result"))?;
        Ok(())
    }

    async fn load_simulation(&self, id: Uuid) -> Result<Option<ScenarioSimulationResult>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT payload FROM simulation_results WHERE simulation_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load simulation result"))?;

        row.as_ref().map(decode).transpose()
    }

    async fn insert_explanation(&self, explanation: &Explanation) -> Result<Explanation> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO explanations (id, forecast_id, method, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (forecast_id, method) DO NOTHING
            "#,
        )
        .bind(explanation.id)
        .bind(explanation.forecast_id)
        .bind(explanation.explanation_type.as_str())
        .bind(encode(explanation)?)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to insert explanation"))?;

        self.find_explanation(explanation.forecast_id, explanation.explanation_type)
            .await?
            .ok_or_else(|| {
                PipelineError::PersistenceFailure(format!(
                    "explanation for forecast {} missing after insert",
                    explanation.forecast_id
                ))
            })
    }

    async fn load_explanation(&self, id: Uuid) -> Result<Option<Explanation>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT payload FROM explanations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load explanation"))?;

        row.as_ref().map(decode).transpose()
    }

    async fn find_explanation(
        &self,
        forecast_id: Uuid,
        method: ExplanationMethod,
    ) -> Result<Option<Explanation>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT payload FROM explanations WHERE forecast_id = $1 AND method = $2")
            .bind(forecast_id)
            .bind(method.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find explanation"))?;

        row.as_ref().map(decode).transpose()
    }

    async fn insert_run_summary(&self, summary: &PipelineRunSummary) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("INSERT INTO pipeline_runs (run_id, run_at, payload) VALUES ($1, $2, $3)")
            .bind(summary.run_id)
            .bind(summary.timestamp)
            .bind(encode(summary)?)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to insert pipeline run"))?;
        Ok(())
    }

    async fn latest_run_summary(&self) -> Result<Option<PipelineRunSummary>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT payload FROM pipeline_runs ORDER BY run_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load latest pipeline run"))?;

        row.as_ref().map(decode).transpose()
    }
}
