use crate::domain::errors::PipelineError;
use crate::domain::repositories::DurableStore;
use crate::domain::types::{AggregatedData, PairKey, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

const COMPONENT: &str = "durable_store";

fn unreachable(e: impl ToString) -> PipelineError {
    PipelineError::connectivity(COMPONENT, e)
}

/// Append-only history of closed windows
pub struct SqliteAggregateStore {
    pool: SqlitePool,
}

impl SqliteAggregateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_rows(rows: Vec<SqliteRow>) -> Result<Vec<AggregatedData>, PipelineError> {
        rows.iter().map(Self::map_row).collect()
    }

    fn map_row(row: &SqliteRow) -> Result<AggregatedData, PipelineError> {
        let ts_ms: i64 = row.try_get("timestamp").map_err(unreachable)?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(ts_ms)
            .ok_or_else(|| unreachable(format!("corrupt timestamp {}", ts_ms)))?;

        Ok(AggregatedData {
            pair_name: row.try_get("pair_name").map_err(unreachable)?,
            exchange: row.try_get("exchange").map_err(unreachable)?,
            timestamp,
            average_price: Self::decimal(row, "average_price")?,
            max_price: Self::decimal(row, "max_price")?,
            min_price: Self::decimal(row, "min_price")?,
        })
    }

    fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal, PipelineError> {
        let raw: String = row.try_get(column).map_err(unreachable)?;
        Decimal::from_str(&raw).map_err(|e| unreachable(format!("corrupt {}: {}", column, e)))
    }
}

#[async_trait]
impl DurableStore for SqliteAggregateStore {
    async fn append(&self, data: &AggregatedData) -> Result<bool, PipelineError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO aggregated_prices
                (exchange, pair_name, timestamp, average_price, max_price, min_price)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&data.exchange)
        .bind(&data.pair_name)
        .bind(data.timestamp.timestamp_millis())
        .bind(data.average_price.to_string())
        .bind(data.max_price.to_string())
        .bind(data.min_price.to_string())
        .execute(&self.pool)
        .await
        .map_err(unreachable)?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(
                "Aggregate {}:{} @ {} already stored",
                data.exchange, data.pair_name, data.timestamp
            );
        }
        Ok(inserted)
    }

    async fn query(
        &self,
        key: &PairKey,
        range: TimeRange,
    ) -> Result<Vec<AggregatedData>, PipelineError> {
        let rows = sqlx::query(
            "SELECT * FROM aggregated_prices WHERE exchange = ? AND pair_name = ? AND timestamp >= ? AND timestamp <= ? ORDER BY timestamp ASC",
        )
        .bind(&key.exchange)
        .bind(&key.pair)
        .bind(range.from.timestamp_millis())
        .bind(range.to.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(unreachable)?;

        Self::map_rows(rows)
    }

    async fn latest(&self, key: &PairKey) -> Result<Option<AggregatedData>, PipelineError> {
        let row = sqlx::query(
            "SELECT * FROM aggregated_prices WHERE exchange = ? AND pair_name = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(&key.exchange)
        .bind(&key.pair)
        .fetch_optional(&self.pool)
        .await
        .map_err(unreachable)?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn latest_per_key(&self) -> Result<Vec<AggregatedData>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT a.* FROM aggregated_prices a
            JOIN (
                SELECT exchange, pair_name, MAX(timestamp) AS latest_ts
                FROM aggregated_prices
                GROUP BY exchange, pair_name
            ) m
            ON a.exchange = m.exchange AND a.pair_name = m.pair_name AND a.timestamp = m.latest_ts
            ORDER BY a.exchange, a.pair_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unreachable)?;

        Self::map_rows(rows)
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unreachable)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
