//! PostgreSQL audit sink.

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{AuditError, AuditEvent, AuditSink, DatabaseError, TransactionStats};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Writes audit events into `transaction_logs`.
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, DatabaseError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub async fn with_defaults(database_url: &str) -> Result<Self, DatabaseError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    #[instrument(skip(self, event), fields(audit_id = %event.id, target = %event.target_system))]
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO transaction_logs (id, transaction_type, source_system, target_system,
                                          endpoint, request_payload, response_payload,
                                          status_code, duration_ms, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(&event.transaction_type)
        .bind(&event.source_system)
        .bind(&event.target_system)
        .bind(&event.endpoint)
        .bind(&event.request_payload)
        .bind(&event.response_payload)
        .bind(i32::from(event.status_code))
        .bind(i64::try_from(event.duration_ms).unwrap_or(i64::MAX))
        .bind(&event.error_message)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AuditError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stats(&self, hours: i64) -> Result<TransactionStats, AuditError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE transaction_type = 'internal') AS internal_count,
                COUNT(*) FILTER (WHERE transaction_type = 'external') AS external_count,
                COUNT(*) FILTER (WHERE status_code = 200) AS success_count,
                COALESCE(AVG(duration_ms), 0)::FLOAT8 AS avg_duration
            FROM transaction_logs
            WHERE created_at >= NOW() - make_interval(hours => $1::INT)
            "#,
        )
        .bind(hours)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        let total: i64 = row.try_get("total").map_err(DatabaseError::from)?;
        let success: i64 = row.try_get("success_count").map_err(DatabaseError::from)?;
        let avg: f64 = row.try_get("avg_duration").map_err(DatabaseError::from)?;

        Ok(TransactionStats {
            total_transactions: total,
            internal_count: row.try_get("internal_count").map_err(DatabaseError::from)?,
            external_count: row.try_get("external_count").map_err(DatabaseError::from)?,
            success_rate: success_rate(success, total),
            avg_duration_ms: (avg * 100.0).round() / 100.0,
        })
    }
}

/// Percentage of successful events, rounded to two decimals.
fn success_rate(success: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let rate = success as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}
