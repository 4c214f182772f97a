//! Postgres-backed usage source
//!
//! Reads the request-stats rollup maintained by the ingestion subsystem.
//! Billing consumes nothing else from that subsystem: one count query with
//! an inclusive-start, exclusive-end window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stratus_core::models::ServiceType;
use stratus_core::traits::UsageSource;
use stratus_core::AppError;
use tracing::{debug, error, instrument};

/// Usage source backed by the `request_stats` rollup table
pub struct PgUsageSource {
    pool: PgPool,
}

impl PgUsageSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageSource for PgUsageSource {
    #[instrument(skip(self))]
    async fn get_billable_request_count(
        &self,
        customer_id: i64,
        service_type: ServiceType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let result: (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(billable_count), 0)
            FROM request_stats
            WHERE customer_id = $1
                AND service_type = $2
                AND bucket_start >= $3
                AND bucket_start < $4
            "#,
        )
        .bind(customer_id)
        .bind(service_type.as_i16())
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error counting billable requests: {}", e);
            AppError::Database(format!("Failed to count billable requests: {}", e))
        })?;

        debug!(
            customer_id,
            service = %service_type,
            count = result.0,
            "Fetched billable request count"
        );

        Ok(result.0)
    }
}
