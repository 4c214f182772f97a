//! Service instance repository

use sqlx::PgConnection;
use stratus_core::models::{ServiceInstance, ServiceType};
use stratus_core::{AppError, AppResult};
use tracing::{debug, error, instrument};

use crate::rows::{ServiceInstanceRow, SERVICE_COLUMNS};

/// Find one service instance
#[instrument(skip(conn))]
pub async fn find(
    conn: &mut PgConnection,
    customer_id: i64,
    service_type: ServiceType,
) -> AppResult<Option<ServiceInstance>> {
    debug!(
        "Finding service instance: customer={}, service={}",
        customer_id, service_type
    );

    let result = sqlx::query_as::<sqlx::Postgres, ServiceInstanceRow>(&format!(
        "SELECT {SERVICE_COLUMNS} FROM service_instances \
         WHERE customer_id = $1 AND service_type = $2"
    ))
    .bind(customer_id)
    .bind(service_type.as_i16())
    .fetch_optional(conn)
    .await
    .map_err(|e| {
        error!("Database error finding service instance: {}", e);
        AppError::Database(format!("Failed to find service instance: {}", e))
    })?;

    Ok(result.map(Into::into))
}

/// All service instances for a customer, in stable service order
#[instrument(skip(conn))]
pub async fn list_for_customer(
    conn: &mut PgConnection,
    customer_id: i64,
) -> AppResult<Vec<ServiceInstance>> {
    let rows = sqlx::query_as::<sqlx::Postgres, ServiceInstanceRow>(&format!(
        "SELECT {SERVICE_COLUMNS} FROM service_instances \
         WHERE customer_id = $1 ORDER BY service_type"
    ))
    .bind(customer_id)
    .fetch_all(conn)
    .await
    .map_err(|e| {
        error!("Database error listing service instances: {}", e);
        AppError::Database(format!("Failed to list service instances: {}", e))
    })?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Insert or fully update a service instance.
///
/// The engine mutates the domain model inside the locked session and
/// persists the whole row; `(customer_id, service_type)` is the key.
#[instrument(skip(conn, instance))]
pub async fn upsert(conn: &mut PgConnection, instance: &ServiceInstance) -> AppResult<()> {
    debug!(
        "Upserting service instance: customer={}, service={}, tier={}",
        instance.customer_id, instance.service_type, instance.tier
    );

    let (scheduled_change, scheduled_tier) = match instance.scheduled_change {
        Some(change) => (
            Some(change.kind_str()),
            change.target_tier().map(|t| t.to_string()),
        ),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO service_instances (
            customer_id, service_type, tier, state, scheduled_change,
            scheduled_tier, scheduled_effective_date, sub_pending_invoice_id,
            paid_once, last_billed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (customer_id, service_type) DO UPDATE
        SET tier = EXCLUDED.tier,
            state = EXCLUDED.state,
            scheduled_change = EXCLUDED.scheduled_change,
            scheduled_tier = EXCLUDED.scheduled_tier,
            scheduled_effective_date = EXCLUDED.scheduled_effective_date,
            sub_pending_invoice_id = EXCLUDED.sub_pending_invoice_id,
            paid_once = EXCLUDED.paid_once,
            last_billed_at = EXCLUDED.last_billed_at,
            updated_at = NOW()
        "#,
    )
    .bind(instance.customer_id)
    .bind(instance.service_type.as_i16())
    .bind(instance.tier.to_string())
    .bind(instance.state.to_string())
    .bind(scheduled_change)
    .bind(scheduled_tier)
    .bind(instance.scheduled_effective_date)
    .bind(instance.sub_pending_invoice_id)
    .bind(instance.paid_once)
    .bind(instance.last_billed_at)
    .execute(conn)
    .await
    .map_err(|e| {
        error!("Database error upserting service instance: {}", e);
        AppError::Database(format!("Failed to upsert service instance: {}", e))
    })?;

    Ok(())
}
