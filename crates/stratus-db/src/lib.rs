//! Stratus Billing Database Layer
//!
//! This crate provides PostgreSQL database access for the billing control
//! plane. It includes:
//!
//! - Connection pool management with sqlx
//! - The per-customer advisory lock (the only way to mutate billing state)
//! - Repository implementations for the core billing entities
//! - Row-mapping helpers shared with the service layer

pub mod lock;
pub mod pool;
pub mod repositories;
pub mod rows;
pub mod usage_source;

pub use lock::{CustomerLock, LockedCustomer};
pub use pool::create_pool;
pub use repositories::*;
pub use usage_source::PgUsageSource;

// Re-export commonly used types
pub use sqlx::{PgConnection, PgPool, Postgres, Transaction};
pub use stratus_core::{AppError, AppResult};
