//! Stratus Billing Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the Stratus billing control plane. It includes:
//!
//! - Domain models (Customer, ServiceInstance, BillingRecord, etc.)
//! - Common traits for clocks, usage sources, and payment backends
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
