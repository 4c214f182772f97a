//! API layer for Stratus Billing
//!
//! Thin actix-web surface over the billing engine. Every mutating handler
//! acquires the customer lock, runs exactly one business operation against
//! the locked session, and commits or rolls back before responding; nothing
//! below the handlers touches the lock.

pub mod context;
pub mod dto;
pub mod handlers;

pub use context::ApiContext;
pub use dto::{ApiResponse, PaginationParams};
pub use handlers::{
    configure_billing, configure_escrow, configure_payment_methods, configure_services,
};
