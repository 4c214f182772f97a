//! Repository functions for the core billing tables
//!
//! All functions take a `&mut PgConnection` so they run equally inside a
//! locked billing session (`LockedCustomer::conn`) or on a connection
//! acquired from the pool for read paths. Billing-state writes MUST only be
//! reached through a lock session; the service layer enforces this by
//! requiring the `LockedCustomer` capability.

pub mod credit_repo;
pub mod customer_repo;
pub mod escrow_repo;
pub mod invoice_repo;
pub mod service_repo;
