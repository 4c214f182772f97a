//! Business logic services for Stratus Billing
//!
//! This crate contains the billing engine proper: everything that computes
//! what a customer owes, decides how it gets paid, and keeps the billing
//! ledger consistent.
//!
//! # Architecture
//!
//! Services are free async functions over a `LockedCustomer` session: the
//! capability token proving the per-customer advisory lock is held. Only
//! the periodic job and the API layer acquire the lock; everything below
//! them takes the session, so reentrant acquisition is unrepresentable.
//! All writes inside one session commit atomically as one transaction.
//!
//! # Modules
//!
//! - `clock` - injectable time source (system and fixed test clocks)
//! - `period` - calendar-month billing-period math
//! - `credits` - credit ledger selection and application
//! - `usage` - metered-usage display sync and billing finalization
//! - `invoices` - DRAFT lifecycle and subscription-line upkeep
//! - `settlement` - credits-then-provider-chain invoice payment
//! - `tiers` - subscribe / upgrade / downgrade / cancel state machine
//! - `billing_job` - the per-customer periodic driver

pub mod billing_job;
pub mod clock;
pub mod credits;
pub mod escrow_ops;
pub mod invoices;
pub mod period;
pub mod settlement;
pub mod tiers;
pub mod usage;

pub use billing_job::{run_billing_batch, run_billing_for_customer, BillingJobDeps, BillingJobReport};
pub use clock::{FixedClock, SystemClock};
pub use credits::{grant_credit, plan_credit_application, AppliedCredit, CreditApplication};
pub use settlement::{process_invoice_payment, SettlementOutcome, SettlementResult, SourcePayment};

/// Business logic constants
pub mod constants {
    /// Default automatic retry attempts for a failed invoice
    pub const MAX_RETRY_ATTEMPTS: i32 = 3;

    /// Default spacing between automatic retries, in hours
    pub const RETRY_INTERVAL_HOURS: i64 = 24;

    /// Customers examined per periodic-job batch
    pub const JOB_BATCH_LIMIT: i64 = 500;

    /// Safety bound on catch-up cycles processed in one job invocation.
    /// A customer can only fall one month behind per elapsed month, so
    /// hitting this means clock or data corruption, not a real backlog.
    pub const MAX_CYCLES_PER_RUN: u32 = 24;
}
