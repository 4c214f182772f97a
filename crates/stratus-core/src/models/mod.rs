//! Domain models for Stratus Billing
//!
//! This module contains all the core domain models used throughout the application.

pub mod billing_record;
pub mod credit;
pub mod customer;
pub mod escrow;
pub mod line_item;
pub mod payment;
pub mod service_instance;
pub mod tier;

pub use billing_record::{BillingRecord, BillingRecordType, BillingStatus};
pub use credit::CustomerCredit;
pub use customer::Customer;
pub use escrow::{cents_to_dollars, dollars_to_cents, EscrowOperation, EscrowTransaction};
pub use line_item::{InvoiceLineItem, LineItemKind};
pub use payment::{InvoicePayment, PaymentSource};
pub use service_instance::{ScheduledChange, ServiceInstance, ServiceState, ServiceType};
pub use tier::Tier;
