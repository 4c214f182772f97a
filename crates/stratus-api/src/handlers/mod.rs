//! HTTP request handlers

pub mod billing;
pub mod escrow;
pub mod payment_methods;
pub mod services;

pub use billing::configure as configure_billing;
pub use escrow::configure as configure_escrow;
pub use payment_methods::configure as configure_payment_methods;
pub use services::configure as configure_services;
