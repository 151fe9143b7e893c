//! The behaviour contracts for payment gateway backends.
//!
//! Backends (currently SQLite) implement these traits; everything above them — the flow API, the idempotency gate,
//! the totals tier, the relay — is written against the traits only.
mod pledge_gateway_database;
mod totals_reporting;

use thiserror::Error;

pub use pledge_gateway_database::PledgeGatewayDatabase;
pub use totals_reporting::TotalsReporting;

use crate::db_types::PledgeId;

#[derive(Debug, Error)]
pub enum PaymentGatewayError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Database migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Pledge {0} does not exist")]
    PledgeNotFound(PledgeId),
    #[error("Payment with reference {0} does not exist")]
    PaymentNotFound(String),
    #[error("A payment intent already exists for pledge {0}")]
    PaymentIntentAlreadyExists(PledgeId),
    #[error("Could not serialize event payload: {0}")]
    PayloadSerialization(#[from] serde_json::Error),
    #[error("Gave up waiting for the concurrent holder of idempotency key {0}")]
    IdempotencyContention(String),
}
