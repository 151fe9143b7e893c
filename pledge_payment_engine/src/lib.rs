//! Pledge Payment Engine
//!
//! The pledge payment engine is the reliability core of the pledge payment gateway. It owns the mechanisms that keep
//! pledges and their asynchronous payment confirmations consistent under retries, duplicated webhooks and out-of-order
//! delivery:
//!
//! 1. A transactional outbox: a pledge and the event announcing it are written in one atomic transaction, and a
//!    separate relay is responsible for delivery ([`traits::PledgeGatewayDatabase`] plus the relay in the server
//!    crate).
//! 2. An idempotency gate ([`IdempotencyGate`]) that deduplicates externally retried webhook calls through a fast
//!    in-process tier backed by a durable store.
//! 3. A versioned payment state machine ([`mod@state_machine`] and
//!    [`traits::PledgeGatewayDatabase::apply_payment_event`]) that validates lifecycle transitions and keeps an
//!    append-only audit trail.
//! 4. A tiered totals read path ([`TotalsApi`]) serving campaign aggregates from a hot cache, a precomputed snapshot
//!    or the base tables, invalidated by payment completion events.
//!
//! The database layer follows the same split as the rest of the workspace: low-level SQLite access lives in the
//! private `sqlite` module as plain functions over a connection, and the public behaviour is defined by the traits
//! in [`mod@traits`] so that alternative backends can be slotted in.
pub mod cache;
pub mod db_types;
pub mod events;
pub mod idempotency;
pub mod ppe_api;
#[cfg(feature = "sqlite")]
mod sqlite;
pub mod state_machine;
pub mod traits;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

pub use idempotency::{derive_idempotency_key, IdempotencyGate};
pub use ppe_api::{pledge_flow_api::PledgeFlowApi, totals_api::TotalsApi};
pub use traits::{PaymentGatewayError, PledgeGatewayDatabase, TotalsReporting};
