//! The public API of the pledge payment engine.
//!
//! Each API struct wraps a backend implementing the relevant trait from [`crate::traits`] and carries the domain
//! flow on top of it: intake and webhook processing in [`pledge_flow_api`], the tiered totals read path in
//! [`totals_api`].
pub mod pledge_flow_api;
pub mod totals_api;
