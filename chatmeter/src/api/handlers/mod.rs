//! HTTP request handlers.
//!
//! Handlers stay thin: extract the caller, call into [`crate::billing`], map the result.
//!
//! - [`chat`]: send a message, read the ledger
//! - [`account`]: balance, tier and subscription state
//! - [`billing`]: checkout and billing portal sessions
//! - [`webhooks`]: signed payment processor events
//! - [`access_codes`]: invitation code verification
//! - [`health`]: liveness and metrics

pub mod access_codes;
pub mod account;
pub mod billing;
pub mod chat;
pub mod health;
pub mod webhooks;
