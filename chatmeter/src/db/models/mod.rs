//! Store record models.
//!
//! These structs correspond to rows of the PostgreSQL schema in `migrations/` and are shared by
//! both store implementations. `*DBRequest` types are written, `*DBResponse` types are read back.
//!
//! - [`accounts`]: balance, tier and the cached payment customer pointer
//! - [`chat_turns`]: the append-only conversation ledger and usage commits
//! - [`subscriptions`]: the subscription mirror, webhook event bookkeeping and energy grants
//! - [`invitation_codes`]: one-time access codes

pub mod accounts;
pub mod chat_turns;
pub mod invitation_codes;
pub mod subscriptions;
