//! The metered-conversation billing engine.
//!
//! - [`conversation`]: prompt assembly and token counting
//! - [`pricing`]: worst-case and actual cost in USD and energy
//! - [`guard`]: admission before the model call
//! - [`recorder`]: atomic debit and ledger append
//! - [`chat`]: the request flow tying the above together
//! - [`subscriptions`]: processor events to tier and energy changes
//! - [`customers`]: account to processor customer mapping
//! - [`access`]: one-time invitation codes

pub mod access;
pub mod chat;
pub mod conversation;
pub mod customers;
pub mod guard;
pub mod pricing;
pub mod recorder;
pub mod subscriptions;
