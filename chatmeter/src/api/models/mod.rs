//! API request and response data models.
//!
//! API models are distinct from database models so the wire format can evolve independently
//! of storage. JSON field names are camelCase. All models carry `utoipa` schemas.
//!
//! - [`chat`]: chat requests, replies and ledger entries
//! - [`account`]: balance, tier and subscription mirror
//! - [`billing`]: checkout, portal and webhook acknowledgement
//! - [`access_codes`]: invitation code verification

pub mod access_codes;
pub mod account;
pub mod billing;
pub mod chat;
