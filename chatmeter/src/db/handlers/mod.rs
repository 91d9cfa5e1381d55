//! PostgreSQL repositories.
//!
//! Each repository wraps a borrowed connection, usually a transaction opened by
//! [`PostgresStore`](crate::db::PostgresStore), so several repositories can take part in one
//! atomic unit:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let balance = Accounts::new(&mut tx).debit(account_id, 42).await?;
//! ChatTurns::new(&mut tx).insert_if_absent(&turn).await?;
//! tx.commit().await?;
//! ```

pub mod accounts;
pub mod chat_turns;
pub mod invitation_codes;
pub mod subscriptions;

pub use accounts::Accounts;
pub use chat_turns::ChatTurns;
pub use invitation_codes::InvitationCodes;
pub use subscriptions::{EnergyGrants, Subscriptions, WebhookEvents};
