//! Caller authentication.
//!
//! Callers present a bearer JWT issued by the identity provider. The token's subject is the
//! account id; the account is created on first sight.
//!
//! - [`identity`]: token verification
//! - [`current_account`]: axum extractors for [`identity::Identity`] and
//!   [`current_account::CurrentAccount`]
//!
//! A request without a bearer token is rejected with 401; a token that fails verification
//! with 403.
//!
//! ```ignore
//! async fn handler(CurrentAccount(account): CurrentAccount) -> Result<String> {
//!     Ok(format!("balance: {}", account.energy_balance))
//! }
//! ```

pub mod current_account;
pub mod identity;
