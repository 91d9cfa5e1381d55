//! Mapping between accounts and payment processor customers.
//!
//! The link is stored twice: as a cached customer id on the account and as an `account_id` tag
//! in the customer's metadata. Either side can be lost or go stale; both lookups here repair the
//! other side when they succeed.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::db::{Store, models::accounts::AccountDBResponse};
use crate::errors::Result;
use crate::payment_providers::{Customer, PaymentProvider};
use crate::types::abbrev_id;

#[derive(Clone)]
pub struct CustomerLinkResolver {
    store: Arc<dyn Store>,
    provider: Arc<dyn PaymentProvider>,
}

impl CustomerLinkResolver {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self { store, provider }
    }

    /// Find or create the customer for an account.
    ///
    /// Tries the cached pointer, then an email search, then creates a new customer. Never adopts
    /// a customer tagged with a different account.
    #[instrument(skip_all, fields(account_id = %abbrev_id(&account.id)), err)]
    pub async fn resolve(&self, account: &AccountDBResponse) -> Result<String> {
        let customer = match self.cached_customer(account).await? {
            Some(customer) => customer,
            None => match self.customer_by_email(account).await? {
                Some(customer) => customer,
                None => {
                    let customer = self.provider.create_customer(&account.email, &account.id).await?;
                    info!("Created payment customer {} for account {}", customer.id, abbrev_id(&account.id));
                    customer
                }
            },
        };

        if customer.account_tag() != Some(account.id.as_str()) {
            self.provider.tag_customer(&customer.id, &account.id).await?;
        }
        if account.customer_id.as_deref() != Some(customer.id.as_str()) {
            self.store.set_customer_id(&account.id, &customer.id).await?;
        }
        Ok(customer.id)
    }

    /// Reverse lookup used by webhook processing when an event carries no account id
    #[instrument(skip(self), err)]
    pub async fn account_for_customer(&self, customer_id: &str) -> Result<Option<AccountDBResponse>> {
        if let Some(account) = self.store.find_account_by_customer(customer_id).await? {
            return Ok(Some(account));
        }

        let Some(customer) = self.provider.get_customer(customer_id).await? else {
            return Ok(None);
        };
        let Some(tag) = customer.account_tag() else {
            return Ok(None);
        };
        let Some(account) = self.store.get_account(tag).await? else {
            warn!("Customer {} is tagged with unknown account {}", customer_id, abbrev_id(tag));
            return Ok(None);
        };

        self.store.set_customer_id(&account.id, customer_id).await?;
        debug!("Repaired customer pointer for account {}", abbrev_id(&account.id));
        Ok(Some(AccountDBResponse {
            customer_id: Some(customer_id.to_string()),
            ..account
        }))
    }

    async fn cached_customer(&self, account: &AccountDBResponse) -> Result<Option<Customer>> {
        let Some(customer_id) = account.customer_id.as_deref() else {
            return Ok(None);
        };
        match self.provider.get_customer(customer_id).await? {
            Some(customer) if !customer.deleted && adoptable(&customer, &account.id) => Ok(Some(customer)),
            _ => {
                warn!(
                    "Cached customer {} for account {} is missing, deleted or foreign",
                    customer_id,
                    abbrev_id(&account.id)
                );
                Ok(None)
            }
        }
    }

    async fn customer_by_email(&self, account: &AccountDBResponse) -> Result<Option<Customer>> {
        let candidates: Vec<Customer> = self
            .provider
            .find_customers_by_email(&account.email)
            .await?
            .into_iter()
            .filter(|c| !c.deleted && adoptable(c, &account.id))
            .collect();

        let tagged = candidates.iter().position(|c| c.account_tag() == Some(account.id.as_str()));
        Ok(match tagged {
            Some(idx) => candidates.into_iter().nth(idx),
            None => candidates.into_iter().next(),
        })
    }
}

/// A customer is usable for an account if it is untagged or already tagged with that account
fn adoptable(customer: &Customer, account_id: &str) -> bool {
    customer.account_tag().is_none_or(|tag| tag == account_id)
}
