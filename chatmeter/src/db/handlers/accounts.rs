//! Repository for the `accounts` table.

use sqlx::PgConnection;

use crate::db::{
    errors::{DbError, Result},
    models::accounts::{AccountCreateDBRequest, AccountDBResponse},
};
use crate::types::Tier;

pub struct Accounts<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Accounts<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get(&mut self, account_id: &str) -> Result<Option<AccountDBResponse>> {
        let account = sqlx::query_as!(
            AccountDBResponse,
            r#"SELECT id, email, energy_balance, tier as "tier: Tier", customer_id, created_at FROM accounts WHERE id = $1"#,
            account_id
        )
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(account)
    }

    /// Fetch and row-lock an account for the rest of the transaction
    pub async fn lock(&mut self, account_id: &str) -> Result<Option<AccountDBResponse>> {
        let account = sqlx::query_as!(
            AccountDBResponse,
            r#"SELECT id, email, energy_balance, tier as "tier: Tier", customer_id, created_at FROM accounts WHERE id = $1 FOR UPDATE"#,
            account_id
        )
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(account)
    }

    pub async fn get_or_create(&mut self, request: &AccountCreateDBRequest) -> Result<AccountDBResponse> {
        let account = sqlx::query_as!(
            AccountDBResponse,
            r#"
            INSERT INTO accounts (id, email, energy_balance)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email
            RETURNING id, email, energy_balance, tier as "tier: Tier", customer_id, created_at
            "#,
            request.id,
            request.email,
            request.initial_balance
        )
        .fetch_one(&mut *self.db)
        .await?;
        Ok(account)
    }

    pub async fn find_by_customer(&mut self, customer_id: &str) -> Result<Option<AccountDBResponse>> {
        let account = sqlx::query_as!(
            AccountDBResponse,
            r#"
            SELECT id, email, energy_balance, tier as "tier: Tier", customer_id, created_at
            FROM accounts
            WHERE customer_id = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
            customer_id
        )
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(account)
    }

    pub async fn set_customer_id(&mut self, account_id: &str, customer_id: &str) -> Result<()> {
        let result = sqlx::query!("UPDATE accounts SET customer_id = $2 WHERE id = $1", account_id, customer_id)
            .execute(&mut *self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Conditionally debit the balance, returning the new balance.
    ///
    /// The update only matches while the live balance covers the debit, so the balance can
    /// never be driven below zero regardless of what was read earlier.
    pub async fn debit(&mut self, account_id: &str, amount: i64) -> Result<i64> {
        let balance_after = sqlx::query_scalar!(
            r#"
            UPDATE accounts
            SET energy_balance = energy_balance - $2
            WHERE id = $1 AND energy_balance >= $2
            RETURNING energy_balance as "energy_balance!"
            "#,
            account_id,
            amount
        )
        .fetch_optional(&mut *self.db)
        .await?;

        match balance_after {
            Some(balance) => Ok(balance),
            None => match self.get(account_id).await? {
                Some(account) => Err(DbError::BalanceWouldGoNegative {
                    balance: account.energy_balance,
                    debit: amount,
                }),
                None => Err(DbError::NotFound),
            },
        }
    }

    /// Set tier, optionally refresh the customer pointer and optionally zero the balance
    pub async fn apply_entitlement(&mut self, account_id: &str, tier: Tier, customer_id: Option<&str>, zero_balance: bool) -> Result<()> {
        let result = sqlx::query!(
            r#"
            UPDATE accounts
            SET tier = $2,
                customer_id = COALESCE($3, customer_id),
                energy_balance = CASE WHEN $4 THEN 0 ELSE energy_balance END
            WHERE id = $1
            "#,
            account_id,
            &tier as &Tier,
            customer_id,
            zero_balance
        )
        .execute(&mut *self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Add energy, returning the new balance
    pub async fn credit(&mut self, account_id: &str, amount: i64) -> Result<i64> {
        let balance = sqlx::query_scalar!(
            r#"UPDATE accounts SET energy_balance = energy_balance + $2 WHERE id = $1 RETURNING energy_balance as "energy_balance!""#,
            account_id,
            amount
        )
        .fetch_optional(&mut *self.db)
        .await?;
        balance.ok_or(DbError::NotFound)
    }
}
