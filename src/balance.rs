//! Balance Manager (component E).
//!
//! Customer/vendor `balance` columns are a cache: the authoritative value
//! is always `SUM(credit) - SUM(debit)` over the append-only ledger. Reads
//! go through the cache; a mismatch between the cached column and the
//! recomputed sum is integrity drift, which is logged and self-healed
//! rather than surfaced as an error (spec §7).

use crate::cache::Cache;
use crate::errors::EngineResult;
use crate::money::Money;
use crate::storage::Storage;
use crate::types::GUEST_CUSTOMER_ID;
use rusqlite::OptionalExtension;
use std::time::Duration;

pub struct BalanceManager<'a> {
    storage: &'a Storage,
    cache: &'a Cache<Money>,
}

impl<'a> BalanceManager<'a> {
    pub fn new(storage: &'a Storage, cache: &'a Cache<Money>) -> Self {
        Self { storage, cache }
    }

    fn cache_key(customer_id: i64) -> String {
        format!("balance:customer:{customer_id}")
    }

    /// Returns the live ledger-derived balance for `customer_id`, serving
    /// from cache when fresh. The guest customer has no ledger and is
    /// always zero (I6).
    pub async fn get_current_balance(&self, customer_id: i64) -> EngineResult<Money> {
        if customer_id == GUEST_CUSTOMER_ID {
            return Ok(Money::ZERO);
        }

        let key = Self::cache_key(customer_id);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let computed = self.recompute(customer_id).await?;

        let cached_column: Option<String> = self
            .storage
            .with_read(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT balance FROM customers WHERE id = ?1",
                        rusqlite::params![customer_id],
                        |r| r.get(0),
                    )
                    .optional()?)
            })
            .await?;

        if let Some(cached_str) = cached_column {
            let cached_value = Money::parse(&cached_str)?;
            if cached_value != computed {
                tracing::warn!(
                    customer_id,
                    cached = %cached_value,
                    recomputed = %computed,
                    "customer balance drift detected, self-healing cached column"
                );
                self.persist_balance(customer_id, computed).await?;
            }
        }

        self.cache.put(key, computed).await;
        Ok(computed)
    }

    /// Recomputes a customer's balance directly from `customer_ledger_entries`,
    /// bypassing the cache. Debits increase what the customer owes; credits
    /// decrease it.
    pub async fn recompute(&self, customer_id: i64) -> EngineResult<Money> {
        let entries: Vec<(String, String)> = self
            .storage
            .with_read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT entry_type, amount FROM customer_ledger_entries WHERE customer_id = ?1",
                )?;
                let rows = stmt.query_map(rusqlite::params![customer_id], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        crate::ledger::fold_debit_credit(entries)
    }

    async fn persist_balance(&self, customer_id: i64, balance: Money) -> EngineResult<()> {
        let balance_str = balance.to_string();
        self.storage
            .with_read(move |conn| {
                conn.execute(
                    "UPDATE customers SET balance = ?1 WHERE id = ?2",
                    rusqlite::params![balance_str, customer_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Standing credit a customer could apply to a new sale right now:
    /// `max(0, -balance)`. A positive `balance` means the customer owes
    /// money, so there is nothing to apply. `exclude_invoice_id` lets a
    /// caller compute "balance before this invoice" when reapplying credit
    /// during an edit of the very invoice that is consuming it.
    pub async fn available_credit(&self, customer_id: i64, exclude_invoice_id: Option<i64>) -> EngineResult<Money> {
        let balance = match exclude_invoice_id {
            None => self.get_current_balance(customer_id).await?,
            Some(invoice_id) => self.balance_excluding_invoice(customer_id, invoice_id).await?,
        };
        Ok(balance.neg().floor_zero())
    }

    async fn balance_excluding_invoice(&self, customer_id: i64, invoice_id: i64) -> EngineResult<Money> {
        let balance = self.recompute(customer_id).await?;
        let invoice_debit: Option<String> = self
            .storage
            .with_read(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT amount FROM customer_ledger_entries \
                         WHERE customer_id = ?1 AND reference_type = 'invoice' AND reference_id = ?2 \
                           AND entry_type = 'debit'",
                        rusqlite::params![customer_id, invoice_id],
                        |r| r.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match invoice_debit {
            Some(amount_str) => balance.checked_sub(Money::parse(&amount_str)?),
            None => Ok(balance),
        }
    }

    /// Overwrites `customers.balance` with the live ledger SUM and refreshes
    /// the cache. Idempotent: calling it twice in a row with no intervening
    /// ledger writes leaves the balance unchanged.
    pub async fn reconcile(&self, customer_id: i64) -> EngineResult<Money> {
        if customer_id == GUEST_CUSTOMER_ID {
            return Ok(Money::ZERO);
        }
        let computed = self.recompute(customer_id).await?;
        self.persist_balance(customer_id, computed).await?;
        self.cache.put(Self::cache_key(customer_id), computed).await;
        Ok(computed)
    }

    pub async fn invalidate(&self, customer_id: i64) {
        self.cache.invalidate(&Self::cache_key(customer_id)).await;
    }
}

pub fn default_cache_ttl() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;

    async fn setup() -> Storage {
        Storage::open_in_memory(RetryConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_guest_balance_always_zero() {
        let storage = setup().await;
        let cache = Cache::new(10, Duration::from_secs(30));
        let mgr = BalanceManager::new(&storage, &cache);
        let balance = mgr.get_current_balance(GUEST_CUSTOMER_ID).await.unwrap();
        assert_eq!(balance, Money::ZERO);
    }

    #[tokio::test]
    async fn test_recompute_from_ledger_entries() {
        let storage = setup().await;
        storage
            .with_transaction(crate::storage::TxMode::Immediate, |tx| {
                tx.execute(
                    "INSERT INTO customers (name, balance, created_at) VALUES ('Acme', '0.00', '2026-01-01')",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO customer_ledger_entries \
                     (customer_id, entry_type, transaction_type, amount, balance_before, balance_after, date, time) \
                     VALUES (1, 'debit', 'invoice', '500.00', '0.00', '500.00', '2026-01-01', '10:00:00')",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO customer_ledger_entries \
                     (customer_id, entry_type, transaction_type, amount, balance_before, balance_after, date, time) \
                     VALUES (1, 'credit', 'payment', '200.00', '500.00', '300.00', '2026-01-01', '11:00:00')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let cache = Cache::new(10, Duration::from_secs(30));
        let mgr = BalanceManager::new(&storage, &cache);
        let balance = mgr.get_current_balance(1).await.unwrap();
        assert_eq!(balance, Money::parse("300.00").unwrap());
    }

    #[tokio::test]
    async fn test_available_credit_floors_at_zero_when_customer_owes() {
        let storage = setup().await;
        storage
            .with_transaction(crate::storage::TxMode::Immediate, |tx| {
                tx.execute(
                    "INSERT INTO customers (name, balance, created_at) VALUES ('Acme', '0.00', '2026-01-01')",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO customer_ledger_entries \
                     (customer_id, entry_type, transaction_type, amount, balance_before, balance_after, date, time) \
                     VALUES (1, 'debit', 'invoice', '900.00', '0.00', '900.00', '2026-01-01', '10:00:00')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let cache = Cache::new(10, Duration::from_secs(30));
        let mgr = BalanceManager::new(&storage, &cache);
        let available = mgr.available_credit(1, None).await.unwrap();
        assert_eq!(available, Money::ZERO);
    }

    #[tokio::test]
    async fn test_available_credit_reflects_standing_credit() {
        let storage = setup().await;
        storage
            .with_transaction(crate::storage::TxMode::Immediate, |tx| {
                tx.execute(
                    "INSERT INTO customers (name, balance, created_at) VALUES ('Acme', '0.00', '2026-01-01')",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO customer_ledger_entries \
                     (customer_id, entry_type, transaction_type, amount, balance_before, balance_after, date, time) \
                     VALUES (1, 'credit', 'payment', '300.00', '0.00', '-300.00', '2026-01-01', '10:00:00')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let cache = Cache::new(10, Duration::from_secs(30));
        let mgr = BalanceManager::new(&storage, &cache);
        let available = mgr.available_credit(1, None).await.unwrap();
        assert_eq!(available, Money::parse("300.00").unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let storage = setup().await;
        storage
            .with_transaction(crate::storage::TxMode::Immediate, |tx| {
                tx.execute(
                    "INSERT INTO customers (name, balance, created_at) VALUES ('Acme', '0.00', '2026-01-01')",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO customer_ledger_entries \
                     (customer_id, entry_type, transaction_type, amount, balance_before, balance_after, date, time) \
                     VALUES (1, 'debit', 'invoice', '400.00', '0.00', '400.00', '2026-01-01', '10:00:00')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let cache = Cache::new(10, Duration::from_secs(30));
        let mgr = BalanceManager::new(&storage, &cache);
        let first = mgr.reconcile(1).await.unwrap();
        let second = mgr.reconcile(1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Money::parse("400.00").unwrap());
    }
}
