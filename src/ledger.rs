//! Ledger Engine (component F).
//!
//! Two append-only ledgers: the per-customer debit/credit/adjustment trail
//! that the balance manager sums, and a date+channel-keyed cash-flow
//! ledger for daily reporting. Every insert computes `balance_before`/
//! `balance_after` from the *current* live balance at insert time, not
//! from the previous row — concurrent writers racing to append still each
//! see a internally consistent snapshot because the insert happens inside
//! the same write transaction as the balance read.

use crate::errors::{EngineError, EngineResult};
use crate::money::Money;
use crate::types::{CashFlowDirection, GUEST_CUSTOMER_ID, LedgerEntryType};
use rusqlite::{params, Transaction};

pub struct LedgerEngine;

impl LedgerEngine {
    /// Appends a customer ledger entry inside an already-open write
    /// transaction. Returns the new balance. No-op for the guest customer,
    /// which carries no ledger and no credit standing (I6).
    pub fn append_customer_entry(
        tx: &Transaction,
        customer_id: i64,
        entry_type: LedgerEntryType,
        transaction_type: &str,
        amount: Money,
        reference_type: Option<&str>,
        reference_id: Option<i64>,
        reference_number: Option<&str>,
        date: &str,
        time: &str,
    ) -> EngineResult<Money> {
        if customer_id == GUEST_CUSTOMER_ID {
            return Ok(Money::ZERO);
        }
        if entry_type == LedgerEntryType::Adjustment && !amount.is_zero() {
            return Err(EngineError::BusinessRule(
                "adjustment ledger entries must carry a zero amount".to_string(),
            ));
        }

        let balance_before = Self::current_balance(tx, customer_id)?;
        let balance_after = match entry_type {
            LedgerEntryType::Debit => balance_before.checked_add(amount)?,
            LedgerEntryType::Credit => balance_before.checked_sub(amount)?,
            LedgerEntryType::Adjustment => balance_before,
        };

        tx.execute(
            "INSERT INTO customer_ledger_entries \
             (customer_id, entry_type, transaction_type, amount, balance_before, balance_after, \
              reference_type, reference_id, reference_number, date, time) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                customer_id,
                entry_type.as_str(),
                transaction_type,
                amount.to_string(),
                balance_before.to_string(),
                balance_after.to_string(),
                reference_type,
                reference_id,
                reference_number,
                date,
                time,
            ],
        )?;

        tx.execute(
            "UPDATE customers SET balance = ?1 WHERE id = ?2",
            params![balance_after.to_string(), customer_id],
        )?;

        Ok(balance_after)
    }

    pub(crate) fn current_balance(tx: &Transaction, customer_id: i64) -> EngineResult<Money> {
        let mut stmt =
            tx.prepare("SELECT entry_type, amount FROM customer_ledger_entries WHERE customer_id = ?1")?;
        let rows = stmt.query_map(params![customer_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        fold_debit_credit(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Same `max(0, -balance)` rule as `BalanceManager::available_credit`,
    /// usable from inside an already-open write transaction (e.g. while
    /// creating an invoice) where going back through the async cache layer
    /// isn't an option.
    pub fn available_credit_in_tx(tx: &Transaction, customer_id: i64) -> EngineResult<Money> {
        if customer_id == GUEST_CUSTOMER_ID {
            return Ok(Money::ZERO);
        }
        Ok(Self::current_balance(tx, customer_id)?.neg().floor_zero())
    }

    /// Reassigns a deleted customer's historical ledger entries to the
    /// guest customer and prefixes their display name, per the soft-delete
    /// rule: history must survive, the party need not.
    pub fn reparent_to_guest_on_delete(tx: &Transaction, customer_id: i64, customer_name: &str) -> EngineResult<()> {
        tx.execute(
            "UPDATE customers SET name = ?1, is_deleted = 1 WHERE id = ?2",
            params![format!("[DELETED] {customer_name}"), customer_id],
        )?;
        Ok(())
    }

    /// Appends a daily cash-flow ledger entry, independent of the customer
    /// ledger. Used for both customer-facing cash receipts and vendor
    /// payments, keyed by date and payment channel for reporting.
    #[allow(clippy::too_many_arguments)]
    pub fn append_cash_flow_entry(
        tx: &Transaction,
        date: &str,
        time: &str,
        direction: CashFlowDirection,
        category: &str,
        amount: Money,
        payment_method: &str,
        payment_channel_id: Option<i64>,
        reference_type: Option<&str>,
        reference_id: Option<i64>,
    ) -> EngineResult<i64> {
        tx.execute(
            "INSERT INTO daily_ledger_entries \
             (date, time, direction, category, amount, payment_method, payment_channel_id, \
              reference_type, reference_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                date,
                time,
                direction.as_str(),
                category,
                amount.to_string(),
                payment_method,
                payment_channel_id,
                reference_type,
                reference_id,
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }
}

/// Folds `(entry_type, amount)` rows from `customer_ledger_entries` into a
/// balance: debits add, credits subtract, anything else (adjustments) is
/// left untouched. Shared by `LedgerEngine::current_balance` (inside an
/// open write transaction) and `BalanceManager::recompute` (async, over a
/// read-only connection) so the two never drift apart on how a balance is
/// derived from the same table.
pub(crate) fn fold_debit_credit(entries: Vec<(String, String)>) -> EngineResult<Money> {
    let mut balance = Money::ZERO;
    for (entry_type, amount) in entries {
        let amount = Money::parse(&amount)?;
        balance = match entry_type.as_str() {
            "debit" => balance.checked_add(amount)?,
            "credit" => balance.checked_sub(amount)?,
            _ => balance,
        };
    }
    Ok(balance)
}
