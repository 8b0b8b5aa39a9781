//! Payment Engine (component I).
//!
//! Records incoming customer payments and outgoing vendor payments,
//! allocating a single payment across a customer's open invoices oldest
//! first (FIFO, ordered `created_at asc, id asc`). Every allocation writes
//! both an `invoice_payment_allocations` row and updates the target
//! invoice's cached `payment_amount`/`remaining_balance`/`status`.

use crate::errors::{EngineError, EngineResult};
use crate::ledger::LedgerEngine;
use crate::money::Money;
use crate::types::{CashFlowDirection, InvoiceStatus, LedgerEntryType, PaymentType};
use rusqlite::{params, Transaction};

pub struct PaymentEngine;

struct OpenInvoice {
    id: i64,
    remaining_balance: Money,
}

impl PaymentEngine {
    /// Records a payment against a specific invoice with no FIFO spread —
    /// the straightforward "pay this one bill" path.
    #[allow(clippy::too_many_arguments)]
    pub fn record_simple_payment(
        tx: &Transaction,
        customer_id: i64,
        invoice_id: i64,
        amount: Money,
        method: &str,
        channel_id: Option<i64>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        if amount <= Money::ZERO {
            return Err(EngineError::Validation("payment amount must be positive".to_string()));
        }

        let code = Self::next_payment_code(tx)?;
        tx.execute(
            "INSERT INTO payments (customer_id, invoice_id, amount, method, channel_id, date, time, payment_type, code) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                customer_id,
                invoice_id,
                amount.to_string(),
                method,
                channel_id,
                date,
                time,
                PaymentType::Incoming.as_str(),
                code,
            ],
        )?;
        let payment_id = tx.last_insert_rowid();

        Self::apply_allocation(tx, payment_id, invoice_id, amount, 1, date)?;

        LedgerEngine::append_customer_entry(
            tx,
            customer_id,
            LedgerEntryType::Credit,
            "payment",
            amount,
            Some("payment"),
            Some(payment_id),
            Some(&code),
            date,
            time,
        )?;

        LedgerEngine::append_cash_flow_entry(
            tx,
            date,
            time,
            CashFlowDirection::Incoming,
            "customer_payment",
            amount,
            method,
            channel_id,
            Some("payment"),
            Some(payment_id),
        )?;

        Ok(payment_id)
    }

    /// Records a payment and spreads it across the customer's open
    /// invoices oldest-first until the amount is exhausted or no open
    /// balance remains. Any leftover (payment exceeds total owed) is left
    /// unallocated and simply raises the customer's ledger credit — it
    /// becomes available as standing credit for a future sale.
    pub fn record_payment_with_fifo_allocation(
        tx: &Transaction,
        customer_id: i64,
        amount: Money,
        method: &str,
        channel_id: Option<i64>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        if amount <= Money::ZERO {
            return Err(EngineError::Validation("payment amount must be positive".to_string()));
        }

        let code = Self::next_payment_code(tx)?;
        tx.execute(
            "INSERT INTO payments (customer_id, invoice_id, amount, method, channel_id, date, time, payment_type, code) \
             VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                customer_id,
                amount.to_string(),
                method,
                channel_id,
                date,
                time,
                PaymentType::Incoming.as_str(),
                code,
            ],
        )?;
        let payment_id = tx.last_insert_rowid();

        let open_invoices = Self::open_invoices_for_customer(tx, customer_id)?;
        let mut remaining_payment = amount;
        let mut allocation_order = 1;
        for invoice in open_invoices {
            if remaining_payment.is_zero() {
                break;
            }
            let allocate = remaining_payment.min(invoice.remaining_balance);
            Self::apply_allocation(tx, payment_id, invoice.id, allocate, allocation_order, date)?;

            // Per-allocation child payment row, purely for per-invoice reporting —
            // the customer ledger only ever sees the one total credit below.
            let child_code = format!("{code}-{allocation_order}");
            tx.execute(
                "INSERT INTO payments (customer_id, invoice_id, amount, method, channel_id, date, time, payment_type, code) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    customer_id,
                    invoice.id,
                    allocate.to_string(),
                    method,
                    channel_id,
                    date,
                    time,
                    PaymentType::Incoming.as_str(),
                    child_code,
                ],
            )?;

            LedgerEngine::append_customer_entry(
                tx,
                customer_id,
                LedgerEntryType::Adjustment,
                "payment_allocation",
                Money::ZERO,
                Some("invoice"),
                Some(invoice.id),
                Some(&format!("Applied Rs {allocate} to invoice #{}", invoice.id)),
                date,
                time,
            )?;

            remaining_payment = remaining_payment.checked_sub(allocate)?;
            allocation_order += 1;
        }

        LedgerEngine::append_customer_entry(
            tx,
            customer_id,
            LedgerEntryType::Credit,
            "payment",
            amount,
            Some("payment"),
            Some(payment_id),
            Some(&code),
            date,
            time,
        )?;

        LedgerEngine::append_cash_flow_entry(
            tx,
            date,
            time,
            CashFlowDirection::Incoming,
            "customer_payment",
            amount,
            method,
            channel_id,
            Some("payment"),
            Some(payment_id),
        )?;

        Ok(payment_id)
    }

    /// Issues a cash refund to a customer (e.g. returning standing credit),
    /// recorded as an outgoing payment and a ledger debit.
    pub fn give_money_to_customer(
        tx: &Transaction,
        customer_id: i64,
        amount: Money,
        method: &str,
        channel_id: Option<i64>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        if amount <= Money::ZERO {
            return Err(EngineError::Validation("refund amount must be positive".to_string()));
        }

        let code = Self::next_payment_code(tx)?;
        tx.execute(
            "INSERT INTO payments (customer_id, invoice_id, amount, method, channel_id, date, time, payment_type, code) \
             VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                customer_id,
                amount.to_string(),
                method,
                channel_id,
                date,
                time,
                PaymentType::Outgoing.as_str(),
                code,
            ],
        )?;
        let payment_id = tx.last_insert_rowid();

        LedgerEngine::append_customer_entry(
            tx,
            customer_id,
            LedgerEntryType::Debit,
            "refund",
            amount,
            Some("payment"),
            Some(payment_id),
            Some(&code),
            date,
            time,
        )?;

        LedgerEngine::append_cash_flow_entry(
            tx,
            date,
            time,
            CashFlowDirection::Outgoing,
            "customer_refund",
            amount,
            method,
            channel_id,
            Some("payment"),
            Some(payment_id),
        )?;

        Ok(payment_id)
    }

    /// Records an outgoing payment to a vendor against stock received.
    pub fn record_vendor_payment(
        tx: &Transaction,
        vendor_id: i64,
        amount: Money,
        method: &str,
        channel_id: Option<i64>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        if amount <= Money::ZERO {
            return Err(EngineError::Validation("payment amount must be positive".to_string()));
        }

        let balance_before: Money = {
            let s: String = tx.query_row("SELECT balance FROM vendors WHERE id = ?1", params![vendor_id], |r| r.get(0))?;
            Money::parse(&s)?
        };
        let balance_after = balance_before.checked_sub(amount)?;
        tx.execute(
            "UPDATE vendors SET balance = ?1 WHERE id = ?2",
            params![balance_after.to_string(), vendor_id],
        )?;

        let code = Self::next_payment_code(tx)?;
        tx.execute(
            "INSERT INTO payments (customer_id, invoice_id, amount, method, channel_id, date, time, payment_type, code) \
             VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                vendor_id,
                amount.to_string(),
                method,
                channel_id,
                date,
                time,
                PaymentType::Outgoing.as_str(),
                code,
            ],
        )?;
        let payment_id = tx.last_insert_rowid();

        LedgerEngine::append_cash_flow_entry(
            tx,
            date,
            time,
            CashFlowDirection::Outgoing,
            "vendor_payment",
            amount,
            method,
            channel_id,
            Some("payment"),
            Some(payment_id),
        )?;

        Ok(payment_id)
    }

    /// Applies standing customer credit directly to a freshly-created
    /// invoice: records a `customer_credit`-method payment row against it,
    /// allocates it in full, and credits the customer ledger for the
    /// amount used. No daily-ledger entry — no cash actually moved.
    pub(crate) fn apply_credit_to_invoice(
        tx: &Transaction,
        customer_id: i64,
        invoice_id: i64,
        amount: Money,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        let code = Self::next_payment_code(tx)?;
        tx.execute(
            "INSERT INTO payments (customer_id, invoice_id, amount, method, channel_id, date, time, payment_type, code) \
             VALUES (?1, ?2, ?3, 'customer_credit', NULL, ?4, ?5, ?6, ?7)",
            params![
                customer_id,
                invoice_id,
                amount.to_string(),
                date,
                time,
                PaymentType::Incoming.as_str(),
                code,
            ],
        )?;
        let payment_id = tx.last_insert_rowid();

        Self::apply_allocation(tx, payment_id, invoice_id, amount, 1, date)?;

        LedgerEngine::append_customer_entry(
            tx,
            customer_id,
            LedgerEntryType::Credit,
            "credit_applied",
            amount,
            Some("payment"),
            Some(payment_id),
            Some(&code),
            date,
            time,
        )?;

        Ok(payment_id)
    }

    fn apply_allocation(
        tx: &Transaction,
        payment_id: i64,
        invoice_id: i64,
        amount: Money,
        allocation_order: i64,
        date: &str,
    ) -> EngineResult<()> {
        let (grand_total, payment_amount): (String, String) = tx.query_row(
            "SELECT grand_total, payment_amount FROM invoices WHERE id = ?1",
            params![invoice_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let grand_total = Money::parse(&grand_total)?;
        let previous_payment_amount = Money::parse(&payment_amount)?;
        let previous_balance = grand_total.checked_sub(previous_payment_amount)?.floor_zero();

        let new_payment_amount = previous_payment_amount.checked_add(amount)?;
        let new_balance = grand_total.checked_sub(new_payment_amount)?.floor_zero();
        let status = InvoiceStatus::derive(grand_total, new_payment_amount);

        tx.execute(
            "UPDATE invoices SET payment_amount = ?1, remaining_balance = ?2, status = ?3 WHERE id = ?4",
            params![new_payment_amount.to_string(), new_balance.to_string(), status.as_str(), invoice_id],
        )?;

        tx.execute(
            "INSERT INTO invoice_payment_allocations \
             (payment_id, invoice_id, allocated_amount, allocation_order, previous_balance, new_balance) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                payment_id,
                invoice_id,
                amount.to_string(),
                allocation_order,
                previous_balance.to_string(),
                new_balance.to_string(),
            ],
        )?;
        let _ = date;
        Ok(())
    }

    fn open_invoices_for_customer(tx: &Transaction, customer_id: i64) -> EngineResult<Vec<OpenInvoice>> {
        let mut stmt = tx.prepare(
            "SELECT id, remaining_balance FROM invoices \
             WHERE customer_id = ?1 AND status != 'paid' \
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![customer_id], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut invoices = Vec::new();
        for row in rows {
            let (id, remaining_balance) = row?;
            invoices.push(OpenInvoice {
                id,
                remaining_balance: Money::parse(&remaining_balance)?,
            });
        }
        Ok(invoices)
    }

    fn next_payment_code(tx: &Transaction) -> EngineResult<String> {
        let count: i64 = tx.query_row("SELECT COUNT(*) FROM payments", [], |r| r.get(0))?;
        Ok(format!("PAY-{:06}", count + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::invoice::{InvoiceEngine, NewInvoiceItem};
    use crate::money::{Quantity, UnitType};
    use crate::storage::{Storage, TxMode};

    async fn setup_with_two_invoices() -> Storage {
        let storage = Storage::open_in_memory(RetryConfig::default()).unwrap();
        storage
            .with_transaction(TxMode::Immediate, |tx| {
                tx.execute(
                    "INSERT INTO customers (id, name, balance, created_at) VALUES (1, 'Acme', '0.00', '2026-01-01')",
                    [],
                )?;
                InvoiceEngine::create_invoice(
                    tx,
                    1,
                    &[NewInvoiceItem {
                        product_id: None,
                        description: Some("First".to_string()),
                        unit: UnitType::Piece,
                        quantity: Quantity(1),
                        unit_price: Money::parse("100.00").unwrap(),
                        is_misc_item: true,
                        is_non_stock_item: true,
                        t_iron: None,
                    }],
                    None,
                    false,
                    "2026-01-01",
                    "09:00:00",
                )?;
                InvoiceEngine::create_invoice(
                    tx,
                    1,
                    &[NewInvoiceItem {
                        product_id: None,
                        description: Some("Second".to_string()),
                        unit: UnitType::Piece,
                        quantity: Quantity(1),
                        unit_price: Money::parse("150.00").unwrap(),
                        is_misc_item: true,
                        is_non_stock_item: true,
                        t_iron: None,
                    }],
                    None,
                    false,
                    "2026-01-02",
                    "09:00:00",
                )?;
                Ok(())
            })
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_fifo_allocation_pays_oldest_invoice_first() {
        let storage = setup_with_two_invoices().await;
        storage
            .with_transaction(TxMode::Immediate, |tx| {
                PaymentEngine::record_payment_with_fifo_allocation(
                    tx,
                    1,
                    Money::parse("120.00").unwrap(),
                    "cash",
                    None,
                    "2026-01-03",
                    "09:00:00",
                )?;

                let (status1, remaining1): (String, String) = tx.query_row(
                    "SELECT status, remaining_balance FROM invoices WHERE bill_number = '01'",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?;
                assert_eq!(status1, "paid");
                assert_eq!(remaining1, "0.00");

                let (status2, remaining2): (String, String) = tx.query_row(
                    "SELECT status, remaining_balance FROM invoices WHERE bill_number = '02'",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?;
                assert_eq!(status2, "partially_paid");
                assert_eq!(remaining2, "130.00");
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fifo_allocation_records_child_payments_and_adjustment_entries() {
        let storage = setup_with_two_invoices().await;
        storage
            .with_transaction(TxMode::Immediate, |tx| {
                let payment_id = PaymentEngine::record_payment_with_fifo_allocation(
                    tx,
                    1,
                    Money::parse("120.00").unwrap(),
                    "cash",
                    None,
                    "2026-01-03",
                    "09:00:00",
                )?;

                let child_count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM payments WHERE invoice_id IS NOT NULL AND code LIKE '%-%' AND id != ?1",
                    params![payment_id],
                    |r| r.get(0),
                )?;
                assert_eq!(child_count, 2);

                let adjustment_count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM customer_ledger_entries WHERE entry_type = 'adjustment'",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(adjustment_count, 2);

                let credit_count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM customer_ledger_entries WHERE entry_type = 'credit'",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(credit_count, 1);
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_amount_payment_rejected() {
        let storage = setup_with_two_invoices().await;
        let result = storage
            .with_transaction(TxMode::Immediate, |tx| {
                PaymentEngine::record_payment_with_fifo_allocation(
                    tx,
                    1,
                    Money::ZERO,
                    "cash",
                    None,
                    "2026-01-03",
                    "09:00:00",
                )
            })
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
