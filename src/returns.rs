//! Returns Engine (component J).
//!
//! A return always references the original invoice items being returned.
//! Reducing `grand_total` by the settlement amount means the invoice's
//! own debit entry (posted in full at creation) is now overstated by that
//! amount, so every return posts a customer-ledger credit regardless of
//! `settlement_type` — that credit is what corrects the debt. `cash`
//! settlement additionally hands the money back immediately, recorded as
//! a daily-ledger outgoing entry; `ledger` settlement leaves the credit
//! as standing balance. Either way the returned quantity goes back into
//! stock for stock-tracked products. Returns against a partially-paid
//! invoice are refused outright — there is no override flag, because a
//! partial payment means the remaining balance already reflects
//! outstanding items and letting a return proceed would desynchronize
//! `remaining_balance` from what was actually delivered.

use crate::errors::{EngineError, EngineResult};
use crate::ledger::LedgerEngine;
use crate::money::{Money, Quantity, UnitType};
use crate::stock::StockEngine;
use crate::types::{CashFlowDirection, InvoiceStatus, LedgerEntryType, SettlementType, StockMovementType};
use rusqlite::{params, OptionalExtension, Transaction};

pub struct ReturnLine {
    pub invoice_item_id: i64,
    pub product_id: Option<i64>,
    pub unit: UnitType,
    pub quantity: Quantity,
    pub unit_price: Money,
}

pub struct ReturnsEngine;

impl ReturnsEngine {
    /// Processes a return against `original_invoice_id`. Refuses if the
    /// invoice is `partially_paid` (see module docs); `pending` and `paid`
    /// invoices may both be returned against.
    pub fn process_return(
        tx: &Transaction,
        original_invoice_id: i64,
        lines: &[ReturnLine],
        settlement_type: SettlementType,
        method: &str,
        channel_id: Option<i64>,
        allow_negative_stock: bool,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        if lines.is_empty() {
            return Err(EngineError::Validation("return must have at least one line".to_string()));
        }

        let invoice: Option<(i64, String, String, String)> = tx
            .query_row(
                "SELECT customer_id, status, grand_total, payment_amount FROM invoices WHERE id = ?1",
                params![original_invoice_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let Some((customer_id, status, grand_total_str, payment_amount_str)) = invoice else {
            return Err(EngineError::NotFound(format!("invoice {original_invoice_id}")));
        };
        if status == "partially_paid" {
            return Err(EngineError::BusinessRule(
                "cannot process a return against a partially-paid invoice".to_string(),
            ));
        }
        if status != "paid" && settlement_type == SettlementType::Cash {
            return Err(EngineError::BusinessRule(
                "an unpaid invoice can only be settled as a ledger credit, not a cash refund".to_string(),
            ));
        }

        for line in lines {
            let original_quantity: i64 = tx.query_row(
                "SELECT quantity FROM invoice_items WHERE id = ?1",
                params![line.invoice_item_id],
                |r| r.get(0),
            )?;
            let already_returned: i64 = tx.query_row(
                "SELECT COALESCE(SUM(quantity), 0) FROM return_items WHERE invoice_item_id = ?1",
                params![line.invoice_item_id],
                |r| r.get(0),
            )?;
            if already_returned + line.quantity.abs().0 > original_quantity {
                return Err(EngineError::BusinessRule(format!(
                    "return quantity for invoice item {} exceeds what remains returnable",
                    line.invoice_item_id
                )));
            }
        }

        let mut settlement_amount = Money::ZERO;
        for line in lines {
            settlement_amount = settlement_amount.checked_add(line.amount()?)?;
        }

        let return_number = Self::next_return_number(date, time, tx)?;
        tx.execute(
            "INSERT INTO returns (return_number, original_invoice_id, settlement_type, settlement_amount, date, time) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                return_number,
                original_invoice_id,
                Self::settlement_type_str(settlement_type),
                settlement_amount.to_string(),
                date,
                time,
            ],
        )?;
        let return_id = tx.last_insert_rowid();

        for line in lines {
            tx.execute(
                "INSERT INTO return_items (return_id, invoice_item_id, product_id, quantity, unit_price, amount) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    return_id,
                    line.invoice_item_id,
                    line.product_id,
                    line.quantity.0,
                    line.unit_price.to_string(),
                    line.amount()?.to_string(),
                ],
            )?;

            if let Some(product_id) = line.product_id {
                StockEngine::adjust_stock(
                    tx,
                    product_id,
                    line.quantity.abs(),
                    StockMovementType::In,
                    allow_negative_stock,
                    Some("return"),
                    Some(return_id),
                    Some(&return_number),
                    date,
                    time,
                )?;
            }
        }

        // The invoice's own debit was posted for the full original grand_total;
        // shrinking it by the settlement amount always needs an offsetting
        // credit, however the money itself changes hands.
        LedgerEngine::append_customer_entry(
            tx,
            customer_id,
            LedgerEntryType::Credit,
            "return",
            settlement_amount,
            Some("return"),
            Some(return_id),
            Some(&return_number),
            date,
            time,
        )?;

        if settlement_type == SettlementType::Cash {
            LedgerEngine::append_cash_flow_entry(
                tx,
                date,
                time,
                CashFlowDirection::Outgoing,
                "return_cash_settlement",
                settlement_amount,
                method,
                channel_id,
                Some("return"),
                Some(return_id),
            )?;
        }

        let grand_total = Money::parse(&grand_total_str)?;
        let payment_amount = Money::parse(&payment_amount_str)?;
        let new_grand_total = grand_total.checked_sub(settlement_amount)?.floor_zero();
        let new_remaining = new_grand_total.checked_sub(payment_amount)?.floor_zero();
        let new_status = InvoiceStatus::derive(new_grand_total, payment_amount);
        tx.execute(
            "UPDATE invoices SET grand_total = ?1, remaining_balance = ?2, status = ?3, version = version + 1 \
             WHERE id = ?4",
            params![
                new_grand_total.to_string(),
                new_remaining.to_string(),
                new_status.as_str(),
                original_invoice_id,
            ],
        )?;

        Ok(return_id)
    }

    fn settlement_type_str(t: SettlementType) -> &'static str {
        match t {
            SettlementType::Ledger => "ledger",
            SettlementType::Cash => "cash",
        }
    }

    /// `RET-YYYYMMDD-HHMMSS-NNN`: date and time collapsed to digits-only,
    /// `NNN` a 3-digit sequence number disambiguating returns processed in
    /// the same second (the common case of a single return per call still
    /// reads as `...-001`).
    fn next_return_number(date: &str, time: &str, tx: &Transaction) -> EngineResult<String> {
        let date_digits: String = date.chars().filter(|c| c.is_ascii_digit()).collect();
        let time_digits: String = time.chars().filter(|c| c.is_ascii_digit()).collect();
        let count_today: i64 = tx.query_row(
            "SELECT COUNT(*) FROM returns WHERE date = ?1 AND time = ?2",
            params![date, time],
            |r| r.get(0),
        )?;
        Ok(format!("RET-{date_digits}-{time_digits}-{:03}", count_today + 1))
    }
}

impl ReturnLine {
    fn amount(&self) -> EngineResult<Money> {
        let qty_decimal = rust_decimal::Decimal::from(self.quantity.abs().0);
        let scale = rust_decimal::Decimal::from(self.unit.base_scale());
        Ok(Money::from_decimal(self.unit_price.as_decimal() * qty_decimal / scale))
    }
}
