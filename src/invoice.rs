//! Invoice Engine (component H).
//!
//! Invoices, their line items, and the bill-numbering scheme. `grand_total`
//! is always the sum of `invoice_items.total_price`; `payment_amount` and
//! `remaining_balance` are maintained by the payment engine, not here —
//! this module only ever derives `status` from whatever the two currently
//! say. Optimistic concurrency on `update_invoice` is enforced via the
//! `version` column (I7): a caller must supply the version it last read.

use crate::errors::{EngineError, EngineResult};
use crate::ledger::LedgerEngine;
use crate::money::{Money, Quantity, UnitType};
use crate::payment::PaymentEngine;
use crate::stock::StockEngine;
use crate::types::{GUEST_CUSTOMER_ID, InvoiceItem, InvoiceStatus, LedgerEntryType, StockMovementType, TIronCalc};
use rusqlite::{params, OptionalExtension, Transaction};

/// How `force_delete_invoice` disposes of payments already recorded
/// against the invoice being deleted (I7's escape hatch). A plain
/// `delete_invoice` never needs this: it refuses outright unless
/// `payment_amount = 0`, so there is nothing to dispose of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceDeleteMode {
    /// Unlink the payment rows from the deleted invoice and leave their
    /// customer-ledger credit entries in place. Because the invoice's own
    /// debit entry is always removed as part of the delete, the customer
    /// is left with standing credit equal to what they'd paid.
    Reverse,
    /// Structurally identical to `Reverse` under this schema (there is no
    /// `advance_payment` flag column to set) — unlink the payment rows and
    /// keep their ledger credit entries as a future-usable advance. Kept
    /// as a distinct variant so callers can express intent even though the
    /// storage effect doesn't yet differ; see DESIGN.md.
    Transfer,
    /// Hard-delete the payment rows together with their customer-ledger
    /// credit entries and daily-ledger cash entries, as if the payment had
    /// never been recorded at all.
    Ignore,
}

pub struct NewInvoiceItem {
    pub product_id: Option<i64>,
    pub description: Option<String>,
    /// Unit the quantity is expressed in. Misc items with no product carry
    /// `UnitType::Piece` so their `unit_price` is taken as a flat per-line price.
    pub unit: UnitType,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub is_misc_item: bool,
    pub is_non_stock_item: bool,
    pub t_iron: Option<TIronCalc>,
}

pub struct InvoiceEngine;

impl InvoiceEngine {
    /// Generates the next bill number as `max(numeric) + 1` over bill
    /// numbers that parse cleanly as an integer, left-zero-padded to a
    /// minimum of 2 characters (`"01"`, …, `"10"`, …, `"100"`, …). Legacy
    /// `I#####`-style bill numbers do not parse as plain integers and are
    /// therefore excluded from the max — they are historical artifacts,
    /// not part of the active numbering sequence.
    pub fn next_bill_number(tx: &Transaction) -> EngineResult<String> {
        let mut stmt = tx.prepare("SELECT bill_number FROM invoices")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut max_seen: i64 = 0;
        for row in rows {
            let bill_number = row?;
            if let Ok(n) = bill_number.parse::<i64>() {
                max_seen = max_seen.max(n);
            }
        }
        Ok(format!("{:02}", max_seen + 1))
    }

    /// Creates an invoice with its line items inside a single write
    /// transaction: computes `grand_total` from the items, decrements
    /// stock for every stock-tracked item, and appends one customer-ledger
    /// debit for the full amount. If `apply_credit` is `Some`, the request
    /// is capped by the customer's current standing credit and applied as
    /// an immediate `customer_credit` payment against the new invoice —
    /// never more than what's actually owed or actually available.
    #[allow(clippy::too_many_arguments)]
    pub fn create_invoice(
        tx: &Transaction,
        customer_id: i64,
        items: &[NewInvoiceItem],
        apply_credit: Option<Money>,
        allow_negative_stock: bool,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        if items.is_empty() {
            return Err(EngineError::Validation("invoice must have at least one item".to_string()));
        }

        let bill_number = Self::next_bill_number(tx)?;
        let mut grand_total = Money::ZERO;
        for item in items {
            grand_total = grand_total.checked_add(item.total_price()?)?;
        }

        tx.execute(
            "INSERT INTO invoices \
             (bill_number, customer_id, grand_total, payment_amount, remaining_balance, status, version, created_at) \
             VALUES (?1, ?2, ?3, '0.00', ?3, ?4, 1, ?5)",
            params![
                bill_number,
                customer_id,
                grand_total.to_string(),
                InvoiceStatus::Pending.as_str(),
                date,
            ],
        )?;
        let invoice_id = tx.last_insert_rowid();

        for item in items {
            Self::insert_item(tx, invoice_id, item)?;
            if let Some(product_id) = item.product_id {
                if !item.is_non_stock_item {
                    StockEngine::adjust_stock(
                        tx,
                        product_id,
                        Quantity(-item.quantity.abs().0),
                        StockMovementType::Out,
                        allow_negative_stock,
                        Some("invoice"),
                        Some(invoice_id),
                        Some(&bill_number),
                        date,
                        time,
                    )?;
                }
            }
        }

        // Standing credit is whatever the customer has *before* this
        // invoice's own debit lands, not after — otherwise the debit we're
        // about to post would always swallow it.
        let available_credit_before = match apply_credit {
            Some(requested) if !requested.is_zero() => {
                if requested.is_negative() {
                    return Err(EngineError::Validation("credit to apply cannot be negative".to_string()));
                }
                Some(LedgerEngine::available_credit_in_tx(tx, customer_id)?)
            }
            _ => None,
        };

        LedgerEngine::append_customer_entry(
            tx,
            customer_id,
            LedgerEntryType::Debit,
            "invoice",
            grand_total,
            Some("invoice"),
            Some(invoice_id),
            Some(&bill_number),
            date,
            time,
        )?;

        if let (Some(requested), Some(available)) = (apply_credit, available_credit_before) {
            let applied = requested.min(available).min(grand_total);
            if !applied.is_zero() {
                PaymentEngine::apply_credit_to_invoice(tx, customer_id, invoice_id, applied, date, time)?;
            }
        }

        Ok(invoice_id)
    }

    fn insert_item(tx: &Transaction, invoice_id: i64, item: &NewInvoiceItem) -> EngineResult<i64> {
        let total_price = item.total_price()?;
        let (t_iron_pieces, t_iron_length, t_iron_total_feet, t_iron_unit) = match &item.t_iron {
            Some(t) => (
                Some(t.pieces),
                Some(t.length_per_piece.0),
                Some(t.total_feet.0),
                Some(t.unit.as_str()),
            ),
            None => (None, None, None, None),
        };
        tx.execute(
            "INSERT INTO invoice_items \
             (invoice_id, product_id, description, quantity, unit_price, total_price, \
              is_misc_item, is_non_stock_item, t_iron_pieces, t_iron_length, t_iron_total_feet, t_iron_unit) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                invoice_id,
                item.product_id,
                item.description,
                item.quantity.0,
                item.unit_price.to_string(),
                total_price.to_string(),
                item.is_misc_item,
                item.is_non_stock_item,
                t_iron_pieces,
                t_iron_length,
                t_iron_total_feet,
                t_iron_unit,
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }

    /// Updates an invoice's line items under optimistic concurrency: the
    /// caller must supply the `expected_version` it last read, or the
    /// write is refused with `EngineError::Conflict` rather than silently
    /// clobbering a concurrent update (I7).
    pub fn update_invoice(
        tx: &Transaction,
        invoice_id: i64,
        expected_version: i64,
        new_grand_total: Money,
        date: &str,
        time: &str,
    ) -> EngineResult<()> {
        let row: Option<(i64, String, String)> = tx
            .query_row(
                "SELECT version, payment_amount, grand_total FROM invoices WHERE id = ?1",
                params![invoice_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let Some((current_version, payment_amount_str, grand_total_str)) = row else {
            return Err(EngineError::NotFound(format!("invoice {invoice_id}")));
        };
        let payment_amount = Money::parse(&payment_amount_str)?;
        let previous_grand_total = Money::parse(&grand_total_str)?;

        if current_version != expected_version {
            return Err(EngineError::Conflict(format!(
                "invoice {invoice_id} was modified concurrently: expected version {expected_version}, found {current_version}"
            )));
        }

        let remaining = new_grand_total.checked_sub(payment_amount)?.floor_zero();
        let status = InvoiceStatus::derive(new_grand_total, payment_amount);

        tx.execute(
            "UPDATE invoices SET grand_total = ?1, remaining_balance = ?2, status = ?3, version = version + 1 \
             WHERE id = ?4",
            params![
                new_grand_total.to_string(),
                remaining.to_string(),
                status.as_str(),
                invoice_id,
            ],
        )?;

        let delta = new_grand_total.checked_sub(previous_grand_total)?;
        if !delta.is_zero() {
            let customer_id: i64 = tx.query_row(
                "SELECT customer_id FROM invoices WHERE id = ?1",
                params![invoice_id],
                |r| r.get(0),
            )?;
            let (entry_type, amount) = if delta.is_negative() {
                (LedgerEntryType::Credit, delta.abs())
            } else {
                (LedgerEntryType::Debit, delta)
            };
            LedgerEngine::append_customer_entry(
                tx,
                customer_id,
                entry_type,
                "invoice_adjustment",
                amount,
                Some("invoice"),
                Some(invoice_id),
                None,
                date,
                time,
            )?;
        }

        Ok(())
    }

    /// Loads the full item list for an invoice, in insertion order.
    pub fn items_for_invoice(tx: &Transaction, invoice_id: i64) -> EngineResult<Vec<InvoiceItem>> {
        let mut stmt = tx.prepare(
            "SELECT id, invoice_id, product_id, description, quantity, unit_price, total_price, \
                    is_misc_item, is_non_stock_item, t_iron_pieces, t_iron_length, t_iron_total_feet, t_iron_unit \
             FROM invoice_items WHERE invoice_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![invoice_id], |r| {
            let t_iron_pieces: Option<i64> = r.get(9)?;
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, Option<i64>>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, bool>(7)?,
                r.get::<_, bool>(8)?,
                t_iron_pieces,
                r.get::<_, Option<i64>>(10)?,
                r.get::<_, Option<i64>>(11)?,
                r.get::<_, Option<String>>(12)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, invoice_id, product_id, description, quantity, unit_price, total_price, is_misc_item, is_non_stock_item, t_iron_pieces, t_iron_length, t_iron_total_feet, t_iron_unit) = row?;
            let t_iron = match (t_iron_pieces, t_iron_length, t_iron_total_feet, t_iron_unit) {
                (Some(pieces), Some(length), Some(total_feet), Some(unit)) => Some(TIronCalc {
                    pieces,
                    length_per_piece: Quantity(length),
                    total_feet: Quantity(total_feet),
                    unit: crate::money::UnitType::from_str(&unit)?,
                }),
                _ => None,
            };
            items.push(InvoiceItem {
                id,
                invoice_id,
                product_id,
                description,
                quantity: Quantity(quantity),
                unit_price: Money::parse(&unit_price)?,
                total_price: Money::parse(&total_price)?,
                is_misc_item,
                is_non_stock_item,
                t_iron,
            });
        }
        Ok(items)
    }

    /// Requires `payment_amount = 0` before any item mutation (I7): once a
    /// customer has paid anything against an invoice, its items are frozen
    /// short of a force-delete. Returns the current `(customer_id,
    /// grand_total, bill_number)` for the caller to use in follow-on writes.
    fn require_unpaid_for_edit(tx: &Transaction, invoice_id: i64) -> EngineResult<(i64, Money, String)> {
        let row: Option<(i64, String, String, String)> = tx
            .query_row(
                "SELECT customer_id, payment_amount, grand_total, bill_number FROM invoices WHERE id = ?1",
                params![invoice_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let Some((customer_id, payment_amount_str, grand_total_str, bill_number)) = row else {
            return Err(EngineError::NotFound(format!("invoice {invoice_id}")));
        };
        let payment_amount = Money::parse(&payment_amount_str)?;
        if !payment_amount.is_zero() {
            return Err(EngineError::BusinessRule(
                "invoice items cannot be changed once a payment has been recorded against it".to_string(),
            ));
        }
        Ok((customer_id, Money::parse(&grand_total_str)?, bill_number))
    }

    /// Recomputes `grand_total`/`remaining_balance`/`status` from the
    /// current item rows and bumps `version`. Emits the delta as a single
    /// customer-ledger entry against the previous `grand_total` (debit if
    /// the total grew, credit if it shrank); a zero delta writes nothing.
    fn recompute_totals_and_adjust_ledger(
        tx: &Transaction,
        invoice_id: i64,
        customer_id: i64,
        previous_grand_total: Money,
        transaction_type: &str,
        date: &str,
        time: &str,
    ) -> EngineResult<()> {
        let items = Self::items_for_invoice(tx, invoice_id)?;
        let mut new_grand_total = Money::ZERO;
        for item in &items {
            new_grand_total = new_grand_total.checked_add(item.total_price)?;
        }

        let payment_amount = Money::ZERO; // require_unpaid_for_edit already guaranteed this
        let remaining = new_grand_total.checked_sub(payment_amount)?.floor_zero();
        let status = InvoiceStatus::derive(new_grand_total, payment_amount);

        tx.execute(
            "UPDATE invoices SET grand_total = ?1, remaining_balance = ?2, status = ?3, version = version + 1 \
             WHERE id = ?4",
            params![new_grand_total.to_string(), remaining.to_string(), status.as_str(), invoice_id],
        )?;

        let delta = new_grand_total.checked_sub(previous_grand_total)?;
        if !delta.is_zero() && customer_id != GUEST_CUSTOMER_ID {
            let (entry_type, amount) = if delta.is_negative() {
                (LedgerEntryType::Credit, delta.abs())
            } else {
                (LedgerEntryType::Debit, delta)
            };
            LedgerEngine::append_customer_entry(
                tx,
                customer_id,
                entry_type,
                transaction_type,
                amount,
                Some("invoice"),
                Some(invoice_id),
                None,
                date,
                time,
            )?;
        }
        Ok(())
    }

    /// Adds new line items to an existing unpaid invoice: inserts each
    /// item, decrements stock for tracked products, and recomputes totals.
    pub fn add_items(
        tx: &Transaction,
        invoice_id: i64,
        items: &[NewInvoiceItem],
        allow_negative_stock: bool,
        date: &str,
        time: &str,
    ) -> EngineResult<()> {
        if items.is_empty() {
            return Err(EngineError::Validation("no items to add".to_string()));
        }
        let (customer_id, previous_grand_total, bill_number) = Self::require_unpaid_for_edit(tx, invoice_id)?;

        for item in items {
            Self::insert_item(tx, invoice_id, item)?;
            if let Some(product_id) = item.product_id {
                if !item.is_non_stock_item {
                    StockEngine::adjust_stock(
                        tx,
                        product_id,
                        Quantity(-item.quantity.abs().0),
                        StockMovementType::Out,
                        allow_negative_stock,
                        Some("invoice_item_added"),
                        Some(invoice_id),
                        Some(&bill_number),
                        date,
                        time,
                    )?;
                }
            }
        }

        Self::recompute_totals_and_adjust_ledger(
            tx,
            invoice_id,
            customer_id,
            previous_grand_total,
            "invoice_items_added",
            date,
            time,
        )
    }

    /// Changes a single line item's quantity, rebalancing stock with an
    /// explicit `in`/`out` movement describing whether the quantity grew or
    /// shrank, and recomputes invoice totals.
    pub fn update_item_quantity(
        tx: &Transaction,
        invoice_item_id: i64,
        new_quantity: Quantity,
        allow_negative_stock: bool,
        date: &str,
        time: &str,
    ) -> EngineResult<()> {
        let row: Option<(i64, Option<i64>, i64, String, bool, bool)> = tx
            .query_row(
                "SELECT invoice_id, product_id, quantity, unit_price, is_misc_item, is_non_stock_item \
                 FROM invoice_items WHERE id = ?1",
                params![invoice_item_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .optional()?;
        let Some((invoice_id, product_id, old_quantity, unit_price_str, _is_misc, is_non_stock_item)) = row else {
            return Err(EngineError::NotFound(format!("invoice item {invoice_item_id}")));
        };
        let unit_price = Money::parse(&unit_price_str)?;
        let (customer_id, previous_grand_total, bill_number) = Self::require_unpaid_for_edit(tx, invoice_id)?;

        let old_quantity = Quantity(old_quantity);
        let delta_qty = new_quantity.checked_sub(old_quantity)?;

        if let Some(product_id) = product_id {
            if !is_non_stock_item && delta_qty.0 != 0 {
                let (movement_type, reason) = if delta_qty.0 > 0 {
                    (StockMovementType::Out, "qty increased")
                } else {
                    (StockMovementType::In, "qty decreased")
                };
                let signed_delta = if movement_type == StockMovementType::Out { -delta_qty.abs().0 } else { delta_qty.abs().0 };
                StockEngine::adjust_stock(
                    tx,
                    product_id,
                    Quantity(signed_delta),
                    movement_type,
                    allow_negative_stock,
                    Some(reason),
                    Some(invoice_id),
                    Some(&bill_number),
                    date,
                    time,
                )?;
            }
        }

        let new_total_price = Money::from_decimal(unit_price.as_decimal() * rust_decimal::Decimal::from(new_quantity.0));
        tx.execute(
            "UPDATE invoice_items SET quantity = ?1, total_price = ?2 WHERE id = ?3",
            params![new_quantity.0, new_total_price.to_string(), invoice_item_id],
        )?;

        Self::recompute_totals_and_adjust_ledger(
            tx,
            invoice_id,
            customer_id,
            previous_grand_total,
            "invoice_item_quantity_changed",
            date,
            time,
        )
    }

    /// Removes a line item from an unpaid invoice, restoring stock for
    /// tracked products and recomputing totals.
    pub fn remove_items(
        tx: &Transaction,
        invoice_item_ids: &[i64],
        allow_negative_stock: bool,
        date: &str,
        time: &str,
    ) -> EngineResult<()> {
        if invoice_item_ids.is_empty() {
            return Err(EngineError::Validation("no items to remove".to_string()));
        }
        let mut invoice_id: Option<i64> = None;
        for &item_id in invoice_item_ids {
            let row: Option<(i64, Option<i64>, i64, bool)> = tx
                .query_row(
                    "SELECT invoice_id, product_id, quantity, is_non_stock_item FROM invoice_items WHERE id = ?1",
                    params![item_id],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
                )
                .optional()?;
            let Some((this_invoice_id, product_id, quantity, is_non_stock_item)) = row else {
                return Err(EngineError::NotFound(format!("invoice item {item_id}")));
            };
            if let Some(seen) = invoice_id {
                if seen != this_invoice_id {
                    return Err(EngineError::Validation("remove_items requires items from a single invoice".to_string()));
                }
            }
            invoice_id = Some(this_invoice_id);

            let (customer_id, previous_grand_total, bill_number) = Self::require_unpaid_for_edit(tx, this_invoice_id)?;

            if let Some(product_id) = product_id {
                if !is_non_stock_item {
                    StockEngine::adjust_stock(
                        tx,
                        product_id,
                        Quantity(quantity.abs()),
                        StockMovementType::In,
                        allow_negative_stock,
                        Some("item removed"),
                        Some(this_invoice_id),
                        Some(&bill_number),
                        date,
                        time,
                    )?;
                }
            }

            tx.execute("DELETE FROM invoice_items WHERE id = ?1", params![item_id])?;

            Self::recompute_totals_and_adjust_ledger(
                tx,
                this_invoice_id,
                customer_id,
                previous_grand_total,
                "invoice_item_removed",
                date,
                time,
            )?;
        }
        Ok(())
    }

    /// Deletes an invoice outright. Refuses unless `payment_amount = 0`
    /// (I7); see `force_delete_invoice` for the override path. Restores
    /// stock for every tracked item, removes the invoice's own ledger
    /// debit entry (the customer's balance naturally reflects its absence
    /// on the next recompute), and deletes dependent rows in the order
    /// items → stock movements → customer ledger entries → daily ledger →
    /// the invoice header. Returns that reference this invoice are kept,
    /// with `original_invoice_id` cleared.
    pub fn delete_invoice(tx: &Transaction, invoice_id: i64, date: &str, time: &str) -> EngineResult<()> {
        let payment_amount: Option<String> = tx
            .query_row("SELECT payment_amount FROM invoices WHERE id = ?1", params![invoice_id], |r| r.get(0))
            .optional()?;
        let Some(payment_amount) = payment_amount else {
            return Err(EngineError::NotFound(format!("invoice {invoice_id}")));
        };
        if !Money::parse(&payment_amount)?.is_zero() {
            return Err(EngineError::BusinessRule(
                "cannot delete an invoice with recorded payments; use force_delete_invoice".to_string(),
            ));
        }
        Self::delete_invoice_core(tx, invoice_id, None, date, time)
    }

    /// Deletes an invoice regardless of `payment_amount`, disposing of its
    /// payments per `mode` (see `ForceDeleteMode`).
    pub fn force_delete_invoice(
        tx: &Transaction,
        invoice_id: i64,
        mode: ForceDeleteMode,
        date: &str,
        time: &str,
    ) -> EngineResult<()> {
        Self::delete_invoice_core(tx, invoice_id, Some(mode), date, time)
    }

    fn delete_invoice_core(
        tx: &Transaction,
        invoice_id: i64,
        mode: Option<ForceDeleteMode>,
        date: &str,
        time: &str,
    ) -> EngineResult<()> {
        let row: Option<i64> = tx
            .query_row("SELECT customer_id FROM invoices WHERE id = ?1", params![invoice_id], |r| r.get(0))
            .optional()?;
        let Some(_customer_id) = row else {
            return Err(EngineError::NotFound(format!("invoice {invoice_id}")));
        };

        for item in Self::items_for_invoice(tx, invoice_id)? {
            if let Some(product_id) = item.product_id {
                if !item.is_non_stock_item {
                    StockEngine::adjust_stock(
                        tx,
                        product_id,
                        item.quantity.abs(),
                        StockMovementType::In,
                        true,
                        Some("invoice_deleted"),
                        Some(invoice_id),
                        None,
                        date,
                        time,
                    )?;
                }
            }
        }

        match mode {
            None | Some(ForceDeleteMode::Reverse) | Some(ForceDeleteMode::Transfer) => {
                tx.execute("UPDATE payments SET invoice_id = NULL WHERE invoice_id = ?1", params![invoice_id])?;
            }
            Some(ForceDeleteMode::Ignore) => {
                let mut stmt = tx.prepare("SELECT id, customer_id, amount FROM payments WHERE invoice_id = ?1")?;
                let rows = stmt.query_map(params![invoice_id], |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, String>(2)?))
                })?;
                let mut to_discard = Vec::new();
                for row in rows {
                    to_discard.push(row?);
                }
                drop(stmt);
                for (payment_id, customer_id, amount_str) in to_discard {
                    let amount = Money::parse(&amount_str)?;
                    if customer_id != GUEST_CUSTOMER_ID && !amount.is_zero() {
                        LedgerEngine::append_customer_entry(
                            tx,
                            customer_id,
                            LedgerEntryType::Debit,
                            "payment_ignored_on_force_delete",
                            amount,
                            Some("payment"),
                            Some(payment_id),
                            None,
                            date,
                            time,
                        )?;
                    }
                    tx.execute(
                        "DELETE FROM customer_ledger_entries WHERE reference_type = 'payment' AND reference_id = ?1",
                        params![payment_id],
                    )?;
                    tx.execute(
                        "DELETE FROM daily_ledger_entries WHERE reference_type = 'payment' AND reference_id = ?1",
                        params![payment_id],
                    )?;
                    tx.execute("DELETE FROM invoice_payment_allocations WHERE payment_id = ?1", params![payment_id])?;
                    tx.execute("DELETE FROM payments WHERE id = ?1", params![payment_id])?;
                }
            }
        }

        tx.execute("UPDATE returns SET original_invoice_id = NULL WHERE original_invoice_id = ?1", params![invoice_id])?;

        tx.execute("DELETE FROM invoice_items WHERE invoice_id = ?1", params![invoice_id])?;
        tx.execute(
            "DELETE FROM stock_movements WHERE reference_type = 'invoice' AND reference_id = ?1",
            params![invoice_id],
        )?;
        tx.execute(
            "DELETE FROM customer_ledger_entries WHERE reference_type = 'invoice' AND reference_id = ?1",
            params![invoice_id],
        )?;
        tx.execute(
            "DELETE FROM daily_ledger_entries WHERE reference_type = 'invoice' AND reference_id = ?1",
            params![invoice_id],
        )?;
        tx.execute("DELETE FROM invoice_payment_allocations WHERE invoice_id = ?1", params![invoice_id])?;
        tx.execute("DELETE FROM invoices WHERE id = ?1", params![invoice_id])?;

        Ok(())
    }
}

impl NewInvoiceItem {
    /// `unit_price` is quoted per display unit (e.g. per kg, per foot, per
    /// piece); `quantity` is stored in base units, so the base scale for
    /// `unit` converts it back before multiplying.
    fn total_price(&self) -> EngineResult<Money> {
        let qty_decimal = rust_decimal::Decimal::from(self.quantity.0);
        let scale = rust_decimal::Decimal::from(self.unit.base_scale());
        let price = self.unit_price.as_decimal() * qty_decimal / scale;
        Ok(Money::from_decimal(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::storage::{Storage, TxMode};

    async fn setup() -> Storage {
        let storage = Storage::open_in_memory(RetryConfig::default()).unwrap();
        storage
            .with_transaction(TxMode::Immediate, |tx| {
                tx.execute(
                    "INSERT INTO customers (id, name, balance, created_at) VALUES (1, 'Acme', '0.00', '2026-01-01')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_bill_number_starts_at_one() {
        let storage = setup().await;
        let bill_number = storage
            .with_transaction(TxMode::Immediate, |tx| InvoiceEngine::next_bill_number(tx))
            .await
            .unwrap();
        assert_eq!(bill_number, "01");
    }

    #[tokio::test]
    async fn test_update_invoice_rejects_stale_version() {
        let storage = setup().await;
        let invoice_id = storage
            .with_transaction(TxMode::Immediate, |tx| {
                InvoiceEngine::create_invoice(
                    tx,
                    1,
                    &[NewInvoiceItem {
                        product_id: None,
                        description: Some("Misc".to_string()),
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
                    "10:00:00",
                )
            })
            .await
            .unwrap();

        let result = storage
            .with_transaction(TxMode::Immediate, |tx| {
                InvoiceEngine::update_invoice(
                    tx,
                    invoice_id,
                    99,
                    Money::parse("200.00").unwrap(),
                    "2026-01-02",
                    "10:00:00",
                )
            })
            .await;
        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_apply_credit_caps_at_available_standing_credit() {
        let storage = setup().await;
        storage
            .with_transaction(TxMode::Immediate, |tx| {
                // A prior standing credit of 40.00 (customer overpaid something earlier).
                LedgerEngine::append_customer_entry(
                    tx,
                    1,
                    LedgerEntryType::Credit,
                    "payment",
                    Money::parse("40.00").unwrap(),
                    None,
                    None,
                    None,
                    "2025-12-01",
                    "09:00:00",
                )
            })
            .await
            .unwrap();

        let invoice_id = storage
            .with_transaction(TxMode::Immediate, |tx| {
                InvoiceEngine::create_invoice(
                    tx,
                    1,
                    &[NewInvoiceItem {
                        product_id: None,
                        description: Some("Misc".to_string()),
                        unit: UnitType::Piece,
                        quantity: Quantity(1),
                        unit_price: Money::parse("100.00").unwrap(),
                        is_misc_item: true,
                        is_non_stock_item: true,
                        t_iron: None,
                    }],
                    Some(Money::parse("75.00").unwrap()),
                    false,
                    "2026-01-01",
                    "10:00:00",
                )
            })
            .await
            .unwrap();

        let (payment_amount, remaining): (String, String) = storage
            .with_read(move |conn| {
                Ok(conn.query_row(
                    "SELECT payment_amount, remaining_balance FROM invoices WHERE id = ?1",
                    params![invoice_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?)
            })
            .await
            .unwrap();
        // Only 40.00 of standing credit existed, so that's all that applies,
        // even though 75.00 was requested.
        assert_eq!(payment_amount, "40.00");
        assert_eq!(remaining, "60.00");
    }
}
