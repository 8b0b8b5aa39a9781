//! Top-level engine composition.
//!
//! `Engine` is the crate's only public entry point: an owned handle over
//! storage, cache, and the event bus, constructed with `Engine::open` or
//! `Engine::open_in_memory` rather than reached through a process-global
//! singleton. `Send + Sync`, so a host typically wraps it in an `Arc` and
//! shares it across tasks; internal writes still serialize through the
//! single `Storage` connection.

use crate::balance::BalanceManager;
use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::invoice::{ForceDeleteMode, InvoiceEngine, NewInvoiceItem};
use crate::ledger::LedgerEngine;
use crate::money::{Money, Quantity, UnitType};
use crate::payment::PaymentEngine;
use crate::returns::{ReturnLine, ReturnsEngine};
use crate::stock::StockEngine;
use crate::storage::{Storage, TxMode};
use crate::types::{
    CashFlowDirection, Customer, Invoice, InvoiceItem, InvoiceStatus, LedgerEntryType, Product, SettlementType,
    StockMovementType, Vendor,
};
use std::path::Path;
use std::time::Duration;

pub struct Engine {
    storage: Storage,
    balance_cache: Cache<Money>,
    events: EventBus,
    config: EngineConfig,
}

impl Engine {
    pub fn open(path: &Path, config: EngineConfig) -> EngineResult<Self> {
        let storage = Storage::open(path, config.busy_timeout_ms, config.transaction_retry.clone())?;
        Ok(Self::from_storage(storage, config))
    }

    pub fn open_in_memory(config: EngineConfig) -> EngineResult<Self> {
        let storage = Storage::open_in_memory(config.transaction_retry.clone())?;
        Ok(Self::from_storage(storage, config))
    }

    fn from_storage(storage: Storage, config: EngineConfig) -> Self {
        let balance_cache = Cache::new(config.cache.max_size, Duration::from_millis(config.cache.default_ttl_ms));
        Self {
            storage,
            balance_cache,
            events: EventBus::default(),
            config,
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = EngineResult<T>>) -> EngineResult<T> {
        match tokio::time::timeout(self.config.operation_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        }
    }

    /// Live, ledger-derived balance for a customer (I6: guest customer is
    /// always zero). Served from cache when fresh.
    pub async fn get_customer_balance(&self, customer_id: i64) -> EngineResult<Money> {
        let mgr = BalanceManager::new(&self.storage, &self.balance_cache);
        mgr.get_current_balance(customer_id).await
    }

    #[tracing::instrument(skip(self, items))]
    pub async fn create_invoice(
        &self,
        customer_id: i64,
        items: Vec<NewInvoiceItem>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        self.create_invoice_with_credit(customer_id, items, None, date, time).await
    }

    /// Same as `create_invoice`, additionally applying up to `apply_credit`
    /// of the customer's standing credit against the new invoice as an
    /// immediate `customer_credit` payment.
    #[tracing::instrument(skip(self, items))]
    pub async fn create_invoice_with_credit(
        &self,
        customer_id: i64,
        items: Vec<NewInvoiceItem>,
        apply_credit: Option<Money>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        let allow_negative_stock = self.config.allow_negative_stock;
        let date = date.to_string();
        let time = time.to_string();
        let invoice_id = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                InvoiceEngine::create_invoice(tx, customer_id, &items, apply_credit, allow_negative_stock, &date, &time)
            }))
            .await?;

        self.balance_cache
            .invalidate(&format!("balance:customer:{customer_id}"))
            .await;
        self.events.emit(EngineEvent::InvoiceCreated { invoice_id, customer_id });
        let new_balance = self.get_customer_balance(customer_id).await?;
        self.events
            .emit(EngineEvent::CustomerBalanceUpdated { customer_id, new_balance });
        self.events.emit(EngineEvent::CustomerLedgerUpdated { customer_id });
        Ok(invoice_id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_invoice(
        &self,
        invoice_id: i64,
        expected_version: i64,
        new_grand_total: Money,
        date: &str,
        time: &str,
    ) -> EngineResult<()> {
        let date = date.to_string();
        let time = time.to_string();
        self.with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
            InvoiceEngine::update_invoice(tx, invoice_id, expected_version, new_grand_total, &date, &time)
        }))
        .await?;
        self.events.emit(EngineEvent::InvoiceUpdated { invoice_id });
        Ok(())
    }

    /// Adds line items to an unpaid invoice (I7), rebalancing stock and the
    /// customer ledger for the delta.
    #[tracing::instrument(skip(self, items))]
    pub async fn add_invoice_items(&self, invoice_id: i64, items: Vec<NewInvoiceItem>, date: &str, time: &str) -> EngineResult<()> {
        let allow_negative_stock = self.config.allow_negative_stock;
        let date = date.to_string();
        let time = time.to_string();
        let customer_id = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                InvoiceEngine::add_items(tx, invoice_id, &items, allow_negative_stock, &date, &time)?;
                let customer_id: i64 = tx.query_row(
                    "SELECT customer_id FROM invoices WHERE id = ?1",
                    rusqlite::params![invoice_id],
                    |r| r.get(0),
                )?;
                Ok(customer_id)
            }))
            .await?;
        self.balance_cache
            .invalidate(&format!("balance:customer:{customer_id}"))
            .await;
        self.events.emit(EngineEvent::InvoiceUpdated { invoice_id });
        self.events.emit(EngineEvent::CustomerLedgerUpdated { customer_id });
        Ok(())
    }

    /// Changes a single invoice line item's quantity on an unpaid invoice.
    #[tracing::instrument(skip(self))]
    pub async fn update_invoice_item_quantity(
        &self,
        invoice_item_id: i64,
        new_quantity: Quantity,
        date: &str,
        time: &str,
    ) -> EngineResult<()> {
        let allow_negative_stock = self.config.allow_negative_stock;
        let date = date.to_string();
        let time = time.to_string();
        let customer_id = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                InvoiceEngine::update_item_quantity(tx, invoice_item_id, new_quantity, allow_negative_stock, &date, &time)?;
                let invoice_id: i64 = tx.query_row(
                    "SELECT invoice_id FROM invoice_items WHERE id = ?1",
                    rusqlite::params![invoice_item_id],
                    |r| r.get(0),
                )?;
                let customer_id: i64 = tx.query_row(
                    "SELECT customer_id FROM invoices WHERE id = ?1",
                    rusqlite::params![invoice_id],
                    |r| r.get(0),
                )?;
                Ok(customer_id)
            }))
            .await?;
        self.balance_cache
            .invalidate(&format!("balance:customer:{customer_id}"))
            .await;
        self.events.emit(EngineEvent::CustomerLedgerUpdated { customer_id });
        Ok(())
    }

    /// Removes line items from an unpaid invoice, restocking tracked
    /// products.
    #[tracing::instrument(skip(self, invoice_item_ids))]
    pub async fn remove_invoice_items(&self, invoice_item_ids: Vec<i64>, date: &str, time: &str) -> EngineResult<()> {
        let allow_negative_stock = self.config.allow_negative_stock;
        let date = date.to_string();
        let time = time.to_string();
        let customer_id = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                let Some(&first_item_id) = invoice_item_ids.first() else {
                    return Err(EngineError::Validation("no items to remove".to_string()));
                };
                let invoice_id: i64 = tx.query_row(
                    "SELECT invoice_id FROM invoice_items WHERE id = ?1",
                    rusqlite::params![first_item_id],
                    |r| r.get(0),
                )?;
                let customer_id: i64 = tx.query_row(
                    "SELECT customer_id FROM invoices WHERE id = ?1",
                    rusqlite::params![invoice_id],
                    |r| r.get(0),
                )?;
                InvoiceEngine::remove_items(tx, &invoice_item_ids, allow_negative_stock, &date, &time)?;
                Ok(customer_id)
            }))
            .await?;
        self.balance_cache
            .invalidate(&format!("balance:customer:{customer_id}"))
            .await;
        self.events.emit(EngineEvent::CustomerLedgerUpdated { customer_id });
        Ok(())
    }

    /// Deletes an invoice outright; refuses unless `payment_amount = 0`
    /// (I7). See `force_delete_invoice` for the override.
    #[tracing::instrument(skip(self))]
    pub async fn delete_invoice(&self, invoice_id: i64, date: &str, time: &str) -> EngineResult<()> {
        let date = date.to_string();
        let time = time.to_string();
        let customer_id = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                let customer_id: i64 = tx.query_row(
                    "SELECT customer_id FROM invoices WHERE id = ?1",
                    rusqlite::params![invoice_id],
                    |r| r.get(0),
                )?;
                InvoiceEngine::delete_invoice(tx, invoice_id, &date, &time)?;
                Ok(customer_id)
            }))
            .await?;
        self.balance_cache
            .invalidate(&format!("balance:customer:{customer_id}"))
            .await;
        self.events.emit(EngineEvent::InvoiceDeleted { invoice_id });
        self.events.emit(EngineEvent::CustomerLedgerUpdated { customer_id });
        Ok(())
    }

    /// Deletes an invoice regardless of `payment_amount`, disposing of its
    /// payments per `mode`.
    #[tracing::instrument(skip(self))]
    pub async fn force_delete_invoice(&self, invoice_id: i64, mode: ForceDeleteMode, date: &str, time: &str) -> EngineResult<()> {
        let date = date.to_string();
        let time = time.to_string();
        let customer_id = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                let customer_id: i64 = tx.query_row(
                    "SELECT customer_id FROM invoices WHERE id = ?1",
                    rusqlite::params![invoice_id],
                    |r| r.get(0),
                )?;
                InvoiceEngine::force_delete_invoice(tx, invoice_id, mode, &date, &time)?;
                Ok(customer_id)
            }))
            .await?;
        self.balance_cache
            .invalidate(&format!("balance:customer:{customer_id}"))
            .await;
        self.events.emit(EngineEvent::InvoiceDeleted { invoice_id });
        self.events.emit(EngineEvent::CustomerLedgerUpdated { customer_id });
        Ok(())
    }

    /// Overwrites `customers.balance` with the live ledger SUM; idempotent.
    pub async fn reconcile_customer_balance(&self, customer_id: i64) -> EngineResult<Money> {
        let mgr = BalanceManager::new(&self.storage, &self.balance_cache);
        let balance = mgr.reconcile(customer_id).await?;
        self.events
            .emit(EngineEvent::CustomerBalanceUpdated { customer_id, new_balance: balance });
        Ok(balance)
    }

    pub async fn invoice_items(&self, invoice_id: i64) -> EngineResult<Vec<InvoiceItem>> {
        self.storage
            .with_read(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let items = InvoiceEngine::items_for_invoice(&tx, invoice_id)?;
                Ok(items)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_payment(
        &self,
        customer_id: i64,
        invoice_id: Option<i64>,
        amount: Money,
        method: &str,
        channel_id: Option<i64>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        let method = method.to_string();
        let date = date.to_string();
        let time = time.to_string();
        let payment_id = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                match invoice_id {
                    Some(invoice_id) => PaymentEngine::record_simple_payment(
                        tx, customer_id, invoice_id, amount, &method, channel_id, &date, &time,
                    ),
                    None => PaymentEngine::record_payment_with_fifo_allocation(
                        tx, customer_id, amount, &method, channel_id, &date, &time,
                    ),
                }
            }))
            .await?;

        self.balance_cache
            .invalidate(&format!("balance:customer:{customer_id}"))
            .await;
        self.events.emit(EngineEvent::PaymentRecorded { payment_id, customer_id });
        if let Some(invoice_id) = invoice_id {
            self.events.emit(EngineEvent::InvoicePaymentReceived { invoice_id, amount });
        }
        let new_balance = self.get_customer_balance(customer_id).await?;
        self.events
            .emit(EngineEvent::CustomerBalanceUpdated { customer_id, new_balance });
        Ok(payment_id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_vendor_payment(
        &self,
        vendor_id: i64,
        amount: Money,
        method: &str,
        channel_id: Option<i64>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        let method = method.to_string();
        let date = date.to_string();
        let time = time.to_string();
        let payment_id = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                PaymentEngine::record_vendor_payment(tx, vendor_id, amount, &method, channel_id, &date, &time)
            }))
            .await?;
        self.events.emit(EngineEvent::VendorPaymentCreated { vendor_id, payment_id });
        Ok(payment_id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn receive_vendor_stock(
        &self,
        vendor_id: i64,
        product_id: i64,
        quantity: crate::money::Quantity,
        date: &str,
        time: &str,
    ) -> EngineResult<crate::money::Quantity> {
        let allow_negative_stock = self.config.allow_negative_stock;
        let date = date.to_string();
        let time = time.to_string();
        let new_stock = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                let new_stock = StockEngine::adjust_stock(
                    tx,
                    product_id,
                    quantity,
                    StockMovementType::In,
                    allow_negative_stock,
                    Some("vendor_receiving"),
                    Some(vendor_id),
                    None,
                    &date,
                    &time,
                )?;
                tx.execute(
                    "UPDATE vendors SET last_receiving_at = ?1 WHERE id = ?2",
                    rusqlite::params![date, vendor_id],
                )?;
                Ok(new_stock)
            }))
            .await?;
        self.events.emit(EngineEvent::StockUpdated { product_id });
        Ok(new_stock)
    }

    #[tracing::instrument(skip(self, lines))]
    pub async fn process_return(
        &self,
        original_invoice_id: i64,
        lines: Vec<ReturnLine>,
        settlement_type: SettlementType,
        method: &str,
        channel_id: Option<i64>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        let allow_negative_stock = self.config.allow_negative_stock;
        let method = method.to_string();
        let date = date.to_string();
        let time = time.to_string();
        let customer_id: i64 = self
            .storage
            .with_read(move |conn| {
                Ok(conn.query_row(
                    "SELECT customer_id FROM invoices WHERE id = ?1",
                    rusqlite::params![original_invoice_id],
                    |r| r.get(0),
                )?)
            })
            .await?;
        let return_id = self
            .with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
                ReturnsEngine::process_return(
                    tx,
                    original_invoice_id,
                    &lines,
                    settlement_type,
                    &method,
                    channel_id,
                    allow_negative_stock,
                    &date,
                    &time,
                )
            }))
            .await?;
        self.balance_cache
            .invalidate(&format!("balance:customer:{customer_id}"))
            .await;
        self.events.emit(EngineEvent::InvoiceUpdated { invoice_id: original_invoice_id });
        self.events.emit(EngineEvent::CustomerLedgerUpdated { customer_id });
        Ok(return_id)
    }

    /// Records a manual credit adjustment to the daily cash-flow ledger
    /// (e.g. a cash deposit or petty-cash draw unrelated to any invoice).
    #[tracing::instrument(skip(self))]
    pub async fn record_cash_flow(
        &self,
        direction: CashFlowDirection,
        category: &str,
        amount: Money,
        method: &str,
        channel_id: Option<i64>,
        date: &str,
        time: &str,
    ) -> EngineResult<i64> {
        let category = category.to_string();
        let method = method.to_string();
        let date = date.to_string();
        let time = time.to_string();
        self.with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
            LedgerEngine::append_cash_flow_entry(tx, &date, &time, direction, &category, amount, &method, channel_id, None, None)
        }))
        .await
    }

    /// Soft-deletes a customer: historical ledger entries survive under
    /// the guest customer with a `[DELETED]` name prefix rather than
    /// being removed, per the reparenting rule.
    #[tracing::instrument(skip(self))]
    pub async fn delete_customer(&self, customer_id: i64, customer_name: &str) -> EngineResult<()> {
        let customer_name = customer_name.to_string();
        self.with_timeout(self.storage.with_transaction(TxMode::Immediate, move |tx| {
            LedgerEngine::reparent_to_guest_on_delete(tx, customer_id, &customer_name)
        }))
        .await?;
        self.balance_cache
            .invalidate(&format!("balance:customer:{customer_id}"))
            .await;
        Ok(())
    }

    pub async fn get_invoice(&self, invoice_id: i64) -> EngineResult<Invoice> {
        self.storage
            .with_read(move |conn| {
                let row = conn.query_row(
                    "SELECT id, bill_number, customer_id, grand_total, payment_amount, remaining_balance, status, version, created_at \
                     FROM invoices WHERE id = ?1",
                    rusqlite::params![invoice_id],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, i64>(2)?,
                            r.get::<_, String>(3)?,
                            r.get::<_, String>(4)?,
                            r.get::<_, String>(5)?,
                            r.get::<_, String>(6)?,
                            r.get::<_, i64>(7)?,
                            r.get::<_, String>(8)?,
                        ))
                    },
                );
                let (id, bill_number, customer_id, grand_total, payment_amount, remaining_balance, status, version, created_at) = row?;
                Ok(Invoice {
                    id,
                    bill_number,
                    customer_id,
                    grand_total: Money::parse(&grand_total)?,
                    payment_amount: Money::parse(&payment_amount)?,
                    remaining_balance: Money::parse(&remaining_balance)?,
                    status: InvoiceStatus::from_str(&status)?,
                    version,
                    created_at,
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_customer(&self, name: &str, date: &str) -> EngineResult<i64> {
        let name = name.to_string();
        let date = date.to_string();
        self.storage
            .with_transaction(TxMode::Immediate, move |tx| {
                tx.execute(
                    "INSERT INTO customers (name, balance, created_at) VALUES (?1, '0.00', ?2)",
                    rusqlite::params![name, date],
                )?;
                Ok(tx.last_insert_rowid())
            })
            .await
    }

    pub async fn get_customer(&self, customer_id: i64) -> EngineResult<Customer> {
        self.storage
            .with_read(move |conn| {
                let (id, name, balance, created_at, is_deleted) = conn.query_row(
                    "SELECT id, name, balance, created_at, is_deleted FROM customers WHERE id = ?1",
                    rusqlite::params![customer_id],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, String>(3)?,
                            r.get::<_, bool>(4)?,
                        ))
                    },
                )?;
                Ok(Customer {
                    id,
                    name,
                    balance: Money::parse(&balance)?,
                    created_at,
                    is_deleted,
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_vendor(&self, name: &str, date: &str) -> EngineResult<i64> {
        let name = name.to_string();
        let date = date.to_string();
        self.storage
            .with_transaction(TxMode::Immediate, move |tx| {
                tx.execute(
                    "INSERT INTO vendors (name, balance, created_at) VALUES (?1, '0.00', ?2)",
                    rusqlite::params![name, date],
                )?;
                Ok(tx.last_insert_rowid())
            })
            .await
    }

    pub async fn get_vendor(&self, vendor_id: i64) -> EngineResult<Vendor> {
        self.storage
            .with_read(move |conn| {
                let (id, name, balance, created_at, last_receiving_at) = conn.query_row(
                    "SELECT id, name, balance, created_at, last_receiving_at FROM vendors WHERE id = ?1",
                    rusqlite::params![vendor_id],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, String>(3)?,
                            r.get::<_, Option<String>>(4)?,
                        ))
                    },
                )?;
                Ok(Vendor {
                    id,
                    name,
                    balance: Money::parse(&balance)?,
                    created_at,
                    last_receiving_at,
                })
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_product(
        &self,
        name: &str,
        unit_type: UnitType,
        rate_per_unit: Money,
        track_inventory: bool,
    ) -> EngineResult<i64> {
        let name = name.to_string();
        self.storage
            .with_transaction(TxMode::Immediate, move |tx| {
                tx.execute(
                    "INSERT INTO products (name, unit_type, current_stock, rate_per_unit, track_inventory, status) \
                     VALUES (?1, ?2, 0, ?3, ?4, 'active')",
                    rusqlite::params![name, unit_type.as_str(), rate_per_unit.to_string(), track_inventory],
                )?;
                Ok(tx.last_insert_rowid())
            })
            .await
    }

    pub async fn get_product(&self, product_id: i64) -> EngineResult<Product> {
        self.storage
            .with_read(move |conn| {
                let (id, name, unit_type, current_stock, rate_per_unit, track_inventory, status) = conn.query_row(
                    "SELECT id, name, unit_type, current_stock, rate_per_unit, track_inventory, status FROM products WHERE id = ?1",
                    rusqlite::params![product_id],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, i64>(3)?,
                            r.get::<_, String>(4)?,
                            r.get::<_, bool>(5)?,
                            r.get::<_, String>(6)?,
                        ))
                    },
                )?;
                Ok(Product {
                    id,
                    name,
                    unit_type: UnitType::from_str(&unit_type)?,
                    current_stock: Quantity(current_stock),
                    rate_per_unit: Money::parse(&rate_per_unit)?,
                    track_inventory,
                    status,
                })
            })
            .await
    }
}
