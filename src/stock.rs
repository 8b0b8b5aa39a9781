//! Stock Engine (component G).
//!
//! `stock_movements` is the append-only source of truth; `products.current_stock`
//! is a cached running total updated alongside every movement inside the
//! same write transaction. Non-stock and non-tracked products bypass
//! movement recording entirely rather than recording a movement against a
//! quantity nobody reads.

use crate::errors::{EngineError, EngineResult};
use crate::money::Quantity;
use crate::types::StockMovementType;
use rusqlite::{params, OptionalExtension, Transaction};

pub struct StockEngine;

impl StockEngine {
    /// Adjusts `product_id`'s stock by `delta` (positive for receipts,
    /// negative for sales/consumption), recording a movement row and
    /// updating the cached `current_stock` column. Refuses to drive stock
    /// negative unless `allow_negative_stock` is set or the movement is an
    /// explicit adjustment.
    #[allow(clippy::too_many_arguments)]
    pub fn adjust_stock(
        tx: &Transaction,
        product_id: i64,
        delta: Quantity,
        movement_type: StockMovementType,
        allow_negative_stock: bool,
        reference_type: Option<&str>,
        reference_id: Option<i64>,
        reference_number: Option<&str>,
        date: &str,
        time: &str,
    ) -> EngineResult<Quantity> {
        let row: Option<(i64, bool)> = tx
            .query_row(
                "SELECT current_stock, track_inventory FROM products WHERE id = ?1",
                params![product_id],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)? != 0)),
            )
            .optional()?;
        let Some((previous_raw, track_inventory)) = row else {
            return Err(EngineError::NotFound(format!("product {product_id}")));
        };
        if !track_inventory {
            return Ok(Quantity(previous_raw));
        }

        let previous = Quantity(previous_raw);
        let new_stock = previous.checked_add(delta)?;

        if new_stock.is_negative() && !allow_negative_stock && movement_type != StockMovementType::Adjustment {
            return Err(EngineError::InsufficientStock {
                product_id,
                requested: delta.abs(),
                available: previous,
            });
        }

        tx.execute(
            "INSERT INTO stock_movements \
             (product_id, movement_type, quantity, previous_stock, new_stock, \
              reference_type, reference_id, reference_number, date, time) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                product_id,
                movement_type.as_str(),
                delta.abs().0,
                previous.0,
                new_stock.0,
                reference_type,
                reference_id,
                reference_number,
                date,
                time,
            ],
        )?;

        tx.execute(
            "UPDATE products SET current_stock = ?1 WHERE id = ?2",
            params![new_stock.0, product_id],
        )?;

        Ok(new_stock)
    }

    /// Recomputes `product_id`'s stock from the full movement history and,
    /// if it differs from the cached column, self-heals it (spec §7
    /// integrity drift — logged, never an error).
    pub fn recompute_and_heal(tx: &Transaction, product_id: i64) -> EngineResult<Quantity> {
        let net: i64 = tx.query_row(
            "SELECT COALESCE(SUM(CASE \
                WHEN movement_type = 'in' THEN quantity \
                WHEN movement_type = 'out' THEN -quantity \
                ELSE quantity END), 0) \
             FROM stock_movements WHERE product_id = ?1",
            params![product_id],
            |r| r.get(0),
        )?;
        let recomputed = Quantity(net);

        let cached: i64 = tx.query_row(
            "SELECT current_stock FROM products WHERE id = ?1",
            params![product_id],
            |r| r.get(0),
        )?;

        if cached != recomputed.0 {
            tracing::warn!(
                product_id,
                cached,
                recomputed = recomputed.0,
                "product stock drift detected, self-healing cached column"
            );
            tx.execute(
                "UPDATE products SET current_stock = ?1 WHERE id = ?2",
                params![recomputed.0, product_id],
            )?;
        }

        Ok(recomputed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::storage::{Storage, TxMode};

    async fn product_storage() -> Storage {
        let storage = Storage::open_in_memory(RetryConfig::default()).unwrap();
        storage
            .with_transaction(TxMode::Immediate, |tx| {
                tx.execute(
                    "INSERT INTO products (id, name, unit_type, current_stock, rate_per_unit, track_inventory, status) \
                     VALUES (1, 'Steel Rod', 'kg', 10000, '100.00', 1, 'active')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_receiving_increases_stock() {
        let storage = product_storage().await;
        let new_stock = storage
            .with_transaction(TxMode::Immediate, |tx| {
                StockEngine::adjust_stock(
                    tx,
                    1,
                    Quantity(5000),
                    StockMovementType::In,
                    false,
                    Some("receiving"),
                    Some(1),
                    None,
                    "2026-01-01",
                    "09:00:00",
                )
            })
            .await
            .unwrap();
        assert_eq!(new_stock, Quantity(15000));
    }

    #[tokio::test]
    async fn test_sale_refuses_to_go_negative() {
        let storage = product_storage().await;
        let result = storage
            .with_transaction(TxMode::Immediate, |tx| {
                StockEngine::adjust_stock(
                    tx,
                    1,
                    Quantity(-20000),
                    StockMovementType::Out,
                    false,
                    Some("invoice"),
                    Some(1),
                    None,
                    "2026-01-01",
                    "09:00:00",
                )
            })
            .await;
        assert!(matches!(result, Err(EngineError::InsufficientStock { .. })));
    }

    #[tokio::test]
    async fn test_adjustment_movement_allowed_to_go_negative() {
        let storage = product_storage().await;
        let new_stock = storage
            .with_transaction(TxMode::Immediate, |tx| {
                StockEngine::adjust_stock(
                    tx,
                    1,
                    Quantity(-20000),
                    StockMovementType::Adjustment,
                    false,
                    Some("correction"),
                    None,
                    None,
                    "2026-01-01",
                    "09:00:00",
                )
            })
            .await
            .unwrap();
        assert_eq!(new_stock, Quantity(-10000));
    }

    #[tokio::test]
    async fn test_recompute_heals_drift() {
        let storage = product_storage().await;
        storage
            .with_transaction(TxMode::Immediate, |tx| {
                tx.execute("UPDATE products SET current_stock = 99999 WHERE id = 1", [])?;
                let healed = StockEngine::recompute_and_heal(tx, 1)?;
                assert_eq!(healed, Quantity(10000));
                Ok(())
            })
            .await
            .unwrap();
    }
}
