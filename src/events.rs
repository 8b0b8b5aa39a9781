//! Event emitter (component K).
//!
//! A closed set of domain events broadcast over a `tokio::sync::broadcast`
//! channel so a host application can drive UI refreshes or audit hooks
//! without the engine knowing anything about its subscribers. Replaces the
//! teacher's untyped pub/sub invalidation hooks with a typed enum — a
//! listener pattern-matches instead of string-comparing a topic name.

use crate::money::Money;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    InvoiceCreated { invoice_id: i64, customer_id: i64 },
    InvoiceUpdated { invoice_id: i64 },
    InvoiceDeleted { invoice_id: i64 },
    InvoicePaymentReceived { invoice_id: i64, amount: Money },
    PaymentRecorded { payment_id: i64, customer_id: i64 },
    CustomerBalanceUpdated { customer_id: i64, new_balance: Money },
    CustomerLedgerUpdated { customer_id: i64 },
    StockUpdated { product_id: i64 },
    StockMovementCreated { product_id: i64, movement_id: i64 },
    VendorPaymentCreated { vendor_id: i64, payment_id: i64 },
    ProductCreated { product_id: i64 },
    ProductUpdated { product_id: i64 },
    ProductDeleted { product_id: i64 },
}

/// Bounded broadcast bus. A lagging subscriber drops the oldest events
/// rather than applying backpressure to the engine's writers — events are
/// a cache-invalidation/notification signal, not a durable log.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Emits an event. No-op (beyond a trace line) if nobody is listening.
    pub fn emit(&self, event: EngineEvent) {
        if self.sender.send(event.clone()).is_err() {
            tracing::trace!(?event, "emitted with no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
