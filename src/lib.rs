//! Transactional bookkeeping engine for a steel/hardware trading ERP.
//!
//! Customers, vendors, products with weight/length-aware units, invoices
//! with partial payments and returns, vendor stock receiving, and the
//! double-entry-style customer and daily cash-flow ledgers that keep all
//! of it consistent. The engine owns a single SQLite connection; callers
//! get one through [`Engine::open`] or [`Engine::open_in_memory`] rather
//! than through a process-global store.

pub mod balance;
pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod invoice;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod returns;
pub mod schema;
pub mod stock;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use errors::{EngineError, EngineResult};
pub use events::EngineEvent;
pub use invoice::{ForceDeleteMode, NewInvoiceItem};
pub use money::{Money, Quantity, UnitType};
pub use returns::ReturnLine;
pub use types::{
    CashFlowDirection, ChannelType, Customer, GUEST_CUSTOMER_ID, Invoice, InvoiceItem, InvoiceStatus,
    LedgerEntryType, Payment, PaymentChannel, PaymentType, Product, Return, ReturnItem, SettlementType,
    StockMovement, StockMovementType, TIronCalc, Vendor,
};
