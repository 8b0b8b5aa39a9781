//! Shared domain types (component §3 of the spec).

use crate::money::{Money, Quantity, UnitType};
use serde::{Deserialize, Serialize};

/// Reserved customer id for walk-in sales. Excluded from the customer
/// ledger and credit logic (I6).
pub const GUEST_CUSTOMER_ID: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    /// Cached; authoritative value is always the ledger SUM (see `balance` module).
    pub balance: Money,
    pub created_at: String,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: i64,
    pub name: String,
    pub balance: Money,
    pub created_at: String,
    pub last_receiving_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub unit_type: UnitType,
    /// Cached; authoritative value is always the stock_movements SUM (see `stock` module).
    pub current_stock: Quantity,
    pub rate_per_unit: Money,
    pub track_inventory: bool,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, crate::errors::EngineError> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "partially_paid" => Ok(InvoiceStatus::PartiallyPaid),
            "paid" => Ok(InvoiceStatus::Paid),
            other => Err(crate::errors::EngineError::Internal(format!(
                "unknown invoice status: {other}"
            ))),
        }
    }

    /// Derives status from grand_total and payment_amount per §4.H:
    /// `remaining <= 0.01 → paid`; `0 < payment_amount < grand_total → partially_paid`; else `pending`.
    pub fn derive(grand_total: Money, payment_amount: Money) -> Self {
        let remaining = grand_total.checked_sub(payment_amount).unwrap_or(Money::ZERO);
        let tolerance = Money::parse("0.01").unwrap();
        if remaining <= tolerance {
            InvoiceStatus::Paid
        } else if payment_amount > Money::ZERO && payment_amount < grand_total {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub bill_number: String,
    pub customer_id: i64,
    pub grand_total: Money,
    pub payment_amount: Money,
    pub remaining_balance: Money,
    pub status: InvoiceStatus,
    pub version: i64,
    pub created_at: String,
}

/// T-iron calculation fields, a structured optional value on an invoice item
/// (Design Notes: "modeled as an optional structured value on the item").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TIronCalc {
    pub pieces: i64,
    pub length_per_piece: Quantity,
    pub total_feet: Quantity,
    pub unit: UnitType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: i64,
    pub invoice_id: i64,
    pub product_id: Option<i64>,
    pub description: Option<String>,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub total_price: Money,
    pub is_misc_item: bool,
    pub is_non_stock_item: bool,
    pub t_iron: Option<TIronCalc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Incoming,
    Outgoing,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Incoming => "incoming",
            PaymentType::Outgoing => "outgoing",
        }
    }
    pub fn from_str(s: &str) -> Result<Self, crate::errors::EngineError> {
        match s {
            "incoming" => Ok(PaymentType::Incoming),
            "outgoing" => Ok(PaymentType::Outgoing),
            other => Err(crate::errors::EngineError::Internal(format!("unknown payment_type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub customer_id: i64,
    pub invoice_id: Option<i64>,
    pub amount: Money,
    pub method: String,
    pub channel_id: Option<i64>,
    pub date: String,
    pub time: String,
    pub payment_type: PaymentType,
    /// Human-facing code, e.g. `"PAY-000123"` or `"PAY-000123-2"` for a FIFO sub-allocation.
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicePaymentAllocation {
    pub id: i64,
    pub payment_id: i64,
    pub invoice_id: i64,
    pub allocated_amount: Money,
    pub allocation_order: i64,
    pub previous_balance: Money,
    pub new_balance: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Debit,
    Credit,
    Adjustment,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::Debit => "debit",
            LedgerEntryType::Credit => "credit",
            LedgerEntryType::Adjustment => "adjustment",
        }
    }
    pub fn from_str(s: &str) -> Result<Self, crate::errors::EngineError> {
        match s {
            "debit" => Ok(LedgerEntryType::Debit),
            "credit" => Ok(LedgerEntryType::Credit),
            "adjustment" => Ok(LedgerEntryType::Adjustment),
            other => Err(crate::errors::EngineError::Internal(format!("unknown ledger entry_type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerLedgerEntry {
    pub id: i64,
    pub customer_id: i64,
    pub entry_type: LedgerEntryType,
    pub transaction_type: String,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub reference_number: Option<String>,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashFlowDirection {
    Incoming,
    Outgoing,
}

impl CashFlowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashFlowDirection::Incoming => "incoming",
            CashFlowDirection::Outgoing => "outgoing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub date: String,
    pub time: String,
    pub direction: CashFlowDirection,
    pub category: String,
    pub amount: Money,
    pub payment_method: String,
    pub payment_channel_id: Option<i64>,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockMovementType {
    In,
    Out,
    Adjustment,
}

impl StockMovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockMovementType::In => "in",
            StockMovementType::Out => "out",
            StockMovementType::Adjustment => "adjustment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: i64,
    pub product_id: i64,
    pub movement_type: StockMovementType,
    /// Always stored positive; direction lives in `movement_type`.
    pub quantity: Quantity,
    pub previous_stock: Quantity,
    pub new_stock: Quantity,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub reference_number: Option<String>,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementType {
    Ledger,
    Cash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Return {
    pub id: i64,
    pub return_number: String,
    pub original_invoice_id: Option<i64>,
    pub settlement_type: SettlementType,
    pub settlement_amount: Money,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnItem {
    pub id: i64,
    pub return_id: i64,
    pub invoice_item_id: i64,
    pub product_id: Option<i64>,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Cash,
    Bank,
    Cheque,
    Card,
    Upi,
    Online,
    MobileMoney,
    Other,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Cash => "cash",
            ChannelType::Bank => "bank",
            ChannelType::Cheque => "cheque",
            ChannelType::Card => "card",
            ChannelType::Upi => "upi",
            ChannelType::Online => "online",
            ChannelType::MobileMoney => "mobile_money",
            ChannelType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChannel {
    pub id: i64,
    pub name: String,
    pub channel_type: ChannelType,
    pub is_active: bool,
}

/// Maps a free-form payment method string to its canonical channel type
/// (spec §6 "Payment method → channel mapping").
pub fn method_to_channel_type(method: &str) -> ChannelType {
    match method.to_lowercase().as_str() {
        "cash" => ChannelType::Cash,
        "bank" | "transfer" | "wire" => ChannelType::Bank,
        "cheque" | "check" => ChannelType::Cheque,
        "card" | "credit_card" | "debit_card" => ChannelType::Card,
        "upi" | "jazzcash" | "easypaisa" => ChannelType::MobileMoney,
        "online" | "digital" => ChannelType::Online,
        _ => ChannelType::Other,
    }
}
