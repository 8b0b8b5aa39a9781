//! Schema registry (component C).
//!
//! The single source of truth for table DDL and the composite indexes the
//! hot paths need. No other module issues `CREATE`/`ALTER`; tables are
//! created lazily via `Schema::init` and never mutated in place.

use rusqlite::Connection;

const SCHEMA: &str = "
PRAGMA journal_mode=WAL;
PRAGMA foreign_keys=ON;

CREATE TABLE IF NOT EXISTS customers (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    balance     TEXT NOT NULL DEFAULT '0.00',
    created_at  TEXT NOT NULL,
    is_deleted  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS vendors (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    name               TEXT NOT NULL,
    balance            TEXT NOT NULL DEFAULT '0.00',
    created_at         TEXT NOT NULL,
    last_receiving_at  TEXT
);

CREATE TABLE IF NOT EXISTS products (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    name             TEXT NOT NULL,
    unit_type        TEXT NOT NULL,
    current_stock    INTEGER NOT NULL DEFAULT 0,
    rate_per_unit    TEXT NOT NULL DEFAULT '0.00',
    track_inventory  INTEGER NOT NULL DEFAULT 1,
    status           TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS invoices (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    bill_number        TEXT NOT NULL UNIQUE,
    customer_id        INTEGER NOT NULL,
    grand_total        TEXT NOT NULL DEFAULT '0.00',
    payment_amount     TEXT NOT NULL DEFAULT '0.00',
    remaining_balance  TEXT NOT NULL DEFAULT '0.00',
    status             TEXT NOT NULL DEFAULT 'pending',
    version            INTEGER NOT NULL DEFAULT 1,
    created_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS invoice_items (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_id          INTEGER NOT NULL,
    product_id          INTEGER,
    description         TEXT,
    quantity            INTEGER NOT NULL,
    unit_price          TEXT NOT NULL DEFAULT '0.00',
    total_price         TEXT NOT NULL DEFAULT '0.00',
    is_misc_item        INTEGER NOT NULL DEFAULT 0,
    is_non_stock_item   INTEGER NOT NULL DEFAULT 0,
    t_iron_pieces       INTEGER,
    t_iron_length       INTEGER,
    t_iron_total_feet   INTEGER,
    t_iron_unit         TEXT
);

CREATE TABLE IF NOT EXISTS payment_channels (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    is_active    INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS payments (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id   INTEGER NOT NULL,
    invoice_id    INTEGER,
    amount        TEXT NOT NULL DEFAULT '0.00',
    method        TEXT NOT NULL,
    channel_id    INTEGER,
    date          TEXT NOT NULL,
    time          TEXT NOT NULL,
    payment_type  TEXT NOT NULL,
    code          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS invoice_payment_allocations (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    payment_id         INTEGER NOT NULL,
    invoice_id         INTEGER NOT NULL,
    allocated_amount   TEXT NOT NULL,
    allocation_order   INTEGER NOT NULL,
    previous_balance   TEXT NOT NULL,
    new_balance        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customer_ledger_entries (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id       INTEGER NOT NULL,
    entry_type        TEXT NOT NULL,
    transaction_type  TEXT NOT NULL,
    amount            TEXT NOT NULL,
    balance_before    TEXT NOT NULL,
    balance_after     TEXT NOT NULL,
    reference_type    TEXT,
    reference_id      INTEGER,
    reference_number  TEXT,
    date              TEXT NOT NULL,
    time              TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_ledger_entries (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    date                TEXT NOT NULL,
    time                TEXT NOT NULL,
    direction           TEXT NOT NULL,
    category            TEXT NOT NULL,
    amount              TEXT NOT NULL,
    payment_method      TEXT NOT NULL,
    payment_channel_id  INTEGER,
    reference_type      TEXT,
    reference_id        INTEGER
);

CREATE TABLE IF NOT EXISTS stock_movements (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id        INTEGER NOT NULL,
    movement_type     TEXT NOT NULL,
    quantity          INTEGER NOT NULL,
    previous_stock    INTEGER NOT NULL,
    new_stock         INTEGER NOT NULL,
    reference_type    TEXT,
    reference_id      INTEGER,
    reference_number  TEXT,
    date              TEXT NOT NULL,
    time              TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS returns (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    return_number        TEXT NOT NULL UNIQUE,
    original_invoice_id  INTEGER,
    settlement_type      TEXT NOT NULL,
    settlement_amount    TEXT NOT NULL,
    date                 TEXT NOT NULL,
    time                 TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS return_items (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    return_id        INTEGER NOT NULL,
    invoice_item_id  INTEGER NOT NULL,
    product_id       INTEGER,
    quantity         INTEGER NOT NULL,
    unit_price       TEXT NOT NULL,
    amount           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_customer_date ON customer_ledger_entries(customer_id, date);
CREATE INDEX IF NOT EXISTS idx_invoices_customer_date ON invoices(customer_id, created_at);
CREATE INDEX IF NOT EXISTS idx_stock_movements_product_date ON stock_movements(product_id, date);
CREATE INDEX IF NOT EXISTS idx_daily_ledger_date_channel ON daily_ledger_entries(date, payment_channel_id);
CREATE INDEX IF NOT EXISTS idx_payments_invoice ON payments(invoice_id);
CREATE INDEX IF NOT EXISTS idx_payments_customer ON payments(customer_id);
CREATE INDEX IF NOT EXISTS idx_invoice_items_invoice ON invoice_items(invoice_id);
CREATE INDEX IF NOT EXISTS idx_allocations_invoice ON invoice_payment_allocations(invoice_id);
CREATE INDEX IF NOT EXISTS idx_return_items_return ON return_items(return_id);
";

/// Starter payment channels seeded once at schema init, mirroring the way
/// the teacher seeds a Chart of Accounts template at org creation.
const STARTER_CHANNELS: &[(&str, &str)] = &[
    ("Cash", "cash"),
    ("Bank Transfer", "bank"),
    ("Cheque", "cheque"),
    ("Card", "card"),
    ("UPI", "upi"),
    ("Online", "online"),
    ("Other", "other"),
];

pub struct Schema;

impl Schema {
    /// Applies the full DDL and seeds starter payment channels. Idempotent.
    pub fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(SCHEMA)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM payment_channels", [], |r| r.get(0))?;
        if count == 0 {
            for (name, channel_type) in STARTER_CHANNELS {
                conn.execute(
                    "INSERT INTO payment_channels (name, channel_type, is_active) VALUES (?1, ?2, 1)",
                    rusqlite::params![name, channel_type],
                )?;
            }
        }
        Ok(())
    }
}
