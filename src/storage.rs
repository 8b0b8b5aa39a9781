//! Storage adapter (component B).
//!
//! Wraps a single `rusqlite::Connection` behind an async mutex: the mutex
//! acquisition is the engine's single-writer serialization point, and
//! holding it across `await` means lock contention suspends the waiting
//! task instead of spinning. Busy/locked errors from SQLite are retried
//! internally with exponential backoff before being surfaced as
//! `EngineError::LockTimeout`.

use crate::config::RetryConfig;
use crate::errors::{EngineError, EngineResult};
use crate::schema::Schema;
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    Deferred,
    Immediate,
}

impl TxMode {
    fn behavior(self) -> TransactionBehavior {
        match self {
            TxMode::Deferred => TransactionBehavior::Deferred,
            TxMode::Immediate => TransactionBehavior::Immediate,
        }
    }
}

pub struct Storage {
    conn: Mutex<Connection>,
    retry: RetryConfig,
}

impl Storage {
    pub fn open(path: &Path, busy_timeout_ms: u64, retry: RetryConfig) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
        Schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry,
        })
    }

    pub fn open_in_memory(retry: RetryConfig) -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        Schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry,
        })
    }

    /// Runs `f` inside a transaction of the given mode, retrying the whole
    /// attempt (not just the `BEGIN`) up to `transaction_retry.max` times on
    /// `SQLITE_BUSY`/`SQLITE_LOCKED`, with exponential backoff via
    /// `tokio::time::sleep` (a real suspension point — never a spin loop).
    /// Commits on `Ok`, rolls back on `Err`. All-or-nothing: partial writes
    /// from a failed attempt never survive to the next retry.
    pub async fn with_transaction<T, F>(&self, mode: TxMode, f: F) -> EngineResult<T>
    where
        F: Fn(&rusqlite::Transaction) -> EngineResult<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut guard = self.conn.lock().await;
            let result = (|| -> EngineResult<T> {
                let tx = guard.transaction_with_behavior(mode.behavior())?;
                let out = f(&tx)?;
                tx.commit()?;
                Ok(out)
            })();
            drop(guard);

            match result {
                Ok(v) => return Ok(v),
                Err(EngineError::LockTimeout) if attempt <= self.retry.max => {
                    tracing::warn!(attempt, "storage busy, retrying after backoff");
                    tokio::time::sleep(self.retry.backoff_for_attempt(attempt)).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read-only convenience wrapper — runs `f` against a snapshot without
    /// opening a write transaction.
    pub async fn with_read<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: Fn(&Connection) -> EngineResult<T>,
    {
        let guard = self.conn.lock().await;
        f(&guard)
    }
}
