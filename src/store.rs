//! SQLite-backed ledger store
//!
//! - WAL mode so settlement reads never wait on a writer's fsync
//! - One connection behind an async mutex; every component holds a cheap `Store` clone
//! - Multi-statement mutations go through `with_tx`, which commits on `Ok`,
//!   rolls back on `Err`, and releases the connection on every exit path
//! - Uniqueness of register keys and match-fee charges is enforced by the schema

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::LedgerResult;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

-- Tournament registry (owned upstream; mirrored here for fee resolution)
CREATE TABLE IF NOT EXISTS tournaments (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    registration_fee TEXT NOT NULL DEFAULT '0',
    match_fee TEXT NOT NULL DEFAULT '0'
);

CREATE TABLE IF NOT EXISTS zones (
    id INTEGER PRIMARY KEY,
    tournament_id INTEGER NOT NULL REFERENCES tournaments(id),
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS team_zone_fees (
    team_id INTEGER NOT NULL,
    zone_id INTEGER NOT NULL REFERENCES zones(id),
    match_fee TEXT NOT NULL,
    PRIMARY KEY (team_id, zone_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS registers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    supervisor_id INTEGER NOT NULL,
    register_date TEXT NOT NULL,
    venue_id INTEGER NOT NULL,
    sub_venue_id INTEGER,
    tournament_id INTEGER,
    shift_id TEXT,
    closed_at TEXT,
    closed_by INTEGER,
    posted_at TEXT,
    posted_by INTEGER,
    declared_cash TEXT,
    computed_cash TEXT,
    voided INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- One live register per (supervisor, day, venue); voided rows free the key
CREATE UNIQUE INDEX IF NOT EXISTS ux_registers_key
    ON registers(supervisor_id, register_date, venue_id) WHERE voided = 0;

CREATE INDEX IF NOT EXISTS idx_registers_date
    ON registers(register_date, id);

-- Match registry (owned upstream); register_id is set on assignment
CREATE TABLE IF NOT EXISTS matches (
    id INTEGER PRIMARY KEY,
    zone_id INTEGER NOT NULL,
    team1_id INTEGER NOT NULL,
    team2_id INTEGER NOT NULL,
    kickoff TEXT NOT NULL,
    venue_id INTEGER NOT NULL,
    supervisor_id INTEGER NOT NULL,
    matchday_number INTEGER NOT NULL,
    register_id INTEGER REFERENCES registers(id)
);

CREATE INDEX IF NOT EXISTS idx_matches_register
    ON matches(register_id, id);

CREATE TABLE IF NOT EXISTS register_team_slots (
    register_id INTEGER NOT NULL REFERENCES registers(id),
    team_id INTEGER NOT NULL,
    slot INTEGER NOT NULL,
    PRIMARY KEY (register_id, team_id)
) WITHOUT ROWID;

-- Payments are replaced wholesale per (register, team, type), never incremented
CREATE TABLE IF NOT EXISTS team_payments (
    register_id INTEGER NOT NULL REFERENCES registers(id),
    team_id INTEGER NOT NULL,
    payment_type TEXT NOT NULL,
    amount TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (register_id, team_id, payment_type)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_team_payments_team
    ON team_payments(team_id, payment_type);

CREATE TABLE IF NOT EXISTS team_absences (
    register_id INTEGER NOT NULL REFERENCES registers(id),
    team_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (register_id, team_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS match_fee_charges (
    match_id INTEGER NOT NULL,
    team_id INTEGER NOT NULL,
    register_id INTEGER NOT NULL REFERENCES registers(id),
    amount TEXT NOT NULL,
    tournament_id INTEGER NOT NULL,
    matchday_number INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (match_id, team_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_match_fee_charges_team
    ON match_fee_charges(team_id);

CREATE TABLE IF NOT EXISTS registration_charges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    team_id INTEGER NOT NULL,
    tournament_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_registration_charges_team
    ON registration_charges(team_id);

CREATE TABLE IF NOT EXISTS deposit_charges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    team_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    concept TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deposit_charges_team
    ON deposit_charges(team_id);

CREATE TABLE IF NOT EXISTS register_expenses (
    register_id INTEGER NOT NULL REFERENCES registers(id),
    category TEXT NOT NULL,
    slot INTEGER NOT NULL,
    total TEXT NOT NULL,
    PRIMARY KEY (register_id, category, slot)
) WITHOUT ROWID;

-- Provider invoice registry (owned upstream except pending/status)
CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY,
    origin_date TEXT NOT NULL,
    provider_id INTEGER NOT NULL,
    direction TEXT NOT NULL,
    voucher_type TEXT NOT NULL,
    voucher_number TEXT NOT NULL,
    due_date TEXT,
    subtotal TEXT NOT NULL,
    taxes TEXT NOT NULL,
    total TEXT NOT NULL,
    pending_to_affect TEXT NOT NULL,
    affectation_status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_invoices_provider
    ON invoices(provider_id, origin_date, id);

CREATE TABLE IF NOT EXISTS cash_movements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    origin_date TEXT NOT NULL,
    provider_id INTEGER NOT NULL,
    voucher_type TEXT NOT NULL,
    voucher_number TEXT NOT NULL,
    due_date TEXT,
    cash_amount TEXT NOT NULL,
    check_amount TEXT NOT NULL,
    affected_amount TEXT NOT NULL,
    net_amount TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS affectations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    movement_id INTEGER NOT NULL REFERENCES cash_movements(id) ON DELETE CASCADE,
    invoice_id INTEGER NOT NULL REFERENCES invoices(id),
    amount TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_affectations_movement
    ON affectations(movement_id);
CREATE INDEX IF NOT EXISTS idx_affectations_invoice
    ON affectations(invoice_id);
"#;

/// Shared handle to the ledger database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at `db_path` and apply the schema.
    ///
    /// `":memory:"` gives a private in-memory store, which is what the tests use.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open ledger database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize ledger schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let registers: i64 = conn
            .query_row("SELECT COUNT(*) FROM registers WHERE voided = 0", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
        info!(db_path, registers, "ledger store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one immediate transaction.
    ///
    /// Commits when `f` returns `Ok`; rolls back and returns the original error otherwise.
    pub async fn with_tx<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> LedgerResult<T> + Send,
        T: Send,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback failed after {}", err);
                }
                Err(err)
            }
        }
    }

    /// Run a read-only closure against the connection.
    pub async fn read<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&Connection) -> LedgerResult<T> + Send,
        T: Send,
    {
        let conn = self.conn.lock().await;
        f(&conn)
    }
}
