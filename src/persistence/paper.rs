//! SQLite persistence for the paper venue.
//!
//! Persists simulated account state so paper trading survives restarts:
//! - Cash balance, fee and funding totals
//! - Open positions and per-symbol leverage settings
//! - Fill and funding settlement history

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Persisted paper position.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPaperPosition {
    pub symbol: String,
    /// Signed size (negative = short)
    pub size: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Persisted paper account.
#[derive(Debug, Clone)]
pub struct PersistedPaperState {
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub total_fees: Decimal,
    pub total_funding: Decimal,
    pub realized_pnl: Decimal,
    pub order_count: u64,
    /// Last funding settlement hour (ms)
    pub last_funding_ms: Option<i64>,
    pub positions: HashMap<String, PersistedPaperPosition>,
    pub leverage: HashMap<String, u32>,
    pub last_saved: DateTime<Utc>,
}

/// SQLite store for the paper venue.
pub struct PaperStore {
    conn: Connection,
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl PaperStore {
    /// Open the store, initializing the database if needed.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("[PERSISTENCE] Paper store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory store, used by tests and throwaway sessions.
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Account (singleton row)
            CREATE TABLE IF NOT EXISTS paper_account (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                initial_balance TEXT NOT NULL,
                balance TEXT NOT NULL,
                total_fees TEXT NOT NULL,
                total_funding TEXT NOT NULL,
                order_count INTEGER NOT NULL,
                last_funding_ms INTEGER,
                last_saved TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS paper_positions (
                symbol TEXT PRIMARY KEY,
                size TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                opened_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS paper_leverage (
                symbol TEXT PRIMARY KEY,
                leverage INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                order_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                price TEXT NOT NULL,
                fee TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fills_symbol ON fills(symbol);

            CREATE TABLE IF NOT EXISTS funding_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time_ms INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                rate TEXT NOT NULL,
                amount TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_funding_time ON funding_events(time_ms);
            "#,
        )?;

        // Migration: realized PnL column added after the first schema
        let _ = self.conn.execute(
            "ALTER TABLE paper_account ADD COLUMN realized_pnl TEXT NOT NULL DEFAULT '0'",
            [],
        );

        debug!("Paper store schema initialized");
        Ok(())
    }

    /// Save the complete paper account.
    pub fn save_state(&self, state: &PersistedPaperState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO paper_account (id, initial_balance, balance, total_fees, total_funding,
                                       order_count, last_funding_ms, last_saved, realized_pnl)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                initial_balance = ?1,
                balance = ?2,
                total_fees = ?3,
                total_funding = ?4,
                order_count = ?5,
                last_funding_ms = ?6,
                last_saved = ?7,
                realized_pnl = ?8
            "#,
            params![
                state.initial_balance.to_string(),
                state.balance.to_string(),
                state.total_fees.to_string(),
                state.total_funding.to_string(),
                state.order_count,
                state.last_funding_ms,
                state.last_saved.to_rfc3339(),
                state.realized_pnl.to_string(),
            ],
        )?;

        tx.execute("DELETE FROM paper_positions", [])?;
        for pos in state.positions.values() {
            tx.execute(
                "INSERT INTO paper_positions (symbol, size, entry_price, opened_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    pos.symbol,
                    pos.size.to_string(),
                    pos.entry_price.to_string(),
                    pos.opened_at.to_rfc3339(),
                ],
            )?;
        }

        tx.execute("DELETE FROM paper_leverage", [])?;
        for (symbol, leverage) in &state.leverage {
            tx.execute(
                "INSERT INTO paper_leverage (symbol, leverage) VALUES (?1, ?2)",
                params![symbol, leverage],
            )?;
        }

        tx.commit()?;

        debug!(
            balance = %state.balance,
            positions = state.positions.len(),
            "Paper state saved to database"
        );
        Ok(())
    }

    /// Load the paper account, if one was saved.
    pub fn load_state(&self) -> Result<Option<PersistedPaperState>> {
        type AccountRow = (String, String, String, String, u64, Option<i64>, String, String);

        let row: Option<AccountRow> = self
            .conn
            .query_row(
                r#"
                SELECT initial_balance, balance, total_fees, total_funding,
                       order_count, last_funding_ms, last_saved, realized_pnl
                FROM paper_account WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((initial, balance, fees, funding, order_count, last_funding_ms, last_saved, realized)) =
            row
        else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT symbol, size, entry_price, opened_at FROM paper_positions")?;
        let positions: HashMap<String, PersistedPaperPosition> = stmt
            .query_map([], |row| {
                let symbol: String = row.get(0)?;
                Ok((
                    symbol.clone(),
                    PersistedPaperPosition {
                        symbol,
                        size: parse_decimal(&row.get::<_, String>(1)?),
                        entry_price: parse_decimal(&row.get::<_, String>(2)?),
                        opened_at: parse_time(&row.get::<_, String>(3)?),
                    },
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT symbol, leverage FROM paper_leverage")?;
        let leverage: HashMap<String, u32> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let state = PersistedPaperState {
            initial_balance: parse_decimal(&initial),
            balance: parse_decimal(&balance),
            total_fees: parse_decimal(&fees),
            total_funding: parse_decimal(&funding),
            realized_pnl: parse_decimal(&realized),
            order_count,
            last_funding_ms,
            positions,
            leverage,
            last_saved: parse_time(&last_saved),
        };

        info!(
            balance = %state.balance,
            positions = state.positions.len(),
            last_saved = %state.last_saved,
            "[PERSISTENCE] Loaded paper state from database"
        );

        Ok(Some(state))
    }

    /// Record a fill.
    pub fn record_fill(
        &self,
        order_id: &str,
        symbol: &str,
        side: &str,
        size: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO fills (timestamp, order_id, symbol, side, size, price, fee)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                Utc::now().to_rfc3339(),
                order_id,
                symbol,
                side,
                size.to_string(),
                price.to_string(),
                fee.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Record a funding settlement.
    pub fn record_funding_event(
        &self,
        time_ms: i64,
        symbol: &str,
        rate: Decimal,
        amount: Decimal,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO funding_events (time_ms, symbol, rate, amount) VALUES (?1, ?2, ?3, ?4)",
            params![time_ms, symbol, rate.to_string(), amount.to_string()],
        )?;
        Ok(())
    }

    /// Total funding per symbol.
    pub fn funding_by_symbol(&self) -> Result<HashMap<String, Decimal>> {
        let mut stmt = self
            .conn
            .prepare("SELECT symbol, amount FROM funding_events")?;

        let mut totals: HashMap<String, Decimal> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for (symbol, amount) in rows.filter_map(|r| r.ok()) {
            *totals.entry(symbol).or_default() += parse_decimal(&amount);
        }
        Ok(totals)
    }

    /// Number of recorded fills.
    pub fn fill_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fills", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_state() -> PersistedPaperState {
        let mut positions = HashMap::new();
        positions.insert(
            "BTC".to_string(),
            PersistedPaperPosition {
                symbol: "BTC".to_string(),
                size: dec!(0.01),
                entry_price: dec!(60000),
                opened_at: Utc::now(),
            },
        );
        positions.insert(
            "ZK".to_string(),
            PersistedPaperPosition {
                symbol: "ZK".to_string(),
                size: dec!(-1500),
                entry_price: dec!(0.15),
                opened_at: Utc::now(),
            },
        );

        let mut leverage = HashMap::new();
        leverage.insert("BTC".to_string(), 3);
        leverage.insert("ZK".to_string(), 3);

        PersistedPaperState {
            initial_balance: dec!(1000),
            balance: dec!(998.5),
            total_fees: dec!(1.5),
            total_funding: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            order_count: 2,
            last_funding_ms: Some(3_600_000),
            positions,
            leverage,
            last_saved: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_state() {
        let store = PaperStore::in_memory().unwrap();
        assert!(store.load_state().unwrap().is_none());

        store.save_state(&sample_state()).unwrap();

        let loaded = store.load_state().unwrap().unwrap();
        assert_eq!(loaded.balance, dec!(998.5));
        assert_eq!(loaded.positions.len(), 2);
        assert_eq!(loaded.positions["ZK"].size, dec!(-1500));
        assert_eq!(loaded.leverage["BTC"], 3);
        assert_eq!(loaded.last_funding_ms, Some(3_600_000));
    }

    #[test]
    fn test_save_replaces_closed_positions() {
        let store = PaperStore::in_memory().unwrap();
        let mut state = sample_state();
        store.save_state(&state).unwrap();

        state.positions.remove("ZK");
        store.save_state(&state).unwrap();

        let loaded = store.load_state().unwrap().unwrap();
        assert_eq!(loaded.positions.len(), 1);
        assert!(loaded.positions.contains_key("BTC"));
    }

    #[test]
    fn test_funding_and_fill_history() {
        let store = PaperStore::in_memory().unwrap();

        store.record_funding_event(1, "ZK", dec!(0.0001), dec!(0.02)).unwrap();
        store.record_funding_event(2, "ZK", dec!(0.0001), dec!(0.03)).unwrap();
        store.record_funding_event(2, "BTC", dec!(0.0001), dec!(-0.06)).unwrap();
        store
            .record_fill("1", "BTC", "BUY", dec!(0.01), dec!(60000), dec!(0.27))
            .unwrap();

        let totals = store.funding_by_symbol().unwrap();
        assert_eq!(totals["ZK"], dec!(0.05));
        assert_eq!(totals["BTC"], dec!(-0.06));
        assert_eq!(store.fill_count().unwrap(), 1);
    }
}
