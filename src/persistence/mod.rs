//! Persisted portfolio ledger.
//!
//! A single JSON document holding NAV history, last known positions, observed
//! funding rates, rebalance events, commission records and settled funding.
//! Every field defaults when missing so older files keep loading. Saves are
//! atomic: the document is written to a temp file and renamed over the old one.
//!
//! The paper venue keeps its own SQLite store in [`paper`].

pub mod paper;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::exchange::FundingPayment;

/// Funding rate samples kept per symbol.
const MAX_FUNDING_SAMPLES: usize = 1000;

/// Rebalance events kept in the ledger.
const MAX_REBALANCE_EVENTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavRecord {
    pub date: DateTime<Utc>,
    pub nav: Decimal,
}

/// One fill and the fee paid for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub date: DateTime<Utc>,
    pub symbol: String,
    pub side: String,
    pub size: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub commission: Option<Decimal>,
    #[serde(default)]
    pub commission_token: Option<String>,
    #[serde(default)]
    pub commission_usd: Option<Decimal>,
    #[serde(default, rename = "orderId")]
    pub order_id: Option<String>,
    #[serde(default, rename = "navAfterCommission")]
    pub nav_after_commission: Decimal,
}

/// One settled funding payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingPaidRecord {
    pub time: i64,
    pub coin: String,
    pub funding: Decimal,
    #[serde(default, rename = "fundingUsd")]
    pub funding_usd: Option<Decimal>,
    #[serde(default, rename = "endTime")]
    pub end_time: i64,
}

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioLedger {
    pub nav_history: Vec<NavRecord>,
    /// Symbol -> signed size, open positions only
    pub positions: BTreeMap<String, Decimal>,
    /// Symbol -> observed hourly funding rates, oldest first
    pub funding_history: BTreeMap<String, Vec<Decimal>>,
    pub rebalance_events: Vec<serde_json::Value>,
    pub commission_history: Vec<CommissionRecord>,
    pub funding_paid_history: Vec<FundingPaidRecord>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Headline numbers from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub first_nav: Option<Decimal>,
    pub last_nav: Option<Decimal>,
    pub nav_records: usize,
    pub open_positions: usize,
    pub trades: usize,
    pub total_commission_usd: Decimal,
    pub total_funding_usd: Decimal,
    pub rebalance_events: usize,
}

/// File-backed owner of the [`PortfolioLedger`].
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    ledger: PortfolioLedger,
}

impl StateStore {
    /// Load the ledger at `path`, starting empty when the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ledger = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read state file {:?}", path))?;
            let ledger: PortfolioLedger = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse state file {:?}", path))?;
            info!(
                path = ?path,
                nav_records = ledger.nav_history.len(),
                positions = ledger.positions.len(),
                "[PERSISTENCE] Loaded portfolio state"
            );
            ledger
        } else {
            info!(path = ?path, "[PERSISTENCE] No state file, starting fresh");
            PortfolioLedger::default()
        };

        Ok(Self { path, ledger })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    /// Write the ledger atomically.
    pub fn save(&mut self) -> Result<()> {
        self.ledger.last_updated = Some(Utc::now());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(&self.ledger).context("Failed to serialize state")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file {:?}", self.path))?;

        debug!(path = ?self.path, "[PERSISTENCE] State saved");
        Ok(())
    }

    pub fn add_nav_record(&mut self, nav: Decimal) {
        self.ledger.nav_history.push(NavRecord {
            date: Utc::now(),
            nav,
        });
    }

    /// Replace the stored positions, dropping zero sizes.
    pub fn update_positions<'a, I>(&mut self, positions: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Decimal)>,
    {
        self.ledger.positions = positions
            .into_iter()
            .filter(|(_, size)| !size.is_zero())
            .map(|(symbol, size)| (symbol.clone(), *size))
            .collect();
    }

    pub fn add_funding_rates(&mut self, rates: &HashMap<String, Decimal>) {
        for (symbol, rate) in rates {
            let history = self.ledger.funding_history.entry(symbol.clone()).or_default();
            history.push(*rate);
            if history.len() > MAX_FUNDING_SAMPLES {
                let excess = history.len() - MAX_FUNDING_SAMPLES;
                history.drain(..excess);
            }
        }
    }

    pub fn add_commission_record(&mut self, record: CommissionRecord) {
        self.ledger.commission_history.push(record);
    }

    /// Append settled funding, skipping payments already recorded (same time and coin).
    ///
    /// Returns how many were added.
    pub fn add_funding_records(&mut self, payments: &[FundingPayment], end_time: i64) -> usize {
        let mut seen: HashSet<(i64, String)> = self
            .ledger
            .funding_paid_history
            .iter()
            .map(|r| (r.time, r.coin.clone()))
            .collect();

        let mut added = 0;
        for payment in payments {
            if !seen.insert((payment.time, payment.coin.clone())) {
                continue;
            }
            self.ledger.funding_paid_history.push(FundingPaidRecord {
                time: payment.time,
                coin: payment.coin.clone(),
                funding: payment.usdc,
                funding_usd: Some(payment.usdc),
                end_time,
            });
            added += 1;
        }
        added
    }

    pub fn add_rebalance_event(&mut self, event: serde_json::Value) {
        self.ledger.rebalance_events.push(event);
        if self.ledger.rebalance_events.len() > MAX_REBALANCE_EVENTS {
            let excess = self.ledger.rebalance_events.len() - MAX_REBALANCE_EVENTS;
            self.ledger.rebalance_events.drain(..excess);
        }
    }

    pub fn last_nav(&self) -> Option<Decimal> {
        self.ledger.nav_history.last().map(|r| r.nav)
    }

    pub fn open_positions(&self) -> &BTreeMap<String, Decimal> {
        &self.ledger.positions
    }

    /// Time of the latest recorded funding payment.
    pub fn last_funding_time(&self) -> Option<i64> {
        self.ledger.funding_paid_history.iter().map(|r| r.time).max()
    }

    pub fn total_commission_usd(&self) -> Decimal {
        self.ledger
            .commission_history
            .iter()
            .filter_map(|r| r.commission_usd)
            .sum()
    }

    pub fn total_funding_usd(&self) -> Decimal {
        self.ledger
            .funding_paid_history
            .iter()
            .map(|r| r.funding_usd.unwrap_or(r.funding))
            .sum()
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            first_nav: self.ledger.nav_history.first().map(|r| r.nav),
            last_nav: self.last_nav(),
            nav_records: self.ledger.nav_history.len(),
            open_positions: self.ledger.positions.len(),
            trades: self.ledger.commission_history.len(),
            total_commission_usd: self.total_commission_usd(),
            total_funding_usd: self.total_funding_usd(),
            rebalance_events: self.ledger.rebalance_events.len(),
        }
    }
}
