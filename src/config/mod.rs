//! Configuration management for the hedge ratio keeper.
//!
//! Loads settings from an optional config file and `HRK__`-prefixed
//! environment variables (e.g. `HRK__STRATEGY__RATIO_TARGET=2.0`).

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::exchange::hyperliquid::MAINNET_API_URL;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Venue endpoints and account
    #[serde(default)]
    pub hyperliquid: HyperliquidConfig,
    /// Target ratio, reserve and symbols
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Required leverage per side
    #[serde(default)]
    pub leverage: LeverageConfig,
    /// Settlement waits inside the compliance protocol
    #[serde(default)]
    pub api_delays: ApiDelaysConfig,
    /// Loop timing, state files and paper venue
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperliquidConfig {
    /// REST base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Account to read for live status (read-only)
    #[serde(default)]
    pub account_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Symbol of the long core exposure
    #[serde(default = "default_core_symbol")]
    pub core_symbol: String,
    /// Ordered basket of short hedge symbols
    #[serde(default = "default_hedge_symbols")]
    pub hedge_symbols: Vec<String>,
    /// Target core margin / hedge margin
    #[serde(default = "default_ratio_target")]
    pub ratio_target: Decimal,
    /// Lower bound of the acceptable ratio band
    #[serde(default = "default_ratio_low")]
    pub ratio_low: Decimal,
    /// Upper bound of the acceptable ratio band
    #[serde(default = "default_ratio_high")]
    pub ratio_high: Decimal,
    /// Fraction of NAV held back from trading (0.0-1.0)
    #[serde(default = "default_reserve_percent")]
    pub reserve_percent: Decimal,
    /// Relative ratio deviation that triggers a rebalance (0.0-1.0)
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: Decimal,
    /// NAV at strategy start, used as the PnL baseline
    #[serde(default)]
    pub start_nav: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageConfig {
    #[serde(default = "default_leverage")]
    pub core: u32,
    #[serde(default = "default_leverage")]
    pub hedge: u32,
    /// Upper bound accepted for either side
    #[serde(default = "default_max_leverage")]
    pub max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDelaysConfig {
    /// Seconds to wait after closing positions
    #[serde(default = "default_order_processing_delay")]
    pub order_processing: u64,
    /// Seconds to wait after updating leverage
    #[serde(default = "default_leverage_update_delay")]
    pub leverage_update: u64,
    /// Seconds to wait before re-reading positions after reopening
    #[serde(default = "default_position_check_delay")]
    pub position_check: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds between trading cycles
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// JSON ledger of NAV, positions, commissions and funding
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// SQLite file backing the paper venue
    #[serde(default = "default_paper_db")]
    pub paper_db: String,
    /// Starting balance of a fresh paper account in USD
    #[serde(default = "default_paper_initial_balance")]
    pub paper_initial_balance: Decimal,
    /// Paper taker fee rate
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
}

/// Immutable strategy parameters, loaded once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetParams {
    pub core_symbol: String,
    pub hedge_symbols: Vec<String>,
    pub ratio_target: Decimal,
    pub reserve_percent: Decimal,
    pub rebalance_threshold: Decimal,
    pub leverage_core: u32,
    pub leverage_hedge: u32,
}

impl TargetParams {
    /// Core symbol followed by the hedge symbols in configured order.
    pub fn tracked_symbols(&self) -> Vec<String> {
        std::iter::once(self.core_symbol.clone())
            .chain(self.hedge_symbols.iter().cloned())
            .collect()
    }

    pub fn is_hedge(&self, symbol: &str) -> bool {
        self.hedge_symbols.iter().any(|s| s == symbol)
    }

    /// Configured leverage for a tracked symbol.
    pub fn expected_leverage(&self, symbol: &str) -> Option<u32> {
        if symbol == self.core_symbol {
            Some(self.leverage_core)
        } else if self.is_hedge(symbol) {
            Some(self.leverage_hedge)
        } else {
            None
        }
    }

    /// NAV remaining after the reserve is held back.
    pub fn tradable(&self, nav: Decimal) -> Decimal {
        nav * (Decimal::ONE - self.reserve_percent)
    }
}

/// Settlement waits observed by the compliance protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolDelays {
    pub order_processing: Duration,
    pub leverage_update: Duration,
    pub position_check: Duration,
}

impl ProtocolDelays {
    /// No waiting at all.
    pub fn none() -> Self {
        Self {
            order_processing: Duration::ZERO,
            leverage_update: Duration::ZERO,
            position_check: Duration::ZERO,
        }
    }
}

// Default value functions
fn default_base_url() -> String {
    MAINNET_API_URL.to_string()
}

fn default_core_symbol() -> String {
    "BTC".to_string()
}

fn default_hedge_symbols() -> Vec<String> {
    vec!["ZK".to_string(), "STRK".to_string()]
}

fn default_ratio_target() -> Decimal {
    Decimal::new(20, 1) // 2.0
}

fn default_ratio_low() -> Decimal {
    Decimal::new(18, 1) // 1.8
}

fn default_ratio_high() -> Decimal {
    Decimal::new(22, 1) // 2.2
}

fn default_reserve_percent() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_rebalance_threshold() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_leverage() -> u32 {
    3
}

fn default_max_leverage() -> u32 {
    50
}

fn default_order_processing_delay() -> u64 {
    3
}

fn default_leverage_update_delay() -> u64 {
    2
}

fn default_position_check_delay() -> u64 {
    1
}

fn default_cycle_interval() -> u64 {
    300
}

fn default_state_file() -> String {
    "data/portfolio_state.json".to_string()
}

fn default_paper_db() -> String {
    "data/paper_trading.db".to_string()
}

fn default_paper_initial_balance() -> Decimal {
    Decimal::new(1000, 0) // $1000
}

fn default_fee_rate() -> Decimal {
    Decimal::new(45, 5) // 0.00045 (0.045% taker)
}

/// Hard ceiling on leverage for either side.
const LEVERAGE_CEILING: u32 = 50;

/// Longest accepted settlement wait in seconds.
const MAX_DELAY_SECS: u64 = 30;

impl Config {
    /// Load configuration from `.env`, an optional config file and environment variables.
    ///
    /// Without an explicit path, `config.{toml,json,yaml}` in the working
    /// directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("config").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("HRK")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("strategy.hedge_symbols"),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values, reporting every violation at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let s = &self.strategy;

        let ratio_min = Decimal::new(1, 1);
        let ratio_max = Decimal::new(10, 0);
        for (name, value) in [
            ("ratio_target", s.ratio_target),
            ("ratio_low", s.ratio_low),
            ("ratio_high", s.ratio_high),
        ] {
            if value < ratio_min || value > ratio_max {
                errors.push(format!("{} must be between 0.1 and 10 (got {})", name, value));
            }
        }
        if !(s.ratio_low <= s.ratio_target && s.ratio_target <= s.ratio_high) {
            errors.push(format!(
                "ratio_low <= ratio_target <= ratio_high violated ({} / {} / {})",
                s.ratio_low, s.ratio_target, s.ratio_high
            ));
        }

        if s.reserve_percent <= Decimal::ZERO || s.reserve_percent >= Decimal::ONE {
            errors.push(format!(
                "reserve_percent must be between 0 and 1 exclusive (got {})",
                s.reserve_percent
            ));
        }
        if s.rebalance_threshold <= Decimal::ZERO || s.rebalance_threshold >= Decimal::ONE {
            errors.push(format!(
                "rebalance_threshold must be between 0 and 1 exclusive (got {})",
                s.rebalance_threshold
            ));
        }

        if s.core_symbol.trim().is_empty() {
            errors.push("core_symbol must not be empty".to_string());
        }
        if s.hedge_symbols.is_empty() {
            errors.push("hedge_symbols must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for symbol in &s.hedge_symbols {
            if symbol.trim().is_empty() {
                errors.push("hedge_symbols must not contain empty symbols".to_string());
            } else if !seen.insert(symbol.as_str()) {
                errors.push(format!("hedge symbol {} is listed twice", symbol));
            }
            if *symbol == s.core_symbol {
                errors.push(format!("{} cannot be both core and hedge", symbol));
            }
        }

        let l = &self.leverage;
        if l.max > LEVERAGE_CEILING {
            errors.push(format!("leverage.max must be at most {} (got {})", LEVERAGE_CEILING, l.max));
        }
        for (name, value) in [("core", l.core), ("hedge", l.hedge)] {
            if value < 1 || value > l.max {
                errors.push(format!(
                    "leverage.{} must be between 1 and {} (got {})",
                    name, l.max, value
                ));
            }
        }

        let d = &self.api_delays;
        for (name, value) in [
            ("order_processing", d.order_processing),
            ("leverage_update", d.leverage_update),
            ("position_check", d.position_check),
        ] {
            if value > MAX_DELAY_SECS {
                errors.push(format!(
                    "api_delays.{} must be at most {}s (got {})",
                    name, MAX_DELAY_SECS, value
                ));
            }
        }

        let r = &self.runtime;
        if r.cycle_interval_secs == 0 {
            errors.push("cycle_interval_secs must be positive".to_string());
        }
        if r.paper_initial_balance <= Decimal::ZERO {
            errors.push("paper_initial_balance must be positive".to_string());
        }
        if r.fee_rate < Decimal::ZERO || r.fee_rate >= Decimal::new(1, 2) {
            errors.push(format!("fee_rate must be in [0, 0.01) (got {})", r.fee_rate));
        }

        if let Some(address) = &self.hyperliquid.account_address {
            if !address.is_empty() && !address.starts_with("0x") {
                errors.push("account_address must start with 0x".to_string());
            }
        }

        anyhow::ensure!(
            errors.is_empty(),
            "Invalid configuration:\n  - {}",
            errors.join("\n  - ")
        );
        Ok(())
    }

    /// Strategy parameters owned by the orchestrator.
    pub fn target_params(&self) -> TargetParams {
        TargetParams {
            core_symbol: self.strategy.core_symbol.clone(),
            hedge_symbols: self.strategy.hedge_symbols.clone(),
            ratio_target: self.strategy.ratio_target,
            reserve_percent: self.strategy.reserve_percent,
            rebalance_threshold: self.strategy.rebalance_threshold,
            leverage_core: self.leverage.core,
            leverage_hedge: self.leverage.hedge,
        }
    }

    pub fn protocol_delays(&self) -> ProtocolDelays {
        ProtocolDelays {
            order_processing: Duration::from_secs(self.api_delays.order_processing),
            leverage_update: Duration::from_secs(self.api_delays.leverage_update),
            position_check: Duration::from_secs(self.api_delays.position_check),
        }
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.runtime.cycle_interval_secs)
    }
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            account_address: None,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            core_symbol: default_core_symbol(),
            hedge_symbols: default_hedge_symbols(),
            ratio_target: default_ratio_target(),
            ratio_low: default_ratio_low(),
            ratio_high: default_ratio_high(),
            reserve_percent: default_reserve_percent(),
            rebalance_threshold: default_rebalance_threshold(),
            start_nav: None,
        }
    }
}

impl Default for LeverageConfig {
    fn default() -> Self {
        Self {
            core: default_leverage(),
            hedge: default_leverage(),
            max: default_max_leverage(),
        }
    }
}

impl Default for ApiDelaysConfig {
    fn default() -> Self {
        Self {
            order_processing: default_order_processing_delay(),
            leverage_update: default_leverage_update_delay(),
            position_check: default_position_check_delay(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            state_file: default_state_file(),
            paper_db: default_paper_db(),
            paper_initial_balance: default_paper_initial_balance(),
            fee_rate: default_fee_rate(),
        }
    }
}
