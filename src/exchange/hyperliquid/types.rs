//! Type definitions for Hyperliquid API responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request type for Hyperliquid info endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum InfoRequest {
    /// Get metadata and asset contexts (funding rates, prices, OI).
    #[serde(rename = "metaAndAssetCtxs")]
    MetaAndAssetCtxs,

    /// Get all mid prices.
    #[serde(rename = "allMids")]
    AllMids,

    /// Get perpetuals account state (positions and margin) for a user.
    #[serde(rename = "clearinghouseState")]
    ClearinghouseState { user: String },

    /// Get funding payments settled on a user's positions.
    #[serde(rename = "userFunding")]
    UserFunding {
        user: String,
        #[serde(rename = "startTime")]
        start_time: i64,
    },
}

/// Response from allMids: coin -> mid price as a decimal string.
pub type AllMidsResponse = HashMap<String, String>;

/// Response from metaAndAssetCtxs endpoint.
/// Returns a tuple of (Meta, Vec<AssetCtx>).
pub type MetaAndAssetCtxsResponse = (Meta, Vec<AssetCtx>);

/// Universe metadata for perpetuals.
#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub universe: Vec<UniverseAsset>,
}

/// Metadata for a single asset in the universe.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniverseAsset {
    /// Asset name (e.g., "BTC", "ZK")
    pub name: String,
    /// Size decimal precision
    pub sz_decimals: u32,
    /// Maximum allowed leverage
    pub max_leverage: u32,
    /// Whether only isolated margin is allowed
    #[serde(default)]
    pub only_isolated: bool,
}

/// Real-time context for an asset. Only the fields this crate reads are kept.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    /// Current funding rate (hourly, as decimal string)
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub funding: Decimal,
    /// Mark price
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub mark_px: Decimal,
    /// Mid price (can be null for inactive coins)
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub mid_px: Option<Decimal>,
}

/// Response from clearinghouseState.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    #[serde(default)]
    pub asset_positions: Vec<AssetPositionEntry>,
    pub margin_summary: MarginSummary,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub withdrawable: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPositionEntry {
    pub position: PositionData,
}

/// One perpetual position inside clearinghouseState.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub coin: String,
    /// Signed size (negative = short)
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub szi: Decimal,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub entry_px: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub unrealized_pnl: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub margin_used: Option<Decimal>,
    pub leverage: PositionLeverage,
}

/// Leverage setting attached to a position.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionLeverage {
    /// "cross" or "isolated"
    #[serde(rename = "type")]
    pub kind: String,
    pub value: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub account_value: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub total_margin_used: Decimal,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub total_ntl_pos: Option<Decimal>,
}

/// One entry of the userFunding response.
#[derive(Debug, Clone, Deserialize)]
pub struct UserFundingRecord {
    pub time: i64,
    pub delta: FundingDelta,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingDelta {
    pub coin: String,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub usdc: Decimal,
    #[serde(deserialize_with = "deserialize_decimal_str")]
    pub funding_rate: Decimal,
    #[serde(default, deserialize_with = "deserialize_decimal_str_option_null")]
    pub szi: Option<Decimal>,
}

// Custom deserializers for Hyperliquid's string-encoded decimals

fn deserialize_decimal_str<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<Decimal>().map_err(serde::de::Error::custom)
}

/// Deserializer that handles both null JSON values and missing fields.
fn deserialize_decimal_str_option_null<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<Option<String>> = Option::deserialize(deserializer)?;
    match opt {
        Some(Some(s)) if !s.is_empty() => s
            .parse::<Decimal>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}
