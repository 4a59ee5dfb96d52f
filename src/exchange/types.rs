//! Venue-neutral types exchanged across the gateway seam.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An open perpetual position as reported by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    /// Signed size in base units (negative = short)
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Margin currently posted for this position
    pub margin_used: Decimal,
    /// Effective leverage on the venue for this symbol
    pub leverage: Decimal,
}

impl OpenPosition {
    pub fn is_long(&self) -> bool {
        self.size > Decimal::ZERO
    }
}

/// Account-level margin summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Net asset value of the account
    pub account_value: Decimal,
    pub total_margin_used: Decimal,
    pub withdrawable: Decimal,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn from_is_buy(is_buy: bool) -> Self {
        if is_buy {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a market order or a position close.
///
/// Write-side venue calls never return `Err`; a rejected or failed call is
/// reported with `success == false` and an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub filled_size: Decimal,
    pub avg_price: Decimal,
    /// Fee charged for the fill, in `fee_token` units
    pub fee: Option<Decimal>,
    pub fee_token: Option<String>,
    pub error_message: Option<String>,
}

impl OrderResult {
    pub fn filled(order_id: impl Into<String>, filled_size: Decimal, avg_price: Decimal) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            filled_size,
            avg_price,
            fee: None,
            fee_token: None,
            error_message: None,
        }
    }

    pub fn with_fee(mut self, fee: Decimal, token: impl Into<String>) -> Self {
        self.fee = Some(fee);
        self.fee_token = Some(token.into());
        self
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            filled_size: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            fee: None,
            fee_token: None,
            error_message: Some(message.into()),
        }
    }

    pub fn error_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or("unknown error")
    }
}

/// Outcome of a leverage update.
#[derive(Debug, Clone, PartialEq)]
pub struct LeverageResult {
    pub success: bool,
    pub error_message: Option<String>,
}

impl LeverageResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// Size constraints of a tradable asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMeta {
    pub symbol: String,
    /// Decimal places allowed in order sizes
    pub sz_decimals: u32,
    /// Minimum size increment
    pub size_step: Decimal,
    /// Minimum order size
    pub min_size: Decimal,
    pub max_leverage: u32,
}

impl AssetMeta {
    /// Metadata derived from the size precision alone: step and minimum are one unit
    /// of the last decimal place.
    pub fn from_decimals(symbol: impl Into<String>, sz_decimals: u32, max_leverage: u32) -> Self {
        let unit = Decimal::new(1, sz_decimals);
        Self {
            symbol: symbol.into(),
            sz_decimals,
            size_step: unit,
            min_size: unit,
            max_leverage,
        }
    }
}

/// A settled funding payment on an account position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingPayment {
    /// Settlement time in milliseconds
    pub time: i64,
    pub coin: String,
    pub funding_rate: Decimal,
    /// Amount credited (positive) or debited (negative) in USD
    pub usdc: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_asset_meta_from_decimals() {
        let meta = AssetMeta::from_decimals("BTC", 5, 50);
        assert_eq!(meta.size_step, dec!(0.00001));
        assert_eq!(meta.min_size, dec!(0.00001));

        let whole = AssetMeta::from_decimals("ZK", 0, 10);
        assert_eq!(whole.size_step, dec!(1));
    }

    #[test]
    fn test_order_result_constructors() {
        let ok = OrderResult::filled("42", dec!(1.5), dec!(100)).with_fee(dec!(0.07), "USDC");
        assert!(ok.success);
        assert_eq!(ok.fee, Some(dec!(0.07)));

        let failed = OrderResult::failed("insufficient margin");
        assert!(!failed.success);
        assert_eq!(failed.error_text(), "insufficient margin");
    }

    #[test]
    fn test_order_side_display() {
        assert_eq!(OrderSide::from_is_buy(true).to_string(), "BUY");
        assert_eq!(OrderSide::from_is_buy(false).to_string(), "SELL");
    }
}
