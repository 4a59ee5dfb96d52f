//! Order size normalization against venue step and minimum-size rules.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::exchange::AssetMeta;
use crate::utils::{round_to_precision, round_to_tick};

/// Outcome of validating one requested order size.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeCheck {
    pub ok: bool,
    /// Size rounded to the symbol's step and precision
    pub size: Decimal,
    pub reason: Option<String>,
}

impl SizeCheck {
    fn accepted(size: Decimal) -> Self {
        Self {
            ok: true,
            size,
            reason: None,
        }
    }

    fn rejected(size: Decimal, reason: String) -> Self {
        Self {
            ok: false,
            size,
            reason: Some(reason),
        }
    }

    pub fn reason_text(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// Validates order sizes using per-symbol asset metadata.
#[derive(Debug, Clone, Default)]
pub struct OrderSizer {
    meta: HashMap<String, AssetMeta>,
}

impl OrderSizer {
    pub fn new(meta: HashMap<String, AssetMeta>) -> Self {
        Self { meta }
    }

    pub fn meta(&self, symbol: &str) -> Option<&AssetMeta> {
        self.meta.get(symbol)
    }

    /// Round `requested` to the nearest step, then to the size precision.
    ///
    /// Rejects sizes that round to zero or fall below the minimum, and symbols
    /// without metadata. Validating an accepted size returns it unchanged.
    pub fn validate(&self, symbol: &str, requested: Decimal) -> SizeCheck {
        let Some(meta) = self.meta.get(symbol) else {
            return SizeCheck::rejected(requested, format!("no asset metadata for {}", symbol));
        };

        if requested <= Decimal::ZERO {
            return SizeCheck::rejected(requested, format!("non-positive size {}", requested));
        }

        let stepped = round_to_tick(requested, meta.size_step);
        let size = round_to_precision(stepped, meta.sz_decimals).normalize();

        if size <= Decimal::ZERO {
            return SizeCheck::rejected(size, format!("{} rounds to zero", requested));
        }
        if size < meta.min_size {
            return SizeCheck::rejected(
                size,
                format!("size {} below minimum {} for {}", size, meta.min_size, symbol),
            );
        }

        debug!(%symbol, requested = %requested, size = %size, "Order size normalized");
        SizeCheck::accepted(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sizer() -> OrderSizer {
        let mut zk = AssetMeta::from_decimals("ZK", 0, 10);
        zk.min_size = dec!(10);
        OrderSizer::new(HashMap::from([
            ("BTC".to_string(), AssetMeta::from_decimals("BTC", 5, 50)),
            ("ZK".to_string(), zk),
        ]))
    }

    #[test]
    fn test_rounds_to_step_and_precision() {
        let sizer = sizer();
        let check = sizer.validate("BTC", dec!(0.0105567));
        assert!(check.ok);
        assert_eq!(check.size, dec!(0.01056));

        let check = sizer.validate("ZK", dec!(1234.6));
        assert!(check.ok);
        assert_eq!(check.size, dec!(1235));
    }

    #[test]
    fn test_idempotent() {
        let sizer = sizer();
        for (symbol, requested) in [("BTC", dec!(0.0105567)), ("ZK", dec!(99.5)), ("BTC", dec!(1.23456789))] {
            let first = sizer.validate(symbol, requested);
            let second = sizer.validate(symbol, first.size);
            assert!(first.ok);
            assert_eq!(first.size, second.size);
            assert!(second.ok);
        }
    }

    #[test]
    fn test_rejects_below_minimum() {
        let sizer = sizer();
        let check = sizer.validate("ZK", dec!(9.2));
        assert!(!check.ok);
        assert_eq!(check.size, dec!(9));
        assert!(check.reason_text().contains("below minimum"));

        let check = sizer.validate("BTC", dec!(0.000001));
        assert!(!check.ok);
    }

    #[test]
    fn test_rejects_missing_metadata_and_non_positive() {
        let sizer = sizer();
        assert!(sizer.validate("DOGE", dec!(100)).reason_text().contains("no asset metadata"));
        assert!(!sizer.validate("BTC", Decimal::ZERO).ok);
        assert!(!sizer.validate("BTC", dec!(-1)).ok);
    }
}
