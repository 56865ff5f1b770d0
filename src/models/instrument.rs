//! Quoting-unit sizes per asset class, keyed on symbol patterns.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

const INDEX_TAGS: [&str; 7] = ["US30", "US500", "NAS100", "SPX500", "DAX", "USTEC", "DJ30"];
const CRYPTO_TAGS: [&str; 3] = ["BTC", "ETH", "LTC"];

/// Asset class inferred from a symbol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    ForexJpy,
    ForexStandard,
    Gold,
    Silver,
    Index,
    Crypto,
}

impl AssetClass {
    /// Classify a symbol. Checks run in a fixed order so "XAU_JPY" is a JPY cross.
    pub fn of(symbol: &str) -> Self {
        let s = symbol.to_uppercase();
        if s.contains("JPY") {
            AssetClass::ForexJpy
        } else if s.contains("XAU") || s.contains("GOLD") {
            AssetClass::Gold
        } else if s.contains("XAG") || s.contains("SILVER") {
            AssetClass::Silver
        } else if INDEX_TAGS.iter().any(|tag| s.contains(tag)) {
            AssetClass::Index
        } else if CRYPTO_TAGS.iter().any(|tag| s.contains(tag)) {
            AssetClass::Crypto
        } else {
            AssetClass::ForexStandard
        }
    }

    /// Size of one quoting unit (pip / point).
    pub fn pip_size(&self) -> Decimal {
        match self {
            AssetClass::ForexJpy => dec!(0.01),
            AssetClass::ForexStandard => dec!(0.0001),
            AssetClass::Gold => dec!(0.1),
            AssetClass::Silver => dec!(0.01),
            AssetClass::Index | AssetClass::Crypto => Decimal::ONE,
        }
    }

    /// Typical (min, max) stop distance in quoting units for swing trades.
    pub fn stop_distance_limits(&self) -> (Decimal, Decimal) {
        match self {
            AssetClass::Index => (dec!(50), dec!(1500)),
            AssetClass::ForexJpy => (dec!(30), dec!(400)),
            AssetClass::Gold => (dec!(50), dec!(500)),
            AssetClass::Silver => (dec!(30), dec!(200)),
            AssetClass::Crypto => (dec!(100), dec!(3000)),
            AssetClass::ForexStandard => (dec!(15), dec!(150)),
        }
    }
}

pub fn pip_size(symbol: &str) -> Decimal {
    AssetClass::of(symbol).pip_size()
}

/// Price distance expressed in the symbol's quoting units.
pub fn to_pips(symbol: &str, distance: Decimal) -> Decimal {
    distance.abs() / pip_size(symbol)
}

pub fn stop_distance_limits(symbol: &str) -> (Decimal, Decimal) {
    AssetClass::of(symbol).stop_distance_limits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_classes() {
        assert_eq!(AssetClass::of("USD_JPY"), AssetClass::ForexJpy);
        assert_eq!(AssetClass::of("xau_usd"), AssetClass::Gold);
        assert_eq!(AssetClass::of("XAG_USD"), AssetClass::Silver);
        assert_eq!(AssetClass::of("SPX500_USD"), AssetClass::Index);
        assert_eq!(AssetClass::of("BTC_USD"), AssetClass::Crypto);
        assert_eq!(AssetClass::of("EUR_GBP"), AssetClass::ForexStandard);
    }

    #[test]
    fn test_pip_conversion() {
        assert_eq!(to_pips("EUR_USD", dec!(0.0025)), dec!(25));
        assert_eq!(to_pips("GBP_JPY", dec!(-0.85)), dec!(85));
        assert_eq!(to_pips("XAU_USD", dec!(12.5)), dec!(125));
        assert_eq!(to_pips("NAS100_USD", dec!(120)), dec!(120));
    }
}
