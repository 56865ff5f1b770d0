//! Partial fills derived from a closed trade.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Trade;

/// Price level at which a portion of the position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillLevel {
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "TP1")]
    Tp1,
    #[serde(rename = "TP2")]
    Tp2,
    #[serde(rename = "TP3")]
    Tp3,
    /// Remainder closed at entry after the stop was moved up
    #[serde(rename = "BE")]
    Breakeven,
}

impl FillLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillLevel::StopLoss => "SL",
            FillLevel::Tp1 => "TP1",
            FillLevel::Tp2 => "TP2",
            FillLevel::Tp3 => "TP3",
            FillLevel::Breakeven => "BE",
        }
    }
}

impl fmt::Display for FillLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One partial close: its return in R and the fraction of the position it closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFill {
    pub level: FillLevel,
    pub r_multiple: Decimal,
    pub weight: Decimal,
}

impl PartialFill {
    pub fn new(level: FillLevel, r_multiple: Decimal, weight: Decimal) -> Self {
        Self {
            level,
            r_multiple,
            weight,
        }
    }

    /// Contribution of this fill to the trade's realized R.
    pub fn weighted_r(&self) -> Decimal {
        self.r_multiple * self.weight
    }
}

/// Win/loss classification of a realized R.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeResult {
    Win,
    Loss,
    #[serde(rename = "BE")]
    Breakeven,
}

impl TradeResult {
    pub fn from_r(r: Decimal) -> Self {
        if r > Decimal::ZERO {
            TradeResult::Win
        } else if r < Decimal::ZERO {
            TradeResult::Loss
        } else {
            TradeResult::Breakeven
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeResult::Win => "WIN",
            TradeResult::Loss => "LOSS",
            TradeResult::Breakeven => "BE",
        }
    }
}

/// A validated trade together with its partial fills.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTrade {
    pub trade: Trade,
    pub fills: Vec<PartialFill>,
    /// Weight-multiplied sum of the fills' R multiples
    pub realized_r: Decimal,
}

impl ResolvedTrade {
    pub fn result(&self) -> TradeResult {
        TradeResult::from_r(self.realized_r)
    }

    pub fn total_weight(&self) -> Decimal {
        self.fills.iter().map(|f| f.weight).sum()
    }
}
