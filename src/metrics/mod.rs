//! Trade statistics.

mod calculator;

pub use calculator::{MetricsCalculator, RealizedTrade, SymbolStats, TradeStats};
