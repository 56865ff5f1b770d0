//! Data models for trades, partial fills and instruments.

mod fill;
pub mod instrument;
mod trade;

pub use fill::{FillLevel, PartialFill, ResolvedTrade, TradeResult};
pub use instrument::AssetClass;
pub use trade::{Direction, ExitReason, Trade, TradeRecord};
