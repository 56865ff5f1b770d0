//! Closed trade records produced by the signal engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::InvalidTrade;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl FromStr for Direction {
    type Err = InvalidTrade;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" | "bullish" | "buy" => Ok(Direction::Long),
            "short" | "bearish" | "sell" => Ok(Direction::Short),
            _ => Err(InvalidTrade::UnknownDirection(s.to_string())),
        }
    }
}

/// How the position was finally closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "TP1")]
    TakeProfit1,
    #[serde(rename = "TP1+Trail")]
    TakeProfit1Trail,
    #[serde(rename = "TP2")]
    TakeProfit2,
    #[serde(rename = "TP3")]
    TakeProfit3,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "SL",
            ExitReason::TakeProfit1 => "TP1",
            ExitReason::TakeProfit1Trail => "TP1+Trail",
            ExitReason::TakeProfit2 => "TP2",
            ExitReason::TakeProfit3 => "TP3",
        }
    }

    /// Highest take-profit level reached, 0 for a stop out.
    pub fn target_reached(&self) -> u8 {
        match self {
            ExitReason::StopLoss => 0,
            ExitReason::TakeProfit1 | ExitReason::TakeProfit1Trail => 1,
            ExitReason::TakeProfit2 => 2,
            ExitReason::TakeProfit3 => 3,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = InvalidTrade;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace(['_', ' '], "").as_str() {
            "SL" | "STOPLOSS" => Ok(ExitReason::StopLoss),
            "TP1" => Ok(ExitReason::TakeProfit1),
            "TP1+TRAIL" | "TP1TRAIL" => Ok(ExitReason::TakeProfit1Trail),
            "TP2" => Ok(ExitReason::TakeProfit2),
            "TP3" => Ok(ExitReason::TakeProfit3),
            _ => Err(InvalidTrade::UnknownExitReason(s.to_string())),
        }
    }
}

/// Trade record as emitted by the signal engine.
///
/// Every price is optional here; [`Trade::try_from`] decides whether the
/// record is usable. Field aliases cover the older key names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,

    /// `long`/`bullish`/`buy` or `short`/`bearish`/`sell`
    pub direction: String,

    #[serde(alias = "entry_date")]
    pub entry_time: DateTime<Utc>,

    #[serde(default, alias = "entry")]
    pub entry_price: Option<Decimal>,

    #[serde(default, alias = "sl")]
    pub stop_loss: Option<Decimal>,

    #[serde(default)]
    pub tp1: Option<Decimal>,

    #[serde(default)]
    pub tp2: Option<Decimal>,

    #[serde(default)]
    pub tp3: Option<Decimal>,

    /// Defaults to the entry timestamp when absent
    #[serde(default, alias = "exit_date")]
    pub exit_time: Option<DateTime<Utc>>,

    #[serde(default, alias = "exit")]
    pub exit_price: Option<Decimal>,

    pub exit_reason: String,

    /// Informational only
    #[serde(default, alias = "confluence")]
    pub confluence_score: i32,
}

impl TradeRecord {
    /// Minimal record: entry, stop and exit reason. Targets and exit are added with the builders.
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        entry_time: DateTime<Utc>,
        entry_price: Decimal,
        stop_loss: Decimal,
        exit_reason: ExitReason,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction: direction.as_str().to_string(),
            entry_time,
            entry_price: Some(entry_price),
            stop_loss: Some(stop_loss),
            tp1: None,
            tp2: None,
            tp3: None,
            exit_time: None,
            exit_price: None,
            exit_reason: exit_reason.as_str().to_string(),
            confluence_score: 0,
        }
    }

    pub fn with_targets(
        mut self,
        tp1: Option<Decimal>,
        tp2: Option<Decimal>,
        tp3: Option<Decimal>,
    ) -> Self {
        self.tp1 = tp1;
        self.tp2 = tp2;
        self.tp3 = tp3;
        self
    }

    pub fn with_exit(mut self, exit_time: DateTime<Utc>, exit_price: Option<Decimal>) -> Self {
        self.exit_time = Some(exit_time);
        self.exit_price = exit_price;
        self
    }

    pub fn with_confluence(mut self, score: i32) -> Self {
        self.confluence_score = score;
        self
    }
}

/// A closed trade that passed validation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    symbol: String,
    direction: Direction,
    entry_time: DateTime<Utc>,
    entry_price: Decimal,
    stop_loss: Decimal,
    targets: [Option<Decimal>; 3],
    exit_time: DateTime<Utc>,
    exit_price: Decimal,
    exit_reason: ExitReason,
    confluence_score: i32,
}

impl Trade {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn entry_time(&self) -> DateTime<Utc> {
        self.entry_time
    }

    pub fn entry_price(&self) -> Decimal {
        self.entry_price
    }

    pub fn stop_loss(&self) -> Decimal {
        self.stop_loss
    }

    /// Take-profit price for level 1..=3.
    pub fn target(&self, level: u8) -> Option<Decimal> {
        match level {
            1..=3 => self.targets[usize::from(level - 1)],
            _ => None,
        }
    }

    pub fn exit_time(&self) -> DateTime<Utc> {
        self.exit_time
    }

    /// Realized exit price, either reported or implied by the exit reason.
    pub fn exit_price(&self) -> Decimal {
        self.exit_price
    }

    pub fn exit_reason(&self) -> ExitReason {
        self.exit_reason
    }

    pub fn confluence_score(&self) -> i32 {
        self.confluence_score
    }

    /// Entry-to-stop distance; always positive for a validated trade.
    pub fn risk_distance(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Price movement from entry to `price` in units of the risk distance.
    /// `None` when the ratio does not fit a `Decimal`.
    pub fn r_multiple_at(&self, price: Decimal) -> Option<Decimal> {
        let moved = match self.direction {
            Direction::Long => price.checked_sub(self.entry_price)?,
            Direction::Short => self.entry_price.checked_sub(price)?,
        };
        moved.checked_div(self.risk_distance())
    }
}

fn require_positive(field: &'static str, value: Option<Decimal>) -> Result<Decimal, InvalidTrade> {
    let value = value.ok_or(InvalidTrade::MissingPrice { field })?;
    if value <= Decimal::ZERO {
        return Err(InvalidTrade::NonPositivePrice { field, value });
    }
    Ok(value)
}

fn optional_positive(
    field: &'static str,
    value: Option<Decimal>,
) -> Result<Option<Decimal>, InvalidTrade> {
    match value {
        Some(v) if v <= Decimal::ZERO => Err(InvalidTrade::NonPositivePrice { field, value: v }),
        other => Ok(other),
    }
}

const TARGET_LEVELS: [&str; 3] = ["tp1", "tp2", "tp3"];

/// Present targets must step away from entry on the profit side.
fn check_target_order(
    direction: Direction,
    entry_price: Decimal,
    targets: &[Option<Decimal>; 3],
) -> Result<(), InvalidTrade> {
    let mut previous = ("entry", entry_price);
    for (level, target) in TARGET_LEVELS.into_iter().zip(targets) {
        let Some(price) = *target else { continue };
        let beyond = match direction {
            Direction::Long => price > previous.1,
            Direction::Short => price < previous.1,
        };
        if !beyond {
            return Err(InvalidTrade::MisorderedTarget {
                level,
                previous: previous.0,
            });
        }
        previous = (level, price);
    }
    Ok(())
}

impl TryFrom<TradeRecord> for Trade {
    type Error = InvalidTrade;

    fn try_from(record: TradeRecord) -> Result<Self, Self::Error> {
        if record.symbol.trim().is_empty() {
            return Err(InvalidTrade::EmptySymbol);
        }

        let direction: Direction = record.direction.parse()?;
        let exit_reason: ExitReason = record.exit_reason.parse()?;

        let entry_price = require_positive("entry_price", record.entry_price)?;
        let stop_loss = require_positive("stop_loss", record.stop_loss)?;
        if entry_price == stop_loss {
            return Err(InvalidTrade::ZeroRiskDistance);
        }

        let targets = [
            optional_positive("tp1", record.tp1)?,
            optional_positive("tp2", record.tp2)?,
            optional_positive("tp3", record.tp3)?,
        ];
        check_target_order(direction, entry_price, &targets)?;

        // A reported exit equal to entry carries no information; fall back to the exit reason.
        let reported_exit = optional_positive("exit_price", record.exit_price)?
            .filter(|price| *price != entry_price);
        let implied_exit = match exit_reason.target_reached() {
            0 => Some(stop_loss),
            level => targets[usize::from(level - 1)],
        };
        let exit_price = reported_exit
            .or(implied_exit)
            .ok_or(InvalidTrade::MissingPrice { field: "exit_price" })?;

        let exit_time = record.exit_time.unwrap_or(record.entry_time);
        if exit_time < record.entry_time {
            return Err(InvalidTrade::ExitBeforeEntry);
        }

        Ok(Self {
            symbol: record.symbol,
            direction,
            entry_time: record.entry_time,
            entry_price,
            stop_loss,
            targets,
            exit_time,
            exit_price,
            exit_reason,
            confluence_score: record.confluence_score,
        })
    }
}
