//! Trade statistics in R: win rate, expectancy, profit factor, etc.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::challenge::AppliedTrade;
use crate::models::{ExitReason, ResolvedTrade, TradeResult};

/// Anything with a closed outcome in R.
pub trait RealizedTrade {
    fn symbol(&self) -> &str;
    fn exit_reason(&self) -> ExitReason;
    fn realized_r(&self) -> Decimal;
}

impl RealizedTrade for ResolvedTrade {
    fn symbol(&self) -> &str {
        self.trade.symbol()
    }

    fn exit_reason(&self) -> ExitReason {
        self.trade.exit_reason()
    }

    fn realized_r(&self) -> Decimal {
        self.realized_r
    }
}

/// Net of transaction cost.
impl RealizedTrade for AppliedTrade {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn exit_reason(&self) -> ExitReason {
        self.exit_reason
    }

    fn realized_r(&self) -> Decimal {
        self.realized_r
    }
}

fn saturating_sum(values: impl IntoIterator<Item = Decimal>) -> Decimal {
    values
        .into_iter()
        .fold(Decimal::ZERO, |acc, v| acc.saturating_add(v))
}

/// Per-symbol tally.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolStats {
    pub trades: usize,
    pub wins: usize,
    pub total_r: Decimal,
}

impl SymbolStats {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trades as f64
    }
}

/// Summary statistics of a set of trades, in R.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakevens: usize,
    pub win_rate: f64,

    pub total_r: Decimal,
    pub avg_win_r: Decimal,
    pub avg_loss_r: Decimal,
    /// Mean R per trade
    pub expectancy_r: Decimal,
    /// Gross win R over gross loss R; `None` without losses
    pub profit_factor: Option<f64>,
    pub r_std_dev: f64,

    pub exit_breakdown: BTreeMap<ExitReason, usize>,
    pub by_symbol: BTreeMap<String, SymbolStats>,
}

impl TradeStats {
    /// Symbols ranked by total R, best first.
    pub fn top_symbols(&self, n: usize) -> Vec<(&str, &SymbolStats)> {
        let mut ranked: Vec<_> = self
            .by_symbol
            .iter()
            .map(|(s, st)| (s.as_str(), st))
            .collect();
        ranked.sort_by(|a, b| b.1.total_r.cmp(&a.1.total_r).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(n);
        ranked
    }
}

/// Calculator for trade statistics.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Statistics over the given trades. Input order does not affect the result.
    pub fn calculate<'a, T, I>(trades: I) -> TradeStats
    where
        T: RealizedTrade + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let trades: Vec<&T> = trades.into_iter().collect();
        let mut stats = TradeStats::default();

        if trades.is_empty() {
            return stats;
        }
        stats.total_trades = trades.len();

        let mut rs: Vec<Decimal> = trades.iter().map(|t| t.realized_r()).collect();
        rs.sort();
        Self::calculate_r_metrics(&mut stats, &rs);
        Self::calculate_breakdowns(&mut stats, &trades);

        stats
    }

    fn calculate_r_metrics(stats: &mut TradeStats, rs: &[Decimal]) {
        let mut wins = Vec::new();
        let mut losses = Vec::new();
        for &r in rs {
            match TradeResult::from_r(r) {
                TradeResult::Win => wins.push(r),
                TradeResult::Loss => losses.push(r),
                TradeResult::Breakeven => stats.breakevens += 1,
            }
        }

        stats.wins = wins.len();
        stats.losses = losses.len();
        stats.win_rate = wins.len() as f64 / rs.len() as f64;
        stats.total_r = saturating_sum(rs.iter().copied());
        stats.expectancy_r = stats.total_r / Decimal::from(rs.len());

        let gross_win = saturating_sum(wins.iter().copied());
        let gross_loss = saturating_sum(losses.iter().map(|l| l.abs()));

        if !wins.is_empty() {
            stats.avg_win_r = gross_win / Decimal::from(wins.len());
        }
        if !losses.is_empty() {
            stats.avg_loss_r = -gross_loss / Decimal::from(losses.len());
        }
        if gross_loss > Decimal::ZERO {
            stats.profit_factor =
                Some(gross_win.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0));
        }

        // Sorted input keeps the float result independent of trade order.
        if rs.len() >= 2 {
            let values: Vec<f64> = rs.iter().filter_map(|r| r.to_f64()).collect();
            let std_dev = values.std_dev();
            if std_dev.is_finite() {
                stats.r_std_dev = std_dev;
            }
        }
    }

    fn calculate_breakdowns<T: RealizedTrade>(stats: &mut TradeStats, trades: &[&T]) {
        for t in trades {
            *stats.exit_breakdown.entry(t.exit_reason()).or_insert(0) += 1;

            let r = t.realized_r();
            let sym = stats.by_symbol.entry(t.symbol().to_string()).or_default();
            sym.trades += 1;
            sym.total_r = sym.total_r.saturating_add(r);
            if r > Decimal::ZERO {
                sym.wins += 1;
            }
        }
    }
}

impl fmt::Display for TradeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trades:        {} ({} W / {} L / {} BE)", self.total_trades, self.wins, self.losses, self.breakevens)?;
        writeln!(f, "Win rate:      {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Total R:       {:+.2}R", self.total_r)?;
        writeln!(f, "Expectancy:    {:+.3}R", self.expectancy_r)?;
        writeln!(f, "Avg win/loss:  {:+.2}R / {:+.2}R", self.avg_win_r, self.avg_loss_r)?;
        match self.profit_factor {
            Some(pf) => writeln!(f, "Profit factor: {:.2}", pf)?,
            None => writeln!(f, "Profit factor: n/a")?,
        }
        writeln!(f, "R std dev:     {:.3}", self.r_std_dev)?;

        if !self.exit_breakdown.is_empty() {
            writeln!(f, "\nExit breakdown:")?;
            for (reason, count) in &self.exit_breakdown {
                let pct = *count as f64 / self.total_trades as f64 * 100.0;
                writeln!(f, "  {:<10} {:>5} ({:.1}%)", reason.as_str(), count, pct)?;
            }
        }

        let top = self.top_symbols(10);
        if !top.is_empty() {
            writeln!(f, "\nTop symbols:")?;
            for (symbol, s) in top {
                writeln!(
                    f,
                    "  {:<10} {:>4} trades  {:>5.1}% WR  {:+.2}R",
                    symbol,
                    s.trades,
                    s.win_rate() * 100.0,
                    s.total_r
                )?;
            }
        }
        Ok(())
    }
}
