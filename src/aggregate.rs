//! Runs many independent challenge attempts and tallies the outcomes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{info, warn};

use crate::challenge::{
    chronological_order, replay, AttemptOutcome, AttemptResult, BreachKind, ChallengeAttempt,
};
use crate::error::{ConfigError, InvalidTrade};
use crate::metrics::{MetricsCalculator, TradeStats};
use crate::models::{ResolvedTrade, Trade, TradeRecord};
use crate::trading::{day_key, is_trading_day, ChallengeRules, OutcomeResolver};

/// Why an input record never reached an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Invalid(InvalidTrade),
    NonTradingDay,
    NotWhitelisted,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Invalid(e) => write!(f, "invalid: {e}"),
            RejectReason::NonTradingDay => write!(f, "non-trading day"),
            RejectReason::NotWhitelisted => write!(f, "symbol not whitelisted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTrade {
    /// Position in the input records
    pub index: usize,
    pub symbol: String,
    pub reason: RejectReason,
}

/// A labelled stream of resolved trades in chronological order.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeStream {
    pub label: String,
    pub trades: Vec<ResolvedTrade>,
    pub rejected: Vec<RejectedTrade>,
}

/// Validate, filter, resolve and order raw records.
///
/// Bad records are collected in `rejected`; preparation itself never fails.
pub fn prepare_stream(
    label: impl Into<String>,
    records: Vec<TradeRecord>,
    rules: &ChallengeRules,
) -> TradeStream {
    let label = label.into();
    let resolver = OutcomeResolver::new(rules.tp_weights);
    let mut trades = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for (index, record) in records.into_iter().enumerate() {
        let symbol = record.symbol.clone();
        let reject = |reason| RejectedTrade {
            index,
            symbol: symbol.clone(),
            reason,
        };

        if !rules.is_whitelisted(&record.symbol) {
            rejected.push(reject(RejectReason::NotWhitelisted));
            continue;
        }
        if rules.skip_non_trading_days && !is_trading_day(record.entry_time) {
            rejected.push(reject(RejectReason::NonTradingDay));
            continue;
        }

        match Trade::try_from(record).and_then(|t| resolver.resolve(t)) {
            Ok(resolved) => trades.push(resolved),
            Err(e) => {
                warn!(index, symbol = %symbol, error = %e, "Rejected trade record");
                rejected.push(reject(RejectReason::Invalid(e)));
            }
        }
    }

    trades.sort_by(|a, b| {
        a.trade
            .entry_time()
            .cmp(&b.trade.entry_time())
            .then_with(|| a.trade.symbol().cmp(b.trade.symbol()))
    });

    info!(
        stream = %label,
        accepted = trades.len(),
        rejected = rejected.len(),
        "Prepared trade stream"
    );

    TradeStream {
        label,
        trades,
        rejected,
    }
}

/// Cut a stream into consecutive windows of `days` calendar days, starting
/// at the first trade's date. Empty windows are dropped; rejected records
/// stay with the first window.
pub fn split_into_windows(stream: &TradeStream, days: u32) -> Vec<TradeStream> {
    let span = Duration::days(i64::from(days.max(1)));
    let mut windows: Vec<TradeStream> = Vec::new();
    let mut current: Option<(NaiveDate, Vec<ResolvedTrade>)> = None;

    let close = |windows: &mut Vec<TradeStream>, start: NaiveDate, trades: Vec<ResolvedTrade>| {
        windows.push(TradeStream {
            label: format!("{}@{}", stream.label, start.format("%Y-%m-%d")),
            trades,
            rejected: Vec::new(),
        });
    };

    for trade in &stream.trades {
        let day = day_key(trade.trade.entry_time());
        current = match current.take() {
            None => Some((day, vec![trade.clone()])),
            Some((start, mut trades)) if day < start + span => {
                trades.push(trade.clone());
                Some((start, trades))
            }
            Some((start, trades)) => {
                close(&mut windows, start, trades);
                // Skip whole empty windows so boundaries stay on the grid.
                let elapsed = (day - start).num_days() / span.num_days();
                Some((start + Duration::days(elapsed * span.num_days()), vec![trade.clone()]))
            }
        };
    }
    if let Some((start, trades)) = current {
        close(&mut windows, start, trades);
    }

    if let Some(first) = windows.first_mut() {
        first.rejected = stream.rejected.clone();
    }
    windows
}

/// Order-independent tally of attempt outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Tally {
    attempts: usize,
    passed: usize,
    failed: usize,
    incomplete: usize,
    breaches: BTreeMap<BreachKind, usize>,
    starting_capital: Decimal,
    total_profit: Decimal,
    trades_taken: usize,
    trades_skipped: usize,
}

impl Tally {
    fn of(attempt: &AttemptResult) -> Self {
        let mut tally = Tally {
            attempts: 1,
            starting_capital: attempt.starting_balance,
            total_profit: attempt.profit,
            trades_taken: attempt.trades_taken,
            trades_skipped: attempt.trades_skipped,
            ..Default::default()
        };
        match attempt.outcome {
            AttemptOutcome::Passed => tally.passed = 1,
            AttemptOutcome::Failed(kind) => {
                tally.failed = 1;
                tally.breaches.insert(kind, 1);
            }
            AttemptOutcome::Incomplete(_) => tally.incomplete = 1,
        }
        tally
    }

    fn merge(mut self, other: Tally) -> Tally {
        self.attempts += other.attempts;
        self.passed += other.passed;
        self.failed += other.failed;
        self.incomplete += other.incomplete;
        for (kind, n) in other.breaches {
            *self.breaches.entry(kind).or_insert(0) += n;
        }
        self.starting_capital = self.starting_capital.saturating_add(other.starting_capital);
        self.total_profit = self.total_profit.saturating_add(other.total_profit);
        self.trades_taken += other.trades_taken;
        self.trades_skipped += other.trades_skipped;
        self
    }
}

/// Outcome counts and profit across all attempts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateSummary {
    pub total_attempts: usize,
    pub passed: usize,
    pub failed: usize,
    pub incomplete: usize,
    pub breaches: BTreeMap<BreachKind, usize>,
    pub total_profit: Decimal,
    /// Total profit over the summed starting balances
    pub profit_pct: Decimal,
    pub trades_taken: usize,
    pub trades_skipped: usize,
    /// Gross realized-R statistics of every resolved trade offered to an
    /// attempt, whether it was taken, skipped or arrived after a breach
    pub trades: TradeStats,
    /// Net realized-R statistics of the trades the attempts actually took
    pub taken: TradeStats,
}

impl AggregateSummary {
    pub fn pass_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total_attempts as f64
    }

    fn from_attempts(attempts: &[AttemptResult], offered: &[&ResolvedTrade]) -> Self {
        let tally = attempts
            .par_iter()
            .map(Tally::of)
            .reduce(Tally::default, Tally::merge);

        let profit_pct = tally
            .total_profit
            .checked_div(tally.starting_capital)
            .map(|ratio| ratio.saturating_mul(dec!(100)))
            .unwrap_or(Decimal::ZERO);

        Self {
            total_attempts: tally.attempts,
            passed: tally.passed,
            failed: tally.failed,
            incomplete: tally.incomplete,
            breaches: tally.breaches,
            total_profit: tally.total_profit,
            profit_pct,
            trades_taken: tally.trades_taken,
            trades_skipped: tally.trades_skipped,
            trades: MetricsCalculator::calculate(offered.iter().copied()),
            taken: MetricsCalculator::calculate(attempts.iter().flat_map(|a| &a.ledger)),
        }
    }
}

/// Everything a run produced: per-attempt results, exclusions and the summary.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub attempts: Vec<AttemptResult>,
    pub rejected: Vec<RejectedTrade>,
    pub summary: AggregateSummary,
}

impl AggregateResult {
    fn new(
        attempts: Vec<AttemptResult>,
        rejected: Vec<RejectedTrade>,
        offered: &[&ResolvedTrade],
    ) -> Self {
        let summary = AggregateSummary::from_attempts(&attempts, offered);
        info!(
            attempts = summary.total_attempts,
            passed = summary.passed,
            failed = summary.failed,
            incomplete = summary.incomplete,
            profit = %summary.total_profit.round_dp(2),
            "Aggregation complete"
        );
        Self {
            attempts,
            rejected,
            summary,
        }
    }
}

impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "\n{:=^60}", " CHALLENGE SIMULATION RESULTS ")?;
        writeln!(
            f,
            "Challenges passed: {} / {} ({:.1}%)",
            s.passed,
            s.total_attempts,
            s.pass_rate() * 100.0
        )?;
        writeln!(f, "Failed:            {}", s.failed)?;
        for (kind, n) in &s.breaches {
            writeln!(f, "  {:<16} {}", kind.as_str(), n)?;
        }
        writeln!(f, "Incomplete:        {}", s.incomplete)?;
        writeln!(f)?;
        writeln!(f, "Total profit:      ${:.2} ({:.2}%)", s.total_profit, s.profit_pct)?;
        writeln!(
            f,
            "Trades:            {} taken, {} skipped, {} rejected",
            s.trades_taken,
            s.trades_skipped,
            self.rejected.len()
        )?;
        writeln!(f, "\n{:-^60}", " All trades ")?;
        write!(f, "{}", s.trades)?;
        writeln!(f, "\n{:-^60}", " Taken trades ")?;
        write!(f, "{}", s.taken)?;
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

/// Runs attempts under one validated rule set.
#[derive(Debug, Clone)]
pub struct ChallengeAggregator {
    rules: ChallengeRules,
}

impl ChallengeAggregator {
    pub fn new(rules: ChallengeRules) -> Result<Self, ConfigError> {
        rules.validate()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &ChallengeRules {
        &self.rules
    }

    /// One independent attempt per stream, run in parallel.
    pub fn run(&self, streams: &[TradeStream]) -> AggregateResult {
        info!(streams = streams.len(), "Running challenge attempts");

        let attempts: Vec<AttemptResult> = streams
            .par_iter()
            .map(|s| replay(s.label.clone(), &self.rules, &s.trades))
            .collect();
        let rejected = streams.iter().flat_map(|s| s.rejected.iter().cloned()).collect();
        let offered: Vec<&ResolvedTrade> = streams.iter().flat_map(|s| &s.trades).collect();

        AggregateResult::new(attempts, rejected, &offered)
    }

    /// Back-to-back attempts over one stream: each time an attempt passes or
    /// fails, a fresh account starts with the next trade.
    pub fn run_sequential(&self, stream: &TradeStream) -> AggregateResult {
        let mut attempts = Vec::new();
        let mut attempt = ChallengeAttempt::with_validated(&self.rules);
        let label = |n: usize| format!("{}#{}", stream.label, n);

        for idx in chronological_order(&stream.trades) {
            attempt.apply(idx, &stream.trades[idx]);
            if attempt.is_terminal() {
                let done = std::mem::replace(&mut attempt, ChallengeAttempt::with_validated(&self.rules));
                let result = done.finish(label(attempts.len() + 1));
                info!(attempt = %result.label, outcome = %result.outcome, "Challenge closed");
                attempts.push(result);
            }
        }
        if attempt.has_started() {
            attempts.push(attempt.finish(label(attempts.len() + 1)));
        }

        let offered: Vec<&ResolvedTrade> = stream.trades.iter().collect();
        AggregateResult::new(attempts, stream.rejected.clone(), &offered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, ExitReason};
    use crate::trading::ThrottleThresholds;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, hour, 0, 0).unwrap()
    }

    fn runner(symbol: &str, ts: DateTime<Utc>) -> TradeRecord {
        TradeRecord::new(symbol, Direction::Long, ts, dec!(100), dec!(90), ExitReason::TakeProfit3)
            .with_targets(Some(dec!(115)), Some(dec!(130)), Some(dec!(150)))
            .with_exit(ts + Duration::minutes(30), None)
    }

    fn stop_out(symbol: &str, ts: DateTime<Utc>) -> TradeRecord {
        TradeRecord::new(symbol, Direction::Long, ts, dec!(100), dec!(90), ExitReason::StopLoss)
            .with_exit(ts + Duration::minutes(30), None)
    }

    fn loose_rules(risk: Decimal) -> ChallengeRules {
        ChallengeRules {
            risk_per_trade_pct: risk,
            reduced_risk_pct: risk,
            minimal_risk_pct: risk,
            max_cumulative_risk_pct: dec!(100),
            warning: ThrottleThresholds { daily_loss_pct: dec!(50), total_dd_pct: dec!(50) },
            reduce: ThrottleThresholds { daily_loss_pct: dec!(60), total_dd_pct: dec!(60) },
            halt: ThrottleThresholds { daily_loss_pct: dec!(70), total_dd_pct: dec!(70) },
            max_concurrent_trades: 100,
            max_trades_per_day: 100,
            max_trades_per_week: 100,
            max_trades_per_symbol: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_prepare_rejects_and_sorts() {
        let rules = ChallengeRules {
            symbol_whitelist: Some(vec!["EUR_USD".into(), "GBP_USD".into()]),
            ..Default::default()
        };
        let mut missing_tp = runner("EUR_USD", at(3, 5, 9));
        missing_tp.tp3 = None;
        missing_tp.exit_price = Some(dec!(150));

        let records = vec![
            runner("GBP_USD", at(3, 6, 9)),
            runner("EUR_USD", at(3, 2, 9)), // Saturday
            runner("USD_CAD", at(3, 4, 9)),
            missing_tp,
            runner("EUR_USD", at(3, 4, 9)),
        ];
        let stream = prepare_stream("s", records, &rules);

        let symbols: Vec<_> = stream.trades.iter().map(|t| t.trade.symbol()).collect();
        assert_eq!(symbols, vec!["EUR_USD", "GBP_USD"]);

        let reasons: Vec<_> = stream.rejected.iter().map(|r| (r.index, r.reason.clone())).collect();
        assert_eq!(reasons[0], (1, RejectReason::NonTradingDay));
        assert_eq!(reasons[1], (2, RejectReason::NotWhitelisted));
        assert!(matches!(
            reasons[2],
            (3, RejectReason::Invalid(InvalidTrade::MissingTarget { level: "tp3", .. }))
        ));
    }

    #[test]
    fn test_weekend_kept_when_filter_off() {
        let rules = ChallengeRules {
            skip_non_trading_days: false,
            ..Default::default()
        };
        let stream = prepare_stream("s", vec![runner("EUR_USD", at(3, 2, 9))], &rules);
        assert_eq!(stream.trades.len(), 1);
        assert!(stream.rejected.is_empty());
    }

    #[test]
    fn test_windows() {
        let rules = ChallengeRules::default();
        let records = vec![
            runner("EUR_USD", at(3, 4, 9)),
            runner("EUR_USD", at(3, 8, 9)),
            // next 7-day window starts 11 Mar; 18-24 Mar is empty
            runner("EUR_USD", at(3, 12, 9)),
            runner("EUR_USD", at(3, 26, 9)),
            stop_out("EUR_USD", at(3, 9, 9)), // Saturday, rejected
        ];
        let stream = prepare_stream("hist", records, &rules);
        let windows = split_into_windows(&stream, 7);

        let labels: Vec<_> = windows.iter().map(|w| w.label.as_str()).collect();
        assert_eq!(labels, vec!["hist@2024-03-04", "hist@2024-03-11", "hist@2024-03-25"]);
        assert_eq!(windows[0].trades.len(), 2);
        assert_eq!(windows[0].rejected.len(), 1);
        assert!(windows[1].rejected.is_empty());
    }

    #[test]
    fn test_run_tallies_outcomes() {
        let rules = loose_rules(dec!(5));
        let agg = ChallengeAggregator::new(rules.clone()).unwrap();

        let failing = prepare_stream("fail", vec![stop_out("EUR_USD", at(3, 4, 9))], &rules);
        let passing = prepare_stream(
            "pass",
            (4..=6).map(|d| runner("EUR_USD", at(3, d, 9))).collect(),
            &rules,
        );
        let idle = prepare_stream("idle", vec![runner("EUR_USD", at(3, 4, 9))], &rules);

        let result = agg.run(&[failing, passing, idle]);
        let s = &result.summary;

        assert_eq!(s.total_attempts, 3);
        assert_eq!(s.passed, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.incomplete, 1);
        assert_eq!(s.breaches[&BreachKind::DailyLoss], 1);
        assert_eq!(result.attempts[0].label, "fail");
        // Trade stats include the failed attempt's losing trade.
        assert_eq!(s.trades.losses, 1);
        assert_eq!(s.trades.total_trades, 5);
        assert_eq!(s.trades_taken, 1 + 2 + 1);
        assert_eq!(s.taken.total_trades, 4);
    }

    #[test]
    fn test_trade_stats_cover_trades_after_breach() {
        let rules = loose_rules(dec!(5));
        let agg = ChallengeAggregator::new(rules.clone()).unwrap();
        let trail = |ts: DateTime<Utc>| {
            TradeRecord::new("EUR_USD", Direction::Long, ts, dec!(100), dec!(90), ExitReason::TakeProfit1Trail)
                .with_targets(Some(dec!(115)), None, None)
                .with_exit(ts + Duration::minutes(30), None)
        };

        let records = vec![
            stop_out("EUR_USD", at(3, 4, 9)), // 5% loss, daily limit
            trail(at(3, 4, 10)),
            trail(at(3, 5, 9)),
        ];
        let stream = prepare_stream("breach", records, &rules);
        let result = agg.run(std::slice::from_ref(&stream));
        let s = &result.summary;

        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failed(BreachKind::DailyLoss));
        assert_eq!(result.attempts[0].trades_unprocessed, 2);

        assert_eq!(s.trades.total_trades, 3);
        assert_eq!(s.trades.wins, 2);
        assert!((s.trades.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.trades.total_r, dec!(0.5));

        assert_eq!(s.taken.total_trades, 1);
        assert_eq!(s.taken.total_r, dec!(-1));

        let sequential = agg.run_sequential(&stream).summary;
        assert_eq!(sequential.trades.total_trades, 3);
    }

    #[test]
    fn test_summary_independent_of_stream_order() {
        let rules = ChallengeRules::default();
        let agg = ChallengeAggregator::new(rules.clone()).unwrap();

        let mut streams: Vec<TradeStream> = (0..6u32)
            .map(|i| {
                let records = (0..8u32)
                    .map(|k| {
                        let ts = at(4, 1 + (k % 5), 8 + k);
                        if (i + k) % 3 == 0 {
                            stop_out("EUR_USD", ts)
                        } else {
                            runner("GBP_USD", ts)
                        }
                    })
                    .collect();
                prepare_stream(format!("s{i}"), records, &rules)
            })
            .collect();

        let forward = agg.run(&streams).summary;
        streams.reverse();
        streams.swap(0, 3);
        let shuffled = agg.run(&streams).summary;

        assert_eq!(forward, shuffled);
    }

    #[test]
    fn test_sequential_runs_restart_after_terminal() {
        let rules = loose_rules(dec!(5));
        let agg = ChallengeAggregator::new(rules.clone()).unwrap();

        let records = vec![
            stop_out("EUR_USD", at(3, 4, 9)), // fails attempt 1
            runner("EUR_USD", at(3, 5, 9)),   // attempt 2 starts here
            runner("EUR_USD", at(3, 6, 9)),
        ];
        let stream = prepare_stream("seq", records, &rules);
        let result = agg.run_sequential(&stream);

        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failed(BreachKind::DailyLoss));
        assert_eq!(result.attempts[0].trades_unprocessed, 0);
        // 5% * 2.65R = 13.25% clears phase 1, then 13.25% clears phase 2.
        assert_eq!(result.attempts[1].outcome, AttemptOutcome::Passed);
        assert_eq!(result.attempts[1].label, "seq#2");
        assert_eq!(result.summary.passed, 1);
    }

    #[test]
    fn test_outlier_targets_do_not_abort_run() {
        let rules = ChallengeRules::default();
        let agg = ChallengeAggregator::new(rules.clone()).unwrap();
        let outlier = |ts: DateTime<Utc>| {
            TradeRecord::new("EUR_USD", Direction::Long, ts, dec!(1.1), dec!(1.09999999), ExitReason::TakeProfit3)
                .with_targets(Some(dec!(1.2)), Some(dec!(1.3)), Some(dec!(10000000000)))
        };

        let stream = prepare_stream(
            "outlier",
            vec![outlier(at(3, 4, 9)), outlier(at(3, 5, 9)), outlier(at(3, 6, 9))],
            &rules,
        );
        assert_eq!(stream.trades.len(), 3);

        let result = agg.run(&[stream.clone(), stream]);
        let s = &result.summary;

        assert_eq!(s.total_attempts, 2);
        assert_eq!(s.trades_taken, 2);
        assert_eq!(s.trades_skipped, 4);
        assert_eq!(s.trades.total_trades, 6);
        assert!(result.attempts.iter().all(|a| a.outcome == AttemptOutcome::Incomplete(crate::challenge::Phase::Phase2)));
    }

    #[test]
    fn test_invalid_rules_rejected_up_front() {
        let mut rules = ChallengeRules::default();
        rules.tp_weights.tp1 = dec!(0.6);
        assert!(matches!(
            ChallengeAggregator::new(rules),
            Err(ConfigError::WeightsDoNotSumToOne(_))
        ));
    }
}
