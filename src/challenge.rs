//! Challenge state machine: replays resolved trades against one account.
//!
//! Phases run `Phase1 -> Phase2 -> Passed`; a daily-loss or total-drawdown
//! breach moves any live phase to `Failed`. Both `Passed` and `Failed` are
//! terminal and no later trade touches the account.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::models::{ExitReason, ResolvedTrade};
use crate::trading::{day_key, week_key, ChallengeRules, RiskThrottle, ThrottleTier};

const HUNDRED: Decimal = dec!(100);

/// `part` as % of `whole`; zero for a non-positive base, saturating on overflow.
fn pct_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    part.checked_div(whole)
        .map(|ratio| ratio.saturating_mul(HUNDRED))
        .unwrap_or(Decimal::MAX)
}

/// Stage of a challenge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Phase1,
    Phase2,
    Passed,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Passed | Phase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Phase1 => "phase-1",
            Phase::Phase2 => "phase-2",
            Phase::Passed => "passed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hard rule that ended an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreachKind {
    DailyLoss,
    TotalDrawdown,
}

impl BreachKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreachKind::DailyLoss => "daily-loss",
            BreachKind::TotalDrawdown => "total-drawdown",
        }
    }
}

impl fmt::Display for BreachKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breach {
    pub kind: BreachKind,
    /// Index of the trade whose P/L caused the breach
    pub trade_index: usize,
    /// Daily loss % or drawdown % at the breach, matching `kind`
    pub level_pct: Decimal,
    pub equity: Decimal,
}

/// Why a trade was not taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Throttle returned zero risk
    RiskHalted,
    DailyTradeLimit,
    WeeklyTradeLimit,
    ConcurrentLimit,
    SymbolLimit,
    CumulativeRisk,
    /// Sized P/L does not fit the account's decimal range
    PnlOutOfRange,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::RiskHalted => "risk halted",
            SkipReason::DailyTradeLimit => "daily trade limit",
            SkipReason::WeeklyTradeLimit => "weekly trade limit",
            SkipReason::ConcurrentLimit => "concurrent trade limit",
            SkipReason::SymbolLimit => "per-symbol limit",
            SkipReason::CumulativeRisk => "cumulative risk limit",
            SkipReason::PnlOutOfRange => "pnl out of range",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTrade {
    pub index: usize,
    pub symbol: String,
    pub reason: SkipReason,
}

/// One trade applied to the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedTrade {
    pub index: usize,
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub exit_reason: ExitReason,
    pub phase: Phase,
    pub tier: ThrottleTier,
    pub daily_loss_pct_before: Decimal,
    pub drawdown_pct_before: Decimal,
    pub risk_pct: Decimal,
    pub risk_amount: Decimal,
    /// Realized R after transaction cost
    pub realized_r: Decimal,
    pub pnl: Decimal,
    pub equity_after: Decimal,
}

/// What happened to a single trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeDecision {
    Applied { pnl: Decimal },
    Skipped(SkipReason),
    /// Attempt already terminal
    Ignored,
}

#[derive(Debug, Clone)]
struct OpenPosition {
    symbol: String,
    exit_time: DateTime<Utc>,
    risk_pct: Decimal,
}

/// Mutable account state of one attempt.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub starting_balance: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    /// Equity the active phase's target is measured from
    pub phase_start_equity: Decimal,

    pub day: Option<NaiveDate>,
    pub day_start_equity: Decimal,
    /// Realized P/L of the current trading day
    pub day_pnl: Decimal,
    pub trades_today: usize,

    pub week: Option<(i32, u32)>,
    pub trades_this_week: usize,

    pub phase: Phase,
    pub breach: Option<Breach>,

    open: Vec<OpenPosition>,
}

impl RiskState {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            starting_balance,
            equity: starting_balance,
            peak_equity: starting_balance,
            phase_start_equity: starting_balance,
            day: None,
            day_start_equity: starting_balance,
            day_pnl: Decimal::ZERO,
            trades_today: 0,
            week: None,
            trades_this_week: 0,
            phase: Phase::Phase1,
            breach: None,
            open: Vec::new(),
        }
    }

    /// Today's realized loss as % of the day's opening equity.
    pub fn daily_loss_pct(&self) -> Decimal {
        pct_of((-self.day_pnl).max(Decimal::ZERO), self.day_start_equity)
    }

    /// Decline from peak equity as % of the peak.
    pub fn total_drawdown_pct(&self) -> Decimal {
        pct_of(
            self.peak_equity.saturating_sub(self.equity).max(Decimal::ZERO),
            self.peak_equity,
        )
    }

    /// Profit of the whole attempt as % of the starting balance.
    pub fn profit_pct(&self) -> Decimal {
        pct_of(self.equity.saturating_sub(self.starting_balance), self.starting_balance)
    }

    /// Profit of the active phase as % of its starting equity.
    pub fn phase_profit_pct(&self) -> Decimal {
        pct_of(self.equity.saturating_sub(self.phase_start_equity), self.phase_start_equity)
    }

    pub fn open_positions(&self) -> usize {
        self.open.len()
    }

    /// Reset day/week counters on calendar change and drop positions already closed.
    fn advance_to(&mut self, ts: DateTime<Utc>) {
        let day = day_key(ts);
        if self.day != Some(day) {
            self.day = Some(day);
            self.day_start_equity = self.equity;
            self.day_pnl = Decimal::ZERO;
            self.trades_today = 0;
        }

        let week = week_key(ts);
        if self.week != Some(week) {
            self.week = Some(week);
            self.trades_this_week = 0;
        }

        self.open.retain(|p| p.exit_time > ts);
    }
}

/// Result of one challenge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptResult {
    pub label: String,
    pub outcome: AttemptOutcome,
    pub breach: Option<Breach>,

    pub starting_balance: Decimal,
    pub final_equity: Decimal,
    pub profit: Decimal,
    pub profit_pct: Decimal,

    pub trades_taken: usize,
    pub trades_skipped: usize,
    /// Trades that arrived after the attempt had terminated
    pub trades_unprocessed: usize,

    /// Index of the trade that completed phase 1
    pub phase1_completed_at: Option<usize>,
    pub max_drawdown_pct: Decimal,
    pub worst_daily_loss_pct: Decimal,

    pub first_trade_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,

    pub ledger: Vec<AppliedTrade>,
    pub skipped: Vec<SkippedTrade>,
}

/// Terminal classification used by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Passed,
    Failed(BreachKind),
    /// Stream ended in a live phase
    Incomplete(Phase),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Passed => write!(f, "PASSED"),
            AttemptOutcome::Failed(kind) => write!(f, "FAILED ({kind})"),
            AttemptOutcome::Incomplete(phase) => write!(f, "INCOMPLETE (in {phase})"),
        }
    }
}

impl fmt::Display for AttemptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^60}", format!(" ATTEMPT {} ", self.label))?;
        if let (Some(first), Some(last)) = (self.first_trade_at, self.last_trade_at) {
            writeln!(f, "Period: {} to {}", first.format("%Y-%m-%d"), last.format("%Y-%m-%d"))?;
        }
        writeln!(f, "Outcome:      {}", self.outcome)?;
        if let Some(b) = &self.breach {
            writeln!(f, "Breach:       {} at trade #{} ({:.2}%)", b.kind, b.trade_index, b.level_pct)?;
        }
        if let Some(idx) = self.phase1_completed_at {
            writeln!(f, "Phase 1 done: trade #{}", idx)?;
        }
        writeln!(f)?;
        writeln!(f, "Start:        ${:.2}", self.starting_balance)?;
        writeln!(f, "Final:        ${:.2}", self.final_equity)?;
        writeln!(f, "Profit:       ${:.2} ({:.2}%)", self.profit, self.profit_pct)?;
        writeln!(f, "Max DD:       {:.2}%", self.max_drawdown_pct)?;
        writeln!(f, "Worst day:    {:.2}%", self.worst_daily_loss_pct)?;
        writeln!(
            f,
            "Trades:       {} taken, {} skipped, {} unprocessed",
            self.trades_taken, self.trades_skipped, self.trades_unprocessed
        )?;
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

/// One attempt in progress. Feed trades in chronological order with [`apply`](Self::apply).
pub struct ChallengeAttempt<'a> {
    rules: &'a ChallengeRules,
    throttle: RiskThrottle,
    state: RiskState,
    ledger: Vec<AppliedTrade>,
    skipped: Vec<SkippedTrade>,
    unprocessed: usize,
    phase1_completed_at: Option<usize>,
    max_drawdown_pct: Decimal,
    worst_daily_loss_pct: Decimal,
    first_trade_at: Option<DateTime<Utc>>,
    last_trade_at: Option<DateTime<Utc>>,
}

impl<'a> ChallengeAttempt<'a> {
    /// Start an attempt; invalid rules are refused here.
    pub fn new(rules: &'a ChallengeRules) -> Result<Self, ConfigError> {
        rules.validate()?;
        Ok(Self::with_validated(rules))
    }

    pub(crate) fn with_validated(rules: &'a ChallengeRules) -> Self {
        Self {
            rules,
            throttle: RiskThrottle::new(rules),
            state: RiskState::new(rules.starting_balance),
            ledger: Vec::new(),
            skipped: Vec::new(),
            unprocessed: 0,
            phase1_completed_at: None,
            max_drawdown_pct: Decimal::ZERO,
            worst_daily_loss_pct: Decimal::ZERO,
            first_trade_at: None,
            last_trade_at: None,
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.phase.is_terminal()
    }

    /// True once any trade has been offered to this attempt.
    pub fn has_started(&self) -> bool {
        self.first_trade_at.is_some()
    }

    /// Apply one trade. `index` is the trade's position in its stream.
    pub fn apply(&mut self, index: usize, resolved: &ResolvedTrade) -> TradeDecision {
        if self.is_terminal() {
            self.unprocessed += 1;
            return TradeDecision::Ignored;
        }

        let trade = &resolved.trade;
        let ts = trade.entry_time();
        self.first_trade_at.get_or_insert(ts);
        self.last_trade_at = Some(ts);

        self.state.advance_to(ts);

        let daily_loss_pct = self.state.daily_loss_pct();
        let drawdown_pct = self.state.total_drawdown_pct();
        let profit_pct = self.state.profit_pct();
        let tier = self.throttle.tier(daily_loss_pct, drawdown_pct);
        let risk_pct = self
            .throttle
            .sized_risk_pct(daily_loss_pct, drawdown_pct, profit_pct);

        if let Some(reason) = self.gate(trade.symbol(), risk_pct, profit_pct) {
            debug!(
                index,
                symbol = %trade.symbol(),
                reason = reason.as_str(),
                daily_loss_pct = %daily_loss_pct.round_dp(2),
                drawdown_pct = %drawdown_pct.round_dp(2),
                "Trade skipped"
            );
            return self.skip(index, trade.symbol(), reason);
        }

        let Some((risk_amount, realized_r, pnl)) = self.settle(resolved, risk_pct) else {
            warn!(
                index,
                symbol = %trade.symbol(),
                r = %resolved.realized_r,
                equity = %self.state.equity.round_dp(2),
                "Trade P/L out of range, skipped"
            );
            return self.skip(index, trade.symbol(), SkipReason::PnlOutOfRange);
        };

        let st = &mut self.state;
        st.equity += pnl;
        st.day_pnl += pnl;
        if st.equity > st.peak_equity {
            st.peak_equity = st.equity;
        }
        st.trades_today += 1;
        st.trades_this_week += 1;
        st.open.push(OpenPosition {
            symbol: trade.symbol().to_string(),
            exit_time: trade.exit_time(),
            risk_pct,
        });

        let phase = st.phase;
        let daily_after = st.daily_loss_pct();
        let drawdown_after = st.total_drawdown_pct();
        self.max_drawdown_pct = self.max_drawdown_pct.max(drawdown_after);
        self.worst_daily_loss_pct = self.worst_daily_loss_pct.max(daily_after);

        debug!(
            index,
            symbol = %trade.symbol(),
            risk_pct = %risk_pct,
            r = %realized_r,
            pnl = %pnl.round_dp(2),
            equity = %st.equity.round_dp(2),
            "Trade applied"
        );

        self.ledger.push(AppliedTrade {
            index,
            symbol: trade.symbol().to_string(),
            entry_time: ts,
            exit_reason: trade.exit_reason(),
            phase,
            tier,
            daily_loss_pct_before: daily_loss_pct,
            drawdown_pct_before: drawdown_pct,
            risk_pct,
            risk_amount,
            realized_r,
            pnl,
            equity_after: self.state.equity,
        });

        if !self.check_breach(index, daily_after, drawdown_after) {
            self.check_target(index);
        }

        TradeDecision::Applied { pnl }
    }

    fn skip(&mut self, index: usize, symbol: &str, reason: SkipReason) -> TradeDecision {
        self.skipped.push(SkippedTrade {
            index,
            symbol: symbol.to_string(),
            reason,
        });
        TradeDecision::Skipped(reason)
    }

    /// Risk amount, net R and P/L for one trade, or `None` if any step
    /// overflows the decimal range.
    fn settle(&self, resolved: &ResolvedTrade, risk_pct: Decimal) -> Option<(Decimal, Decimal, Decimal)> {
        let st = &self.state;
        let risk_amount = st.equity.checked_mul(risk_pct)?.checked_div(HUNDRED)?;
        let realized_r = resolved.realized_r.checked_sub(self.rules.transaction_cost_r)?;
        // Settled in account currency cents.
        let pnl = risk_amount.checked_mul(realized_r)?.round_dp(2);
        st.equity.checked_add(pnl)?;
        st.day_pnl.checked_add(pnl)?;
        Some((risk_amount, realized_r, pnl))
    }

    /// Entry gates in priority order; `None` means the trade may be taken.
    fn gate(&self, symbol: &str, risk_pct: Decimal, profit_pct: Decimal) -> Option<SkipReason> {
        let st = &self.state;
        let rules = self.rules;

        if risk_pct <= Decimal::ZERO {
            return Some(SkipReason::RiskHalted);
        }
        if st.trades_today >= rules.max_trades_per_day {
            return Some(SkipReason::DailyTradeLimit);
        }
        if st.trades_this_week >= rules.max_trades_per_week {
            return Some(SkipReason::WeeklyTradeLimit);
        }
        if st.open.len() >= self.throttle.max_concurrent_trades(profit_pct) {
            return Some(SkipReason::ConcurrentLimit);
        }
        let same_symbol = st.open.iter().filter(|p| p.symbol == symbol).count();
        if same_symbol >= rules.max_trades_per_symbol {
            return Some(SkipReason::SymbolLimit);
        }
        let open_risk: Decimal = st.open.iter().map(|p| p.risk_pct).sum();
        if open_risk + risk_pct > rules.max_cumulative_risk_pct {
            return Some(SkipReason::CumulativeRisk);
        }
        None
    }

    fn check_breach(&mut self, index: usize, daily_loss_pct: Decimal, drawdown_pct: Decimal) -> bool {
        let kind = if daily_loss_pct >= self.rules.max_daily_loss_pct {
            (BreachKind::DailyLoss, daily_loss_pct)
        } else if drawdown_pct >= self.rules.max_total_drawdown_pct {
            (BreachKind::TotalDrawdown, drawdown_pct)
        } else {
            return false;
        };

        let breach = Breach {
            kind: kind.0,
            trade_index: index,
            level_pct: kind.1,
            equity: self.state.equity,
        };
        warn!(
            breach = breach.kind.as_str(),
            index,
            level_pct = %breach.level_pct.round_dp(2),
            equity = %breach.equity.round_dp(2),
            phase = self.state.phase.as_str(),
            "Challenge failed"
        );
        self.state.phase = Phase::Failed;
        self.state.breach = Some(breach);
        true
    }

    fn check_target(&mut self, index: usize) {
        let st = &mut self.state;
        let target = match st.phase {
            Phase::Phase1 => self.rules.phase1_target_pct,
            Phase::Phase2 => self.rules.phase2_target_pct,
            Phase::Passed | Phase::Failed => return,
        };
        if st.phase_profit_pct() < target {
            return;
        }

        match st.phase {
            Phase::Phase1 => {
                info!(index, equity = %st.equity.round_dp(2), "Phase 1 target reached");
                st.phase = Phase::Phase2;
                st.phase_start_equity = st.equity;
                st.peak_equity = st.equity;
                self.phase1_completed_at = Some(index);
            }
            _ => {
                info!(index, equity = %st.equity.round_dp(2), "Phase 2 target reached, challenge passed");
                st.phase = Phase::Passed;
            }
        }
    }

    /// Close the attempt and report.
    pub fn finish(self, label: impl Into<String>) -> AttemptResult {
        let st = self.state;
        let outcome = match (st.phase, &st.breach) {
            (Phase::Passed, _) => AttemptOutcome::Passed,
            (Phase::Failed, Some(b)) => AttemptOutcome::Failed(b.kind),
            (phase, _) => AttemptOutcome::Incomplete(phase),
        };
        let profit = st.equity.saturating_sub(st.starting_balance);

        AttemptResult {
            label: label.into(),
            outcome,
            breach: st.breach.clone(),
            starting_balance: st.starting_balance,
            final_equity: st.equity,
            profit,
            profit_pct: pct_of(profit, st.starting_balance),
            trades_taken: self.ledger.len(),
            trades_skipped: self.skipped.len(),
            trades_unprocessed: self.unprocessed,
            phase1_completed_at: self.phase1_completed_at,
            max_drawdown_pct: self.max_drawdown_pct,
            worst_daily_loss_pct: self.worst_daily_loss_pct,
            first_trade_at: self.first_trade_at,
            last_trade_at: self.last_trade_at,
            ledger: self.ledger,
            skipped: self.skipped,
        }
    }
}

/// Chronological processing order: entry time, then symbol; ties keep stream order.
pub fn chronological_order(trades: &[ResolvedTrade]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..trades.len()).collect();
    order.sort_by(|&a, &b| {
        let (ta, tb) = (&trades[a].trade, &trades[b].trade);
        ta.entry_time()
            .cmp(&tb.entry_time())
            .then_with(|| ta.symbol().cmp(tb.symbol()))
    });
    order
}

/// Run one full attempt over a trade stream.
pub fn run_attempt(
    label: impl Into<String>,
    rules: &ChallengeRules,
    trades: &[ResolvedTrade],
) -> Result<AttemptResult, ConfigError> {
    rules.validate()?;
    Ok(replay(label, rules, trades))
}

/// Replay with rules already validated.
pub(crate) fn replay(
    label: impl Into<String>,
    rules: &ChallengeRules,
    trades: &[ResolvedTrade],
) -> AttemptResult {
    let mut attempt = ChallengeAttempt::with_validated(rules);

    for idx in chronological_order(trades) {
        attempt.apply(idx, &trades[idx]);
    }

    let result = attempt.finish(label);
    info!(
        attempt = %result.label,
        outcome = %result.outcome,
        profit_pct = %result.profit_pct.round_dp(2),
        taken = result.trades_taken,
        skipped = result.trades_skipped,
        "Attempt finished"
    );
    result
}
