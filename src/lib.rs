//! Funded-account challenge simulator.
//!
//! Replays closed trades against prop-firm challenge rules: partial exits at
//! up to three take-profit levels, drawdown-aware risk sizing, daily-loss and
//! trailing-drawdown limits, and the two-phase pass/fail progression.

pub mod aggregate;
pub mod challenge;
pub mod error;
pub mod export;
pub mod metrics;
pub mod models;
pub mod trading;

pub use aggregate::{
    prepare_stream, split_into_windows, AggregateResult, AggregateSummary, ChallengeAggregator,
    RejectReason, RejectedTrade, TradeStream,
};
pub use challenge::{
    run_attempt, AttemptOutcome, AttemptResult, BreachKind, ChallengeAttempt, Phase, RiskState,
    SkipReason,
};
pub use error::{ConfigError, InvalidTrade};
pub use models::{ResolvedTrade, Trade, TradeRecord};
pub use trading::{ChallengeRules, OutcomeResolver, RiskThrottle};
