//! Challenge rules, outcome resolution and risk throttling.

mod calendar;
mod config;
mod resolver;
mod throttle;

pub use calendar::{day_key, is_trading_day, week_key};
pub use config::{ChallengeRules, TakeProfitWeights, ThrottleThresholds, WEIGHT_TOLERANCE};
pub use resolver::OutcomeResolver;
pub use throttle::{risk_pct, RiskThrottle, ThrottleTier};
