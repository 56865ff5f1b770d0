//! Error types for trade validation and rule configuration.

use rust_decimal::Decimal;
use thiserror::Error;

/// A trade record that cannot be simulated.
///
/// Always recoverable: the record is excluded from its stream and reported,
/// the rest of the stream still runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTrade {
    #[error("symbol is empty")]
    EmptySymbol,

    #[error("missing {field}")]
    MissingPrice { field: &'static str },

    #[error("{field} must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: Decimal },

    #[error("entry and stop loss are equal, risk distance is zero")]
    ZeroRiskDistance,

    #[error("exit reason {reason} requires {level} but it is missing")]
    MissingTarget {
        level: &'static str,
        reason: &'static str,
    },

    #[error("unknown direction: {0}")]
    UnknownDirection(String),

    #[error("unknown exit reason: {0}")]
    UnknownExitReason(String),

    #[error("exit timestamp is before entry timestamp")]
    ExitBeforeEntry,

    #[error("{level} must lie beyond {previous} on the profit side")]
    MisorderedTarget {
        level: &'static str,
        previous: &'static str,
    },

    #[error("R multiple at {level} is out of range")]
    ROutOfRange { level: &'static str },
}

/// A rule set that must not be used to start a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("take-profit weights must sum to 1.0, got {0}")]
    WeightsDoNotSumToOne(Decimal),

    #[error("take-profit weight {level} is negative")]
    NegativeWeight { level: &'static str },

    #[error("starting balance must be positive, got {0}")]
    NonPositiveBalance(Decimal),

    #[error("{field} must be positive")]
    NonPositiveLimit { field: &'static str },

    #[error("{field} profit target must be positive")]
    NonPositiveTarget { field: &'static str },

    #[error("{measure} thresholds must increase with severity: {lower} ({lower_value}) >= {upper} ({upper_value})")]
    NonMonotonicThresholds {
        measure: &'static str,
        lower: &'static str,
        lower_value: Decimal,
        upper: &'static str,
        upper_value: Decimal,
    },

    #[error("risk per trade must not increase with severity: {tier} allows {value}% above {previous}%")]
    RiskNotDecreasing {
        tier: &'static str,
        value: Decimal,
        previous: Decimal,
    },

    #[error("{field} must not be negative")]
    Negative { field: &'static str },
}
