//! Challenge rules: hard limits, sizing tiers, trade caps and partial-exit weights.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tolerance for the take-profit weights summing to one.
pub const WEIGHT_TOLERANCE: Decimal = dec!(0.000000001);

/// Fraction of the position closed at each take-profit level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeProfitWeights {
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub tp3: Decimal,
}

impl TakeProfitWeights {
    pub fn sum(&self) -> Decimal {
        self.tp1 + self.tp2 + self.tp3
    }
}

impl Default for TakeProfitWeights {
    fn default() -> Self {
        Self {
            tp1: dec!(0.50), // Close half at TP1
            tp2: dec!(0.30),
            tp3: dec!(0.20),
        }
    }
}

/// Loss levels (percent) at which a throttle tier starts to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleThresholds {
    /// Today's realized loss as % of the day's opening equity
    pub daily_loss_pct: Decimal,
    /// Decline from peak equity as % of the peak
    pub total_dd_pct: Decimal,
}

/// Rules for one challenge attempt. Read-only once an attempt starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeRules {
    // === Account ===
    pub starting_balance: Decimal,

    // === Hard limits (breach fails the attempt) ===
    pub max_daily_loss_pct: Decimal,
    pub max_total_drawdown_pct: Decimal,

    // === Profit targets ===
    pub phase1_target_pct: Decimal,
    pub phase2_target_pct: Decimal,

    // === Position sizing ===
    /// Risk per trade with no drawdown pressure
    pub risk_per_trade_pct: Decimal,
    /// Risk once the warning tier is reached
    pub reduced_risk_pct: Decimal,
    /// Risk once the reduce tier is reached
    pub minimal_risk_pct: Decimal,
    /// Max summed risk of concurrently open positions
    pub max_cumulative_risk_pct: Decimal,

    // === Safety buffers (stop before breach) ===
    pub warning: ThrottleThresholds,
    pub reduce: ThrottleThresholds,
    pub halt: ThrottleThresholds,

    // === Trade limits ===
    pub max_concurrent_trades: usize,
    pub max_pending_orders: usize,
    pub max_trades_per_day: usize,
    pub max_trades_per_week: usize,
    pub max_trades_per_symbol: usize,

    // === Profit protection ===
    /// Attempt profit % above which only one position may be open
    pub ultra_safe_profit_threshold_pct: Decimal,
    pub ultra_safe_max_trades: usize,
    /// Optional risk cap while profit protection is active
    pub ultra_safe_risk_pct: Option<Decimal>,

    // === Partial closes ===
    pub tp_weights: TakeProfitWeights,

    /// Fixed cost per trade in R, subtracted from realized R
    pub transaction_cost_r: Decimal,

    /// Drop entries on weekends, 1 January and 25 December
    pub skip_non_trading_days: bool,

    /// When set, only these symbols are simulated
    pub symbol_whitelist: Option<Vec<String>>,
}

impl Default for ChallengeRules {
    /// Conservative 10K preset.
    fn default() -> Self {
        Self {
            starting_balance: dec!(10000),

            max_daily_loss_pct: dec!(5.0),
            max_total_drawdown_pct: dec!(10.0),

            phase1_target_pct: dec!(10.0),
            phase2_target_pct: dec!(5.0),

            risk_per_trade_pct: dec!(0.5),
            reduced_risk_pct: dec!(0.3),
            minimal_risk_pct: dec!(0.2),
            max_cumulative_risk_pct: dec!(1.5),

            warning: ThrottleThresholds {
                daily_loss_pct: dec!(1.5),
                total_dd_pct: dec!(3.0),
            },
            reduce: ThrottleThresholds {
                daily_loss_pct: dec!(2.5),
                total_dd_pct: dec!(5.0),
            },
            halt: ThrottleThresholds {
                daily_loss_pct: dec!(3.5),
                total_dd_pct: dec!(7.0),
            },

            max_concurrent_trades: 2,
            max_pending_orders: 3,
            max_trades_per_day: 2,
            max_trades_per_week: 5,
            max_trades_per_symbol: 1,

            ultra_safe_profit_threshold_pct: dec!(7.0),
            ultra_safe_max_trades: 1,
            ultra_safe_risk_pct: None,

            tp_weights: TakeProfitWeights::default(),
            transaction_cost_r: Decimal::ZERO,
            skip_non_trading_days: true,
            symbol_whitelist: None,
        }
    }
}

impl ChallengeRules {
    /// 200K account with the looser position limits of the full-size challenge.
    pub fn ftmo_200k() -> Self {
        Self {
            starting_balance: dec!(200000),
            max_cumulative_risk_pct: dec!(3.0),
            max_concurrent_trades: 7,
            max_pending_orders: 20,
            max_trades_per_day: 10,
            max_trades_per_week: 50,
            max_trades_per_symbol: 1,
            ..Self::default()
        }
    }

    /// Load rules from a JSON file; missing keys take the default preset's values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file {}", path.display()))?;
        let rules: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse rules file {}", path.display()))?;
        rules
            .validate()
            .with_context(|| format!("Invalid rules in {}", path.display()))?;
        Ok(rules)
    }

    pub fn is_whitelisted(&self, symbol: &str) -> bool {
        match &self.symbol_whitelist {
            Some(list) => list.iter().any(|s| s.eq_ignore_ascii_case(symbol)),
            None => true,
        }
    }

    /// Reject rule sets that cannot describe a coherent challenge.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.starting_balance <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveBalance(self.starting_balance));
        }

        positive("max_daily_loss_pct", self.max_daily_loss_pct)?;
        positive("max_total_drawdown_pct", self.max_total_drawdown_pct)?;
        positive("risk_per_trade_pct", self.risk_per_trade_pct)?;
        positive("max_cumulative_risk_pct", self.max_cumulative_risk_pct)?;

        if self.phase1_target_pct <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveTarget { field: "phase1" });
        }
        if self.phase2_target_pct <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveTarget { field: "phase2" });
        }

        self.validate_weights()?;
        self.validate_tiers()?;

        for (field, count) in [
            ("max_concurrent_trades", self.max_concurrent_trades),
            ("max_pending_orders", self.max_pending_orders),
            ("max_trades_per_day", self.max_trades_per_day),
            ("max_trades_per_week", self.max_trades_per_week),
            ("max_trades_per_symbol", self.max_trades_per_symbol),
            ("ultra_safe_max_trades", self.ultra_safe_max_trades),
        ] {
            if count == 0 {
                return Err(ConfigError::NonPositiveLimit { field });
            }
        }

        non_negative("ultra_safe_profit_threshold_pct", self.ultra_safe_profit_threshold_pct)?;
        non_negative("transaction_cost_r", self.transaction_cost_r)?;
        if let Some(cap) = self.ultra_safe_risk_pct {
            non_negative("ultra_safe_risk_pct", cap)?;
        }

        Ok(())
    }

    fn validate_weights(&self) -> Result<(), ConfigError> {
        let w = &self.tp_weights;
        for (level, weight) in [("tp1", w.tp1), ("tp2", w.tp2), ("tp3", w.tp3)] {
            if weight < Decimal::ZERO {
                return Err(ConfigError::NegativeWeight { level });
            }
        }
        let sum = w.sum();
        if (sum - Decimal::ONE).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightsDoNotSumToOne(sum));
        }
        Ok(())
    }

    fn validate_tiers(&self) -> Result<(), ConfigError> {
        let tiers = [
            ("warning", self.warning),
            ("reduce", self.reduce),
            ("halt", self.halt),
        ];

        for (name, t) in tiers {
            non_negative(name, t.daily_loss_pct)?;
            non_negative(name, t.total_dd_pct)?;
        }

        for pair in tiers.windows(2) {
            let (lower, lo) = pair[0];
            let (upper, hi) = pair[1];
            if lo.daily_loss_pct >= hi.daily_loss_pct {
                return Err(ConfigError::NonMonotonicThresholds {
                    measure: "daily loss",
                    lower,
                    lower_value: lo.daily_loss_pct,
                    upper,
                    upper_value: hi.daily_loss_pct,
                });
            }
            if lo.total_dd_pct >= hi.total_dd_pct {
                return Err(ConfigError::NonMonotonicThresholds {
                    measure: "total drawdown",
                    lower,
                    lower_value: lo.total_dd_pct,
                    upper,
                    upper_value: hi.total_dd_pct,
                });
            }
        }

        non_negative("minimal_risk_pct", self.minimal_risk_pct)?;
        if self.reduced_risk_pct > self.risk_per_trade_pct {
            return Err(ConfigError::RiskNotDecreasing {
                tier: "warning",
                value: self.reduced_risk_pct,
                previous: self.risk_per_trade_pct,
            });
        }
        if self.minimal_risk_pct > self.reduced_risk_pct {
            return Err(ConfigError::RiskNotDecreasing {
                tier: "reduce",
                value: self.minimal_risk_pct,
                previous: self.reduced_risk_pct,
            });
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO {
        return Err(ConfigError::NonPositiveLimit { field });
    }
    Ok(())
}

fn non_negative(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value < Decimal::ZERO {
        return Err(ConfigError::Negative { field });
    }
    Ok(())
}
