//! Drawdown-aware risk sizing.
//!
//! Loss pressure is checked against an ordered tier table, most severe first;
//! the first tier whose daily-loss or drawdown threshold is reached sets the
//! risk per trade. Profit protection is evaluated separately and caps the
//! number of open positions.

use rust_decimal::Decimal;
use serde::Serialize;

use super::{ChallengeRules, ThrottleThresholds};

/// Sizing tier selected by current account stress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleTier {
    Normal,
    Warning,
    Reduce,
    Halt,
}

#[derive(Debug, Clone, Copy)]
struct TierRule {
    tier: ThrottleTier,
    thresholds: ThrottleThresholds,
    risk_pct: Decimal,
}

impl TierRule {
    fn matches(&self, daily_loss_pct: Decimal, total_dd_pct: Decimal) -> bool {
        daily_loss_pct >= self.thresholds.daily_loss_pct
            || total_dd_pct >= self.thresholds.total_dd_pct
    }
}

/// Risk throttle built from a rule set.
#[derive(Debug, Clone)]
pub struct RiskThrottle {
    /// Most severe first
    tiers: [TierRule; 3],
    base_risk_pct: Decimal,
    max_concurrent_trades: usize,
    ultra_safe_profit_threshold_pct: Decimal,
    ultra_safe_max_trades: usize,
    ultra_safe_risk_pct: Option<Decimal>,
}

impl RiskThrottle {
    pub fn new(rules: &ChallengeRules) -> Self {
        Self {
            tiers: [
                TierRule {
                    tier: ThrottleTier::Halt,
                    thresholds: rules.halt,
                    risk_pct: Decimal::ZERO,
                },
                TierRule {
                    tier: ThrottleTier::Reduce,
                    thresholds: rules.reduce,
                    risk_pct: rules.minimal_risk_pct,
                },
                TierRule {
                    tier: ThrottleTier::Warning,
                    thresholds: rules.warning,
                    risk_pct: rules.reduced_risk_pct,
                },
            ],
            base_risk_pct: rules.risk_per_trade_pct,
            max_concurrent_trades: rules.max_concurrent_trades,
            ultra_safe_profit_threshold_pct: rules.ultra_safe_profit_threshold_pct,
            ultra_safe_max_trades: rules.ultra_safe_max_trades,
            ultra_safe_risk_pct: rules.ultra_safe_risk_pct,
        }
    }

    pub fn tier(&self, daily_loss_pct: Decimal, total_dd_pct: Decimal) -> ThrottleTier {
        self.tiers
            .iter()
            .find(|t| t.matches(daily_loss_pct, total_dd_pct))
            .map(|t| t.tier)
            .unwrap_or(ThrottleTier::Normal)
    }

    /// Allowed risk per trade in percent of equity; zero means halted.
    pub fn risk_pct(&self, daily_loss_pct: Decimal, total_dd_pct: Decimal) -> Decimal {
        self.tiers
            .iter()
            .find(|t| t.matches(daily_loss_pct, total_dd_pct))
            .map(|t| t.risk_pct)
            .unwrap_or(self.base_risk_pct)
    }

    pub fn is_ultra_safe(&self, profit_pct: Decimal) -> bool {
        profit_pct >= self.ultra_safe_profit_threshold_pct
    }

    /// Open-position cap; collapses once the profit cushion is worth protecting.
    pub fn max_concurrent_trades(&self, profit_pct: Decimal) -> usize {
        if self.is_ultra_safe(profit_pct) {
            self.ultra_safe_max_trades
        } else {
            self.max_concurrent_trades
        }
    }

    /// Loss-based risk with the optional profit-protection cap applied on top.
    pub fn sized_risk_pct(
        &self,
        daily_loss_pct: Decimal,
        total_dd_pct: Decimal,
        profit_pct: Decimal,
    ) -> Decimal {
        let risk = self.risk_pct(daily_loss_pct, total_dd_pct);
        match self.ultra_safe_risk_pct {
            Some(cap) if self.is_ultra_safe(profit_pct) => risk.min(cap),
            _ => risk,
        }
    }
}

/// Allowed risk per trade for the given stress levels under `rules`.
pub fn risk_pct(daily_loss_pct: Decimal, total_dd_pct: Decimal, rules: &ChallengeRules) -> Decimal {
    RiskThrottle::new(rules).risk_pct(daily_loss_pct, total_dd_pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_no_stress_is_base_risk() {
        let rules = ChallengeRules::default();
        assert_eq!(risk_pct(Decimal::ZERO, Decimal::ZERO, &rules), rules.risk_per_trade_pct);
    }

    #[test]
    fn test_tiers_first_match_wins() {
        let rules = ChallengeRules::default();
        let throttle = RiskThrottle::new(&rules);

        assert_eq!(throttle.risk_pct(dec!(1.49), dec!(2.99)), dec!(0.5));
        assert_eq!(throttle.risk_pct(dec!(1.5), dec!(0)), dec!(0.3));
        assert_eq!(throttle.risk_pct(dec!(0), dec!(5.0)), dec!(0.2));
        assert_eq!(throttle.risk_pct(dec!(3.5), dec!(0)), Decimal::ZERO);
        // Daily loss in warning, drawdown in halt: halt wins.
        assert_eq!(throttle.risk_pct(dec!(2.0), dec!(7.5)), Decimal::ZERO);
        assert_eq!(throttle.tier(dec!(2.0), dec!(7.5)), ThrottleTier::Halt);
        assert_eq!(throttle.tier(dec!(0.1), dec!(0.1)), ThrottleTier::Normal);
    }

    #[test]
    fn test_monotonic_in_both_inputs() {
        let rules = ChallengeRules::default();
        let throttle = RiskThrottle::new(&rules);
        let grid: Vec<Decimal> = (0..=100).map(|i| Decimal::from(i) / dec!(10)).collect();

        for &dd in &grid {
            let mut previous = throttle.risk_pct(Decimal::ZERO, dd);
            for &daily in &grid {
                let risk = throttle.risk_pct(daily, dd);
                assert!(risk <= previous, "risk rose at daily={daily} dd={dd}");
                previous = risk;
            }
        }
        for &daily in &grid {
            let mut previous = throttle.risk_pct(daily, Decimal::ZERO);
            for &dd in &grid {
                let risk = throttle.risk_pct(daily, dd);
                assert!(risk <= previous, "risk rose at daily={daily} dd={dd}");
                previous = risk;
            }
        }
    }

    #[test]
    fn test_profit_protection_caps_positions() {
        let rules = ChallengeRules::default();
        let throttle = RiskThrottle::new(&rules);

        assert_eq!(throttle.max_concurrent_trades(dec!(6.99)), 2);
        assert_eq!(throttle.max_concurrent_trades(dec!(7.0)), 1);
        // Independent of the loss tiers.
        assert_eq!(throttle.sized_risk_pct(Decimal::ZERO, Decimal::ZERO, dec!(8)), dec!(0.5));
    }

    #[test]
    fn test_ultra_safe_risk_cap() {
        let rules = ChallengeRules {
            ultra_safe_risk_pct: Some(dec!(0.2)),
            ..Default::default()
        };
        let throttle = RiskThrottle::new(&rules);

        assert_eq!(throttle.sized_risk_pct(dec!(0), dec!(0), dec!(1)), dec!(0.5));
        assert_eq!(throttle.sized_risk_pct(dec!(0), dec!(0), dec!(7.5)), dec!(0.2));
        assert_eq!(throttle.sized_risk_pct(dec!(3.6), dec!(0), dec!(7.5)), Decimal::ZERO);
    }
}
