//! Turns a closed trade into its partial fills.
//!
//! Every R multiple is recomputed from the trade's own price levels:
//! `(target - entry) / risk` for longs, `(entry - target) / risk` for shorts.
//! A target the exit reason claims was reached must be present; it is never
//! replaced by the entry price.

use rust_decimal::Decimal;

use super::TakeProfitWeights;
use crate::error::InvalidTrade;
use crate::models::{ExitReason, FillLevel, PartialFill, ResolvedTrade, Trade};

/// Maps exit reasons onto partial closes using the configured weights.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeResolver {
    weights: TakeProfitWeights,
}

impl OutcomeResolver {
    pub fn new(weights: TakeProfitWeights) -> Self {
        Self { weights }
    }

    /// Resolve a trade, keeping it together with its fills.
    pub fn resolve(&self, trade: Trade) -> Result<ResolvedTrade, InvalidTrade> {
        let fills = self.fills(&trade)?;
        let realized_r = fills
            .iter()
            .try_fold(Decimal::ZERO, |acc, f| acc.checked_add(f.weighted_r()))
            .ok_or(InvalidTrade::ROutOfRange { level: "realized" })?;
        Ok(ResolvedTrade {
            trade,
            fills,
            realized_r,
        })
    }

    /// Ordered partial fills; weights sum to one.
    pub fn fills(&self, trade: &Trade) -> Result<Vec<PartialFill>, InvalidTrade> {
        let w = &self.weights;
        let reason = trade.exit_reason();

        let fills = match reason {
            ExitReason::StopLoss => vec![PartialFill::new(
                FillLevel::StopLoss,
                Decimal::NEGATIVE_ONE,
                Decimal::ONE,
            )],
            // Stop moved to entry after TP1; the remainder closes flat.
            ExitReason::TakeProfit1 | ExitReason::TakeProfit1Trail => vec![
                PartialFill::new(FillLevel::Tp1, target_r(trade, 1)?, w.tp1),
                PartialFill::new(FillLevel::Breakeven, Decimal::ZERO, w.tp2 + w.tp3),
            ],
            // TP3 never reached, so its share closes with TP2.
            ExitReason::TakeProfit2 => vec![
                PartialFill::new(FillLevel::Tp1, target_r(trade, 1)?, w.tp1),
                PartialFill::new(FillLevel::Tp2, target_r(trade, 2)?, w.tp2 + w.tp3),
            ],
            ExitReason::TakeProfit3 => vec![
                PartialFill::new(FillLevel::Tp1, target_r(trade, 1)?, w.tp1),
                PartialFill::new(FillLevel::Tp2, target_r(trade, 2)?, w.tp2),
                PartialFill::new(FillLevel::Tp3, target_r(trade, 3)?, w.tp3),
            ],
        };

        Ok(fills)
    }
}

fn target_r(trade: &Trade, level: u8) -> Result<Decimal, InvalidTrade> {
    let name = match level {
        1 => "tp1",
        2 => "tp2",
        _ => "tp3",
    };
    let price = trade.target(level).ok_or(InvalidTrade::MissingTarget {
        level: name,
        reason: trade.exit_reason().as_str(),
    })?;
    trade
        .r_multiple_at(price)
        .ok_or(InvalidTrade::ROutOfRange { level: name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, TradeRecord};
    use crate::trading::WEIGHT_TOLERANCE;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn long_trade(reason: ExitReason, tps: (Option<Decimal>, Option<Decimal>, Option<Decimal>)) -> Trade {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        TradeRecord::new("EUR_USD", Direction::Long, ts, dec!(100), dec!(90), reason)
            .with_targets(tps.0, tps.1, tps.2)
            .with_exit(ts + chrono::Duration::hours(6), Some(dec!(101)))
            .try_into()
            .unwrap()
    }

    fn resolver() -> OutcomeResolver {
        OutcomeResolver::new(TakeProfitWeights::default())
    }

    const FULL: (Option<Decimal>, Option<Decimal>, Option<Decimal>) =
        (Some(dec!(115)), Some(dec!(130)), Some(dec!(150)));

    #[test]
    fn test_tp3_runner() {
        let resolved = resolver()
            .resolve(long_trade(ExitReason::TakeProfit3, FULL))
            .unwrap();

        let rs: Vec<_> = resolved.fills.iter().map(|f| f.r_multiple).collect();
        let ws: Vec<_> = resolved.fills.iter().map(|f| f.weight).collect();
        assert_eq!(rs, vec![dec!(1.5), dec!(3), dec!(5)]);
        assert_eq!(ws, vec![dec!(0.5), dec!(0.3), dec!(0.2)]);
        assert_eq!(resolved.realized_r, dec!(2.65));
    }

    #[test]
    fn test_stop_loss_is_minus_one() {
        let resolved = resolver()
            .resolve(long_trade(ExitReason::StopLoss, (None, None, None)))
            .unwrap();
        assert_eq!(resolved.fills.len(), 1);
        assert_eq!(resolved.fills[0].level, FillLevel::StopLoss);
        assert_eq!(resolved.realized_r, dec!(-1));
    }

    #[test]
    fn test_tp2_absorbs_tp3_weight() {
        let resolved = resolver()
            .resolve(long_trade(ExitReason::TakeProfit2, (Some(dec!(115)), Some(dec!(130)), None)))
            .unwrap();
        assert_eq!(resolved.fills[1].level, FillLevel::Tp2);
        assert_eq!(resolved.fills[1].weight, dec!(0.5));
        // 0.5 * 1.5 + 0.5 * 3.0
        assert_eq!(resolved.realized_r, dec!(2.25));
    }

    #[test]
    fn test_tp1_trail_closes_remainder_at_breakeven() {
        for reason in [ExitReason::TakeProfit1Trail, ExitReason::TakeProfit1] {
            let resolved = resolver()
                .resolve(long_trade(reason, (Some(dec!(115)), None, None)))
                .unwrap();
            assert_eq!(resolved.fills[1].level, FillLevel::Breakeven);
            assert_eq!(resolved.fills[1].r_multiple, Decimal::ZERO);
            assert_eq!(resolved.fills[1].weight, dec!(0.5));
            assert_eq!(resolved.realized_r, dec!(0.75));
        }
    }

    #[test]
    fn test_short_trade_r_from_levels() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let trade: Trade = TradeRecord::new("USD_JPY", Direction::Short, ts, dec!(150.00), dec!(151.00), ExitReason::TakeProfit2)
            .with_targets(Some(dec!(148.50)), Some(dec!(147.00)), Some(dec!(145.00)))
            .try_into()
            .unwrap();
        let resolved = resolver().resolve(trade).unwrap();
        assert_eq!(resolved.fills[0].r_multiple, dec!(1.5));
        assert_eq!(resolved.fills[1].r_multiple, dec!(3));
    }

    #[test]
    fn test_missing_target_rejected_not_defaulted() {
        let err = resolver()
            .resolve(long_trade(ExitReason::TakeProfit3, (Some(dec!(115)), Some(dec!(130)), None)))
            .unwrap_err();
        assert_eq!(
            err,
            InvalidTrade::MissingTarget {
                level: "tp3",
                reason: "TP3"
            }
        );

        let err = resolver()
            .resolve(long_trade(ExitReason::TakeProfit2, (None, Some(dec!(130)), None)))
            .unwrap_err();
        assert!(matches!(err, InvalidTrade::MissingTarget { level: "tp1", .. }));
    }

    #[test]
    fn test_r_beyond_decimal_range_rejected() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        // 1e-20 risk distance: TP1 at 1e9 is about 1e29R.
        let trade: Trade = TradeRecord::new("EUR_USD", Direction::Long, ts, dec!(1), dec!(0.99999999999999999999), ExitReason::TakeProfit1)
            .with_targets(Some(dec!(1000000000)), None, None)
            .try_into()
            .unwrap();
        assert_eq!(
            resolver().resolve(trade).unwrap_err(),
            InvalidTrade::ROutOfRange { level: "tp1" }
        );
    }

    #[test]
    fn test_weights_always_sum_to_one() {
        let weight_sets = [
            (dec!(0.5), dec!(0.3), dec!(0.2)),
            (dec!(0.34), dec!(0.33), dec!(0.33)),
            (dec!(1), dec!(0), dec!(0)),
            (dec!(0.1), dec!(0.6), dec!(0.3)),
        ];
        let reasons = [
            ExitReason::StopLoss,
            ExitReason::TakeProfit1,
            ExitReason::TakeProfit1Trail,
            ExitReason::TakeProfit2,
            ExitReason::TakeProfit3,
        ];

        for (tp1, tp2, tp3) in weight_sets {
            let resolver = OutcomeResolver::new(TakeProfitWeights { tp1, tp2, tp3 });
            for reason in reasons {
                let resolved = resolver.resolve(long_trade(reason, FULL)).unwrap();
                assert!((resolved.total_weight() - Decimal::ONE).abs() <= WEIGHT_TOLERANCE);
            }
        }
    }
}
