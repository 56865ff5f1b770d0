//! Flat per-trade export for spreadsheets.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{instrument, ExitReason, ResolvedTrade};

/// One CSV row. Prices are fixed to 5 places; absent targets read `N/A`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeExportRecord {
    #[serde(rename = "Trade #")]
    pub trade_no: usize,
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Direction")]
    pub direction: String,
    #[serde(rename = "Confluence")]
    pub confluence: String,
    #[serde(rename = "Entry Date")]
    pub entry_date: String,
    #[serde(rename = "Entry Price")]
    pub entry_price: String,
    #[serde(rename = "Stop Loss")]
    pub stop_loss: String,
    #[serde(rename = "TP1")]
    pub tp1: String,
    #[serde(rename = "TP2")]
    pub tp2: String,
    #[serde(rename = "TP3")]
    pub tp3: String,
    #[serde(rename = "Exit Date")]
    pub exit_date: String,
    #[serde(rename = "Exit Price")]
    pub exit_price: String,
    #[serde(rename = "Exit Reason")]
    pub exit_reason: String,
    #[serde(rename = "TP Hit")]
    pub tp_hit: String,
    #[serde(rename = "SL Hit")]
    pub sl_hit: String,
    #[serde(rename = "R Multiple")]
    pub r_multiple: String,
    #[serde(rename = "Result")]
    pub result: String,
    #[serde(rename = "Risk Pips")]
    pub risk_pips: String,
    /// Whether the stop distance sits inside the asset class's usual band
    #[serde(rename = "Risk In Band")]
    pub risk_in_band: String,
}

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

fn price(p: Decimal) -> String {
    format!("{:.5}", p)
}

fn optional_price(p: Option<Decimal>) -> String {
    p.map(price).unwrap_or_else(|| "N/A".to_string())
}

impl TradeExportRecord {
    /// Project a resolved trade; `trade_no` is 1-based.
    pub fn from_resolved(trade_no: usize, resolved: &ResolvedTrade) -> Self {
        let t = &resolved.trade;
        let reason = t.exit_reason();

        let tp_hit = match reason.target_reached() {
            0 => "None".to_string(),
            n => format!("TP{n}"),
        };
        let risk_pips = instrument::to_pips(t.symbol(), t.risk_distance());
        let (min_pips, max_pips) = instrument::stop_distance_limits(t.symbol());
        let in_band = risk_pips >= min_pips && risk_pips <= max_pips;

        Self {
            trade_no,
            symbol: t.symbol().to_string(),
            direction: t.direction().as_str().to_string(),
            confluence: format!("{}/7", t.confluence_score()),
            entry_date: t.entry_time().format(DATE_FORMAT).to_string(),
            entry_price: price(t.entry_price()),
            stop_loss: price(t.stop_loss()),
            tp1: optional_price(t.target(1)),
            tp2: optional_price(t.target(2)),
            tp3: optional_price(t.target(3)),
            exit_date: t.exit_time().format(DATE_FORMAT).to_string(),
            exit_price: price(t.exit_price()),
            exit_reason: reason.as_str().to_string(),
            tp_hit,
            sl_hit: if reason == ExitReason::StopLoss { "Yes" } else { "No" }.to_string(),
            r_multiple: format!("{:+.2}R", resolved.realized_r),
            result: resolved.result().as_str().to_string(),
            risk_pips: format!("{:.1}", risk_pips),
            risk_in_band: if in_band { "Yes" } else { "No" }.to_string(),
        }
    }
}

/// All rows for a stream, numbered in stream order.
pub fn export_records(trades: &[ResolvedTrade]) -> Vec<TradeExportRecord> {
    trades
        .iter()
        .enumerate()
        .map(|(i, t)| TradeExportRecord::from_resolved(i + 1, t))
        .collect()
}

/// Write rows with a header line to any writer.
pub fn write_csv<W: io::Write>(writer: W, trades: &[ResolvedTrade]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
    for record in export_records(trades) {
        writer
            .serialize(&record)
            .context("Failed to write trade export record")?;
    }
    writer.flush().context("Failed to flush trade export")?;
    Ok(())
}

pub fn write_csv_file(path: impl AsRef<Path>, trades: &[ResolvedTrade]) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create export file {}", path.display()))?;
    write_csv(file, trades).with_context(|| format!("Failed to export trades to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, Trade, TradeRecord};
    use crate::trading::{OutcomeResolver, TakeProfitWeights};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn resolved(reason: ExitReason) -> ResolvedTrade {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();
        let trade: Trade = TradeRecord::new("EUR_USD", Direction::Long, ts, dec!(1.08500), dec!(1.08250), reason)
            .with_targets(Some(dec!(1.08875)), Some(dec!(1.09250)), None)
            .with_exit(ts + chrono::Duration::hours(5), None)
            .with_confluence(5)
            .try_into()
            .unwrap();
        OutcomeResolver::new(TakeProfitWeights::default()).resolve(trade).unwrap()
    }

    #[test]
    fn test_row_projection() {
        let row = TradeExportRecord::from_resolved(1, &resolved(ExitReason::TakeProfit2));

        assert_eq!(row.direction, "LONG");
        assert_eq!(row.confluence, "5/7");
        assert_eq!(row.entry_date, "2024-03-04 09:30");
        assert_eq!(row.entry_price, "1.08500");
        assert_eq!(row.tp3, "N/A");
        assert_eq!(row.exit_price, "1.09250");
        assert_eq!(row.tp_hit, "TP2");
        assert_eq!(row.sl_hit, "No");
        // 0.5 * 1.5 + 0.5 * 3.0
        assert_eq!(row.r_multiple, "+2.25R");
        assert_eq!(row.result, "WIN");
        assert_eq!(row.risk_pips, "25.0");
        assert_eq!(row.risk_in_band, "Yes");
    }

    #[test]
    fn test_stop_loss_row() {
        let row = TradeExportRecord::from_resolved(3, &resolved(ExitReason::StopLoss));
        assert_eq!(row.tp_hit, "None");
        assert_eq!(row.sl_hit, "Yes");
        assert_eq!(row.r_multiple, "-1.00R");
        assert_eq!(row.result, "LOSS");
    }

    #[test]
    fn test_csv_header_and_rows() {
        let trades = vec![resolved(ExitReason::TakeProfit2), resolved(ExitReason::StopLoss)];
        let mut buf = Vec::new();
        write_csv(&mut buf, &trades).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Trade #,Symbol,Direction,Confluence,Entry Date,Entry Price,Stop Loss,TP1,TP2,TP3,\
             Exit Date,Exit Price,Exit Reason,TP Hit,SL Hit,R Multiple,Result,Risk Pips,Risk In Band"
        );
        assert!(lines.next().unwrap().starts_with("1,EUR_USD,LONG,5/7,"));
        assert!(lines.next().unwrap().starts_with("2,EUR_USD,LONG,"));
        assert!(lines.next().is_none());
    }
}
