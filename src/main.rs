//! Funded-Account Challenge Simulator
//!
//! Replays a closed-trade log against challenge rules and reports how many
//! attempts pass, fail or run out of trades.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use challenge_sim::export;
use challenge_sim::{
    prepare_stream, split_into_windows, AggregateResult, ChallengeAggregator, ChallengeRules,
    TradeRecord,
};

/// Funded-account challenge simulator CLI.
#[derive(Parser)]
#[command(name = "challenge-sim")]
#[command(about = "Replay closed trades against funded-account challenge rules", long_about = None)]
struct Cli {
    /// Rules file (JSON); missing keys fall back to the 10K preset
    #[arg(short, long, env = "CHALLENGE_RULES")]
    rules: Option<PathBuf>,

    /// Built-in rule preset, used when no rules file is given
    #[arg(short, long, value_enum, default_value = "10k", env = "CHALLENGE_PRESET")]
    preset: Preset,

    /// Log level or filter directives (e.g. `debug`, `info,challenge_sim=trace`)
    #[arg(short, long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    #[value(name = "10k")]
    Small,
    #[value(name = "200k")]
    Large,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the challenge simulation over a trade log
    Run {
        /// Trade log: JSON array of closed trades
        #[arg(short, long, env = "CHALLENGE_TRADES")]
        trades: PathBuf,

        /// Split the log into independent windows of this many days
        #[arg(short, long, conflicts_with = "sequential")]
        window_days: Option<u32>,

        /// Run back-to-back challenges: a new account starts after each pass or fail
        #[arg(short, long)]
        sequential: bool,

        /// Write per-trade rows to this CSV file
        #[arg(long)]
        export_csv: Option<PathBuf>,

        /// Print the summary as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Print every attempt's detailed summary
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show the effective rules
    Rules,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(&cli.log_level))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let rules = load_rules(cli.rules.as_deref(), cli.preset)?;

    match cli.command {
        Commands::Run {
            trades,
            window_days,
            sequential,
            export_csv,
            json,
            verbose,
        } => {
            let records = load_trades(&trades)?;
            info!(records = records.len(), file = %trades.display(), "Loaded trade log");

            let aggregator = ChallengeAggregator::new(rules.clone())?;
            let label = trades
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "trades".to_string());
            let stream = prepare_stream(label, records, &rules);

            if let Some(path) = &export_csv {
                export::write_csv_file(path, &stream.trades)?;
                println!("Trade details exported to: {}", path.display());
            }

            let result = if sequential {
                aggregator.run_sequential(&stream)
            } else if let Some(days) = window_days {
                let windows = split_into_windows(&stream, days);
                info!(windows = windows.len(), days, "Split trade log into windows");
                aggregator.run(&windows)
            } else {
                aggregator.run(std::slice::from_ref(&stream))
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result.summary)?);
            } else {
                print_result(&result, verbose);
            }
        }

        Commands::Rules => {
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
    }

    Ok(())
}

fn load_rules(path: Option<&Path>, preset: Preset) -> Result<ChallengeRules> {
    let rules = match path {
        Some(path) => ChallengeRules::from_json_file(path)?,
        None => match preset {
            Preset::Small => ChallengeRules::default(),
            Preset::Large => ChallengeRules::ftmo_200k(),
        },
    };
    rules.validate().context("Invalid challenge rules")?;
    Ok(rules)
}

fn load_trades(path: &Path) -> Result<Vec<TradeRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trade log {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse trade log {}", path.display()))
}

fn print_result(result: &AggregateResult, verbose: bool) {
    if verbose {
        for attempt in &result.attempts {
            println!("{}", attempt);
        }
    }

    println!(
        "\n{:<28} {:<24} {:>9} {:>6} {:>6}",
        "ATTEMPT", "OUTCOME", "PROFIT%", "TAKEN", "SKIP"
    );
    println!("{}", "-".repeat(77));
    for a in &result.attempts {
        println!(
            "{:<28} {:<24} {:>8.2}% {:>6} {:>6}",
            truncate(&a.label, 26),
            a.outcome.to_string(),
            a.profit_pct,
            a.trades_taken,
            a.trades_skipped
        );
    }

    if !result.rejected.is_empty() {
        warn!(count = result.rejected.len(), "Some trade records were rejected");
        println!("\nRejected records:");
        for r in result.rejected.iter().take(20) {
            println!("  #{:<5} {:<12} {}", r.index, r.symbol, r.reason);
        }
        if result.rejected.len() > 20 {
            println!("  ... and {} more", result.rejected.len() - 20);
        }
    }

    println!("{}", result);
}

/// Filter from `--log-level`; unparseable directives fall back to `info`.
fn log_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Truncate a string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_accepts_directives() {
        assert_eq!(log_filter("DEBUG").to_string(), "debug");
        let filter = log_filter("info,challenge_sim=trace").to_string();
        assert!(filter.contains("challenge_sim=trace"));
        assert!(filter.contains("info"));
    }

    #[test]
    fn test_log_filter_falls_back_to_info() {
        assert_eq!(log_filter("challenge_sim=loudest").to_string(), "info");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-label", 8), "a-ver...");
    }
}
