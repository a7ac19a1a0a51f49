//! CLI definition and dispatch.

use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use crate::adapters::csv_quote_adapter::CsvQuoteAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_state_adapter::JsonStateAdapter;
use crate::adapters::retry_quote::{RetryPolicy, RetryingQuotes};
use crate::adapters::system_clock::SystemClock;
use crate::domain::config_validation::validate_engine_config;
use crate::domain::engine::EngineConfig;
use crate::domain::error::PredledgerError;
use crate::domain::evaluation::EvaluationResult;
use crate::domain::heartbeat::{Heartbeat, TickReport};
use crate::domain::portfolio::{PortfolioSnapshot, SizingRules};
use crate::domain::regime::RegimeConfig;
use crate::domain::schedule::{GateConfig, ScheduleFlag, parse_time_of_day};
use crate::domain::snapshot::LiveState;
use crate::ports::clock_port::Clock;
use crate::ports::config_port::ConfigPort;
use crate::ports::state_port::StatePort;

#[derive(Parser, Debug)]
#[command(
    name = "predledger",
    about = "Live prediction verification and simulated portfolio engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the heartbeat loop until the process is stopped
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run a single poll and exit
    Tick {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the published state without modifying anything
    Status {
        #[arg(short, long)]
        config: PathBuf,
        /// Day whose flags and stage log to show (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_tracing();
    match cli.command {
        Command::Run { config } => run_heartbeat(&config, false),
        Command::Tick { config } => run_heartbeat(&config, true),
        Command::Status { config, date, json } => run_status(&config, date, json),
        Command::Validate { config } => run_validate(&config),
    }
}

/// `RUST_LOG` wins; otherwise this crate logs at info. Output goes to stderr
/// so `status --json` stays machine readable.
pub fn init_tracing() {
    use tracing_subscriber::prelude::*;

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "predledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn load_validated(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    let adapter = load_config(path)?;
    validate_engine_config(&adapter).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    })?;
    Ok(adapter)
}

pub fn build_engine_config(config: &dyn ConfigPort) -> Result<EngineConfig, PredledgerError> {
    let mut schedule = Vec::new();
    for name in config.get_keys("schedule") {
        let raw = config.get_string("schedule", &name).unwrap_or_default();
        let at = parse_time_of_day(&raw).ok_or_else(|| PredledgerError::ConfigInvalid {
            section: "schedule".into(),
            key: name.clone(),
            reason: format!("invalid time '{raw}', expected HH:MM"),
        })?;
        schedule.push((name, at));
    }

    Ok(EngineConfig {
        tracking_window_days: config.get_int("engine", "tracking_window_days", 1).max(1) as u32,
        initial_capital: config.get_double("portfolio", "initial_capital", 10_000.0),
        sizing: SizingRules {
            risk_per_trade: config.get_double("portfolio", "risk_per_trade", 0.02),
            max_position_fraction: config.get_double("portfolio", "max_position_fraction", 0.20),
            min_position_value: config.get_double("portfolio", "min_position_value", 100.0),
        },
        regime: RegimeConfig {
            window: config.get_int("regime", "window", 6).max(1) as usize,
            confirmations: config.get_int("regime", "confirmations", 2).max(1) as u32,
        },
        gate: GateConfig {
            throttle: Duration::minutes(config.get_int("gate", "throttle_minutes", 30)),
            catch_up: Duration::minutes(config.get_int("gate", "catch_up_minutes", 180)),
        },
        heartbeat_interval: Duration::minutes(config.get_int("heartbeat", "interval_minutes", 30)),
        poll_interval: std::time::Duration::from_secs(
            config.get_int("heartbeat", "poll_seconds", 30).max(1) as u64,
        ),
        schedule,
    })
}

pub fn build_retry_policy(config: &dyn ConfigPort) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.get_int("quotes", "max_attempts", 3).max(1) as u32,
        backoff: std::time::Duration::from_millis(config.get_int("quotes", "backoff_ms", 250).max(0) as u64),
        timeout: std::time::Duration::from_millis(config.get_int("quotes", "timeout_ms", 5000).max(1) as u64),
    }
}

pub fn build_clock(config: &dyn ConfigPort) -> SystemClock {
    SystemClock::with_offset_minutes(config.get_int("engine", "utc_offset_minutes", 60) as i32)
}

pub fn build_quotes(
    config: &dyn ConfigPort,
    clock: Arc<dyn Clock + Send + Sync>,
) -> Result<RetryingQuotes<CsvQuoteAdapter>, PredledgerError> {
    let path = config
        .get_string("quotes", "path")
        .ok_or_else(|| PredledgerError::ConfigMissing {
            section: "quotes".into(),
            key: "path".into(),
        })?;
    let max_age = Duration::minutes(config.get_int("quotes", "max_age_minutes", 60));
    let csv = CsvQuoteAdapter::new(PathBuf::from(path), max_age, clock);
    Ok(RetryingQuotes::new(csv, build_retry_policy(config)))
}

pub fn build_store(config: &dyn ConfigPort) -> Result<Box<dyn StatePort>, PredledgerError> {
    let backend = config
        .get_string("engine", "backend")
        .unwrap_or_else(|| "json".to_string());
    match backend.trim() {
        "json" => {
            let dir = config
                .get_string("engine", "state_dir")
                .ok_or_else(|| PredledgerError::ConfigMissing {
                    section: "engine".into(),
                    key: "state_dir".into(),
                })?;
            Ok(Box::new(JsonStateAdapter::new(dir)?))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            use crate::adapters::sqlite_state_adapter::SqliteStateAdapter;
            Ok(Box::new(SqliteStateAdapter::from_config(config)?))
        }
        other => Err(PredledgerError::ConfigInvalid {
            section: "engine".into(),
            key: "backend".into(),
            reason: format!("backend '{other}' is not available in this build"),
        }),
    }
}

fn run_heartbeat(config_path: &Path, single: bool) -> ExitCode {
    let adapter = match load_validated(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let setup = (|| -> Result<_, PredledgerError> {
        let engine_config = build_engine_config(&adapter)?;
        let store = build_store(&adapter)?;
        let clock = Arc::new(build_clock(&adapter));
        let quotes = build_quotes(&adapter, clock.clone())?;
        Ok((engine_config, store, clock, quotes))
    })();
    let (engine_config, store, clock, quotes) = match setup {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let poll = engine_config.poll_interval;
    let mut heartbeat = match Heartbeat::new(engine_config, &quotes, store.as_ref(), clock.as_ref()) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    if single {
        let report = heartbeat.tick();
        print_tick(&report);
        match report.failed.first() {
            Some((_, e)) => e.into(),
            None => ExitCode::SUCCESS,
        }
    } else {
        info!(config = %config_path.display(), "starting heartbeat");
        heartbeat.run_forever(poll);
        ExitCode::SUCCESS
    }
}

fn print_tick(report: &TickReport) {
    if report.due.is_empty() {
        eprintln!("No jobs due");
        return;
    }
    for output in &report.completed {
        eprintln!(
            "{}: {} | regime {} ({:.0}%) | equity {:.2}",
            output.job,
            format_evaluation(&output.evaluation),
            output.regime.state,
            output.regime.confidence * 100.0,
            output.portfolio.equity
        );
    }
    for (job, e) in &report.failed {
        eprintln!("{job}: failed: {e}");
    }
}

fn format_evaluation(eval: &EvaluationResult) -> String {
    let accuracy = eval
        .accuracy_pct
        .map_or_else(|| "N/A".to_string(), |a| format!("{a:.1}%"));
    format!(
        "{} hit / {} stopped / {} pending, accuracy {}",
        eval.hits, eval.misses, eval.pending, accuracy
    )
}

fn format_opt(value: Option<f64>, scale: f64, suffix: &str) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}{suffix}", v * scale))
}

#[derive(Serialize)]
struct StatusReport {
    date: NaiveDate,
    live: Option<LiveState>,
    portfolio: Option<PortfolioSnapshot>,
    flags: Vec<ScheduleFlag>,
    stages: usize,
}

fn run_status(config_path: &Path, date: Option<NaiveDate>, json: bool) -> ExitCode {
    let adapter = match load_validated(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let gathered = (|| -> Result<StatusReport, PredledgerError> {
        let store = build_store(&adapter)?;
        let date = date.unwrap_or_else(|| build_clock(&adapter).now().date());
        let state = store.load_state()?;
        Ok(StatusReport {
            date,
            live: store.load_live_state()?,
            portfolio: state.as_ref().map(|s| s.ledger.snapshot()),
            flags: state
                .as_ref()
                .map(|s| s.flags.flags_for(date).cloned().collect())
                .unwrap_or_default(),
            stages: store.load_stages(date)?.len(),
        })
    })();
    let report = match gathered {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    if json {
        return match serde_json::to_string_pretty(&report) {
            Ok(s) => {
                println!("{s}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                let err = PredledgerError::from(e);
                eprintln!("error: {err}");
                (&err).into()
            }
        };
    }

    println!("Status for {}", report.date);
    match &report.live {
        Some(live) => {
            println!("  Last job:   {} at {}", live.job, live.timestamp);
            println!("  Sentiment:  {}", live.sentiment);
            println!(
                "  Regime:     {} (confidence {:.0}%, grade {})",
                live.regime.state,
                live.regime.confidence * 100.0,
                live.regime.grade
            );
            println!("  Signals:    {}", format_evaluation(&live.signals));
        }
        None => println!("  Nothing published yet"),
    }
    if let Some(p) = &report.portfolio {
        println!(
            "  Portfolio:  balance {:.2}, equity {:.2}, cash {:.2}, invested {:.2}",
            p.current_balance, p.equity, p.available_cash, p.total_invested
        );
        println!(
            "  P&L:        {:.2} ({:.2}%), {} open, {} closed",
            p.total_pnl, p.total_pnl_pct, p.open_positions, p.metrics.closed_count
        );
        println!(
            "  Metrics:    win rate {}, profit factor {}, max drawdown {}, sharpe {}",
            format_opt(p.metrics.win_rate, 100.0, "%"),
            format_opt(p.metrics.profit_factor, 1.0, ""),
            format_opt(p.metrics.max_drawdown, 100.0, "%"),
            format_opt(p.metrics.sharpe_ratio, 1.0, "")
        );
    }
    for flag in &report.flags {
        println!(
            "  Flag {:<12} sent={} missed={} last_attempt={}",
            flag.content_type,
            flag.sent,
            flag.missed,
            flag.last_attempt_at
                .map_or_else(|| "-".to_string(), |t| t.to_string())
        );
    }
    println!("  Stage entries: {}", report.stages);
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_validated(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let config = match build_engine_config(&adapter) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    eprintln!("Jobs:");
    for job in config.jobs() {
        eprintln!("  {} {:?}", job.name, job.cadence);
    }
    eprintln!(
        "Portfolio: capital {:.2}, risk {:.2}%, max position {:.0}%",
        config.initial_capital,
        config.sizing.risk_per_trade * 100.0,
        config.sizing.max_position_fraction * 100.0
    );
    eprintln!("Config is valid");
    ExitCode::SUCCESS
}
