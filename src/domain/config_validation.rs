//! Configuration validation.
//!
//! Validates every config field up front, before the engine touches state.

use crate::domain::error::PredledgerError;
use crate::domain::schedule::parse_time_of_day;
use crate::ports::config_port::ConfigPort;

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), PredledgerError> {
    validate_backend(config)?;
    validate_utc_offset(config)?;
    validate_at_least(config, "engine", "tracking_window_days", 1, 1)?;
    validate_at_least(config, "heartbeat", "poll_seconds", 30, 1)?;
    validate_at_least(config, "heartbeat", "interval_minutes", 30, 1)?;
    validate_at_least(config, "gate", "throttle_minutes", 30, 1)?;
    validate_at_least(config, "gate", "catch_up_minutes", 180, 0)?;
    validate_schedule(config)?;
    validate_portfolio(config)?;
    validate_regime(config)?;
    validate_quotes(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> PredledgerError {
    PredledgerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn require(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, PredledgerError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(PredledgerError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn validate_at_least(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
    min: i64,
) -> Result<(), PredledgerError> {
    let value = config.get_int(section, key, default);
    if value < min {
        return Err(invalid(section, key, format!("{key} must be at least {min}")));
    }
    Ok(())
}

fn validate_fraction(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<(), PredledgerError> {
    let value = config.get_double(section, key, default);
    if value <= 0.0 || value > 1.0 {
        return Err(invalid(section, key, format!("{key} must be in (0, 1]")));
    }
    Ok(())
}

fn validate_backend(config: &dyn ConfigPort) -> Result<(), PredledgerError> {
    let backend = config
        .get_string("engine", "backend")
        .unwrap_or_else(|| "json".to_string());
    match backend.trim() {
        "json" => {
            require(config, "engine", "state_dir")?;
        }
        "sqlite" => {
            require(config, "sqlite", "path")?;
            validate_at_least(config, "sqlite", "pool_size", 2, 1)?;
        }
        other => {
            return Err(invalid(
                "engine",
                "backend",
                format!("unknown backend '{other}', expected json or sqlite"),
            ));
        }
    }
    Ok(())
}

fn validate_utc_offset(config: &dyn ConfigPort) -> Result<(), PredledgerError> {
    let minutes = config.get_int("engine", "utc_offset_minutes", 60);
    if !(-14 * 60..=14 * 60).contains(&minutes) {
        return Err(invalid(
            "engine",
            "utc_offset_minutes",
            "utc_offset_minutes must be within +/- 840",
        ));
    }
    Ok(())
}

fn validate_schedule(config: &dyn ConfigPort) -> Result<(), PredledgerError> {
    for name in config.get_keys("schedule") {
        if name == crate::domain::schedule::HEARTBEAT_JOB {
            return Err(invalid("schedule", &name, "name is reserved for the heartbeat"));
        }
        let raw = config.get_string("schedule", &name).unwrap_or_default();
        if parse_time_of_day(&raw).is_none() {
            return Err(invalid(
                "schedule",
                &name,
                format!("invalid time '{raw}', expected HH:MM"),
            ));
        }
    }
    Ok(())
}

fn validate_portfolio(config: &dyn ConfigPort) -> Result<(), PredledgerError> {
    let capital = config.get_double("portfolio", "initial_capital", 10_000.0);
    if capital <= 0.0 {
        return Err(invalid(
            "portfolio",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    validate_fraction(config, "portfolio", "risk_per_trade", 0.02)?;
    validate_fraction(config, "portfolio", "max_position_fraction", 0.20)?;
    let min_value = config.get_double("portfolio", "min_position_value", 100.0);
    if min_value < 0.0 {
        return Err(invalid(
            "portfolio",
            "min_position_value",
            "min_position_value must be non-negative",
        ));
    }
    Ok(())
}

fn validate_regime(config: &dyn ConfigPort) -> Result<(), PredledgerError> {
    let confirmations = config.get_int("regime", "confirmations", 2);
    if confirmations < 1 {
        return Err(invalid(
            "regime",
            "confirmations",
            "confirmations must be at least 1",
        ));
    }
    let window = config.get_int("regime", "window", 6);
    if window < confirmations {
        return Err(invalid(
            "regime",
            "window",
            "window must hold at least `confirmations` readings",
        ));
    }
    Ok(())
}

fn validate_quotes(config: &dyn ConfigPort) -> Result<(), PredledgerError> {
    require(config, "quotes", "path")?;
    validate_at_least(config, "quotes", "max_age_minutes", 60, 1)?;
    validate_at_least(config, "quotes", "max_attempts", 3, 1)?;
    validate_at_least(config, "quotes", "backoff_ms", 250, 0)?;
    validate_at_least(config, "quotes", "timeout_ms", 5000, 1)?;
    Ok(())
}
