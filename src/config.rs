use std::env;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::monitoring::AlertThresholds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} has invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct IssuanceConfig {
    pub seat_capacity: i32,
    pub default_event_id: Option<Uuid>,
    pub ticket_name_patterns: Vec<String>,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            seat_capacity: 1300,
            default_event_id: None,
            ticket_name_patterns: vec![
                "ingresso".to_string(),
                "ticket".to_string(),
                "passaporte".to_string(),
            ],
        }
    }
}

/// Tunable windows for the reconciliation pass. The orphan windows have no
/// derivation beyond operational experience.
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub lookback: Duration,
    pub orphan_match_tolerance: Duration,
    pub orphan_order_min_age: Duration,
    pub orphan_order_max_age: Duration,
    pub price_epsilon: BigDecimal,
    pub lock_ttl: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(24),
            orphan_match_tolerance: Duration::minutes(5),
            orphan_order_min_age: Duration::hours(1),
            orphan_order_max_age: Duration::days(7),
            price_epsilon: BigDecimal::new(1.into(), 2),
            lock_ttl: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub stale_run_after: Duration,
    pub alert_window: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_run_after: Duration::minutes(30),
            alert_window: Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub reconcile_interval_secs: u64,
    pub credential_max_age: Option<Duration>,
    pub issuance: IssuanceConfig,
    pub reconciliation: ReconciliationConfig,
    pub alerts: AlertThresholds,
    pub health: HealthConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let issuance_defaults = IssuanceConfig::default();
        let recon_defaults = ReconciliationConfig::default();
        let alert_defaults = AlertThresholds::default();
        let health_defaults = HealthConfig::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", 8080)?,
            reconcile_interval_secs: parse_or("RECONCILE_INTERVAL_SECS", 300)?,
            credential_max_age: secs_opt("CREDENTIAL_MAX_AGE_SECS", 1)?,
            issuance: IssuanceConfig {
                seat_capacity: parse_or("SEAT_CAPACITY", issuance_defaults.seat_capacity)?,
                default_event_id: parse_opt("DEFAULT_EVENT_ID")?,
                ticket_name_patterns: env::var("TICKET_NAME_PATTERNS")
                    .map(|v| v.split(',').map(|p| p.trim().to_string()).collect())
                    .unwrap_or(issuance_defaults.ticket_name_patterns),
            },
            reconciliation: ReconciliationConfig {
                lookback: secs_or("RECONCILE_LOOKBACK_HOURS", recon_defaults.lookback, 3600)?,
                orphan_match_tolerance: secs_or(
                    "ORPHAN_MATCH_TOLERANCE_SECS",
                    recon_defaults.orphan_match_tolerance,
                    1,
                )?,
                orphan_order_min_age: secs_or(
                    "ORPHAN_ORDER_MIN_AGE_SECS",
                    recon_defaults.orphan_order_min_age,
                    1,
                )?,
                orphan_order_max_age: secs_or(
                    "ORPHAN_ORDER_MAX_AGE_SECS",
                    recon_defaults.orphan_order_max_age,
                    1,
                )?,
                price_epsilon: parse_or("PRICE_EPSILON", recon_defaults.price_epsilon)?,
                lock_ttl: secs_or("LOCK_TTL_SECS", recon_defaults.lock_ttl, 1)?,
            },
            alerts: AlertThresholds {
                max_duration: secs_or(
                    "ALERT_MAX_DURATION_SECS",
                    alert_defaults.max_duration,
                    1,
                )?,
                min_api_success_rate: parse_or(
                    "ALERT_MIN_API_SUCCESS_RATE",
                    alert_defaults.min_api_success_rate,
                )?,
                max_errors: parse_or("ALERT_MAX_ERRORS", alert_defaults.max_errors)?,
                max_lock_wait: secs_or(
                    "ALERT_MAX_LOCK_WAIT_SECS",
                    alert_defaults.max_lock_wait,
                    1,
                )?,
            },
            health: HealthConfig {
                stale_run_after: secs_or(
                    "HEALTH_STALE_RUN_SECS",
                    health_defaults.stale_run_after,
                    1,
                )?,
                alert_window: secs_or("HEALTH_ALERT_WINDOW_SECS", health_defaults.alert_window, 1)?,
            },
        })
    }
}

fn parse_opt<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        _ => Ok(None),
    }
}

fn parse_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_opt(var)?.unwrap_or(default))
}

/// Read a whole number of `unit_secs` seconds. Values outside chrono's
/// range are rejected as invalid.
fn secs_opt(var: &'static str, unit_secs: i64) -> Result<Option<Duration>, ConfigError> {
    parse_opt::<i64>(var)?
        .map(|n| {
            n.checked_mul(unit_secs)
                .and_then(Duration::try_seconds)
                .ok_or_else(|| ConfigError::Invalid {
                    var,
                    value: n.to_string(),
                })
        })
        .transpose()
}

fn secs_or(var: &'static str, default: Duration, unit_secs: i64) -> Result<Duration, ConfigError> {
    Ok(secs_opt(var, unit_secs)?.unwrap_or(default))
}
