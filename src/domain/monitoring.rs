use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(DomainError::InvalidInput(format!("unknown severity '{other}'"))),
        }
    }
}

/// One row per reconciliation run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExecutionMetric {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub lock_wait_ms: i64,
    pub processed_count: i32,
    pub corrected_count: i32,
    pub error_count: i32,
    pub api_success_rate: f64,
    /// Every step of the pass failed.
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Alert {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub rule: String,
    pub severity: Severity,
    pub description: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_duration: Duration,
    pub min_api_success_rate: f64,
    pub max_errors: i32,
    pub max_lock_wait: Duration,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_duration: Duration::seconds(180),
            min_api_success_rate: 0.90,
            max_errors: 5,
            max_lock_wait: Duration::seconds(30),
        }
    }
}

struct Breach {
    rule: &'static str,
    severity: Severity,
    metric_name: &'static str,
    value: f64,
    threshold: f64,
    description: String,
}

/// Evaluate the fixed rule set against one run. Each breached rule yields
/// exactly one alert.
pub fn evaluate_alerts(
    metric: &ExecutionMetric,
    thresholds: &AlertThresholds,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut breaches = Vec::new();

    let duration_secs = metric.duration_ms as f64 / 1000.0;
    let max_duration_secs = thresholds.max_duration.num_milliseconds() as f64 / 1000.0;
    if duration_secs > max_duration_secs {
        breaches.push(Breach {
            rule: "slow_execution",
            severity: Severity::Medium,
            metric_name: "duration_secs",
            value: duration_secs,
            threshold: max_duration_secs,
            description: format!(
                "Reconciliation took {duration_secs:.1}s (limit {max_duration_secs:.0}s)"
            ),
        });
    }

    if metric.api_success_rate < thresholds.min_api_success_rate {
        breaches.push(Breach {
            rule: "low_api_success_rate",
            severity: Severity::High,
            metric_name: "api_success_rate",
            value: metric.api_success_rate,
            threshold: thresholds.min_api_success_rate,
            description: format!(
                "Payment gateway success rate {:.0}% below {:.0}%",
                metric.api_success_rate * 100.0,
                thresholds.min_api_success_rate * 100.0
            ),
        });
    }

    if metric.error_count > thresholds.max_errors {
        breaches.push(Breach {
            rule: "high_error_count",
            severity: Severity::Medium,
            metric_name: "error_count",
            value: f64::from(metric.error_count),
            threshold: f64::from(thresholds.max_errors),
            description: format!(
                "{} errors during reconciliation (limit {})",
                metric.error_count, thresholds.max_errors
            ),
        });
    }

    let lock_wait_secs = metric.lock_wait_ms as f64 / 1000.0;
    let max_lock_wait_secs = thresholds.max_lock_wait.num_milliseconds() as f64 / 1000.0;
    if lock_wait_secs > max_lock_wait_secs {
        breaches.push(Breach {
            rule: "slow_lock_acquisition",
            severity: Severity::Low,
            metric_name: "lock_wait_secs",
            value: lock_wait_secs,
            threshold: max_lock_wait_secs,
            description: format!("Lock acquisition took {lock_wait_secs:.1}s"),
        });
    }

    if metric.failed {
        breaches.push(Breach {
            rule: "pass_failed",
            severity: Severity::Critical,
            metric_name: "error_count",
            value: f64::from(metric.error_count),
            threshold: 0.0,
            description: "Every reconciliation step failed".to_string(),
        });
    }

    breaches
        .into_iter()
        .map(|b| Alert {
            id: Uuid::new_v4(),
            execution_id: metric.execution_id,
            rule: b.rule.to_string(),
            severity: b.severity,
            description: b.description,
            metric_name: b.metric_name.to_string(),
            metric_value: b.value,
            threshold: b.threshold,
            created_at: now,
        })
        .collect()
}

// ── Health ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

impl HealthCheck {
    pub fn new(name: &str, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_checks(checks: Vec<HealthCheck>, checked_at: DateTime<Utc>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            checks,
            checked_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct AlertCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExecutionStats {
    pub hours: i64,
    pub runs: usize,
    pub failed_runs: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: i64,
    pub total_processed: i64,
    pub total_corrected: i64,
    pub total_errors: i64,
    pub avg_api_success_rate: f64,
    pub alerts: AlertCounts,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    pub fn compute(hours: i64, metrics: &[ExecutionMetric], alerts: &[Alert]) -> Self {
        let runs = metrics.len();
        let mut counts = AlertCounts::default();
        for alert in alerts {
            match alert.severity {
                Severity::Low => counts.low += 1,
                Severity::Medium => counts.medium += 1,
                Severity::High => counts.high += 1,
                Severity::Critical => counts.critical += 1,
            }
        }
        let avg = |f: &dyn Fn(&ExecutionMetric) -> f64| {
            if runs == 0 {
                0.0
            } else {
                metrics.iter().map(f).sum::<f64>() / runs as f64
            }
        };

        Self {
            hours,
            runs,
            failed_runs: metrics.iter().filter(|m| m.failed).count(),
            avg_duration_ms: avg(&|m| m.duration_ms as f64),
            max_duration_ms: metrics.iter().map(|m| m.duration_ms).max().unwrap_or(0),
            total_processed: metrics.iter().map(|m| i64::from(m.processed_count)).sum(),
            total_corrected: metrics.iter().map(|m| i64::from(m.corrected_count)).sum(),
            total_errors: metrics.iter().map(|m| i64::from(m.error_count)).sum(),
            avg_api_success_rate: if runs == 0 { 1.0 } else { avg(&|m| m.api_success_rate) },
            alerts: counts,
            last_run_at: metrics.iter().map(|m| m.started_at).max(),
        }
    }
}
