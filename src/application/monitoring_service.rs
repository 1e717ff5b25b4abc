use chrono::Duration;
use log::warn;

use crate::config::HealthConfig;
use crate::domain::errors::DomainError;
use crate::domain::monitoring::{
    evaluate_alerts, Alert, AlertThresholds, ExecutionMetric, ExecutionStats, HealthCheck,
    HealthReport, HealthStatus, Severity,
};
use crate::domain::ports::{Clock, MonitoringStore};

pub struct MonitoringService<M, C> {
    store: M,
    clock: C,
    thresholds: AlertThresholds,
    health: HealthConfig,
}

impl<M: MonitoringStore, C: Clock> MonitoringService<M, C> {
    pub fn new(store: M, clock: C, thresholds: AlertThresholds, health: HealthConfig) -> Self {
        Self {
            store,
            clock,
            thresholds,
            health,
        }
    }

    /// Persist one run's metrics, then evaluate and persist its alerts.
    pub fn record(&self, metric: &ExecutionMetric) -> Result<Vec<Alert>, DomainError> {
        self.store.insert_metric(metric)?;
        let alerts = evaluate_alerts(metric, &self.thresholds, self.clock.now());
        for alert in &alerts {
            warn!(
                "[{}] {} ({} = {:.2}, threshold {:.2})",
                alert.severity, alert.description, alert.metric_name, alert.metric_value,
                alert.threshold
            );
        }
        if !alerts.is_empty() {
            self.store.insert_alerts(&alerts)?;
        }
        Ok(alerts)
    }

    pub fn health_check(&self) -> HealthReport {
        let now = self.clock.now();

        if let Err(e) = self.store.ping() {
            return HealthReport::from_checks(
                vec![HealthCheck::new(
                    "store_connectivity",
                    HealthStatus::Critical,
                    format!("store unreachable: {e}"),
                )],
                now,
            );
        }
        let mut checks = vec![HealthCheck::new(
            "store_connectivity",
            HealthStatus::Healthy,
            "store reachable",
        )];

        checks.push(match self.store.latest_metric() {
            Ok(Some(last)) if now - last.started_at > self.health.stale_run_after => {
                HealthCheck::new(
                    "last_run",
                    HealthStatus::Warning,
                    format!(
                        "last run {} minutes ago",
                        (now - last.started_at).num_minutes()
                    ),
                )
            }
            Ok(Some(last)) if last.failed => HealthCheck::new(
                "last_run",
                HealthStatus::Warning,
                format!("last run at {} failed", last.started_at),
            ),
            Ok(Some(last)) => HealthCheck::new(
                "last_run",
                HealthStatus::Healthy,
                format!("last run at {}", last.started_at),
            ),
            Ok(None) => HealthCheck::new("last_run", HealthStatus::Warning, "no runs recorded"),
            Err(e) => HealthCheck::new(
                "last_run",
                HealthStatus::Critical,
                format!("could not read metrics: {e}"),
            ),
        });

        checks.push(match self.store.alerts_since(now - self.health.alert_window) {
            Ok(alerts) => {
                let critical = alerts
                    .iter()
                    .filter(|a| a.severity == Severity::Critical)
                    .count();
                let high = alerts.iter().filter(|a| a.severity == Severity::High).count();
                if critical > 0 {
                    HealthCheck::new(
                        "recent_alerts",
                        HealthStatus::Critical,
                        format!("{critical} critical alert(s) in window"),
                    )
                } else if high > 0 {
                    HealthCheck::new(
                        "recent_alerts",
                        HealthStatus::Warning,
                        format!("{high} high alert(s) in window"),
                    )
                } else {
                    HealthCheck::new(
                        "recent_alerts",
                        HealthStatus::Healthy,
                        format!("{} alert(s) in window", alerts.len()),
                    )
                }
            }
            Err(e) => HealthCheck::new(
                "recent_alerts",
                HealthStatus::Critical,
                format!("could not read alerts: {e}"),
            ),
        });

        HealthReport::from_checks(checks, now)
    }

    pub fn get_execution_stats(&self, hours: i64) -> Result<ExecutionStats, DomainError> {
        let since = self.clock.now() - Duration::hours(hours);
        let metrics = self.store.metrics_since(since)?;
        let alerts = self.store.alerts_since(since)?;
        Ok(ExecutionStats::compute(hours, &metrics, &alerts))
    }

    pub fn recent_alerts(&self, hours: i64) -> Result<Vec<Alert>, DomainError> {
        let mut alerts = self
            .store
            .alerts_since(self.clock.now() - Duration::hours(hours))?;
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }
}
