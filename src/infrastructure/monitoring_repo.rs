use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::errors::DomainError;
use crate::domain::monitoring::{Alert, ExecutionMetric};
use crate::domain::ports::MonitoringStore;
use crate::schema::{reconciliation_alerts, reconciliation_metrics};

use super::models::{AlertRow, MetricRow};
use super::pg_store::PgStore;

impl MonitoringStore for PgStore {
    fn ping(&self) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        diesel::sql_query("SELECT 1").execute(&mut conn)?;
        Ok(())
    }

    fn insert_metric(&self, metric: &ExecutionMetric) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        diesel::insert_into(reconciliation_metrics::table)
            .values(&MetricRow::from(metric))
            .execute(&mut conn)?;
        Ok(())
    }

    fn insert_alerts(&self, alerts: &[Alert]) -> Result<(), DomainError> {
        let rows: Vec<AlertRow> = alerts.iter().map(AlertRow::from).collect();
        let mut conn = self.pool.get()?;
        diesel::insert_into(reconciliation_alerts::table)
            .values(&rows)
            .execute(&mut conn)?;
        Ok(())
    }

    fn metrics_since(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionMetric>, DomainError> {
        let mut conn = self.pool.get()?;
        Ok(reconciliation_metrics::table
            .filter(reconciliation_metrics::started_at.ge(since))
            .order(reconciliation_metrics::started_at.asc())
            .select(MetricRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(ExecutionMetric::from)
            .collect())
    }

    fn latest_metric(&self) -> Result<Option<ExecutionMetric>, DomainError> {
        let mut conn = self.pool.get()?;
        Ok(reconciliation_metrics::table
            .order(reconciliation_metrics::started_at.desc())
            .select(MetricRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(ExecutionMetric::from))
    }

    fn alerts_since(&self, since: DateTime<Utc>) -> Result<Vec<Alert>, DomainError> {
        let mut conn = self.pool.get()?;
        reconciliation_alerts::table
            .filter(reconciliation_alerts::created_at.ge(since))
            .order(reconciliation_alerts::created_at.desc())
            .select(AlertRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(Alert::try_from)
            .collect()
    }
}
