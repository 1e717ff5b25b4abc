use std::collections::HashMap;
use std::time::Instant;

use bigdecimal::BigDecimal;

use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::application::lock_manager::ExecutionLockManager;
use crate::application::monitoring_service::MonitoringService;
use crate::config::{HealthConfig, ReconciliationConfig};
use crate::domain::errors::DomainError;
use crate::domain::monitoring::{Alert, AlertThresholds, ExecutionMetric};
use crate::domain::order::OrderBatch;
use crate::domain::ticket::TicketClassifier;
use crate::domain::ports::{Clock, LockStore, MonitoringStore, PaymentGateway, ReconciliationStore};
use crate::domain::reconciliation::{
    detect_price_corrections, match_orphan_ticket, ticket_event, AmbiguousOrphan, AuditEntry, Correction,
    CorrectionField, CorrectionType, EntityType, MatchOutcome, OrphanOrder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Completed,
    /// Another holder owns the lock. Not an error.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub execution_id: Uuid,
    pub status: PassStatus,
    pub skipped_reason: Option<String>,
    pub processed: i32,
    pub corrected: i32,
    pub orphan_tickets_linked: i32,
    pub heuristic_links: i32,
    pub unmatched_orphan_tickets: Vec<Uuid>,
    pub ambiguous_orphan_tickets: Vec<AmbiguousOrphan>,
    pub orphan_orders: Vec<OrphanOrder>,
    pub price_inconsistencies: Vec<Correction>,
    pub errors: Vec<String>,
    pub alerts: Vec<Alert>,
    pub duration_ms: i64,
}

impl ReconciliationReport {
    fn new(execution_id: Uuid, status: PassStatus) -> Self {
        Self {
            execution_id,
            status,
            skipped_reason: None,
            processed: 0,
            corrected: 0,
            orphan_tickets_linked: 0,
            heuristic_links: 0,
            unmatched_orphan_tickets: Vec::new(),
            ambiguous_orphan_tickets: Vec::new(),
            orphan_orders: Vec::new(),
            price_inconsistencies: Vec::new(),
            errors: Vec::new(),
            alerts: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// One orphan ticket and how it matched against the line items that
/// reference it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanTicketMatch {
    pub ticket_id: Uuid,
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: MatchOutcome,
}

fn serialize_outcome<S: serde::Serializer>(
    outcome: &MatchOutcome,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let (kind, orders): (&str, Vec<Uuid>) = match outcome {
        MatchOutcome::NoMatch => ("no_match", Vec::new()),
        MatchOutcome::Exact(c) => ("exact", vec![c.order_id]),
        MatchOutcome::Closest { chosen, .. } => ("closest", vec![chosen.order_id]),
        MatchOutcome::Ambiguous(tied) => ("ambiguous", tied.iter().map(|c| c.order_id).collect()),
    };
    json!({ "kind": kind, "candidate_orders": orders }).serialize(serializer)
}

/// Findings of a read-only scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub orphan_tickets: Vec<OrphanTicketMatch>,
    pub orphan_orders: Vec<OrphanOrder>,
    pub price_inconsistencies: Vec<Correction>,
    /// Row-level lookups that failed and were skipped.
    pub errors: Vec<String>,
}

#[derive(Default)]
struct GatewayCalls {
    total: u32,
    failed: u32,
}

impl GatewayCalls {
    fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            f64::from(self.total - self.failed) / f64::from(self.total)
        }
    }
}

/// The periodic reconciliation pass: orphan ticket linking, orphan order
/// detection, price/batch validation and correction, then metrics.
pub struct ReconciliationService<S, G, C> {
    store: S,
    gateway: G,
    clock: C,
    config: ReconciliationConfig,
    classifier: TicketClassifier,
    locks: ExecutionLockManager<S, C>,
    monitoring: MonitoringService<S, C>,
}

impl<S, G, C> ReconciliationService<S, G, C>
where
    S: ReconciliationStore + LockStore + MonitoringStore + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
{
    pub fn new(
        store: S,
        gateway: G,
        clock: C,
        classifier: TicketClassifier,
        config: ReconciliationConfig,
        thresholds: AlertThresholds,
        health: HealthConfig,
    ) -> Self {
        Self {
            locks: ExecutionLockManager::new(store.clone(), clock.clone(), config.lock_ttl),
            monitoring: MonitoringService::new(store.clone(), clock.clone(), thresholds, health),
            store,
            gateway,
            clock,
            config,
            classifier,
        }
    }

    pub fn monitoring(&self) -> &MonitoringService<S, C> {
        &self.monitoring
    }

    /// Run one pass under the execution lock.
    ///
    /// Row-level failures are collected in the report and the pass carries
    /// on; only a failure to talk to the lock store aborts it.
    pub fn run_reconciliation_pass(&self) -> Result<ReconciliationReport, DomainError> {
        let execution_id = Uuid::new_v4();
        let holder = execution_id.to_string();

        let lock_timer = Instant::now();
        let acquired = self.locks.acquire(&holder)?;
        let lock_wait_ms = elapsed_ms(lock_timer);

        if !acquired {
            let current = self.locks.current().ok().flatten();
            let reason = match current {
                Some(lease) => format!("lock held by {} until {}", lease.holder, lease.expires_at),
                None => "lock held".to_string(),
            };
            info!("Skipping reconciliation {}: {}", execution_id, reason);
            let mut report = ReconciliationReport::new(execution_id, PassStatus::Skipped);
            report.skipped_reason = Some(reason);
            return Ok(report);
        }

        info!("Reconciliation {} started", execution_id);
        let started_at = self.clock.now();
        let timer = Instant::now();
        let mut report = ReconciliationReport::new(execution_id, PassStatus::Completed);
        let mut calls = GatewayCalls::default();

        let steps = [
            self.link_orphan_tickets(execution_id, started_at, &mut report),
            self.detect_orphan_orders(started_at, &mut report, &mut calls),
            self.correct_prices(execution_id, started_at, &mut report),
        ];
        let failed_steps = steps.iter().filter(|s| s.is_err()).count();
        for e in steps.into_iter().filter_map(Result::err) {
            error!("Reconciliation {} step failed: {}", execution_id, e);
            report.errors.push(e.to_string());
        }

        report.duration_ms = elapsed_ms(timer);
        let metric = ExecutionMetric {
            id: Uuid::new_v4(),
            execution_id,
            started_at,
            duration_ms: report.duration_ms,
            lock_wait_ms,
            processed_count: report.processed,
            corrected_count: report.corrected,
            error_count: i32::try_from(report.errors.len()).unwrap_or(i32::MAX),
            api_success_rate: calls.success_rate(),
            failed: failed_steps == 3,
        };
        match self.monitoring.record(&metric) {
            Ok(alerts) => report.alerts = alerts,
            Err(e) => {
                error!("Failed to record metrics for {}: {}", execution_id, e);
                report.errors.push(format!("metrics: {e}"));
            }
        }

        if let Err(e) = self.locks.release(&holder) {
            error!("Failed to release lock for {}: {}", execution_id, e);
            report.errors.push(format!("lock release: {e}"));
        }

        info!(
            "Reconciliation {} finished in {}ms: processed={} corrected={} errors={}",
            execution_id,
            report.duration_ms,
            report.processed,
            report.corrected,
            report.errors.len()
        );
        Ok(report)
    }

    /// Detect orphan tickets, orphan orders and price inconsistencies created
    /// within `lookback`, without changing anything. Runs without the lock.
    pub fn scan_window(&self, lookback: Duration) -> Result<ScanResult, DomainError> {
        let now = self.clock.now();
        let mut calls = GatewayCalls::default();
        let mut errors = Vec::new();

        let orphan_tickets = self.match_orphans(now - lookback, &mut errors)?;
        let orphan_orders = self.find_orphan_orders(now, &mut calls, &mut errors)?;
        let (batches, catalog) = self.load_batches(now - lookback)?;

        Ok(ScanResult {
            orphan_tickets,
            orphan_orders,
            price_inconsistencies: detect_price_corrections(
                &batches,
                &catalog,
                &self.classifier,
                &self.config.price_epsilon,
            ),
            errors,
        })
    }

    fn match_orphans(
        &self,
        since: DateTime<Utc>,
        errors: &mut Vec<String>,
    ) -> Result<Vec<OrphanTicketMatch>, DomainError> {
        let orphans = self.store.orphan_tickets_created_since(since)?;
        let mut matches = Vec::with_capacity(orphans.len());
        for ticket in orphans {
            match self.store.line_items_referencing_ticket(ticket.id) {
                Ok(items) => {
                    let outcome =
                        match_orphan_ticket(&ticket, &items, self.config.orphan_match_tolerance);
                    matches.push(OrphanTicketMatch {
                        ticket_id: ticket.id,
                        outcome,
                    });
                }
                Err(e) => errors.push(format!("ticket {}: {e}", ticket.id)),
            }
        }
        Ok(matches)
    }

    fn link_orphan_tickets(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<(), DomainError> {
        let mut errors = Vec::new();
        let matches = self.match_orphans(now - self.config.lookback, &mut errors)?;
        report.processed += i32::try_from(matches.len() + errors.len()).unwrap_or(i32::MAX);
        report.errors.append(&mut errors);

        for OrphanTicketMatch { ticket_id, outcome } in matches {
            let (candidate, heuristic) = match outcome {
                MatchOutcome::NoMatch => {
                    info!("Orphan ticket {} has no match; left for review", ticket_id);
                    report.unmatched_orphan_tickets.push(ticket_id);
                    continue;
                }
                MatchOutcome::Ambiguous(tied) => {
                    warn!(
                        "Orphan ticket {} has {} equally close candidates; not linking",
                        ticket_id,
                        tied.len()
                    );
                    report.ambiguous_orphan_tickets.push(AmbiguousOrphan {
                        ticket_id,
                        candidate_orders: tied.iter().map(|c| c.order_id).collect(),
                    });
                    continue;
                }
                MatchOutcome::Exact(candidate) => (candidate, None),
                MatchOutcome::Closest { chosen, candidates } => (chosen, Some(candidates)),
            };

            let audit = AuditEntry::new(
                execution_id,
                EntityType::Ticket,
                ticket_id,
                CorrectionType::OrphanTicketLinked,
                json!({ "order_id": null }),
                json!({ "order_id": candidate.order_id }),
                now,
            )
            .with_metadata(json!({
                "line_item_id": candidate.line_item_id,
                "heuristic": heuristic.is_some(),
                "candidates": heuristic.unwrap_or(1),
                "delta_secs": candidate.delta.num_seconds(),
            }));

            match self
                .store
                .link_orphan_ticket(ticket_id, candidate.order_id, &audit)
            {
                Ok(()) => {
                    report.corrected += 1;
                    report.orphan_tickets_linked += 1;
                    if let Some(n) = heuristic {
                        report.heuristic_links += 1;
                        warn!(
                            "Linked orphan ticket {} to order {} by closest time among {} candidates",
                            ticket_id, candidate.order_id, n
                        );
                    } else {
                        info!("Linked orphan ticket {} to order {}", ticket_id, candidate.order_id);
                    }
                }
                Err(e) => report.errors.push(format!("ticket {}: {e}", ticket_id)),
            }
        }
        Ok(())
    }

    fn find_orphan_orders(
        &self,
        now: DateTime<Utc>,
        calls: &mut GatewayCalls,
        errors: &mut Vec<String>,
    ) -> Result<Vec<OrphanOrder>, DomainError> {
        let orders = self.store.pending_orders_created_between(
            now - self.config.orphan_order_max_age,
            now - self.config.orphan_order_min_age,
        )?;

        let mut orphans = Vec::new();
        for order in orders {
            calls.total += 1;
            match self.gateway.find_charge(&order) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(
                        "Pending order {} created {} has no gateway charge",
                        order.id, order.created_at
                    );
                    orphans.push(OrphanOrder {
                        order_id: order.id,
                        customer_id: order.customer_id,
                        total_amount: order.total_amount.clone(),
                        created_at: order.created_at,
                    });
                }
                Err(e) => {
                    calls.failed += 1;
                    errors.push(format!("gateway lookup for order {}: {e}", order.id));
                }
            }
        }
        Ok(orphans)
    }

    fn detect_orphan_orders(
        &self,
        now: DateTime<Utc>,
        report: &mut ReconciliationReport,
        calls: &mut GatewayCalls,
    ) -> Result<(), DomainError> {
        let mut errors = Vec::new();
        report.orphan_orders = self.find_orphan_orders(now, calls, &mut errors)?;
        report.processed += i32::try_from(calls.total).unwrap_or(i32::MAX);
        report.errors.append(&mut errors);
        Ok(())
    }

    fn load_batches(
        &self,
        since: DateTime<Utc>,
    ) -> Result<(Vec<OrderBatch>, HashMap<Uuid, BigDecimal>), DomainError> {
        let batches = self.store.pending_order_batches_since(since)?;
        let mut event_ids: Vec<Uuid> = batches
            .iter()
            .flat_map(|b| b.items.iter())
            .filter_map(|i| ticket_event(&self.classifier, i))
            .collect();
        event_ids.sort_unstable();
        event_ids.dedup();
        let catalog = self.store.catalog_prices(&event_ids)?;
        Ok((batches, catalog))
    }

    fn correct_prices(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<(), DomainError> {
        let (batches, catalog) = self.load_batches(now - self.config.lookback)?;
        report.processed += batches.iter().map(|b| b.items.len() as i32).sum::<i32>();
        let corrections = detect_price_corrections(
            &batches,
            &catalog,
            &self.classifier,
            &self.config.price_epsilon,
        );
        self.apply_corrections(execution_id, now, &corrections, report);
        report.price_inconsistencies = corrections;
        Ok(())
    }

    /// Each correction is its own transaction; one failure does not stop the
    /// rest. An order total is left alone when a line of the same order could
    /// not be corrected, since it was computed from the corrected lines.
    pub fn apply_corrections(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
        corrections: &[Correction],
        report: &mut ReconciliationReport,
    ) {
        let mut failed_orders: Vec<Uuid> = Vec::new();
        for correction in corrections {
            if correction.field == CorrectionField::OrderTotal
                && failed_orders.contains(&correction.order_id)
            {
                warn!(
                    "Skipping total of order {}: a line correction failed",
                    correction.order_id
                );
                report.errors.push(format!(
                    "{} {}: skipped after failed line correction",
                    correction.field.as_str(),
                    correction.target_id
                ));
                continue;
            }
            let audit = correction.audit_entry(execution_id, now);
            match self.store.apply_correction(correction, &audit) {
                Ok(()) => {
                    report.corrected += 1;
                    info!(
                        "Corrected {} of {} from {} to {} ({})",
                        correction.field.as_str(),
                        correction.target_id,
                        correction.old_value,
                        correction.new_value,
                        correction.reason.as_str()
                    );
                }
                Err(e) => {
                    failed_orders.push(correction.order_id);
                    report.errors.push(format!(
                        "{} {}: {e}",
                        correction.field.as_str(),
                        correction.target_id
                    ));
                }
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}
