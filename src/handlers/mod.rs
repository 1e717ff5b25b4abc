pub mod credentials;
pub mod health;
pub mod reconciliation;
pub mod tickets;

use chrono::Duration;
use utoipa::OpenApi;

use crate::application::issuance_service::IssuanceService;
use crate::application::reconciliation_service::ReconciliationService;
use crate::config::Config;
use crate::domain::ports::SystemClock;
use crate::domain::ticket::TicketClassifier;
use crate::infrastructure::{PgStore, StoredChargeLookup};

pub type Reconciler = ReconciliationService<PgStore, StoredChargeLookup, SystemClock>;

/// Services shared by every worker of the HTTP server.
pub struct AppState {
    pub issuance: IssuanceService<PgStore>,
    pub reconciliation: Reconciler,
    pub credential_max_age: Option<Duration>,
}

impl AppState {
    pub fn new(store: PgStore, config: &Config) -> Self {
        let classifier = TicketClassifier::new(
            config.issuance.ticket_name_patterns.clone(),
            config.issuance.default_event_id,
        );
        Self {
            issuance: IssuanceService::new(store.clone(), SystemClock, classifier.clone()),
            reconciliation: ReconciliationService::new(
                store,
                StoredChargeLookup,
                SystemClock,
                classifier,
                config.reconciliation.clone(),
                config.alerts.clone(),
                config.health.clone(),
            ),
            credential_max_age: config.credential_max_age,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        tickets::issue_tickets,
        tickets::list_tickets,
        credentials::validate_credential,
        reconciliation::run_pass,
        reconciliation::scan,
        reconciliation::get_stats,
        reconciliation::get_alerts,
        health::get_health,
    ),
    components(schemas(
        tickets::IssueTicketsRequest,
        tickets::TicketResponse,
        tickets::IssueTicketsResponse,
        credentials::ValidateCredentialRequest,
        credentials::ValidateCredentialResponse,
        crate::domain::monitoring::ExecutionStats,
        crate::domain::monitoring::Alert,
        crate::domain::monitoring::HealthReport,
    )),
    tags(
        (name = "tickets", description = "Ticket issuance"),
        (name = "credentials", description = "QR credential validation"),
        (name = "reconciliation", description = "Reconciliation passes and monitoring"),
        (name = "health", description = "Health check"),
    )
)]
pub struct ApiDoc;
