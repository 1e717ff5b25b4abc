pub mod application;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod infrastructure;
pub mod schema;

use actix_web::{middleware::Logger, web, App, HttpServer};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use db::{create_pool, DbPool};
pub use handlers::AppState;

use domain::errors::DomainError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool) -> Result<(), DomainError> {
    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DomainError::Store(format!("migrations failed: {e}")))?;
    Ok(())
}

/// Build and return an actix-web `Server` bound to `host:port`.
///
/// The caller is responsible for `.await`-ing (or `tokio::spawn`-ing) the
/// returned server.
pub fn build_server(
    state: web::Data<AppState>,
    host: &str,
    port: u16,
) -> std::io::Result<actix_web::dev::Server> {
    let openapi = handlers::ApiDoc::openapi();
    Ok(HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .service(
                web::scope("/orders/{id}/tickets")
                    .route("", web::post().to(handlers::tickets::issue_tickets))
                    .route("", web::get().to(handlers::tickets::list_tickets)),
            )
            .route(
                "/credentials/validate",
                web::post().to(handlers::credentials::validate_credential),
            )
            .service(
                web::scope("/reconciliation")
                    .route("/run", web::post().to(handlers::reconciliation::run_pass))
                    .route("/scan", web::get().to(handlers::reconciliation::scan))
                    .route("/stats", web::get().to(handlers::reconciliation::get_stats))
                    .route("/alerts", web::get().to(handlers::reconciliation::get_alerts)),
            )
            .route("/health", web::get().to(handlers::health::get_health))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind((host.to_string(), port))?
    .run())
}
