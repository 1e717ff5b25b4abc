use std::env;
use std::io;
use std::time::Duration;

use actix_web::web;
use dotenvy::dotenv;
use log::{error, info, warn};
use ticket_reconciler::application::reconciliation_service::PassStatus;
use ticket_reconciler::config::Config;
use ticket_reconciler::domain::monitoring::HealthStatus;
use ticket_reconciler::infrastructure::PgStore;
use ticket_reconciler::{build_server, create_pool, run_migrations, AppState};

fn to_io<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::other(e.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let mode = env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    let config = Config::from_env().map_err(to_io)?;

    let pool = create_pool(&config.database_url).map_err(to_io)?;
    run_migrations(&pool).map_err(to_io)?;
    let store = PgStore::new(pool);
    let state = web::Data::new(AppState::new(store.clone(), &config));

    match mode.as_str() {
        "serve" => {
            store
                .ensure_seat_pool(config.issuance.seat_capacity)
                .map_err(to_io)?;
            spawn_scheduler(state.clone(), config.reconcile_interval_secs);
            info!("Starting server at http://{}:{}", config.host, config.port);
            build_server(state, &config.host, config.port)?.await
        }
        "reconcile" => {
            let report = web::block(move || state.reconciliation.run_reconciliation_pass())
                .await
                .map_err(to_io)?
                .map_err(to_io)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        "scan" => {
            let lookback = config.reconciliation.lookback;
            let result = web::block(move || state.reconciliation.scan_window(lookback))
                .await
                .map_err(to_io)?
                .map_err(to_io)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        "health" => {
            let report = web::block(move || state.reconciliation.monitoring().health_check())
                .await
                .map_err(to_io)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status == HealthStatus::Critical {
                std::process::exit(1);
            }
            Ok(())
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unknown mode '{other}', expected serve, reconcile, scan or health"),
        )),
    }
}

/// Run a reconciliation pass every `interval_secs` on a blocking thread.
/// Overlapping passes from other replicas are excluded by the execution lock.
fn spawn_scheduler(state: web::Data<AppState>, interval_secs: u64) {
    if interval_secs == 0 {
        info!("Reconciliation scheduler disabled");
        return;
    }
    info!("Reconciliation scheduled every {}s", interval_secs);
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let state = state.clone();
            match web::block(move || state.reconciliation.run_reconciliation_pass()).await {
                Ok(Ok(report)) if report.status == PassStatus::Skipped => {
                    info!(
                        "Scheduled reconciliation skipped: {}",
                        report.skipped_reason.unwrap_or_default()
                    );
                }
                Ok(Ok(report)) => {
                    if !report.errors.is_empty() {
                        warn!(
                            "Scheduled reconciliation {} finished with {} error(s)",
                            report.execution_id,
                            report.errors.len()
                        );
                    }
                }
                Ok(Err(e)) => error!("Scheduled reconciliation aborted: {}", e),
                Err(e) => error!("Scheduled reconciliation could not run: {}", e),
            }
        }
    });
}
