//! Library surface for `dooh-express`, split out of `main.rs` so the
//! scenario tests under `tests/` can build an `axum::Router` in-process via
//! `tower::ServiceExt::oneshot` without spawning a real listener — the same
//! split `src/campaign-express` would use if its binary crate exposed one.

pub mod bootstrap;
pub mod cli;
pub mod scheduler_loop;
pub mod seed;

pub use bootstrap::{bootstrap, Bootstrap};
pub use cli::{Cli, Commands};

use chrono::{DateTime, Utc};
use dooh_core::config::AppConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Exit codes per `spec.md` §6: `0` success, `1` config error, `2` storage
/// error, `3` cancelled.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const STORAGE_ERROR: i32 = 2;
    pub const CANCELLED: i32 = 3;
}

/// Loads config, applies CLI overrides, and dispatches to the requested
/// subcommand. Returns the process exit code so `main.rs` stays a thin
/// `std::process::exit` wrapper, matching `license-admin/src/main.rs`'s use
/// of explicit exit codes at command boundaries.
pub async fn run(cli: Cli) -> i32 {
    let mut config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!(error = %err, "failed to load config, using defaults");
            AppConfig::default()
        }
    };

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }

    match cli.command {
        Commands::Serve { http_port, metrics_port } => {
            if let Some(port) = http_port {
                config.device_api.http_port = port;
            }
            if let Some(port) = metrics_port {
                config.metrics.port = port;
            }
            run_serve(config).await
        }
        Commands::Migrate => run_migrate(&config),
        Commands::Seed => run_seed(&config),
        Commands::Replay { from, to } => run_replay(&config, &from, &to).await,
        Commands::InspectDevice { id } => run_inspect_device(&config, id),
        Commands::RecomputePriors => run_recompute_priors(&config).await,
    }
}

async fn run_serve(config: AppConfig) -> i32 {
    let bootstrap = bootstrap::bootstrap(&config);
    let state = bootstrap.state.clone();

    tokio::spawn(dooh_device_api::worker::run_billing_worker(
        bootstrap.billing_rx,
        state.billing_sink.clone(),
    ));

    let scheduler_handle = tokio::spawn(scheduler_loop::run(
        bootstrap.catalog,
        bootstrap.scheduler,
        config.scheduler.worker_shards,
        config.scheduler.rebuild_interval_minutes,
        config.device_api.offline_after_secs,
    ));

    if let Err(err) = dooh_device_api::router::start_metrics(&config.device_api.host, config.metrics.port).await {
        error!(error = %err, "failed to start metrics exporter");
    }

    let app = dooh_device_api::build_router(state);
    let ip: std::net::IpAddr = match config.device_api.host.parse() {
        Ok(ip) => ip,
        Err(err) => {
            error!(error = %err, host = %config.device_api.host, "invalid device_api.host");
            return exit_code::CONFIG_ERROR;
        }
    };
    let addr = std::net::SocketAddr::new(ip, config.device_api.http_port);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind device sync API listener");
            return exit_code::STORAGE_ERROR;
        }
    };

    info!(%addr, node_id = %config.node_id, "dooh-express device sync API ready");

    let shutdown = shutdown_signal();
    let result = axum::serve(listener, app).with_graceful_shutdown(shutdown).await;
    scheduler_handle.abort();

    match result {
        Ok(()) => {
            info!("dooh-express shut down cleanly");
            exit_code::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "device sync API server error");
            exit_code::STORAGE_ERROR
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                error!(error = %err, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}

fn run_migrate(config: &AppConfig) -> i32 {
    info!(schema_version = config.store.schema_version, "schema already at target version (in-memory store, no-op)");
    println!("schema version: {}", config.store.schema_version);
    exit_code::SUCCESS
}

fn run_seed(config: &AppConfig) -> i32 {
    let bootstrap = bootstrap::bootstrap(config);
    let summary = seed::seed_demo_data(bootstrap.catalog, bootstrap.partners);
    println!("seeded demo data:");
    println!("  partner token:  {}", summary.partner_token);
    println!("  partner id:     {}", summary.partner_id);
    println!("  device id:      {}", summary.device_id);
    println!("  campaign id:    {}", summary.campaign_id);
    println!("  creative id:    {}", summary.creative_id);
    exit_code::SUCCESS
}

async fn run_replay(config: &AppConfig, from: &str, to: &str) -> i32 {
    let (from, to) = match (DateTime::parse_from_rfc3339(from), DateTime::parse_from_rfc3339(to)) {
        (Ok(f), Ok(t)) => (f.with_timezone(&Utc), t.with_timezone(&Utc)),
        _ => {
            error!(from, to, "invalid RFC3339 timestamps");
            return exit_code::CONFIG_ERROR;
        }
    };
    if from > to {
        error!("replay window start must not be after end");
        return exit_code::CONFIG_ERROR;
    }

    let bootstrap = bootstrap::bootstrap(config);
    let cancelled = cancellation_flag();

    let mut replayed = 0u64;
    for device in bootstrap.catalog.list_devices() {
        if cancelled.load(Ordering::Relaxed) {
            warn!("replay cancelled");
            return exit_code::CANCELLED;
        }
        for delivery in bootstrap.tracker.list_for_device(device.id) {
            if delivery.scheduled_time < from || delivery.scheduled_time > to {
                continue;
            }
            if delivery.state != dooh_core::types::DeliveryState::Delivered {
                continue;
            }
            let context = dooh_core::types::PerformanceContextKey {
                campaign_id: delivery.campaign_id,
                device_class: device.class,
                hour_of_day: chrono::Timelike::hour(&delivery.scheduled_time) as u8,
                day_of_week: chrono::Datelike::weekday(&delivery.scheduled_time).num_days_from_sunday() as u8,
            };
            let counters = dooh_core::types::PerformanceCounters {
                impressions: delivery.impressions,
                engagements: delivery.engagements,
                completions: delivery.completions,
            };
            if bootstrap.performance.incr(context, delivery.id, counters).is_ok() {
                replayed += 1;
            }
        }
    }
    info!(replayed, "replay complete");
    println!("replayed {replayed} delivered rows into the performance store");
    exit_code::SUCCESS
}

fn run_inspect_device(config: &AppConfig, id: uuid::Uuid) -> i32 {
    let bootstrap = bootstrap::bootstrap(config);
    match bootstrap.catalog.get_device(id) {
        Some(device) => {
            println!("device {id}");
            println!("  status:  {:?}", device.status);
            println!("  health:  {:?}", device.health);
            println!("  class:   {:?}", device.class);
            println!("  last seen: {}", device.last_seen);
            let timeline = bootstrap.tracker.list_for_device(id);
            println!("  deliveries: {}", timeline.len());
            for delivery in timeline {
                println!(
                    "    {} @ {} [{:?}] priority={}",
                    delivery.id, delivery.scheduled_time, delivery.state, delivery.priority
                );
            }
            exit_code::SUCCESS
        }
        None => {
            error!(%id, "device not found");
            exit_code::STORAGE_ERROR
        }
    }
}

async fn run_recompute_priors(config: &AppConfig) -> i32 {
    let bootstrap = bootstrap::bootstrap(config);
    let cancelled = cancellation_flag();

    let mut rebuilt = 0u64;
    for device in bootstrap.catalog.list_devices() {
        if cancelled.load(Ordering::Relaxed) {
            warn!("recompute-priors cancelled");
            return exit_code::CANCELLED;
        }
        for delivery in bootstrap.tracker.list_for_device(device.id) {
            if delivery.state != dooh_core::types::DeliveryState::Delivered {
                continue;
            }
            let context = dooh_core::types::PerformanceContextKey {
                campaign_id: delivery.campaign_id,
                device_class: device.class,
                hour_of_day: chrono::Timelike::hour(&delivery.scheduled_time) as u8,
                day_of_week: chrono::Datelike::weekday(&delivery.scheduled_time).num_days_from_sunday() as u8,
            };
            let counters = dooh_core::types::PerformanceCounters {
                impressions: delivery.impressions,
                engagements: delivery.engagements,
                completions: delivery.completions,
            };
            if bootstrap.performance.incr(context, delivery.id, counters).is_ok() {
                rebuilt += 1;
            }
        }
    }
    info!(rebuilt, "performance priors recomputed");
    println!("recomputed priors from {rebuilt} delivered rows");
    exit_code::SUCCESS
}

/// Spawns a task that waits for ctrl-c and flips an `AtomicBool`, so the
/// one-shot `replay`/`recompute-priors` loops can check for cancellation
/// between iterations without restructuring themselves around `select!`.
fn cancellation_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let flag_writer = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag_writer.store(true, Ordering::Relaxed);
        }
    });
    flag
}
