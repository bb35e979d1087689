//! Background scheduler loop (`spec.md` §5 "Concurrency & Resource Model":
//! a parallel worker pool, sharded by `hash(deviceID) mod N`, rebuilding
//! each device's timeline on `rebuild_interval_minutes`; a second tick marks
//! stale devices offline). Grounded on `crates/agents/src/agent.rs`'s
//! `tokio::spawn` + structured-tracing task style.

use dooh_catalog::Catalog;
use dooh_scheduler::Scheduler;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, info, warn};

/// Runs until the process exits. `serve` spawns this as its own task so a
/// slow build cycle for one shard never blocks the Device Sync API's
/// request path.
pub async fn run(
    catalog: &'static Catalog,
    scheduler: &'static Scheduler<'static>,
    worker_shards: u32,
    rebuild_interval_minutes: i64,
    offline_after_secs: i64,
) {
    let worker_shards = worker_shards.max(1);
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
        (rebuild_interval_minutes.max(1) * 60) as u64,
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(worker_shards, rebuild_interval_minutes, "scheduler loop started");

    loop {
        ticker.tick().await;
        let now = chrono::Utc::now();

        dooh_device_api::health::mark_offline_devices(catalog, offline_after_secs, now);

        let devices = catalog.list_devices();
        let mut handles = Vec::with_capacity(worker_shards as usize);

        for shard in 0..worker_shards {
            let shard_devices: Vec<_> = devices.iter().filter(|d| shard_of(d.id, worker_shards) == shard).cloned().collect();
            if shard_devices.is_empty() {
                continue;
            }
            handles.push(tokio::spawn(async move {
                let mut filled = 0usize;
                for device in &shard_devices {
                    let created = scheduler.build_device_timeline(device, now);
                    filled += created.len();
                }
                filled
            }));
        }

        let mut total_filled = 0usize;
        for handle in handles {
            match handle.await {
                Ok(filled) => total_filled += filled,
                Err(err) => warn!(error = %err, "scheduler shard task panicked"),
            }
        }

        debug!(devices = devices.len(), total_filled, "scheduler build cycle complete");
        metrics::gauge!("scheduler.build_cycle.devices").set(devices.len() as f64);
        metrics::counter!("scheduler.build_cycle.slots_filled").increment(total_filled as u64);
    }
}

fn shard_of(device_id: dooh_core::types::DeviceId, worker_shards: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    device_id.hash(&mut hasher);
    (hasher.finish() % worker_shards as u64) as u32
}
