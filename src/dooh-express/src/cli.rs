//! CLI surface (`spec.md` §6 "CLI surface"), grounded on
//! `src/license-admin/src/main.rs`'s `Commands` enum pattern and
//! `src/campaign-express/src/main.rs`'s `Cli` struct / env-overridable flags.

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "dooh-express")]
#[command(about = "DOOH Ad Delivery Core — scheduler, selection engine, delivery tracker, device sync API")]
#[command(version)]
pub struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "DOOH_EXPRESS__NODE_ID")]
    pub node_id: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the Device Sync API and the per-device scheduler loop
    Serve {
        /// HTTP port (overrides config)
        #[arg(long, env = "DOOH_EXPRESS__DEVICE_API__HTTP_PORT")]
        http_port: Option<u16>,

        /// Metrics exporter port (overrides config)
        #[arg(long, env = "DOOH_EXPRESS__METRICS__PORT")]
        metrics_port: Option<u16>,
    },

    /// Bump the in-memory store's schema version (no-op placeholder for a
    /// future persistent backend)
    Migrate,

    /// Seed demo campaigns/creatives/devices matching the S1 scenario
    Seed,

    /// Replay historical Delivery rows through the Performance Store for a
    /// time range
    Replay {
        /// Start of the replay window, RFC3339
        from: String,
        /// End of the replay window, RFC3339
        to: String,
    },

    /// Print a device's current timeline and health
    InspectDevice {
        /// Device UUID
        id: Uuid,
    },

    /// Rebuild Performance Store snapshots from Delivery history
    RecomputePriors,
}
