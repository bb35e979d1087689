use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Error taxonomy for the Ad Delivery Core.
///
/// Propagation policy: the Selection Engine never surfaces these (it returns
/// `None` instead); the Scheduler logs and continues with the next slot; the
/// Delivery Tracker surfaces all non-telemetry variants to the caller.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("slot occupied: {0}")]
    SlotOccupied(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("transient storage error: {0}")]
    TransientStorage(String),

    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    #[error("no fitting slot: {0}")]
    NoFittingSlot(String),

    #[error("fatal invariant violation: {0}")]
    Fatal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether the core should retry this operation itself (up to 3x,
    /// exponential backoff 1s/2s/4s) before surfacing it to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::TransientStorage(_))
    }
}

/// Exponential-backoff delays between retry attempts (§7 `TransientStorage`):
/// 1s before the 2nd attempt, 2s before the 3rd, 4s before the 4th.
const RETRY_BACKOFF: [std::time::Duration; 3] = [
    std::time::Duration::from_secs(1),
    std::time::Duration::from_secs(2),
    std::time::Duration::from_secs(4),
];

/// Runs `op` up to 4 times (1 initial attempt + 3 retries), sleeping the
/// matching `RETRY_BACKOFF` delay between attempts, as long as the returned
/// error `is_retryable()`. A non-retryable error or the final retryable
/// failure is returned to the caller unchanged; the caller decides whether
/// to surface it or fail open.
pub fn retry_transient<T>(op: impl FnMut() -> CoreResult<T>) -> CoreResult<T> {
    retry_transient_with_backoff(op, &RETRY_BACKOFF)
}

fn retry_transient_with_backoff<T>(
    mut op: impl FnMut() -> CoreResult<T>,
    backoff: &[std::time::Duration],
) -> CoreResult<T> {
    let mut last_err = None;
    for delay in std::iter::once(None).chain(backoff.iter().copied().map(Some)) {
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => last_err = Some(err),
            Err(err) => return Err(err),
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const NO_DELAY: [Duration; 3] = [Duration::ZERO; 3];

    #[test]
    fn retry_transient_stops_on_first_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_transient_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CoreError>(42)
            },
            &NO_DELAY,
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_transient_does_not_retry_non_retryable_errors() {
        let calls = AtomicUsize::new(0);
        let result = retry_transient_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CoreError::InvalidParameter("bad".into()))
            },
            &NO_DELAY,
        );
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_transient_gives_up_after_three_retries() {
        let calls = AtomicUsize::new(0);
        let result = retry_transient_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CoreError::TransientStorage("down".into()))
            },
            &NO_DELAY,
        );
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn retry_transient_recovers_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = retry_transient_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(CoreError::TransientStorage("down".into()))
                } else {
                    Ok(n)
                }
            },
            &NO_DELAY,
        );
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
