//! Bounded polling of a condition.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::Error;

/// How often and for how long to evaluate a condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSpec {
    /// Time between evaluations.
    pub interval: Duration,
    /// Give up after this long.
    pub timeout: Duration,
    /// Evaluate once before the first sleep.
    pub immediate: bool,
}

impl PollSpec {
    /// An immediate poll every `interval` for at most `timeout`.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        PollSpec {
            interval,
            timeout,
            immediate: true,
        }
    }

    /// Waits one interval before the first evaluation.
    pub fn delayed(mut self) -> Self {
        self.immediate = false;
        self
    }
}

/// Evaluates `condition` until it returns `Ok(true)`.
///
/// An `Err` from the condition ends the poll and is returned as is; callers
/// that want to retry through transient failures return `Ok(false)` instead.
/// The last sleep is cut short at the deadline so the condition gets one final
/// evaluation there before [`Error::Timeout`] is returned. A timeout too large
/// to be represented as an [`Instant`] means the poll has no deadline.
pub async fn poll_until<F, Fut>(
    spec: &PollSpec,
    cancel: &CancellationToken,
    mut condition: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let deadline = Instant::now().checked_add(spec.timeout);
    if !spec.immediate {
        sleep(spec.interval.min(spec.timeout), cancel).await?;
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let done = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = condition() => result?,
        };
        if done {
            trace!(attempt, "condition met");
            return Ok(());
        }

        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::Timeout {
                        after: spec.timeout,
                    });
                }
                spec.interval.min(deadline - now)
            }
            None => spec.interval,
        };
        trace!(attempt, "condition not met, retrying");
        sleep(pause, cancel).await?;
    }
}

/// Sleeps for `duration` unless cancelled first.
pub async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), Error> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn spec(interval: u64, timeout: u64) -> PollSpec {
        PollSpec::new(Duration::from_secs(interval), Duration::from_secs(timeout))
    }

    #[tokio::test(start_paused = true)]
    async fn false_forever_times_out_after_timeout() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = poll_until(&spec(1, 3), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout { after }) if after == Duration::from_secs(3)));
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
        // t = 0, 1, 2, 3
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_poll_skips_the_first_evaluation() {
        let calls = AtomicU32::new(0);
        let result = poll_until(&spec(1, 3).delayed(), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn true_on_third_evaluation_returns_after_two_intervals() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        poll_until(&spec(10, 300), &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n == 3) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_polls_without_deadline() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let unbounded = PollSpec::new(Duration::from_secs(1), Duration::MAX);
        poll_until(&unbounded, &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n == 3) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        let delayed = unbounded.delayed();
        poll_until(&delayed, &CancellationToken::new(), || async { Ok(true) })
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn error_is_returned_immediately() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = poll_until(&spec(1, 60), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::validation("CatalogSource", "broken")) }
        })
        .await;

        assert!(matches!(result, Err(Error::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_sleep() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            child.cancel();
        });

        let start = Instant::now();
        let result = poll_until(&spec(30, 600), &cancel, || async { Ok(false) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_an_evaluation_in_flight() {
        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicU32::new(0));
        let observed = started.clone();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = poll_until(&spec(1, 600), &cancel, || {
            observed.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_token_never_evaluates() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result = poll_until(&spec(1, 10), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(true) }
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        // The closure runs to build the future, the future itself is dropped.
        assert!(calls.load(Ordering::SeqCst) <= 1);
    }
}
