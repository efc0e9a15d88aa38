//! Process-wide request pacing.
//!
//! Every outgoing resolution chain passes through one shared [`RequestPacer`]
//! before its first request, which spaces requests by a minimum interval plus
//! random jitter even when many chains run concurrently.

use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

/// Minimum interval plus uniform jitter between consecutive requests.
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    min_jitter: Duration,
    max_jitter: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration, min_jitter: Duration, max_jitter: Duration) -> Self {
        Self {
            min_interval,
            min_jitter,
            max_jitter: max_jitter.max(min_jitter),
            last_request: Mutex::new(None),
        }
    }

    /// Pacer that never waits.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Suspend until the next request may go out.
    ///
    /// The lock is held across both sleeps so the read-then-write of the last
    /// request time is atomic and concurrent callers queue up behind each other.
    pub async fn before_request(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                log::debug!("pacing: waiting {}ms for minimum interval", remaining.as_millis());
                sleep(remaining).await;
            }
        }

        let jitter = self.jitter();
        if !jitter.is_zero() {
            sleep(jitter).await;
        }

        *last = Some(Instant::now());
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter <= self.min_jitter {
            return self.min_jitter;
        }
        let millis = rand::thread_rng()
            .gen_range(self.min_jitter.as_millis() as u64..=self.max_jitter.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

impl Default for RequestPacer {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(1000),
            Duration::from_millis(300),
            Duration::from_millis(1000),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_request_only_waits_for_jitter() {
        let pacer = RequestPacer::new(
            Duration::from_millis(1000),
            Duration::from_millis(300),
            Duration::from_millis(300),
        );
        let started = Instant::now();
        pacer.before_request().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_requests_respect_interval() {
        let pacer = RequestPacer::new(Duration::from_millis(1000), Duration::ZERO, Duration::ZERO);
        let started = Instant::now();
        pacer.before_request().await;
        pacer.before_request().await;
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_spaced() {
        let pacer = Arc::new(RequestPacer::new(
            Duration::from_millis(1000),
            Duration::from_millis(300),
            Duration::from_millis(1000),
        ));
        let started = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pacer = pacer.clone();
                tokio::spawn(async move {
                    pacer.before_request().await;
                    Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap());
        }
        finished.sort();

        for pair in finished.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }
}
