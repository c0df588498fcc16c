use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::lock;

pub const DEFAULT_REQUESTS_PER_WINDOW: u32 = 10;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of the one-second buckets used for rate accounting.
pub trait Clock: Send + Sync {
    fn current_second(&self) -> u64;
}

/// Whole seconds elapsed since the clock was created.
#[derive(Debug)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn current_second(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Outcome of classifying a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

#[derive(Debug, Clone, Copy)]
pub struct InvokerConfig {
    pub requests_per_window: u32,
    /// Pause before re-checking a full rate window.
    pub window_wait: Duration,
    /// Pause before retrying a failed call.
    pub retry_delay: Duration,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            requests_per_window: DEFAULT_REQUESTS_PER_WINDOW,
            window_wait: DEFAULT_BACKOFF,
            retry_delay: DEFAULT_BACKOFF,
        }
    }
}

#[derive(Debug, Default)]
struct RateWindow {
    start_second: u64,
    requests: u32,
}

impl RateWindow {
    // Check and increment happen under one lock, so the cap is never exceeded.
    fn try_admit(&mut self, now: u64, cap: u32) -> bool {
        if now != self.start_second {
            self.start_second = now;
            self.requests = 0;
        }
        if self.requests >= cap {
            return false;
        }
        self.requests += 1;
        true
    }
}

/// Issues remote calls under a shared requests-per-second ceiling and retries
/// them according to a caller-supplied classifier.
///
/// Clones share the same rate window.
#[derive(Clone)]
pub struct RateLimitedInvoker {
    config: InvokerConfig,
    clock: Arc<dyn Clock>,
    window: Arc<Mutex<RateWindow>>,
}

impl RateLimitedInvoker {
    pub fn new(config: InvokerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: InvokerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: InvokerConfig {
                requests_per_window: config.requests_per_window.max(1),
                ..config
            },
            clock,
            window: Arc::new(Mutex::new(RateWindow::default())),
        }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Runs `call` until it succeeds or `retry` gives up; a given-up error is
    /// returned to the caller.
    pub async fn invoke<T, E, C, Fut, R>(&self, call: C, retry: R) -> Result<T, E>
    where
        C: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> RetryDecision,
        E: fmt::Display,
    {
        self.invoke_with(call, retry, Err).await
    }

    /// Like [`invoke`](Self::invoke), but a given-up error is handed to `fail`,
    /// whose result becomes the outcome of the invocation.
    ///
    /// There is no attempt limit: a classifier that never gives up retries
    /// forever.
    pub async fn invoke_with<T, E, C, Fut, R, F>(
        &self,
        mut call: C,
        mut retry: R,
        fail: F,
    ) -> Result<T, E>
    where
        C: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&E) -> RetryDecision,
        F: FnOnce(E) -> Result<T, E>,
        E: fmt::Display,
    {
        let mut attempt: u64 = 0;
        loop {
            self.acquire_slot().await;
            attempt += 1;
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            match retry(&err) {
                RetryDecision::Retry => {
                    debug!(attempt, error = %err, "remote call failed; retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                RetryDecision::GiveUp => {
                    debug!(attempt, error = %err, "remote call failed; giving up");
                    return fail(err);
                }
            }
        }
    }

    /// Requests admitted in the window the clock currently points at.
    pub fn requests_in_current_window(&self) -> u32 {
        let window = lock(&self.window);
        if window.start_second == self.clock.current_second() {
            window.requests
        } else {
            0
        }
    }

    async fn acquire_slot(&self) {
        loop {
            let admitted = {
                let mut window = lock(&self.window);
                window.try_admit(
                    self.clock.current_second(),
                    self.config.requests_per_window,
                )
            };
            if admitted {
                return;
            }
            trace!("rate window full; waiting");
            tokio::time::sleep(self.config.window_wait).await;
        }
    }
}

/// Classifier that retries every failure.
pub fn always_retry<E>(_: &E) -> RetryDecision {
    RetryDecision::Retry
}

/// Classifier that gives up on the first failure.
pub fn never_retry<E>(_: &E) -> RetryDecision {
    RetryDecision::GiveUp
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct ManualClock {
        second: AtomicU64,
    }

    impl ManualClock {
        fn advance(&self) {
            self.second.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn current_second(&self) -> u64 {
            self.second.load(Ordering::SeqCst)
        }
    }

    fn fast_config(cap: u32) -> InvokerConfig {
        InvokerConfig {
            requests_per_window: cap,
            window_wait: Duration::from_millis(1),
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn calls_within_cap_run_in_same_window() {
        let clock = Arc::new(ManualClock::default());
        let invoker = RateLimitedInvoker::with_clock(fast_config(3), clock.clone());

        for value in 0..3 {
            let got: Result<i32, String> = invoker
                .invoke(|| async move { Ok(value) }, never_retry)
                .await;
            assert_eq!(got, Ok(value));
        }

        assert_eq!(invoker.requests_in_current_window(), 3);
    }

    #[tokio::test]
    async fn call_over_cap_waits_for_next_window() {
        let clock = Arc::new(ManualClock::default());
        let invoker = RateLimitedInvoker::with_clock(fast_config(2), clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let invoker = invoker.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                invoker
                    .invoke(
                        || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async { Ok::<_, String>(()) }
                        },
                        never_retry,
                    )
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(invoker.requests_in_current_window(), 2);

        clock.advance();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(invoker.requests_in_current_window(), 1);
    }

    #[tokio::test]
    async fn retry_has_no_implicit_attempt_limit() {
        let invoker = RateLimitedInvoker::new(fast_config(10_000));
        let calls = AtomicUsize::new(0);

        let got: Result<usize, String> = invoker
            .invoke(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 50 {
                            Err(format!("failure {n}"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                always_retry,
            )
            .await;

        assert_eq!(got, Ok(50));
        assert_eq!(calls.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn give_up_propagates_error_by_default() {
        let invoker = RateLimitedInvoker::new(fast_config(10));
        let calls = AtomicUsize::new(0);

        let got: Result<(), String> = invoker
            .invoke(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("invalid".to_string()) }
                },
                |err: &String| {
                    if err == "invalid" {
                        RetryDecision::GiveUp
                    } else {
                        RetryDecision::Retry
                    }
                },
            )
            .await;

        assert_eq!(got, Err("invalid".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fail_policy_can_record_and_resolve() {
        let invoker = RateLimitedInvoker::new(fast_config(10));
        let mut recorded = Vec::new();

        let got: Result<Option<u32>, String> = invoker
            .invoke_with(
                || async { Err("disabled".to_string()) },
                never_retry,
                |err| {
                    recorded.push(err);
                    Ok(None)
                },
            )
            .await;

        assert_eq!(got, Ok(None));
        assert_eq!(recorded, vec!["disabled".to_string()]);
    }

    #[test]
    fn window_resets_when_second_changes() {
        let mut window = RateWindow::default();
        assert!(window.try_admit(0, 1));
        assert!(!window.try_admit(0, 1));
        assert!(window.try_admit(1, 1));
        assert_eq!(window.requests, 1);
        assert_eq!(window.start_second, 1);
    }
}
