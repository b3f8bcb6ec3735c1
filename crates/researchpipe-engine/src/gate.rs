//! Rate-limited call gate.
//!
//! Every outbound LLM/search/fetch call goes through here. The gate bounds
//! in-flight calls with a semaphore, bounds call starts per rolling second,
//! applies a hard per-attempt timeout, and retries transient failures with
//! exponential backoff plus jitter.

use rand::Rng;
use researchpipe_core::{Error, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::config::EngineConfig;

#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Hard timeout for each attempt. `None` uses the gate default.
    pub timeout: Option<Duration>,
    /// When false, a timed-out attempt is terminal instead of retried.
    pub retry_on_timeout: bool,
    /// Override for the retry budget. `None` uses the gate default.
    pub max_retries: Option<usize>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retry_on_timeout: true,
            max_retries: None,
        }
    }
}

pub struct CallGate {
    semaphore: Arc<Semaphore>,
    // Start times of calls initiated in the last rolling second.
    window: Mutex<VecDeque<Instant>>,
    max_per_second: usize,
    max_retries: usize,
    base_backoff: Duration,
    default_timeout: Duration,
}

impl CallGate {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(cfg.max_concurrent_calls.max(1))),
            window: Mutex::new(VecDeque::new()),
            max_per_second: cfg.max_calls_per_second.max(1),
            max_retries: cfg.max_retries,
            base_backoff: cfg.base_backoff,
            default_timeout: cfg.call_timeout,
        }
    }

    /// Run `f` under the gate's limits with default options.
    pub async fn call<T, F, Fut>(&self, label: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.call_with(label, CallOptions::default(), f).await
    }

    /// Run `f` under the gate's limits. The closure is re-invoked on each
    /// retry attempt; backoff sleeps happen with no permit held so waiting
    /// retries do not starve other callers.
    pub async fn call_with<T, F, Fut>(&self, label: &str, opts: CallOptions, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let max_retries = opts.max_retries.unwrap_or(self.max_retries).max(1);
        let mut last_err = Error::Llm("call gate: no attempts made".to_string());

        for attempt in 0..max_retries {
            self.wait_for_window_slot().await;
            let permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| Error::RateLimited(format!("{label}: semaphore closed: {e}")))?;

            let t0 = Instant::now();
            let outcome = tokio::time::timeout(timeout, f()).await;
            drop(permit);

            match outcome {
                Ok(Ok(v)) => {
                    debug!(
                        label,
                        attempt = attempt + 1,
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "call succeeded"
                    );
                    return Ok(v);
                }
                Ok(Err(e)) => {
                    warn!(label, attempt = attempt + 1, error = %e, "call failed");
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    last_err = e;
                }
                Err(_) => {
                    warn!(
                        label,
                        attempt = attempt + 1,
                        timeout_ms = timeout.as_millis() as u64,
                        "call timed out"
                    );
                    let e = Error::Timeout(format!(
                        "{label}: no result within {}ms",
                        timeout.as_millis()
                    ));
                    if !opts.retry_on_timeout {
                        return Err(e);
                    }
                    last_err = e;
                }
            }

            if attempt + 1 < max_retries {
                tokio::time::sleep(self.backoff_for(attempt)).await;
            }
        }

        Err(last_err)
    }

    /// Exponential backoff with up to one second of random jitter.
    fn backoff_for(&self, attempt: usize) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32 << attempt.min(10) as u32);
        let jitter_ms = rand::thread_rng().gen_range(0..1000u64);
        exp + Duration::from_millis(jitter_ms)
    }

    /// Block until starting a call keeps us within the per-second cap.
    async fn wait_for_window_slot(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while let Some(front) = window.front() {
                    if now.duration_since(*front) >= Duration::from_secs(1) {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
                if window.len() < self.max_per_second {
                    window.push_back(now);
                    None
                } else {
                    // Sleep until the oldest start leaves the window.
                    let oldest = *window.front().expect("window nonempty at cap");
                    Some(Duration::from_secs(1).saturating_sub(now.duration_since(oldest)))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d.max(Duration::from_millis(1))).await,
            }
        }
    }
}

fn is_retryable(e: &Error) -> bool {
    match e {
        Error::Timeout(_) | Error::RateLimited(_) => true,
        Error::Llm(_) | Error::Search(_) | Error::Fetch(_) => true,
        Error::NotConfigured(_)
        | Error::Parse(_)
        | Error::InvalidUrl(_)
        | Error::Index(_)
        | Error::Sink(_)
        | Error::BudgetExceeded(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gate(max_retries: usize) -> CallGate {
        let cfg = EngineConfig {
            max_retries,
            base_backoff: Duration::from_millis(5),
            call_timeout: Duration::from_millis(200),
            ..EngineConfig::default()
        };
        CallGate::new(&cfg)
    }

    #[tokio::test]
    async fn returns_success_value_first_try() {
        let g = gate(3);
        let out: Result<u32> = g.call("ok", || async { Ok(7) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let g = gate(3);
        let attempts = AtomicUsize::new(0);
        let out = g
            .call("flaky", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::Fetch("boom".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(out.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let g = gate(2);
        let attempts = AtomicUsize::new(0);
        let out: Result<()> = g
            .call("dead", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Llm("always".to_string())) }
            })
            .await;
        assert!(matches!(out, Err(Error::Llm(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_short_circuit() {
        let g = gate(5);
        let attempts = AtomicUsize::new(0);
        let out: Result<()> = g
            .call("cfg", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::NotConfigured("no key".to_string())) }
            })
            .await;
        assert!(matches!(out, Err(Error::NotConfigured(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_is_terminal_when_retry_on_timeout_disabled() {
        let g = gate(5);
        let attempts = AtomicUsize::new(0);
        let opts = CallOptions {
            timeout: Some(Duration::from_millis(20)),
            retry_on_timeout: false,
            max_retries: None,
        };
        let out: Result<()> = g
            .call_with("slow", opts, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;
        assert!(matches!(out, Err(Error::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_semaphore_size() {
        let cfg = EngineConfig {
            max_concurrent_calls: 2,
            max_calls_per_second: 1000,
            max_retries: 1,
            ..EngineConfig::default()
        };
        let g = Arc::new(CallGate::new(&cfg));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let g = g.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                g.call("probe", || {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
