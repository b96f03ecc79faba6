//! Bounded retry with exponential backoff and a per-key circuit breaker.
//!
//! No prior-art module covers retry/backoff directly (the GRBL control
//! flow it's grounded on assumes a human at the keyboard re-sends).
//! Grounded instead on `kimberlitedb-kimberlite` and
//! `prospectorengine-prospector-btc`, which both reach for `rand` to
//! jitter a backoff; the `CircuitState` shape below follows the
//! conventional closed/open/half-open machine those retry layers
//! implement.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::classifier::ErrorClassifier;
use crate::clock::now_ms;
use crate::events::EventBus;
use grblcore_types::{CommandOutcome, Config, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { opened_at_ms: u64 },
    HalfOpen,
}

struct CircuitEntry {
    state: CircuitState,
    consecutive_failures: u32,
}

impl Default for CircuitEntry {
    fn default() -> Self {
        Self { state: CircuitState::Closed, consecutive_failures: 0 }
    }
}

/// Tracks retry attempts and a circuit breaker per logical key (e.g. a
/// program line number, or a fixed key like `"connect"` for reconnects).
pub struct RetryManager {
    config: Config,
    events: EventBus,
    circuits: Mutex<HashMap<String, CircuitEntry>>,
}

impl RetryManager {
    pub fn new(config: Config, events: EventBus) -> Self {
        Self { config, events, circuits: Mutex::new(HashMap::new()) }
    }

    /// Returns `true` if `key` is currently rejected by its circuit
    /// breaker. A half-open breaker allows exactly one probe through.
    pub fn is_open(&self, key: &str) -> bool {
        let mut circuits = self.circuits.lock();
        let entry = circuits.entry(key.to_string()).or_default();
        match entry.state {
            CircuitState::Open { opened_at_ms } => {
                if now_ms().saturating_sub(opened_at_ms) >= self.config.cb_cooldown_ms {
                    entry.state = CircuitState::HalfOpen;
                    false
                } else {
                    true
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => false,
        }
    }

    /// Exponential backoff with full jitter: `random(0, base * 2^attempt)`,
    /// capped at 30s so a long retry budget never produces an hour-long
    /// wait on the last attempt.
    pub fn backoff_delay(attempt: u32) -> Duration {
        let base_ms = 200u64;
        let cap_ms = 30_000u64;
        let max = (base_ms.saturating_mul(1u64 << attempt.min(16))).min(cap_ms);
        let jittered = rand::thread_rng().gen_range(0..=max.max(1));
        Duration::from_millis(jittered)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Wraps a fallible send with the bounded retry policy: up to
    /// `max_retries` attempts, exponential backoff with jitter between
    /// them, stopping early once `key`'s circuit breaker is open or the
    /// outcome classifies as not retryable (a rejected line, an alarm).
    pub async fn retry_command<F, Fut>(&self, key: &str, mut op: F) -> CommandOutcome
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = CommandOutcome>,
    {
        let mut attempt = 0;
        loop {
            if self.is_open(key) {
                return CommandOutcome::Cancelled { reason: format!("circuit open for {key}") };
            }
            let outcome = op().await;
            if outcome == CommandOutcome::Ok {
                self.record_success(key);
                return outcome;
            }
            self.record_failure(key);
            let classification = ErrorClassifier::classify_outcome(&outcome);
            if !classification.retryable || attempt >= self.max_retries() {
                return outcome;
            }
            attempt += 1;
            debug!(key, attempt, ?outcome, "retrying command after transient failure");
            tokio::time::sleep(Self::backoff_delay(attempt)).await;
        }
    }

    pub fn record_success(&self, key: &str) {
        let mut circuits = self.circuits.lock();
        if let Some(entry) = circuits.get_mut(key) {
            if entry.state != CircuitState::Closed {
                debug!(key, "circuit closing after successful probe");
                self.events.publish(Event::CircuitClosed { key: key.to_string() });
            }
            entry.state = CircuitState::Closed;
            entry.consecutive_failures = 0;
        }
    }

    pub fn record_failure(&self, key: &str) {
        let mut circuits = self.circuits.lock();
        let entry = circuits.entry(key.to_string()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.config.cb_threshold
            && !matches!(entry.state, CircuitState::Open { .. })
        {
            warn!(key, failures = entry.consecutive_failures, "circuit opening");
            entry.state = CircuitState::Open { opened_at_ms: now_ms() };
            self.events.publish(Event::CircuitOpened { key: key.to_string() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn circuit_opens_after_threshold_failures() {
        let mut config = Config::default();
        config.cb_threshold = 2;
        let manager = RetryManager::new(config, EventBus::new());
        assert!(!manager.is_open("line-5"));
        manager.record_failure("line-5");
        assert!(!manager.is_open("line-5"));
        manager.record_failure("line-5");
        assert!(manager.is_open("line-5"));
    }

    #[test]
    fn circuit_half_opens_after_cooldown() {
        let mut config = Config::default();
        config.cb_threshold = 1;
        config.cb_cooldown_ms = 0;
        let manager = RetryManager::new(config, EventBus::new());
        manager.record_failure("connect");
        assert!(!manager.is_open("connect"));
    }

    #[test]
    fn success_resets_failure_count_and_closes_circuit() {
        let mut config = Config::default();
        config.cb_threshold = 2;
        let manager = RetryManager::new(config, EventBus::new());
        manager.record_failure("x");
        manager.record_success("x");
        manager.record_failure("x");
        assert!(!manager.is_open("x"));
    }

    #[test]
    fn backoff_delay_grows_and_stays_capped() {
        let small = RetryManager::backoff_delay(0);
        let large = RetryManager::backoff_delay(20);
        assert!(small.as_millis() <= 200);
        assert!(large.as_millis() <= 30_000);
    }

    #[tokio::test]
    async fn retry_command_resends_on_timeout_then_succeeds() {
        let mut config = Config::default();
        config.max_retries = 3;
        let manager = RetryManager::new(config, EventBus::new());
        let calls = AtomicU32::new(0);
        let outcome = manager
            .retry_command("line-0", || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        CommandOutcome::Timeout
                    } else {
                        CommandOutcome::Ok
                    }
                }
            })
            .await;
        assert_eq!(outcome, CommandOutcome::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_command_gives_up_after_max_retries() {
        let mut config = Config::default();
        config.max_retries = 1;
        let manager = RetryManager::new(config, EventBus::new());
        let calls = AtomicU32::new(0);
        let outcome = manager
            .retry_command("line-1", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { CommandOutcome::Timeout }
            })
            .await;
        assert_eq!(outcome, CommandOutcome::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_command_does_not_resend_a_non_retryable_rejection() {
        let manager = RetryManager::new(Config::default(), EventBus::new());
        let calls = AtomicU32::new(0);
        let outcome = manager
            .retry_command("line-2", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { CommandOutcome::Error { code: 9 } }
            })
            .await;
        assert_eq!(outcome, CommandOutcome::Error { code: 9 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
