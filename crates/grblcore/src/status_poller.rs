//! Adaptive-rate `?` polling.
//!
//! Grounded on
//! `crates/gcodekit4-communication/src/firmware/connection_watch.rs::ConnectionWatcher`,
//! a `tokio::time::interval` loop inside a `tokio::spawn`'d task, stopped
//! via an abort handle, generalized from one fixed interval to a
//! three-tier adaptive schedule (fast while running, slow once idle).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use grblcore_types::{CommandClass, Config, Event, MachineStatus};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::now_ms;
use crate::command_manager::CommandManager;
use crate::events::EventBus;
use crate::state_manager::StateManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rate {
    Fast,
    Base,
    Slow,
}

impl Rate {
    fn interval(&self, config: &Config) -> Duration {
        match self {
            Rate::Fast => config.fast_poll_interval(),
            Rate::Base => config.poll_interval(),
            Rate::Slow => config.slow_poll_interval(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Rate::Fast => "fast",
            Rate::Base => "base",
            Rate::Slow => "slow",
        }
    }
}

pub struct StatusPoller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub fn spawn(
        config: Config,
        commands: CommandManager,
        state: StateManager,
        events: EventBus,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let task_stop = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            let mut rate = Rate::Base;
            let mut idle_since_ms: Option<u64> = None;
            let mut consecutive_drops: u32 = 0;
            // Timestamp of the last poll sent, and whether a fresh status
            // report has arrived since then.
            let mut last_poll_sent_ms: Option<u64> = None;
            let mut last_seen_update_ms = state.snapshot().last_update_ms;

            loop {
                if task_stop.load(Ordering::Relaxed) {
                    break;
                }

                tokio::time::sleep(rate.interval(&config)).await;
                if task_stop.load(Ordering::Relaxed) {
                    break;
                }

                let snapshot = state.snapshot();
                let replied = snapshot.last_update_ms > last_seen_update_ms;
                if replied {
                    last_seen_update_ms = snapshot.last_update_ms;
                    consecutive_drops = 0;
                } else if let Some(sent) = last_poll_sent_ms {
                    if now_ms().saturating_sub(sent) > config.response_timeout_ms {
                        consecutive_drops += 1;
                        debug!(consecutive_drops, "status poll dropped: no report within response_timeout");
                        if consecutive_drops >= 2 {
                            events.publish(Event::ControllerUnresponsive);
                        }
                    }
                }

                // `?` is realtime; CommandManager writes it directly and
                // does not hold it against the flow-control window.
                let _ = commands.send("?", CommandClass::Immediate).await;
                last_poll_sent_ms = Some(now_ms());

                let status = snapshot.status;
                let command_recent = now_ms().saturating_sub(commands.last_activity_ms()) < 2_000;

                let next_rate = if status.is_running() || command_recent {
                    idle_since_ms = None;
                    Rate::Fast
                } else {
                    let idle_start = *idle_since_ms.get_or_insert_with(now_ms);
                    if now_ms().saturating_sub(idle_start) > 10_000 {
                        Rate::Slow
                    } else {
                        Rate::Base
                    }
                };

                if next_rate != rate {
                    rate = next_rate;
                    events.publish(Event::PollIntervalChanged {
                        new_ms: rate.interval(&config).as_millis() as u64,
                        reason: rate.label().to_string(),
                    });
                }
            }
        });

        Self { stop, handle: Some(handle) }
    }

    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Convenience used by tests and [`MachineStatus::is_running`] callers.
pub(crate) fn is_active(status: MachineStatus) -> bool {
    status.is_running()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_rate_applies_to_run_jog_home() {
        assert!(is_active(MachineStatus::Run));
        assert!(is_active(MachineStatus::Jog));
        assert!(is_active(MachineStatus::Home));
        assert!(!is_active(MachineStatus::Idle));
    }
}
