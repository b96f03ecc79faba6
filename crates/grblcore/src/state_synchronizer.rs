//! Periodic discrepancy detection and modal reconciliation.
//!
//! Grounded structurally on
//! `crates/gcodekit4-communication/src/firmware/connection_watch.rs`'s
//! `tokio::time::interval` task shape. The core carries no independent
//! kinematics model (an explicit non-goal), so "locally-tracked position"
//! is read as "the position this core last recorded" and "remote" as "the
//! next status report while the machine is believed idle": an
//! externally-caused position change (manual jog pendant, physical nudge)
//! is exactly the case this check can actually catch without motion
//! planning of its own. This resolves the ambiguity the source exhibits
//! around this component (see DESIGN.md).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use grblcore_types::{CommandClass, Config, Event, MachineStatus, Position};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::command_manager::CommandManager;
use crate::events::EventBus;
use crate::state_manager::StateManager;

/// Narrow capability the streaming engine exposes so the synchronizer can
/// request a checkpoint without holding a full reference to it (breaking
/// the cyclic manager references the design notes call out).
pub trait CheckpointRequester: Send + Sync {
    fn request_checkpoint(&self);
}

pub struct StateSynchronizer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StateSynchronizer {
    pub fn spawn(
        config: Config,
        commands: CommandManager,
        state: StateManager,
        events: EventBus,
        checkpoints: Option<Arc<dyn CheckpointRequester>>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let task_stop = Arc::clone(&stop);
        let sync_interval = Duration::from_millis(2_000);

        let handle = tokio::spawn(async move {
            let mut last_position = state.snapshot().machine_position;

            loop {
                tokio::time::sleep(sync_interval).await;
                if task_stop.load(Ordering::Relaxed) {
                    break;
                }

                // Reconcile modal state against a fresh parser-state query;
                // the resulting `[GC:...]` feedback is routed back into
                // `StateManager::apply_modal` by the frame router.
                let _ = commands.send("$G", CommandClass::System).await;

                let snapshot = state.snapshot();
                let delta = snapshot.machine_position.distance(&last_position);
                if snapshot.status == MachineStatus::Idle && delta > config.position_tolerance_mm {
                    events.publish(Event::DiscrepancyDetected {
                        field: "machine_position".to_string(),
                        local: distance_from_origin(&last_position),
                        remote: distance_from_origin(&snapshot.machine_position),
                        delta,
                    });
                    debug!(delta, "position moved while machine reported idle");

                    if delta > 1.0 {
                        if let Some(requester) = &checkpoints {
                            requester.request_checkpoint();
                        }
                    }
                }
                last_position = snapshot.machine_position;
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

fn distance_from_origin(p: &Position) -> f64 {
    p.distance(&Position::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_from_origin_is_euclidean() {
        assert_eq!(distance_from_origin(&Position::new(3.0, 4.0, 0.0)), 5.0);
    }
}
