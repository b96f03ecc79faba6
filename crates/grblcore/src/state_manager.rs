//! Canonical machine state: the single writer over [`MachineState`].
//!
//! Grounded on `src/firmware/grbl/controller.rs::GrblControllerState`,
//! which is already wrapped in `Arc<RwLock<...>>` and mutated from
//! several call sites (its poll task and its public methods). This module
//! keeps that shape: the `parking_lot::RwLock` itself provides the total
//! ordering "all mutations are serialized" requires, rather
//! than introducing a separate actor task, since every mutation here is a
//! short, synchronous field update with no `.await` inside the critical
//! section.

use std::sync::Arc;

use grblcore_protocol::StatusReport as WireStatusReport;
use grblcore_types::{Event, MachineState, MachineStatus, Position, Store, Wcs};
use parking_lot::RwLock;
use tracing::debug;

use crate::clock::now_ms;
use crate::events::EventBus;

#[derive(Clone)]
pub struct StateManager {
    inner: Arc<RwLock<MachineState>>,
    events: EventBus,
}

impl StateManager {
    pub fn new(events: EventBus) -> Self {
        Self { inner: Arc::new(RwLock::new(MachineState::new(now_ms()))), events }
    }

    /// Updates position, status, feed, and spindle from a parsed status
    /// report; recomputes the work position from the core's own WCS
    /// offsets (see DESIGN.md's Open Question decision on `WCO`: it is
    /// informational only, never written back into the offset table).
    pub fn apply_status(&self, report: &WireStatusReport) {
        let mut state = self.inner.write();
        let previous_status = state.status;

        if let Some(status) = MachineStatus::parse(&report.state) {
            state.status = status;
        }
        if let Some((x, y, z)) = report.machine_pos {
            state.machine_position = Position::new(x, y, z);
            state.recompute_work_position();
        } else if let Some((x, y, z)) = report.work_pos {
            // Some firmware configurations report only WPos; derive
            // machine position from the work offset instead.
            let work = Position::new(x, y, z);
            let offset = state.wcs_offsets.active_offset();
            state.machine_position = Position::new(work.x + offset.x, work.y + offset.y, work.z + offset.z);
            state.work_position = work;
        }
        if let Some(feed) = report.feed_rate {
            state.feed_rate = feed;
            state.modal.feed_rate = feed;
        }
        if let Some(spindle) = report.spindle_speed {
            state.spindle_speed = spindle;
            state.modal.spindle_speed = spindle;
        }
        state.last_update_ms = now_ms();

        let new_status = state.status;
        let machine = state.machine_position;
        let work = state.work_position;
        drop(state);

        self.events.publish(Event::StatusReceived { status: new_status });
        if new_status != previous_status {
            debug!(?previous_status, ?new_status, "machine status transitioned");
            self.events.publish(Event::StateChanged { from: previous_status, to: new_status });
        }
        self.events.publish(Event::PositionChanged { machine, work });
    }

    /// Applies a `[GC:...]` feedback line (e.g. from an on-demand `$G`
    /// query) to the modal snapshot.
    pub fn apply_modal(&self, gc_feedback: &str) {
        let mut state = self.inner.write();
        state.modal.apply_line(gc_feedback);
        state.last_update_ms = now_ms();
    }

    /// Optimistically updates modal state from an acknowledged program
    /// line. `StateSynchronizer` reconciles this against a fresh `$G`
    /// query on its own schedule.
    pub fn apply_acknowledged_line(&self, line: &str) {
        let mut state = self.inner.write();
        state.modal.apply_line(line);
    }

    pub fn set_wcs_offset(&self, wcs: Wcs, offset: Position) {
        let mut state = self.inner.write();
        state.wcs_offsets.set(wcs, offset);
        state.recompute_work_position();
    }

    pub fn set_active_wcs(&self, wcs: Wcs) {
        let mut state = self.inner.write();
        state.wcs_offsets.set_active(wcs);
        state.modal.active_wcs = wcs;
        state.recompute_work_position();
    }

    /// Zeroes the active WCS at the current machine position, the way a
    /// `G10 L20` / "touch off" operation would.
    pub fn zero_active_wcs(&self) {
        let mut state = self.inner.write();
        let machine = state.machine_position;
        let active = state.wcs_offsets.active();
        state.wcs_offsets.set(active, machine);
        state.recompute_work_position();
    }

    /// Records the raw welcome banner seen on connect, grounded on
    /// `GrblResponse::Version`'s capture. Diagnostic only; nothing
    /// here depends on the controller's reported firmware string.
    pub fn record_welcome(&self, banner: &str) {
        let mut state = self.inner.write();
        state.controller_version = Some(banner.to_string());
    }

    pub fn snapshot(&self) -> MachineState {
        self.inner.read().clone()
    }

    pub async fn persist(&self, store: &dyn Store) -> grblcore_types::Result<()> {
        let state = self.snapshot();
        let persisted = grblcore_types::PersistedState {
            schema_version: grblcore_types::store::SCHEMA_VERSION,
            wcs_offsets: Wcs::ALL.iter().map(|w| (*w, state.wcs_offsets.get(*w))).collect(),
            active_wcs: state.wcs_offsets.active(),
            modal_snapshot: state.modal.clone(),
            last_checkpoint: None,
        };
        store.save_wcs(&persisted).await
    }

    pub async fn restore(&self, store: &dyn Store) -> grblcore_types::Result<()> {
        if let Some(persisted) = store.load_wcs().await? {
            let mut state = self.inner.write();
            for (wcs, offset) in persisted.wcs_offsets {
                state.wcs_offsets.set(wcs, offset);
            }
            state.wcs_offsets.set_active(persisted.active_wcs);
            state.modal = persisted.modal_snapshot;
            state.recompute_work_position();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grblcore_protocol::parse_response;
    use grblcore_protocol::GrblResponse;

    fn status_report(line: &str) -> WireStatusReport {
        match parse_response(line) {
            GrblResponse::Status(report) => report,
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[test]
    fn apply_status_updates_position_and_recomputes_work() {
        let manager = StateManager::new(EventBus::new());
        manager.set_wcs_offset(Wcs::G54, Position::new(1.0, 1.0, 1.0));
        manager.apply_status(&status_report("<Run|MPos:5.000,5.000,5.000>"));
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.status, MachineStatus::Run);
        assert_eq!(snapshot.machine_position, Position::new(5.0, 5.0, 5.0));
        assert_eq!(snapshot.work_position, Position::new(4.0, 4.0, 4.0));
        assert!(snapshot.coherent(1e-9));
    }

    #[test]
    fn wco_in_status_report_does_not_mutate_offset_table() {
        let manager = StateManager::new(EventBus::new());
        manager.apply_status(&status_report("<Idle|MPos:0,0,0|WCO:9.000,9.000,9.000>"));
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.wcs_offsets.active_offset(), Position::ZERO);
    }

    #[test]
    fn zero_active_wcs_sets_offset_to_current_machine_position() {
        let manager = StateManager::new(EventBus::new());
        manager.apply_status(&status_report("<Idle|MPos:12.5,0,3>"));
        manager.zero_active_wcs();
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.work_position, Position::ZERO);
    }

    #[test]
    fn apply_modal_updates_from_gc_feedback() {
        let manager = StateManager::new(EventBus::new());
        manager.apply_modal("G1 G55 G21 G91 M3 S500");
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.wcs_offsets.active(), Wcs::G55);
        assert_eq!(snapshot.modal.active_wcs, Wcs::G55);
    }
}
