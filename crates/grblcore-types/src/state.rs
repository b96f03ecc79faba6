//! Canonical machine state: the aggregate that [`crate::Event`] diffs are
//! computed against and that `StateManager` (in `grblcore`) exclusively
//! owns.

use serde::{Deserialize, Serialize};

use crate::modal::ModalState;
use crate::position::{Position, Wcs, WcsOffsetTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldSubState {
    /// Hold complete, ready to resume.
    Complete,
    /// Hold in progress, deceleration not yet finished.
    Decelerating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoorSubState {
    DoorOpen,
    WaitingForDoor,
    Resuming,
}

/// A tagged union over GRBL's reported `State` field. Transitions are
/// driven solely by controller status reports; nothing else may construct
/// a transition out of thin air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineStatus {
    Idle,
    Run,
    Hold(Option<HoldSubState>),
    Jog,
    Alarm,
    Door(Option<DoorSubState>),
    Check,
    Home,
    Sleep,
}

impl MachineStatus {
    /// Parse GRBL's `State` or `State:n` status field, e.g. `"Run"`,
    /// `"Hold:0"`, `"Door:1"`.
    pub fn parse(raw: &str) -> Option<MachineStatus> {
        let mut parts = raw.splitn(2, ':');
        let name = parts.next()?;
        let sub = parts.next();
        Some(match name {
            "Idle" => MachineStatus::Idle,
            "Run" => MachineStatus::Run,
            "Jog" => MachineStatus::Jog,
            "Alarm" => MachineStatus::Alarm,
            "Check" => MachineStatus::Check,
            "Home" => MachineStatus::Home,
            "Sleep" => MachineStatus::Sleep,
            "Hold" => MachineStatus::Hold(sub.and_then(|s| match s {
                "0" => Some(HoldSubState::Complete),
                "1" => Some(HoldSubState::Decelerating),
                _ => None,
            })),
            "Door" => MachineStatus::Door(sub.and_then(|s| match s {
                "0" => Some(DoorSubState::DoorOpen),
                "1" => Some(DoorSubState::WaitingForDoor),
                "2" => Some(DoorSubState::Resuming),
                _ => None,
            })),
            _ => return None,
        })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, MachineStatus::Run | MachineStatus::Jog | MachineStatus::Home)
    }
}

/// The full canonical machine state. `StateManager` is the single writer;
/// all other components hold cheap, immutable [`MachineState::snapshot`]
/// copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    pub machine_position: Position,
    pub work_position: Position,
    pub wcs_offsets: WcsOffsetTable,
    pub status: MachineStatus,
    pub modal: ModalState,
    pub feed_rate: f64,
    pub spindle_speed: f64,
    /// Milliseconds since the Unix epoch of the last update that produced
    /// this state. Used to check the "non-stale timestamp" invariant.
    pub last_update_ms: u64,
    /// Raw welcome banner (`"Grbl 1.1h ['$' for help]"`) from the most
    /// recent connection, if one has been seen. Diagnostic only.
    pub controller_version: Option<String>,
}

impl MachineState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            machine_position: Position::ZERO,
            work_position: Position::ZERO,
            wcs_offsets: WcsOffsetTable::new(),
            status: MachineStatus::Idle,
            modal: ModalState::default(),
            feed_rate: 0.0,
            spindle_speed: 0.0,
            last_update_ms: now_ms,
            controller_version: None,
        }
    }

    /// Recompute `work_position` from `machine_position` and the active
    /// WCS offset. Must be called after any mutation to either.
    pub fn recompute_work_position(&mut self) {
        self.work_position = self.machine_position.sub(&self.wcs_offsets.active_offset());
    }

    pub fn active_wcs(&self) -> Wcs {
        self.wcs_offsets.active()
    }

    /// The `work = machine - wcs_offsets[active]` invariant, checked to
    /// within `tolerance_mm`.
    pub fn coherent(&self, tolerance_mm: f64) -> bool {
        let expected = self.machine_position.sub(&self.wcs_offsets.active_offset());
        self.work_position.approx_eq(&expected, tolerance_mm)
    }

    pub fn is_stale(&self, now_ms: u64, max_age_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_update_ms) > max_age_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_substate_status() {
        assert_eq!(MachineStatus::parse("Idle"), Some(MachineStatus::Idle));
        assert_eq!(
            MachineStatus::parse("Hold:0"),
            Some(MachineStatus::Hold(Some(HoldSubState::Complete)))
        );
        assert_eq!(
            MachineStatus::parse("Door:1"),
            Some(MachineStatus::Door(Some(DoorSubState::WaitingForDoor)))
        );
        assert_eq!(MachineStatus::parse("Bogus"), None);
    }

    #[test]
    fn recompute_work_position_matches_invariant() {
        let mut state = MachineState::new(0);
        state.wcs_offsets.set(state.active_wcs(), Position::new(1.0, 1.0, 1.0));
        state.machine_position = Position::new(5.0, 5.0, 5.0);
        state.recompute_work_position();
        assert!(state.coherent(1e-6));
        assert_eq!(state.work_position, Position::new(4.0, 4.0, 4.0));
    }

    #[test]
    fn staleness_uses_age_relative_to_poll_interval() {
        let state = MachineState::new(1_000);
        assert!(!state.is_stale(1_400, 500));
        assert!(state.is_stale(2_000, 500));
    }
}
