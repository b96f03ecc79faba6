//! The typed event union fanned out by `grblcore`'s `EventBus`.
//!
//! Grounded on `EventDispatcher`'s `ControllerEvent` in `src/core/event.rs`,
//! widened to cover every lifecycle signal named in the component design:
//! streaming progress, flow-control stalls, recovery lifecycle, and
//! discrepancy correction, not just connection/position changes.

use serde::{Deserialize, Serialize};

use crate::alarm::AlarmCode;
use crate::position::Position;
use crate::state::MachineStatus;
use crate::stream::StreamStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Connected { port: String },
    Disconnected,

    StatusReceived { status: MachineStatus },
    StateChanged { from: MachineStatus, to: MachineStatus },
    PositionChanged { machine: Position, work: Position },

    PollIntervalChanged { new_ms: u64, reason: String },
    ControllerUnresponsive,

    StreamStarted { total_lines: Option<usize> },
    StreamProgress { current_line: usize, lines_acked: usize, total_lines: Option<usize> },
    StreamPaused,
    StreamResumed,
    StreamStopped { reason: String, stats: StreamStats },
    StreamCompleted { stats: StreamStats },
    CheckpointCreated { line_index: usize },

    CommandError { line: usize, code: u8 },
    AlarmDetected { code: u8 },
    TransportStalled { bytes_in_flight: usize },

    DiscrepancyDetected { field: String, local: f64, remote: f64, delta: f64 },

    RecoveryStarted { code: u8 },
    RecoveryStep { command: String, ok: bool },
    RecoveryCompleted { code: u8, duration_ms: u64 },
    RecoveryFailed { code: u8, reason: String },

    CircuitOpened { key: String },
    CircuitClosed { key: String },

    ConnectionHealthChanged { healthy: bool },
}

impl Event {
    pub fn alarm_detected(code: AlarmCode) -> Event {
        Event::AlarmDetected { code: code.code() }
    }
}
