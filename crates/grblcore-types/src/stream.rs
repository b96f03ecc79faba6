//! Streaming session bookkeeping: options, checkpoints, and the stats
//! reported on completion or stop.

use serde::{Deserialize, Serialize};

use crate::modal::ModalState;
use crate::position::Position;

/// What the streaming engine does when a program line comes back
/// `error:<n>`. Alarms always stop regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ErrorStrategy {
    #[default]
    Stop,
    Continue,
    Prompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    pub look_ahead_lines: usize,
    pub checkpoint_interval_lines: usize,
    pub error_strategy: ErrorStrategy,
    pub dry_run: bool,
    /// Simulated per-line ack delay used only in dry-run mode.
    pub dry_run_delay_ms: u64,
    pub progress_interval_ms: u64,
    /// Resume from this checkpoint instead of starting at line 0.
    pub resume_from: Option<Checkpoint>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            look_ahead_lines: 15,
            checkpoint_interval_lines: 500,
            error_strategy: ErrorStrategy::Stop,
            dry_run: false,
            dry_run_delay_ms: 5,
            progress_interval_ms: 250,
            resume_from: None,
        }
    }
}

/// A recoverable resumption point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub line_index: usize,
    pub machine_position: Position,
    pub modal: ModalState,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
    Completed,
}

/// Owned by the streaming engine for the lifetime of one stream. Reset to
/// nothing on stop or completion; checkpoints may outlive the session if
/// the host persists them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSession {
    pub total_lines: Option<usize>,
    pub current_line_index: usize,
    pub lines_acked: usize,
    pub error_count: usize,
    pub phase: SessionPhase,
    pub checkpoints: Vec<Checkpoint>,
    pub start_ms: u64,
}

impl StreamSession {
    pub fn new(start_ms: u64, resume_from: Option<&Checkpoint>) -> Self {
        Self {
            total_lines: None,
            current_line_index: resume_from.map(|c| c.line_index + 1).unwrap_or(0),
            lines_acked: 0,
            error_count: 0,
            phase: SessionPhase::Running,
            checkpoints: resume_from.cloned().into_iter().collect(),
            start_ms,
        }
    }
}

/// Reported on `Completed` or `Stopped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub lines_total: usize,
    pub lines_acked: usize,
    pub errors: usize,
    pub elapsed_ms: u64,
}
