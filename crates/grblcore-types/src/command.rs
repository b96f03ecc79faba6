//! Command records: the unit the flow-control window and the positional
//! correlator operate on.

use serde::{Deserialize, Serialize};

/// How a line is scheduled. `Immediate` bypasses the character-count
/// window entirely; the rest compete for window space, with `System` and
/// `Status` preferred over `Program` when both fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandClass {
    /// A realtime single byte (`?`, `!`, `~`, `0x18`). Never queued.
    Immediate,
    /// A `$...` system command.
    System,
    /// A motion command (`G0`/`G1`/`G2`/`G3`/...).
    Motion,
    /// The `?` status query, sent as a line by callers that want a
    /// correlated reply rather than the realtime poll path.
    Status,
    /// A line fed by the streaming engine from a program source.
    Program,
}

impl CommandClass {
    /// `System` and `Status` commands should be offered window space ahead
    /// of `Program` lines when both would otherwise fit.
    pub fn priority(&self) -> u8 {
        match self {
            CommandClass::Immediate => 0,
            CommandClass::System => 1,
            CommandClass::Status => 1,
            CommandClass::Motion => 2,
            CommandClass::Program => 2,
        }
    }
}

/// The resolution of a [`CommandRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Ok,
    Error { code: u8 },
    /// The controller raised `ALARM:<n>` while this record was the oldest
    /// unresolved one. Alarms are never retryable.
    Alarm { code: u8 },
    Timeout,
    Cancelled { reason: String },
}

/// A single line tracked from submission through resolution. The
/// CommandManager's `pending` deque holds these in send order; correlation
/// to `ok`/`error` replies is strictly positional (oldest unresolved first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: u64,
    pub line: String,
    pub class: CommandClass,
    pub enqueued_at_ms: u64,
    pub sent_at_ms: Option<u64>,
    pub resolved_at_ms: Option<u64>,
    pub outcome: Option<CommandOutcome>,
}

impl CommandRecord {
    pub fn new(id: u64, line: impl Into<String>, class: CommandClass, enqueued_at_ms: u64) -> Self {
        Self {
            id,
            line: line.into(),
            class,
            enqueued_at_ms,
            sent_at_ms: None,
            resolved_at_ms: None,
            outcome: None,
        }
    }

    /// Byte count this record holds against the flow-control window,
    /// including the terminating newline GRBL expects.
    pub fn window_bytes(&self) -> usize {
        self.line.len() + 1
    }
}
