//! Error taxonomy for the control core.
//!
//! Each subsystem gets its own `thiserror` enum; [`Error`] unifies them
//! behind `#[from]` conversions so callers can propagate with `?` while
//! still being able to match on the originating subsystem when they need
//! to (see [`Error::is_retryable`] and friends).

use thiserror::Error as ThisError;

/// Failures opening, writing to, or reading from the serial transport.
#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("write to serial port failed: {0}")]
    Write(std::io::Error),
    #[error("read from serial port failed: {0}")]
    Read(std::io::Error),
    #[error("transport is faulted after a prior write failure; reconnect required")]
    Faulted,
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport already connected")]
    AlreadyConnected,
}

/// Failures classifying or decoding an inbound frame.
#[derive(Debug, ThisError)]
pub enum ProtocolError {
    #[error("malformed status report: {0}")]
    MalformedStatusReport(String),
    #[error("malformed feedback frame: {0}")]
    MalformedFeedback(String),
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),
}

/// A `error:<n>` response from the controller, surfaced to the command
/// that provoked it.
#[derive(Debug, Clone, Copy, ThisError)]
#[error("controller rejected command: error:{code}")]
pub struct ControllerSyntaxError {
    pub code: u8,
}

/// An `ALARM:<n>` condition. Never retryable; always halts streaming.
#[derive(Debug, Clone, Copy, ThisError)]
#[error("controller alarm: ALARM:{code}")]
pub struct AlarmError {
    pub code: u8,
}

/// Failures in the streaming engine's own bookkeeping, distinct from
/// transport/protocol/controller errors that flow through command futures.
#[derive(Debug, ThisError)]
pub enum StreamError {
    #[error("no active stream session")]
    NoActiveSession,
    #[error("stream is not in a state that allows this operation: {0}")]
    InvalidTransition(String),
    #[error("program source error: {0}")]
    Source(std::io::Error),
    #[error("checkpoint references a line beyond the end of the program")]
    CheckpointOutOfRange,
}

/// Failures in alarm recovery and retry orchestration.
#[derive(Debug, ThisError)]
pub enum RecoveryError {
    #[error("recovery aborted: a second alarm ({code}) arrived mid-recovery")]
    NestedAlarm { code: u8 },
    #[error("recovery exhausted its retry budget for alarm {code}")]
    RetriesExhausted { code: u8 },
    #[error("circuit breaker open for {key}; rejecting without attempting the operation")]
    CircuitOpen { key: String },
}

/// Unified error type returned from the public API surface.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    ControllerSyntax(#[from] ControllerSyntaxError),

    #[error(transparent)]
    Alarm(#[from] AlarmError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("no acknowledgement for {bytes_in_flight} in-flight bytes after {elapsed:?}")]
    WindowStall {
        bytes_in_flight: usize,
        elapsed: std::time::Duration,
    },

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_alarm(&self) -> bool {
        matches!(self, Error::Alarm(_))
    }

    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Whether a `RetryManager` should consider retrying this error.
    /// Alarms are never retryable; syntax errors are not retryable unless
    /// the caller explicitly re-issues the command.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Transport(_) | Error::WindowStall { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
