//! Maps a [`CommandOutcome`]/[`Error`] to `{kind, severity, retryable}`,
//! the shape `RetryManager` and `AlarmRecoveryManager` both key off.
//!
//! Grounded on `grblcore_types::error::Error`'s own `is_timeout`/`is_alarm`/
//! `is_retryable` methods; this module is the single place that widens
//! those boolean predicates into the richer classification the component
//! design calls for instead of scattering `match`es across callers.

use grblcore_types::{CommandOutcome, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Transport,
    Syntax,
    Alarm,
    Overflow,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify_error(error: &Error) -> Classification {
        match error {
            Error::Timeout(_) => Classification { kind: ErrorKind::Timeout, severity: Severity::Medium, retryable: true },
            Error::Transport(_) => Classification { kind: ErrorKind::Transport, severity: Severity::High, retryable: true },
            Error::WindowStall { .. } => Classification { kind: ErrorKind::Transport, severity: Severity::High, retryable: true },
            Error::ControllerSyntax(_) => Classification { kind: ErrorKind::Syntax, severity: Severity::Low, retryable: false },
            Error::Alarm(_) => Classification { kind: ErrorKind::Alarm, severity: Severity::Critical, retryable: false },
            Error::Cancelled(_) => Classification { kind: ErrorKind::Unknown, severity: Severity::Low, retryable: false },
            _ => Classification { kind: ErrorKind::Unknown, severity: Severity::Medium, retryable: false },
        }
    }

    pub fn classify_outcome(outcome: &CommandOutcome) -> Classification {
        match outcome {
            CommandOutcome::Ok => Classification { kind: ErrorKind::Unknown, severity: Severity::Low, retryable: false },
            CommandOutcome::Timeout => Classification { kind: ErrorKind::Timeout, severity: Severity::Medium, retryable: true },
            CommandOutcome::Alarm { .. } => Classification { kind: ErrorKind::Alarm, severity: Severity::Critical, retryable: false },
            CommandOutcome::Cancelled { .. } => Classification { kind: ErrorKind::Unknown, severity: Severity::Low, retryable: false },
            CommandOutcome::Error { code } => {
                // Errors 1-22 in the GRBL table are syntax/semantic
                // rejections of the line itself; re-sending the identical
                // line would just fail again. Higher codes (settings,
                // EEPROM, homing-related) are left unknown-but-retryable
                // since some reflect transient controller state.
                if *code >= 1 && *code <= 22 {
                    Classification { kind: ErrorKind::Syntax, severity: Severity::Low, retryable: false }
                } else {
                    Classification { kind: ErrorKind::Overflow, severity: Severity::Medium, retryable: true }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_numbered_errors_are_syntax_and_not_retryable() {
        let c = ErrorClassifier::classify_outcome(&CommandOutcome::Error { code: 9 });
        assert_eq!(c.kind, ErrorKind::Syntax);
        assert!(!c.retryable);
    }

    #[test]
    fn alarm_outcome_is_critical_and_not_retryable() {
        let c = ErrorClassifier::classify_outcome(&CommandOutcome::Alarm { code: 1 });
        assert_eq!(c.kind, ErrorKind::Alarm);
        assert_eq!(c.severity, Severity::Critical);
        assert!(!c.retryable);
    }

    #[test]
    fn timeout_error_is_retryable() {
        let c = ErrorClassifier::classify_error(&Error::Timeout(std::time::Duration::from_secs(1)));
        assert!(c.retryable);
    }
}
