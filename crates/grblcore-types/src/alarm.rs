//! GRBL alarm codes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmCode {
    HardLimit,            // 1
    SoftLimit,            // 2
    ResetDuringMotion,    // 3
    ProbeFailInitial,     // 4
    ProbeFailNoContact,   // 5
    HomingFailReset,      // 6
    HomingFailDoor,       // 7
    HomingFailPullOff,    // 8
    HomingFailApproach,   // 9
    Unknown(u8),
}

impl AlarmCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => AlarmCode::HardLimit,
            2 => AlarmCode::SoftLimit,
            3 => AlarmCode::ResetDuringMotion,
            4 => AlarmCode::ProbeFailInitial,
            5 => AlarmCode::ProbeFailNoContact,
            6 => AlarmCode::HomingFailReset,
            7 => AlarmCode::HomingFailDoor,
            8 => AlarmCode::HomingFailPullOff,
            9 => AlarmCode::HomingFailApproach,
            other => AlarmCode::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            AlarmCode::HardLimit => 1,
            AlarmCode::SoftLimit => 2,
            AlarmCode::ResetDuringMotion => 3,
            AlarmCode::ProbeFailInitial => 4,
            AlarmCode::ProbeFailNoContact => 5,
            AlarmCode::HomingFailReset => 6,
            AlarmCode::HomingFailDoor => 7,
            AlarmCode::HomingFailPullOff => 8,
            AlarmCode::HomingFailApproach => 9,
            AlarmCode::Unknown(n) => *n,
        }
    }

    /// Whether this is one of the two codes (8, 9: pull-off and approach
    /// failures) the recovery manager retries with `$H` rather than just
    /// unlocking. 6 and 7 (reset/door during homing) fall through to the
    /// `$X` + status-check recipe used for every other alarm.
    pub fn is_homing_failure(&self) -> bool {
        matches!(self, AlarmCode::HomingFailPullOff | AlarmCode::HomingFailApproach)
    }
}
