//! Modal G/M-code state: the subset of codes that stay "in effect" until
//! explicitly changed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionMode {
    Rapid,    // G0
    Linear,   // G1
    CwArc,    // G2
    CcwArc,   // G3
    Probe,    // G38.x
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plane {
    Xy, // G17
    Zx, // G18
    Yz, // G19
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    Millimeters, // G21
    Inches,      // G20
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMode {
    Absolute, // G90
    Relative, // G91
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedMode {
    UnitsPerMinute, // G94
    InverseTime,    // G93
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoolantMode {
    Off,   // M9
    Mist,  // M7
    Flood, // M8
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpindleMode {
    Off, // M5
    Cw,  // M3
    Ccw, // M4
}

/// The currently active modal state, updated from controller `[GC:...]`
/// feedback and optimistically from acknowledged program lines (see
/// `StateManager::apply_acknowledged_line`). `StateSynchronizer` reconciles
/// the optimistic view against a fresh `$G` query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalState {
    pub motion: MotionMode,
    pub plane: Plane,
    pub units: Units,
    pub distance_mode: DistanceMode,
    pub feed_mode: FeedMode,
    pub coolant: CoolantMode,
    pub spindle: SpindleMode,
    pub active_wcs: crate::position::Wcs,
    pub feed_rate: f64,
    pub spindle_speed: f64,
    pub tool: u32,
}

impl Default for ModalState {
    fn default() -> Self {
        Self {
            motion: MotionMode::Rapid,
            plane: Plane::Xy,
            units: Units::Millimeters,
            distance_mode: DistanceMode::Absolute,
            feed_mode: FeedMode::UnitsPerMinute,
            coolant: CoolantMode::Off,
            spindle: SpindleMode::Off,
            active_wcs: crate::position::Wcs::G54,
            feed_rate: 0.0,
            spindle_speed: 0.0,
            tool: 0,
        }
    }
}

impl ModalState {
    /// Apply a single whitespace-separated G/M word, e.g. from a `[GC:...]`
    /// feedback frame or from scanning an acknowledged program line.
    /// Unrecognized words are ignored; this never errors, matching the
    /// parser's "unrecognized fields are ignored, not fatal" rule.
    pub fn apply_word(&mut self, word: &str) {
        if let Some(wcs) = crate::position::Wcs::from_gcode(word) {
            self.active_wcs = wcs;
            return;
        }
        match word {
            "G0" => self.motion = MotionMode::Rapid,
            "G1" => self.motion = MotionMode::Linear,
            "G2" => self.motion = MotionMode::CwArc,
            "G3" => self.motion = MotionMode::CcwArc,
            "G17" => self.plane = Plane::Xy,
            "G18" => self.plane = Plane::Zx,
            "G19" => self.plane = Plane::Yz,
            "G20" => self.units = Units::Inches,
            "G21" => self.units = Units::Millimeters,
            "G90" => self.distance_mode = DistanceMode::Absolute,
            "G91" => self.distance_mode = DistanceMode::Relative,
            "G93" => self.feed_mode = FeedMode::InverseTime,
            "G94" => self.feed_mode = FeedMode::UnitsPerMinute,
            "M3" => self.spindle = SpindleMode::Cw,
            "M4" => self.spindle = SpindleMode::Ccw,
            "M5" => self.spindle = SpindleMode::Off,
            "M7" => {
                self.coolant = match self.coolant {
                    CoolantMode::Flood | CoolantMode::Both => CoolantMode::Both,
                    _ => CoolantMode::Mist,
                }
            }
            "M8" => {
                self.coolant = match self.coolant {
                    CoolantMode::Mist | CoolantMode::Both => CoolantMode::Both,
                    _ => CoolantMode::Flood,
                }
            }
            "M9" => self.coolant = CoolantMode::Off,
            other => {
                if let Some(rest) = other.strip_prefix('F') {
                    if let Ok(v) = rest.parse::<f64>() {
                        self.feed_rate = v;
                    }
                } else if let Some(rest) = other.strip_prefix('S') {
                    if let Ok(v) = rest.parse::<f64>() {
                        self.spindle_speed = v;
                    }
                } else if let Some(rest) = other.strip_prefix('T') {
                    if let Ok(v) = rest.parse::<u32>() {
                        self.tool = v;
                    }
                }
            }
        }
    }

    /// Apply every word in a feedback or program line, e.g.
    /// `"G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0"`.
    pub fn apply_line(&mut self, line: &str) {
        for word in line.split_whitespace() {
            self.apply_word(word);
        }
    }

    /// A canonicalizing preamble that restores this modal state on the
    /// controller, used when resuming a stream from a checkpoint.
    pub fn preamble(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(match self.units {
            Units::Millimeters => "G21".to_string(),
            Units::Inches => "G20".to_string(),
        });
        lines.push(match self.distance_mode {
            DistanceMode::Absolute => "G90".to_string(),
            DistanceMode::Relative => "G91".to_string(),
        });
        lines.push(match self.plane {
            Plane::Xy => "G17".to_string(),
            Plane::Zx => "G18".to_string(),
            Plane::Yz => "G19".to_string(),
        });
        let wcs = match self.active_wcs {
            crate::position::Wcs::G54 => "G54",
            crate::position::Wcs::G55 => "G55",
            crate::position::Wcs::G56 => "G56",
            crate::position::Wcs::G57 => "G57",
            crate::position::Wcs::G58 => "G58",
            crate::position::Wcs::G59 => "G59",
        };
        lines.push(wcs.to_string());
        lines.push(match self.spindle {
            SpindleMode::Off => "M5".to_string(),
            SpindleMode::Cw => format!("M3 S{}", self.spindle_speed),
            SpindleMode::Ccw => format!("M4 S{}", self.spindle_speed),
        });
        if self.feed_rate > 0.0 {
            lines.push(format!("F{}", self.feed_rate));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_line_parses_gc_feedback() {
        let mut modal = ModalState::default();
        modal.apply_line("G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0");
        assert_eq!(modal.motion, MotionMode::Rapid);
        assert_eq!(modal.plane, Plane::Xy);
        assert_eq!(modal.units, Units::Millimeters);
        assert_eq!(modal.distance_mode, DistanceMode::Absolute);
        assert_eq!(modal.spindle, SpindleMode::Off);
        assert_eq!(modal.coolant, CoolantMode::Off);
    }

    #[test]
    fn coolant_both_when_mist_then_flood() {
        let mut modal = ModalState::default();
        modal.apply_word("M7");
        assert_eq!(modal.coolant, CoolantMode::Mist);
        modal.apply_word("M8");
        assert_eq!(modal.coolant, CoolantMode::Both);
    }

    #[test]
    fn unrecognized_word_is_ignored_not_fatal() {
        let mut modal = ModalState::default();
        let before = modal.clone();
        modal.apply_word("G999");
        assert_eq!(modal, before);
    }

    #[test]
    fn preamble_reflects_current_state() {
        let mut modal = ModalState::default();
        modal.apply_line("G91 G20 M3 S1000 F200");
        let preamble = modal.preamble();
        assert!(preamble.contains(&"G20".to_string()));
        assert!(preamble.contains(&"G91".to_string()));
        assert!(preamble.iter().any(|l| l.starts_with("M3")));
        assert!(preamble.contains(&"F200".to_string()));
    }
}
