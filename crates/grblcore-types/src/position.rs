//! Positions and work coordinate systems.

use serde::{Deserialize, Serialize};

/// A point in millimeters. The core does not distinguish machine and work
/// positions by type, only by which field of [`crate::state::MachineState`]
/// holds them, since both are plain triples and the relationship between
/// them is a subtraction, not a unit conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ZERO: Position = Position { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn sub(&self, other: &Position) -> Position {
        Position {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }

    /// Euclidean distance, used by `StateSynchronizer` to decide whether a
    /// discrepancy is large enough to warrant a checkpoint.
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn approx_eq(&self, other: &Position, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }
}

/// The six GRBL work coordinate system slots, G54 through G59.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Wcs {
    G54,
    G55,
    G56,
    G57,
    G58,
    G59,
}

impl Wcs {
    pub const ALL: [Wcs; 6] = [Wcs::G54, Wcs::G55, Wcs::G56, Wcs::G57, Wcs::G58, Wcs::G59];

    pub fn from_gcode(word: &str) -> Option<Wcs> {
        match word {
            "G54" => Some(Wcs::G54),
            "G55" => Some(Wcs::G55),
            "G56" => Some(Wcs::G56),
            "G57" => Some(Wcs::G57),
            "G58" => Some(Wcs::G58),
            "G59" => Some(Wcs::G59),
            _ => None,
        }
    }

    fn index(&self) -> usize {
        match self {
            Wcs::G54 => 0,
            Wcs::G55 => 1,
            Wcs::G56 => 2,
            Wcs::G57 => 3,
            Wcs::G58 => 4,
            Wcs::G59 => 5,
        }
    }
}

/// The offset table for all six WCS slots, plus which one is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WcsOffsetTable {
    offsets: [Position; 6],
    active: Wcs,
}

impl WcsOffsetTable {
    pub fn new() -> Self {
        Self {
            offsets: [Position::ZERO; 6],
            active: Wcs::G54,
        }
    }

    pub fn active(&self) -> Wcs {
        self.active
    }

    pub fn set_active(&mut self, wcs: Wcs) {
        self.active = wcs;
    }

    pub fn get(&self, wcs: Wcs) -> Position {
        self.offsets[wcs.index()]
    }

    pub fn active_offset(&self) -> Position {
        self.get(self.active)
    }

    pub fn set(&mut self, wcs: Wcs, offset: Position) {
        self.offsets[wcs.index()] = offset;
    }
}

impl Default for WcsOffsetTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_position_subtracts_active_offset() {
        let mut table = WcsOffsetTable::new();
        table.set(Wcs::G55, Position::new(1.0, 2.0, 3.0));
        table.set_active(Wcs::G55);
        let machine = Position::new(10.0, 10.0, 10.0);
        let work = machine.sub(&table.active_offset());
        assert_eq!(work, Position::new(9.0, 8.0, 7.0));
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn approx_eq_respects_tolerance() {
        let a = Position::new(1.0, 1.0, 1.0);
        let b = Position::new(1.005, 1.0, 1.0);
        assert!(a.approx_eq(&b, 0.01));
        assert!(!a.approx_eq(&b, 0.001));
    }

    #[test]
    fn wcs_from_gcode_round_trips() {
        for wcs in Wcs::ALL {
            let word = format!("{:?}", wcs);
            assert_eq!(Wcs::from_gcode(&word), Some(wcs));
        }
    }
}
