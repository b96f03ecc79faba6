//! Protocol-level constants, grounded on
//! `src/firmware/grbl/constants.rs`.

/// Status request, processed out-of-band by the controller.
pub const CMD_QUERY_STATUS: u8 = b'?';
/// Feed hold.
pub const CMD_FEED_HOLD: u8 = b'!';
/// Cycle start / resume.
pub const CMD_CYCLE_START: u8 = b'~';
/// Soft reset. Ctrl-X.
pub const CMD_SOFT_RESET: u8 = 0x18;

pub const GRBL_DEFAULT_BAUD_RATE: u32 = 115_200;
pub const GRBL_DEFAULT_WINDOW_BYTES: usize = 128;
pub const GRBL_MAX_BLOCK_SIZE: usize = 256;
