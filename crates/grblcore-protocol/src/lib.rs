//! GRBL wire protocol: constants, realtime bytes, and response parsing.
//!
//! Everything in this crate is pure: no I/O, no async. `grblcore-transport`
//! hands it complete lines; `grblcore` hands it realtime command bytes to
//! write. Grounded on
//! `src/firmware/grbl/{constants.rs,response_parser.rs,error_decoder.rs}`
//! and `crates/gcodekit4-communication/src/firmware/grbl/status_parser.rs`.

pub mod constants;
pub mod decoder;
pub mod response;

pub use constants::*;
pub use decoder::{decode_alarm, decode_error};
pub use response::{parse_response, BufferState, Feedback, GrblResponse, Overrides, StatusReport};
