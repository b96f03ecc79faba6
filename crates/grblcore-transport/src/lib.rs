//! Serial transport and line framing.
//!
//! Grounded on `src/communication/serial.rs`
//! (`RealSerialPort`, `MockSerialPort`, `list_ports`) and
//! `crates/gcodekit4-communication/src/communication/mod.rs`'s
//! `Communicator` trait, generalized to GRBL's specific framing rule: a
//! complete line ends in LF or CRLF, trailing partial bytes are retained
//! across reads, and the underlying `serialport` handle is blocking, so
//! reads happen on a dedicated OS thread, keeping blocking I/O off the
//! async read path entirely.

pub mod framing;
pub mod ports;
pub mod serial;

pub use framing::LineFramer;
pub use ports::{list_ports, SerialPortInfo};
pub use serial::{InboundLine, SerialTransport, SerialTransportConfig, Transport};
