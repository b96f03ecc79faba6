//! Data model, configuration, and error taxonomy shared by every crate in
//! the GRBL control core workspace.
//!
//! This crate holds no I/O and no async runtime dependency. It exists so
//! that `grblcore-protocol`, `grblcore-transport`, and `grblcore` agree on a
//! single vocabulary for positions, machine status, commands, and errors
//! without depending on each other.

pub mod alarm;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod modal;
pub mod position;
pub mod state;
pub mod store;
pub mod stream;

pub use alarm::AlarmCode;
pub use command::{CommandClass, CommandOutcome, CommandRecord};
pub use config::Config;
pub use error::{Error, Result};
pub use event::Event;
pub use modal::ModalState;
pub use position::{Position, Wcs, WcsOffsetTable};
pub use state::{MachineState, MachineStatus};
pub use store::{PersistedState, Store};
pub use stream::{Checkpoint, ErrorStrategy, SessionPhase, StreamOptions, StreamSession, StreamStats};
