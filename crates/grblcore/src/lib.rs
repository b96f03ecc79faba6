//! CNC control core: reliable G-code streaming and state tracking over a
//! GRBL-family serial link.
//!
//! Component boundaries and their cyclic-reference breaks follow the
//! design notes directly: [`controller::Controller`] is the only type most
//! callers need, wiring together the command window
//! ([`command_manager::CommandManager`]), the canonical machine state
//! ([`state_manager::StateManager`]), adaptive status polling
//! ([`status_poller::StatusPoller`]), periodic reconciliation
//! ([`state_synchronizer::StateSynchronizer`]), the streaming engine
//! ([`streaming::StreamingEngine`]), alarm recovery
//! ([`alarm_recovery::AlarmRecoveryManager`]) and retry/circuit-breaking
//! ([`retry::RetryManager`]) over the transport and protocol crates.

pub mod alarm_recovery;
pub mod chunked_reader;
pub mod classifier;
pub mod clock;
pub mod command_manager;
pub mod controller;
pub mod events;
pub mod retry;
pub mod state_manager;
pub mod state_synchronizer;
pub mod status_poller;
pub mod streaming;

pub use alarm_recovery::AlarmRecoveryManager;
pub use chunked_reader::{FileProgramReader, InMemoryProgramReader, ProgramReader};
pub use classifier::{Classification, ErrorClassifier, ErrorKind, Severity};
pub use command_manager::CommandManager;
pub use controller::Controller;
pub use events::{EventBus, Subscription};
pub use retry::RetryManager;
pub use state_manager::StateManager;
pub use state_synchronizer::{CheckpointRequester, StateSynchronizer};
pub use status_poller::StatusPoller;
pub use streaming::StreamingEngine;

pub use grblcore_types::*;
