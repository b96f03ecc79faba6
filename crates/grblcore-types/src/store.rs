//! Host-supplied persistence. The core dictates no format; it hands the
//! host a versioned, opaquely-encoded record and asks for it back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::modal::ModalState;
use crate::position::{Position, Wcs};
use crate::stream::Checkpoint;

pub const SCHEMA_VERSION: u16 = 1;

/// What gets persisted across sessions: WCS offsets, the active WCS, the
/// last-known modal snapshot, and the most recent checkpoint if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u16,
    pub wcs_offsets: Vec<(Wcs, Position)>,
    pub active_wcs: Wcs,
    pub modal_snapshot: ModalState,
    pub last_checkpoint: Option<Checkpoint>,
}

/// Implemented by the host. On-disk JSON, SQLite, or in-memory
/// implementations are all out of scope for the core; only the interface
/// is specified.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_wcs(&self) -> Result<Option<PersistedState>>;
    async fn save_wcs(&self, state: &PersistedState) -> Result<()>;
    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
    async fn latest_checkpoint(&self) -> Result<Option<Checkpoint>>;
}
