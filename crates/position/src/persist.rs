//! Persistence contract for position snapshots
//!
//! The core never persists its own state between processes; a collaborator
//! supplies a writer and owns the storage format. [`MemoryWriter`] is the
//! in-process double used by tests and the demo runner.

use parking_lot::Mutex;
use thiserror::Error;

use hermes_core::Position;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("position write failed: {0}")]
    Write(String),
}

/// Sink for position snapshots, provided by the persistence collaborator
pub trait PositionWriter: Send + Sync {
    fn write_position(&self, position: &Position) -> Result<(), PersistError>;
}

/// In-memory writer that records everything it is handed
#[derive(Default)]
pub struct MemoryWriter {
    rows: Mutex<Vec<Position>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn rows(&self) -> Vec<Position> {
        self.rows.lock().clone()
    }
}

impl PositionWriter for MemoryWriter {
    fn write_position(&self, position: &Position) -> Result<(), PersistError> {
        self.rows.lock().push(position.clone());
        Ok(())
    }
}
