//! Background compaction: worker startup and a manual trigger.
//!
//! The merge itself lives in [`LevelManager::compact_once`]; this module
//! only decides who runs it.
//!
//! [`LevelManager::compact_once`]: crate::LevelManager::compact_once

use std::sync::Arc;
use std::thread;

use crate::error::{EngineError, Result};
use crate::Engine;

impl Engine {
    /// Spawns `num_compactors` worker threads. Each polls for compaction work
    /// every `compaction_interval` until [`close`](Engine::close).
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] after close, or a thread spawn failure.
    pub fn start_compacter(&mut self) -> Result<()> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        for worker in 0..self.config.num_compactors {
            let guard = self.closer.worker();
            let levels = Arc::clone(&self.levels);
            thread::Builder::new()
                .name(format!("compacter-{}", worker))
                .spawn(move || levels.run_compacter(worker, guard))?;
        }
        Ok(())
    }

    /// Runs one compaction round on the calling thread.
    ///
    /// Returns `true` if tables were merged; `false` if L0 is below the
    /// trigger, compaction is disabled, or a compacter is already busy.
    pub fn compact(&self) -> Result<bool> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.levels.compact_once()
    }
}
