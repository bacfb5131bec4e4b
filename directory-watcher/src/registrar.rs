//! Adds and removes watches, keeping the table in step with the capability.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::backend::WatchBackend;
use crate::error::{RegistrationError, Result};
use crate::event::{EventMask, WatchId};
use crate::table::WatchTable;
use crate::walk::{WalkOptions, walk_dirs};

/// Wraps the capability with the fixed directory-only watch mask.
#[derive(Debug)]
pub struct Registrar<B> {
    backend: B,
    mask: EventMask,
}

impl<B: WatchBackend> Registrar<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            mask: EventMask::WATCH | EventMask::ONLYDIR,
        }
    }

    pub fn mask(&self) -> EventMask {
        self.mask
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Watch `path` and record it in `table`.
    pub fn add(
        &mut self,
        table: &mut WatchTable,
        path: &Path,
    ) -> std::result::Result<WatchId, RegistrationError> {
        let wd = self
            .backend
            .add_watch(path, self.mask)
            .map_err(|e| RegistrationError::from_io(path.to_path_buf(), e))?;
        debug!("Watching {} as {wd}", path.display());
        table.insert(wd, path.to_path_buf());
        Ok(wd)
    }

    /// Watch every directory under `root` (inclusive).
    ///
    /// Vanished and permission-denied directories below `root` are skipped.
    /// Fatal registration errors, and any failure to walk or watch `root`
    /// itself, propagate. Returns the number of entries the table gained.
    pub fn add_tree(
        &mut self,
        table: &mut WatchTable,
        root: &Path,
        options: WalkOptions,
    ) -> Result<usize> {
        let before = table.len();
        for dir in walk_dirs(root, options)? {
            match self.add(table, &dir) {
                Ok(_) => {}
                Err(e) if e.is_fatal() || dir == root => return Err(e.into()),
                Err(e) => warn!("Skipping directory: {e}"),
            }
        }
        Ok(table.len().saturating_sub(before))
    }

    /// Drop a single watch. Ids the capability already forgot are ignored.
    pub fn remove(&mut self, table: &mut WatchTable, wd: WatchId) -> Option<PathBuf> {
        let path = table.remove(wd);
        self.release(wd);
        path
    }

    /// Drop the watch on `prefix` and on everything beneath it.
    pub fn remove_subtree(&mut self, table: &mut WatchTable, prefix: &Path) -> Vec<(WatchId, PathBuf)> {
        let removed = table.remove_subtree(prefix);
        for (wd, _) in &removed {
            self.release(*wd);
        }
        removed
    }

    fn release(&mut self, wd: WatchId) {
        if let Err(e) = self.backend.remove_watch(wd) {
            debug!("Watch {wd} already gone: {e}");
        }
    }
}
