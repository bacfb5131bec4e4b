//! Depth-first directory enumeration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::TraversalError;

/// Order in which a walk yields directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkOrder {
    /// Children before their parent. Used to seed the table at startup.
    #[default]
    PostOrder,

    /// Parent before its children. Used for directories that appear while
    /// the session runs: the parent's watch exists before its entries are
    /// listed, so nothing created in between goes unseen.
    PreOrder,
}

/// Options for [`walk_dirs`].
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    pub order: WalkOrder,

    /// Stay on the root's filesystem.
    pub same_file_system: bool,

    /// Maximum depth below the root (None = unlimited).
    pub max_depth: Option<usize>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            order: WalkOrder::PostOrder,
            same_file_system: true,
            max_depth: None,
        }
    }
}

impl WalkOptions {
    pub fn with_order(mut self, order: WalkOrder) -> Self {
        self.order = order;
        self
    }
}

/// Start a walk of every directory under `root`, `root` included.
///
/// Fails if `root` is missing, not a directory, or unreadable. Unreadable
/// directories further down are skipped with a warning.
pub fn walk_dirs(root: &Path, options: WalkOptions) -> Result<DirWalk, TraversalError> {
    let metadata = fs::metadata(root).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => TraversalError::NotFound(root.to_path_buf()),
        _ => TraversalError::Io {
            path: root.to_path_buf(),
            source,
        },
    })?;
    if !metadata.is_dir() {
        return Err(TraversalError::NotADirectory(root.to_path_buf()));
    }
    fs::read_dir(root).map_err(|source| TraversalError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .same_file_system(options.same_file_system)
        .contents_first(options.order == WalkOrder::PostOrder)
        .max_depth(options.max_depth.unwrap_or(usize::MAX))
        .sort_by_file_name();

    Ok(DirWalk {
        inner: walker.into_iter(),
    })
}

/// Lazy, single-pass sequence of directories produced by [`walk_dirs`].
pub struct DirWalk {
    inner: walkdir::IntoIter,
}

impl Iterator for DirWalk {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            match self.inner.next()? {
                Ok(entry) if entry.file_type().is_dir() => return Some(entry.into_path()),
                Ok(_) => continue,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    warn!("Skipping unreadable directory {path}: {e}");
                }
            }
        }
    }
}

impl std::fmt::Debug for DirWalk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirWalk").finish_non_exhaustive()
    }
}
