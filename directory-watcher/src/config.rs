//! Configuration for a recursive watch session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};
use crate::walk::{WalkOptions, WalkOrder};

/// Default MOVED_FROM/MOVED_TO pairing window. The kernel queues both
/// halves of a rename back to back, so this only has to cover a pair split
/// across two reads.
pub const DEFAULT_PAIRING_WINDOW_MS: u64 = 250;

/// Configuration for a watched tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    /// Root directory of the tree.
    pub root: PathBuf,

    /// How long a MOVED_FROM waits for its MOVED_TO.
    pub pairing_window_ms: u64,

    /// Longest single wait on the event stream before the loop wakes up to
    /// expire renames and check for shutdown.
    pub poll_interval_ms: u64,

    /// Read buffer size, in maximum-length records.
    pub read_buffer_events: usize,

    /// Do not cross mount points.
    pub same_file_system: bool,

    /// Maximum depth to recurse (None = unlimited).
    pub max_depth: Option<usize>,

    /// Capacity of the background runner's event channel.
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl WatcherConfig {
    /// Create a new config for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pairing_window_ms: DEFAULT_PAIRING_WINDOW_MS,
            poll_interval_ms: 500,
            read_buffer_events: 32,
            same_file_system: true,
            max_depth: None,
            channel_capacity: 1024,
        }
    }

    /// Set the root directory.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the rename pairing window.
    pub fn with_pairing_window(mut self, window: Duration) -> Self {
        self.pairing_window_ms = window.as_millis() as u64;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the maximum depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Allow walks to cross into other filesystems.
    pub fn cross_file_systems(mut self) -> Self {
        self.same_file_system = false;
        self
    }

    pub fn pairing_window(&self) -> Duration {
        Duration::from_millis(self.pairing_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Walk options for seeding (post-order) or for directories found later
    /// (pre-order).
    pub fn walk_options(&self, order: WalkOrder) -> WalkOptions {
        WalkOptions {
            order,
            same_file_system: self.same_file_system,
            max_depth: self.max_depth,
        }
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(WatcherError::Config("root must not be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(WatcherError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.read_buffer_events == 0 {
            return Err(WatcherError::Config(
                "read_buffer_events must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(WatcherError::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| WatcherError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
