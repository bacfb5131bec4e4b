//! # Directory Watcher
//!
//! Recursive change notification for a directory tree on top of Linux
//! inotify, which only ever watches a single directory.
//!
//! ## Features
//!
//! - **Complete seeding**: every directory under the root is watched before
//!   events are delivered
//! - **Race-free growth**: new directories are walked as soon as they appear,
//!   so nothing created inside them is missed
//! - **Renames keep their watches**: a directory moved within the tree is
//!   re-pathed instead of re-watched
//! - **Overflow recovery**: a lost event queue triggers a rescan
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Session                                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  walk ──► Registrar ──► WatchBackend ──► EventReader            │
//! │              │                                │                 │
//! │              ▼                                ▼                 │
//! │          WatchTable ◄──────────────── Resynchronizer ──► Sink   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Session`] runs the loop on the calling thread; [`DirectoryWatcher`]
//! runs it in the background and exposes a tokio channel.

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod reader;
pub mod registrar;
pub mod resync;
pub mod session;
pub mod sink;
pub mod table;
pub mod walk;
pub mod watcher;

#[cfg(target_os = "linux")]
pub use backend::Inotify;
pub use backend::WatchBackend;
pub use config::WatcherConfig;
pub use error::{Result, WatcherError};
pub use event::{EventKind, EventMask, RawEvent, WatchEvent, WatchId};
pub use session::{PollOutcome, Session, SessionStats, StopHandle};
pub use sink::{EventSink, FnSink};
pub use table::WatchTable;
pub use walk::{WalkOptions, WalkOrder};
pub use watcher::DirectoryWatcher;
