//! Background runner that owns a session on its own thread.

use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::info;

use crate::backend::WatchBackend;
use crate::config::WatcherConfig;
use crate::error::{Result, WatcherError};
use crate::event::WatchEvent;
use crate::session::{Session, StopHandle};

/// Watches a tree in the background and hands resolved events to async
/// consumers.
///
/// The root is seeded before [`spawn`](Self::spawn) returns, so every
/// directory that existed at that point is already watched. The session
/// then runs on a dedicated thread and feeds a bounded channel; when the
/// channel is full the thread waits, and the kernel queue absorbs the
/// backlog.
#[derive(Debug)]
pub struct DirectoryWatcher {
    /// Absolute root of the watched tree.
    root: PathBuf,

    /// Directories watched after seeding.
    watched: usize,

    /// Event receiver (for consumers).
    event_rx: mpsc::Receiver<WatchEvent>,

    /// Shared with the session thread.
    stop: StopHandle,

    handle: Option<JoinHandle<Result<()>>>,
}

impl DirectoryWatcher {
    /// Start watching `config.root` with the kernel's inotify.
    #[cfg(target_os = "linux")]
    pub fn spawn(config: WatcherConfig) -> Result<Self> {
        let backend = crate::backend::Inotify::new().map_err(WatcherError::Init)?;
        Self::spawn_with(backend, config)
    }

    /// Start watching `config.root` through `backend`.
    pub fn spawn_with<B>(backend: B, config: WatcherConfig) -> Result<Self>
    where
        B: WatchBackend + Send + 'static,
    {
        let capacity = config.channel_capacity;
        let mut session = Session::new(backend, config)?;
        let watched = session.seed()?;
        let root = session.root().to_path_buf();
        let stop = session.stop_handle();

        let (mut event_tx, event_rx) = mpsc::channel(capacity);
        let handle = thread::Builder::new()
            .name("treewatch-session".to_string())
            .spawn(move || session.run(&mut event_tx))?;

        info!("Directory watcher started on {}", root.display());
        Ok(Self {
            root,
            watched,
            event_rx,
            stop,
            handle: Some(handle),
        })
    }

    /// Next event, or `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.event_rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Get the event receiver.
    pub fn events(&mut self) -> &mut mpsc::Receiver<WatchEvent> {
        &mut self.event_rx
    }

    /// Ask the session to stop after the current batch.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Check if the session thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of directories watched when seeding finished.
    pub fn watched(&self) -> usize {
        self.watched
    }

    /// Stop the session and wait for its thread.
    ///
    /// Events still queued are discarded. Returns the error that ended the
    /// session, if any. Blocks for up to one poll interval.
    pub fn join(mut self) -> Result<()> {
        self.stop.stop();
        self.event_rx.close();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let result = handle
            .join()
            .map_err(|_| WatcherError::Io(io::Error::other("watch session thread panicked")))?;
        info!("Directory watcher on {} stopped", self.root.display());
        result
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeBackend, FakeRead};
    use crate::error::{ReadError, TraversalError};
    use crate::event::{EventKind, EventMask, RawEvent, WatchId};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(root: &Path) -> WatcherConfig {
        WatcherConfig::new(root).with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_spawn_seeds_and_delivers_events() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("a")).unwrap();

        // Seeding is post-order, so the fake hands out wd 1 to "a" and 2 to
        // the root.
        let mut backend = FakeBackend::new();
        backend.push_events(vec![
            RawEvent::new(WatchId::new(2), EventMask::CREATE).with_name("f.txt"),
            RawEvent::new(WatchId::new(1), EventMask::MODIFY).with_name("g.txt"),
        ]);

        let mut watcher = DirectoryWatcher::spawn_with(backend, config(temp_dir.path())).unwrap();
        assert_eq!(watcher.watched(), 2);

        let first = watcher.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Create);
        assert_eq!(first.path, watcher.root().join("f.txt"));

        let second = watcher.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::Modify);
        assert_eq!(second.path, watcher.root().join("a/g.txt"));

        assert!(watcher.is_running());
        watcher.join().unwrap();
    }

    #[tokio::test]
    async fn test_spawn_fails_for_missing_root() {
        let temp_dir = TempDir::new().unwrap();

        let err = DirectoryWatcher::spawn_with(
            FakeBackend::new(),
            config(&temp_dir.path().join("missing")),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            WatcherError::Traversal(TraversalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_closes_the_stream() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher =
            DirectoryWatcher::spawn_with(FakeBackend::new(), config(temp_dir.path())).unwrap();

        watcher.stop();
        assert!(watcher.recv().await.is_none());
        watcher.join().unwrap();
    }

    #[tokio::test]
    async fn test_read_failure_is_reported_by_join() {
        let temp_dir = TempDir::new().unwrap();
        let mut backend = FakeBackend::new();
        backend.push_read(FakeRead::Fail(libc::EIO));

        let mut watcher = DirectoryWatcher::spawn_with(backend, config(temp_dir.path())).unwrap();

        assert!(watcher.recv().await.is_none());
        let err = watcher.join().unwrap_err();
        assert!(matches!(err, WatcherError::Read(ReadError::Io(_))));
    }
}
