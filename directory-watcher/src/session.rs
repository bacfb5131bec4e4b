//! The watch session: seed once, then read and resynchronize until stopped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use path_absolutize::Absolutize;
use tracing::{error, info};

use crate::backend::WatchBackend;
use crate::config::WatcherConfig;
use crate::error::{Result, WatcherError};
use crate::reader::EventReader;
use crate::registrar::Registrar;
use crate::resync::{ResyncStats, Resynchronizer};
use crate::sink::EventSink;
use crate::table::WatchTable;
use crate::walk::WalkOrder;

/// Shared flag that asks a running session to return.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What one [`Session::poll`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing arrived before the wait ended.
    Idle,
    /// A batch of this many records was applied.
    Applied(usize),
}

/// Snapshot of session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub watches: usize,
    pub pending_renames: usize,
    pub resync: ResyncStats,
}

/// One recursive watch over a root directory.
///
/// Owns the table and drives the registrar, reader and resynchronizer from
/// a single thread. The only place it blocks is the read inside
/// [`poll`](Self::poll).
#[derive(Debug)]
pub struct Session<B> {
    root: PathBuf,
    config: WatcherConfig,
    table: WatchTable,
    registrar: Registrar<B>,
    reader: EventReader,
    resync: Resynchronizer,
    stop: StopHandle,
}

#[cfg(target_os = "linux")]
impl Session<crate::backend::Inotify> {
    /// Open a session on a fresh inotify instance.
    pub fn inotify(config: WatcherConfig) -> Result<Self> {
        let backend = crate::backend::Inotify::new().map_err(WatcherError::Init)?;
        Self::new(backend, config)
    }
}

impl<B: WatchBackend> Session<B> {
    pub fn new(backend: B, config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        let root = config.root.absolutize()?.into_owned();
        let resync = Resynchronizer::new(
            root.clone(),
            config.pairing_window(),
            config.walk_options(WalkOrder::PreOrder),
        );
        Ok(Self {
            root,
            reader: EventReader::new(config.read_buffer_events),
            registrar: Registrar::new(backend),
            table: WatchTable::new(),
            resync,
            config,
            stop: StopHandle::default(),
        })
    }

    /// Absolute root of the watched tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table(&self) -> &WatchTable {
        &self.table
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            watches: self.table.len(),
            pending_renames: self.resync.pending().len(),
            resync: self.resync.stats(),
        }
    }

    /// Walk the root post-order and watch every directory in it.
    ///
    /// Fails if the root cannot be walked or watched, or if the watch limit
    /// runs out. Returns the number of watches added.
    pub fn seed(&mut self) -> Result<usize> {
        let options = self.config.walk_options(WalkOrder::PostOrder);
        let added = self.registrar.add_tree(&mut self.table, &self.root, options)?;
        info!("Watching {added} directories under {}", self.root.display());
        Ok(added)
    }

    /// Run one loop iteration: expire overdue renames, wait for the next
    /// batch, apply it in order.
    ///
    /// The wait is bounded by the poll interval and by the earliest
    /// pending-rename deadline.
    pub fn poll<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<PollOutcome> {
        let now = Instant::now();
        self.resync
            .expire(now, &mut self.table, &mut self.registrar, sink)?;

        let mut timeout = self.config.poll_interval();
        if let Some(deadline) = self.resync.next_deadline() {
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }

        let Some(events) = self
            .reader
            .read_batch(self.registrar.backend_mut(), Some(timeout))?
        else {
            return Ok(PollOutcome::Idle);
        };

        let now = Instant::now();
        let count = events.len();
        for event in events {
            self.resync
                .handle(event, now, &mut self.table, &mut self.registrar, sink)?;
        }
        Ok(PollOutcome::Applied(count))
    }

    /// Poll until stopped, the sink closes, or a fatal error occurs.
    ///
    /// Stopping takes effect between batches, so every decoded record is
    /// applied; parked renames are then resolved as moves out of the tree.
    pub fn run<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        while !self.stop.is_stopped() {
            match self.poll(sink) {
                Ok(_) => {}
                Err(WatcherError::ChannelSend) => {
                    info!("Event receiver closed, stopping");
                    return Ok(());
                }
                Err(e) => {
                    error!("Watch session on {} failed: {e}", self.root.display());
                    return Err(e);
                }
            }
        }
        match self
            .resync
            .flush(&mut self.table, &mut self.registrar, sink)
        {
            Ok(()) | Err(WatcherError::ChannelSend) => {}
            Err(e) => return Err(e),
        }
        info!("Watch session on {} stopped", self.root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeBackend, FakeRead};
    use crate::error::{ReadError, TraversalError};
    use crate::event::{EventKind, EventMask, RawEvent, WatchEvent};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn session(root: &Path) -> Session<FakeBackend> {
        let config = WatcherConfig::new(root).with_poll_interval(Duration::from_millis(1));
        Session::new(FakeBackend::new(), config).unwrap()
    }

    #[test]
    fn test_seed_watches_every_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for dir in ["a/b/c", "a/d", "e"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("a/file.txt"), "x").unwrap();

        let mut session = session(root);
        let added = session.seed().unwrap();

        assert_eq!(added, 6);
        for dir in ["", "a", "a/b", "a/b/c", "a/d", "e"] {
            let path = root.join(dir);
            assert!(
                session.table().lookup_by_path(&path).is_some(),
                "{} not watched",
                path.display()
            );
        }
        assert!(
            session
                .table()
                .lookup_by_path(&root.join("a/file.txt"))
                .is_none()
        );
    }

    #[test]
    fn test_seed_fails_for_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let mut session = session(&temp_dir.path().join("missing"));

        let err = session.seed().unwrap_err();
        assert!(matches!(
            err,
            WatcherError::Traversal(TraversalError::NotFound(_))
        ));
    }

    #[test]
    fn test_poll_applies_batch_and_reports_idle() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut session = session(root);
        session.seed().unwrap();
        let root_wd = session.table().lookup_by_path(session.root()).unwrap();

        session.registrar.backend_mut().push_events(vec![
            RawEvent::new(root_wd, EventMask::CREATE).with_name("f"),
            RawEvent::new(root_wd, EventMask::MODIFY).with_name("f"),
        ]);
        let mut sink: Vec<WatchEvent> = Vec::new();

        assert_eq!(session.poll(&mut sink).unwrap(), PollOutcome::Applied(2));
        assert_eq!(session.poll(&mut sink).unwrap(), PollOutcome::Idle);
        let kinds: Vec<_> = sink.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Create, EventKind::Modify]);
        assert_eq!(session.stats().resync.processed, 2);
    }

    #[test]
    fn test_run_propagates_read_errors() {
        let temp_dir = TempDir::new().unwrap();
        let mut session = session(temp_dir.path());
        session.seed().unwrap();
        session.registrar.backend_mut().push_read(FakeRead::Eof);

        let err = session.run(&mut Vec::new()).unwrap_err();
        assert!(matches!(err, WatcherError::Read(ReadError::EndOfStream)));
    }

    #[test]
    fn test_run_stops_and_flushes_pending_renames() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let config = WatcherConfig::new(root)
            .with_poll_interval(Duration::from_millis(1))
            .with_pairing_window(Duration::from_secs(60));
        let mut session = Session::new(FakeBackend::new(), config).unwrap();
        session.seed().unwrap();
        let root_wd = session.table().lookup_by_path(session.root()).unwrap();

        session.registrar.backend_mut().push_events(vec![
            RawEvent::new(root_wd, EventMask::MOVED_FROM)
                .with_name("gone.txt")
                .with_cookie(9),
        ]);
        let mut sink: Vec<WatchEvent> = Vec::new();
        session.poll(&mut sink).unwrap();
        assert!(sink.is_empty());
        assert_eq!(session.stats().pending_renames, 1);

        session.stop_handle().stop();
        session.run(&mut sink).unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].kind, EventKind::MovedFrom);
        assert_eq!(session.stats().pending_renames, 0);
    }

    #[test]
    fn test_run_returns_cleanly_when_sink_closes() {
        let temp_dir = TempDir::new().unwrap();
        let mut session = session(temp_dir.path());
        session.seed().unwrap();
        let root_wd = session.table().lookup_by_path(session.root()).unwrap();
        session
            .registrar
            .backend_mut()
            .push_events(vec![RawEvent::new(root_wd, EventMask::ATTRIB)]);

        let (mut tx, rx) = tokio::sync::mpsc::channel::<WatchEvent>(1);
        drop(rx);

        session.run(&mut tx).unwrap();
    }
}
