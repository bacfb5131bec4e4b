//! Keeps the watch table in step with the tree as events arrive.
//!
//! Every raw record is resolved to an absolute path through the table and
//! handed to the sink; records that change the shape of the tree also add,
//! re-path or purge watches:
//!
//! | record | table action |
//! |---|---|
//! | CREATE of a directory | walk it pre-order and watch every directory found |
//! | MOVED_FROM | park `(cookie, old path)` until the pairing window closes |
//! | MOVED_TO with a parked cookie | re-path the subtree, keeping every watch id |
//! | MOVED_TO without one | treat as CREATE |
//! | parked MOVED_FROM past its deadline | purge the old subtree |
//! | DELETE_SELF | purge the subtree |
//! | MOVE_SELF | see [`Resynchronizer::handle`] |
//! | IGNORED | forget the id |
//! | Q_OVERFLOW | rescan the whole tree |

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::WatchBackend;
use crate::error::{ResolutionError, Result, WatcherError};
use crate::event::{EventKind, EventMask, RawEvent, WatchEvent, WatchId};
use crate::registrar::Registrar;
use crate::sink::EventSink;
use crate::table::WatchTable;
use crate::walk::{WalkOptions, WalkOrder};

/// A MOVED_FROM waiting for its MOVED_TO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRename {
    pub old_path: PathBuf,
    pub is_dir: bool,
    pub deadline: Instant,
}

/// Parked MOVED_FROM records, oldest first.
///
/// Every entry gets the same window, so arrival order is deadline order.
#[derive(Debug, Default)]
pub struct PendingRenames {
    entries: VecDeque<(u32, PendingRename)>,
}

impl PendingRenames {
    pub fn insert(&mut self, cookie: u32, pending: PendingRename) {
        self.entries.push_back((cookie, pending));
    }

    /// Claim the entry for `cookie`, if it is still parked.
    pub fn take(&mut self, cookie: u32) -> Option<PendingRename> {
        let index = self.entries.iter().position(|(c, _)| *c == cookie)?;
        self.entries.remove(index).map(|(_, pending)| pending)
    }

    /// Remove and return every entry whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: Instant) -> Vec<PendingRename> {
        let mut expired = Vec::new();
        while self
            .entries
            .front()
            .is_some_and(|(_, pending)| pending.deadline <= now)
        {
            if let Some((_, pending)) = self.entries.pop_front() {
                expired.push(pending);
            }
        }
        expired
    }

    /// Remove and return every entry whose old path is `path` or lies under it.
    pub fn take_under(&mut self, path: &Path) -> Vec<PendingRename> {
        let (hit, keep): (VecDeque<_>, VecDeque<_>) = self
            .entries
            .drain(..)
            .partition(|(_, pending)| pending.old_path.starts_with(path));
        self.entries = keep;
        hit.into_iter().map(|(_, pending)| pending).collect()
    }

    /// Remove and return everything, oldest first.
    pub fn take_all(&mut self) -> Vec<PendingRename> {
        self.entries.drain(..).map(|(_, pending)| pending).collect()
    }

    /// Re-path every entry at or under `from` to the same place under `to`.
    ///
    /// Returns the number of entries rewritten.
    pub fn rename_under(&mut self, from: &Path, to: &Path) -> usize {
        let mut moved = 0;
        for (_, pending) in &mut self.entries {
            let Ok(rest) = pending.old_path.strip_prefix(from) else {
                continue;
            };
            pending.old_path = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
            moved += 1;
        }
        moved
    }

    pub fn refers_to(&self, path: &Path) -> bool {
        self.entries.iter().any(|(_, pending)| pending.old_path == path)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.front().map(|(_, pending)| pending.deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counters kept by the resynchronizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncStats {
    /// Raw records handled.
    pub processed: u64,

    /// Records dropped because their watch id was unknown.
    pub discarded: u64,

    /// Renames resolved inside the tree.
    pub renames: u64,

    /// Watches dropped by subtree purges.
    pub purged: u64,

    /// Queue overflows seen.
    pub overflows: u64,
}

/// The event-driven half of a session.
#[derive(Debug)]
pub struct Resynchronizer {
    root: PathBuf,
    window: Duration,
    walk: WalkOptions,
    pending: PendingRenames,
    /// Directories re-pathed by a resolved rename whose MOVE_SELF has not
    /// arrived yet.
    renamed: HashMap<WatchId, u32>,
    stats: ResyncStats,
}

impl Resynchronizer {
    /// `walk` supplies the filesystem and depth limits, relative to `root`;
    /// walks started here are always pre-order.
    pub fn new(root: impl Into<PathBuf>, window: Duration, walk: WalkOptions) -> Self {
        Self {
            root: root.into(),
            window,
            walk: walk.with_order(WalkOrder::PreOrder),
            pending: PendingRenames::default(),
            renamed: HashMap::new(),
            stats: ResyncStats::default(),
        }
    }

    pub fn pending(&self) -> &PendingRenames {
        &self.pending
    }

    pub fn stats(&self) -> ResyncStats {
        self.stats
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.next_deadline()
    }

    /// Apply one record received at `now`.
    ///
    /// A MOVE_SELF keeps the watch if the directory's rename was already
    /// resolved inside the tree, waits if a MOVED_FROM for it is still
    /// parked, and otherwise (the root itself, or a parent that is not
    /// watched) purges the subtree.
    ///
    /// Only fatal registration errors and a closed sink are returned.
    pub fn handle<B, S>(
        &mut self,
        event: RawEvent,
        now: Instant,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
        sink: &mut S,
    ) -> Result<()>
    where
        B: WatchBackend,
        S: EventSink + ?Sized,
    {
        self.stats.processed += 1;

        if event.mask.contains(EventMask::Q_OVERFLOW) {
            return self.overflow(table, registrar, sink);
        }

        let Some(dir) = table.lookup_by_id(event.wd).map(Path::to_path_buf) else {
            if !event.mask.contains(EventMask::IGNORED) {
                self.stats.discarded += 1;
                let err = ResolutionError::UnknownWatch(event.wd);
                debug!("Discarding {:?}: {err}", event.mask);
            }
            return Ok(());
        };

        let is_child = event.name.is_some();
        let path = match &event.name {
            Some(name) => dir.join(name),
            None => dir.clone(),
        };
        let is_dir = event.is_dir() || !is_child;
        let mask = event.mask;

        if mask.contains(EventMask::MOVED_FROM) {
            match event.cookie {
                Some(cookie) => self.pending.insert(
                    cookie,
                    PendingRename {
                        old_path: path.clone(),
                        is_dir,
                        deadline: now + self.window,
                    },
                ),
                None => self.moved_out(&path, is_dir, table, registrar, sink)?,
            }
        }

        if mask.contains(EventMask::MOVED_TO) {
            self.moved_in(&path, is_dir, event.cookie, table, registrar, sink)?;
        }

        if is_dir && is_child && mask.contains(EventMask::CREATE) {
            self.flush_under(&path, table, registrar, sink)?;
        }

        for kind in EventKind::simple_kinds(mask) {
            sink.send(WatchEvent::new(kind, &path).with_dir(is_dir))?;
        }

        if mask.contains(EventMask::MOVE_SELF) {
            sink.send(WatchEvent::new(EventKind::MoveSelf, &path).with_dir(true))?;
        }

        if is_dir && is_child && mask.contains(EventMask::CREATE) {
            self.watch_new_tree(&path, table, registrar)?;
        }

        if mask.contains(EventMask::DELETE_SELF) {
            self.purge(&dir, table, registrar);
        } else if mask.contains(EventMask::MOVE_SELF) {
            self.moved_self(event.wd, &dir, table, registrar);
        }

        if mask.contains(EventMask::IGNORED) && table.remove(event.wd).is_some() {
            debug!("Kernel dropped {} for {}", event.wd, dir.display());
        }

        Ok(())
    }

    /// Resolve every parked MOVED_FROM whose window closed at or before
    /// `now` as a move out of the tree.
    pub fn expire<B, S>(
        &mut self,
        now: Instant,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
        sink: &mut S,
    ) -> Result<()>
    where
        B: WatchBackend,
        S: EventSink + ?Sized,
    {
        for pending in self.pending.take_expired(now) {
            debug!(
                "No MOVED_TO for {} within {:?}",
                pending.old_path.display(),
                self.window
            );
            self.moved_out(&pending.old_path, pending.is_dir, table, registrar, sink)?;
        }
        Ok(())
    }

    /// Resolve every parked MOVED_FROM now, regardless of deadline.
    pub fn flush<B, S>(
        &mut self,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
        sink: &mut S,
    ) -> Result<()>
    where
        B: WatchBackend,
        S: EventSink + ?Sized,
    {
        for pending in self.pending.take_all() {
            self.moved_out(&pending.old_path, pending.is_dir, table, registrar, sink)?;
        }
        Ok(())
    }

    /// Drop watches on directories that no longer exist, then watch every
    /// directory under the root the table does not know about.
    pub fn rescan<B: WatchBackend>(
        &mut self,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
    ) -> Result<()> {
        let stale: Vec<WatchId> = table
            .iter()
            .filter(|(_, path)| !path.is_dir())
            .map(|(wd, _)| wd)
            .collect();
        for wd in &stale {
            registrar.remove(table, *wd);
            self.renamed.remove(wd);
        }
        self.stats.purged += stale.len() as u64;

        let root = self.root.clone();
        match registrar.add_tree(table, &root, self.walk) {
            Ok(added) => {
                info!(
                    "Rescan of {} dropped {} and added {added} watches",
                    root.display(),
                    stale.len()
                );
                Ok(())
            }
            Err(e) => recoverable(e),
        }
    }

    fn overflow<B, S>(
        &mut self,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
        sink: &mut S,
    ) -> Result<()>
    where
        B: WatchBackend,
        S: EventSink + ?Sized,
    {
        self.stats.overflows += 1;
        warn!(
            "Event queue overflowed, rescanning {}",
            self.root.display()
        );
        sink.send(WatchEvent::new(EventKind::Overflow, &self.root).with_dir(true))?;
        self.rescan(table, registrar)
    }

    fn moved_in<B, S>(
        &mut self,
        path: &Path,
        is_dir: bool,
        cookie: Option<u32>,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
        sink: &mut S,
    ) -> Result<()>
    where
        B: WatchBackend,
        S: EventSink + ?Sized,
    {
        let paired = cookie.and_then(|c| self.pending.take(c));
        if is_dir {
            self.flush_under(path, table, registrar, sink)?;
        }

        let Some(pending) = paired else {
            sink.send(WatchEvent::new(EventKind::MovedTo, path).with_dir(is_dir))?;
            if is_dir {
                self.watch_new_tree(path, table, registrar)?;
            }
            return Ok(());
        };

        sink.send(
            WatchEvent::new(EventKind::Renamed, path)
                .with_rename_from(&pending.old_path)
                .with_dir(is_dir),
        )?;
        if !is_dir {
            return Ok(());
        }

        self.stats.renames += 1;
        // Entries parked under the old path follow the directory they were
        // moved out of.
        self.pending.rename_under(&pending.old_path, path);
        match table.lookup_by_path(&pending.old_path) {
            Some(wd) => {
                let moved = table.rename_subtree(&pending.old_path, path);
                *self.renamed.entry(wd).or_default() += 1;
                debug!(
                    "Renamed {moved} watches from {} to {}",
                    pending.old_path.display(),
                    path.display()
                );
                self.prune_too_deep(path, table, registrar);
                Ok(())
            }
            None => self.watch_new_tree(path, table, registrar),
        }
    }

    /// Drop watches under `path` that a rename carried past `max_depth`.
    fn prune_too_deep<B: WatchBackend>(
        &mut self,
        path: &Path,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
    ) {
        let Some(max_depth) = self.walk.max_depth else {
            return;
        };
        let too_deep: Vec<WatchId> = table
            .subtree_paths(path)
            .iter()
            .filter(|p| self.depth_of(p) > max_depth)
            .filter_map(|p| table.lookup_by_path(p))
            .collect();
        for wd in &too_deep {
            registrar.remove(table, *wd);
            self.renamed.remove(wd);
        }
        if !too_deep.is_empty() {
            debug!(
                "Dropped {} watches deeper than {max_depth} under {}",
                too_deep.len(),
                path.display()
            );
            self.stats.purged += too_deep.len() as u64;
        }
    }

    /// Components between the root and `path`; paths outside the root are
    /// infinitely deep.
    fn depth_of(&self, path: &Path) -> usize {
        path.strip_prefix(&self.root)
            .map(|rest| rest.components().count())
            .unwrap_or(usize::MAX)
    }

    fn moved_out<B, S>(
        &mut self,
        old_path: &Path,
        is_dir: bool,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
        sink: &mut S,
    ) -> Result<()>
    where
        B: WatchBackend,
        S: EventSink + ?Sized,
    {
        sink.send(WatchEvent::new(EventKind::MovedFrom, old_path).with_dir(is_dir))?;
        if is_dir {
            self.purge(old_path, table, registrar);
        }
        Ok(())
    }

    fn moved_self<B: WatchBackend>(
        &mut self,
        wd: WatchId,
        path: &Path,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
    ) {
        if let Some(count) = self.renamed.get_mut(&wd) {
            *count -= 1;
            if *count == 0 {
                self.renamed.remove(&wd);
            }
            return;
        }
        if self.pending.refers_to(path) {
            debug!(
                "{} moved; waiting for its MOVED_TO",
                path.display()
            );
            return;
        }
        warn!(
            "{} moved out of reach, dropping its watches",
            path.display()
        );
        self.purge(path, table, registrar);
    }

    /// Resolve parked MOVED_FROMs at or under a path that is about to be
    /// watched again, so their later expiry cannot purge the new watches.
    fn flush_under<B, S>(
        &mut self,
        path: &Path,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
        sink: &mut S,
    ) -> Result<()>
    where
        B: WatchBackend,
        S: EventSink + ?Sized,
    {
        for pending in self.pending.take_under(path) {
            self.moved_out(&pending.old_path, pending.is_dir, table, registrar, sink)?;
        }
        Ok(())
    }

    fn watch_new_tree<B: WatchBackend>(
        &mut self,
        path: &Path,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
    ) -> Result<()> {
        let mut options = self.walk;
        if let Some(max_depth) = self.walk.max_depth {
            let depth = self.depth_of(path);
            if depth > max_depth {
                return Ok(());
            }
            options.max_depth = Some(max_depth - depth);
        }

        match registrar.add_tree(table, path, options) {
            Ok(added) => {
                debug!("Watching {added} new directories under {}", path.display());
                Ok(())
            }
            Err(e) => recoverable(e),
        }
    }

    fn purge<B: WatchBackend>(
        &mut self,
        path: &Path,
        table: &mut WatchTable,
        registrar: &mut Registrar<B>,
    ) {
        let removed = registrar.remove_subtree(table, path);
        for (wd, _) in &removed {
            self.renamed.remove(wd);
        }
        self.stats.purged += removed.len() as u64;
    }
}

/// Swallow per-directory failures, keep fatal ones.
fn recoverable(err: WatcherError) -> Result<()> {
    match err {
        WatcherError::Registration(e) if !e.is_fatal() => {
            warn!("Could not watch new directory: {e}");
            Ok(())
        }
        WatcherError::Traversal(e) => {
            debug!("New directory disappeared before it was walked: {e}");
            Ok(())
        }
        other => Err(other),
    }
}
