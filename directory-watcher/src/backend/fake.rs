//! Scripted stand-in for the kernel, used by unit tests.
//!
//! Watches are keyed by path and only granted for paths that are real
//! directories on disk, so tests drive it with temp directories.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::WatchBackend;
use crate::event::{EventMask, RawEvent, WatchId};

const IDLE_WAIT: Duration = Duration::from_millis(5);

pub(crate) enum FakeRead {
    Events(Vec<RawEvent>),
    Bytes(Vec<u8>),
    Eof,
    Fail(i32),
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    next_wd: i32,
    watched: HashMap<PathBuf, WatchId>,
    reads: VecDeque<FakeRead>,
    pub(crate) added: Vec<(PathBuf, EventMask)>,
    pub(crate) removed: Vec<WatchId>,
    pub(crate) denied: HashSet<PathBuf>,
    pub(crate) limit: Option<usize>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            next_wd: 1,
            ..Self::default()
        }
    }

    pub(crate) fn push_events(&mut self, events: Vec<RawEvent>) {
        self.reads.push_back(FakeRead::Events(events));
    }

    pub(crate) fn push_read(&mut self, read: FakeRead) {
        self.reads.push_back(read);
    }

    pub(crate) fn wd_of(&self, path: &Path) -> Option<WatchId> {
        self.watched.get(path).copied()
    }

    /// Mirror an on-disk rename: the kernel keeps watches on inodes, not names.
    pub(crate) fn moved(&mut self, from: &Path, to: &Path) {
        let moved: Vec<_> = self
            .watched
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            if let (Some(wd), Ok(rest)) = (self.watched.remove(&old), old.strip_prefix(from)) {
                let new = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
                self.watched.insert(new, wd);
            }
        }
    }

    /// Mirror the kernel dropping a watch on its own (deletion, unmount).
    pub(crate) fn forget(&mut self, wd: WatchId) {
        self.watched.retain(|_, v| *v != wd);
    }
}

impl WatchBackend for FakeBackend {
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchId> {
        if self.denied.contains(path) {
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        if !path.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        self.added.push((path.to_path_buf(), mask));
        if let Some(wd) = self.watched.get(path) {
            return Ok(*wd);
        }
        if self.limit.is_some_and(|limit| self.watched.len() >= limit) {
            return Err(io::Error::from_raw_os_error(libc::ENOSPC));
        }
        let wd = WatchId::new(self.next_wd);
        self.next_wd += 1;
        self.watched.insert(path.to_path_buf(), wd);
        Ok(wd)
    }

    fn remove_watch(&mut self, wd: WatchId) -> io::Result<()> {
        let before = self.watched.len();
        self.watched.retain(|_, v| *v != wd);
        if self.watched.len() == before {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.removed.push(wd);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>> {
        let bytes = match self.reads.pop_front() {
            None => {
                // Stand in for the kernel's wait.
                std::thread::sleep(timeout.unwrap_or(IDLE_WAIT).min(IDLE_WAIT));
                return Ok(None);
            }
            Some(FakeRead::Eof) => return Ok(Some(0)),
            Some(FakeRead::Fail(errno)) => return Err(io::Error::from_raw_os_error(errno)),
            Some(FakeRead::Bytes(bytes)) => bytes,
            Some(FakeRead::Events(events)) => {
                let mut bytes = Vec::new();
                for event in &events {
                    event.encode(&mut bytes);
                }
                bytes
            }
        };
        assert!(bytes.len() <= buf.len(), "scripted read larger than buffer");
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(Some(bytes.len()))
    }
}
