//! The kernel notification capability the watcher consumes.

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::event::{EventMask, WatchId};

#[cfg(test)]
pub(crate) mod fake;
#[cfg(target_os = "linux")]
mod inotify;

#[cfg(target_os = "linux")]
pub use inotify::Inotify;

/// Register and unregister directory watches, and read raw record batches.
pub trait WatchBackend {
    /// Watch `path` for the events in `mask`.
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchId>;

    /// Drop a watch. Fails if the id is not (or no longer) valid.
    fn remove_watch(&mut self, wd: WatchId) -> io::Result<()>;

    /// Block until records are available or `timeout` elapses, then read as
    /// many whole records as fit into `buf`.
    ///
    /// Returns `Ok(None)` when the timeout elapsed or the wait was
    /// interrupted, and `Ok(Some(len))` with the number of bytes read
    /// otherwise. `None` for `timeout` waits indefinitely.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>>;
}

impl<B: WatchBackend + ?Sized> WatchBackend for Box<B> {
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> io::Result<WatchId> {
        (**self).add_watch(path, mask)
    }

    fn remove_watch(&mut self, wd: WatchId) -> io::Result<()> {
        (**self).remove_watch(wd)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>> {
        (**self).read(buf, timeout)
    }
}
