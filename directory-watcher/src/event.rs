//! Raw records from the watch capability and the resolved events handed to
//! the sink.

use std::ffi::OsString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque watch handle returned by the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchId(i32);

impl WatchId {
    /// Id the kernel puts on queue-overflow records.
    pub const OVERFLOW: WatchId = WatchId(-1);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd {}", self.0)
    }
}

bitflags! {
    /// Event bits, laid out exactly as the kernel's `IN_*` constants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const ACCESS = 0x0000_0001;
        const MODIFY = 0x0000_0002;
        const ATTRIB = 0x0000_0004;
        const CLOSE_WRITE = 0x0000_0008;
        const CLOSE_NOWRITE = 0x0000_0010;
        const OPEN = 0x0000_0020;
        const MOVED_FROM = 0x0000_0040;
        const MOVED_TO = 0x0000_0080;
        const CREATE = 0x0000_0100;
        const DELETE = 0x0000_0200;
        const DELETE_SELF = 0x0000_0400;
        const MOVE_SELF = 0x0000_0800;
        const UNMOUNT = 0x0000_2000;
        const Q_OVERFLOW = 0x0000_4000;
        const IGNORED = 0x0000_8000;
        const ONLYDIR = 0x0100_0000;
        const DONT_FOLLOW = 0x0200_0000;
        const ISDIR = 0x4000_0000;
    }
}

impl EventMask {
    /// The mask every directory watch is registered with.
    pub const WATCH: EventMask = EventMask::from_bits_retain(
        EventMask::ACCESS.bits()
            | EventMask::ATTRIB.bits()
            | EventMask::OPEN.bits()
            | EventMask::CLOSE_WRITE.bits()
            | EventMask::CLOSE_NOWRITE.bits()
            | EventMask::CREATE.bits()
            | EventMask::DELETE.bits()
            | EventMask::DELETE_SELF.bits()
            | EventMask::MODIFY.bits()
            | EventMask::MOVE_SELF.bits()
            | EventMask::MOVED_FROM.bits()
            | EventMask::MOVED_TO.bits(),
    );
}

/// Size of the fixed header that precedes every record's name.
pub const RECORD_HEADER_LEN: usize = 16;

/// Longest name the kernel attaches to a record, including its terminator.
pub const MAX_NAME_LEN: usize = 256;

/// One undecorated record from the capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub wd: WatchId,
    pub mask: EventMask,
    /// Correlation id for MOVED_FROM/MOVED_TO pairs.
    pub cookie: Option<u32>,
    /// Child entry name, absent when the record is about the watched directory.
    pub name: Option<OsString>,
}

impl RawEvent {
    pub fn new(wd: WatchId, mask: EventMask) -> Self {
        Self {
            wd,
            mask,
            cookie: None,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<OsString>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cookie(mut self, cookie: u32) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Whether the subject of the record is a directory.
    pub fn is_dir(&self) -> bool {
        self.mask.contains(EventMask::ISDIR)
    }

    /// Append this record in the kernel's wire layout, padding the name
    /// with NULs to a 4-byte boundary. Used by fakes and fuzzers.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let name = self.name.as_ref().map(|n| n.as_os_str().as_bytes()).unwrap_or_default();
        let padded = if name.is_empty() {
            0
        } else {
            (name.len() + 1).next_multiple_of(4)
        };

        out.extend_from_slice(&self.wd.get().to_ne_bytes());
        out.extend_from_slice(&self.mask.bits().to_ne_bytes());
        out.extend_from_slice(&self.cookie.unwrap_or(0).to_ne_bytes());
        out.extend_from_slice(&(padded as u32).to_ne_bytes());
        out.extend_from_slice(name);
        out.resize(out.len() + padded - name.len(), 0);
    }
}

/// Kind of a resolved event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Access,
    Attrib,
    Open,
    CloseWrite,
    CloseNoWrite,
    Create,
    Delete,
    DeleteSelf,
    Modify,
    MoveSelf,
    /// Moved out of the tree (no matching MOVED_TO arrived in time).
    MovedFrom,
    /// Moved into the tree from outside.
    MovedTo,
    /// Moved within the tree; carries the old path.
    Renamed,
    /// The filesystem holding the path was unmounted.
    Unmount,
    /// The kernel queue overflowed and events were lost.
    Overflow,
}

/// Plain event bits paired with the kind they resolve to. Moves are
/// resolved by the resynchronizer and are not listed here.
const SIMPLE_KINDS: [(EventMask, EventKind); 10] = [
    (EventMask::ACCESS, EventKind::Access),
    (EventMask::ATTRIB, EventKind::Attrib),
    (EventMask::OPEN, EventKind::Open),
    (EventMask::CLOSE_WRITE, EventKind::CloseWrite),
    (EventMask::CLOSE_NOWRITE, EventKind::CloseNoWrite),
    (EventMask::CREATE, EventKind::Create),
    (EventMask::DELETE, EventKind::Delete),
    (EventMask::DELETE_SELF, EventKind::DeleteSelf),
    (EventMask::MODIFY, EventKind::Modify),
    (EventMask::UNMOUNT, EventKind::Unmount),
];

impl EventKind {
    /// Kinds for every non-move bit set in `mask`, in kernel bit order.
    pub fn simple_kinds(mask: EventMask) -> impl Iterator<Item = EventKind> {
        SIMPLE_KINDS
            .into_iter()
            .filter(move |(bit, _)| mask.contains(*bit))
            .map(|(_, kind)| kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "ACCESS",
            Self::Attrib => "ATTRIB",
            Self::Open => "OPEN",
            Self::CloseWrite => "CLOSE_WRITE",
            Self::CloseNoWrite => "CLOSE_NOWRITE",
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
            Self::DeleteSelf => "DELETE_SELF",
            Self::Modify => "MODIFY",
            Self::MoveSelf => "MOVE_SELF",
            Self::MovedFrom => "MOVED_FROM",
            Self::MovedTo => "MOVED_TO",
            Self::Renamed => "RENAMED",
            Self::Unmount => "UNMOUNT",
            Self::Overflow => "OVERFLOW",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved event, as delivered to the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    /// The kind of event.
    pub kind: EventKind,

    /// Absolute path of the affected entry.
    pub path: PathBuf,

    /// Previous path, for [`EventKind::Renamed`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename_from: Option<PathBuf>,

    /// Whether the entry is a directory.
    pub is_dir: bool,

    /// When the event was resolved.
    pub timestamp: DateTime<Utc>,
}

impl WatchEvent {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            rename_from: None,
            is_dir: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_rename_from(mut self, from: impl Into<PathBuf>) -> Self {
        self.rename_from = Some(from.into());
        self
    }

    pub fn with_dir(mut self, is_dir: bool) -> Self {
        self.is_dir = is_dir;
        self
    }
}
