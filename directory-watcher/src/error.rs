//! Error types for the directory watcher.
//!
//! Errors are split by where they arise. Only [`WatcherError::Init`],
//! fatal [`RegistrationError`]s and [`ReadError`]s stop a session; the rest
//! are logged and the session carries on.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::event::WatchId;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the directory watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The watch capability could not be initialized.
    #[error("failed to initialize watch capability: {0}")]
    Init(#[source] io::Error),

    /// The root could not be traversed.
    #[error(transparent)]
    Traversal(#[from] TraversalError),

    /// A watch could not be registered.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The event stream failed.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Channel send error.
    #[error("channel error: failed to send event")]
    ChannelSend,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Failure to walk a directory tree.
#[derive(Error, Debug)]
pub enum TraversalError {
    /// The root does not exist.
    #[error("directory not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The root exists but is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Any other failure while reading the root.
    #[error("cannot traverse {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure to add a watch.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// The directory disappeared between discovery and registration.
    #[error("directory vanished before it could be watched: {}", .0.display())]
    Vanished(PathBuf),

    /// Permission denied.
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// The per-user watch limit is exhausted.
    #[error("watch limit exceeded while watching {}", .0.display())]
    LimitExceeded(PathBuf),

    /// Any other failure from the capability.
    #[error("cannot watch {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RegistrationError {
    /// Classify an error returned by the capability for `path`.
    pub fn from_io(path: PathBuf, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ENOENT) | Some(libc::ENOTDIR) => Self::Vanished(path),
            Some(libc::EACCES) | Some(libc::EPERM) => Self::PermissionDenied(path),
            Some(libc::ENOSPC) => Self::LimitExceeded(path),
            _ => match err.kind() {
                io::ErrorKind::NotFound => Self::Vanished(path),
                io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
                _ => Self::Io { path, source: err },
            },
        }
    }

    /// Whether the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LimitExceeded(_) | Self::Io { .. })
    }

    /// The path that failed to register.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Vanished(path)
            | Self::PermissionDenied(path)
            | Self::LimitExceeded(path)
            | Self::Io { path, .. } => path,
        }
    }
}

/// Failure of the event stream. Always fatal.
#[derive(Error, Debug)]
pub enum ReadError {
    /// The read call failed.
    #[error("failed to read events: {0}")]
    Io(#[source] io::Error),

    /// The read returned zero bytes, which a blocking stream never does.
    #[error("event stream returned a zero-length read")]
    EndOfStream,

    /// The buffer did not hold well-formed records.
    #[error("malformed event buffer: {0}")]
    Malformed(#[from] DecodeError),
}

/// A record in a read buffer that failed bounds checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes remain than a record header needs.
    #[error("truncated record header at offset {offset}: {remaining} bytes remain")]
    TruncatedHeader { offset: usize, remaining: usize },

    /// The header's name length runs past the end of the buffer.
    #[error("record name at offset {offset} claims {len} bytes but only {remaining} remain")]
    NameOverrun {
        offset: usize,
        len: usize,
        remaining: usize,
    },
}

/// An event could not be tied back to a watched path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The watch id is not in the table (late or duplicate event).
    #[error("no watched directory for {0}")]
    UnknownWatch(WatchId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_registration_error_classification() {
        let path = PathBuf::from("/w/a");

        let vanished =
            RegistrationError::from_io(path.clone(), io::Error::from_raw_os_error(libc::ENOENT));
        assert!(matches!(vanished, RegistrationError::Vanished(_)));
        assert!(!vanished.is_fatal());

        let not_dir =
            RegistrationError::from_io(path.clone(), io::Error::from_raw_os_error(libc::ENOTDIR));
        assert!(matches!(not_dir, RegistrationError::Vanished(_)));

        let denied =
            RegistrationError::from_io(path.clone(), io::Error::from_raw_os_error(libc::EACCES));
        assert!(matches!(denied, RegistrationError::PermissionDenied(_)));
        assert!(!denied.is_fatal());

        let limit =
            RegistrationError::from_io(path.clone(), io::Error::from_raw_os_error(libc::ENOSPC));
        assert!(matches!(limit, RegistrationError::LimitExceeded(_)));
        assert!(limit.is_fatal());

        let nomem =
            RegistrationError::from_io(path.clone(), io::Error::from_raw_os_error(libc::ENOMEM));
        assert!(nomem.is_fatal());
        assert_eq!(nomem.path(), Path::new("/w/a"));
    }

    #[test]
    fn test_error_messages() {
        let err = WatcherError::from(TraversalError::NotFound(PathBuf::from("/nope")));
        assert_eq!(err.to_string(), "directory not found: /nope");

        let err = ResolutionError::UnknownWatch(WatchId::new(7));
        assert_eq!(err.to_string(), "no watched directory for wd 7");
    }
}
