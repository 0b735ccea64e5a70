use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a source currently has no entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmptyReason {
    SourceDoesNotExist,
    SourceCannotBeAccessed,
}

impl std::fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmptyReason::SourceDoesNotExist => f.write_str("source does not exist"),
            EmptyReason::SourceCannotBeAccessed => f.write_str("source cannot be accessed"),
        }
    }
}

/// Failure to look at a source file
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{} does not exist", path.display())]
    DoesNotExist { path: PathBuf },

    #[error("{} cannot be accessed", path.display())]
    CannotBeAccessed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Anything else; retried on the next poll
    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SourceError {
    pub fn from_io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => SourceError::DoesNotExist { path },
            io::ErrorKind::PermissionDenied => SourceError::CannotBeAccessed { path, source: err },
            _ => SourceError::Io { path, source: err },
        }
    }

    /// The property to publish, `None` for transient errors
    pub fn empty_reason(&self) -> Option<EmptyReason> {
        match self {
            SourceError::DoesNotExist { .. } => Some(EmptyReason::SourceDoesNotExist),
            SourceError::CannotBeAccessed { .. } => Some(EmptyReason::SourceCannotBeAccessed),
            SourceError::Io { .. } => None,
        }
    }
}
