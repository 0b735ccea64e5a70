use crate::source::SourceError;
use std::fs::{self, Metadata};
use std::path::Path;
use std::time::SystemTime;

/// Cheap identity of a file's state.
///
/// Equal fingerprints do not prove equal content, but a changed fingerprint
/// is the only reason to look at a file again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub size: u64,
}

impl Fingerprint {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            created: metadata.created().ok(),
            modified: metadata.modified().ok(),
            size: metadata.len(),
        }
    }

    pub fn of(path: &Path) -> Result<Self, SourceError> {
        let metadata = fs::metadata(path).map_err(|e| SourceError::from_io(path, e))?;
        Ok(Self::from_metadata(&metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EmptyReason;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_fingerprint_tracks_size() {
        let mut file = NamedTempFile::new().unwrap();
        let before = Fingerprint::of(file.path()).unwrap();
        assert_eq!(before.size, 0);

        file.write_all(b"hello\n").unwrap();
        file.flush().unwrap();

        let after = Fingerprint::of(file.path()).unwrap();
        assert_eq!(after.size, 6);
        assert_ne!(before, after);
    }

    #[test]
    fn test_unchanged_file_has_equal_fingerprint() {
        let file = NamedTempFile::new().unwrap();
        assert_eq!(
            Fingerprint::of(file.path()).unwrap(),
            Fingerprint::of(file.path()).unwrap()
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Fingerprint::of(&dir.path().join("gone.log")).unwrap_err();
        assert_eq!(err.empty_reason(), Some(EmptyReason::SourceDoesNotExist));
    }
}
