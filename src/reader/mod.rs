pub mod line_cache;
pub mod line_offsets;
pub mod request;
pub mod streaming;

pub use line_cache::LineCache;
pub use line_offsets::{LineScanner, ScanOutcome};
pub use request::{ReadRequest, RequestRows};
pub use streaming::{StreamingOptions, StreamingTextLogSource};

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Open `path` for reading without keeping other processes from writing,
/// renaming or deleting it.
#[cfg(windows)]
pub fn open_shared(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    // FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE
    OpenOptions::new().read(true).share_mode(0x7).open(path)
}

/// Open `path` for reading without keeping other processes from writing,
/// renaming or deleting it.
#[cfg(not(windows))]
pub fn open_shared(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}
