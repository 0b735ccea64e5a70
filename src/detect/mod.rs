//! Fingerprinting and format/encoding detection.
//!
//! Detection is the expensive step (it opens the file and reads its head), so
//! it only runs when the [`Fingerprint`] changed or the previous answer was
//! based on a header shorter than the probe size.

pub mod encoding;
pub mod fingerprint;
pub mod format;

pub use encoding::Encoding;
pub use fingerprint::Fingerprint;
pub use format::{FormatMatcher, HeaderPatternMatcher, LogFileFormat, MatcherChain, PlainTextMatcher};

use crate::reader::open_shared;
use crate::source::SourceError;
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Default number of header bytes handed to format matchers
pub const DEFAULT_PROBE_SIZE: usize = 512;

/// How trustworthy a detection is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Certainty {
    /// The full probe was available; repeat only when the fingerprint changes
    Sure,
    /// The file was shorter than the probe; repeat on every poll
    Uncertain,
}

/// Result of one detection
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub format: LogFileFormat,
    /// Encoding to read the file with
    pub encoding: Encoding,
    /// Encoding announced by a byte order mark, if any
    pub detected_encoding: Option<Encoding>,
    pub certainty: Certainty,
    pub fingerprint: Fingerprint,
}

/// Decides format and encoding of one file
pub struct FileFormatDetector {
    matcher: Arc<dyn FormatMatcher>,
    probe_size: usize,
    default_encoding: Encoding,
    last: Option<(Detection, u64)>,
}

impl FileFormatDetector {
    pub fn new(matcher: Arc<dyn FormatMatcher>, probe_size: usize, default_encoding: Encoding) -> Self {
        Self {
            matcher,
            probe_size: probe_size.max(1),
            default_encoding,
            last: None,
        }
    }

    /// Detect format and encoding of `path`.
    ///
    /// Encoding precedence: the format's own encoding, then the byte order
    /// mark, then the configured default.
    pub fn detect(&mut self, path: &Path) -> Result<Detection, SourceError> {
        let fingerprint = Fingerprint::of(path)?;
        if let Some((last, _)) = &self.last {
            if last.fingerprint == fingerprint && last.certainty == Certainty::Sure {
                debug!(path = %path.display(), "fingerprint unchanged, keeping detected format");
                return Ok(last.clone());
            }
        }

        let header = self.read_header(path)?;
        let certainty = if header.len() >= self.probe_size {
            Certainty::Sure
        } else {
            Certainty::Uncertain
        };
        let detected_encoding = Encoding::sniff(&header);
        let header_hash = xxh3_64(&header);

        let format = match &self.last {
            Some((last, hash)) if *hash == header_hash => last.format.clone(),
            _ => self.match_format(path, &header, detected_encoding),
        };
        let encoding = format
            .encoding
            .or(detected_encoding)
            .unwrap_or(self.default_encoding);

        let detection = Detection {
            format,
            encoding,
            detected_encoding,
            certainty,
            fingerprint,
        };
        debug!(
            path = %path.display(),
            format = %detection.format.name,
            encoding = %detection.encoding,
            ?certainty,
            "detected format"
        );
        self.last = Some((detection.clone(), header_hash));
        Ok(detection)
    }

    /// Forget the previous detection.
    pub fn reset(&mut self) {
        self.last = None;
    }

    fn read_header(&self, path: &Path) -> Result<Vec<u8>, SourceError> {
        let file = open_shared(path).map_err(|e| SourceError::from_io(path, e))?;
        let mut header = Vec::with_capacity(self.probe_size);
        file.take(self.probe_size as u64)
            .read_to_end(&mut header)
            .map_err(|e| SourceError::from_io(path, e))?;
        Ok(header)
    }

    fn match_format(&self, path: &Path, header: &[u8], encoding: Option<Encoding>) -> LogFileFormat {
        let matcher = &self.matcher;
        match catch_unwind(AssertUnwindSafe(|| matcher.try_match(path, header, encoding))) {
            Ok(Some(format)) => format,
            Ok(None) => LogFileFormat::plain_text(),
            Err(_) => {
                warn!(path = %path.display(), "format matcher panicked, treating file as plain text");
                LogFileFormat::plain_text()
            }
        }
    }
}
