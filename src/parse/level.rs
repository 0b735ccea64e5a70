use std::fmt;
use std::str::FromStr;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    #[default]
    None,
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warning,
        Level::Error,
        Level::Fatal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Level::None => "none",
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            "none" => Ok(Level::None),
            other => Err(format!("unknown level '{}'", other)),
        }
    }
}

/// Only the head of a line is searched for a severity keyword.
const LEVEL_SCAN_LIMIT: usize = 80;

/// First-match-in-text severity detection with ANSI skip-in-place.
///
/// Scans left-to-right. At each word boundary, dispatches on the first byte
/// (case-folded via `| 0x20`). Returns the first severity keyword found.
pub fn detect_level(line: &str) -> Level {
    let bytes = line.as_bytes();
    let bytes = &bytes[..bytes.len().min(LEVEL_SCAN_LIMIT)];
    let len = bytes.len();
    let mut i = 0;
    let mut after_ansi = false;

    while i < len {
        let b = bytes[i];

        if b == 0x1B {
            i += 1;
            if i < len && bytes[i] == b'[' {
                i += 1;
                while i < len && !(0x40..=0x7E).contains(&bytes[i]) {
                    i += 1;
                }
                if i < len {
                    i += 1; // final byte, e.g. 'm'
                }
            }
            after_ansi = true;
            continue;
        }

        let at_boundary = after_ansi || i == 0 || !bytes[i - 1].is_ascii_alphabetic();
        after_ansi = false;
        if !at_boundary {
            i += 1;
            continue;
        }

        let found = match b | 0x20 {
            b'f' if eq_ci_word(bytes, i, b"fatal") => Some(Level::Fatal),
            b'e' if eq_ci_word(bytes, i, b"error") => Some(Level::Error),
            b'w' if eq_ci_word(bytes, i, b"warning") || eq_ci_word(bytes, i, b"warn") => {
                Some(Level::Warning)
            }
            b'i' if eq_ci_word(bytes, i, b"info") => Some(Level::Info),
            b'd' if eq_ci_word(bytes, i, b"debug") => Some(Level::Debug),
            b't' if eq_ci_word(bytes, i, b"trace") => Some(Level::Trace),
            _ => None,
        };
        if let Some(level) = found {
            return level;
        }

        i += 1;
    }

    Level::None
}

/// Case-insensitive keyword match at `pos` with word-boundary check after.
/// Needle must be lowercase ASCII.
#[inline]
fn eq_ci_word(bytes: &[u8], pos: usize, needle: &[u8]) -> bool {
    let end = pos + needle.len();
    if end > bytes.len() {
        return false;
    }
    if !bytes[pos..end]
        .iter()
        .zip(needle)
        .all(|(&b, &n)| (b | 0x20) == n)
    {
        return false;
    }
    end >= bytes.len() || !bytes[end].is_ascii_alphabetic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_uppercase_keyword() {
        assert_eq!(detect_level("2024-01-01 ERROR something broke"), Level::Error);
    }

    #[test]
    fn test_detects_lowercase_keyword() {
        assert_eq!(detect_level("2024-01-01 info started"), Level::Info);
    }

    #[test]
    fn test_warn_and_warning_are_the_same_level() {
        assert_eq!(detect_level("WARN disk usage high"), Level::Warning);
        assert_eq!(detect_level("WARNING disk usage high"), Level::Warning);
    }

    #[test]
    fn test_first_keyword_wins() {
        assert_eq!(detect_level("[debug] retrying after error"), Level::Debug);
    }

    #[test]
    fn test_keyword_must_be_a_whole_word() {
        assert_eq!(detect_level("errors=0 informational"), Level::None);
        assert_eq!(detect_level("tracer started"), Level::None);
    }

    #[test]
    fn test_skips_ansi_sequences() {
        assert_eq!(detect_level("\x1b[31mFATAL\x1b[0m out of memory"), Level::Fatal);
    }

    #[test]
    fn test_keyword_beyond_scan_limit_is_ignored() {
        let line = format!("{} error", "x".repeat(100));
        assert_eq!(detect_level(&line), Level::None);
    }

    #[test]
    fn test_parse_level_names() {
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("ERROR".parse::<Level>().unwrap(), Level::Error);
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn test_levels_are_ordered_by_severity() {
        assert!(Level::Error > Level::Warning);
        assert!(Level::Trace > Level::None);
    }
}
