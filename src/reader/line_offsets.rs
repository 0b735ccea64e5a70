//! Incremental discovery of line start offsets.

use crate::cancel::CancelToken;
use crate::detect::Encoding;
use memchr::{memchr_iter, memmem};
use std::io::{self, Read, Seek, SeekFrom};

/// Most bytes a single scan pass reads before yielding
pub const SCAN_BUDGET: u64 = 4 * 1024 * 1024;

/// Offsets just past every newline in `bytes`.
///
/// `bytes` must start on a code unit boundary; matches that are not aligned
/// to the unit width belong to other characters and are skipped.
pub fn line_ends(bytes: &[u8], encoding: Encoding) -> Vec<usize> {
    let width = encoding.unit_width();
    if width == 1 {
        return memchr_iter(b'\n', bytes).map(|p| p + 1).collect();
    }
    memmem::find_iter(bytes, encoding.newline())
        .filter(|p| p % width == 0)
        .map(|p| p + width)
        .collect()
}

/// Result of one scan pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Starts of lines seen for the first time, in file order
    pub new_lines: Vec<u64>,
    /// The last line was already indexed but gained bytes
    pub tail_changed: bool,
    /// Everything up to the file size has been looked at
    pub complete: bool,
}

/// Scanner state carried between passes over a growing file.
///
/// A line is recorded as soon as its first byte exists, even before its
/// terminator has been written. Such an open line is reported as
/// `tail_changed` when later passes extend it.
#[derive(Debug)]
pub struct LineScanner {
    encoding: Encoding,
    /// Where the next line starts (just past the last newline)
    next_line_start: u64,
    /// End of the bytes seen so far
    scanned_to: u64,
    /// A row exists for the bytes after `next_line_start`
    open_line: bool,
    preamble_checked: bool,
}

impl LineScanner {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            next_line_start: 0,
            scanned_to: 0,
            open_line: false,
            preamble_checked: false,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn scanned_to(&self) -> u64 {
        self.scanned_to
    }

    pub fn has_open_line(&self) -> bool {
        self.open_line
    }

    /// Start over from the beginning of the file.
    pub fn reset(&mut self) {
        *self = Self::new(self.encoding);
    }

    /// Look at up to `budget` bytes not seen yet, of a file `size` bytes long.
    ///
    /// Resumes inside the last line: bytes between its start and
    /// `scanned_to` are known to hold no newline and are not read again.
    pub fn scan<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        size: u64,
        budget: u64,
        cancel: &CancelToken,
    ) -> io::Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();

        if !self.preamble_checked {
            let preamble = self.encoding.preamble();
            let mut head = vec![0u8; preamble.len().min(size as usize)];
            reader.seek(SeekFrom::Start(0))?;
            reader.read_exact(&mut head)?;
            if !preamble.is_empty() && preamble.starts_with(&head) {
                if (head.len()) < preamble.len() {
                    // Only part of the byte order mark has been written yet.
                    outcome.complete = true;
                    return Ok(outcome);
                }
                self.next_line_start = preamble.len() as u64;
                self.scanned_to = self.next_line_start;
            }
            self.preamble_checked = true;
        }

        if self.scanned_to >= size {
            outcome.complete = true;
            return Ok(outcome);
        }

        let width = self.encoding.unit_width() as u64;
        let seen = self.scanned_to - self.next_line_start;
        let scan_from = self.next_line_start + seen / width * width;
        let end = size.min(scan_from.saturating_add(budget.max(width)));

        reader.seek(SeekFrom::Start(scan_from))?;
        let mut bytes = Vec::with_capacity((end - scan_from) as usize);
        reader.by_ref().take(end - scan_from).read_to_end(&mut bytes)?;
        let end = scan_from + bytes.len() as u64;

        for line_end in line_ends(&bytes, self.encoding) {
            if cancel.is_cancelled() {
                break;
            }
            if self.open_line {
                outcome.tail_changed = true;
                self.open_line = false;
            } else {
                outcome.new_lines.push(self.next_line_start);
            }
            self.next_line_start = scan_from + line_end as u64;
        }
        if cancel.is_cancelled() {
            // Nothing past the last handled line counts as scanned.
            self.scanned_to = self.next_line_start;
            return Ok(outcome);
        }

        outcome.complete = end >= size;
        if end > self.next_line_start && outcome.complete {
            if self.open_line {
                outcome.tail_changed |= end > self.scanned_to;
            } else {
                outcome.new_lines.push(self.next_line_start);
                self.open_line = true;
            }
        }
        self.scanned_to = end;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn scan_all(scanner: &mut LineScanner, data: &[u8]) -> ScanOutcome {
        let mut cursor = Cursor::new(data);
        scanner
            .scan(&mut cursor, data.len() as u64, SCAN_BUDGET, &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn test_line_ends_utf8() {
        assert_eq!(line_ends(b"a\nbb\r\nc", Encoding::Utf8), vec![2, 6]);
    }

    #[test]
    fn test_line_ends_utf16_ignores_misaligned_bytes() {
        // U+0A0A is encoded as 0A 0A and must not count as a newline.
        let bytes = [0x0A, 0x0A, 0x0A, 0x00, 0x41, 0x00];
        assert_eq!(line_ends(&bytes, Encoding::Utf16Le), vec![4]);
    }

    #[test]
    fn test_empty_file_has_no_lines() {
        let mut scanner = LineScanner::new(Encoding::Utf8);
        let outcome = scan_all(&mut scanner, b"");
        assert!(outcome.new_lines.is_empty());
        assert!(outcome.complete);
    }

    #[test]
    fn test_records_every_line_start() {
        let mut scanner = LineScanner::new(Encoding::Utf8);
        let outcome = scan_all(&mut scanner, b"one\ntwo\nthree\n");
        assert_eq!(outcome.new_lines, vec![0, 4, 8]);
        assert!(!outcome.tail_changed);
        assert!(!scanner.has_open_line());
    }

    #[test]
    fn test_unterminated_line_is_recorded_then_extended() {
        let mut scanner = LineScanner::new(Encoding::Utf8);
        let first = scan_all(&mut scanner, b"A\r\nB\r\nC");
        assert_eq!(first.new_lines, vec![0, 3, 6]);
        assert!(scanner.has_open_line());

        let second = scan_all(&mut scanner, b"A\r\nB\r\nCC");
        assert!(second.new_lines.is_empty());
        assert!(second.tail_changed);

        let third = scan_all(&mut scanner, b"A\r\nB\r\nCC\nD\n");
        assert_eq!(third.new_lines, vec![9]);
        assert!(third.tail_changed);
    }

    #[test]
    fn test_terminator_appended_to_new_line_is_new_line() {
        let mut scanner = LineScanner::new(Encoding::Utf8);
        scan_all(&mut scanner, b"A\n");
        let outcome = scan_all(&mut scanner, b"A\nB\n");
        assert_eq!(outcome.new_lines, vec![2]);
        assert!(!outcome.tail_changed);
    }

    #[test]
    fn test_byte_order_mark_is_skipped() {
        let mut scanner = LineScanner::new(Encoding::Utf8);
        let outcome = scan_all(&mut scanner, b"\xEF\xBB\xBFfirst\nsecond");
        assert_eq!(outcome.new_lines, vec![3, 9]);
    }

    #[test]
    fn test_partial_byte_order_mark_waits() {
        let mut scanner = LineScanner::new(Encoding::Utf8);
        let outcome = scan_all(&mut scanner, b"\xEF\xBB");
        assert!(outcome.new_lines.is_empty());

        let outcome = scan_all(&mut scanner, b"\xEF\xBB\xBFx\n");
        assert_eq!(outcome.new_lines, vec![3]);
    }

    #[test]
    fn test_utf16_lines() {
        let mut data = vec![0xFF, 0xFE];
        for unit in "ab\ncd\n".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        let mut scanner = LineScanner::new(Encoding::Utf16Le);
        let outcome = scan_all(&mut scanner, &data);
        assert_eq!(outcome.new_lines, vec![2, 8]);
    }

    #[test]
    fn test_budget_splits_work_without_partial_rows() {
        let data = b"0123456789\nabc\n";
        let mut scanner = LineScanner::new(Encoding::Utf8);
        let mut cursor = Cursor::new(&data[..]);
        let cancel = CancelToken::new();

        let first = scanner.scan(&mut cursor, data.len() as u64, 5, &cancel).unwrap();
        assert!(first.new_lines.is_empty());
        assert!(!first.complete);

        let mut lines = Vec::new();
        loop {
            let outcome = scanner.scan(&mut cursor, data.len() as u64, 5, &cancel).unwrap();
            assert!(!outcome.tail_changed);
            lines.extend(outcome.new_lines);
            if outcome.complete {
                break;
            }
        }
        assert_eq!(lines, vec![0, 11]);
    }

    #[test]
    fn test_cancelled_scan_records_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut scanner = LineScanner::new(Encoding::Utf8);
        let data = b"a\nb\n";
        let outcome = scanner
            .scan(&mut Cursor::new(&data[..]), data.len() as u64, SCAN_BUDGET, &cancel)
            .unwrap();
        assert!(outcome.new_lines.is_empty());
        assert_eq!(scanner.scanned_to(), 0);
    }
}
