use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;

/// Only the head of a line is searched for a timestamp.
const TIMESTAMP_SCAN_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    DateTime,
    /// Time of day only; the date is 1970-01-01
    TimeOfDay,
}

/// One timestamp layout in `chrono` strftime syntax
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    pattern: String,
    kind: Kind,
}

impl TimestampFormat {
    pub fn date_time(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            kind: Kind::DateTime,
        }
    }

    pub fn time_of_day(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            kind: Kind::TimeOfDay,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Parse a timestamp at the very start of `s`; trailing text is ignored.
    fn parse_prefix(&self, s: &str) -> Option<NaiveDateTime> {
        match self.kind {
            Kind::DateTime => NaiveDateTime::parse_and_remainder(s, &self.pattern)
                .ok()
                .map(|(timestamp, _)| timestamp),
            Kind::TimeOfDay => {
                let (time, _) = NaiveTime::parse_and_remainder(s, &self.pattern).ok()?;
                NaiveDate::from_ymd_opt(1970, 1, 1).map(|date| date.and_time(time))
            }
        }
    }
}

/// Layouts tried in order; the first that matches anywhere in a line wins.
pub fn default_formats() -> Vec<TimestampFormat> {
    vec![
        TimestampFormat::date_time("%Y-%m-%d %H:%M:%S,%3f"),
        TimestampFormat::date_time("%Y-%m-%d %H:%M:%S:%3f"),
        TimestampFormat::date_time("%Y-%m-%d %H:%M:%S%.f"),
        TimestampFormat::date_time("%Y-%m-%dT%H:%M:%S%.f"),
        TimestampFormat::date_time("%d/%m/%Y %H:%M:%S:%3f"),
        TimestampFormat::date_time("%Y %b %d %H:%M:%S%.f"),
        TimestampFormat::date_time("%Y-%m-%d %H-%M-%S%.f"),
        TimestampFormat::date_time("%d/%b/%Y:%H:%M:%S"),
        TimestampFormat::date_time("%a %b %d %H:%M:%S%.f %Y"),
        TimestampFormat::time_of_day("%H:%M:%S%.f"),
    ]
}

/// Finds timestamps in free text.
///
/// The first successful search remembers the layout and character position;
/// later lines try that spot first and fall back to a full search.
#[derive(Debug)]
pub struct TimestampParser {
    formats: Vec<TimestampFormat>,
    /// (byte position, index into `formats`)
    remembered: Mutex<Option<(usize, usize)>>,
}

impl TimestampParser {
    pub fn new() -> Self {
        Self::with_formats(default_formats())
    }

    pub fn with_formats(formats: Vec<TimestampFormat>) -> Self {
        Self {
            formats,
            remembered: Mutex::new(None),
        }
    }

    pub fn formats(&self) -> &[TimestampFormat] {
        &self.formats
    }

    pub fn parse(&self, line: &str) -> Option<NaiveDateTime> {
        if let Some((position, format)) = *self.remembered.lock() {
            if let Some(timestamp) = line
                .get(position..)
                .filter(|_| is_word_start(line, position))
                .and_then(|rest| self.formats[format].parse_prefix(rest))
            {
                return Some(timestamp);
            }
        }

        let head = head_of(line);
        if !head.bytes().any(|b| b.is_ascii_digit()) {
            return None;
        }
        let candidates = candidate_positions(head);
        for (format_index, format) in self.formats.iter().enumerate() {
            for &position in &candidates {
                if let Some(timestamp) = format.parse_prefix(&line[position..]) {
                    *self.remembered.lock() = Some((position, format_index));
                    return Some(timestamp);
                }
            }
        }
        None
    }
}

impl Default for TimestampParser {
    fn default() -> Self {
        Self::new()
    }
}

fn head_of(line: &str) -> &str {
    if line.len() <= TIMESTAMP_SCAN_LIMIT {
        return line;
    }
    let mut end = TIMESTAMP_SCAN_LIMIT;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// Layouts parse short numbers too (`%Y` takes "24"), so a timestamp may
/// only start where a word starts.
fn is_word_start(line: &str, position: usize) -> bool {
    line[..position]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_ascii_alphanumeric())
}

/// Starts of words that begin with a digit or a letter
fn candidate_positions(head: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut previous: Option<char> = None;
    for (i, c) in head.char_indices() {
        let at_word_start = previous.map_or(true, |p| !p.is_ascii_alphanumeric());
        if at_word_start && c.is_ascii_alphanumeric() {
            positions.push(i);
        }
        previous = Some(c);
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_milli_opt(h, mi, s, ms)
            .unwrap()
    }

    #[test]
    fn test_comma_milliseconds() {
        let parser = TimestampParser::new();
        assert_eq!(
            parser.parse("2017-03-24 11:45:21,022 INFO started"),
            Some(at(2017, 3, 24, 11, 45, 21, 22))
        );
    }

    #[test]
    fn test_iso_with_fraction_and_zone() {
        let parser = TimestampParser::new();
        assert_eq!(
            parser.parse("2024-01-15T10:30:00.123Z level=info"),
            Some(at(2024, 1, 15, 10, 30, 0, 123))
        );
    }

    #[test]
    fn test_timestamp_after_prefix() {
        let parser = TimestampParser::new();
        assert_eq!(
            parser.parse("[worker-3] 2024-01-15 10:30:00 job done"),
            Some(at(2024, 1, 15, 10, 30, 0, 0))
        );
    }

    #[test]
    fn test_apache_layout() {
        let parser = TimestampParser::new();
        assert_eq!(
            parser.parse(r#"127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET / HTTP/1.0""#),
            Some(at(2000, 10, 10, 13, 55, 36, 0))
        );
    }

    #[test]
    fn test_day_month_year_layout() {
        let parser = TimestampParser::new();
        assert_eq!(
            parser.parse("24/03/2017 11:45:21:022 message"),
            Some(at(2017, 3, 24, 11, 45, 21, 22))
        );
    }

    #[test]
    fn test_time_of_day_only() {
        let parser = TimestampParser::new();
        assert_eq!(
            parser.parse("10:00:02 tick"),
            Some(at(1970, 1, 1, 10, 0, 2, 0))
        );
    }

    #[test]
    fn test_no_timestamp() {
        let parser = TimestampParser::new();
        assert_eq!(parser.parse("    at com.example.Foo.bar(Foo.java:42)"), None);
        assert_eq!(parser.parse("no digits at all"), None);
        assert_eq!(parser.parse(""), None);
    }

    #[test]
    fn test_remembered_position_is_reused_and_falls_back() {
        let parser = TimestampParser::new();
        parser.parse("A 2024-01-01 00:00:00 first").unwrap();
        assert_eq!(
            parser.parse("B 2024-01-01 00:00:05 second"),
            Some(at(2024, 1, 1, 0, 0, 5, 0))
        );
        assert_eq!(
            parser.parse("2024-01-01 00:00:09 moved"),
            Some(at(2024, 1, 1, 0, 0, 9, 0))
        );
    }

    #[test]
    fn test_timestamp_beyond_scan_limit_is_ignored() {
        let parser = TimestampParser::new();
        let line = format!("{} 2024-01-01 00:00:00", "x".repeat(250));
        assert_eq!(parser.parse(&line), None);
    }

    #[test]
    fn test_multibyte_prefix_does_not_panic() {
        let parser = TimestampParser::new();
        let line = format!("{}2024-01-01 00:00:00", "é".repeat(150));
        assert_eq!(parser.parse(&line), None);
    }
}
