use super::Filter;
use crate::buffer::LogEntry;
use regex::{Regex, RegexBuilder};

/// Regex-based filter on the raw content
pub struct RegexFilter {
    regex: Regex,
}

impl RegexFilter {
    pub fn new(pattern: &str, case_sensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()?;
        Ok(Self { regex })
    }
}

impl Filter for RegexFilter {
    fn matches(&self, entry: &LogEntry<'_>) -> bool {
        self.regex.is_match(entry.raw_content())
    }

    fn description(&self) -> String {
        format!("Regex: {}", self.regex.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::column::RAW_CONTENT;
    use crate::buffer::{LogBuffer, LogBufferArray, Value};

    fn matches(filter: &RegexFilter, raw: &str) -> bool {
        let mut buffer = LogBufferArray::new(&[&RAW_CONTENT], 1);
        buffer.set_value(&RAW_CONTENT, 0, Value::Text(raw.to_string()));
        filter.matches(&buffer.entry(0))
    }

    #[test]
    fn test_pattern_matches() {
        let filter = RegexFilter::new(r"status=5\d\d", true).unwrap();
        assert!(matches(&filter, "GET /api status=503"));
        assert!(!matches(&filter, "GET /api status=200"));
    }

    #[test]
    fn test_case_insensitive() {
        let filter = RegexFilter::new("^warn", false).unwrap();
        assert!(matches(&filter, "WARN low memory"));
        assert!(!matches(&RegexFilter::new("^warn", true).unwrap(), "WARN low memory"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(RegexFilter::new("(unclosed", true).is_err());
    }
}
