use super::Filter;
use crate::buffer::LogEntry;

/// Substring match on the raw content (case-insensitive unless asked)
pub struct SubstringFilter {
    pattern: String,
    case_sensitive: bool,
}

impl SubstringFilter {
    pub fn new(pattern: &str, case_sensitive: bool) -> Self {
        Self {
            pattern: if case_sensitive {
                pattern.to_string()
            } else {
                pattern.to_lowercase()
            },
            case_sensitive,
        }
    }
}

impl Filter for SubstringFilter {
    fn matches(&self, entry: &LogEntry<'_>) -> bool {
        let line = entry.raw_content();
        if self.case_sensitive {
            line.contains(&self.pattern)
        } else if line.is_ascii() && self.pattern.is_ascii() {
            memchr::memmem::find(line.to_ascii_lowercase().as_bytes(), self.pattern.as_bytes()).is_some()
        } else {
            line.to_lowercase().contains(&self.pattern)
        }
    }

    fn description(&self) -> String {
        format!(
            "String: {} ({})",
            self.pattern,
            if self.case_sensitive { "case-sensitive" } else { "case-insensitive" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::column::RAW_CONTENT;
    use crate::buffer::{LogBuffer, LogBufferArray, Value};

    fn matches(filter: &SubstringFilter, raw: &str) -> bool {
        let mut buffer = LogBufferArray::new(&[&RAW_CONTENT], 1);
        buffer.set_value(&RAW_CONTENT, 0, Value::Text(raw.to_string()));
        filter.matches(&buffer.entry(0))
    }

    #[test]
    fn test_case_insensitive_by_default() {
        let filter = SubstringFilter::new("error", false);
        assert!(matches(&filter, "ERROR: disk full"));
        assert!(matches(&filter, "an Error happened"));
        assert!(!matches(&filter, "all good"));
    }

    #[test]
    fn test_case_sensitive() {
        let filter = SubstringFilter::new("Error", true);
        assert!(matches(&filter, "an Error happened"));
        assert!(!matches(&filter, "ERROR: disk full"));
    }

    #[test]
    fn test_non_ascii_content() {
        let filter = SubstringFilter::new("ÉCHEC", false);
        assert!(matches(&filter, "tâche: échec total"));
    }

    #[test]
    fn test_missing_content_only_matches_empty_pattern() {
        let filter = SubstringFilter::new("x", false);
        let buffer = LogBufferArray::new(&[], 1);
        assert!(!filter.matches(&buffer.entry(0)));
        assert!(SubstringFilter::new("", false).matches(&buffer.entry(0)));
    }
}
