use super::Filter;
use crate::buffer::column::LOG_LEVEL;
use crate::buffer::{Column, LogEntry};
use crate::parse::Level;
use std::collections::HashSet;

/// Keeps entries whose level is one of a set
pub struct LevelFilter {
    levels: HashSet<Level>,
}

impl LevelFilter {
    pub fn new(levels: impl IntoIterator<Item = Level>) -> Self {
        Self {
            levels: levels.into_iter().collect(),
        }
    }

    /// `minimum` and every more severe level
    pub fn at_least(minimum: Level) -> Self {
        Self::new(Level::ALL.into_iter().filter(|l| *l >= minimum))
    }
}

impl Filter for LevelFilter {
    fn matches(&self, entry: &LogEntry<'_>) -> bool {
        self.levels.contains(&entry.level())
    }

    fn columns(&self) -> Vec<&'static Column> {
        vec![&LOG_LEVEL]
    }

    fn description(&self) -> String {
        let mut levels: Vec<Level> = self.levels.iter().copied().collect();
        levels.sort();
        let names: Vec<&str> = levels.iter().map(|l| l.name()).collect();
        format!("Level: {}", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{LogBuffer, LogBufferArray, Value};

    fn matches(filter: &LevelFilter, level: Level) -> bool {
        let mut buffer = LogBufferArray::new(&[&LOG_LEVEL], 1);
        buffer.set_value(&LOG_LEVEL, 0, Value::Level(level));
        filter.matches(&buffer.entry(0))
    }

    #[test]
    fn test_matches_listed_levels() {
        let filter = LevelFilter::new([Level::Error, Level::Fatal]);
        assert!(matches(&filter, Level::Error));
        assert!(!matches(&filter, Level::Info));
        assert!(!matches(&filter, Level::None));
        assert_eq!(filter.description(), "Level: error, fatal");
    }

    #[test]
    fn test_at_least() {
        let filter = LevelFilter::at_least(Level::Warning);
        assert!(matches(&filter, Level::Warning));
        assert!(matches(&filter, Level::Fatal));
        assert!(!matches(&filter, Level::Debug));
    }
}
