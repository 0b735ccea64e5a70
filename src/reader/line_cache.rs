use lru::LruCache;
use std::collections::VecDeque;
use std::num::NonZeroUsize;

/// Default cache capacity (number of lines)
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Invalidations remembered for [`LineCache::stale_from`]
const HISTORY_LENGTH: usize = 64;

/// LRU cache of decoded line content, keyed by row index
///
/// Lets cache-only queries (a UI thread that must not block) see lines a
/// previous read already pulled from disk. The last line of a file may
/// still be missing its terminator; it is kept apart from the LRU in the
/// open-line slot until the scan sees it grow.
///
/// Every invalidation bumps a generation. A reader notes the generation
/// before it reads and asks [`LineCache::stale_from`] afterwards which of
/// its rows changed in between.
pub struct LineCache {
    cache: LruCache<usize, String>,
    open_line: Option<(usize, String)>,
    generation: u64,
    /// (generation after the bump, first invalidated row), oldest first
    history: VecDeque<(u64, usize)>,
}

impl LineCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            open_line: None,
            generation: 0,
            history: VecDeque::new(),
        }
    }

    /// Get a line and mark it as recently used
    pub fn get(&mut self, row: usize) -> Option<&str> {
        if self.cache.contains(&row) {
            return self.cache.get(&row).map(|s| s.as_str());
        }
        self.open_line
            .as_ref()
            .filter(|(open_row, _)| *open_row == row)
            .map(|(_, content)| content.as_str())
    }

    pub fn contains(&self, row: usize) -> bool {
        self.cache.contains(&row) || self.open_line.as_ref().is_some_and(|(open_row, _)| *open_row == row)
    }

    /// Store a terminated line.
    pub fn put(&mut self, row: usize, content: String) {
        if self.open_line.as_ref().is_some_and(|(open_row, _)| *open_row == row) {
            self.open_line = None;
        }
        self.cache.put(row, content);
    }

    /// Store the unterminated last line, replacing any previous one.
    pub fn put_open(&mut self, row: usize, content: String) {
        self.cache.pop(&row);
        self.open_line = Some((row, content));
    }

    /// Drop every line from `first_row` on.
    pub fn invalidate_from(&mut self, first_row: usize) {
        let stale: Vec<usize> = self
            .cache
            .iter()
            .filter(|(row, _)| **row >= first_row)
            .map(|(row, _)| *row)
            .collect();

        for row in stale {
            self.cache.pop(&row);
        }
        if self.open_line.as_ref().is_some_and(|(row, _)| *row >= first_row) {
            self.open_line = None;
        }
        self.record(first_row);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.open_line = None;
        self.record(0);
    }

    fn record(&mut self, first_row: usize) {
        self.generation += 1;
        if self.history.len() == HISTORY_LENGTH {
            self.history.pop_front();
        }
        self.history.push_back((self.generation, first_row));
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// First row invalidated after `generation`, `None` if nothing was.
    pub fn stale_from(&self, generation: u64) -> Option<usize> {
        if generation >= self.generation {
            return None;
        }
        match self.history.front() {
            // Older than what is remembered: assume everything changed
            Some(&(oldest, _)) if oldest > generation + 1 => Some(0),
            None => Some(0),
            _ => self
                .history
                .iter()
                .filter(|(bumped, _)| *bumped > generation)
                .map(|(_, row)| *row)
                .min(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len() + usize::from(self.open_line.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

impl Default for LineCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let mut cache = LineCache::new(10);
        cache.put(3, "three".to_string());
        assert_eq!(cache.get(3), Some("three"));
        assert_eq!(cache.get(4), None);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let mut cache = LineCache::new(2);
        cache.put(0, "a".to_string());
        cache.put(1, "b".to_string());
        cache.get(0);
        cache.put(2, "c".to_string());

        assert!(cache.contains(0));
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
    }

    #[test]
    fn test_invalidate_from() {
        let mut cache = LineCache::new(10);
        for row in 0..5 {
            cache.put(row, format!("line {}", row));
        }
        cache.invalidate_from(3);

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(2));
        assert!(!cache.contains(3));
        assert!(!cache.contains(4));
    }

    #[test]
    fn test_open_line_is_served_until_invalidated() {
        let mut cache = LineCache::new(10);
        cache.put(0, "A".to_string());
        cache.put_open(1, "B".to_string());
        assert_eq!(cache.get(1), Some("B"));
        assert_eq!(cache.len(), 2);

        cache.invalidate_from(1);
        assert_eq!(cache.get(1), None);
        assert_eq!(cache.get(0), Some("A"));
    }

    #[test]
    fn test_terminated_line_replaces_open_line() {
        let mut cache = LineCache::new(10);
        cache.put_open(2, "C".to_string());
        cache.put(2, "CD".to_string());
        assert_eq!(cache.get(2), Some("CD"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stale_from_reports_lowest_invalidated_row() {
        let mut cache = LineCache::new(10);
        let before = cache.generation();
        assert_eq!(cache.stale_from(before), None);

        cache.invalidate_from(7);
        cache.invalidate_from(4);
        assert_eq!(cache.stale_from(before), Some(4));
        assert_eq!(cache.stale_from(cache.generation()), None);

        let before_clear = cache.generation();
        cache.clear();
        assert_eq!(cache.stale_from(before_clear), Some(0));
    }

    #[test]
    fn test_stale_from_beyond_history_covers_everything() {
        let mut cache = LineCache::new(10);
        let before = cache.generation();
        for _ in 0..HISTORY_LENGTH + 5 {
            cache.invalidate_from(100);
        }
        assert_eq!(cache.stale_from(before), Some(0));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let cache = LineCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }
}
