use chrono::NaiveDateTime;

/// One row of the merged view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedEntry {
    /// Timestamp the row is ordered by
    pub sort_timestamp: Option<NaiveDateTime>,
    /// Timestamp the row actually carries
    pub timestamp: Option<NaiveDateTime>,
    pub source: usize,
    pub source_index: usize,
}

impl MergedEntry {
    fn key(&self) -> (Option<NaiveDateTime>, usize, usize) {
        (self.sort_timestamp, self.source, self.source_index)
    }
}

/// Rows of every source, ordered by timestamp, then source, then the row's
/// index within its source.
#[derive(Debug, Default)]
pub struct MergeIndex {
    entries: Vec<MergedEntry>,
}

impl MergeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<MergedEntry> {
        self.entries.get(row).copied()
    }

    pub fn last_sort_timestamp(&self) -> Option<NaiveDateTime> {
        self.entries.last().and_then(|e| e.sort_timestamp)
    }

    /// Merge `new` into the index. Returns the first row whose position
    /// changed, or `None` when everything landed at the tail.
    pub fn insert(&mut self, mut new: Vec<MergedEntry>) -> Option<usize> {
        if new.is_empty() {
            return None;
        }
        new.sort_unstable_by_key(MergedEntry::key);

        let first_key = new[0].key();
        let position = self.entries.partition_point(|e| e.key() < first_key);
        let old_len = self.entries.len();

        if position == old_len {
            self.entries.extend(new);
            return None;
        }

        let tail = self.entries.split_off(position);
        self.entries.reserve(tail.len() + new.len());
        let mut tail = tail.into_iter().peekable();
        let mut new = new.into_iter().peekable();
        loop {
            let take_tail = match (tail.peek(), new.peek()) {
                (Some(a), Some(b)) => a.key() <= b.key(),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_tail { tail.next() } else { new.next() };
            self.entries.extend(next);
        }
        Some(position)
    }

    /// Drop the rows of `source` from `source_index` on. Returns the first
    /// row that moved or vanished.
    pub fn remove_from(&mut self, source: usize, source_index: usize) -> Option<usize> {
        let first = self
            .entries
            .iter()
            .position(|e| e.source == source && e.source_index >= source_index)?;
        let mut row = first;
        self.entries.retain(|e| {
            let keep = row < first || !(e.source == source && e.source_index >= source_index);
            row += 1;
            keep
        });
        Some(first)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &MergedEntry> {
        self.entries.iter()
    }
}
