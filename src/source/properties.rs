use super::EmptyReason;
use crate::detect::Encoding;
use parking_lot::RwLock;
use std::fmt;
use std::time::SystemTime;

/// Fraction of a source that has been processed, clamped to 0..=1
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Percentage(f64);

impl Percentage {
    pub const ZERO: Percentage = Percentage(0.0);
    pub const HUNDRED: Percentage = Percentage(1.0);

    pub fn from_ratio(ratio: f64) -> Self {
        if ratio.is_nan() {
            return Self::ZERO;
        }
        Percentage(ratio.clamp(0.0, 1.0))
    }

    /// `processed / total`, 100% for an empty total
    pub fn of(processed: u64, total: u64) -> Self {
        if total == 0 || processed >= total {
            return Self::HUNDRED;
        }
        Self::from_ratio(processed as f64 / total as f64)
    }

    pub fn ratio(self) -> f64 {
        self.0
    }

    pub fn is_complete(self) -> bool {
        self.0 >= 1.0
    }

    /// Progress of a stage over an upstream that is itself partially done
    pub fn times(self, other: Percentage) -> Percentage {
        Percentage::from_ratio(self.0 * other.0)
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}%", self.0 * 100.0)
    }
}

/// Every property a source may publish
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Properties {
    pub name: Option<String>,
    pub log_entry_count: usize,
    /// Size of the file in bytes
    pub size: Option<u64>,
    pub created: Option<SystemTime>,
    pub last_modified: Option<SystemTime>,
    /// Name of the detected format, `None` for plain text
    pub format: Option<String>,
    /// Encoding in use
    pub encoding: Option<Encoding>,
    /// Encoding sniffed from a byte order mark
    pub detected_encoding: Option<Encoding>,
    pub empty_reason: Option<EmptyReason>,
    pub percentage_processed: Percentage,
    /// Rows left out of a merge because they carry no timestamp
    pub excluded_entries: usize,
}

impl Properties {
    /// Properties of a source whose file is gone or unreadable
    pub fn error(name: Option<String>, reason: EmptyReason) -> Self {
        Self {
            name,
            empty_reason: Some(reason),
            percentage_processed: Percentage::HUNDRED,
            ..Self::default()
        }
    }
}

/// Public copy of a stage's properties.
///
/// Stages accumulate into a private `Properties` and publish it here once per
/// cycle, so readers see either the old or the new set, never a mix.
#[derive(Debug, Default)]
pub struct SharedProperties {
    inner: RwLock<Properties>,
}

impl SharedProperties {
    pub fn new(initial: Properties) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn publish(&self, properties: &Properties) {
        self.inner.write().clone_from(properties);
    }

    pub fn snapshot(&self) -> Properties {
        self.inner.read().clone()
    }

    pub fn count(&self) -> usize {
        self.inner.read().log_entry_count
    }

    pub fn clear(&self) {
        *self.inner.write() = Properties::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_of_empty_total_is_complete() {
        assert!(Percentage::of(0, 0).is_complete());
    }

    #[test]
    fn test_percentage_of_partial() {
        let half = Percentage::of(50, 100);
        assert!((half.ratio() - 0.5).abs() < f64::EPSILON);
        assert_eq!(half.to_string(), "50%");
        assert!(!half.is_complete());
    }

    #[test]
    fn test_percentage_is_clamped() {
        assert_eq!(Percentage::from_ratio(3.0), Percentage::HUNDRED);
        assert_eq!(Percentage::from_ratio(-1.0), Percentage::ZERO);
        assert_eq!(Percentage::from_ratio(f64::NAN), Percentage::ZERO);
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let shared = SharedProperties::default();
        let mut private = Properties {
            log_entry_count: 3,
            ..Properties::default()
        };
        shared.publish(&private);
        private.log_entry_count = 4;

        assert_eq!(shared.count(), 3);
        shared.publish(&private);
        assert_eq!(shared.snapshot().log_entry_count, 4);

        shared.clear();
        assert_eq!(shared.snapshot(), Properties::default());
    }
}
