/// Closed byte interval `[min, max]`.
///
/// `{-1, -1}` is the sentinel meaning "unset" or, after an upload status
/// update, "nothing left to send".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Default for Range {
    fn default() -> Self {
        Self::UNSET
    }
}

impl Range {
    pub const UNSET: Self = Self { min: -1, max: -1 };

    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub const fn is_unset(&self) -> bool {
        self.min == -1 && self.max == -1
    }

    pub const fn is_valid(&self) -> bool {
        self.min >= 0 && self.max >= self.min
    }

    /// Number of bytes covered, zero for invalid ranges.
    pub const fn len(&self) -> u64 {
        if self.is_valid() {
            (self.max - self.min + 1) as u64
        } else {
            0
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses the first entry of a `nextExpectedRanges` list.
    ///
    /// A missing or empty entry yields [`Range::UNSET`]. An open or malformed
    /// upper bound falls back to `total_size - 1`.
    pub fn from_expected_ranges<S>(ranges: &[S], total_size: u64) -> Self
    where
        S: AsRef<str>,
    {
        let Some(first) = ranges.first().map(AsRef::as_ref) else {
            return Self::UNSET;
        };
        Self::parse(first, total_size)
    }

    pub fn parse(text: &str, total_size: u64) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::UNSET;
        }
        let (min_text, max_text) = text.split_once('-').unwrap_or((text, ""));
        let Ok(min) = min_text.trim().parse::<i64>() else {
            return Self::UNSET;
        };
        let fallback_max = total_size as i64 - 1;
        let max = max_text.trim().parse::<i64>().unwrap_or(fallback_max);
        Self { min, max }
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}-{}", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_range_is_unset_sentinel() {
        let range = Range::default();
        assert_eq!(range, Range::new(-1, -1));
        assert!(range.is_unset());
        assert!(!range.is_valid());
        assert_eq!(range.len(), 0);
    }

    #[test]
    fn parses_closed_range() {
        assert_eq!(Range::parse("100-200", 1_000), Range::new(100, 200));
    }

    #[test]
    fn open_upper_bound_uses_total_size() {
        assert_eq!(Range::parse("0-", 100_000), Range::new(0, 99_999));
        assert_eq!(Range::parse("42", 100), Range::new(42, 99));
        assert_eq!(Range::parse("5-abc", 10), Range::new(5, 9));
    }

    #[test]
    fn empty_expected_ranges_are_unset() {
        let empty: [&str; 0] = [];
        assert_eq!(Range::from_expected_ranges(&empty, 100), Range::UNSET);
        assert_eq!(Range::from_expected_ranges(&[""], 100), Range::UNSET);
    }

    #[test]
    fn only_first_expected_range_is_used() {
        let ranges = ["10-19".to_owned(), "30-39".to_owned()];
        assert_eq!(Range::from_expected_ranges(&ranges, 40), Range::new(10, 19));
    }

    #[test]
    fn valid_range_length_is_inclusive() {
        assert_eq!(Range::new(0, 9).len(), 10);
        assert_eq!(Range::new(5, 5).len(), 1);
        assert!(Range::new(3, 2).is_empty());
    }
}
