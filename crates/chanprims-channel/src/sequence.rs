use std::fmt;

use crate::error::{ChannelError, Result};

/// An inclusive range of message sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceRange {
    lower: i64,
    upper: i64,
}

impl SequenceRange {
    /// Requires `0 <= lower <= upper`.
    pub fn new(lower: i64, upper: i64) -> Result<Self> {
        if lower < 0 {
            return Err(ChannelError::argument(
                "lower",
                format!("must be non-negative, got {lower}"),
            ));
        }
        if lower > upper {
            return Err(ChannelError::argument(
                "upper",
                format!("must be at least lower ({lower}), got {upper}"),
            ));
        }
        Ok(Self { lower, upper })
    }

    pub fn single(number: i64) -> Result<Self> {
        Self::new(number, number)
    }

    pub fn lower(&self) -> i64 {
        self.lower
    }

    pub fn upper(&self) -> i64 {
        self.upper
    }

    pub fn contains(&self, number: i64) -> bool {
        (self.lower..=self.upper).contains(&number)
    }

    pub fn intersects(&self, other: &SequenceRange) -> bool {
        self.lower <= other.upper && other.lower <= self.upper
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_validated() {
        assert!(matches!(
            SequenceRange::new(-1, 4),
            Err(ChannelError::Argument { name: "lower", .. })
        ));
        assert!(matches!(
            SequenceRange::new(5, 4),
            Err(ChannelError::Argument { name: "upper", .. })
        ));
        assert!(SequenceRange::new(0, 0).is_ok());
    }

    #[test]
    fn containment_is_inclusive() {
        let range = SequenceRange::new(3, 7).unwrap();
        assert!(range.contains(3));
        assert!(range.contains(7));
        assert!(!range.contains(2));
        assert!(!range.contains(8));
    }

    #[test]
    fn structural_equality_and_overlap() {
        let a = SequenceRange::new(1, 5).unwrap();
        assert_eq!(a, SequenceRange::new(1, 5).unwrap());
        assert_ne!(a, SequenceRange::new(1, 6).unwrap());
        assert!(a.intersects(&SequenceRange::new(5, 9).unwrap()));
        assert!(!a.intersects(&SequenceRange::single(6).unwrap()));
        assert_eq!(a.to_string(), "[1, 5]");
    }
}
