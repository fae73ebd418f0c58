use crate::matrix::{Label, Row};

/// Rows sharing an identical feature set and identical `(y, p)`, collapsed
/// into one entry with a `count`.
///
/// Every operation that iterates rows actually iterates groups and
/// multiplies contributions by `count` — this is what keeps a bag of
/// thousands of identical rows cheap to train on.
#[derive(Debug, Clone)]
pub struct Group {
    pub features: Row,
    pub label: Label,
    pub count: u64,
}

impl Group {
    pub fn new(features: Row, label: Label, count: u64) -> Self {
        debug_assert!(count >= 1, "a group must represent at least one row");
        Self {
            features,
            label,
            count,
        }
    }

    /// A sortable, exactly-comparable key for grouping equal rows. `f64`
    /// doesn't implement `Ord`, so comparisons go through the IEEE-754 bit
    /// pattern — sufficient here because we're deduplicating literal
    /// float values produced by parsing or prediction assignment, not
    /// comparing for approximate equality.
    pub(crate) fn grouping_key(&self) -> (&[u32], u64, u64) {
        (
            self.features.as_slice(),
            self.label.y.to_bits(),
            self.label.p.to_bits(),
        )
    }
}
