//! Per-user segment profile and its merge-on-write semantics.

/// One `(segment_id, ascending visit timestamps)` entry within a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    pub segment_id: u32,
    pub timestamps: Vec<u64>,
}

/// An ordered list of segment entries for a single user id.
///
/// Invariants (enforced by construction, not re-checked on every read):
/// segment ids are unique and ascending; timestamps within a segment are
/// ascending (non-decreasing — merging a profile into itself is expected to
/// double up multiplicities rather than collapse them).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentProfile {
    entries: Vec<SegmentEntry>,
}

impl SegmentProfile {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Builds a profile from entries, sorting by segment id and each entry's
    /// timestamps ascending. Does not deduplicate segment ids; callers
    /// constructing a profile directly (rather than via `merge`) are
    /// expected to supply distinct ids.
    pub fn from_entries(mut entries: Vec<SegmentEntry>) -> Self {
        entries.sort_by_key(|e| e.segment_id);
        for entry in &mut entries {
            entry.timestamps.sort_unstable();
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[SegmentEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn segment(&self, segment_id: u32) -> Option<&[u64]> {
        self.entries
            .iter()
            .find(|e| e.segment_id == segment_id)
            .map(|e| e.timestamps.as_slice())
    }

    /// Merges `delta` into `self`: for each `(segment_id, timestamps)` in
    /// `delta`, the timestamps are unioned (list-concatenated, not
    /// set-deduplicated — merging a profile into itself is expected to
    /// double timestamp multiplicities) into the matching segment,
    /// maintaining ascending order; segments present only in `delta` are
    /// inserted. Both `self` and `delta` are assumed ascending by segment id
    /// on entry (the standard shape produced by `from_entries`); the merge
    /// itself is a single linear zipper pass.
    pub fn merge(&self, delta: &SegmentProfile) -> SegmentProfile {
        let mut merged = Vec::with_capacity(self.entries.len() + delta.entries.len());
        let mut left = self.entries.iter().peekable();
        let mut right = delta.entries.iter().peekable();

        loop {
            match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => {
                    if l.segment_id < r.segment_id {
                        merged.push((*left.next().unwrap()).clone());
                    } else if r.segment_id < l.segment_id {
                        merged.push((*right.next().unwrap()).clone());
                    } else {
                        let l = left.next().unwrap();
                        let r = right.next().unwrap();
                        merged.push(merge_entry(l, r));
                    }
                }
                (Some(_), None) => merged.push((*left.next().unwrap()).clone()),
                (None, Some(_)) => merged.push((*right.next().unwrap()).clone()),
                (None, None) => break,
            }
        }

        SegmentProfile { entries: merged }
    }
}

fn merge_entry(a: &SegmentEntry, b: &SegmentEntry) -> SegmentEntry {
    let mut timestamps = Vec::with_capacity(a.timestamps.len() + b.timestamps.len());
    let mut left = a.timestamps.iter().peekable();
    let mut right = b.timestamps.iter().peekable();
    loop {
        match (left.peek(), right.peek()) {
            (Some(&&l), Some(&&r)) => {
                if l <= r {
                    timestamps.push(l);
                    left.next();
                } else {
                    timestamps.push(r);
                    right.next();
                }
            }
            (Some(_), None) => timestamps.push(*left.next().unwrap()),
            (None, Some(_)) => timestamps.push(*right.next().unwrap()),
            (None, None) => break,
        }
    }
    SegmentEntry {
        segment_id: a.segment_id,
        timestamps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, ts: &[u64]) -> SegmentEntry {
        SegmentEntry {
            segment_id: id,
            timestamps: ts.to_vec(),
        }
    }

    #[test]
    fn merge_unions_existing_segment_timestamps() {
        let base = SegmentProfile::from_entries(vec![entry(10, &[100, 200])]);
        let delta = SegmentProfile::from_entries(vec![entry(10, &[150]), entry(20, &[300])]);
        let merged = base.merge(&delta);
        assert_eq!(merged.segment(10), Some(&[100, 150, 200][..]));
        assert_eq!(merged.segment(20), Some(&[300][..]));
    }

    #[test]
    fn merging_a_profile_into_itself_doubles_multiplicities() {
        let base = SegmentProfile::from_entries(vec![entry(1, &[5, 10])]);
        let merged = base.merge(&base);
        assert_eq!(merged.segment(1), Some(&[5, 5, 10, 10][..]));
    }

    #[test]
    fn merge_preserves_ascending_segment_id_order() {
        let base = SegmentProfile::from_entries(vec![entry(5, &[1]), entry(1, &[2])]);
        let delta = SegmentProfile::from_entries(vec![entry(3, &[1])]);
        let merged = base.merge(&delta);
        let ids: Vec<u32> = merged.entries().iter().map(|e| e.segment_id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn empty_delta_is_a_no_op() {
        let base = SegmentProfile::from_entries(vec![entry(1, &[1, 2])]);
        let merged = base.merge(&SegmentProfile::empty());
        assert_eq!(merged, base);
    }
}
