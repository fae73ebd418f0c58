use std::collections::HashMap;

use crate::matrix::SampleMatrix;

/// Inverted index `feature_id -> [(group_id, count)...]`, the data
/// structure the split evaluator enumerates to find every group a
/// candidate feature touches.
///
/// Per-feature lists are sorted ascending by `group_id` because `build`
/// visits groups in order and only ever appends.
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
    postings: HashMap<u32, Vec<(u32, u64)>>,
}

impl FeatureIndex {
    /// One pass over `matrix`'s groups, appending `(group_id, count)` to
    /// every feature present in each group's feature list.
    pub fn build(matrix: &SampleMatrix) -> Self {
        let mut postings: HashMap<u32, Vec<(u32, u64)>> = HashMap::new();
        for (group_id, group) in matrix.iter_groups().enumerate() {
            let group_id = group_id as u32;
            for feature_id in group.features.iter() {
                postings
                    .entry(feature_id)
                    .or_default()
                    .push((group_id, group.count));
            }
        }
        Self { postings }
    }

    /// Zipper-merges two indices built over disjoint group-id spaces.
    /// `other`'s group ids are shifted by `group_id_offset` (the number of
    /// groups already present in `self`'s source matrix) so the merged
    /// index still addresses its own concatenated group list correctly.
    pub fn merge(&self, other: &FeatureIndex, group_id_offset: u32) -> FeatureIndex {
        let mut postings = self.postings.clone();
        for (feature_id, entries) in &other.postings {
            let shifted = entries
                .iter()
                .map(|(group_id, count)| (group_id + group_id_offset, *count));
            postings.entry(*feature_id).or_default().extend(shifted);
        }
        for entries in postings.values_mut() {
            entries.sort_unstable_by_key(|(group_id, _)| *group_id);
        }
        FeatureIndex { postings }
    }

    /// Constant-time lookup; returns an empty slice when `feature_id` is
    /// absent from every group.
    pub fn lookup(&self, feature_id: u32) -> &[(u32, u64)] {
        self.postings
            .get(&feature_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All known feature ids with their postings, in ascending feature id
    /// order.
    pub fn enumerate(&self) -> impl Iterator<Item = (u32, &[(u32, u64)])> {
        let mut ids: Vec<u32> = self.postings.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(move |id| (id, self.postings[&id].as_slice()))
    }

    pub fn feature_count(&self) -> usize {
        self.postings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NullSink;
    use crate::matrix::SampleMatrix;

    fn matrix(lines: &[&str]) -> SampleMatrix {
        SampleMatrix::load(lines.join("\n").as_bytes(), &NullSink).unwrap()
    }

    #[test]
    fn build_indexes_every_feature_in_every_group() {
        let m = matrix(&["1 1 2", "0 2 3"]);
        let index = FeatureIndex::build(&m);
        assert!(!index.lookup(1).is_empty());
        assert_eq!(index.lookup(2).len(), 2);
        assert!(index.lookup(99).is_empty());
    }

    #[test]
    fn enumerate_is_ascending_by_feature_id() {
        let m = matrix(&["1 5 1 3"]);
        let index = FeatureIndex::build(&m);
        let ids: Vec<u32> = index.enumerate().map(|(id, _)| id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn merge_preserves_postings_from_both_sides() {
        let a = FeatureIndex::build(&matrix(&["1 1"]));
        let b = FeatureIndex::build(&matrix(&["1 1"]));
        let merged = a.merge(&b, 1);
        let postings = merged.lookup(1);
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].0, 0);
        assert_eq!(postings[1].0, 1);
    }
}
