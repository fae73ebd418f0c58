use std::collections::HashMap;
use std::io::BufRead;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{Report, ReportSink, Severity, VangaError};
use crate::matrix::{svm_lite, Group, Label, Row};

/// An ordered sequence of groups, the unit the tree learner trains against.
///
/// Read-only once built by [`SampleMatrix::load`] or one of the derived
/// constructors (`partition_into_bags`, `filter`, `with_predictions`).
#[derive(Debug, Clone, Default)]
pub struct SampleMatrix {
    groups: Vec<Group>,
}

impl SampleMatrix {
    /// Parses SVM-lite lines from `reader` into rows, then collapses
    /// identical `(features, y, p)` rows into groups with summed counts.
    ///
    /// A malformed line is skipped and reported through `sink` rather than
    /// failing the whole load ("`ParseError` on a single line
    /// is skipped and reported").
    pub fn load<R: BufRead>(reader: R, sink: &dyn ReportSink) -> Result<Self, VangaError> {
        let mut rows: Vec<(Row, Label)> = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            match svm_lite::parse_line(&line) {
                Ok(Some(row_and_label)) => rows.push(row_and_label),
                Ok(None) => {}
                Err(err) => sink.report(Report::new(
                    Severity::Warning,
                    "svm_lite.parse_error",
                    format!("line {}: {}", lineno + 1, err),
                )),
            }
        }
        Ok(Self::from_rows(rows))
    }

    /// Builds a finalized matrix directly from rows, useful for tests and
    /// for callers that already have parsed data in memory.
    pub fn from_rows(rows: Vec<(Row, Label)>) -> Self {
        let mut groups: Vec<Group> = rows
            .into_iter()
            .map(|(features, label)| Group::new(features, label, 1))
            .collect();
        groups.sort_by(|a, b| a.grouping_key().cmp(&b.grouping_key()));

        let mut collapsed: Vec<Group> = Vec::with_capacity(groups.len());
        for group in groups {
            match collapsed.last_mut() {
                Some(last) if last.grouping_key() == group.grouping_key() => {
                    last.count += group.count;
                }
                _ => collapsed.push(group),
            }
        }
        Self { groups: collapsed }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn iter_groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total row mass (sum of group counts) across the whole matrix.
    pub fn total_count(&self) -> u64 {
        self.groups.iter().map(|g| g.count).sum()
    }

    /// Produces `k` disjoint sample matrices whose group sets, as multisets
    /// of rows, together equal this matrix. Partitioning is uniform random
    /// at row granularity: a group with `count > 1` may be split across
    /// several bags.
    pub fn partition_into_bags(&self, k: usize, seed: u64) -> Vec<SampleMatrix> {
        assert!(k >= 1, "must produce at least one bag");
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut per_bag: Vec<Vec<(Row, Label)>> = vec![Vec::new(); k];

        for group in &self.groups {
            let mut tally: HashMap<usize, u64> = HashMap::new();
            for _ in 0..group.count {
                let bag = rng.gen_range(0..k);
                *tally.entry(bag).or_insert(0) += 1;
            }
            for (bag, count) in tally {
                // `from_rows` re-collapses identical rows, so pushing one
                // row per unit (rather than threading the count through) is
                // wasteful only in allocation, not in result.
                for _ in 0..count {
                    per_bag[bag].push((group.features.clone(), group.label));
                }
            }
        }

        per_bag.into_iter().map(SampleMatrix::from_rows).collect()
    }

    /// Restricts every row's feature list to `keep`, then re-groups (two
    /// previously-distinct groups may become identical after restriction).
    pub fn filter(&self, keep: &std::collections::HashSet<u32>) -> SampleMatrix {
        let rows = self
            .groups
            .iter()
            .map(|g| (g.features.restricted_to(keep), g.label))
            .collect();
        SampleMatrix::from_rows(expand_counts(&self.groups, rows))
    }

    /// Replaces every label's `p` with the value produced by `predictor`,
    /// the mechanism by which one boosting iteration hands its accumulated
    /// prediction to the next learner pass.
    pub fn with_predictions<F>(&self, predictor: F) -> SampleMatrix
    where
        F: Fn(&Row) -> f64,
    {
        let groups = self
            .groups
            .iter()
            .map(|g| {
                let p = predictor(&g.features);
                Group::new(g.features.clone(), g.label.with_prediction(p), g.count)
            })
            .collect();
        SampleMatrix { groups }
    }
}

/// Expands each row produced from `groups` out to its original count so
/// that re-grouping after a feature-list-changing transform (e.g.
/// `filter`) still sums counts correctly when two groups collide.
fn expand_counts(groups: &[Group], transformed: Vec<(Row, Label)>) -> Vec<(Row, Label)> {
    let mut out = Vec::new();
    for (group, (row, label)) in groups.iter().zip(transformed) {
        for _ in 0..group.count {
            out.push((row.clone(), label));
        }
    }
    out
}
