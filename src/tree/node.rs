use crate::matrix::{Group, Row, SampleMatrix};

/// A dense presence bitmap for batched inference (`predict_fast`), built
/// once per query row and consulted by every tree in an ensemble instead of
/// re-searching the row's sorted feature list each time.
#[derive(Debug, Clone)]
pub struct PresenceTable {
    bits: Vec<bool>,
}

impl PresenceTable {
    pub fn from_row(row: &Row, capacity: u32) -> Self {
        let mut bits = vec![false; capacity as usize];
        for id in row.iter() {
            if (id as usize) < bits.len() {
                bits[id as usize] = true;
            }
        }
        Self { bits }
    }

    pub fn contains(&self, feature_id: u32) -> bool {
        self.bits.get(feature_id as usize).copied().unwrap_or(false)
    }
}

/// An immutable decision tree: each non-leaf node carries one feature id
/// and two children; each leaf carries the delta added to the standing
/// prediction for rows that reach it.
///
/// Value semantics, deep clone — this is the systems-rewrite of a
/// reference-counted polymorphic node hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub enum Tree {
    Leaf(f64),
    Split {
        feature_id: u32,
        yes: Box<Tree>,
        no: Box<Tree>,
    },
}

impl Tree {
    pub fn leaf(delta: f64) -> Self {
        Tree::Leaf(delta)
    }

    pub fn split(feature_id: u32, yes: Tree, no: Tree) -> Self {
        Tree::Split {
            feature_id,
            yes: Box::new(yes),
            no: Box::new(no),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Tree::Leaf(_))
    }

    /// Traverses from the root, branching at each internal node on whether
    /// `row` contains that node's feature, returning the delta at the leaf
    /// reached. Equal in value to the sum of deltas along the path, since
    /// each internal node here contributes no delta of its own.
    pub fn predict(&self, row: &Row) -> f64 {
        match self {
            Tree::Leaf(delta) => *delta,
            Tree::Split { feature_id, yes, no } => {
                if row.contains(*feature_id) {
                    yes.predict(row)
                } else {
                    no.predict(row)
                }
            }
        }
    }

    /// Like `predict`, but consults a pre-populated dense presence bitmap
    /// instead of binary-searching the row each time. Intended for batched
    /// inference across many trees in an ensemble.
    pub fn predict_fast(&self, presence: &PresenceTable) -> f64 {
        match self {
            Tree::Leaf(delta) => *delta,
            Tree::Split { feature_id, yes, no } => {
                if presence.contains(*feature_id) {
                    yes.predict_fast(presence)
                } else {
                    no.predict_fast(presence)
                }
            }
        }
    }

    /// Prunes subtrees whose cover on `matrix` is below `alpha`, replacing
    /// each with a leaf whose delta is the cover-weighted average of the
    /// pruned subtree's leaf deltas.
    pub fn filter_by_cover(&self, matrix: &SampleMatrix, alpha: f64) -> Tree {
        let total = matrix.total_count();
        let groups: Vec<&Group> = matrix.iter_groups().collect();
        self.prune(&groups, total, alpha)
    }

    fn prune(&self, groups: &[&Group], total: u64, alpha: f64) -> Tree {
        match self {
            Tree::Leaf(delta) => Tree::Leaf(*delta),
            Tree::Split { feature_id, yes, no } => {
                let (yes_groups, no_groups) = partition(groups, *feature_id);
                let yes_cover = cover_fraction(&yes_groups, total);
                let no_cover = cover_fraction(&no_groups, total);

                let pruned_yes = yes.prune(&yes_groups, total, alpha);
                let pruned_no = no.prune(&no_groups, total, alpha);

                if yes_cover < alpha || no_cover < alpha {
                    let (yes_sum, yes_mass) = weighted_leaf_sum(&pruned_yes, &yes_groups);
                    let (no_sum, no_mass) = weighted_leaf_sum(&pruned_no, &no_groups);
                    let mass = yes_mass + no_mass;
                    if mass == 0 {
                        Tree::Leaf(0.0)
                    } else {
                        Tree::Leaf((yes_sum + no_sum) / mass as f64)
                    }
                } else {
                    Tree::split(*feature_id, pruned_yes, pruned_no)
                }
            }
        }
    }
}

fn partition<'a>(groups: &[&'a Group], feature_id: u32) -> (Vec<&'a Group>, Vec<&'a Group>) {
    groups
        .iter()
        .copied()
        .partition(|g| g.features.contains(feature_id))
}

fn cover_fraction(groups: &[&Group], total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let mass: u64 = groups.iter().map(|g| g.count).sum();
    mass as f64 / total as f64
}

/// Sum of `delta * count` over every leaf in `tree` reachable by `groups`,
/// used to compute the cover-weighted average delta when collapsing a
/// pruned subtree.
fn weighted_leaf_sum(tree: &Tree, groups: &[&Group]) -> (f64, u64) {
    match tree {
        Tree::Leaf(delta) => {
            let mass: u64 = groups.iter().map(|g| g.count).sum();
            (*delta * mass as f64, mass)
        }
        Tree::Split { feature_id, yes, no } => {
            let (yes_groups, no_groups) = partition(groups, *feature_id);
            let (yes_sum, yes_mass) = weighted_leaf_sum(yes, &yes_groups);
            let (no_sum, no_mass) = weighted_leaf_sum(no, &no_groups);
            (yes_sum + no_sum, yes_mass + no_mass)
        }
    }
}
