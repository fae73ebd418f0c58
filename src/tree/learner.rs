use std::collections::HashSet;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::concurrency::{CancelToken, TaskPool};
use crate::error::{Report, ReportSink, Severity, VangaError};
use crate::index::FeatureIndex;
use crate::matrix::{Group, SampleMatrix};
use crate::split::{select_best, BucketStats, Loss, SplitCandidate, SplitEvaluator};
use crate::tree::{Tree, TreeLearnerConfig};

/// A node in the tree under construction. Unlike the immutable [`Tree`]
/// it's eventually converted into, a leaf here also carries the routing of
/// every bag's groups that currently reach it — its "partition map", kept
/// explicit rather than recomputed by re-walking the tree on every
/// iteration.
enum WorkNode {
    Leaf {
        delta: f64,
        bag_groups: Vec<Vec<u32>>,
    },
    Split {
        feature_id: u32,
        yes: usize,
        no: usize,
    },
}

type Arena = Vec<WorkNode>;

/// Grows a decision tree by iteratively selecting a leaf to split,
/// evaluating candidate features in parallel, and committing the best one.
pub struct TreeLearner {
    bags: Vec<SampleMatrix>,
    indices: Vec<FeatureIndex>,
    config: TreeLearnerConfig,
    pool: TaskPool,
}

impl TreeLearner {
    /// Bags `matrix` into `config.bag_count()` disjoint sample matrices and
    /// builds one feature index per bag, both fixed for the session.
    pub fn new(matrix: &SampleMatrix, config: TreeLearnerConfig) -> Self {
        let seed = config.seed().unwrap_or(0);
        let bags = matrix.partition_into_bags(config.bag_count(), seed);
        let indices = bags.iter().map(FeatureIndex::build).collect();
        let pool = TaskPool::new(config.concurrency());
        Self {
            bags,
            indices,
            config,
            pool,
        }
    }

    /// Runs one learner session, returning the best tree seen (by test-set
    /// log-loss), starting from `warm_start` (an empty tree is
    /// `Tree::leaf(0.0)`).
    pub fn train(
        &self,
        warm_start: &Tree,
        test_matrix: &SampleMatrix,
        cancel: &CancelToken,
        sink: &dyn ReportSink,
    ) -> Result<Tree, VangaError> {
        if self.config.max_iterations() == 0 {
            return Ok(warm_start.clone());
        }

        let total_mass: u64 = self.bags.iter().map(SampleMatrix::total_count).sum();
        if total_mass == 0 {
            return Err(VangaError::InvalidArgument(
                "sample matrix has no rows to train on".into(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed().unwrap_or(0));
        let mut arena: Arena = Vec::new();
        let initial_ids: Vec<Vec<u32>> = self
            .bags
            .iter()
            .map(|bag| (0..bag.groups().len() as u32).collect())
            .collect();
        let root = build_arena(warm_start, &initial_ids, &self.bags, &mut arena);

        let mut best_tree = arena_to_tree(&arena, root);
        let mut best_loss = test_log_loss(&best_tree, test_matrix);
        let mut consecutive_no_improvement = 0u32;
        let mut iterations = 0usize;

        while iterations < self.config.max_iterations() {
            if cancel.is_cancelled() {
                break;
            }

            let frontier = self.frontier_leaves(&arena, total_mass);
            if frontier.is_empty() {
                break;
            }

            let loss = self.config.choose_loss(&mut rng);
            let evaluator = SplitEvaluator::new(
                loss,
                self.config.min_cover(),
                self.config.negative_gain_policy(),
            );
            let gain_check_bags = self.config.gain_check_bags();

            let ranked: Vec<Option<(usize, u32, f64)>> = self.pool.map(&frontier, |&leaf_idx| {
                if cancel.is_cancelled() {
                    return None;
                }
                let bag_groups = leaf_bag_groups(&arena, leaf_idx);
                let warm_start = Some(leaf_delta(&arena, leaf_idx));
                let rank_groups = rank_slice(&bag_groups, gain_check_bags);
                evaluate_leaf(
                    rank_groups,
                    &self.bags,
                    &self.indices,
                    &evaluator,
                    warm_start,
                    sink,
                    self.config.check_depth(),
                )
                .map(|(candidate, score)| (leaf_idx, candidate.feature_id, score))
            });

            let winner = ranked
                .into_iter()
                .flatten()
                .fold(None, |best: Option<(usize, u32, f64)>, candidate| {
                    match &best {
                        None => Some(candidate),
                        Some(current) if candidate.2 > current.2 => Some(candidate),
                        Some(current)
                            if (candidate.2 - current.2).abs() < 1e-9
                                && candidate.1 < current.1 =>
                        {
                            Some(candidate)
                        }
                        _ => best,
                    }
                });

            let (leaf_idx, feature_id) = match winner {
                Some((leaf_idx, feature_id, _)) => (leaf_idx, feature_id),
                None => {
                    // No structural split beats the cover/gain policy for any
                    // frontier leaf this round. Still refit each leaf's own
                    // delta to its current residual — this is what lets a
                    // featureless matrix converge to a constant-only model
                    // instead of getting stuck at the warm-start delta
                    // forever.
                    let changed = refit_leaf_deltas(&mut arena, &self.bags, &frontier, loss, sink);
                    if changed {
                        consecutive_no_improvement = 0;
                        let candidate_tree = arena_to_tree(&arena, root);
                        let candidate_loss = test_log_loss(&candidate_tree, test_matrix);
                        if candidate_loss <= best_loss {
                            best_loss = candidate_loss;
                            best_tree = candidate_tree;
                        }
                    } else {
                        consecutive_no_improvement += 1;
                        if consecutive_no_improvement >= 2 {
                            break;
                        }
                    }
                    iterations += 1;
                    continue;
                }
            };

            let bag_groups = leaf_bag_groups(&arena, leaf_idx);
            let warm_start = Some(leaf_delta(&arena, leaf_idx));
            let commit_groups = commit_slice(&bag_groups, gain_check_bags);
            let commit_candidate =
                evaluate_feature(commit_groups, &self.bags, feature_id, &evaluator, warm_start, sink);

            let candidate = match commit_candidate {
                Some(candidate) => candidate,
                None => {
                    consecutive_no_improvement += 1;
                    if consecutive_no_improvement >= 2 {
                        break;
                    }
                    iterations += 1;
                    continue;
                }
            };

            consecutive_no_improvement = 0;
            let (yes_idx, no_idx) = commit_split(&mut arena, leaf_idx, candidate, &self.bags);

            if self.config.step_depth() > 1 {
                self.grow_greedy(
                    &mut arena,
                    yes_idx,
                    &evaluator,
                    sink,
                    total_mass,
                    self.config.step_depth() - 1,
                );
                self.grow_greedy(
                    &mut arena,
                    no_idx,
                    &evaluator,
                    sink,
                    total_mass,
                    self.config.step_depth() - 1,
                );
            }

            let candidate_tree = arena_to_tree(&arena, root);
            let candidate_loss = test_log_loss(&candidate_tree, test_matrix);
            if candidate_loss <= best_loss {
                best_loss = candidate_loss;
                best_tree = candidate_tree;
            }

            iterations += 1;
        }

        Ok(best_tree)
    }

    fn frontier_leaves(&self, arena: &Arena, total_mass: u64) -> Vec<usize> {
        (0..arena.len())
            .filter(|&idx| match &arena[idx] {
                WorkNode::Leaf { bag_groups, .. } => {
                    cover_fraction(bag_groups, &self.bags, total_mass) > self.config.min_cover()
                }
                WorkNode::Split { .. } => false,
            })
            .collect()
    }

    fn grow_greedy(
        &self,
        arena: &mut Arena,
        node_idx: usize,
        evaluator: &SplitEvaluator,
        sink: &dyn ReportSink,
        total_mass: u64,
        remaining_steps: usize,
    ) {
        if remaining_steps == 0 {
            return;
        }
        let bag_groups = leaf_bag_groups(arena, node_idx);
        if cover_fraction(&bag_groups, &self.bags, total_mass) <= self.config.min_cover() {
            return;
        }
        let groups: Vec<&[u32]> = bag_groups.iter().map(Vec::as_slice).collect();
        let warm_start = Some(leaf_delta(arena, node_idx));
        let candidate = best_split_for_groups(&groups, &self.bags, &self.indices, evaluator, warm_start, sink);
        let candidate = match candidate {
            Some(c) => c,
            None => return,
        };
        let (yes_idx, no_idx) = commit_split(arena, node_idx, candidate, &self.bags);
        self.grow_greedy(arena, yes_idx, evaluator, sink, total_mass, remaining_steps - 1);
        self.grow_greedy(arena, no_idx, evaluator, sink, total_mass, remaining_steps - 1);
    }
}

fn leaf_bag_groups(arena: &Arena, idx: usize) -> Vec<Vec<u32>> {
    match &arena[idx] {
        WorkNode::Leaf { bag_groups, .. } => bag_groups.clone(),
        WorkNode::Split { .. } => panic!("expected a leaf node"),
    }
}

fn leaf_delta(arena: &Arena, idx: usize) -> f64 {
    match &arena[idx] {
        WorkNode::Leaf { delta, .. } => *delta,
        WorkNode::Split { .. } => panic!("expected a leaf node"),
    }
}

fn rank_slice(bag_groups: &[Vec<u32>], gain_check_bags: usize) -> Vec<&[u32]> {
    if gain_check_bags > 0 && gain_check_bags < bag_groups.len() {
        bag_groups[..gain_check_bags].iter().map(Vec::as_slice).collect()
    } else {
        bag_groups.iter().map(Vec::as_slice).collect()
    }
}

fn commit_slice(bag_groups: &[Vec<u32>], gain_check_bags: usize) -> Vec<&[u32]> {
    if gain_check_bags > 0 && gain_check_bags < bag_groups.len() {
        bag_groups[gain_check_bags..].iter().map(Vec::as_slice).collect()
    } else {
        bag_groups.iter().map(Vec::as_slice).collect()
    }
}

fn candidate_features(indices: &[FeatureIndex], leaf_group_ids: &[HashSet<u32>]) -> Vec<u32> {
    let mut features = std::collections::BTreeSet::new();
    for (bag_idx, index) in indices.iter().enumerate() {
        let Some(ids) = leaf_group_ids.get(bag_idx) else {
            continue;
        };
        for (feature_id, postings) in index.enumerate() {
            if postings.iter().any(|(group_id, _)| ids.contains(group_id)) {
                features.insert(feature_id);
            }
        }
    }
    features.into_iter().collect()
}

fn group_refs<'a>(bag_groups: &[&[u32]], bags: &'a [SampleMatrix]) -> Vec<Vec<&'a Group>> {
    bag_groups
        .iter()
        .enumerate()
        .map(|(bag_idx, ids)| {
            let groups = bags[bag_idx].groups();
            ids.iter().map(|&gid| &groups[gid as usize]).collect()
        })
        .collect()
}

fn best_split_for_groups(
    bag_groups: &[&[u32]],
    bags: &[SampleMatrix],
    indices: &[FeatureIndex],
    evaluator: &SplitEvaluator,
    warm_start: Option<f64>,
    sink: &dyn ReportSink,
) -> Option<SplitCandidate> {
    let sets: Vec<HashSet<u32>> = bag_groups.iter().map(|ids| ids.iter().copied().collect()).collect();
    let features = candidate_features(indices, &sets);
    let refs = group_refs(bag_groups, bags);
    let slices: Vec<&[&Group]> = refs.iter().map(Vec::as_slice).collect();

    let candidates = features
        .into_iter()
        .filter_map(|feature_id| evaluator.evaluate(&slices, feature_id, warm_start, sink));
    select_best(candidates)
}

fn evaluate_feature(
    bag_groups: Vec<&[u32]>,
    bags: &[SampleMatrix],
    feature_id: u32,
    evaluator: &SplitEvaluator,
    warm_start: Option<f64>,
    sink: &dyn ReportSink,
) -> Option<SplitCandidate> {
    let refs = group_refs(&bag_groups, bags);
    let slices: Vec<&[&Group]> = refs.iter().map(Vec::as_slice).collect();
    evaluator.evaluate(&slices, feature_id, warm_start, sink)
}

fn evaluate_leaf(
    bag_groups: Vec<&[u32]>,
    bags: &[SampleMatrix],
    indices: &[FeatureIndex],
    evaluator: &SplitEvaluator,
    warm_start: Option<f64>,
    sink: &dyn ReportSink,
    check_depth: usize,
) -> Option<(SplitCandidate, f64)> {
    let candidate = best_split_for_groups(&bag_groups, bags, indices, evaluator, warm_start, sink)?;
    let (yes_groups, no_groups) = split_owned_groups(&bag_groups, candidate.feature_id, bags);
    let lookahead = check_depth.saturating_sub(1);
    let extra = rollout_gain(&yes_groups, bags, indices, evaluator, sink, lookahead)
        + rollout_gain(&no_groups, bags, indices, evaluator, sink, lookahead);
    let score = candidate.gain + extra;
    Some((candidate, score))
}

fn rollout_gain(
    bag_groups: &[Vec<u32>],
    bags: &[SampleMatrix],
    indices: &[FeatureIndex],
    evaluator: &SplitEvaluator,
    sink: &dyn ReportSink,
    remaining_depth: usize,
) -> f64 {
    if remaining_depth == 0 {
        return 0.0;
    }
    let slices: Vec<&[u32]> = bag_groups.iter().map(Vec::as_slice).collect();
    // These yes/no buckets are hypothetical lookahead children, not yet
    // created leaves, so they have no established delta to warm-start from.
    match best_split_for_groups(&slices, bags, indices, evaluator, None, sink) {
        None => 0.0,
        Some(candidate) => {
            let (yes_groups, no_groups) = split_owned_groups(&slices, candidate.feature_id, bags);
            candidate.gain
                + rollout_gain(&yes_groups, bags, indices, evaluator, sink, remaining_depth - 1)
                + rollout_gain(&no_groups, bags, indices, evaluator, sink, remaining_depth - 1)
        }
    }
}

fn split_owned_groups(
    bag_groups: &[&[u32]],
    feature_id: u32,
    bags: &[SampleMatrix],
) -> (Vec<Vec<u32>>, Vec<Vec<u32>>) {
    let mut yes = Vec::with_capacity(bag_groups.len());
    let mut no = Vec::with_capacity(bag_groups.len());
    for (bag_idx, ids) in bag_groups.iter().enumerate() {
        let groups = bags[bag_idx].groups();
        let (y, n): (Vec<u32>, Vec<u32>) = ids
            .iter()
            .copied()
            .partition(|&gid| groups[gid as usize].features.contains(feature_id));
        yes.push(y);
        no.push(n);
    }
    (yes, no)
}

fn commit_split(
    arena: &mut Arena,
    leaf_idx: usize,
    candidate: SplitCandidate,
    bags: &[SampleMatrix],
) -> (usize, usize) {
    let bag_groups = leaf_bag_groups(arena, leaf_idx);
    let slices: Vec<&[u32]> = bag_groups.iter().map(Vec::as_slice).collect();
    let (yes_groups, no_groups) = split_owned_groups(&slices, candidate.feature_id, bags);

    let yes_idx = arena.len();
    arena.push(WorkNode::Leaf {
        delta: candidate.delta_yes,
        bag_groups: yes_groups,
    });
    let no_idx = arena.len();
    arena.push(WorkNode::Leaf {
        delta: candidate.delta_no,
        bag_groups: no_groups,
    });
    arena[leaf_idx] = WorkNode::Split {
        feature_id: candidate.feature_id,
        yes: yes_idx,
        no: no_idx,
    };
    (yes_idx, no_idx)
}

fn cover_fraction(bag_groups: &[Vec<u32>], bags: &[SampleMatrix], total_mass: u64) -> f64 {
    if total_mass == 0 {
        return 0.0;
    }
    let mass: u64 = bag_groups
        .iter()
        .enumerate()
        .map(|(bag_idx, ids)| {
            let groups = bags[bag_idx].groups();
            ids.iter().map(|&gid| groups[gid as usize].count).sum::<u64>()
        })
        .sum();
    mass as f64 / total_mass as f64
}

fn build_arena(tree: &Tree, bag_group_ids: &[Vec<u32>], bags: &[SampleMatrix], arena: &mut Arena) -> usize {
    match tree {
        Tree::Leaf(delta) => {
            arena.push(WorkNode::Leaf {
                delta: *delta,
                bag_groups: bag_group_ids.to_vec(),
            });
            arena.len() - 1
        }
        Tree::Split { feature_id, yes, no } => {
            let slices: Vec<&[u32]> = bag_group_ids.iter().map(Vec::as_slice).collect();
            let (yes_ids, no_ids) = split_owned_groups(&slices, *feature_id, bags);
            let yes_idx = build_arena(yes, &yes_ids, bags, arena);
            let no_idx = build_arena(no, &no_ids, bags, arena);
            arena.push(WorkNode::Split {
                feature_id: *feature_id,
                yes: yes_idx,
                no: no_idx,
            });
            arena.len() - 1
        }
    }
}

fn arena_to_tree(arena: &Arena, index: usize) -> Tree {
    match &arena[index] {
        WorkNode::Leaf { delta, .. } => Tree::leaf(*delta),
        WorkNode::Split { feature_id, yes, no } => {
            Tree::split(*feature_id, arena_to_tree(arena, *yes), arena_to_tree(arena, *no))
        }
    }
}

fn refit_leaf_deltas(
    arena: &mut Arena,
    bags: &[SampleMatrix],
    frontier: &[usize],
    loss: Loss,
    sink: &dyn ReportSink,
) -> bool {
    let mut changed = false;
    for &idx in frontier {
        let bag_groups = leaf_bag_groups(arena, idx);
        let current_delta = leaf_delta(arena, idx);
        let mut stats = BucketStats::new();
        for (bag_idx, ids) in bag_groups.iter().enumerate() {
            let groups = bags[bag_idx].groups();
            for &gid in ids {
                let g = &groups[gid as usize];
                stats.push(g.label.y, g.label.p, g.count);
            }
        }
        if stats.is_empty() {
            continue;
        }
        match loss.optimal_delta(&stats, Some(current_delta)) {
            Ok(delta) => {
                if let WorkNode::Leaf { delta: current, .. } = &mut arena[idx] {
                    if (delta - *current).abs() > 1e-12 {
                        *current = delta;
                        changed = true;
                    }
                }
            }
            Err(err) => sink.report(Report::new(
                Severity::Warning,
                "tree.leaf_refit_divergence",
                err.to_string(),
            )),
        }
    }
    changed
}

fn test_log_loss(tree: &Tree, test_matrix: &SampleMatrix) -> f64 {
    let mut stats = BucketStats::new();
    for group in test_matrix.iter_groups() {
        let adjusted_p = group.label.p + tree.predict(&group.features);
        stats.push(group.label.y, adjusted_p, group.count);
    }
    Loss::LogLoss.bucket_loss(&stats, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NullSink;
    use crate::split::NegativeGainPolicy;

    fn lines_matrix(lines: &[&str]) -> SampleMatrix {
        SampleMatrix::load(lines.join("\n").as_bytes(), &NullSink).unwrap()
    }

    #[test]
    fn max_iterations_zero_returns_warm_start_unchanged() {
        let matrix = lines_matrix(&["1 1", "0 2"]);
        let config = TreeLearnerConfig::builder().max_iterations(0).build().unwrap();
        let learner = TreeLearner::new(&matrix, config);
        let warm_start = Tree::leaf(3.0);
        let cancel = CancelToken::new();
        let tree = learner
            .train(&warm_start, &matrix, &cancel, &NullSink)
            .unwrap();
        assert_eq!(tree, warm_start);
    }

    #[test]
    fn and_separable_training_finds_a_positive_gain_split() {
        let mut lines = Vec::new();
        lines.extend(std::iter::repeat("0".to_string()).take(10));
        lines.extend(std::iter::repeat("0 1".to_string()).take(10));
        lines.extend(std::iter::repeat("0 2".to_string()).take(10));
        lines.extend(std::iter::repeat("1 1 2".to_string()).take(10));
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let matrix = lines_matrix(&refs);

        let config = TreeLearnerConfig::builder()
            .step_depth(1)
            .check_depth(1)
            .max_iterations(2)
            .min_cover(0.01)
            .negative_gain_policy(NegativeGainPolicy::Forbid)
            .build()
            .unwrap();
        let learner = TreeLearner::new(&matrix, config);
        let cancel = CancelToken::new();
        let tree = learner
            .train(&Tree::leaf(0.0), &matrix, &cancel, &NullSink)
            .unwrap();
        assert!(!tree.is_leaf());
    }

    #[test]
    fn squared_loss_constant_target_converges_near_one() {
        let lines: Vec<String> = std::iter::repeat("1".to_string()).take(100).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let matrix = lines_matrix(&refs);

        let config = TreeLearnerConfig::builder()
            .log_loss_probability(0.0)
            .max_iterations(1)
            .build()
            .unwrap();
        let learner = TreeLearner::new(&matrix, config);
        let cancel = CancelToken::new();
        let tree = learner
            .train(&Tree::leaf(0.0), &matrix, &cancel, &NullSink)
            .unwrap();
        assert!(tree.is_leaf());
        if let Tree::Leaf(delta) = tree {
            assert!((delta - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn cancelling_before_training_returns_the_warm_start() {
        let matrix = lines_matrix(&["1 1", "0 2"]);
        let config = TreeLearnerConfig::builder().build().unwrap();
        let learner = TreeLearner::new(&matrix, config);
        let cancel = CancelToken::new();
        cancel.cancel();
        let tree = learner
            .train(&Tree::leaf(0.25), &matrix, &cancel, &NullSink)
            .unwrap();
        assert_eq!(tree, Tree::leaf(0.25));
    }
}
