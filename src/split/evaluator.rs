use crate::error::{Report, ReportSink, Severity};
use crate::matrix::Group;
use crate::split::{BucketStats, Loss};

/// What to do with a candidate split whose gain is not an improvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeGainPolicy {
    Allow,
    Forbid,
}

/// A winning (or merely evaluated) split proposal for one leaf and one
/// candidate feature.
#[derive(Debug, Clone, Copy)]
pub struct SplitCandidate {
    pub feature_id: u32,
    pub gain: f64,
    pub delta_yes: f64,
    pub delta_no: f64,
}

/// Evaluates candidate splits for a fixed parent partition of groups.
#[derive(Debug, Clone, Copy)]
pub struct SplitEvaluator {
    pub loss: Loss,
    pub min_cover: f64,
    pub negative_gain_policy: NegativeGainPolicy,
}

impl SplitEvaluator {
    pub fn new(loss: Loss, min_cover: f64, negative_gain_policy: NegativeGainPolicy) -> Self {
        Self {
            loss,
            min_cover,
            negative_gain_policy,
        }
    }

    /// Evaluates feature `feature_id` as a split of the groups in `bags`
    /// (each inner slice is one bag's groups for the leaf under
    /// consideration). Gains are aggregated across bags on the combined
    /// sufficient statistics, never per-bag-then-averaged.
    ///
    /// `parent_warm_start` is the leaf's own delta before this candidate
    /// split is considered, used as the Newton initializer for the parent
    /// bucket's re-evaluation; pass `None` when the leaf has no established
    /// delta yet. The new `yes`/`no` buckets a split would create have no
    /// prior delta of their own and always start cold.
    ///
    /// Returns `None` when the candidate is discarded outright (every
    /// bucket's cover below `min_cover`); returns `Some` with
    /// `gain = f64::NEG_INFINITY` when Newton divergence makes the bucket's
    /// delta unusable: the candidate is treated as `gain = -∞` and the
    /// session continues.
    pub fn evaluate(
        &self,
        bags: &[&[&Group]],
        feature_id: u32,
        parent_warm_start: Option<f64>,
        sink: &dyn ReportSink,
    ) -> Option<SplitCandidate> {
        let mut parent_stats = BucketStats::new();
        let mut yes_stats = BucketStats::new();
        let mut no_stats = BucketStats::new();

        for bag in bags {
            for group in *bag {
                parent_stats.push(group.label.y, group.label.p, group.count);
                if group.features.contains(feature_id) {
                    yes_stats.push(group.label.y, group.label.p, group.count);
                } else {
                    no_stats.push(group.label.y, group.label.p, group.count);
                }
            }
        }

        let total = parent_stats.total_count();
        if total == 0 {
            return None;
        }
        let cover_yes = yes_stats.total_count() as f64 / total as f64;
        let cover_no = no_stats.total_count() as f64 / total as f64;
        if cover_yes < self.min_cover && cover_no < self.min_cover {
            return None;
        }

        let parent_delta = match self.loss.optimal_delta(&parent_stats, parent_warm_start) {
            Ok(d) => d,
            Err(err) => {
                sink.report(Report::new(
                    Severity::Warning,
                    "split.newton_divergence",
                    format!("feature {feature_id}: parent bucket: {err}"),
                ));
                return None;
            }
        };
        let parent_loss = self.loss.bucket_loss(&parent_stats, parent_delta);

        let (delta_yes, yes_loss) =
            self.resolve_bucket(&yes_stats, feature_id, "yes", sink);
        let (delta_no, no_loss) = self.resolve_bucket(&no_stats, feature_id, "no", sink);

        let gain = if yes_loss.is_infinite() || no_loss.is_infinite() {
            f64::NEG_INFINITY
        } else {
            parent_loss - (yes_loss + no_loss)
        };

        if gain <= 0.0 && self.negative_gain_policy == NegativeGainPolicy::Forbid {
            return None;
        }

        Some(SplitCandidate {
            feature_id,
            gain,
            delta_yes,
            delta_no,
        })
    }

    fn resolve_bucket(
        &self,
        stats: &BucketStats,
        feature_id: u32,
        side: &str,
        sink: &dyn ReportSink,
    ) -> (f64, f64) {
        if stats.is_empty() {
            return (0.0, 0.0);
        }
        match self.loss.optimal_delta(stats, None) {
            Ok(delta) => (delta, self.loss.bucket_loss(stats, delta)),
            Err(err) => {
                sink.report(Report::new(
                    Severity::Warning,
                    "split.newton_divergence",
                    format!("feature {feature_id}: {side} bucket: {err}"),
                ));
                (0.0, f64::INFINITY)
            }
        }
    }
}

/// Picks the best candidate by `(gain, feature_id)`: the larger gain wins,
/// ties within a relative tolerance of `1e-9` go to the smaller feature id —
/// the sole source of determinism under fixed bag assignment.
pub fn select_best(candidates: impl IntoIterator<Item = SplitCandidate>) -> Option<SplitCandidate> {
    const RELATIVE_TOLERANCE: f64 = 1e-9;

    candidates.into_iter().fold(None, |best, candidate| {
        match best {
            None => Some(candidate),
            Some(current) => {
                let scale = current.gain.abs().max(candidate.gain.abs()).max(1.0);
                let diff = candidate.gain - current.gain;
                if diff > scale * RELATIVE_TOLERANCE {
                    Some(candidate)
                } else if diff < -scale * RELATIVE_TOLERANCE {
                    Some(current)
                } else if candidate.feature_id < current.feature_id {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        }
    })
}
