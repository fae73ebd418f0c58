use crate::concurrency::Concurrency;
use crate::error::VangaError;
use crate::split::{Loss, NegativeGainPolicy};

/// Growth controls for one [`super::TreeLearner`] session.
#[derive(Debug, Clone)]
pub struct TreeLearnerConfig {
    step_depth: usize,
    check_depth: usize,
    max_iterations: usize,
    min_cover: f64,
    negative_gain_policy: NegativeGainPolicy,
    gain_check_bags: usize,
    bag_count: usize,
    log_loss_probability: f64,
    seed: Option<u64>,
    concurrency: Concurrency,
}

impl TreeLearnerConfig {
    pub fn builder() -> TreeLearnerConfigBuilder {
        TreeLearnerConfigBuilder::default()
    }

    pub fn step_depth(&self) -> usize {
        self.step_depth
    }

    pub fn check_depth(&self) -> usize {
        self.check_depth
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn min_cover(&self) -> f64 {
        self.min_cover
    }

    pub fn negative_gain_policy(&self) -> NegativeGainPolicy {
        self.negative_gain_policy
    }

    pub fn gain_check_bags(&self) -> usize {
        self.gain_check_bags
    }

    pub fn bag_count(&self) -> usize {
        self.bag_count
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Draws the loss to use for one iteration, alternating between
    /// log-loss and squared deviation according to
    /// `log_loss_probability`. `rng` must be seeded from `self.seed()`;
    /// `build()` refuses to construct a config that would need alternation
    /// without one — no silent time-based seed fallback.
    pub fn choose_loss(&self, rng: &mut impl rand::Rng) -> Loss {
        if self.log_loss_probability >= 1.0 {
            Loss::LogLoss
        } else if self.log_loss_probability <= 0.0 {
            Loss::SquaredDeviation
        } else if rng.gen_bool(self.log_loss_probability) {
            Loss::LogLoss
        } else {
            Loss::SquaredDeviation
        }
    }
}

/// Builder for [`TreeLearnerConfig`], following the same private-fields /
/// `Option<T>` / fluent-setter / validating-`build()` shape used throughout
/// this crate's other hyperparameter structs.
#[derive(Debug, Clone, Default)]
pub struct TreeLearnerConfigBuilder {
    step_depth: Option<usize>,
    check_depth: Option<usize>,
    max_iterations: Option<usize>,
    min_cover: Option<f64>,
    negative_gain_policy: Option<NegativeGainPolicy>,
    gain_check_bags: Option<usize>,
    bag_count: Option<usize>,
    log_loss_probability: Option<f64>,
    seed: Option<u64>,
    concurrency: Option<Concurrency>,
}

impl TreeLearnerConfigBuilder {
    pub fn step_depth(mut self, value: usize) -> Self {
        assert!(value >= 1, "step_depth must be at least 1");
        self.step_depth = Some(value);
        self
    }

    pub fn check_depth(mut self, value: usize) -> Self {
        assert!(value >= 1, "check_depth must be at least 1");
        self.check_depth = Some(value);
        self
    }

    pub fn max_iterations(mut self, value: usize) -> Self {
        self.max_iterations = Some(value);
        self
    }

    pub fn min_cover(mut self, value: f64) -> Self {
        assert!((0.0..1.0).contains(&value), "min_cover must be in [0, 1)");
        self.min_cover = Some(value);
        self
    }

    pub fn negative_gain_policy(mut self, value: NegativeGainPolicy) -> Self {
        self.negative_gain_policy = Some(value);
        self
    }

    pub fn gain_check_bags(mut self, value: usize) -> Self {
        self.gain_check_bags = Some(value);
        self
    }

    pub fn bag_count(mut self, value: usize) -> Self {
        assert!(value >= 1, "bag_count must be at least 1");
        self.bag_count = Some(value);
        self
    }

    pub fn log_loss_probability(mut self, value: f64) -> Self {
        self.log_loss_probability = Some(value);
        self
    }

    pub fn seed(mut self, value: u64) -> Self {
        self.seed = Some(value);
        self
    }

    pub fn concurrency(mut self, value: Concurrency) -> Self {
        self.concurrency = Some(value);
        self
    }

    pub fn build(self) -> Result<TreeLearnerConfig, VangaError> {
        let step_depth = self.step_depth.unwrap_or(1);
        let check_depth = self.check_depth.unwrap_or(step_depth);
        if check_depth < step_depth {
            return Err(VangaError::InvalidArgument(format!(
                "check_depth ({check_depth}) must be at least step_depth ({step_depth})"
            )));
        }

        let log_loss_probability = self.log_loss_probability.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&log_loss_probability) {
            return Err(VangaError::InvalidArgument(
                "log_loss_probability must be in [0, 1]".into(),
            ));
        }
        let alternates = log_loss_probability > 0.0 && log_loss_probability < 1.0;
        if alternates && self.seed.is_none() {
            return Err(VangaError::InvalidArgument(
                "metric alternation requires an explicit seed; no time-based fallback".into(),
            ));
        }

        let bag_count = self.bag_count.unwrap_or(1);
        let gain_check_bags = self.gain_check_bags.unwrap_or(0);
        if gain_check_bags >= bag_count && gain_check_bags != 0 {
            return Err(VangaError::InvalidArgument(format!(
                "gain_check_bags ({gain_check_bags}) must leave at least one bag for delta computation out of {bag_count}"
            )));
        }

        let concurrency = self.concurrency.unwrap_or_default();

        Ok(TreeLearnerConfig {
            step_depth,
            check_depth,
            max_iterations: self.max_iterations.unwrap_or(usize::MAX),
            min_cover: self.min_cover.unwrap_or(0.0),
            negative_gain_policy: self
                .negative_gain_policy
                .unwrap_or(NegativeGainPolicy::Forbid),
            gain_check_bags,
            bag_count,
            log_loss_probability,
            seed: self.seed,
            concurrency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TreeLearnerConfig::builder().build().unwrap();
        assert_eq!(config.bag_count(), 1);
        assert_eq!(config.step_depth(), 1);
    }

    #[test]
    fn alternation_without_seed_is_rejected() {
        let result = TreeLearnerConfig::builder()
            .log_loss_probability(0.5)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn alternation_with_seed_is_accepted() {
        let result = TreeLearnerConfig::builder()
            .log_loss_probability(0.5)
            .seed(7)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn check_depth_below_step_depth_is_rejected() {
        let result = TreeLearnerConfig::builder()
            .step_depth(3)
            .check_depth(2)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn pure_log_loss_never_needs_a_seed() {
        let result = TreeLearnerConfig::builder().log_loss_probability(1.0).build();
        assert!(result.is_ok());
    }
}
