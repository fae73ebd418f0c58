//! The bagged-timestamp segment store and its featurizer.

pub mod featurizer;
pub mod profile;
pub mod store;

pub use featurizer::{Featurizer, FeaturizerConfig, FeaturizerConfigBuilder, Rule};
pub use profile::{SegmentEntry, SegmentProfile};
pub use store::{SegmentStore, SegmentStoreConfig, SegmentStoreConfigBuilder};
