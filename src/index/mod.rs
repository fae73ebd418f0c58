//! Inverted feature index over a sample matrix.

mod feature_index;

pub use feature_index::FeatureIndex;
