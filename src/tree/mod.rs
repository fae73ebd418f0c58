//! Decision tree model and the learner that grows it.

mod config;
mod learner;
mod node;

pub use config::{TreeLearnerConfig, TreeLearnerConfigBuilder};
pub use learner::TreeLearner;
pub use node::{PresenceTable, Tree};
