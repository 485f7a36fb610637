//! Workload generation and experiment orchestration.
//!
//! The binary in this crate drives whole experiments: generate a skewed
//! workload once, then for each materialization budget let the weight engine
//! pick a field set, mutate a private store copy, execute the workload and
//! append result artifacts. All of it is synchronous and single-threaded;
//! measurement accuracy comes from doing one thing at a time.

pub mod cache;
pub mod driver;
pub mod generate;
pub mod results;

pub use cache::TimingCache;
pub use driver::{ExperimentConfig, ExperimentDriver};
pub use generate::{generate, occurrence_counts};
