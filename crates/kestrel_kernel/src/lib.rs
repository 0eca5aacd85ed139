//! Statement pipeline over the sharding core.
//!
//! A [`ShardingKernel`] takes one bound logic statement through routing
//! against the current rule snapshot, token rewriting into per-unit SQL,
//! parallel dispatch through a caller-supplied [`ShardExecutor`], and the
//! merge of the returned cursors into one [`kestrel_merge::MergedResult`].

pub mod config;
pub mod executor;
pub mod kernel;

pub use config::KernelConfig;
pub use executor::ShardExecutor;
pub use kernel::{ExecutionPlan, ShardingKernel};
