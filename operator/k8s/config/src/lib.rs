//! Maintains the proxy's configuration `Secret`.
//!
//! The [`Aggregator`] holds the policies produced for each watched resource and periodically
//! writes them, merged with the operator's base configuration, to a single `Secret`. Every
//! successful write is published to subscribers, such as the [`Rollout`] trigger that restarts
//! the proxy's deployments when non-policy settings change.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod aggregator;
mod metrics;
mod rollout;


pub use self::{
    aggregator::{Aggregator, ConfigTarget, Error, SharedAggregator, CONFIG_KEY},
    metrics::{AggregatorMetrics, RolloutMetrics},
    rollout::{Rollout, CHECKSUM_ANNOTATION},
};
