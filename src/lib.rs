//! Backtesting and genetic search for "buy more the further price falls from
//! its all-time high" DCA strategies.
//!
//! Raw ticks are collapsed into a [`DailySeries`], replayed by [`simulate`]
//! against a [`TierTable`], and tier tables are searched by [`optimize`] over
//! band-encoded [`Genome`]s.

pub mod config;
pub mod error;
pub mod genome;
pub mod logging;
pub mod optimizer;
pub mod series;
pub mod simulator;
pub mod tiers;

pub use error::{Error, Result};
pub use genome::{Genome, GenomeMetrics};
pub use optimizer::{CancelToken, OptimizationOutcome, OptimizerParams, Progress, optimize};
pub use series::{DailySeries, PricePoint, aggregate_daily};
pub use simulator::{
    SimulationEvent, SimulationOptions, SimulationResult, StrategyConfig, simulate,
};
pub use tiers::{DrawdownTier, TierTable, resolve_multiplier};
