use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Multiplier applied when no tier covers the current drawdown.
pub const NEUTRAL_MULTIPLIER: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawdownTier {
    pub threshold: f64,
    pub multiplier: f64,
}

impl DrawdownTier {
    pub fn new(threshold: f64, multiplier: f64) -> Self {
        Self {
            threshold,
            multiplier,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.threshold > -1.0 && self.threshold <= 0.0) {
            return Err(Error::InvalidThreshold(self.threshold));
        }
        if !self.multiplier.is_finite() || self.multiplier < 0.0 {
            return Err(Error::InvalidMultiplier(self.multiplier));
        }
        Ok(())
    }

    /// A tier covers `drawdown` once the decline has reached its threshold.
    fn covers(&self, drawdown: f64) -> bool {
        self.threshold >= drawdown
    }
}

fn by_threshold(a: &DrawdownTier, b: &DrawdownTier) -> Ordering {
    a.threshold.total_cmp(&b.threshold)
}

/// Returns the multiplier of the first tier, ascending by threshold, that
/// covers `drawdown`, or [`NEUTRAL_MULTIPLIER`] if none does.
///
/// Sorts a copy of `tiers` on every call; hot loops should build a
/// [`TierTable`] once and call [`TierTable::resolve`].
pub fn resolve_multiplier(drawdown: f64, tiers: &[DrawdownTier]) -> f64 {
    let mut sorted = tiers.to_vec();
    sorted.sort_by(by_threshold);
    first_covering(drawdown, &sorted)
}

fn first_covering(drawdown: f64, sorted: &[DrawdownTier]) -> f64 {
    sorted
        .iter()
        .find(|t| t.covers(drawdown))
        .map(|t| t.multiplier)
        .unwrap_or(NEUTRAL_MULTIPLIER)
}

/// Validated tiers, sorted ascending by threshold once at construction.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TierTable {
    tiers: Vec<DrawdownTier>,
}

impl TierTable {
    pub fn new(mut tiers: Vec<DrawdownTier>) -> Result<Self> {
        for t in &tiers {
            t.validate()?;
        }
        tiers.sort_by(by_threshold);
        Ok(Self { tiers })
    }

    /// Skips validation; the caller builds thresholds from known constants.
    pub(crate) fn from_sorted_unchecked(tiers: Vec<DrawdownTier>) -> Self {
        debug_assert!(tiers.windows(2).all(|w| w[0].threshold <= w[1].threshold));
        Self { tiers }
    }

    pub fn tiers(&self) -> &[DrawdownTier] {
        &self.tiers
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn resolve(&self, drawdown: f64) -> f64 {
        first_covering(drawdown, &self.tiers)
    }
}
