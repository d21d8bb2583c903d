use std::borrow::Cow;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::series::{PricePoint, aggregate_daily};
use crate::tiers::TierTable;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub base_amount: f64,
    pub frequency_days: u32,
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.end_date < self.start_date {
            return Err(Error::InvalidStrategy(format!(
                "end date {} precedes start date {}",
                self.end_date, self.start_date
            )));
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(Error::InvalidStrategy(format!(
                "initial capital must be > 0, got {}",
                self.initial_capital
            )));
        }
        if !(self.base_amount.is_finite() && self.base_amount > 0.0) {
            return Err(Error::InvalidStrategy(format!(
                "base amount must be > 0, got {}",
                self.base_amount
            )));
        }
        if self.frequency_days == 0 {
            return Err(Error::InvalidStrategy(
                "frequency must be at least 1 day".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulationOptions {
    /// Keep only running aggregates, no per-event ledger.
    pub lite_mode: bool,
    /// Caller guarantees one point per day, ascending; skip aggregation.
    pub series_already_canonical: bool,
}

impl SimulationOptions {
    /// Settings used by the optimizer's inner loop.
    pub fn lite_canonical() -> Self {
        Self {
            lite_mode: true,
            series_already_canonical: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub date: NaiveDate,
    pub price: f64,
    pub running_ath: f64,
    pub drawdown: f64,
    pub multiplier: f64,
    pub amount_invested: f64,
    pub units_acquired: f64,
    pub cumulative_units: f64,
    pub remaining_cash: f64,
    pub was_shortfall: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimulationEvent>,
    pub total_invested: f64,
    pub total_units: f64,
    pub remaining_cash: f64,
    pub average_cost: f64,
    pub final_value_at_latest_price: f64,
    pub final_value_at_last_event: f64,
    pub roi_at_latest_price: f64,
    pub roi_at_last_event: f64,
    pub max_drawdown_observed: f64,
    pub depleted: bool,
    pub depletion_date: Option<NaiveDate>,
    pub active_span_days: i64,
    pub active_start_date: Option<NaiveDate>,
    pub active_end_date: Option<NaiveDate>,
}

/// Everything the fold carries from one day to the next.
#[derive(Clone, Debug)]
struct SimState {
    ath: f64,
    remaining_cash: f64,
    total_units: f64,
    total_invested: f64,
    max_drawdown: f64,
    depletion_date: Option<NaiveDate>,
    first_in_range: Option<NaiveDate>,
    last_in_range: Option<NaiveDate>,
    last_event_price: Option<f64>,
    last_price: Option<f64>,
}

impl SimState {
    fn new(initial_capital: f64) -> Self {
        Self {
            ath: 0.0,
            remaining_cash: initial_capital,
            total_units: 0.0,
            total_invested: 0.0,
            max_drawdown: 0.0,
            depletion_date: None,
            first_in_range: None,
            last_in_range: None,
            last_event_price: None,
            last_price: None,
        }
    }

    /// Advances one day. Returns the investment event when `p` falls on a
    /// scheduled day inside the configured window.
    fn step(
        &mut self,
        p: &PricePoint,
        config: &StrategyConfig,
        tiers: &TierTable,
    ) -> Option<SimulationEvent> {
        self.ath = self.ath.max(p.price);
        self.last_price = Some(p.price);
        let drawdown = if self.ath > 0.0 {
            (p.price - self.ath) / self.ath
        } else {
            0.0
        };

        let date = p.date();
        if date < config.start_date || date > config.end_date {
            return None;
        }
        self.first_in_range.get_or_insert(date);
        self.last_in_range = Some(date);
        self.max_drawdown = self.max_drawdown.min(drawdown);

        let days_since_start = (date - config.start_date).num_days();
        if days_since_start % i64::from(config.frequency_days) != 0 {
            return None;
        }

        let multiplier = tiers.resolve(drawdown);
        let desired = config.base_amount * multiplier;
        let shortfall = self.remaining_cash < desired;
        if shortfall && self.depletion_date.is_none() {
            self.depletion_date = Some(date);
        }
        let amount = if shortfall {
            self.remaining_cash.max(0.0)
        } else {
            desired
        };
        let units = if amount > 0.0 { amount / p.price } else { 0.0 };

        self.remaining_cash = (self.remaining_cash - amount).max(0.0);
        self.total_units += units;
        self.total_invested += amount;
        self.last_event_price = Some(p.price);

        Some(SimulationEvent {
            date,
            price: p.price,
            running_ath: self.ath,
            drawdown,
            multiplier,
            amount_invested: amount,
            units_acquired: units,
            cumulative_units: self.total_units,
            remaining_cash: self.remaining_cash,
            was_shortfall: shortfall,
        })
    }

    fn finish(self, events: Vec<SimulationEvent>) -> SimulationResult {
        let value_latest = self.total_units * self.last_price.unwrap_or(0.0);
        let value_last_event = self.total_units * self.last_event_price.unwrap_or(0.0);
        let active_end_date = self.depletion_date.or(self.last_in_range);
        let active_span_days = match (self.first_in_range, active_end_date) {
            (Some(start), Some(end)) => (end - start).num_days(),
            _ => 0,
        };

        SimulationResult {
            events,
            total_invested: self.total_invested,
            total_units: self.total_units,
            remaining_cash: self.remaining_cash,
            average_cost: if self.total_units > 0.0 {
                self.total_invested / self.total_units
            } else {
                0.0
            },
            final_value_at_latest_price: value_latest,
            final_value_at_last_event: value_last_event,
            roi_at_latest_price: roi(value_latest, self.total_invested),
            roi_at_last_event: roi(value_last_event, self.total_invested),
            max_drawdown_observed: self.max_drawdown,
            depleted: self.depletion_date.is_some(),
            depletion_date: self.depletion_date,
            active_span_days,
            active_start_date: self.first_in_range,
            active_end_date,
        }
    }
}

fn roi(value: f64, invested: f64) -> f64 {
    if invested > 0.0 {
        (value - invested) / invested
    } else {
        0.0
    }
}

/// Replays `series` once, investing `base_amount * multiplier` on every
/// scheduled day. ATH accrues from the first point of the series, including
/// days before `start_date`.
pub fn simulate(
    series: &[PricePoint],
    config: &StrategyConfig,
    tiers: &TierTable,
    options: SimulationOptions,
) -> SimulationResult {
    let series: Cow<'_, [PricePoint]> = if options.series_already_canonical {
        Cow::Borrowed(series)
    } else {
        Cow::Owned(aggregate_daily(series).into_inner())
    };

    let mut state = SimState::new(config.initial_capital);
    let mut events = Vec::new();
    for p in series.iter() {
        if let Some(ev) = state.step(p, config, tiers) {
            if !options.lite_mode {
                events.push(ev);
            }
        }
    }
    state.finish(events)
}
