use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::optimizer::OptimizerParams;
use crate::simulator::StrategyConfig;
use crate::tiers::{DrawdownTier, TierTable};

const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
const DEFAULT_BASE_AMOUNT: f64 = 100.0;
const DEFAULT_FREQUENCY_DAYS: i64 = 7;

/// Everything a backtest or optimization run needs besides the prices.
#[derive(Clone, Debug, PartialEq)]
pub struct RunParams {
    pub strategy: StrategyConfig,
    pub tiers: TierTable,
    pub optimizer: OptimizerParams,
}

impl RunParams {
    /// Builds typed, validated configs from a loose JSON object. Missing keys
    /// take defaults; missing dates fall back to the span of the price data.
    pub fn from_params(
        params: &Map<String, Value>,
        data_start: NaiveDate,
        data_end: NaiveDate,
    ) -> Result<Self> {
        let strategy = StrategyConfig {
            start_date: get_date(params, "start_date")?.unwrap_or(data_start),
            end_date: get_date(params, "end_date")?.unwrap_or(data_end),
            initial_capital: get_f64(params, "initial_capital", DEFAULT_INITIAL_CAPITAL),
            base_amount: get_f64(params, "base_amount", DEFAULT_BASE_AMOUNT),
            frequency_days: u32::try_from(get_i64(
                params,
                "frequency_days",
                DEFAULT_FREQUENCY_DAYS,
            ))
            .context("frequency_days must be a non-negative integer")?,
        };
        strategy.validate()?;

        let tiers = match params.get("tiers") {
            Some(v) => serde_json::from_value::<Vec<DrawdownTier>>(v.clone())
                .context("tiers must be a list of {threshold, multiplier}")?,
            None => default_tiers(),
        };
        let tiers = TierTable::new(tiers)?;

        let defaults = OptimizerParams::default();
        let optimizer = OptimizerParams {
            population_size: get_usize(params, "population_size", defaults.population_size)?,
            generations: get_usize(params, "generations", defaults.generations)?,
            mutation_rate: get_f64(params, "mutation_rate", defaults.mutation_rate),
            elitism_count: get_usize(params, "elitism_count", defaults.elitism_count)?,
            batch_size: get_usize(params, "batch_size", defaults.batch_size)?,
        };
        optimizer.validate()?;

        Ok(Self {
            strategy,
            tiers,
            optimizer,
        })
    }
}

/// Tier table used when the params file does not supply one.
pub fn default_tiers() -> Vec<DrawdownTier> {
    vec![
        DrawdownTier::new(-0.1, 1.5),
        DrawdownTier::new(-0.2, 2.0),
        DrawdownTier::new(-0.3, 2.5),
        DrawdownTier::new(-0.5, 3.0),
    ]
}

/// Reads a JSON object from disk. A missing path yields an empty object.
pub fn load_params(path: Option<&Path>) -> Result<Map<String, Value>> {
    let Some(path) = path else {
        return Ok(Map::new());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read params: {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse params: {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("params file must hold a JSON object: {}", path.display()),
    }
}

fn get_date(map: &Map<String, Value>, key: &str) -> Result<Option<NaiveDate>> {
    let Some(v) = map.get(key) else {
        return Ok(None);
    };
    let s = v
        .as_str()
        .ok_or_else(|| anyhow!("{key} must be a YYYY-MM-DD string"))?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map(Some)
        .with_context(|| format!("invalid {key}: {s}"))
}

fn get_i64(map: &Map<String, Value>, key: &str, default: i64) -> i64 {
    map.get(key)
        .and_then(|v| {
            if let Some(i) = v.as_i64() {
                Some(i)
            } else {
                v.as_f64().map(|x| x.round() as i64)
            }
        })
        .unwrap_or(default)
}

fn get_usize(map: &Map<String, Value>, key: &str, default: usize) -> Result<usize> {
    let v = get_i64(map, key, default as i64);
    usize::try_from(v).with_context(|| format!("{key} must be non-negative, got {v}"))
}

fn get_f64(map: &Map<String, Value>, key: &str, default: f64) -> f64 {
    map.get(key)
        .and_then(|v| {
            if let Some(f) = v.as_f64() {
                Some(f)
            } else {
                v.as_i64().map(|x| x as f64)
            }
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn as_map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn empty_params_take_defaults() {
        let p = RunParams::from_params(&Map::new(), d(2020, 1, 1), d(2024, 6, 30)).unwrap();
        assert_eq!(p.strategy.start_date, d(2020, 1, 1));
        assert_eq!(p.strategy.end_date, d(2024, 6, 30));
        assert_eq!(p.strategy.initial_capital, 10_000.0);
        assert_eq!(p.strategy.base_amount, 100.0);
        assert_eq!(p.strategy.frequency_days, 7);
        assert_eq!(p.tiers.len(), 4);
        assert_eq!(p.optimizer, OptimizerParams::default());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let params = as_map(json!({
            "start_date": "2021-03-01",
            "end_date": "2021-12-31",
            "initial_capital": 2500,
            "base_amount": 25.5,
            "frequency_days": 1,
            "tiers": [{"threshold": -0.4, "multiplier": 2.0}, {"threshold": 0.0, "multiplier": 1.0}],
            "population_size": 12,
            "generations": 4,
            "mutation_rate": 0.25,
            "elitism_count": 1,
            "batch_size": 3
        }));
        let p = RunParams::from_params(&params, d(2020, 1, 1), d(2024, 1, 1)).unwrap();
        assert_eq!(p.strategy.start_date, d(2021, 3, 1));
        assert_eq!(p.strategy.initial_capital, 2500.0);
        assert_eq!(p.strategy.base_amount, 25.5);
        assert_eq!(p.tiers.tiers()[0].threshold, -0.4);
        assert_eq!(p.tiers.resolve(-0.5), 2.0);
        assert_eq!(p.optimizer.population_size, 12);
        assert_eq!(p.optimizer.batch_size, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            json!({"tiers": [{"threshold": 0.5, "multiplier": 1.0}]}),
            json!({"initial_capital": 0}),
            json!({"frequency_days": -3}),
            json!({"start_date": "yesterday"}),
            json!({"elitism_count": 99, "population_size": 10}),
        ];
        for c in cases {
            assert!(
                RunParams::from_params(&as_map(c.clone()), d(2020, 1, 1), d(2021, 1, 1)).is_err(),
                "{c}"
            );
        }
    }

    #[test]
    fn loads_params_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"base_amount": 42}}"#).unwrap();
        file.flush().unwrap();
        let map = load_params(Some(file.path())).unwrap();
        assert_eq!(map.get("base_amount"), Some(&json!(42)));
        assert!(load_params(None).unwrap().is_empty());

        let mut not_object = tempfile::NamedTempFile::new().unwrap();
        write!(not_object, "[1, 2]").unwrap();
        not_object.flush().unwrap();
        assert!(load_params(Some(not_object.path())).is_err());
    }
}
