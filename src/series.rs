use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Timestamps below this are read as unix seconds, at or above as milliseconds.
const MILLIS_CUTOFF: i64 = 100_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }

    /// UTC calendar date of the observation.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// One observation per UTC calendar day, strictly ascending by date.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DailySeries(Vec<PricePoint>);

impl DailySeries {
    pub fn points(&self) -> &[PricePoint] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<PricePoint> {
        self.0
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.0.first().map(PricePoint::date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.0.last().map(PricePoint::date)
    }
}

impl Deref for DailySeries {
    type Target = [PricePoint];

    fn deref(&self) -> &[PricePoint] {
        &self.0
    }
}

/// Collapses raw ticks into one point per UTC day, keeping the chronologically
/// last tick of each day. Ticks sharing an exact timestamp resolve to the one
/// that appears later in the input.
pub fn aggregate_daily(points: &[PricePoint]) -> DailySeries {
    let mut by_day: BTreeMap<NaiveDate, (usize, PricePoint)> = BTreeMap::new();
    for (idx, p) in points.iter().enumerate() {
        by_day
            .entry(p.date())
            .and_modify(|(kept_idx, kept)| {
                if (p.timestamp, idx) > (kept.timestamp, *kept_idx) {
                    *kept_idx = idx;
                    *kept = *p;
                }
            })
            .or_insert((idx, *p));
    }
    DailySeries(by_day.into_values().map(|(_, p)| p).collect())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let v = raw.trim().parse::<i64>().ok()?;
    if v >= MILLIS_CUTOFF {
        DateTime::from_timestamp_millis(v)
    } else {
        DateTime::from_timestamp(v, 0)
    }
}

/// Reads `timestamp,price` rows (header required). Rows that fail to parse or
/// carry a non-positive price are skipped.
pub fn load_prices_from_csv(path: &Path) -> Result<Vec<PricePoint>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open csv: {}", path.display()))?;

    let mut points = Vec::new();
    let mut skipped = 0_usize;
    for rec in rdr.records() {
        let Ok(r) = rec else {
            skipped += 1;
            continue;
        };
        let ts = r.get(0).and_then(parse_timestamp);
        let price = r.get(1).and_then(|x| x.parse::<f64>().ok());
        match (ts, price) {
            (Some(timestamp), Some(price)) if price.is_finite() && price > 0.0 => {
                points.push(PricePoint { timestamp, price });
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, path = %path.display(), "skipped malformed price rows");
    }
    debug!(rows = points.len(), path = %path.display(), "loaded price rows");
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn empty_input_gives_empty_series() {
        assert!(aggregate_daily(&[]).is_empty());
    }

    #[test]
    fn keeps_last_tick_of_each_day_and_sorts() {
        let raw = vec![
            PricePoint::new(at(2024, 1, 2, 18), 12.0),
            PricePoint::new(at(2024, 1, 1, 23), 11.0),
            PricePoint::new(at(2024, 1, 2, 6), 99.0),
            PricePoint::new(at(2024, 1, 1, 1), 10.0),
        ];
        let series = aggregate_daily(&raw);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].price, 11.0);
        assert_eq!(series[1].price, 12.0);
        assert!(series.windows(2).all(|w| w[0].date() < w[1].date()));
    }

    #[test]
    fn identical_timestamps_prefer_later_input() {
        let raw = vec![
            PricePoint::new(at(2024, 3, 1, 12), 1.0),
            PricePoint::new(at(2024, 3, 1, 12), 2.0),
        ];
        assert_eq!(aggregate_daily(&raw)[0].price, 2.0);
    }

    #[test]
    fn loads_csv_in_seconds_and_millis() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,price").unwrap();
        writeln!(file, "1704067200000,42000.5").unwrap();
        writeln!(file, "1704153600,43000").unwrap();
        writeln!(file, "garbage,1").unwrap();
        writeln!(file, "1704240000,-5").unwrap();
        file.flush().unwrap();

        let points = load_prices_from_csv(file.path()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(points[1].date(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(points[1].price, 43000.0);
    }
}
