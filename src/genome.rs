use chrono::NaiveDate;
use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::series::DailySeries;
use crate::simulator::{SimulationOptions, SimulationResult, StrategyConfig, simulate};
use crate::tiers::{DrawdownTier, TierTable};

pub const GENE_MIN: f64 = 1.0;
pub const GENE_MAX: f64 = 3.0;
/// Quantization step for sampled genes and for duplicate detection.
pub const GENE_STEP: f64 = 0.1;
const GENE_PRECISION: i32 = 1;

/// The composite band owns drawdowns of 5..=9 percent.
const SHALLOW_BAND_PCT: (u32, u32) = (5, 9);
/// One band per whole percent from here down to the maximum depth.
const DEEP_BAND_PCT: (u32, u32) = (10, 30);

pub const GENOME_LEN: usize = 1 + (DEEP_BAND_PCT.1 - DEEP_BAND_PCT.0 + 1) as usize;

/// A contiguous range of whole-percent drawdown thresholds sharing one gene.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthBand {
    pub shallowest_pct: u32,
    pub deepest_pct: u32,
}

impl DepthBand {
    /// Thresholds owned by the band, deepest (most negative) first.
    pub fn thresholds(&self) -> impl Iterator<Item = f64> {
        (self.shallowest_pct..=self.deepest_pct)
            .rev()
            .map(|pct| -(pct as f64) / 100.0)
    }
}

/// Bands ordered shallow to deep; band `i` is driven by gene `i`.
pub fn depth_bands() -> Vec<DepthBand> {
    let mut bands = vec![DepthBand {
        shallowest_pct: SHALLOW_BAND_PCT.0,
        deepest_pct: SHALLOW_BAND_PCT.1,
    }];
    bands.extend((DEEP_BAND_PCT.0..=DEEP_BAND_PCT.1).map(|pct| DepthBand {
        shallowest_pct: pct,
        deepest_pct: pct,
    }));
    bands
}

/// Expands one multiplier per band into a full tier table.
pub fn decode(genes: &[f64]) -> TierTable {
    let bands = depth_bands();
    let mut tiers = Vec::new();
    for (band, &gene) in bands.iter().zip(genes).rev() {
        tiers.extend(band.thresholds().map(|t| DrawdownTier::new(t, gene)));
    }
    TierTable::from_sorted_unchecked(tiers)
}

/// Reporting subset of a simulation result, cached on each genome.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenomeMetrics {
    pub total_invested: f64,
    pub total_units: f64,
    pub average_cost: f64,
    pub final_value_at_latest_price: f64,
    pub roi_at_latest_price: f64,
    pub roi_at_last_event: f64,
    pub max_drawdown_observed: f64,
    pub depleted: bool,
    pub depletion_date: Option<NaiveDate>,
    pub active_span_days: i64,
    pub active_start_date: Option<NaiveDate>,
    pub active_end_date: Option<NaiveDate>,
}

impl From<&SimulationResult> for GenomeMetrics {
    fn from(r: &SimulationResult) -> Self {
        Self {
            total_invested: r.total_invested,
            total_units: r.total_units,
            average_cost: r.average_cost,
            final_value_at_latest_price: r.final_value_at_latest_price,
            roi_at_latest_price: r.roi_at_latest_price,
            roi_at_last_event: r.roi_at_last_event,
            max_drawdown_observed: r.max_drawdown_observed,
            depleted: r.depleted,
            depletion_date: r.depletion_date,
            active_span_days: r.active_span_days,
            active_start_date: r.active_start_date,
            active_end_date: r.active_end_date,
        }
    }
}

/// Candidate strategy: one non-decreasing multiplier per depth band.
#[derive(Clone, Debug)]
pub struct Genome {
    genes: Vec<f64>,
    fitness: f64,
    tiers: TierTable,
    metrics: Option<GenomeMetrics>,
}

impl Genome {
    pub fn from_genes(genes: Vec<f64>) -> Result<Self> {
        if genes.len() != GENOME_LEN {
            return Err(Error::GenomeLength {
                expected: GENOME_LEN,
                got: genes.len(),
            });
        }
        for (index, &value) in genes.iter().enumerate() {
            if !(GENE_MIN..=GENE_MAX).contains(&value) {
                return Err(Error::GeneOutOfRange {
                    index,
                    value,
                    low: GENE_MIN,
                    high: GENE_MAX,
                });
            }
            if index > 0 && value < genes[index - 1] {
                return Err(Error::UnsortedGenes(index));
            }
        }
        Ok(Self::from_sorted(genes))
    }

    fn from_sorted(genes: Vec<f64>) -> Self {
        let tiers = decode(&genes);
        Self {
            genes,
            fitness: f64::NEG_INFINITY,
            tiers,
            metrics: None,
        }
    }

    /// Independent uniform draws, quantized, then sorted: always valid.
    pub fn random(rng: &mut StdRng) -> Self {
        let mut genes: Vec<f64> = (0..GENOME_LEN)
            .map(|_| quantize_gene(rng.random_range(GENE_MIN..=GENE_MAX)))
            .collect();
        genes.sort_by(f64::total_cmp);
        Self::from_sorted(genes)
    }

    /// Gene-wise coin flip between the parents, re-sorted.
    pub fn crossover(a: &Genome, b: &Genome, rng: &mut StdRng) -> Self {
        let mut genes: Vec<f64> = a
            .genes
            .iter()
            .zip(&b.genes)
            .map(|(&x, &y)| if rng.random_bool(0.5) { x } else { y })
            .collect();
        genes.sort_by(f64::total_cmp);
        Self::from_sorted(genes)
    }

    /// Resamples one random gene between its neighbours. Returns whether the
    /// genome was touched.
    pub fn mutate(&mut self, rng: &mut StdRng) -> bool {
        let index = rng.random_range(0..self.genes.len());
        self.mutate_at(index, rng)
    }

    pub(crate) fn mutate_at(&mut self, index: usize, rng: &mut StdRng) -> bool {
        let low = if index == 0 {
            GENE_MIN
        } else {
            self.genes[index - 1]
        };
        let high = self.genes.get(index + 1).copied().unwrap_or(GENE_MAX);
        if high <= low {
            return false;
        }

        let v = quantize_gene(rng.random_range(low..=high));
        self.genes[index] = v.clamp(low, high);
        self.tiers = decode(&self.genes);
        self.fitness = f64::NEG_INFINITY;
        self.metrics = None;
        true
    }

    /// Runs a lite simulation and caches ROI at the latest price as fitness.
    pub fn evaluate(&mut self, series: &DailySeries, config: &StrategyConfig) {
        let r = simulate(series, config, &self.tiers, SimulationOptions::lite_canonical());
        self.fitness = r.roi_at_latest_price;
        self.metrics = Some(GenomeMetrics::from(&r));
    }

    pub fn genes(&self) -> &[f64] {
        &self.genes
    }

    pub fn fitness(&self) -> f64 {
        self.fitness
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    pub fn metrics(&self) -> Option<&GenomeMetrics> {
        self.metrics.as_ref()
    }

    pub fn is_evaluated(&self) -> bool {
        self.metrics.is_some()
    }

    /// Genes as whole quantization steps; equal keys mean duplicate strategies.
    pub fn quantized_key(&self) -> Vec<i64> {
        self.genes
            .iter()
            .map(|g| ((g - GENE_MIN) / GENE_STEP).round() as i64)
            .collect()
    }
}

fn quantize_gene(v: f64) -> f64 {
    quantize_f64(v, GENE_MIN, GENE_MAX, GENE_STEP, GENE_PRECISION)
}

fn quantize_f64(v: f64, low: f64, high: f64, step: f64, precision: i32) -> f64 {
    let c = v.clamp(low, high);
    let n = ((c - low) / step).round();
    round_to((low + n * step).clamp(low, high), precision)
}

fn round_to(v: f64, digits: i32) -> f64 {
    let f = 10_f64.powi(digits);
    (v * f).round() / f
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn is_monotone(genes: &[f64]) -> bool {
        genes.windows(2).all(|w| w[0] <= w[1])
    }

    fn is_quantized(g: f64) -> bool {
        ((g - GENE_MIN) / GENE_STEP - ((g - GENE_MIN) / GENE_STEP).round()).abs() < 1e-9
    }

    #[test]
    fn bands_partition_five_to_thirty_percent() {
        let bands = depth_bands();
        assert_eq!(bands.len(), GENOME_LEN);
        assert_eq!(GENOME_LEN, 22);
        assert_eq!(bands[0].thresholds().count(), 5);
        let mut pct: Vec<u32> = bands
            .iter()
            .flat_map(|b| b.shallowest_pct..=b.deepest_pct)
            .collect();
        let n = pct.len();
        pct.dedup();
        assert_eq!(pct.len(), n);
        assert_eq!(pct, (5..=30).collect::<Vec<_>>());
    }

    #[test]
    fn decode_assigns_band_gene_to_each_threshold() {
        let genes: Vec<f64> = (0..GENOME_LEN).map(|i| 1.0 + i as f64 * 0.05).collect();
        let table = decode(&genes);
        assert_eq!(table.len(), 26);
        assert!(table.tiers().windows(2).all(|w| w[0].threshold < w[1].threshold));

        assert_eq!(table.resolve(-0.03), 1.0);
        assert_eq!(table.resolve(-0.05), genes[0]);
        assert_eq!(table.resolve(-0.095), genes[0]);
        assert_eq!(table.resolve(-0.10), genes[1]);
        assert_eq!(table.resolve(-0.155), genes[6]);
        assert_eq!(table.resolve(-0.30), genes[21]);
        assert_eq!(table.resolve(-0.85), genes[21]);
    }

    #[test]
    fn random_genomes_are_valid() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let g = Genome::random(&mut rng);
            assert_eq!(g.genes().len(), GENOME_LEN);
            assert!(is_monotone(g.genes()));
            assert!(g.genes().iter().all(|&x| (GENE_MIN..=GENE_MAX).contains(&x)));
            assert!(g.genes().iter().all(|&x| is_quantized(x)));
            assert!(Genome::from_genes(g.genes().to_vec()).is_ok());
        }
    }

    #[test]
    fn crossover_and_mutation_preserve_order() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut pool: Vec<Genome> = (0..20).map(|_| Genome::random(&mut rng)).collect();
        for round in 0..500 {
            let a = &pool[round % pool.len()];
            let b = &pool[(round * 7 + 3) % pool.len()];
            let mut child = Genome::crossover(a, b, &mut rng);
            assert!(is_monotone(child.genes()));
            child.mutate(&mut rng);
            assert!(is_monotone(child.genes()));
            assert!(child.genes().iter().all(|&x| is_quantized(x)));
            pool[round % 20] = child;
        }
    }

    #[test]
    fn mutation_stays_between_neighbours() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut genes = vec![1.5; GENOME_LEN];
        genes[10] = 2.0;
        for g in genes.iter_mut().skip(11) {
            *g = 2.6;
        }
        let mut g = Genome::from_genes(genes).unwrap();
        for _ in 0..100 {
            assert!(g.mutate_at(10, &mut rng));
            let v = g.genes()[10];
            assert!((1.5..=2.6).contains(&v), "{v}");
        }
        assert_eq!(g.tiers(), &decode(g.genes()));
    }

    #[test]
    fn mutation_between_equal_neighbours_is_a_no_op() {
        let mut rng = StdRng::seed_from_u64(4);
        let genes = vec![2.0; GENOME_LEN];
        let mut g = Genome::from_genes(genes.clone()).unwrap();
        assert!(!g.mutate_at(5, &mut rng));
        assert_eq!(g.genes(), genes.as_slice());
    }

    #[test]
    fn from_genes_rejects_invalid_vectors() {
        assert_eq!(
            Genome::from_genes(vec![1.0; 3]).unwrap_err(),
            Error::GenomeLength {
                expected: GENOME_LEN,
                got: 3
            }
        );
        let mut unsorted = vec![1.0; GENOME_LEN];
        unsorted[4] = 2.0;
        assert_eq!(
            Genome::from_genes(unsorted).unwrap_err(),
            Error::UnsortedGenes(5)
        );
        let mut too_big = vec![1.0; GENOME_LEN];
        too_big[GENOME_LEN - 1] = 3.5;
        assert!(matches!(
            Genome::from_genes(too_big),
            Err(Error::GeneOutOfRange { .. })
        ));
    }

    #[test]
    fn quantized_key_ignores_float_noise() {
        let a = Genome::from_genes(vec![1.2; GENOME_LEN]).unwrap();
        let b = Genome::from_genes(vec![1.2000000001; GENOME_LEN]).unwrap();
        assert_eq!(a.quantized_key(), b.quantized_key());
        assert_eq!(a.quantized_key()[0], 2);
    }
}
