use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::genome::Genome;
use crate::series::{DailySeries, PricePoint, aggregate_daily};
use crate::simulator::StrategyConfig;

/// Number of distinct strategies returned by a run.
pub const TOP_STRATEGIES: usize = 3;
/// Parents are drawn from this leading share of the ranked population.
const PARENT_POOL_FRACTION: f64 = 0.4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerParams {
    pub population_size: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub elitism_count: usize,
    /// Genomes evaluated between cancellation checks.
    pub batch_size: usize,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 500,
            mutation_rate: 0.1,
            elitism_count: 2,
            batch_size: 10,
        }
    }
}

impl OptimizerParams {
    pub fn validate(&self) -> Result<()> {
        if self.population_size == 0 {
            return Err(Error::InvalidOptimizer(
                "population size must be >= 1".to_string(),
            ));
        }
        if self.generations == 0 {
            return Err(Error::InvalidOptimizer(
                "generations must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(Error::InvalidOptimizer(format!(
                "mutation rate must be within [0, 1], got {}",
                self.mutation_rate
            )));
        }
        if self.elitism_count > self.population_size {
            return Err(Error::InvalidOptimizer(format!(
                "elitism count {} exceeds population size {}",
                self.elitism_count, self.population_size
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidOptimizer(
                "batch size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared stop flag, checked between evaluation batches.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    /// 0..=100
    pub percent: f64,
    /// 1-based.
    pub generation: usize,
    pub best_fitness: f64,
}

#[derive(Clone, Debug)]
pub struct OptimizationOutcome {
    /// Ranked best first, pairwise distinct after quantization.
    pub top: Vec<Genome>,
    pub generations_completed: usize,
    pub evaluations: usize,
    pub cancelled: bool,
}

struct BatchRun {
    evaluated: usize,
    cancelled: bool,
}

/// Evaluates unevaluated genomes batch by batch, in parallel within a batch.
/// Elites carried over from the previous generation keep their fitness.
fn evaluate_population(
    population: &mut [Genome],
    series: &DailySeries,
    config: &StrategyConfig,
    batch_size: usize,
    cancel: Option<&CancelToken>,
) -> BatchRun {
    let mut evaluated = 0;
    for (idx, batch) in population.chunks_mut(batch_size).enumerate() {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            debug!(batch = idx, "cancellation observed at batch boundary");
            return BatchRun {
                evaluated,
                cancelled: true,
            };
        }
        evaluated += batch
            .par_iter_mut()
            .filter(|g| !g.is_evaluated())
            .map(|g| {
                g.evaluate(series, config);
                1
            })
            .sum::<usize>();
    }
    BatchRun {
        evaluated,
        cancelled: false,
    }
}

/// Stable: equal fitness keeps population order.
fn rank(population: &mut [Genome]) {
    population.sort_by(|a, b| b.fitness().total_cmp(&a.fitness()));
}

fn parent_pool_size(ranked_len: usize) -> usize {
    ((ranked_len as f64 * PARENT_POOL_FRACTION).ceil() as usize).clamp(1, ranked_len.max(1))
}

fn next_generation(ranked: &[Genome], params: &OptimizerParams, rng: &mut StdRng) -> Vec<Genome> {
    let mut next = Vec::with_capacity(params.population_size);
    next.extend(ranked.iter().take(params.elitism_count).cloned());

    let pool = parent_pool_size(ranked.len());
    while next.len() < params.population_size {
        let a = &ranked[rng.random_range(0..pool)];
        let b = &ranked[rng.random_range(0..pool)];
        let mut child = Genome::crossover(a, b, rng);
        if rng.random_bool(params.mutation_rate) {
            child.mutate(rng);
        }
        next.push(child);
    }
    next
}

/// Walks a ranked population and keeps the first `k` genomes whose quantized
/// genes have not been seen yet.
pub fn top_distinct(ranked: impl IntoIterator<Item = Genome>, k: usize) -> Vec<Genome> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(k);
    for g in ranked {
        if out.len() >= k {
            break;
        }
        if seen.insert(g.quantized_key()) {
            out.push(g);
        }
    }
    out
}

/// Genetic search over tier tables. The raw series is aggregated once and
/// shared read-only by every evaluation; all randomness comes from `seed`.
pub fn optimize<F>(
    series: &[PricePoint],
    config: &StrategyConfig,
    params: &OptimizerParams,
    seed: u64,
    cancel: Option<&CancelToken>,
    mut on_progress: F,
) -> Result<OptimizationOutcome>
where
    F: FnMut(Progress),
{
    params.validate()?;
    config.validate()?;

    let series = aggregate_daily(series);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut population: Vec<Genome> = (0..params.population_size)
        .map(|_| Genome::random(&mut rng))
        .collect();
    let mut previous: Vec<Genome> = Vec::new();
    let mut evaluations = 0_usize;

    info!(
        days = series.len(),
        population = params.population_size,
        generations = params.generations,
        mutation_rate = params.mutation_rate,
        elitism = params.elitism_count,
        seed,
        "starting genetic optimization"
    );

    for generation in 0..params.generations {
        let run = evaluate_population(
            &mut population,
            &series,
            config,
            params.batch_size,
            cancel,
        );
        evaluations += run.evaluated;

        if run.cancelled {
            let mut candidates: Vec<Genome> = previous
                .into_iter()
                .chain(population.into_iter().filter(Genome::is_evaluated))
                .collect();
            rank(&mut candidates);
            warn!(
                generations_completed = generation,
                evaluations, "optimization cancelled, returning best so far"
            );
            return Ok(OptimizationOutcome {
                top: top_distinct(candidates, TOP_STRATEGIES),
                generations_completed: generation,
                evaluations,
                cancelled: true,
            });
        }

        rank(&mut population);
        let best_fitness = population[0].fitness();
        debug!(
            generation = generation + 1,
            best_fitness,
            evaluated = run.evaluated,
            "generation ranked"
        );
        on_progress(Progress {
            percent: (generation + 1) as f64 / params.generations as f64 * 100.0,
            generation: generation + 1,
            best_fitness,
        });

        if generation + 1 < params.generations {
            let next = next_generation(&population, params, &mut rng);
            previous = std::mem::replace(&mut population, next);
        }
    }

    rank(&mut population);
    let top = top_distinct(population, TOP_STRATEGIES);
    info!(
        evaluations,
        best_fitness = top.first().map(Genome::fitness).unwrap_or(0.0),
        "optimization finished"
    );
    Ok(OptimizationOutcome {
        top,
        generations_completed: params.generations,
        evaluations,
        cancelled: false,
    })
}
