//! Epsilon-greedy builder selection.
//!
//! With probability `exploit_ratio` the selector exploits: a fitness-
//! proportional roulette wheel over the whole population (uniform when the
//! pool has no fitness yet). Otherwise it explores: a uniform pick among the
//! newest generation, so fresh children get a chance to earn a score.

use rand::Rng;
use serde::Serialize;

use buildpool_types::builder::Builder;
use buildpool_types::config::SelectionConfig;
use buildpool_types::error::PoolError;

use super::Population;

/// Which branch produced a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionBranch {
    /// Fitness-proportional roulette.
    Exploit,
    /// Exploitation with zero total fitness, resolved uniformly.
    UniformFallback,
    /// Uniform pick among the newest generation.
    Explore,
}

impl std::fmt::Display for SelectionBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionBranch::Exploit => write!(f, "exploit"),
            SelectionBranch::UniformFallback => write!(f, "uniform-fallback"),
            SelectionBranch::Explore => write!(f, "explore"),
        }
    }
}

/// A selected builder and how it was chosen.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub builder: &'a Builder,
    pub branch: SelectionBranch,
}

/// Stateless epsilon-greedy selector. Never mutates the population.
#[derive(Debug, Clone)]
pub struct Selector {
    config: SelectionConfig,
}

impl Selector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    /// Pick exactly one builder.
    ///
    /// # Errors
    ///
    /// [`PoolError::EmptyPopulation`] if there is nothing to select.
    pub fn select<'a, R: Rng + ?Sized>(
        &self,
        population: &'a Population,
        rng: &mut R,
    ) -> Result<Selection<'a>, PoolError> {
        if population.is_empty() {
            return Err(PoolError::EmptyPopulation);
        }

        let u: f64 = rng.r#gen();
        if u < self.config.exploit_ratio {
            self.exploit(population, rng)
        } else {
            let builder = self.explore(population, rng)?;
            Ok(Selection {
                builder,
                branch: SelectionBranch::Explore,
            })
        }
    }

    /// Exploitation branch: roulette wheel, or uniform when total fitness is
    /// indistinguishable from zero.
    pub fn exploit<'a, R: Rng + ?Sized>(
        &self,
        population: &'a Population,
        rng: &mut R,
    ) -> Result<Selection<'a>, PoolError> {
        let builders = population.builders();
        if builders.is_empty() {
            return Err(PoolError::EmptyPopulation);
        }

        // Scores near f64::MAX can overflow the sum; the wheel is then
        // measured in units of the largest score.
        let mut unit = 1.0;
        let mut total: f64 = builders.iter().map(wheel_weight).sum();
        if !total.is_finite() {
            unit = builders.iter().map(wheel_weight).fold(0.0, f64::max);
            total = builders.iter().map(|b| wheel_weight(b) / unit).sum();
        }

        if total < self.config.zero_fitness_epsilon {
            let index = rng.gen_range(0..builders.len());
            return Ok(Selection {
                builder: &builders[index],
                branch: SelectionBranch::UniformFallback,
            });
        }

        let r = rng.gen_range(0.0..total);
        let builder =
            scaled_roulette_pick(builders, r, unit).ok_or(PoolError::EmptyPopulation)?;
        Ok(Selection {
            builder,
            branch: SelectionBranch::Exploit,
        })
    }

    /// Exploration branch: uniform among builders of the maximum generation.
    pub fn explore<'a, R: Rng + ?Sized>(
        &self,
        population: &'a Population,
        rng: &mut R,
    ) -> Result<&'a Builder, PoolError> {
        let max_generation = population
            .max_generation()
            .ok_or(PoolError::EmptyPopulation)?;

        let newest: Vec<&Builder> = population
            .iter()
            .filter(|b| b.generation == max_generation)
            .collect();

        match newest.as_slice() {
            [only] => Ok(*only),
            candidates => Ok(candidates[rng.gen_range(0..candidates.len())]),
        }
    }
}

/// Single-pass roulette wheel.
///
/// Accumulates fitness in population order and returns the first builder
/// with positive fitness whose cumulative sum reaches `r`. Builders with no
/// fitness own no slice of the wheel. If rounding leaves `r` just above the
/// final sum, the last positive-fitness builder is returned.
pub fn roulette_pick(builders: &[Builder], r: f64) -> Option<&Builder> {
    scaled_roulette_pick(builders, r, 1.0)
}

/// Roulette over fitness divided by `unit`; `r` is in the same units.
fn scaled_roulette_pick(builders: &[Builder], r: f64, unit: f64) -> Option<&Builder> {
    let mut cumulative = 0.0;
    let mut last_positive = None;

    for builder in builders {
        let weight = wheel_weight(builder);
        if weight <= 0.0 {
            continue;
        }
        cumulative += weight / unit;
        last_positive = Some(builder);
        if cumulative >= r {
            return Some(builder);
        }
    }

    last_positive
}

/// A builder's slice of the wheel. Non-finite and non-positive scores own
/// none.
fn wheel_weight(builder: &Builder) -> f64 {
    if builder.fitness_score.is_finite() && builder.fitness_score > 0.0 {
        builder.fitness_score
    } else {
        0.0
    }
}
