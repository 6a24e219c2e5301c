use crate::config::{ScheduleConfig, ScheduleKind};
use crate::corpus::Seed;
use crate::coverage::PathId;
use log::debug;
use rand_core::RngCore;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("cannot select from an empty population")]
    EmptyPopulation,
}

/// Assigns selection energy to seeds and picks the next one to mutate.
///
/// `choose` is the only entry point the fuzzing loop uses; the default body
/// recomputes every energy and then draws energy-proportionally, so seeds
/// with twice the energy are picked twice as often in expectation.
pub trait PowerSchedule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recomputes `energy` for every seed in the population.
    fn assign_energy(&mut self, population: &mut [Seed]);

    fn choose(
        &mut self,
        population: &mut [Seed],
        rng: &mut dyn RngCore,
    ) -> Result<usize, ScheduleError> {
        if population.is_empty() {
            return Err(ScheduleError::EmptyPopulation);
        }
        self.assign_energy(population);
        Ok(weighted_index(population, rng))
    }

    /// Called once per execution with the path the execution took.
    fn note_execution(&mut self, _path: PathId) {}

    /// Called when an execution revealed new coverage, with the path id of
    /// the newly covered locations.
    fn note_novelty(&mut self, _delta_path: PathId) {}

    /// Number of distinct execution paths seen, when the schedule tracks
    /// them. Drives the optional "Total Paths" status column.
    fn distinct_paths(&self) -> Option<usize> {
        None
    }
}

/// Uniform draw in [0, 1) from the top 53 bits of one `u64`.
fn unit_interval(rng: &mut dyn RngCore) -> f64 {
    (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
}

/// Energy-proportional index selection. A non-positive energy total
/// degenerates to a uniform draw so selection always succeeds.
pub(crate) fn weighted_index(population: &[Seed], rng: &mut dyn RngCore) -> usize {
    let total: f64 = population.iter().map(|s| s.energy.max(0.0)).sum();
    if total <= 0.0 {
        return (rng.next_u64() % population.len() as u64) as usize;
    }
    let mut remaining = unit_interval(rng) * total;
    for (index, seed) in population.iter().enumerate() {
        remaining -= seed.energy.max(0.0);
        if remaining < 0.0 {
            return index;
        }
    }
    population.len() - 1
}

/// Every seed weighs the same.
#[derive(Debug, Default)]
pub struct UniformSchedule;

impl PowerSchedule for UniformSchedule {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn assign_energy(&mut self, population: &mut [Seed]) {
        for seed in population.iter_mut() {
            seed.energy = 1.0;
        }
    }
}

/// Energy equals the size of the coverage set the seed was accepted with.
/// Seeds that exercise more of the target get proportionally more attention.
#[derive(Debug, Default)]
pub struct CoverageSchedule;

impl PowerSchedule for CoverageSchedule {
    fn name(&self) -> &'static str {
        "coverage-size"
    }

    fn assign_energy(&mut self, population: &mut [Seed]) {
        for seed in population.iter_mut() {
            seed.energy = seed.coverage_len as f64;
        }
    }
}

/// Energy is inversely proportional to how often the seed's execution path
/// has been taken, raised to a configurable exponent. Rare paths dominate
/// selection; a larger exponent sharpens the preference.
#[derive(Debug)]
pub struct PathSchedule {
    exponent: f64,
    path_frequency: HashMap<PathId, u64>,
}

impl PathSchedule {
    pub fn new(exponent: f64) -> Self {
        Self {
            exponent,
            path_frequency: HashMap::new(),
        }
    }

    fn frequency(&self, path: PathId) -> u64 {
        match self.path_frequency.get(&path) {
            Some(count) => (*count).max(1),
            None => {
                // A seed whose path was never reported keeps neutral weight.
                debug!("no frequency recorded for path {path}, using 1");
                1
            }
        }
    }
}

impl PowerSchedule for PathSchedule {
    fn name(&self) -> &'static str {
        "path-frequency"
    }

    fn assign_energy(&mut self, population: &mut [Seed]) {
        for seed in population.iter_mut() {
            let freq = self.frequency(seed.path_id);
            seed.energy = 1.0 / (freq as f64).powf(self.exponent);
        }
    }

    fn note_execution(&mut self, path: PathId) {
        *self.path_frequency.entry(path).or_insert(0) += 1;
    }

    fn distinct_paths(&self) -> Option<usize> {
        Some(self.path_frequency.len())
    }
}

/// Path-frequency scheduling with a novelty bonus: seeds whose path has
/// produced new coverage get a multiplicative boost relative to the total
/// novelty observed across the run.
#[derive(Debug)]
pub struct NoveltyPathSchedule {
    exponent: f64,
    path_frequency: HashMap<PathId, u64>,
    novelty_scores: HashMap<PathId, u64>,
}

impl NoveltyPathSchedule {
    pub fn new(exponent: f64) -> Self {
        Self {
            exponent,
            path_frequency: HashMap::new(),
            novelty_scores: HashMap::new(),
        }
    }

    fn frequency(&self, path: PathId) -> u64 {
        match self.path_frequency.get(&path) {
            Some(count) => (*count).max(1),
            None => {
                debug!("no frequency recorded for path {path}, using 1");
                1
            }
        }
    }
}

impl PowerSchedule for NoveltyPathSchedule {
    fn name(&self) -> &'static str {
        "novelty-path"
    }

    fn assign_energy(&mut self, population: &mut [Seed]) {
        let total_novelty: u64 = self.novelty_scores.values().sum();
        for seed in population.iter_mut() {
            let freq = self.frequency(seed.path_id);
            let base = 1.0 / (freq as f64).powf(self.exponent);
            let novelty = self
                .novelty_scores
                .get(&seed.path_id)
                .copied()
                .unwrap_or(0);
            seed.energy = base * (1.0 + novelty as f64 / (1 + total_novelty) as f64);
        }
    }

    fn note_execution(&mut self, path: PathId) {
        *self.path_frequency.entry(path).or_insert(0) += 1;
    }

    fn note_novelty(&mut self, delta_path: PathId) {
        *self.novelty_scores.entry(delta_path).or_insert(0) += 1;
    }

    fn distinct_paths(&self) -> Option<usize> {
        Some(self.path_frequency.len())
    }
}

pub fn build_schedule(config: &ScheduleConfig) -> Box<dyn PowerSchedule> {
    match config.kind {
        ScheduleKind::Uniform => Box::new(UniformSchedule),
        ScheduleKind::CoverageSize => Box::new(CoverageSchedule),
        ScheduleKind::PathFrequency => Box::new(PathSchedule::new(config.exponent)),
        ScheduleKind::NoveltyPath => Box::new(NoveltyPathSchedule::new(config.exponent)),
    }
}
