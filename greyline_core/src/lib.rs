//! Coverage-guided grey-box mutation fuzzing.
//!
//! The crate wires a handful of small pieces together: a [`runner::Runner`]
//! executes the target and reports per-execution coverage, a
//! [`coverage::CoverageTracker`] folds that into the run-wide picture, a
//! [`schedule::PowerSchedule`] decides which retained seed to mutate next,
//! a [`mutator::MutationEngine`] derives candidates and the
//! [`engine::FuzzingEngine`] drives the loop, persisting interesting inputs
//! through [`corpus::SeedCorpus`] and failures through
//! [`crash::CrashRegistry`].

pub mod config;
pub mod corpus;
pub mod coverage;
pub mod crash;
pub mod engine;
pub mod mutator;
pub mod runner;
pub mod schedule;
pub mod stats;

pub use config::{CorpusConfig, FuzzerSettings, GreylineConfig, ScheduleConfig, ScheduleKind};
pub use corpus::{CorpusError, Seed, SeedCorpus, SeedRecord, SeedStore};
pub use coverage::{CoverageSet, CoverageTracker, Location, PathId, path_id};
pub use crash::CrashRegistry;
pub use engine::{EngineError, EngineSettings, FuzzingEngine, IterationReport, Phase};
pub use mutator::{ByteMutation, MutationEngine};
pub use runner::{CoverageProbe, Execution, InProcessRunner, Outcome, Runner, RunnerError};
pub use schedule::{
    CoverageSchedule, NoveltyPathSchedule, PathSchedule, PowerSchedule, ScheduleError,
    UniformSchedule, build_schedule,
};
pub use stats::{RunSummary, StatusTable, format_hms};
