use crate::corpus::{CorpusError, Seed, SeedCorpus, SeedStore};
use crate::coverage::{CoverageTracker, path_id};
use crate::crash::CrashRegistry;
use crate::mutator::MutationEngine;
use crate::runner::{Outcome, Runner, RunnerError};
use crate::schedule::{PowerSchedule, ScheduleError};
use crate::stats::{RunSummary, StatusTable};
use log::{debug, info, warn};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Where the loop currently draws candidates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Replaying initial seeds verbatim.
    Seeding,
    /// Selecting from the population and mutating.
    Mutating,
    /// The time budget expired.
    Stopped,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("failed to write run summary: {0}")]
    Summary(String),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub status_interval: Duration,
    pub summary_path: Option<PathBuf>,
    /// Lower bound mutation deletions respect.
    pub min_input_len: usize,
    /// Whether failing inputs with novel coverage also join the mutation
    /// population. They are persisted to the crash store regardless.
    pub keep_crashes_in_population: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_millis(1000),
            summary_path: None,
            min_input_len: crate::mutator::DEFAULT_MIN_RETAIN_LEN,
            keep_crashes_in_population: false,
        }
    }
}

/// What a single loop iteration did, for callers that drive the loop
/// themselves instead of using [`FuzzingEngine::run`].
#[derive(Debug)]
pub struct IterationReport {
    pub candidate: Vec<u8>,
    pub outcome: Outcome,
    pub novel: bool,
    pub appended: bool,
    pub new_unique_crash: bool,
}

/// The coverage-guided mutation loop.
///
/// Candidates come from the replay queue first, then from energy-weighted
/// selection over the population. The population grows only when a passing
/// execution reveals never-seen coverage; failing inputs go to the crash
/// store and registry instead.
pub struct FuzzingEngine<R: Runner> {
    runner: R,
    corpus: SeedCorpus,
    crash_store: SeedStore,
    crashes: CrashRegistry,
    tracker: CoverageTracker,
    mutator: MutationEngine,
    schedule: Box<dyn PowerSchedule>,
    rng: ChaCha8Rng,
    seed_queue: VecDeque<Seed>,
    phase: Phase,
    started: Instant,
    last_crash_elapsed: Duration,
    total_execs: u64,
    status_interval: Duration,
    summary_path: Option<PathBuf>,
    keep_crashes_in_population: bool,
}

impl<R: Runner> FuzzingEngine<R> {
    pub fn new(
        runner: R,
        corpus: SeedCorpus,
        crash_store: SeedStore,
        schedule: Box<dyn PowerSchedule>,
        settings: EngineSettings,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            runner,
            corpus,
            crash_store,
            crashes: CrashRegistry::new(),
            tracker: CoverageTracker::new(),
            mutator: MutationEngine::new(settings.min_input_len),
            schedule,
            rng,
            seed_queue: VecDeque::new(),
            phase: Phase::Seeding,
            started: Instant::now(),
            last_crash_elapsed: Duration::ZERO,
            total_execs: 0,
            status_interval: settings.status_interval,
            summary_path: settings.summary_path,
            keep_crashes_in_population: settings.keep_crashes_in_population,
        }
    }

    /// Stages every raw input file of `dir` onto the replay queue.
    pub fn load_initial_seeds(&mut self, dir: &Path) -> Result<usize, CorpusError> {
        let queue = self.corpus.load_queue(dir)?;
        let count = queue.len();
        self.seed_queue.extend(queue);
        info!("{count} initial seeds queued for replay");
        Ok(count)
    }

    /// Stages a single input onto the replay queue.
    pub fn enqueue_seed(&mut self, data: &[u8]) -> Result<(), CorpusError> {
        let seed = self.corpus.stage(data)?;
        self.seed_queue.push_back(seed);
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn corpus(&self) -> &SeedCorpus {
        &self.corpus
    }

    pub fn tracker(&self) -> &CoverageTracker {
        &self.tracker
    }

    pub fn crashes(&self) -> &CrashRegistry {
        &self.crashes
    }

    pub fn total_execs(&self) -> u64 {
        self.total_execs
    }

    fn next_candidate(&mut self) -> Result<Vec<u8>, EngineError> {
        if let Some(seed) = self.seed_queue.pop_front() {
            let data = self.corpus.load_data(&seed)?;
            if self.seed_queue.is_empty() {
                debug!("replay queue drained, switching to mutation");
                self.phase = Phase::Mutating;
            }
            return Ok(data);
        }
        self.phase = Phase::Mutating;
        let Self {
            schedule,
            corpus,
            rng,
            ..
        } = self;
        let index = schedule.choose(corpus.population_mut(), rng)?;
        let base = self.corpus.load_data(&self.corpus.population()[index])?;
        Ok(self.mutator.stacked(&base, &mut self.rng))
    }

    /// One full iteration: pick a candidate, execute it, fold its coverage
    /// into the global picture and route it to the population or the crash
    /// store as its verdict dictates.
    pub fn step(&mut self) -> Result<IterationReport, EngineError> {
        let candidate = self.next_candidate()?;
        let execution = self.runner.execute(&candidate)?;

        let (novel, delta) = self.tracker.observe(&execution.coverage);
        self.schedule.note_execution(path_id(&execution.coverage));
        if novel {
            self.schedule.note_novelty(path_id(&delta));
        }

        let appended = novel
            && (execution.outcome == Outcome::Pass
                || (execution.outcome == Outcome::Fail && self.keep_crashes_in_population));
        if appended {
            self.corpus.append(&candidate, &execution.coverage)?;
        }

        let mut new_unique_crash = false;
        if execution.outcome == Outcome::Fail {
            let input_id = SeedStore::content_id(&candidate);
            new_unique_crash = self.crashes.record(&input_id, &execution.result);
            if new_unique_crash {
                self.last_crash_elapsed = self.started.elapsed();
            }
            self.crash_store.persist(&candidate, &execution.coverage)?;
        }
        if execution.outcome == Outcome::Unresolved {
            warn!("unresolved execution, input neither retained nor recorded as crash");
        }

        self.total_execs += 1;
        Ok(IterationReport {
            candidate,
            outcome: execution.outcome,
            novel,
            appended,
            new_unique_crash,
        })
    }

    fn status_row(&self, table: &StatusTable) -> String {
        table.row(
            self.started.elapsed(),
            self.last_crash_elapsed,
            self.total_execs,
            self.schedule.distinct_paths(),
            self.crashes.unique_count(),
            self.tracker.covered_count(),
        )
    }

    /// Runs the loop until the time budget expires, printing the periodic
    /// status table, then writes and returns the run summary.
    pub fn run(&mut self, time_budget: Duration) -> Result<RunSummary, EngineError> {
        self.started = Instant::now();
        let start_unix = unix_now();
        let table = StatusTable::new(self.schedule.distinct_paths().is_some());
        println!("{}", table.header());

        let mut last_status = Instant::now();
        while self.started.elapsed() < time_budget {
            self.step()?;
            if last_status.elapsed() >= self.status_interval {
                println!("{}", self.status_row(&table));
                last_status = Instant::now();
            }
        }
        println!("{}", self.status_row(&table));
        println!("{}", table.footer());
        self.phase = Phase::Stopped;

        let summary = RunSummary {
            covered_locations: self.tracker.global().iter().cloned().collect(),
            unique_crash_signatures: self.crashes.signatures().into_iter().collect(),
            total_execs: self.total_execs,
            start_unix,
            end_unix: unix_now(),
        };
        if let Some(path) = &self.summary_path {
            summary
                .write_json(path)
                .map_err(|e| EngineError::Summary(e.to_string()))?;
            info!("run summary written to {path:?}");
        }
        Ok(summary)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{CoverageSet, Location};
    use crate::runner::{CoverageProbe, Execution, InProcessRunner};
    use crate::schedule::PathSchedule;
    use rand::SeedableRng;
    use std::fs;
    use tempfile::tempdir;

    struct ScriptedRunner {
        outcome: Outcome,
        result: String,
        coverage: CoverageSet,
    }

    impl Runner for ScriptedRunner {
        fn execute(&mut self, _input: &[u8]) -> Result<Execution, RunnerError> {
            Ok(Execution {
                result: self.result.clone(),
                outcome: self.outcome,
                coverage: self.coverage.clone(),
            })
        }
    }

    fn cov(lines: &[u32]) -> CoverageSet {
        lines.iter().map(|l| Location::new("t", *l)).collect()
    }

    fn engine_with<Rn: Runner>(
        base: &Path,
        runner: Rn,
        settings: EngineSettings,
    ) -> FuzzingEngine<Rn> {
        let corpus = SeedCorpus::open(base.join("seeds")).unwrap();
        let crash_store = SeedStore::open(base.join("crashes")).unwrap();
        FuzzingEngine::new(
            runner,
            corpus,
            crash_store,
            Box::new(PathSchedule::new(1.0)),
            settings,
            ChaCha8Rng::from_seed([1u8; 32]),
        )
    }

    #[test]
    fn replayed_seed_with_new_coverage_enters_population() {
        let dir = tempdir().unwrap();
        let runner = InProcessRunner::new(|input: &[u8], probe: &CoverageProbe| {
            probe.hit("target", 1);
            if input.contains(&b'b') {
                probe.hit("target", 2);
            }
            Ok(())
        });
        let mut engine = engine_with(dir.path(), runner, EngineSettings::default());
        engine.enqueue_seed(b"aaaa").unwrap();
        assert_eq!(engine.phase(), Phase::Seeding);

        let report = engine.step().unwrap();
        assert_eq!(report.candidate, b"aaaa");
        assert_eq!(report.outcome, Outcome::Pass);
        assert!(report.novel && report.appended);
        assert_eq!(engine.corpus().len(), 1);
        assert_eq!(engine.tracker().covered_count(), 1);
        assert_eq!(engine.phase(), Phase::Mutating);
    }

    #[test]
    fn mutation_discovers_the_guarded_branch() {
        let dir = tempdir().unwrap();
        let runner = InProcessRunner::new(|input: &[u8], probe: &CoverageProbe| {
            probe.hit("target", 1);
            if input.contains(&b'b') {
                probe.hit("target", 2);
            }
            Ok(())
        });
        let mut engine = engine_with(dir.path(), runner, EngineSettings::default());
        engine.enqueue_seed(b"aaaa").unwrap();
        engine.step().unwrap();

        let mut found = false;
        for _ in 0..100_000 {
            let report = engine.step().unwrap();
            if report.appended {
                assert!(report.candidate.contains(&b'b'));
                found = true;
                break;
            }
        }
        assert!(found, "mutation never reached the guarded branch");
        assert_eq!(engine.corpus().len(), 2);
        assert_eq!(engine.tracker().covered_count(), 2);
    }

    #[test]
    fn unresolved_executions_grow_coverage_but_not_the_population() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner {
            outcome: Outcome::Unresolved,
            result: String::new(),
            coverage: cov(&[1, 2]),
        };
        let mut engine = engine_with(dir.path(), runner, EngineSettings::default());
        engine.enqueue_seed(b"seed").unwrap();

        let report = engine.step().unwrap();
        assert!(report.novel && !report.appended);
        assert_eq!(engine.corpus().len(), 0);
        assert_eq!(engine.tracker().covered_count(), 2);
        assert_eq!(engine.total_execs(), 1);
    }

    #[test]
    fn failing_execution_is_recorded_and_kept_out_of_the_population() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner {
            outcome: Outcome::Fail,
            result: "divide by zero".to_string(),
            coverage: cov(&[1]),
        };
        let mut engine = engine_with(dir.path(), runner, EngineSettings::default());
        engine.enqueue_seed(b"boom").unwrap();

        let report = engine.step().unwrap();
        assert_eq!(report.outcome, Outcome::Fail);
        assert!(report.new_unique_crash);
        assert!(!report.appended);
        assert_eq!(engine.corpus().len(), 0);
        assert_eq!(engine.crashes().unique_count(), 1);

        let crash_files = fs::read_dir(dir.path().join("crashes"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().is_file())
            .count();
        assert_eq!(crash_files, 1);
    }

    #[test]
    fn opt_in_flag_lets_novel_failures_join_the_population() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner {
            outcome: Outcome::Fail,
            result: "guarded panic".to_string(),
            coverage: cov(&[1, 2]),
        };
        let settings = EngineSettings {
            keep_crashes_in_population: true,
            ..EngineSettings::default()
        };
        let mut engine = engine_with(dir.path(), runner, settings);
        engine.enqueue_seed(b"crashing seed").unwrap();

        let report = engine.step().unwrap();
        assert!(report.appended);
        assert_eq!(engine.corpus().len(), 1);
        assert_eq!(engine.crashes().unique_count(), 1);
    }

    #[test]
    fn repeated_signatures_deduplicate_across_steps() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner {
            outcome: Outcome::Fail,
            result: "same old panic".to_string(),
            coverage: cov(&[1]),
        };
        let mut engine = engine_with(dir.path(), runner, EngineSettings::default());
        engine.enqueue_seed(b"first input").unwrap();
        engine.enqueue_seed(b"second input").unwrap();

        assert!(engine.step().unwrap().new_unique_crash);
        assert!(!engine.step().unwrap().new_unique_crash);
        assert_eq!(engine.crashes().unique_count(), 1);
        assert_eq!(engine.crashes().len(), 2);
    }

    #[test]
    fn empty_population_without_queue_is_a_schedule_error() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner {
            outcome: Outcome::Pass,
            result: String::new(),
            coverage: CoverageSet::new(),
        };
        let mut engine = engine_with(dir.path(), runner, EngineSettings::default());
        assert!(matches!(
            engine.step(),
            Err(EngineError::Schedule(ScheduleError::EmptyPopulation))
        ));
    }

    #[test]
    fn initial_seed_directory_feeds_the_replay_queue() {
        let dir = tempdir().unwrap();
        let seed_dir = dir.path().join("inputs");
        fs::create_dir(&seed_dir).unwrap();
        fs::write(seed_dir.join("a"), b"alpha").unwrap();
        fs::write(seed_dir.join("b"), b"bravo").unwrap();

        let runner = ScriptedRunner {
            outcome: Outcome::Pass,
            result: String::new(),
            coverage: cov(&[1]),
        };
        let mut engine = engine_with(dir.path(), runner, EngineSettings::default());
        assert_eq!(engine.load_initial_seeds(&seed_dir).unwrap(), 2);

        let first = engine.step().unwrap();
        assert_eq!(first.candidate, b"alpha");
        let second = engine.step().unwrap();
        assert_eq!(second.candidate, b"bravo");
        // Identical coverage, so only the first replay was novel.
        assert!(first.appended && !second.appended);
        assert_eq!(engine.corpus().len(), 1);
    }

    #[test]
    fn run_honors_the_time_budget_and_writes_a_summary() {
        let dir = tempdir().unwrap();
        let summary_path = dir.path().join("summary.json");
        let runner = ScriptedRunner {
            outcome: Outcome::Pass,
            result: String::new(),
            coverage: cov(&[1]),
        };
        let settings = EngineSettings {
            summary_path: Some(summary_path.clone()),
            ..EngineSettings::default()
        };
        let mut engine = engine_with(dir.path(), runner, settings);

        let summary = engine.run(Duration::ZERO).unwrap();
        assert_eq!(engine.phase(), Phase::Stopped);
        assert_eq!(summary.total_execs, 0);
        assert!(summary.covered_locations.is_empty());
        assert!(summary_path.is_file());
    }

    #[test]
    fn run_executes_until_the_deadline() {
        let dir = tempdir().unwrap();
        let runner = InProcessRunner::new(|input: &[u8], probe: &CoverageProbe| {
            probe.hit("target", 1);
            if input.first() == Some(&b'{') {
                probe.hit("target", 2);
            }
            Ok(())
        });
        let mut engine = engine_with(dir.path(), runner, EngineSettings::default());
        engine.enqueue_seed(b"{seed}").unwrap();

        let summary = engine.run(Duration::from_millis(50)).unwrap();
        assert!(summary.total_execs > 0);
        assert_eq!(summary.total_execs, engine.total_execs());
        assert_eq!(summary.covered_locations.len(), 2);
    }
}
