use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Which power schedule drives seed selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleKind {
    Uniform,
    CoverageSize,
    #[default]
    PathFrequency,
    NoveltyPath,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ScheduleConfig {
    #[serde(default)]
    pub kind: ScheduleKind,
    /// Sharpness of the rare-path preference for the frequency-based
    /// schedules. Ignored by the others.
    #[serde(default = "default_exponent")]
    pub exponent: f64,
}

fn default_exponent() -> f64 {
    5.0
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            kind: ScheduleKind::default(),
            exponent: default_exponent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FuzzerSettings {
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// Seeds the run's RNG. Equal seeds with equal inputs reproduce a run.
    #[serde(default)]
    pub rng_seed: u64,
}

fn default_time_budget_secs() -> u64 {
    600
}

fn default_status_interval_ms() -> u64 {
    1000
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            time_budget_secs: default_time_budget_secs(),
            status_interval_ms: default_status_interval_ms(),
            rng_seed: 0,
        }
    }
}

impl FuzzerSettings {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct CorpusConfig {
    /// Directory of raw initial inputs, replayed before mutation starts.
    #[serde(default)]
    pub seed_input_dir: Option<PathBuf>,
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: PathBuf,
    #[serde(default = "default_crash_dir")]
    pub crash_dir: PathBuf,
    /// Where to write the JSON run summary, if anywhere.
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
    /// Deletion mutations never shrink an input below this length.
    #[serde(default = "default_min_input_len")]
    pub min_input_len: usize,
    /// When set, a failing input that revealed new coverage also joins the
    /// mutation population. Crashes stay persisted separately either way.
    #[serde(default)]
    pub keep_crashes_in_population: bool,
}

fn default_corpus_dir() -> PathBuf {
    PathBuf::from("./greyline_out/seeds")
}

fn default_crash_dir() -> PathBuf {
    PathBuf::from("./greyline_out/crashes")
}

fn default_min_input_len() -> usize {
    crate::mutator::DEFAULT_MIN_RETAIN_LEN
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            seed_input_dir: None,
            corpus_dir: default_corpus_dir(),
            crash_dir: default_crash_dir(),
            summary_path: None,
            min_input_len: default_min_input_len(),
            keep_crashes_in_population: false,
        }
    }
}

/// Top-level configuration, loaded from TOML. Every section and field has a
/// default so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct GreylineConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
}

impl GreylineConfig {
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path:?}"))?;
        let config: GreylineConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from config file: {path:?}"))?;
        Ok(config)
    }
}
