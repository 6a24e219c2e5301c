use anyhow::Context;
use clap::Parser;
use greyline_core::{
    CoverageProbe, EngineSettings, FuzzingEngine, GreylineConfig, InProcessRunner, SeedCorpus,
    SeedStore, build_schedule,
};
use log::info;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;

/// Coverage-guided grey-box fuzzer.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Falls back to ./config.toml when
    /// present, then to built-in defaults.
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Directory of raw initial inputs, overriding the configured one.
    #[arg(short, long)]
    seed_dir: Option<PathBuf>,

    /// Time budget in seconds, overriding the configured one.
    #[arg(short, long)]
    time_budget_secs: Option<u64>,
}

/// Built-in demonstration target: a tiny bracketed-payload validator with
/// a rejection path and a panic buried behind nested guards.
fn demo_target(input: &[u8], probe: &CoverageProbe) -> Result<(), String> {
    probe.hit("demo", 1);
    if input.len() > 4 {
        probe.hit("demo", 2);
        if input.first() == Some(&b'{') {
            probe.hit("demo", 3);
            if input.last() == Some(&b'}') {
                probe.hit("demo", 4);
                if input.windows(3).any(|w| w == b"BAD") {
                    probe.hit("demo", 5);
                    return Err("malformed payload rejected".to_string());
                }
                if input.windows(5).any(|w| w == b"CRASH") {
                    probe.hit("demo", 6);
                    panic!("unchecked token in payload");
                }
            }
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<GreylineConfig> {
    if let Some(path) = &cli.config_file {
        return GreylineConfig::load_from_file(path);
    }
    let default_path = PathBuf::from("./config.toml");
    if default_path.is_file() {
        info!("using configuration from {default_path:?}");
        return GreylineConfig::load_from_file(&default_path);
    }
    info!("no configuration file found, using defaults");
    Ok(GreylineConfig::default())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = load_config(&cli)?;
    if let Some(seed_dir) = cli.seed_dir {
        config.corpus.seed_input_dir = Some(seed_dir);
    }
    if let Some(secs) = cli.time_budget_secs {
        config.fuzzer.time_budget_secs = secs;
    }

    let corpus = SeedCorpus::open(config.corpus.corpus_dir.clone())
        .with_context(|| format!("failed to open corpus at {:?}", config.corpus.corpus_dir))?;
    let crash_store = SeedStore::open(config.corpus.crash_dir.clone())
        .with_context(|| format!("failed to open crash store at {:?}", config.corpus.crash_dir))?;
    let schedule = build_schedule(&config.schedule);
    info!(
        "schedule: {}, time budget: {}s, rng seed: {}",
        schedule.name(),
        config.fuzzer.time_budget_secs,
        config.fuzzer.rng_seed
    );

    let settings = EngineSettings {
        status_interval: config.fuzzer.status_interval(),
        summary_path: config.corpus.summary_path.clone(),
        min_input_len: config.corpus.min_input_len,
        keep_crashes_in_population: config.corpus.keep_crashes_in_population,
    };
    let rng = ChaCha8Rng::seed_from_u64(config.fuzzer.rng_seed);
    let mut engine = FuzzingEngine::new(
        InProcessRunner::new(demo_target),
        corpus,
        crash_store,
        schedule,
        settings,
        rng,
    );

    match &config.corpus.seed_input_dir {
        Some(dir) => {
            let count = engine
                .load_initial_seeds(dir)
                .with_context(|| format!("failed to load initial seeds from {dir:?}"))?;
            anyhow::ensure!(count > 0, "seed directory {dir:?} contains no input files");
        }
        None => {
            engine.enqueue_seed(b"{seed!}")?;
            info!("no seed directory configured, starting from the built-in seed");
        }
    }

    let summary = engine.run(config.fuzzer.time_budget())?;
    println!(
        "covered {} locations, {} unique crash signatures, {} executions",
        summary.covered_locations.len(),
        summary.unique_crash_signatures.len(),
        summary.total_execs
    );
    for signature in &summary.unique_crash_signatures {
        println!("  crash: {signature}");
    }
    Ok(())
}
