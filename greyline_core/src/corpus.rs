use crate::coverage::{CoverageSet, PathId, path_id};
use bincode::{
    self, Decode, Encode,
    config::{Configuration, Fixint, LittleEndian, NoLimit},
    error::{DecodeError, EncodeError},
};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors arising from seed/crash persistence and corpus bookkeeping.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// A persisted record is missing or unreadable when lazily loaded.
    /// Fatal for the operation that needed it: a corrupted corpus must be
    /// surfaced, not hidden.
    #[error("seed record at {path:?} is missing or unreadable: {reason}")]
    Storage { path: PathBuf, reason: String },

    /// An I/O error during interaction with the storage directory.
    #[error("corpus I/O error: {0}")]
    Io(String),

    /// A record could not be encoded for persistence.
    #[error("corpus serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}
impl From<EncodeError> for CorpusError {
    fn from(err: EncodeError) -> Self {
        CorpusError::Serialization(format!("bincode encoding error: {err}"))
    }
}

/// The on-disk shape of one retained input: exactly `{data, coverage}`.
/// Round-tripping a record yields byte-identical data and a set-identical
/// coverage.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct SeedRecord {
    pub data: Vec<u8>,
    pub coverage: CoverageSet,
}

/// Content-addressed record storage under one directory.
///
/// Records are keyed by the MD5 hex digest of their data and written with a
/// fixed bincode configuration. Seeds and crashes use two separate stores so
/// the namespaces never collide.
pub struct SeedStore {
    dir: PathBuf,
    bincode_config: Configuration<LittleEndian, Fixint, NoLimit>,
}

impl SeedStore {
    /// File extension for persisted records.
    const RECORD_EXTENSION: &'static str = "seed";

    fn record_config() -> Configuration<LittleEndian, Fixint, NoLimit> {
        bincode::config::standard()
            .with_little_endian()
            .with_fixed_int_encoding()
    }

    /// Opens (creating if necessary) a store rooted at `dir`.
    pub fn open(dir: PathBuf) -> Result<Self, CorpusError> {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                CorpusError::Io(format!("failed to create storage directory {dir:?}: {e}"))
            })?;
        } else if !dir.is_dir() {
            return Err(CorpusError::Io(format!(
                "storage path {dir:?} exists but is not a directory"
            )));
        }
        Ok(Self {
            dir,
            bincode_config: Self::record_config(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Content id of raw input data (MD5 hex digest).
    pub fn content_id(data: &[u8]) -> String {
        format!("{:x}", md5::compute(data))
    }

    /// Deterministic record path for a content id.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(id).with_extension(Self::RECORD_EXTENSION)
    }

    /// Writes `{data, coverage}` at the content-derived path, returning the
    /// id and path. Re-persisting identical data overwrites the same file
    /// with the same bytes, so repeated calls are idempotent.
    pub fn persist(
        &self,
        data: &[u8],
        coverage: &CoverageSet,
    ) -> Result<(String, PathBuf), CorpusError> {
        let id = Self::content_id(data);
        let path = self.record_path(&id);
        let record = SeedRecord {
            data: data.to_vec(),
            coverage: coverage.clone(),
        };
        let bytes = bincode::encode_to_vec(&record, self.bincode_config)?;
        fs::write(&path, bytes)
            .map_err(|e| CorpusError::Io(format!("failed to write record {path:?}: {e}")))?;
        debug!("persisted record {id} ({} bytes of data)", data.len());
        Ok((id, path))
    }

    /// Loads a record from its path. Missing or undecodable files are a
    /// `Storage` error: the caller must not silently drop the seed.
    pub fn load(&self, path: &Path) -> Result<SeedRecord, CorpusError> {
        let bytes = fs::read(path).map_err(|e| CorpusError::Storage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let (record, _len): (SeedRecord, usize) =
            bincode::decode_from_slice(&bytes, self.bincode_config).map_err(|e: DecodeError| {
                CorpusError::Storage {
                    path: path.to_path_buf(),
                    reason: format!("bincode decoding failed: {e}"),
                }
            })?;
        Ok(record)
    }
}

/// One retained input. The heavy payload stays on disk; in memory the seed
/// carries its identity, its mutable scheduling energy and two cheap
/// statistics derived from the coverage at acceptance time, so schedules
/// never touch storage during a selection round.
#[derive(Debug, Clone)]
pub struct Seed {
    /// Content hash of the data; identical data yields an identical id.
    pub id: String,
    /// Relative selection weight, recomputed by the power schedule before
    /// each selection round. Not persisted.
    pub energy: f64,
    /// Path id of the coverage recorded when the seed was accepted.
    pub path_id: PathId,
    /// Size of that coverage set.
    pub coverage_len: usize,
    storage_path: PathBuf,
}

impl Seed {
    pub(crate) fn new(
        id: String,
        path_id: PathId,
        coverage_len: usize,
        storage_path: PathBuf,
    ) -> Self {
        Self {
            id,
            energy: 0.0,
            path_id,
            coverage_len,
            storage_path,
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }
}

/// The append-only population of retained seeds plus its backing store.
///
/// Insertion order is discovery order. Seeds are never mutated after
/// creation except for `energy`, and never deleted (eviction is a non-goal).
pub struct SeedCorpus {
    store: SeedStore,
    population: Vec<Seed>,
}

impl SeedCorpus {
    /// Opens a corpus whose records live under `corpus_dir`.
    pub fn open(corpus_dir: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        Ok(Self {
            store: SeedStore::open(corpus_dir.into())?,
            population: Vec::new(),
        })
    }

    /// Reads the raw input files of `seed_dir`, persists each with empty
    /// initial coverage and returns them as the replay queue, ordered by
    /// file name for reproducible runs.
    ///
    /// Queue entries are deliberately not population members: the population
    /// grows only when an execution reveals new coverage, initial seeds
    /// included.
    /// Persists raw data with empty coverage and returns it as a replay
    /// queue entry without touching the population.
    pub fn stage(&self, data: &[u8]) -> Result<Seed, CorpusError> {
        let empty = CoverageSet::new();
        let (id, storage_path) = self.store.persist(data, &empty)?;
        Ok(Seed::new(id, path_id(&empty), 0, storage_path))
    }

    pub fn load_queue(&self, seed_dir: &Path) -> Result<Vec<Seed>, CorpusError> {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(seed_dir).map_err(|e| {
            CorpusError::Io(format!("failed to read seed directory {seed_dir:?}: {e}"))
        })? {
            let entry =
                entry.map_err(|e| CorpusError::Io(format!("error listing {seed_dir:?}: {e}")))?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));
            if path.is_file() && !hidden {
                files.push(path);
            }
        }
        files.sort();

        let mut queue = Vec::with_capacity(files.len());
        for file in &files {
            let data = fs::read(file)
                .map_err(|e| CorpusError::Io(format!("failed to read seed file {file:?}: {e}")))?;
            let seed = self.stage(&data)?;
            info!("initial seed {} staged from {file:?}", seed.id);
            queue.push(seed);
        }
        Ok(queue)
    }

    /// Persists `{data, coverage}` write-through and appends a new seed to
    /// the population. Safe to call repeatedly with identical data.
    pub fn append(&mut self, data: &[u8], coverage: &CoverageSet) -> Result<&Seed, CorpusError> {
        let (id, storage_path) = self.store.persist(data, coverage)?;
        info!(
            "seed {id} appended to population (coverage {} locations)",
            coverage.len()
        );
        self.population.push(Seed::new(
            id,
            path_id(coverage),
            coverage.len(),
            storage_path,
        ));
        Ok(&self.population[self.population.len() - 1])
    }

    /// Lazy read of a seed's raw data from storage.
    pub fn load_data(&self, seed: &Seed) -> Result<Vec<u8>, CorpusError> {
        Ok(self.store.load(seed.storage_path())?.data)
    }

    /// Lazy read of a seed's coverage from storage.
    pub fn load_coverage(&self, seed: &Seed) -> Result<CoverageSet, CorpusError> {
        Ok(self.store.load(seed.storage_path())?.coverage)
    }

    pub fn population(&self) -> &[Seed] {
        &self.population
    }

    pub fn population_mut(&mut self) -> &mut [Seed] {
        &mut self.population
    }

    pub fn len(&self) -> usize {
        self.population.len()
    }

    pub fn is_empty(&self) -> bool {
        self.population.is_empty()
    }
}
