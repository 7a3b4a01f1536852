use crate::input::TrialInput;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors from corpus bookkeeping or results-directory persistence. These
/// escalate to setup errors: once artifact writes fail, corpus and budget
/// integrity can no longer be guaranteed.
#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("results directory I/O error: {0}")]
    Io(String),

    #[error("failure index serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CorpusError {
    fn from(err: serde_json::Error) -> Self {
        CorpusError::Serialization(err.to_string())
    }
}

/// One retained input, keyed by the coverage trace that made it interesting.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub input: TrialInput,
    pub trace_key: [u8; 16],
    pub source: String,
}

/// The guidance engine's in-memory retained input set for one campaign.
///
/// Seed entries are keyed by their input digest until a trial observes a
/// trace for them; trial entries are keyed by their coverage trace. Either
/// way a key enters the set at most once.
#[derive(Default)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
    known_keys: HashSet<[u8; 16]>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&CorpusEntry> {
        self.entries.get(id)
    }

    /// True if no retained entry carries this key.
    pub fn is_novel(&self, key: &[u8; 16]) -> bool {
        !self.known_keys.contains(key)
    }

    /// Retains `input` under `key` unless the key is already known.
    /// Returns the assigned entry id for fresh keys.
    pub fn add(&mut self, input: TrialInput, key: [u8; 16], source: String) -> Option<usize> {
        if !self.known_keys.insert(key) {
            return None;
        }
        let id = self.entries.len();
        self.entries.push(CorpusEntry {
            input,
            trace_key: key,
            source,
        });
        Some(id)
    }

    /// Uniform selection; schedulers smarter than this are out of scope.
    pub fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &CorpusEntry)> {
        if self.entries.is_empty() {
            return None;
        }
        let id = rng.next_u64() as usize % self.entries.len();
        self.entries.get(id).map(|entry| (id, entry))
    }

    /// Loads raw-byte seed inputs from files and (non-recursively) from
    /// directories. Hidden files are skipped. Returns how many seeds landed.
    pub fn load_initial_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, CorpusError> {
        let mut loaded = 0;
        for path in seed_paths {
            if path.is_file() {
                loaded += usize::from(self.load_seed_file(path)?);
            } else if path.is_dir() {
                for entry in fs::read_dir(path)
                    .map_err(|e| CorpusError::Io(format!("failed to read seed directory {path:?}: {e}")))?
                {
                    let file_path = entry
                        .map_err(|e| CorpusError::Io(format!("failed to list {path:?}: {e}")))?
                        .path();
                    let hidden = file_path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with('.'));
                    if file_path.is_file() && !hidden {
                        loaded += usize::from(self.load_seed_file(&file_path)?);
                    }
                }
            } else {
                return Err(CorpusError::Io(format!(
                    "seed path {path:?} is neither a file nor a directory"
                )));
            }
        }
        Ok(loaded)
    }

    fn load_seed_file(&mut self, path: &Path) -> Result<bool, CorpusError> {
        let bytes = fs::read(path)
            .map_err(|e| CorpusError::Io(format!("failed to read seed file {path:?}: {e}")))?;
        let input = TrialInput::new(bytes);
        let key = md5::compute(input.as_bytes()).0;
        Ok(self
            .add(input, key, format!("seed file {path:?}"))
            .is_some())
    }
}

/// Sidecar record describing one persisted failing input.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FailureRecord {
    /// Filename of the raw input bytes under `failures/`.
    pub file: String,
    /// "panic" or "timeout".
    pub kind: String,
    pub message: String,
    pub input_digest: String,
    /// 1-based trial number within the campaign that produced the finding.
    pub trial: u64,
}

/// The campaign's artifact area: `corpus/` for interesting inputs,
/// `failures/` for findings, exclusively written by the guidance engine.
///
/// Every artifact is written to a temporary file in its final directory and
/// atomically persisted, so an interrupted campaign never leaves a
/// truncated artifact and previously recorded inputs stay intact.
pub struct ResultsDir {
    root: PathBuf,
    corpus_dir: PathBuf,
    failures_dir: PathBuf,
    failure_index: Vec<FailureRecord>,
    next_input_id: usize,
}

impl ResultsDir {
    const FAILURE_INDEX: &'static str = "index.json";

    /// Creates the layout, or reuses an existing one: a pre-existing
    /// failure index is loaded so new findings append rather than clobber.
    pub fn create(root: PathBuf) -> Result<Self, CorpusError> {
        let corpus_dir = root.join("corpus");
        let failures_dir = root.join("failures");
        fs::create_dir_all(&corpus_dir)
            .map_err(|e| CorpusError::Io(format!("failed to create {corpus_dir:?}: {e}")))?;
        fs::create_dir_all(&failures_dir)
            .map_err(|e| CorpusError::Io(format!("failed to create {failures_dir:?}: {e}")))?;

        let index_path = failures_dir.join(Self::FAILURE_INDEX);
        let failure_index = if index_path.is_file() {
            let raw = fs::read(&index_path)
                .map_err(|e| CorpusError::Io(format!("failed to read {index_path:?}: {e}")))?;
            serde_json::from_slice(&raw)?
        } else {
            Vec::new()
        };

        let next_input_id = fs::read_dir(&corpus_dir)
            .map_err(|e| CorpusError::Io(format!("failed to list {corpus_dir:?}: {e}")))?
            .count();

        Ok(Self {
            root,
            corpus_dir,
            failures_dir,
            failure_index,
            next_input_id,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }

    pub fn failures_dir(&self) -> &Path {
        &self.failures_dir
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failure_index
    }

    /// Persists an interesting input under `corpus/`.
    pub fn save_input(&mut self, input: &TrialInput) -> Result<PathBuf, CorpusError> {
        let name = format!("id_{:06}_{}", self.next_input_id, input.digest());
        let dest = self.corpus_dir.join(&name);
        write_atomic(&self.corpus_dir, &dest, input.as_bytes())?;
        self.next_input_id += 1;
        Ok(dest)
    }

    /// Persists a failing input under `failures/` and appends it to the
    /// failure index. The raw bytes land before the index is rewritten, so
    /// a crash in between loses at worst the index entry, not the input.
    pub fn save_failure(
        &mut self,
        input: &TrialInput,
        kind: &str,
        message: &str,
        trial: u64,
    ) -> Result<PathBuf, CorpusError> {
        let name = format!("fail_{:06}_{}", self.failure_index.len(), input.digest());
        let dest = self.failures_dir.join(&name);
        write_atomic(&self.failures_dir, &dest, input.as_bytes())?;

        self.failure_index.push(FailureRecord {
            file: name,
            kind: kind.to_string(),
            message: message.to_string(),
            input_digest: input.digest(),
            trial,
        });
        let encoded = serde_json::to_vec_pretty(&self.failure_index)?;
        let index_path = self.failures_dir.join(Self::FAILURE_INDEX);
        write_atomic(&self.failures_dir, &index_path, &encoded)?;
        Ok(dest)
    }
}

fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), CorpusError> {
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| CorpusError::Io(format!("failed to create temp file in {dir:?}: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| CorpusError::Io(format!("failed to write {dest:?}: {e}")))?;
    tmp.persist(dest)
        .map_err(|e| CorpusError::Io(format!("failed to persist {dest:?}: {e}")))?;
    Ok(())
}
