use crate::corpus::{Corpus, CorpusError, ResultsDir};
use crate::coverage::CoverageTrace;
use crate::executor::TrialOutcome;
use crate::input::TrialInput;
use crate::mutator::{ByteHavocMutator, Mutator};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuidanceError {
    #[error("record_trial called with no outstanding next_input")]
    UnpairedRecord,

    #[error("next_input called while a trial is still outstanding")]
    OutstandingTrial,

    #[error("results persistence failed: {0}")]
    Persistence(#[from] CorpusError),

    #[error("input generation failed: {0}")]
    Generation(#[from] anyhow::Error),
}

/// One completed trial, reported back to the guidance engine.
#[derive(Debug)]
pub struct TrialRecord {
    pub input: TrialInput,
    pub trace: CoverageTrace,
    pub outcome: TrialOutcome,
}

/// End-of-campaign accounting, surfaced by the launcher.
#[derive(Debug, Clone, Default)]
pub struct CampaignSummary {
    pub trials: u64,
    pub findings: u64,
    pub corpus_size: usize,
    pub stopped_on_finding: bool,
}

/// A feedback-driven input-generation strategy.
///
/// The driver guarantees a strict 1:1 pairing: every input handed out by
/// `next_input` comes back through exactly one `record_trial` call, and the
/// engine enforces the pairing because its budget and corpus state depend
/// on it.
pub trait Guidance {
    /// The next input to try, or `None` once the campaign is complete.
    /// Bounded per call; never blocks indefinitely.
    fn next_input(&mut self) -> Result<Option<TrialInput>, GuidanceError>;

    /// Consumes one trial: updates corpus/scheduling state, persists
    /// artifacts, and advances the consumed-budget counter.
    fn record_trial(&mut self, record: TrialRecord) -> Result<(), GuidanceError>;

    /// True once the budget is exhausted or the engine's own stopping
    /// condition fired.
    fn is_done(&self) -> bool;

    fn summary(&self) -> CampaignSummary;
}

/// Default strategy: corpus keyed by coverage trace digest.
///
/// A trial whose trace key is unseen is interesting: its input is persisted
/// under `corpus/` and retained for future mutation. Findings are always
/// persisted under `failures/`. Inputs are derived by mutating a uniformly
/// selected corpus entry with a deterministically seeded RNG, so campaigns
/// replay byte-for-byte given the same seed and target.
pub struct TraceKeyedGuidance<M = ByteHavocMutator>
where
    M: Mutator<ChaCha8Rng>,
{
    budget: u64,
    consumed: u64,
    findings: u64,
    corpus: Corpus,
    results: ResultsDir,
    mutator: M,
    rng: ChaCha8Rng,
    stop_on_finding: bool,
    stopped_on_finding: bool,
    outstanding: bool,
}

impl TraceKeyedGuidance<ByteHavocMutator> {
    pub fn new(budget: u64, results_root: PathBuf) -> Result<Self, GuidanceError> {
        Self::with_mutator(budget, results_root, ByteHavocMutator::default())
    }
}

impl<M: Mutator<ChaCha8Rng>> TraceKeyedGuidance<M> {
    pub fn with_mutator(
        budget: u64,
        results_root: PathBuf,
        mutator: M,
    ) -> Result<Self, GuidanceError> {
        let results = ResultsDir::create(results_root)?;
        Ok(Self {
            budget,
            consumed: 0,
            findings: 0,
            corpus: Corpus::new(),
            results,
            mutator,
            rng: ChaCha8Rng::seed_from_u64(0),
            stop_on_finding: false,
            stopped_on_finding: false,
            outstanding: false,
        })
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Whether the first finding ends the campaign. Off by default; the
    /// launcher decides.
    pub fn stop_on_finding(mut self, stop: bool) -> Self {
        self.stop_on_finding = stop;
        self
    }

    pub fn load_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, GuidanceError> {
        let loaded = self.corpus.load_initial_seeds(seed_paths)?;
        tracing::info!(seeds = loaded, "initial corpus seeded");
        Ok(loaded)
    }

    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }

    pub fn results(&self) -> &ResultsDir {
        &self.results
    }
}

impl<M: Mutator<ChaCha8Rng>> Guidance for TraceKeyedGuidance<M> {
    fn next_input(&mut self) -> Result<Option<TrialInput>, GuidanceError> {
        if self.is_done() {
            return Ok(None);
        }
        if self.outstanding {
            return Err(GuidanceError::OutstandingTrial);
        }
        let base = self
            .corpus
            .random_select(&mut self.rng)
            .map(|(_, entry)| entry.input.clone());
        let input = self.mutator.mutate(base.as_ref(), &mut self.rng)?;
        self.outstanding = true;
        Ok(Some(input))
    }

    fn record_trial(&mut self, record: TrialRecord) -> Result<(), GuidanceError> {
        if !self.outstanding {
            return Err(GuidanceError::UnpairedRecord);
        }
        self.outstanding = false;
        self.consumed += 1;

        let key = record.trace.trace_key();
        if !record.trace.is_empty() && self.corpus.is_novel(&key) {
            let saved = self.results.save_input(&record.input)?;
            self.corpus.add(
                record.input.clone(),
                key,
                format!("trial #{}", self.consumed),
            );
            tracing::debug!(
                trial = self.consumed,
                sites = record.trace.sites(),
                artifact = ?saved,
                "new coverage retained"
            );
        }

        match &record.outcome {
            TrialOutcome::Completed => {}
            TrialOutcome::TargetPanic(message) => {
                self.findings += 1;
                self.results
                    .save_failure(&record.input, "panic", message, self.consumed)?;
                if self.stop_on_finding {
                    self.stopped_on_finding = true;
                }
            }
            TrialOutcome::TimedOut => {
                self.findings += 1;
                self.results
                    .save_failure(&record.input, "timeout", "", self.consumed)?;
                if self.stop_on_finding {
                    self.stopped_on_finding = true;
                }
            }
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.consumed >= self.budget || self.stopped_on_finding
    }

    fn summary(&self) -> CampaignSummary {
        CampaignSummary {
            trials: self.consumed,
            findings: self.findings,
            corpus_size: self.corpus.len(),
            stopped_on_finding: self.stopped_on_finding,
        }
    }
}
