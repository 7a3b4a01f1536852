use crate::executor::{ExecutorError, TrialExecutor};
use crate::guidance::{CampaignSummary, Guidance, GuidanceError, TrialRecord};
use crate::loader::{InstrumentedLoader, LoaderError, TargetResolveError};
use thiserror::Error;

/// Identifies the fuzzed entry point: one entry of one target unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub unit: String,
    pub entry: String,
}

impl TargetDescriptor {
    pub fn new(unit: &str, entry: &str) -> Self {
        Self {
            unit: unit.to_string(),
            entry: entry.to_string(),
        }
    }
}

/// Setup errors that abort a campaign. Findings never appear here; they are
/// recorded as trial data and the campaign continues.
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("could not build execution environment: {0}")]
    Loader(#[from] LoaderError),

    #[error("could not resolve fuzz target: {0}")]
    Target(#[from] TargetResolveError),

    #[error("harness failure during trial {trial}: {source}")]
    Harness {
        trial: u64,
        #[source]
        source: ExecutorError,
    },

    #[error("guidance engine failure: {0}")]
    Guidance(#[from] GuidanceError),
}

/// Drives one campaign to completion.
///
/// Resolve the target through the loader, then repeat fetch → invoke →
/// report until the guidance engine signals completion. Each started trial
/// is reported exactly once and never retried.
pub struct CampaignDriver<G: Guidance> {
    guidance: G,
    executor: TrialExecutor,
}

impl<G: Guidance> CampaignDriver<G> {
    pub fn new(guidance: G, executor: TrialExecutor) -> Self {
        Self { guidance, executor }
    }

    pub fn run(
        mut self,
        loader: &InstrumentedLoader,
        target: &TargetDescriptor,
    ) -> Result<CampaignSummary, CampaignError> {
        let unit = loader.load(&target.unit)?;
        let resolved = unit.resolve_entry(&target.entry)?;
        tracing::info!(
            unit = %target.unit,
            entry = %target.entry,
            instrumented = unit.is_instrumented(),
            "target resolved, campaign starting"
        );

        let mut trial: u64 = 0;
        while let Some(input) = self.guidance.next_input()? {
            trial += 1;
            let (trace, outcome) = self
                .executor
                .run(&resolved, &input)
                .map_err(|source| CampaignError::Harness { trial, source })?;
            if outcome.is_finding() {
                tracing::info!(trial, outcome = ?outcome, "finding recorded");
            }
            self.guidance.record_trial(TrialRecord {
                input,
                trace,
                outcome,
            })?;
        }

        let summary = self.guidance.summary();
        tracing::info!(
            trials = summary.trials,
            findings = summary.findings,
            corpus = summary.corpus_size,
            "campaign complete"
        );
        Ok(summary)
    }
}
