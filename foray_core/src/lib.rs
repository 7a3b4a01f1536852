pub mod config;
pub mod corpus;
pub mod coverage;
pub mod driver;
pub mod executor;
pub mod filter;
pub mod guidance;
pub mod input;
pub mod loader;
pub mod mutator;

pub use config::{CampaignConfig, CampaignSettings, OutputSettings, TargetSettings};
pub use corpus::{Corpus, CorpusError, FailureRecord, ResultsDir};
pub use coverage::{CoverageTrace, record_probe};
pub use driver::{CampaignDriver, CampaignError, TargetDescriptor};
pub use executor::{ExecutorError, TrialExecutor, TrialOutcome};
pub use filter::FilterSet;
pub use guidance::{CampaignSummary, Guidance, GuidanceError, TraceKeyedGuidance, TrialRecord};
pub use input::TrialInput;
pub use loader::{
    EntryPoint, HarnessRegistry, InstrumentedLoader, LoadedUnit, LoaderError, ResolvedTarget,
    TargetResolveError, TargetUnit,
};
pub use mutator::{ByteHavocMutator, Mutator};
