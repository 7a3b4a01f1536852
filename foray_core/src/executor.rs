use crate::coverage::CoverageTrace;
use crate::input::TrialInput;
use crate::loader::ResolvedTarget;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Classification of a single completed trial.
///
/// Findings (`TargetPanic`, `TimedOut`) are data, not errors: the campaign
/// records them and keeps going. Harness failures are [`ExecutorError`]
/// instead and abort the campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialOutcome {
    /// The target entry returned normally.
    Completed,
    /// A panic propagated out of target code; the payload message is kept.
    TargetPanic(String),
    /// The invocation exceeded the wall-clock bound and was abandoned.
    TimedOut,
}

impl TrialOutcome {
    pub fn is_finding(&self) -> bool {
        !matches!(self, TrialOutcome::Completed)
    }
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("failed to spawn trial worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("trial worker disappeared without reporting a verdict")]
    WorkerLost,

    #[error("coverage sink poisoned by an earlier trial")]
    PoisonedSink,
}

/// Runs one invocation at a time under a wall-clock bound.
///
/// Each trial body runs on its own worker thread. On timeout the worker is
/// abandoned rather than joined: it owns nothing but its private input copy
/// and probe sink, so a hung target cannot corrupt state seen by later
/// trials.
pub struct TrialExecutor {
    timeout: Duration,
}

impl TrialExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Executes `target` with `input` and returns the coverage trace
    /// captured during this single invocation plus the classified outcome.
    pub fn run(
        &self,
        target: &ResolvedTarget,
        input: &TrialInput,
    ) -> Result<(CoverageTrace, TrialOutcome), ExecutorError> {
        let sink = Arc::new(Mutex::new(CoverageTrace::new()));
        let (verdict_tx, verdict_rx) = mpsc::channel();

        let worker_target = target.clone();
        let worker_input = input.clone();
        let worker_sink = Arc::clone(&sink);
        thread::Builder::new()
            .name("foray-trial".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    worker_target.invoke(worker_input.as_bytes(), &worker_sink);
                }));
                let outcome = match result {
                    Ok(()) => TrialOutcome::Completed,
                    Err(payload) => TrialOutcome::TargetPanic(panic_message(payload)),
                };
                // Receiver may be gone if we already timed out; nothing to do.
                let _ = verdict_tx.send(outcome);
            })?;

        let outcome = match verdict_rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "trial exceeded time bound, abandoning worker"
                );
                TrialOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => return Err(ExecutorError::WorkerLost),
        };

        // Snapshot the trace; an abandoned worker keeps its own Arc, but
        // whatever it records after this point is never observed.
        let trace = sink
            .lock()
            .map_err(|_| ExecutorError::PoisonedSink)?
            .clone();
        Ok((trace, outcome))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage;
    use crate::filter::FilterSet;
    use crate::loader::{EntryPoint, HarnessRegistry, InstrumentedLoader, TargetUnit};
    use std::time::Instant;
    use tempfile::tempdir;

    fn resolved(
        entry: EntryPoint,
        filters: FilterSet,
    ) -> (tempfile::TempDir, ResolvedTarget) {
        let dir = tempdir().unwrap();
        let mut registry = HarnessRegistry::new();
        registry.register(dir.path(), TargetUnit::new("demo.codec").with_entry(entry));
        let loader = InstrumentedLoader::new(
            vec![dir.path().to_path_buf()],
            filters,
            Arc::new(registry),
        )
        .unwrap();
        let target = loader
            .load("demo.codec")
            .unwrap()
            .resolve_entry("decode")
            .unwrap();
        (dir, target)
    }

    #[test]
    fn normal_return_is_completed_with_trace() {
        let (_dir, target) = resolved(
            EntryPoint::public("decode", |data| {
                coverage::record_probe(1);
                if !data.is_empty() {
                    coverage::record_probe(2);
                }
            }),
            FilterSet::instrument_all(),
        );
        let executor = TrialExecutor::new(Duration::from_secs(2));
        let (trace, outcome) = executor.run(&target, &TrialInput::new(vec![9])).unwrap();
        assert_eq!(outcome, TrialOutcome::Completed);
        assert_eq!(trace.sites(), 2);
    }

    #[test]
    fn panic_is_classified_with_its_message() {
        let (_dir, target) = resolved(
            EntryPoint::public("decode", |data| {
                if data.first() == Some(&0xFF) {
                    panic!("magic byte rejected");
                }
            }),
            FilterSet::instrument_all(),
        );
        let executor = TrialExecutor::new(Duration::from_secs(2));
        let (_, outcome) = executor.run(&target, &TrialInput::new(vec![0xFF])).unwrap();
        match outcome {
            TrialOutcome::TargetPanic(ref message) => assert!(message.contains("magic byte")),
            other => panic!("expected TargetPanic, got {other:?}"),
        }
        assert!(outcome.is_finding());
    }

    #[test]
    fn hung_target_times_out_within_bounded_overhead() {
        let (_dir, target) = resolved(
            EntryPoint::public("decode", |_| {
                loop {
                    thread::sleep(Duration::from_millis(10));
                }
            }),
            FilterSet::instrument_all(),
        );
        let executor = TrialExecutor::new(Duration::from_millis(100));
        let started = Instant::now();
        let (_, outcome) = executor.run(&target, &TrialInput::new(Vec::new())).unwrap();
        assert_eq!(outcome, TrialOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn later_trials_are_clean_after_a_timeout() {
        let (_dir, hung) = resolved(
            EntryPoint::public("decode", |_| {
                coverage::record_probe(99);
                loop {
                    thread::sleep(Duration::from_millis(10));
                }
            }),
            FilterSet::instrument_all(),
        );
        let executor = TrialExecutor::new(Duration::from_millis(100));
        let (_, outcome) = executor.run(&hung, &TrialInput::new(Vec::new())).unwrap();
        assert_eq!(outcome, TrialOutcome::TimedOut);

        let (_dir2, benign) = resolved(
            EntryPoint::public("decode", |_| coverage::record_probe(1)),
            FilterSet::instrument_all(),
        );
        let (trace, outcome) = executor.run(&benign, &TrialInput::new(Vec::new())).unwrap();
        assert_eq!(outcome, TrialOutcome::Completed);
        // Only this trial's probe: the abandoned worker's sink was private.
        assert_eq!(trace.sites(), 1);
        assert_eq!(trace.total_hits(), 1);
    }

    #[test]
    fn shared_target_produces_empty_trace() {
        let (_dir, target) = resolved(
            EntryPoint::public("decode", |_| coverage::record_probe(5)),
            FilterSet::from_comma_lists(None, Some("demo")),
        );
        let executor = TrialExecutor::new(Duration::from_secs(2));
        let (trace, outcome) = executor.run(&target, &TrialInput::new(Vec::new())).unwrap();
        assert_eq!(outcome, TrialOutcome::Completed);
        assert!(trace.is_empty());
    }
}
