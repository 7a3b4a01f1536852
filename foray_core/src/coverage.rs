use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// The record of which probe sites executed, and how often, during one trial.
///
/// Probe sites are plain `u32` identifiers chosen by the instrumented target
/// code. Two trials with equal [`trace_key`](CoverageTrace::trace_key)s hit
/// the same sites the same number of times, which is what the default
/// guidance uses to decide whether an input reached anything new.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageTrace {
    hits: BTreeMap<u32, u32>,
}

impl CoverageTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, site: u32) {
        *self.hits.entry(site).or_insert(0) += 1;
    }

    /// Number of distinct probe sites hit.
    pub fn sites(&self) -> usize {
        self.hits.len()
    }

    pub fn total_hits(&self) -> u64 {
        self.hits.values().map(|&count| u64::from(count)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// 16-byte digest over the ordered (site, count) pairs.
    ///
    /// `hits` is a `BTreeMap`, so iteration order is canonical and the key is
    /// stable across runs for identical traces.
    pub fn trace_key(&self) -> [u8; 16] {
        let mut encoded = Vec::with_capacity(self.hits.len() * 8);
        for (&site, &count) in &self.hits {
            encoded.extend_from_slice(&site.to_le_bytes());
            encoded.extend_from_slice(&count.to_le_bytes());
        }
        md5::compute(&encoded).0
    }
}

thread_local! {
    static ACTIVE_SINK: RefCell<Option<Arc<Mutex<CoverageTrace>>>> = const { RefCell::new(None) };
}

/// Probe entry point called by instrumented target code.
///
/// A no-op unless an instrumented invocation on the current thread has a
/// sink installed, so probe hits from shared (non-instrumented) units and
/// from the harness itself are never collected.
pub fn record_probe(site: u32) {
    ACTIVE_SINK.with(|slot| {
        if let Some(sink) = slot.borrow().as_ref() {
            if let Ok(mut trace) = sink.lock() {
                trace.record(site);
            }
        }
    });
}

/// Installs a probe sink for the current thread, restoring the prior one on
/// drop. Drop runs during unwinding too, so a panicking trial cannot leave
/// its sink installed for a later trial on the same thread.
pub(crate) struct SinkGuard {
    previous: Option<Arc<Mutex<CoverageTrace>>>,
}

impl SinkGuard {
    pub(crate) fn install(sink: Arc<Mutex<CoverageTrace>>) -> Self {
        let previous = ACTIVE_SINK.with(|slot| slot.borrow_mut().replace(sink));
        Self { previous }
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_SINK.with(|slot| {
            *slot.borrow_mut() = previous;
        });
    }
}
