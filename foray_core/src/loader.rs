use crate::coverage::{CoverageTrace, SinkGuard};
use crate::filter::FilterSet;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors raised while building the execution environment or resolving a
/// target through it. All of these are campaign setup errors, never findings.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("artifact search path is empty")]
    EmptySearchPath,

    #[error("artifact root {0:?} does not exist")]
    BadRoot(PathBuf),

    #[error("no target unit named '{0}' on the artifact search path")]
    UnitNotFound(String),
}

/// Errors resolving a (unit, entry) target descriptor to a single invokable
/// entry point.
#[derive(Error, Debug)]
pub enum TargetResolveError {
    #[error("no entry point named '{entry}' on target unit '{unit}'")]
    NotFound { unit: String, entry: String },

    #[error("{count} entry points named '{entry}' on target unit '{unit}', exactly one required")]
    Ambiguous {
        unit: String,
        entry: String,
        count: usize,
    },

    #[error("entry point '{entry}' on target unit '{unit}' is not public")]
    NotPublic { unit: String, entry: String },
}

type HarnessFn = dyn Fn(&[u8]) + Send + Sync;

/// One invokable entry point of a target unit.
///
/// Entry points may share a name within a unit; resolution requires exactly
/// one public match, so duplicate names surface as setup errors rather than
/// an arbitrary pick.
pub struct EntryPoint {
    name: String,
    public: bool,
    func: Box<HarnessFn>,
}

impl EntryPoint {
    pub fn public(name: &str, func: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            public: true,
            func: Box::new(func),
        }
    }

    pub fn private(name: &str, func: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            public: false,
            func: Box::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A named bundle of entry points registered under one artifact root.
pub struct TargetUnit {
    name: String,
    entries: Vec<EntryPoint>,
}

impl TargetUnit {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn with_entry(mut self, entry: EntryPoint) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The parent environment: every target unit known to the process, keyed by
/// the artifact root it was registered under.
///
/// The registry outlives individual campaigns. Loaders borrow unit
/// definitions from it by `Arc`, which is what keeps shared units
/// identity-equal across the loader boundary.
#[derive(Default)]
pub struct HarnessRegistry {
    units_by_root: HashMap<PathBuf, Vec<Arc<TargetUnit>>>,
}

impl HarnessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, root: impl Into<PathBuf>, unit: TargetUnit) -> Arc<TargetUnit> {
        let unit = Arc::new(unit);
        self.units_by_root
            .entry(root.into())
            .or_default()
            .push(Arc::clone(&unit));
        unit
    }

    pub fn lookup(&self, root: &Path, unit_name: &str) -> Option<Arc<TargetUnit>> {
        self.units_by_root
            .get(root)?
            .iter()
            .find(|unit| unit.name == unit_name)
            .map(Arc::clone)
    }
}

/// The isolated, instrumented execution environment for one campaign.
///
/// Built from an ordered artifact search path, a [`FilterSet`], and the
/// parent [`HarnessRegistry`]. Units whose name the filter set matches are
/// marked for coverage probing; everything else resolves to the parent's
/// definition untouched. A fresh loader per campaign is the isolation
/// boundary: loaders hold no state a previous campaign could have dirtied.
pub struct InstrumentedLoader {
    search_path: Vec<PathBuf>,
    filters: FilterSet,
    parent: Arc<HarnessRegistry>,
}

impl InstrumentedLoader {
    /// Validates every root and snapshots the filter set. Duplicate roots
    /// are dropped; the surviving order is the resolution precedence.
    pub fn new(
        search_path: Vec<PathBuf>,
        filters: FilterSet,
        parent: Arc<HarnessRegistry>,
    ) -> Result<Self, LoaderError> {
        if search_path.is_empty() {
            return Err(LoaderError::EmptySearchPath);
        }

        let mut seen = HashSet::new();
        let mut roots = Vec::with_capacity(search_path.len());
        for root in search_path {
            if !root.exists() {
                return Err(LoaderError::BadRoot(root));
            }
            if seen.insert(root.clone()) {
                roots.push(root);
            }
        }

        tracing::debug!(roots = roots.len(), "instrumented loader constructed");
        Ok(Self {
            search_path: roots,
            filters,
            parent,
        })
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Resolves `unit_name` against the search path; the first root that
    /// provides the unit wins.
    pub fn load(&self, unit_name: &str) -> Result<LoadedUnit, LoaderError> {
        for root in &self.search_path {
            if let Some(unit) = self.parent.lookup(root, unit_name) {
                let instrumented = self.filters.is_instrumented(unit_name);
                tracing::debug!(unit = unit_name, instrumented, root = ?root, "target unit resolved");
                return Ok(LoadedUnit { unit, instrumented });
            }
        }
        Err(LoaderError::UnitNotFound(unit_name.to_string()))
    }
}

/// A unit resolved through a loader.
///
/// The unit definition is shared with the parent registry; only the
/// instrumentation decision is loader-local.
pub struct LoadedUnit {
    unit: Arc<TargetUnit>,
    instrumented: bool,
}

impl LoadedUnit {
    pub fn name(&self) -> &str {
        &self.unit.name
    }

    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }

    /// The shared definition, exposed so callers can check identity against
    /// the parent registry.
    pub fn definition(&self) -> &Arc<TargetUnit> {
        &self.unit
    }

    /// Resolves one entry point by name. Exactly one public match is
    /// required; anything else is a setup error and no trial may start.
    pub fn resolve_entry(&self, entry_name: &str) -> Result<ResolvedTarget, TargetResolveError> {
        let matches: Vec<usize> = self
            .unit
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.name == entry_name)
            .map(|(index, _)| index)
            .collect();

        match matches.as_slice() {
            [] => Err(TargetResolveError::NotFound {
                unit: self.unit.name.clone(),
                entry: entry_name.to_string(),
            }),
            [index] => {
                if !self.unit.entries[*index].public {
                    return Err(TargetResolveError::NotPublic {
                        unit: self.unit.name.clone(),
                        entry: entry_name.to_string(),
                    });
                }
                Ok(ResolvedTarget {
                    unit: Arc::clone(&self.unit),
                    entry_index: *index,
                    instrumented: self.instrumented,
                })
            }
            many => Err(TargetResolveError::Ambiguous {
                unit: self.unit.name.clone(),
                entry: entry_name.to_string(),
                count: many.len(),
            }),
        }
    }
}

/// A fully resolved fuzz target: one entry point of one loaded unit.
///
/// Cheap to clone and `Send`, so the trial executor can hand it to a worker
/// thread.
#[derive(Clone)]
pub struct ResolvedTarget {
    unit: Arc<TargetUnit>,
    entry_index: usize,
    instrumented: bool,
}

impl ResolvedTarget {
    pub fn unit_name(&self) -> &str {
        &self.unit.name
    }

    pub fn entry_name(&self) -> &str {
        &self.unit.entries[self.entry_index].name
    }

    /// Invokes the entry with `input`. While an instrumented unit is on the
    /// stack, probe hits land in `sink`; shared units run with no sink
    /// installed and emit nothing.
    pub fn invoke(&self, input: &[u8], sink: &Arc<Mutex<CoverageTrace>>) {
        let _guard = self
            .instrumented
            .then(|| SinkGuard::install(Arc::clone(sink)));
        (self.unit.entries[self.entry_index].func)(input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage;
    use tempfile::tempdir;

    fn probing_unit(name: &str) -> TargetUnit {
        TargetUnit::new(name).with_entry(EntryPoint::public("run", |data| {
            coverage::record_probe(1);
            if data.first() == Some(&b'x') {
                coverage::record_probe(2);
            }
        }))
    }

    #[test]
    fn missing_root_is_a_setup_error() {
        let registry = Arc::new(HarnessRegistry::new());
        let bogus = PathBuf::from("/definitely/not/here/foray");
        let result = InstrumentedLoader::new(
            vec![bogus.clone()],
            FilterSet::instrument_all(),
            registry,
        );
        match result {
            Err(LoaderError::BadRoot(path)) => assert_eq!(path, bogus),
            other => panic!("expected BadRoot, got {:?}", other.err()),
        }
    }

    #[test]
    fn empty_search_path_is_rejected() {
        let registry = Arc::new(HarnessRegistry::new());
        assert!(matches!(
            InstrumentedLoader::new(Vec::new(), FilterSet::instrument_all(), registry),
            Err(LoaderError::EmptySearchPath)
        ));
    }

    #[test]
    fn duplicate_roots_are_dropped_preserving_order() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let registry = Arc::new(HarnessRegistry::new());
        let loader = InstrumentedLoader::new(
            vec![
                dir_a.path().to_path_buf(),
                dir_b.path().to_path_buf(),
                dir_a.path().to_path_buf(),
            ],
            FilterSet::instrument_all(),
            registry,
        )
        .unwrap();
        assert_eq!(
            loader.search_path(),
            &[dir_a.path().to_path_buf(), dir_b.path().to_path_buf()]
        );
    }

    #[test]
    fn first_root_wins_resolution_precedence() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();

        let mut registry = HarnessRegistry::new();
        let from_a = registry.register(dir_a.path(), probing_unit("demo.codec"));
        let _from_b = registry.register(dir_b.path(), probing_unit("demo.codec"));

        let loader = InstrumentedLoader::new(
            vec![dir_a.path().to_path_buf(), dir_b.path().to_path_buf()],
            FilterSet::instrument_all(),
            Arc::new(registry),
        )
        .unwrap();

        let loaded = loader.load("demo.codec").unwrap();
        assert!(Arc::ptr_eq(loaded.definition(), &from_a));
    }

    #[test]
    fn shared_units_keep_parent_identity() {
        let dir = tempdir().unwrap();
        let mut registry = HarnessRegistry::new();
        let registered = registry.register(dir.path(), probing_unit("vendor.logging"));

        let filters = FilterSet::from_comma_lists(None, Some("vendor"));
        let loader = InstrumentedLoader::new(
            vec![dir.path().to_path_buf()],
            filters,
            Arc::new(registry),
        )
        .unwrap();

        let loaded = loader.load("vendor.logging").unwrap();
        assert!(!loaded.is_instrumented());
        assert!(Arc::ptr_eq(loaded.definition(), &registered));
    }

    #[test]
    fn unknown_unit_is_a_setup_error() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(HarnessRegistry::new());
        let loader = InstrumentedLoader::new(
            vec![dir.path().to_path_buf()],
            FilterSet::instrument_all(),
            registry,
        )
        .unwrap();
        assert!(matches!(
            loader.load("demo.codec"),
            Err(LoaderError::UnitNotFound(name)) if name == "demo.codec"
        ));
    }

    #[test]
    fn entry_resolution_requires_exactly_one_public_match() {
        let dir = tempdir().unwrap();
        let mut registry = HarnessRegistry::new();
        registry.register(
            dir.path(),
            TargetUnit::new("demo.codec")
                .with_entry(EntryPoint::public("decode", |_| {}))
                .with_entry(EntryPoint::public("decode", |_| {}))
                .with_entry(EntryPoint::private("rehash", |_| {})),
        );
        let loader = InstrumentedLoader::new(
            vec![dir.path().to_path_buf()],
            FilterSet::instrument_all(),
            Arc::new(registry),
        )
        .unwrap();
        let loaded = loader.load("demo.codec").unwrap();

        assert!(matches!(
            loaded.resolve_entry("decode"),
            Err(TargetResolveError::Ambiguous { count: 2, .. })
        ));
        assert!(matches!(
            loaded.resolve_entry("rehash"),
            Err(TargetResolveError::NotPublic { .. })
        ));
        assert!(matches!(
            loaded.resolve_entry("missing"),
            Err(TargetResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn instrumented_invocation_emits_probes_shared_does_not() {
        let dir = tempdir().unwrap();
        let mut registry = HarnessRegistry::new();
        registry.register(dir.path(), probing_unit("demo.codec"));
        registry.register(dir.path(), probing_unit("vendor.codec"));

        let filters = FilterSet::from_comma_lists(None, Some("vendor"));
        let loader = InstrumentedLoader::new(
            vec![dir.path().to_path_buf()],
            filters,
            Arc::new(registry),
        )
        .unwrap();

        let sink = Arc::new(Mutex::new(CoverageTrace::new()));
        let instrumented = loader.load("demo.codec").unwrap().resolve_entry("run").unwrap();
        instrumented.invoke(b"x", &sink);
        assert_eq!(sink.lock().unwrap().sites(), 2);

        let shared_sink = Arc::new(Mutex::new(CoverageTrace::new()));
        let shared = loader.load("vendor.codec").unwrap().resolve_entry("run").unwrap();
        shared.invoke(b"x", &shared_sink);
        assert!(shared_sink.lock().unwrap().is_empty());
    }
}
