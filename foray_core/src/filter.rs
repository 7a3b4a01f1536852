/// Decides which target units get rewritten for coverage probing.
///
/// Prefixes are literal matches against fully-qualified dotted unit names
/// (e.g. `demo.codec.json`). A unit is instrumented when no exclude prefix
/// matches its name, or when some matching include prefix is strictly longer
/// than every matching exclude prefix. The set is built once per campaign
/// and never mutated while a loader holds it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl FilterSet {
    /// A filter set with no prefixes: every unit is instrumented.
    pub fn instrument_all() -> Self {
        Self::default()
    }

    pub fn new(includes: Vec<String>, excludes: Vec<String>) -> Self {
        Self { includes, excludes }
    }

    /// Builds a filter set from the comma-separated prefix lists used on the
    /// configuration surface. Empty segments and surrounding whitespace are
    /// dropped.
    pub fn from_comma_lists(includes: Option<&str>, excludes: Option<&str>) -> Self {
        Self {
            includes: split_prefix_list(includes),
            excludes: split_prefix_list(excludes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Resolution rule: instrumented iff no exclude prefix matches, or a
    /// matching include prefix is strictly longer than every matching
    /// exclude prefix.
    pub fn is_instrumented(&self, unit_name: &str) -> bool {
        let longest_exclude = self
            .excludes
            .iter()
            .filter(|prefix| unit_name.starts_with(prefix.as_str()))
            .map(|prefix| prefix.len())
            .max();

        let Some(exclude_len) = longest_exclude else {
            return true;
        };

        self.includes
            .iter()
            .filter(|prefix| unit_name.starts_with(prefix.as_str()))
            .map(|prefix| prefix.len())
            .max()
            .is_some_and(|include_len| include_len > exclude_len)
    }
}

fn split_prefix_list(list: Option<&str>) -> Vec<String> {
    list.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
