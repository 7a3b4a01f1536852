use crate::filter::FilterSet;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    /// Fully-qualified name of the target unit to fuzz.
    #[serde(default)]
    pub unit: String,
    /// Name of the entry point on that unit.
    #[serde(default)]
    pub entry: String,
    /// Ordered artifact roots; list order is resolution precedence.
    #[serde(default = "default_search_path")]
    pub search_path: Vec<PathBuf>,
    /// Comma-separated name prefixes excluded from instrumentation.
    #[serde(default)]
    pub excludes: Option<String>,
    /// Comma-separated name prefixes forcibly included; effective when
    /// longer than a matching exclude.
    #[serde(default)]
    pub includes: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_search_path() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            unit: String::new(),
            entry: String::new(),
            search_path: default_search_path(),
            excludes: None,
            includes: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    #[serde(default = "default_budget")]
    pub budget: u64,
    #[serde(default)]
    pub stop_on_finding: bool,
    #[serde(default)]
    pub rng_seed: u64,
}

pub fn default_budget() -> u64 {
    10_000
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            stop_on_finding: false,
            rng_seed: 0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default)]
    pub seed_paths: Option<Vec<PathBuf>>,
}

pub fn default_results_dir() -> PathBuf {
    PathBuf::from("./fuzz-results")
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            seed_paths: None,
        }
    }
}

/// The launcher-facing configuration surface. Sections are optional in the
/// file and fall back to their defaults.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignConfig {
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

impl CampaignConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: CampaignConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    /// Rejects configurations no campaign can run with. These are setup
    /// errors for the launcher to surface, never findings.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.target.unit.is_empty() {
            anyhow::bail!("target unit name is required");
        }
        if self.target.entry.is_empty() {
            anyhow::bail!("target entry name is required");
        }
        if self.target.search_path.is_empty() {
            anyhow::bail!("artifact search path must name at least one root");
        }
        if self.campaign.budget == 0 {
            anyhow::bail!("trial budget must be a positive number of trials");
        }
        if self.target.timeout_ms == 0 {
            anyhow::bail!("per-trial timeout must be positive");
        }
        Ok(())
    }

    pub fn filter_set(&self) -> FilterSet {
        FilterSet::from_comma_lists(
            self.target.includes.as_deref(),
            self.target.excludes.as_deref(),
        )
    }
}
