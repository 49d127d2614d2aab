//! Configuration for the recommendation pipeline.

use crate::rank::{ReduceConfig, WindowMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seed input configuration
    pub input: InputConfig,

    /// Ranking configuration
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Concurrency configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Scoring oracle endpoint
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Run persistence
    #[serde(default)]
    pub store: StoreConfig,
}

/// Seed input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Social handle to build recommendations for (eg. "experilearning")
    #[serde(default)]
    pub handle: String,

    /// How relevant a search result must be to survive filtering (0..=1)
    #[serde(default = "default_relevancy_cutoff")]
    pub relevancy_cutoff: f64,

    /// Maximum recent posts to fetch for the handle
    #[serde(default = "default_max_posts")]
    pub max_posts: usize,

    /// Maximum search queries to generate
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
}

/// Ranking configuration for the final rank-reduce stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Stop ranking once this many clips remain
    #[serde(default = "default_target_count")]
    pub target_count: usize,

    /// Maximum recommended clips per source video
    #[serde(default = "default_per_group_cap")]
    pub per_group_cap: usize,

    /// Fraction of each mixed window discarded per round
    #[serde(default = "default_discard_ratio")]
    pub discard_ratio: f64,

    /// Window-formation strategy
    #[serde(default = "default_window_mode")]
    pub window_mode: WindowMode,

    /// Window size for the sliding tournament
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Total oracle context budget in tokens
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,

    /// Tokens reserved for the oracle's response
    #[serde(default = "default_output_allowance")]
    pub output_allowance: usize,

    /// Fixed shuffle seed for deterministic runs (unset = entropy)
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            per_group_cap: default_per_group_cap(),
            discard_ratio: default_discard_ratio(),
            window_mode: default_window_mode(),
            window_size: default_window_size(),
            context_budget: default_context_budget(),
            output_allowance: default_output_allowance(),
            shuffle_seed: None,
        }
    }
}

impl RankingConfig {
    /// Reducer configuration with the given ranking fan-out limit.
    pub fn reduce_config(&self, concurrency: usize) -> ReduceConfig {
        ReduceConfig {
            target_count: self.target_count,
            per_group_cap: self.per_group_cap,
            discard_ratio: self.discard_ratio,
            context_budget: self.context_budget,
            output_allowance: self.output_allowance,
            concurrency,
            mode: self.window_mode,
            window_size: self.window_size,
        }
    }
}

/// Concurrency configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Concurrent raw fetch/search/download calls
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Concurrent oracle calls for filtering/appraisal/extraction/ranking
    #[serde(default = "default_oracle_concurrency")]
    pub oracle_concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            oracle_concurrency: default_oracle_concurrency(),
            worker_threads: None,
        }
    }
}

/// Scoring oracle endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_oracle_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_oracle_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Log requests upstream (disable for tests and sensitive input)
    #[serde(default)]
    pub log_requests: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_oracle_base_url(),
            model: default_oracle_model(),
            api_key_env: default_api_key_env(),
            log_requests: false,
        }
    }
}

/// Run persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for persisted runs (unset = CLI default)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON.
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate the configuration.
    ///
    /// The handle itself is checked by the validate-input stage so that a
    /// bad handle surfaces as a recorded validation failure, not a config
    /// error.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.input.relevancy_cutoff.is_finite()
            || !(0.0..=1.0).contains(&self.input.relevancy_cutoff)
        {
            anyhow::bail!("relevancy_cutoff must be within [0, 1]");
        }
        if self.input.max_posts == 0 {
            anyhow::bail!("max_posts must be > 0");
        }
        if self.input.max_queries == 0 {
            anyhow::bail!("max_queries must be > 0");
        }
        if self.ranking.target_count == 0 {
            anyhow::bail!("target_count must be > 0");
        }
        if self.ranking.per_group_cap == 0 {
            anyhow::bail!("per_group_cap must be > 0");
        }
        if !(self.ranking.discard_ratio > 0.0 && self.ranking.discard_ratio < 1.0) {
            anyhow::bail!("discard_ratio must be within (0, 1)");
        }
        if self.ranking.window_size < 2 {
            anyhow::bail!("window_size must be >= 2");
        }
        if self.ranking.context_budget <= self.ranking.output_allowance {
            anyhow::bail!("context_budget must exceed output_allowance");
        }
        if self.processing.fetch_concurrency == 0 || self.processing.oracle_concurrency == 0 {
            anyhow::bail!("concurrency limits must be > 0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_relevancy_cutoff() -> f64 {
    0.6
}
fn default_max_posts() -> usize {
    30
}
fn default_max_queries() -> usize {
    5
}
fn default_target_count() -> usize {
    30
}
fn default_per_group_cap() -> usize {
    3
}
fn default_discard_ratio() -> f64 {
    0.5
}
fn default_window_mode() -> WindowMode {
    WindowMode::IndependentChunks
}
fn default_window_size() -> usize {
    4
}
fn default_context_budget() -> usize {
    8192
}
fn default_output_allowance() -> usize {
    500
}
fn default_fetch_concurrency() -> usize {
    3
}
fn default_oracle_concurrency() -> usize {
    10
}
fn default_oracle_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_oracle_model() -> String {
    "gpt-4".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::rank::WindowMode;

    fn minimal_yaml() -> &'static str {
        "input:\n  handle: experilearning\n"
    }

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let config = Config::from_yaml(minimal_yaml()).unwrap();
        assert_eq!(config.input.handle, "experilearning");
        assert!((config.input.relevancy_cutoff - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.input.max_posts, 30);
        assert_eq!(config.ranking.target_count, 30);
        assert_eq!(config.ranking.per_group_cap, 3);
        assert_eq!(config.ranking.context_budget, 8192);
        assert_eq!(config.ranking.output_allowance, 500);
        assert_eq!(config.ranking.window_mode, WindowMode::IndependentChunks);
        assert_eq!(config.processing.fetch_concurrency, 3);
        assert_eq!(config.processing.oracle_concurrency, 10);
        assert!(config.store.path.is_none());
        assert!(!config.oracle.log_requests);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_window_mode_parses_kebab_case() {
        let yaml = "input:\n  handle: u\nranking:\n  window_mode: sliding-tournament\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.ranking.window_mode, WindowMode::SlidingTournament);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::from_yaml(minimal_yaml()).unwrap();
        config.input.relevancy_cutoff = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(minimal_yaml()).unwrap();
        config.ranking.discard_ratio = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(minimal_yaml()).unwrap();
        config.ranking.window_size = 1;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(minimal_yaml()).unwrap();
        config.ranking.output_allowance = config.ranking.context_budget;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(minimal_yaml()).unwrap();
        config.processing.oracle_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reduce_config_carries_ranking_fields() {
        let config = Config::from_yaml(minimal_yaml()).unwrap();
        let reduce = config.ranking.reduce_config(10);
        assert_eq!(reduce.target_count, 30);
        assert_eq!(reduce.per_group_cap, 3);
        assert_eq!(reduce.concurrency, 10);
        assert_eq!(reduce.context_budget, 8192);
    }
}
