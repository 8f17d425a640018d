use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::recommend::{Combine, RecommendParams};

pub const DEFAULT_CONFIG_FILE: &str = "lessonkit.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embed: EmbedConfig,
    pub cluster: ClusterConfig,
    pub recommend: RecommendConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub backend: EmbedBackend,
    /// Prepended to each lesson when building the index (E5 models expect "passage: ")
    pub passage_prefix: String,
    /// Prepended to free-text queries (E5 models expect "query: ")
    pub query_prefix: String,
    /// Lessons sent per embedding batch
    pub batch_size: usize,
    pub retry: RetryConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbedBackend {
    #[serde(rename = "mock")]
    Mock { dimensions: usize },
    #[serde(rename = "ollama")]
    Ollama { model: String, url: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    /// Cap on any single wait between attempts
    pub max_backoff_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cosine threshold for raw candidate clustering
    pub threshold: f32,
    /// Cosine threshold when re-clustering curated representatives
    pub recluster_threshold: f32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub min_cos: f32,
    pub max_similar: f32,
    pub topk_per_seed: usize,
    pub overall_topk: usize,
    pub exclude_same: bool,
    pub tau_days: f64,
    pub w_min: f64,
    pub combine: Combine,
    pub band_low_pct: f64,
    pub band_high_pct: f64,
    pub no_repeat_days: f64,
    pub topm_per_cluster: usize,
    /// Only used when > 0
    pub random_pick_threshold: f32,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: EmbedBackend::Mock {
                dimensions: crate::embed::mock::DEFAULT_DIMENSIONS,
            },
            passage_prefix: String::new(),
            query_prefix: String::new(),
            batch_size: 64,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            multiplier: 2.0,
            max_backoff_ms: 60_000,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold: 0.88,
            recluster_threshold: 0.83,
        }
    }
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            min_cos: 0.25,
            max_similar: 0.90,
            topk_per_seed: 50,
            overall_topk: 10,
            exclude_same: true,
            tau_days: 7.0,
            w_min: 0.2,
            combine: Combine::Max,
            band_low_pct: 70.0,
            band_high_pct: 90.0,
            no_repeat_days: 180.0,
            topm_per_cluster: 200,
            random_pick_threshold: -1.0,
        }
    }
}

impl RecommendConfig {
    pub fn params(&self) -> RecommendParams {
        RecommendParams {
            min_cos: self.min_cos,
            max_similar: self.max_similar,
            topk_per_seed: self.topk_per_seed,
            overall_topk: self.overall_topk,
            exclude_same: self.exclude_same,
            combine: self.combine,
            band_low_pct: self.band_low_pct,
            band_high_pct: self.band_high_pct,
            topm_per_cluster: self.topm_per_cluster,
            random_pick_threshold: (self.random_pick_threshold > 0.0)
                .then_some(self.random_pick_threshold),
        }
    }
}

impl Config {
    /// Load config from `path`, or from ./lessonkit.toml when present,
    /// falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default.to_path_buf()
            }
        };
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading config from {}", config_path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("parsing config from {}", config_path.display()))
    }

    /// Write current config to disk (for `lessonkit init-config`).
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("writing config to {}", path.display()))?;
        Ok(())
    }
}
