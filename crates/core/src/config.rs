use serde::Deserialize;
use std::path::Path;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `AUDIENCE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default = "default_match_limit")]
    pub default_match_limit: usize,
    #[serde(default = "default_max_match_limit")]
    pub max_match_limit: usize,
    /// Customer collections larger than this are evaluated in parallel.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    /// Time of day used when a campaign has no explicit start time (`HH:MM`).
    #[serde(default = "default_send_time")]
    pub default_send_time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Skip (campaign, step, customer) keys that were already delivered.
    #[serde(default = "default_dedupe")]
    pub dedupe: bool,
}

fn default_match_limit() -> usize {
    100
}
fn default_max_match_limit() -> usize {
    10_000
}
fn default_parallel_threshold() -> usize {
    50_000
}
fn default_send_time() -> String {
    "00:00".to_string()
}
fn default_dedupe() -> bool {
    true
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            default_match_limit: default_match_limit(),
            max_match_limit: default_max_match_limit(),
            parallel_threshold: default_parallel_threshold(),
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            default_send_time: default_send_time(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            dedupe: default_dedupe(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            scheduling: SchedulingConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then environment
    /// variables (`AUDIENCE__SEGMENTATION__DEFAULT_MATCH_LIMIT=50`).
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("AUDIENCE")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
