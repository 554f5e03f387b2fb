//src/config.rs

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::index::Similarity;

pub const DEFAULT_KMER_SIZE: usize = 10;
pub const DEFAULT_KMER_SKIPS: usize = 5;
pub const DEFAULT_MIN_SHOULD_MATCH: f64 = 0.5;
pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const DEFAULT_SCORING_ALGORITHM: &str = "default";
pub const DEFAULT_HITS_PER_PAGE: usize = 10;
pub const DEFAULT_TIE_TOLERANCE: f32 = 1.0;
pub const DEFAULT_MAX_CLAUSE_COUNT: usize = 10_000;

pub const DEFAULT_BROKER_PORT: u16 = 7878;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_TIMEOUTS: u32 = 3;
pub const DEFAULT_MAX_INFLIGHT: usize = 4;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How query k-mers are turned into boolean clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryGeneration {
    NaiveKmer,
    ChainProximity,
    #[default]
    PairedProximity,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Index build and classification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub index_path: PathBuf,
    pub kmer_size: usize,
    pub kmer_skips: usize,
    #[serde(alias = "query_term_min_should_match")]
    pub query_min_should_match: f64,
    pub worker_threads: usize,
    pub scoring_algorithm: String,
    pub query_generation_algorithm: QueryGeneration,
    pub canonical_kmers: bool,
    pub hits_per_page: usize,
    /// Absolute score distance from the best hit that still counts as a tie.
    /// Calibrated for the classic scoring model.
    pub tie_tolerance: f32,
    pub max_clause_count: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            index_path: PathBuf::new(),
            kmer_size: DEFAULT_KMER_SIZE,
            kmer_skips: DEFAULT_KMER_SKIPS,
            query_min_should_match: DEFAULT_MIN_SHOULD_MATCH,
            worker_threads: DEFAULT_WORKER_THREADS,
            scoring_algorithm: DEFAULT_SCORING_ALGORITHM.to_string(),
            query_generation_algorithm: QueryGeneration::default(),
            canonical_kmers: false,
            hits_per_page: DEFAULT_HITS_PER_PAGE,
            tie_tolerance: DEFAULT_TIE_TOLERANCE,
            max_clause_count: DEFAULT_MAX_CLAUSE_COUNT,
        }
    }
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let conf: Self = read_json(path.as_ref())?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let conf: Self = serde_json::from_str(json)?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        write_json(self, path.as_ref())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kmer_size < 1 {
            return Err(ConfigError::Invalid("kmer_size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.query_min_should_match) {
            return Err(ConfigError::Invalid(format!(
                "query_min_should_match must be within [0, 1], got {}",
                self.query_min_should_match
            )));
        }
        if self.worker_threads < 1 {
            return Err(ConfigError::Invalid("worker_threads must be at least 1".into()));
        }
        if self.hits_per_page < 1 {
            return Err(ConfigError::Invalid("hits_per_page must be at least 1".into()));
        }
        if self.tie_tolerance < 0.0 {
            return Err(ConfigError::Invalid("tie_tolerance must not be negative".into()));
        }
        Ok(())
    }

    /// Scoring model for `scoring_algorithm`; unknown names fall back to the
    /// classic model.
    pub fn similarity(&self) -> Similarity {
        if self.scoring_algorithm.is_empty() {
            return Similarity::Classic;
        }
        Similarity::from_name(&self.scoring_algorithm).unwrap_or_else(|| {
            log::warn!(
                "Unknown scoring algorithm '{}', using default",
                self.scoring_algorithm
            );
            Similarity::Classic
        })
    }
}

/// Where a classification client finds its brokers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfiguration {
    pub broker_hostnames: Vec<String>,
    pub broker_port: u16,
    pub broker_user_id: Option<String>,
    pub broker_user_pwd: Option<String>,
    pub request_timeout_secs: u64,
    /// Consecutive timeouts before a connection is given up on.
    pub max_timeouts: u32,
    /// Requests allowed in flight per connection.
    pub max_inflight: usize,
    pub sweep_interval_ms: u64,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            broker_hostnames: Vec::new(),
            broker_port: DEFAULT_BROKER_PORT,
            broker_user_id: None,
            broker_user_pwd: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl ClientConfiguration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let conf: Self = read_json(path.as_ref())?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        write_json(self, path.as_ref())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_hostnames.is_empty() {
            return Err(ConfigError::Invalid("broker_hostnames is empty".into()));
        }
        if self.max_inflight < 1 {
            return Err(ConfigError::Invalid("max_inflight must be at least 1".into()));
        }
        if self.max_timeouts < 1 {
            return Err(ConfigError::Invalid("max_timeouts must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be at least 1".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep_interval_ms must be at least 1".into()));
        }
        Ok(())
    }
}

/// Classification settings plus the broker the server consumes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfiguration {
    #[serde(flatten)]
    pub classifier: Configuration,
    #[serde(default = "default_hostname")]
    pub broker_hostname: String,
    #[serde(default = "default_port")]
    pub broker_port: u16,
    #[serde(default)]
    pub broker_user_id: Option<String>,
    #[serde(default)]
    pub broker_user_pwd: Option<String>,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_BROKER_PORT
}

impl ServerConfiguration {
    pub fn new(classifier: Configuration) -> Self {
        Self {
            classifier,
            broker_hostname: default_hostname(),
            broker_port: default_port(),
            broker_user_id: None,
            broker_user_pwd: None,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let conf: Self = read_json(path.as_ref())?;
        conf.classifier.validate()?;
        Ok(conf)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        write_json(self, path.as_ref())
    }
}
