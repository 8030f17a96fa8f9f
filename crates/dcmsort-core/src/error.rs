use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    /// A single record could not be read; the file is skipped.
    #[error("Unreadable record {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("Grouping configuration error: {0}")]
    GroupingConfig(String),

    #[error("Plan configuration error: {0}")]
    PlanConfig(String),

    #[error("Heuristic '{heuristic}' lacks required capability '{capability}'")]
    MissingCapability {
        heuristic: String,
        capability: &'static str,
    },

    #[error("Corrupt plan cache at {path}: {reason}")]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("Converter error: {0}")]
    Converter(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Structural errors abort the whole batch instead of a single unit of work.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(
            self,
            Error::GroupingConfig(_) | Error::MissingCapability { .. } | Error::Config(_)
        )
    }
}
