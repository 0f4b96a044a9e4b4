//! Runtime configuration for the search pipeline.
//!
//! Configuration can be built directly, loaded from a TOML file, or merged
//! from a file plus `TWOPASS_`-prefixed environment variables via `figment`.

use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SearchError};

/// Default number of entries pre-allocated in a backpointer table.
pub const DEFAULT_BP_CAPACITY: usize = 4096;

/// Default number of arcs pre-allocated in an arc buffer.
pub const DEFAULT_ARC_CAPACITY: usize = 4096;

/// Configuration shared by the backpointer table and the arc buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of possible right-context phonetic units.
    ///
    /// Fixed for the lifetime of a buffer; sizes the per-arc bit-vector and
    /// the per-entry right-context score tables.
    pub n_right_contexts: usize,

    /// Whether arcs carry absolute scores and right-context score deltas.
    pub keep_scores: bool,

    /// Initial capacity of the backpointer entry array.
    pub bp_capacity: usize,

    /// Initial capacity of the arc array.
    pub arc_capacity: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_right_contexts: 0,
            keep_scores: false,
            bp_capacity: DEFAULT_BP_CAPACITY,
            arc_capacity: DEFAULT_ARC_CAPACITY,
        }
    }
}

impl SearchConfig {
    /// Load configuration from an optional TOML file merged with
    /// `TWOPASS_`-prefixed environment variables.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: SearchConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TWOPASS_"))
            .extract()
            .map_err(|e| SearchError::Config(e.to_string()))?;
        config.validate()?;
        debug!(?config, "loaded search configuration");
        Ok(config)
    }

    /// Render the configuration as pretty TOML, for diagnostics and for
    /// writing a template file a user can edit.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SearchError::Config(e.to_string()))
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.keep_scores && self.n_right_contexts == 0 {
            return Err(SearchError::Config(
                "keep_scores requires a non-zero right-context count".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SearchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_scores_require_right_contexts() {
        let config = SearchConfig {
            keep_scores: true,
            n_right_contexts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SearchError::Config(_))));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "n_right_contexts = 42\nkeep_scores = true").unwrap();

        let config = SearchConfig::load(file.path()).unwrap();
        assert_eq!(config.n_right_contexts, 42);
        assert!(config.keep_scores);
        assert_eq!(config.bp_capacity, DEFAULT_BP_CAPACITY);
    }

    #[test]
    fn test_to_toml_string_roundtrips() {
        let config = SearchConfig {
            keep_scores: true,
            n_right_contexts: 42,
            ..Default::default()
        };
        let rendered = config.to_toml_string().unwrap();
        let parsed: SearchConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.n_right_contexts, 42);
        assert!(parsed.keep_scores);
        assert_eq!(parsed.bp_capacity, DEFAULT_BP_CAPACITY);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = SearchConfig::load("/nonexistent/twopass.toml").unwrap();
        assert_eq!(config.n_right_contexts, 0);
        assert!(!config.keep_scores);
    }
}
