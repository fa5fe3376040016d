//! Configuration options for vizflow.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VizflowError};

/// Global configuration options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Object collector behavior.
    pub collector: CollectorOptions,

    /// Pipeline executive behavior.
    pub pipeline: PipelineOptions,
}

/// Options for the object collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorOptions {
    /// Whether to look for unreachable cycles when an object that holds
    /// references is released but stays alive. When off, such objects wait
    /// for `collect()` or the end of deferred collection.
    pub collect_on_unregister: bool,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            collect_on_unregister: true,
        }
    }
}

/// Options for pipeline executives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Cache size given to nodes created with a cached executive.
    pub default_cache_size: usize,

    /// Drop upstream outputs once every consumer has executed.
    pub release_data_after_use: bool,

    /// Ghost levels requested when a terminal port has no explicit request.
    pub default_ghost_levels: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            default_cache_size: 10,
            release_data_after_use: false,
            default_ghost_levels: 0,
        }
    }
}

impl Options {
    /// Parses options from a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serializes the options as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.default_cache_size == 0 {
            return Err(VizflowError::InvalidOption {
                name: "pipeline.default_cache_size",
                reason: "cache size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
