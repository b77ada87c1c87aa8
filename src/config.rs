use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::BuildError;

/// Key under which [`BuildConfig::global_metadata`] is merged into every document model.
pub const GLOBAL_METADATA_KEY: &str = "__global";

fn default_display_language() -> String {
    "csharp".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("_site")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Catalog locations (`http(s)` URLs or local paths), queried in this order.
    #[serde(default)]
    pub xref_maps: Vec<String>,
    #[serde(default)]
    pub packages: Vec<PathBuf>,
    /// Worker limit for the transformation phase. 0 means one worker per CPU.
    #[serde(default)]
    pub max_parallelism: usize,
    #[serde(default = "default_display_language")]
    pub display_language: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics_dir: Option<PathBuf>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub global_metadata: Map<String, Value>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            xref_maps: Vec::new(),
            packages: Vec::new(),
            max_parallelism: 0,
            display_language: default_display_language(),
            output_dir: default_output_dir(),
            diagnostics_dir: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            global_metadata: Map::new(),
        }
    }
}

impl BuildConfig {
    /// Read a TOML config. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<BuildConfig, BuildError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read build config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(BuildConfig::default());
        }
        let content = read_to_string(path)?;
        let config: BuildConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), BuildError> {
        tracing::debug!("Attempting to write build config to: {:?}", path.as_ref());
        let toml_string = toml::to_string(self)?;
        write(path, toml_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.display_language.trim().is_empty() {
            return Err(BuildError::Config(
                "display_language must not be empty".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(BuildError::Config(
                "fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn diagnostics_dir(&self) -> PathBuf {
        self.diagnostics_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".diagnostics"))
    }

    pub fn worker_count(&self) -> usize {
        if self.max_parallelism == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.max_parallelism
        }
    }
}
