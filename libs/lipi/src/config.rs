use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::image2text::OcrConfig;
use crate::translate::TranslationConfig;

pub const CONFIG_ENV: &str = "LIPI_CONFIG";
const CONFIG_FILE_NAME: &str = "config.json";

/// Settings shared by the extract, translate and pipeline binaries.
/// Every field is optional so a partial file only overrides what it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LipiConfig {
    pub ocr: OcrConfig,
    pub translation: TranslationConfig,
}

impl LipiConfig {
    pub fn get_default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lipi").join(CONFIG_FILE_NAME))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Resolves the config file: `explicit`, then `LIPI_CONFIG`, then the
    /// per-user config dir if the file exists. Defaults when none is found.
    /// An explicitly named file that cannot be read is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Self::from_path(PathBuf::from(path));
        }
        match Self::get_default_path() {
            Some(path) if path.is_file() => {
                log::debug!("Using config file {}", path.display());
                Self::from_path(path)
            }
            _ => Ok(Self::default()),
        }
    }
}
