use anyhow::Result;
use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MODEL_DIR_ENV: &str = "LIPI_MODEL_DIR";
pub const DEFAULT_MODEL_NAME: &str = "mbart-large-50-many-to-many-mmt";

/// Where the checkpoint lives and how to run it. Unset generation fields
/// fall back to the checkpoint's own `config.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub model_dir: Option<PathBuf>,
    pub device: Option<String>, // cpu, cuda, cuda:N
    pub max_input_length: Option<usize>,
    pub max_length: Option<usize>,
    pub num_beams: Option<usize>,
    pub length_penalty: Option<f64>,
}

impl TranslationConfig {
    pub fn get_default_device() -> &'static str {
        "cpu"
    }

    pub fn get_default_max_input_length() -> usize {
        1024
    }

    pub fn get_default_model_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("lipi").join("models").join(DEFAULT_MODEL_NAME))
    }

    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(Self::get_default_device())
    }

    pub fn max_input_length(&self) -> usize {
        self.max_input_length.unwrap_or(Self::get_default_max_input_length())
    }

    /// Model directory: explicit config, then `LIPI_MODEL_DIR`, then the per-user data dir.
    pub fn resolve_model_dir(&self) -> Result<PathBuf> {
        let env_dir = std::env::var_os(MODEL_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        self.model_dir
            .clone()
            .or(env_dir)
            .or_else(Self::get_default_model_dir)
            .ok_or_else(|| anyhow::anyhow!("No model directory configured, set {}", MODEL_DIR_ENV))
    }
}

/// Parses `cpu`, `cuda`/`gpu` or `cuda:N` into a candle device.
pub fn parse_device(device_str: &str) -> Result<Device> {
    let device_str = device_str.to_lowercase();
    match device_str.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => cuda_device(0),
        s if s.starts_with("cuda:") => {
            let ordinal: usize = s["cuda:".len()..]
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid CUDA device ordinal: {}", s))?;
            cuda_device(ordinal)
        }
        _ => Err(anyhow::anyhow!(
            "Unknown device: {}. Use 'cpu', 'cuda', or 'cuda:N'",
            device_str
        )),
    }
}

#[cfg(feature = "cuda")]
fn cuda_device(ordinal: usize) -> Result<Device> {
    Ok(Device::new_cuda(ordinal)?)
}

#[cfg(not(feature = "cuda"))]
fn cuda_device(_ordinal: usize) -> Result<Device> {
    anyhow::bail!("CUDA support not enabled. Compile with --features cuda")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TranslationConfig::default();
        assert_eq!(config.device(), "cpu");
        assert_eq!(config.max_input_length(), 1024);
        assert!(config.num_beams.is_none());
    }

    #[test]
    fn test_explicit_model_dir_wins() {
        let config = TranslationConfig {
            model_dir: Some(PathBuf::from("/models/mbart")),
            ..Default::default()
        };
        assert_eq!(config.resolve_model_dir().unwrap(), PathBuf::from("/models/mbart"));
    }

    #[test]
    fn test_parse_device() {
        assert!(matches!(parse_device("cpu").unwrap(), Device::Cpu));
        assert!(matches!(parse_device("CPU").unwrap(), Device::Cpu));
        assert!(parse_device("tpu").is_err());
        assert!(parse_device("cuda:x").is_err());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_requires_feature() {
        let err = parse_device("cuda").unwrap_err();
        assert!(err.to_string().contains("--features cuda"));
    }
}
