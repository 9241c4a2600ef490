//! mBART model configuration, read from the checkpoint's `config.json`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::translate::generation::GenerationConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MBartConfig {
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    #[serde(default = "default_d_model")]
    pub d_model: usize,

    #[serde(default = "default_layers")]
    pub encoder_layers: usize,

    #[serde(default = "default_layers")]
    pub decoder_layers: usize,

    #[serde(default = "default_attention_heads")]
    pub encoder_attention_heads: usize,

    #[serde(default = "default_attention_heads")]
    pub decoder_attention_heads: usize,

    #[serde(default = "default_ffn_dim")]
    pub encoder_ffn_dim: usize,

    #[serde(default = "default_ffn_dim")]
    pub decoder_ffn_dim: usize,

    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,

    #[serde(default = "default_true")]
    pub scale_embedding: bool,

    #[serde(default = "default_activation_function")]
    pub activation_function: String,

    #[serde(default = "default_pad_token_id")]
    pub pad_token_id: u32,

    #[serde(default = "default_eos_token_id")]
    pub eos_token_id: u32,

    #[serde(default = "default_eos_token_id")]
    pub decoder_start_token_id: u32,

    #[serde(default = "default_forced_eos_token_id")]
    pub forced_eos_token_id: Option<u32>,

    /// Generation defaults shipped with the checkpoint
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default = "default_num_beams")]
    pub num_beams: usize,

    #[serde(default = "default_true")]
    pub early_stopping: bool,

    #[serde(default = "default_length_penalty")]
    pub length_penalty: f64,
}

fn default_vocab_size() -> usize {
    250054
}

fn default_d_model() -> usize {
    1024
}

fn default_layers() -> usize {
    12
}

fn default_attention_heads() -> usize {
    16
}

fn default_ffn_dim() -> usize {
    4096
}

fn default_max_position_embeddings() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_activation_function() -> String {
    "gelu".to_string()
}

fn default_pad_token_id() -> u32 {
    1
}

fn default_eos_token_id() -> u32 {
    2
}

fn default_forced_eos_token_id() -> Option<u32> {
    Some(2)
}

fn default_max_length() -> usize {
    200
}

fn default_num_beams() -> usize {
    5
}

fn default_length_penalty() -> f64 {
    1.0
}

impl Default for MBartConfig {
    fn default() -> Self {
        Self {
            vocab_size: default_vocab_size(),
            d_model: default_d_model(),
            encoder_layers: default_layers(),
            decoder_layers: default_layers(),
            encoder_attention_heads: default_attention_heads(),
            decoder_attention_heads: default_attention_heads(),
            encoder_ffn_dim: default_ffn_dim(),
            decoder_ffn_dim: default_ffn_dim(),
            max_position_embeddings: default_max_position_embeddings(),
            scale_embedding: true,
            activation_function: default_activation_function(),
            pad_token_id: default_pad_token_id(),
            eos_token_id: default_eos_token_id(),
            decoder_start_token_id: default_eos_token_id(),
            forced_eos_token_id: default_forced_eos_token_id(),
            max_length: default_max_length(),
            num_beams: default_num_beams(),
            early_stopping: true,
            length_penalty: default_length_penalty(),
        }
    }
}

impl MBartConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model config {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse model config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.d_model % self.encoder_attention_heads != 0 || self.d_model % self.decoder_attention_heads != 0 {
            anyhow::bail!(
                "d_model {} is not divisible by the attention head count",
                self.d_model
            );
        }
        Ok(())
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            max_length: self.max_length,
            num_beams: self.num_beams,
            length_penalty: self.length_penalty,
            early_stopping: self.early_stopping,
            decoder_start_token_id: self.decoder_start_token_id,
            eos_token_id: self.eos_token_id,
            forced_eos_token_id: self.forced_eos_token_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_mbart_large_50() {
        let cfg = MBartConfig::default();
        assert_eq!(cfg.vocab_size, 250054);
        assert_eq!(cfg.d_model, 1024);
        assert_eq!(cfg.decoder_layers, 12);
        assert_eq!(cfg.decoder_start_token_id, 2);
        assert_eq!(cfg.num_beams, 5);
        assert!(cfg.scale_embedding);
    }

    #[test]
    fn test_parses_checkpoint_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "_name_or_path": "facebook/mbart-large-50-many-to-many-mmt",
                "activation_function": "gelu",
                "architectures": ["MBartForConditionalGeneration"],
                "d_model": 1024,
                "decoder_layers": 12,
                "encoder_layers": 12,
                "forced_eos_token_id": 2,
                "max_length": 200,
                "num_beams": 5,
                "vocab_size": 250054
            }"#,
        )
        .unwrap();

        let cfg = MBartConfig::from_path(&path).unwrap();
        let generation = cfg.generation_config();
        assert_eq!(generation.max_length, 200);
        assert_eq!(generation.num_beams, 5);
        assert_eq!(generation.forced_eos_token_id, Some(2));
    }

    #[test]
    fn test_rejects_bad_head_count() {
        let cfg: MBartConfig = serde_json::from_str(r#"{"d_model": 1000, "encoder_attention_heads": 16}"#).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MBartConfig::from_path(dir.path().join("config.json")).is_err());
    }
}
