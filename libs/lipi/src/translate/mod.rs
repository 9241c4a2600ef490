//! Neural machine translation with the mBART-50 many-to-many checkpoint.

mod generation;
mod languages;
mod mbart;
mod tokenizer;
mod types;

use anyhow::{Context, Result};
use std::time::Instant;

pub use generation::{generate, GenerationConfig, StepScorer};
pub use languages::{is_supported, DEFAULT_TARGET_LANG, MBART50_LANGUAGE_CODES};
pub use mbart::{MBartConfig, MBartModel};
pub use tokenizer::MBartTokenizer;
pub use types::{parse_device, TranslationConfig, DEFAULT_MODEL_NAME, MODEL_DIR_ENV};

/// Maps language codes to vocabulary ids and text to model tokens.
pub trait LanguageTokenizer {
    fn lang_code_to_id(&self, code: &str) -> Result<u32>;
    /// Token ids for `text` in source-language mode.
    fn encode(&self, text: &str, src_lang_code: &str) -> Result<Vec<u32>>;
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;
}

/// A sequence-to-sequence model that generates candidates best first.
pub trait Seq2SeqModel {
    fn generate(&self, input_ids: &[u32], forced_bos_token_id: u32) -> Result<Vec<Vec<u32>>>;
}

/// Translates `text` from `src_lang_code` into `tgt_lang_code`.
///
/// The target language token is forced as the first generated token and only
/// the best candidate is decoded.
pub fn translate(
    tokenizer: &dyn LanguageTokenizer,
    model: &dyn Seq2SeqModel,
    text: &str,
    src_lang_code: &str,
    tgt_lang_code: &str,
) -> Result<String> {
    let input_ids = tokenizer.encode(text, src_lang_code)?;
    let forced_bos_token_id = tokenizer.lang_code_to_id(tgt_lang_code)?;
    log::debug!(
        "Translating {} tokens {} -> {}",
        input_ids.len(),
        src_lang_code,
        tgt_lang_code
    );

    let candidates = model.generate(&input_ids, forced_bos_token_id)?;
    let best = candidates
        .first()
        .ok_or_else(|| anyhow::anyhow!("Model produced no translation candidates"))?;
    let text = tokenizer.decode(best, true)?;
    Ok(text.trim().to_string())
}

/// Tokenizer and model loaded once and reused across calls.
pub struct Translator {
    tokenizer: MBartTokenizer,
    model: MBartModel,
}

impl Translator {
    /// Loads `tokenizer.json`, `config.json` and the weights from the resolved model directory.
    pub fn load(config: &TranslationConfig) -> Result<Self> {
        let start = Instant::now();
        let model_dir = config.resolve_model_dir()?;
        if !model_dir.is_dir() {
            anyhow::bail!(
                "Model directory {} does not exist. Download {} there or set {}",
                model_dir.display(),
                DEFAULT_MODEL_NAME,
                MODEL_DIR_ENV
            );
        }
        log::info!("Loading translation model from {}", model_dir.display());

        let model_config = MBartConfig::from_path(model_dir.join("config.json"))?;

        let mut generation = model_config.generation_config();
        if let Some(max_length) = config.max_length {
            generation.max_length = max_length;
        }
        if let Some(num_beams) = config.num_beams {
            generation.num_beams = num_beams;
        }
        if let Some(length_penalty) = config.length_penalty {
            generation.length_penalty = length_penalty;
        }
        let max_input_length = checked_limits(
            config.max_input_length(),
            generation.max_length,
            model_config.max_position_embeddings,
        )?;

        let tokenizer = MBartTokenizer::from_file(model_dir.join("tokenizer.json"), max_input_length)?;
        generation.eos_token_id = tokenizer.eos_token_id();

        let device = parse_device(config.device())?;
        let model = MBartModel::load(&model_dir, &model_config, generation, device)
            .with_context(|| format!("Failed to load model weights from {}", model_dir.display()))?;

        log::info!(
            "Translation model ready in {:?} (beams: {}, max_length: {})",
            start.elapsed(),
            model.generation_config().num_beams,
            model.generation_config().max_length
        );
        Ok(Self { tokenizer, model })
    }

    pub fn translate(&self, text: &str, src_lang_code: &str, tgt_lang_code: &str) -> Result<String> {
        let start = Instant::now();
        let result = translate(&self.tokenizer, &self.model, text, src_lang_code, tgt_lang_code);
        log::debug!("Translation took {:?}", start.elapsed());
        result
    }
}

/// Checks the configured lengths against the model's position table and
/// returns the tokenizer input limit, capped at that table.
fn checked_limits(max_input_length: usize, max_length: usize, max_positions: usize) -> Result<usize> {
    if max_input_length < 2 {
        anyhow::bail!(
            "max_input_length must be at least 2 (language code and </s>), got {}",
            max_input_length
        );
    }
    if max_length > max_positions {
        anyhow::bail!(
            "max_length {} exceeds the model's {} position embeddings",
            max_length,
            max_positions
        );
    }
    if max_input_length > max_positions {
        log::warn!(
            "max_input_length {} exceeds the model's {} positions, capping",
            max_input_length,
            max_positions
        );
    }
    Ok(max_input_length.min(max_positions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeTokenizer;

    impl LanguageTokenizer for FakeTokenizer {
        fn lang_code_to_id(&self, code: &str) -> Result<u32> {
            match code {
                "ne_NP" => Ok(10),
                "si_LK" => Ok(11),
                "en_XX" => Ok(12),
                other => anyhow::bail!("Unknown language code '{}'", other),
            }
        }

        fn encode(&self, text: &str, src_lang_code: &str) -> Result<Vec<u32>> {
            let mut ids = vec![self.lang_code_to_id(src_lang_code)?];
            ids.extend(text.split_whitespace().map(|w| w.len() as u32 + 100));
            ids.push(2);
            Ok(ids)
        }

        fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
            Ok(ids
                .iter()
                .filter(|&&id| !skip_special_tokens || id >= 100)
                .map(|id| format!("w{}", id))
                .collect::<Vec<_>>()
                .join(" ")
                + " ")
        }
    }

    #[derive(Default)]
    struct FakeModel {
        calls: RefCell<Vec<(Vec<u32>, u32)>>,
    }

    impl Seq2SeqModel for FakeModel {
        fn generate(&self, input_ids: &[u32], forced_bos_token_id: u32) -> Result<Vec<Vec<u32>>> {
            self.calls.borrow_mut().push((input_ids.to_vec(), forced_bos_token_id));
            Ok(vec![vec![2, forced_bos_token_id, 101, 102, 2], vec![2, forced_bos_token_id, 999, 2]])
        }
    }

    #[test]
    fn test_translate_forces_target_language() {
        let model = FakeModel::default();
        let text = translate(&FakeTokenizer, &model, "a bc", "ne_NP", "en_XX").unwrap();

        assert_eq!(text, "w101 w102");
        let calls = model.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (vec![10, 101, 102, 2], 12));
    }

    #[test]
    fn test_only_best_candidate_is_decoded() {
        let model = FakeModel::default();
        let text = translate(&FakeTokenizer, &model, "x", "si_LK", "ne_NP").unwrap();
        assert!(!text.contains("w999"));
    }

    #[test]
    fn test_unknown_target_code_fails() {
        let model = FakeModel::default();
        assert!(translate(&FakeTokenizer, &model, "a", "ne_NP", "xx_YY").is_err());
        assert!(translate(&FakeTokenizer, &model, "a", "xx_YY", "en_XX").is_err());
        assert!(model.calls.borrow().is_empty());
    }

    #[test]
    fn test_empty_candidates_fail() {
        struct SilentModel;
        impl Seq2SeqModel for SilentModel {
            fn generate(&self, _: &[u32], _: u32) -> Result<Vec<Vec<u32>>> {
                Ok(Vec::new())
            }
        }
        assert!(translate(&FakeTokenizer, &SilentModel, "a", "ne_NP", "en_XX").is_err());
    }

    #[test]
    fn test_input_limit_is_capped_at_model_positions() {
        assert_eq!(checked_limits(1024, 200, 1024).unwrap(), 1024);
        assert_eq!(checked_limits(4096, 200, 1024).unwrap(), 1024);
        assert_eq!(checked_limits(2, 200, 1024).unwrap(), 2);
    }

    #[test]
    fn test_tiny_input_limit_is_rejected() {
        let err = checked_limits(1, 200, 1024).unwrap_err();
        assert!(err.to_string().contains("max_input_length"));
        assert!(checked_limits(0, 200, 1024).is_err());
    }

    #[test]
    fn test_max_length_beyond_positions_is_rejected() {
        let err = checked_limits(1024, 2048, 1024).unwrap_err();
        assert!(err.to_string().contains("max_length 2048"));
        assert!(checked_limits(1024, 1024, 1024).is_ok());
    }

    #[test]
    fn test_load_missing_model_dir() {
        let config = TranslationConfig {
            model_dir: Some("/nonexistent/lipi-model".into()),
            ..Default::default()
        };
        let err = Translator::load(&config).err().unwrap();
        assert!(err.to_string().contains("does not exist"));
    }
}
