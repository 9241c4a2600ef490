use anyhow::Result;
use std::path::Path;
use tokenizers::Tokenizer;

use super::languages;
use super::LanguageTokenizer;

const EOS_TOKEN: &str = "</s>";
const DEFAULT_EOS_TOKEN_ID: u32 = 2;

/// mBART-50 tokenizer: source text is encoded as `[src_lang] tokens </s>`.
pub struct MBartTokenizer {
    tokenizer: Tokenizer,
    eos_token_id: u32,
    max_input_length: usize,
}

impl MBartTokenizer {
    pub fn from_file(path: impl AsRef<Path>, max_input_length: usize) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))?;
        Ok(Self::new(tokenizer, max_input_length))
    }

    pub fn new(tokenizer: Tokenizer, max_input_length: usize) -> Self {
        let eos_token_id = tokenizer.token_to_id(EOS_TOKEN).unwrap_or(DEFAULT_EOS_TOKEN_ID);
        Self {
            tokenizer,
            eos_token_id,
            max_input_length,
        }
    }

    pub fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}

impl LanguageTokenizer for MBartTokenizer {
    fn lang_code_to_id(&self, code: &str) -> Result<u32> {
        if !languages::is_supported(code) {
            anyhow::bail!("Unknown language code '{}'", code);
        }
        self.tokenizer
            .token_to_id(code)
            .ok_or_else(|| anyhow::anyhow!("Language code '{}' is missing from the tokenizer vocabulary", code))
    }

    fn encode(&self, text: &str, src_lang_code: &str) -> Result<Vec<u32>> {
        let src_lang_id = self.lang_code_to_id(src_lang_code)?;
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Failed to tokenize input: {}", e))?;
        let ids = source_ids(src_lang_id, encoding.get_ids(), self.eos_token_id, self.max_input_length);
        if ids.len() - 2 < encoding.get_ids().len() {
            log::warn!(
                "Input truncated from {} to {} tokens",
                encoding.get_ids().len() + 2,
                ids.len()
            );
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| anyhow::anyhow!("Failed to decode tokens: {}", e))
    }
}

// Wraps text tokens in source-language mode, truncating the text so the
// whole sequence fits `max_len`.
fn source_ids(src_lang_id: u32, text_ids: &[u32], eos_id: u32, max_len: usize) -> Vec<u32> {
    let keep = text_ids.len().min(max_len.saturating_sub(2));
    let mut ids = Vec::with_capacity(keep + 2);
    ids.push(src_lang_id);
    ids.extend_from_slice(&text_ids[..keep]);
    ids.push(eos_id);
    ids
}
