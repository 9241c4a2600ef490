use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The two languages the extractor can recognize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OcrLanguage {
    Nepali,
    Sinhala,
}

impl OcrLanguage {
    /// `true` selects Nepali, `false` selects Sinhala.
    pub fn from_flag(is_nepali: bool) -> Self {
        if is_nepali {
            OcrLanguage::Nepali
        } else {
            OcrLanguage::Sinhala
        }
    }

    /// Traineddata name passed to tesseract's `-l`.
    pub fn tesseract_code(&self) -> &'static str {
        match self {
            OcrLanguage::Nepali => "nep",
            OcrLanguage::Sinhala => "sin",
        }
    }

    /// Language code understood by the mBART-50 tokenizer.
    pub fn mbart_code(&self) -> &'static str {
        match self {
            OcrLanguage::Nepali => "ne_NP",
            OcrLanguage::Sinhala => "si_LK",
        }
    }
}

impl std::fmt::Display for OcrLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcrLanguage::Nepali => write!(f, "Nepali"),
            OcrLanguage::Sinhala => write!(f, "Sinhala"),
        }
    }
}

/// Outcome of an extraction. Failures are carried as a message, never raised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extraction {
    Text(String),
    Error(String),
}

impl Extraction {
    pub fn is_error(&self) -> bool {
        matches!(self, Extraction::Error(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Extraction::Text(text) => Some(text),
            Extraction::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Extraction::Text(_) => None,
            Extraction::Error(message) => Some(message),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub tesseract_cmd: Option<PathBuf>, // explicit tesseract binary, PATH lookup otherwise
    pub dpi: Option<u32>, // dots per inch
    pub psm: Option<u32>, // Page segmentation mode
    pub oem: Option<u32>, // OCR Engine Mode
}

impl OcrConfig {
    pub fn new(tesseract_cmd: Option<PathBuf>, dpi: Option<u32>, psm: Option<u32>, oem: Option<u32>) -> Self {
        Self {
            tesseract_cmd,
            dpi,
            psm,
            oem
        }
    }

    pub fn get_default_dpi() -> u32 {
        300
    }

    pub fn get_default_psm() -> u32 {
        3
    }

    pub fn get_default_oem() -> u32 {
        1
    }

    pub fn dpi(&self) -> u32 {
        self.dpi.unwrap_or(Self::get_default_dpi())
    }

    pub fn psm(&self) -> u32 {
        self.psm.unwrap_or(Self::get_default_psm())
    }

    pub fn oem(&self) -> u32 {
        self.oem.unwrap_or(Self::get_default_oem())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_selects_language() {
        assert_eq!(OcrLanguage::from_flag(true), OcrLanguage::Nepali);
        assert_eq!(OcrLanguage::from_flag(false), OcrLanguage::Sinhala);
        assert_eq!(OcrLanguage::Nepali.tesseract_code(), "nep");
        assert_eq!(OcrLanguage::Sinhala.tesseract_code(), "sin");
        assert_eq!(OcrLanguage::Nepali.mbart_code(), "ne_NP");
        assert_eq!(OcrLanguage::Sinhala.mbart_code(), "si_LK");
    }

    #[test]
    fn extraction_serializes_to_single_key() {
        let err = Extraction::Error("No such file".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "No such file" }));

        let ok = Extraction::Text("ශ්‍රී ලංකාව".to_string());
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["text"], "ශ්‍රී ලංකාව");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn ocr_config_defaults() {
        let config = OcrConfig::default();
        assert!(config.tesseract_cmd.is_none());
        assert_eq!(config.dpi(), 300);
        assert_eq!(config.psm(), 3);
        assert_eq!(config.oem(), 1);

        let config: OcrConfig = serde_json::from_str(r#"{"psm": 6}"#).unwrap();
        assert_eq!(config.psm(), 6);
        assert_eq!(config.dpi(), 300);
    }
}
