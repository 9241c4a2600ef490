// OCR module structure
mod ocr_tesseract;
pub use ocr_tesseract::{resolve_tesseract_cmd, TesseractEngine};

mod types;
pub use types::{Extraction, OcrConfig, OcrLanguage};

use anyhow::Result;
use image::DynamicImage;
use std::path::Path;

/// Anything that turns decoded pixels into text for a given traineddata code.
pub trait OcrEngine {
    fn image_to_string(&self, image: &DynamicImage, lang: &str) -> Result<String>;
}

/// Extracts text from the image at `path` with the configured tesseract engine.
///
/// `is_nepali` selects Nepali when `true` and Sinhala when `false`.
pub fn extract_text(path: impl AsRef<Path>, is_nepali: bool, config: &OcrConfig) -> Extraction {
    let engine = TesseractEngine::new(config);
    extract_text_with(&engine, path, OcrLanguage::from_flag(is_nepali))
}

/// Opens the image, runs `engine` on it and trims the result.
///
/// Every failure (unreadable file, undecodable image, engine error) is returned
/// as [`Extraction::Error`] with the error message.
pub fn extract_text_with(
    engine: &dyn OcrEngine,
    path: impl AsRef<Path>,
    language: OcrLanguage,
) -> Extraction {
    let path = path.as_ref();
    match recognize(engine, path, language) {
        Ok(text) => {
            log::debug!("Recognized {} chars of {} text in {}", text.chars().count(), language, path.display());
            Extraction::Text(text)
        }
        Err(e) => {
            log::error!("Failed to extract {} text from {}: {:#}", language, path.display(), e);
            Extraction::Error(format!("{:#}", e))
        }
    }
}

fn recognize(engine: &dyn OcrEngine, path: &Path, language: OcrLanguage) -> Result<String> {
    let image = image::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to load image from {}: {}", path.display(), e))?;
    let text = engine.image_to_string(&image, language.tesseract_code())?;
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::cell::RefCell;
    use tempfile::tempdir;

    struct RecordingEngine {
        output: String,
        langs: RefCell<Vec<String>>,
    }

    impl RecordingEngine {
        fn new(output: &str) -> Self {
            Self {
                output: output.to_string(),
                langs: RefCell::new(Vec::new()),
            }
        }
    }

    impl OcrEngine for RecordingEngine {
        fn image_to_string(&self, _image: &DynamicImage, lang: &str) -> Result<String> {
            self.langs.borrow_mut().push(lang.to_string());
            Ok(self.output.clone())
        }
    }

    struct FailingEngine;

    impl OcrEngine for FailingEngine {
        fn image_to_string(&self, _image: &DynamicImage, lang: &str) -> Result<String> {
            anyhow::bail!("Failed loading language '{}'", lang)
        }
    }

    fn write_blank_png(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("blank.png");
        RgbImage::from_pixel(32, 16, Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_flag_true_requests_nepali() {
        let dir = tempdir().unwrap();
        let path = write_blank_png(dir.path());
        let engine = RecordingEngine::new("नेपाल");

        let result = extract_text_with(&engine, &path, OcrLanguage::from_flag(true));

        assert_eq!(result, Extraction::Text("नेपाल".to_string()));
        assert_eq!(*engine.langs.borrow(), vec!["nep".to_string()]);
    }

    #[test]
    fn test_flag_false_requests_sinhala() {
        let dir = tempdir().unwrap();
        let path = write_blank_png(dir.path());
        let engine = RecordingEngine::new("ලංකාව");

        extract_text_with(&engine, &path, OcrLanguage::from_flag(false));

        assert_eq!(*engine.langs.borrow(), vec!["sin".to_string()]);
    }

    #[test]
    fn test_trims_outer_whitespace_only() {
        let dir = tempdir().unwrap();
        let path = write_blank_png(dir.path());
        let engine = RecordingEngine::new("  \n नेपाल एक\n  सुन्दर देश \n\n");

        let result = extract_text_with(&engine, &path, OcrLanguage::Nepali);

        assert_eq!(result.text(), Some("नेपाल एक\n  सुन्दर देश"));
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let dir = tempdir().unwrap();
        let path = write_blank_png(dir.path());
        let engine = RecordingEngine::new("ශ්‍රී ලංකාව\n");

        let first = extract_text_with(&engine, &path, OcrLanguage::Sinhala);
        let second = extract_text_with(&engine, &path, OcrLanguage::Sinhala);

        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_file_returns_error_value() {
        let dir = tempdir().unwrap();
        let engine = RecordingEngine::new("unused");

        let result = extract_text_with(&engine, dir.path().join("missing.png"), OcrLanguage::Nepali);

        assert!(result.is_error());
        assert!(result.error().unwrap().contains("missing.png"));
        assert!(engine.langs.borrow().is_empty(), "engine must not run without an image");
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_some());
    }

    #[test]
    fn test_undecodable_file_returns_error_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-an-image.png");
        std::fs::write(&path, b"plain text, not a png").unwrap();

        let result = extract_text_with(&RecordingEngine::new("unused"), &path, OcrLanguage::Sinhala);

        assert!(result.is_error());
    }

    #[test]
    fn test_engine_failure_returns_error_value() {
        let dir = tempdir().unwrap();
        let path = write_blank_png(dir.path());

        let result = extract_text_with(&FailingEngine, &path, OcrLanguage::Sinhala);

        assert_eq!(result.error(), Some("Failed loading language 'sin'"));
    }
}
