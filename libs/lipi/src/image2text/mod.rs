mod ocr;
pub use ocr::{extract_text, extract_text_with, Extraction, OcrConfig, OcrEngine, OcrLanguage, TesseractEngine};
pub use ocr::resolve_tesseract_cmd;
