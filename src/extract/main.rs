use anyhow::Result;
use clap::Parser;
use lipi::config::LipiConfig;
use lipi::image2text::{extract_text, Extraction, OcrLanguage, TesseractEngine};
use lipi::logger::init_logger_exe;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(version, about = "A CLI tool to extract Nepali or Sinhala text from an image", long_about = None)]
struct Cli {
    #[arg(
        long,
        help = "input file in image (png, jpeg, gif, webp, tiff, bmp, etc) format",
        required_unless_present = "list_langs"
    )]
    image: Option<PathBuf>,
    #[arg(long, help = "recognize Nepali text", conflicts_with = "sinhala")]
    nepali: bool,
    #[arg(long, help = "recognize Sinhala text (default)")]
    sinhala: bool,
    #[arg(long, help = "path to the tesseract binary (defaults to TESSERACT_CMD, then PATH)")]
    tesseract_cmd: Option<PathBuf>,
    #[arg(long, help = "image resolution passed to tesseract")]
    dpi: Option<u32>,
    #[arg(long, help = "tesseract page segmentation mode")]
    psm: Option<u32>,
    #[arg(long, help = "tesseract OCR engine mode")]
    oem: Option<u32>,
    #[arg(long, help = "print the result as JSON", default_value_t = false)]
    json: bool,
    #[arg(long, help = "list the languages installed for tesseract and exit")]
    list_langs: bool,
    #[arg(long, help = "config file (JSON)")]
    config: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    init_logger_exe();
    let cli = Cli::parse();

    let mut config = LipiConfig::load(cli.config.as_deref())?.ocr;
    if cli.tesseract_cmd.is_some() {
        config.tesseract_cmd = cli.tesseract_cmd;
    }
    config.dpi = cli.dpi.or(config.dpi);
    config.psm = cli.psm.or(config.psm);
    config.oem = cli.oem.or(config.oem);

    if cli.list_langs {
        let engine = TesseractEngine::new(&config);
        let langs = engine.available_languages()?;
        for lang in &langs {
            println!("{}", lang);
        }
        for language in [OcrLanguage::Nepali, OcrLanguage::Sinhala] {
            if !langs.iter().any(|l| l == language.tesseract_code()) {
                log::warn!("{} traineddata ({}) is not installed", language, language.tesseract_code());
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let Some(image) = cli.image else {
        anyhow::bail!("--image is required");
    };
    let is_nepali = cli.nepali && !cli.sinhala;
    let language = OcrLanguage::from_flag(is_nepali);
    let extraction = extract_text(&image, is_nepali, &config);

    println!("{}", render(&extraction, language, cli.json)?);
    Ok(ExitCode::from(exit_status(&extraction)))
}

fn render(extraction: &Extraction, language: OcrLanguage, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string(extraction)?);
    }
    Ok(match extraction {
        Extraction::Text(text) => format!("{} Text: {}", language, text),
        Extraction::Error(message) => format!("Error: {}", message),
    })
}

fn exit_status(extraction: &Extraction) -> u8 {
    if extraction.is_error() {
        1
    } else {
        0
    }
}
