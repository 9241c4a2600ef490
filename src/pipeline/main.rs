use anyhow::Result;
use clap::Parser;
use lipi::config::LipiConfig;
use lipi::image2text::{extract_text, Extraction, OcrLanguage};
use lipi::logger::init_logger_exe;
use lipi::translate::{Translator, DEFAULT_TARGET_LANG};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(version, about = "A CLI tool to extract text from an image and translate it", long_about = None)]
struct Cli {
    #[arg(long, help = "input file in image (png, jpeg, gif, webp, tiff, bmp, etc) format")]
    image: PathBuf,
    #[arg(long, help = "recognize Nepali text", conflicts_with = "sinhala")]
    nepali: bool,
    #[arg(long, help = "recognize Sinhala text (default)")]
    sinhala: bool,
    #[arg(long, help = "target language code", default_value = DEFAULT_TARGET_LANG)]
    tgt: String,
    #[arg(long, help = "directory holding tokenizer.json, config.json and the weights")]
    model_dir: Option<PathBuf>,
    #[arg(long, help = "config file (JSON)")]
    config: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    init_logger_exe();
    let cli = Cli::parse();

    let mut config = LipiConfig::load(cli.config.as_deref())?;
    if cli.model_dir.is_some() {
        config.translation.model_dir = cli.model_dir;
    }

    let is_nepali = cli.nepali && !cli.sinhala;
    let language = OcrLanguage::from_flag(is_nepali);
    let text = match extract_text(&cli.image, is_nepali, &config.ocr) {
        Extraction::Text(text) => text,
        Extraction::Error(message) => {
            println!("Error: {}", message);
            return Ok(ExitCode::FAILURE);
        }
    };
    println!("{} Text: {}", language, text);

    if text.is_empty() {
        log::warn!("No text recognized in {}, nothing to translate", cli.image.display());
        return Ok(ExitCode::SUCCESS);
    }

    let translator = Translator::load(&config.translation)?;
    let translation = translator.translate(&text, language.mbart_code(), &cli.tgt)?;
    println!("{} → {}: {}", language.mbart_code(), cli.tgt, translation);
    Ok(ExitCode::SUCCESS)
}
