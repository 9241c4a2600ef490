use anyhow::{Context, Result};
use clap::Parser;
use lipi::config::LipiConfig;
use lipi::logger::init_logger_exe;
use lipi::translate::{Translator, DEFAULT_TARGET_LANG};
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "A CLI tool to translate text with mBART-50", long_about = None)]
struct Cli {
    #[arg(long, help = "text to translate (read from stdin when omitted)")]
    text: Option<String>,
    #[arg(long, help = "source language code, e.g. ne_NP or si_LK")]
    src: String,
    #[arg(long, help = "target language code", default_value = DEFAULT_TARGET_LANG)]
    tgt: String,
    #[arg(long, help = "directory holding tokenizer.json, config.json and the weights")]
    model_dir: Option<PathBuf>,
    #[arg(long, help = "beam width (1 = greedy)")]
    num_beams: Option<usize>,
    #[arg(long, help = "maximum generated length in tokens")]
    max_length: Option<usize>,
    #[arg(long, help = "device to run on: cpu, cuda or cuda:N")]
    device: Option<String>,
    #[arg(long, help = "config file (JSON)")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logger_exe();
    let cli = Cli::parse();

    let mut config = LipiConfig::load(cli.config.as_deref())?.translation;
    if cli.model_dir.is_some() {
        config.model_dir = cli.model_dir;
    }
    if cli.device.is_some() {
        config.device = cli.device;
    }
    config.num_beams = cli.num_beams.or(config.num_beams);
    config.max_length = cli.max_length.or(config.max_length);

    let text = match cli.text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read text from stdin")?;
            buf
        }
    };

    let translator = Translator::load(&config)?;
    let translation = translator.translate(text.trim(), &cli.src, &cli.tgt)?;
    println!("{} → {}: {}", cli.src, cli.tgt, translation);
    Ok(())
}
