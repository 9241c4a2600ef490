use anyhow::{Context, Result};
use image::DynamicImage;
use rusty_tesseract::{Args, Image};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::types::OcrConfig;
use super::OcrEngine;

pub const TESSERACT_CMD_ENV: &str = "TESSERACT_CMD";

/// Picks the tesseract binary: explicit config first, then `TESSERACT_CMD`.
/// `None` means the binary is looked up on `PATH`.
pub fn resolve_tesseract_cmd(config: &OcrConfig) -> Option<PathBuf> {
    resolve_tesseract_cmd_from(config.tesseract_cmd.as_deref(), std::env::var_os(TESSERACT_CMD_ENV))
}

fn resolve_tesseract_cmd_from(explicit: Option<&Path>, env_value: Option<OsString>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env_value.filter(|v| !v.is_empty()).map(PathBuf::from))
}

/// Tesseract-backed [`OcrEngine`].
pub struct TesseractEngine {
    binary: Option<PathBuf>,
    dpi: u32,
    psm: u32,
    oem: u32,
}

impl TesseractEngine {
    pub fn new(config: &OcrConfig) -> Self {
        let binary = resolve_tesseract_cmd(config);
        match &binary {
            Some(path) => log::debug!("Using tesseract binary at {}", path.display()),
            None => log::debug!("Using tesseract from PATH"),
        }
        Self {
            binary,
            dpi: config.dpi(),
            psm: config.psm(),
            oem: config.oem(),
        }
    }

    /// Traineddata packs installed for this tesseract.
    pub fn available_languages(&self) -> Result<Vec<String>> {
        match &self.binary {
            None => Ok(rusty_tesseract::get_tesseract_langs()?),
            Some(binary) => {
                let output = Command::new(binary)
                    .arg("--list-langs")
                    .output()
                    .with_context(|| format!("Failed to execute {}", binary.display()))?;
                if !output.status.success() {
                    anyhow::bail!(
                        "{} --list-langs failed ({}): {}",
                        binary.display(),
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Ok(parse_lang_list(&String::from_utf8_lossy(&output.stdout)))
            }
        }
    }

    fn args(&self, lang: &str) -> Args {
        Args {
            lang: lang.to_string(),
            config_variables: HashMap::new(),
            dpi: Some(self.dpi as i32),
            psm: Some(self.psm as i32),
            oem: Some(self.oem as i32),
        }
    }

    fn run_binary(&self, binary: &Path, image: &DynamicImage, lang: &str) -> Result<String> {
        let input = tempfile::Builder::new()
            .prefix("lipi-ocr-")
            .suffix(".png")
            .tempfile()
            .context("Failed to create temporary image file")?;
        image
            .save_with_format(input.path(), image::ImageFormat::Png)
            .map_err(|e| anyhow::anyhow!("Error processing image: {}", e))?;

        let output = Command::new(binary)
            .arg(input.path())
            .arg("stdout")
            .args(["-l", lang])
            .args(["--dpi", &self.dpi.to_string()])
            .args(["--psm", &self.psm.to_string()])
            .args(["--oem", &self.oem.to_string()])
            .output()
            .with_context(|| format!("Failed to execute {}", binary.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "Tesseract failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        String::from_utf8(output.stdout).context("Tesseract produced invalid UTF-8")
    }
}

impl OcrEngine for TesseractEngine {
    fn image_to_string(&self, image: &DynamicImage, lang: &str) -> Result<String> {
        log::debug!("Running tesseract with lang={} dpi={} psm={} oem={}", lang, self.dpi, self.psm, self.oem);
        match &self.binary {
            Some(binary) => self.run_binary(binary, image, lang),
            None => {
                let ocr_image = Image::from_dynamic_image(image)?;
                Ok(rusty_tesseract::image_to_string(&ocr_image, &self.args(lang))?)
            }
        }
    }
}

// `tesseract --list-langs` prints a header line followed by one code per line.
fn parse_lang_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
