//! OCR engine seam.
//!
//! The reconstructor only needs "raster region in, text out", so the engine
//! is a trait object injected by the caller. [`TesseractCli`] is the default
//! implementation; tests use scripted engines instead.

use crate::config::ExtractionConfig;
use crate::error::CellError;
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use tracing::debug;

/// Page-segmentation mode: treat the region as one uniform block of text.
pub const PSM_SINGLE_BLOCK: u8 = 6;

/// A raster-to-text engine.
///
/// Implementations must return `Ok("")` (not an error) for blank or
/// near-empty regions. Calls are blocking and may run on several threads.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, region: &GrayImage, page_seg_mode: u8) -> Result<String, CellError>;
}

/// Runs the `tesseract` executable, piping the region in as PNG on stdin.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    cmd: String,
    language: String,
}

impl TesseractCli {
    pub fn new(cmd: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            language: language.into(),
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(&config.tesseract_cmd, &config.ocr_language)
    }

    /// True when `<cmd> --version` runs successfully.
    pub fn is_available(&self) -> bool {
        Command::new(&self.cmd)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new("tesseract", "eng")
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, region: &GrayImage, page_seg_mode: u8) -> Result<String, CellError> {
        if region.width() == 0 || region.height() == 0 {
            return Ok(String::new());
        }

        let mut png = Vec::new();
        DynamicImage::ImageLuma8(region.clone())
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| CellError::Input {
                detail: e.to_string(),
            })?;

        let mut child = Command::new(&self.cmd)
            .args(["stdin", "stdout", "-l", &self.language, "--psm"])
            .arg(page_seg_mode.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CellError::Spawn {
                detail: format!("{}: {e}", self.cmd),
            })?;

        // Dropping the handle closes stdin so tesseract sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png).map_err(|e| CellError::Input {
                detail: format!("writing to {} stdin: {e}", self.cmd),
            })?;
        }

        let output = child.wait_with_output().map_err(|e| CellError::Spawn {
            detail: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(CellError::Engine {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            "tesseract: {}x{} region → {} chars",
            region.width(),
            region.height(),
            text.len()
        );
        Ok(text)
    }
}
