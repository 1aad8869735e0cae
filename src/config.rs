//! Configuration types for table-image extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The geometric thresholds live here
//! next to the endpoint settings so two runs can be diffed field by field.

use crate::error::Table2JsonError;
use crate::pipeline::ocr::PSM_SINGLE_BLOCK;
use crate::progress::ProgressCallback;
use std::fmt;

/// Default completion model served by the local Ollama instance.
pub const DEFAULT_MODEL: &str = "llama3.1:8b-instruct-q4_K_M";

/// Default Ollama base URL.
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";

/// Configuration for one extraction pipeline.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use table2json::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model("qwen2.5:7b-instruct")
///     .ocr_concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.row_band, 20);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Base URL of the completion endpoint; `/api/generate` is appended.
    pub ollama_host: String,

    /// Model identifier sent with every completion request.
    pub model: String,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Zero requests deterministic output; the endpoint does not guarantee it.
    pub temperature: f32,

    /// Completion call timeout in seconds. Default: 180.
    pub api_timeout_secs: u64,

    /// Non-local-means filter strength `h`. Default: 10.
    pub denoise_strength: f32,

    /// Length of the ruling-line structuring elements (`N×1` and `1×N`). Default: 40.
    pub line_kernel_len: u32,

    /// Boxes must be strictly wider than this. Default: 40.
    pub min_cell_width: u32,

    /// Boxes must be strictly taller than this. Default: 15.
    pub min_cell_height: u32,

    /// Inset applied to each box before OCR so ruling lines don't bleed in. Default: 2.
    pub cell_padding: u32,

    /// Height of a row bucket in pixels. Default: 20.
    pub row_band: u32,

    /// Number of cells OCR'd concurrently. Default: 1 (sequential).
    ///
    /// Output ordering does not depend on this value.
    pub ocr_concurrency: usize,

    /// OCR executable. Default: `tesseract`.
    pub tesseract_cmd: String,

    /// OCR language pack. Default: `eng`.
    pub ocr_language: String,

    /// Page-segmentation mode. Default: 6 (single uniform block of text).
    pub page_seg_mode: u8,

    /// Optional per-cell progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            api_timeout_secs: 180,
            denoise_strength: 10.0,
            line_kernel_len: 40,
            min_cell_width: 40,
            min_cell_height: 15,
            cell_padding: 2,
            row_band: 20,
            ocr_concurrency: 1,
            tesseract_cmd: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
            page_seg_mode: PSM_SINGLE_BLOCK,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("ollama_host", &self.ollama_host)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("denoise_strength", &self.denoise_strength)
            .field("line_kernel_len", &self.line_kernel_len)
            .field("min_cell_width", &self.min_cell_width)
            .field("min_cell_height", &self.min_cell_height)
            .field("cell_padding", &self.cell_padding)
            .field("row_band", &self.row_band)
            .field("ocr_concurrency", &self.ocr_concurrency)
            .field("tesseract_cmd", &self.tesseract_cmd)
            .field("ocr_language", &self.ocr_language)
            .field("page_seg_mode", &self.page_seg_mode)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Full URL of the generate endpoint.
    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.ollama_host.trim_end_matches('/'))
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn ollama_host(mut self, host: impl Into<String>) -> Self {
        self.config.ollama_host = host.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn denoise_strength(mut self, h: f32) -> Self {
        self.config.denoise_strength = h.max(0.0);
        self
    }

    pub fn line_kernel_len(mut self, len: u32) -> Self {
        self.config.line_kernel_len = len;
        self
    }

    pub fn min_cell_size(mut self, width: u32, height: u32) -> Self {
        self.config.min_cell_width = width;
        self.config.min_cell_height = height;
        self
    }

    pub fn cell_padding(mut self, pad: u32) -> Self {
        self.config.cell_padding = pad;
        self
    }

    pub fn row_band(mut self, band: u32) -> Self {
        self.config.row_band = band;
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n.max(1);
        self
    }

    pub fn tesseract_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.config.tesseract_cmd = cmd.into();
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn page_seg_mode(mut self, psm: u8) -> Self {
        self.config.page_seg_mode = psm;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Table2JsonError> {
        let c = &self.config;
        if c.row_band == 0 {
            return Err(Table2JsonError::InvalidConfig(
                "Row band must be ≥ 1 pixel".into(),
            ));
        }
        if c.line_kernel_len < 2 {
            return Err(Table2JsonError::InvalidConfig(format!(
                "Line kernel length must be ≥ 2, got {}",
                c.line_kernel_len
            )));
        }
        if c.page_seg_mode > 13 {
            return Err(Table2JsonError::InvalidConfig(format!(
                "Page segmentation mode must be 0–13, got {}",
                c.page_seg_mode
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(Table2JsonError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if !c.ollama_host.starts_with("http://") && !c.ollama_host.starts_with("https://") {
            return Err(Table2JsonError::InvalidConfig(format!(
                "Ollama host must be an http(s) URL, got '{}'",
                c.ollama_host
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_thresholds() {
        let c = ExtractionConfig::default();
        assert_eq!(c.line_kernel_len, 40);
        assert_eq!((c.min_cell_width, c.min_cell_height), (40, 15));
        assert_eq!(c.cell_padding, 2);
        assert_eq!(c.row_band, 20);
        assert_eq!(c.api_timeout_secs, 180);
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.page_seg_mode, PSM_SINGLE_BLOCK);
    }

    #[test]
    fn generate_url_strips_trailing_slash() {
        let c = ExtractionConfig::builder()
            .ollama_host("http://gpu-box:11434/")
            .build()
            .unwrap();
        assert_eq!(c.generate_url(), "http://gpu-box:11434/api/generate");
    }

    #[test]
    fn zero_row_band_rejected() {
        let err = ExtractionConfig::builder().row_band(0).build().unwrap_err();
        assert!(err.to_string().contains("Row band"));
    }

    #[test]
    fn non_http_host_rejected() {
        assert!(ExtractionConfig::builder()
            .ollama_host("localhost:11434")
            .build()
            .is_err());
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let c = ExtractionConfig::builder().ocr_concurrency(0).build().unwrap();
        assert_eq!(c.ocr_concurrency, 1);
    }
}
