//! Extraction entry points.
//!
//! ```text
//! bytes ─▶ preprocess ─▶ grid ─▶ per-cell OCR ─▶ markdown ┐
//!                           └──▶ whole-image OCR ─▶ raw ──┴▶ OcrArtifacts ─▶ LLM ─▶ records ─▶ compare
//! ```
//!
//! [`extract_artifacts`] is the synchronous vision pipeline. The async
//! entry points move the CPU-bound stages onto `spawn_blocking` and, when
//! `ocr_concurrency > 1`, OCR cells through an ordered bounded stream so the
//! markdown is identical to the sequential result.
//!
//! Nothing is shared between requests: every call owns its image, boxes and
//! artifacts, and the OCR engine / completion client are passed in.

use crate::compare::{compare_json_results, Comparison};
use crate::config::ExtractionConfig;
use crate::error::Table2JsonError;
use crate::output::{CellBox, ExtractRequest, ExtractResponse, OcrArtifacts, Record};
use crate::pipeline::grid::{self, GridParams};
use crate::pipeline::llm::{self, CompletionClient, OllamaClient};
use crate::pipeline::ocr::{OcrEngine, TesseractCli};
use crate::pipeline::preprocess::preprocess;
use crate::pipeline::reconstruct::{self, CellOcrParams, Reconstruction};
use futures::stream::{self, StreamExt, TryStreamExt};
use image::GrayImage;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Owned pipeline handles: configuration, OCR engine and completion client.
#[derive(Clone)]
pub struct Pipeline {
    pub config: ExtractionConfig,
    ocr: Arc<dyn OcrEngine>,
    client: Arc<dyn CompletionClient>,
}

impl Pipeline {
    /// Tesseract on `PATH` plus an Ollama client for `config.ollama_host`.
    pub fn new(config: ExtractionConfig) -> Result<Self, Table2JsonError> {
        let ocr = Arc::new(TesseractCli::from_config(&config));
        let client = Arc::new(OllamaClient::new(&config)?);
        debug!(
            "Pipeline: {} via {}, model '{}'",
            config.tesseract_cmd,
            client.url(),
            config.model
        );
        Ok(Self::with_handles(config, ocr, client))
    }

    pub fn with_handles(
        config: ExtractionConfig,
        ocr: Arc<dyn OcrEngine>,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            config,
            ocr,
            client,
        }
    }

    pub fn ocr(&self) -> Arc<dyn OcrEngine> {
        Arc::clone(&self.ocr)
    }

    /// Vision pipeline only; no model call.
    pub async fn artifacts(&self, image: Vec<u8>) -> Result<OcrArtifacts, Table2JsonError> {
        extract_artifacts_async(image, self.ocr(), &self.config).await
    }

    /// Full request: artifacts, model normalisation, optional comparison.
    pub async fn run(&self, request: ExtractRequest) -> Result<ExtractResponse, Table2JsonError> {
        extract(request, self.ocr(), self.client.as_ref(), &self.config).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("ocr", &"<dyn OcrEngine>")
            .field("client", &"<dyn CompletionClient>")
            .finish()
    }
}

/// Run preprocess → grid → per-cell OCR → whole-image OCR synchronously.
///
/// # Errors
/// - [`Table2JsonError::InvalidImage`] if the bytes don't decode
/// - [`Table2JsonError::OcrUnavailable`] if the whole-image OCR pass fails
///
/// Per-cell OCR failures are tolerated and counted in
/// `diagnostics.failed_cells`.
pub fn extract_artifacts(
    image: &[u8],
    ocr: &dyn OcrEngine,
    config: &ExtractionConfig,
) -> Result<OcrArtifacts, Table2JsonError> {
    let start = Instant::now();
    let binary = preprocess(image, config.denoise_strength)?;
    let (boxes, diagnostics) = grid::detect_cells(&binary, &grid_params(config));
    if let Some(cb) = &config.progress_callback {
        cb.on_boxes_detected(boxes.len());
    }

    let recon = reconstruct::ocr_cells_to_markdown(
        ocr,
        &binary,
        &boxes,
        &cell_params(config),
        config.progress_callback.as_ref(),
    );
    let raw_text = ocr_whole_image(ocr, &binary, config.page_seg_mode)?;

    let artifacts = assemble(raw_text, recon, diagnostics);
    debug!("Vision pipeline finished in {:?}", start.elapsed());
    finish(config, &artifacts);
    Ok(artifacts)
}

/// Async variant of [`extract_artifacts`] that keeps blocking work off the
/// runtime's worker threads.
pub async fn extract_artifacts_async(
    image: Vec<u8>,
    ocr: Arc<dyn OcrEngine>,
    config: &ExtractionConfig,
) -> Result<OcrArtifacts, Table2JsonError> {
    let start = Instant::now();
    let denoise = config.denoise_strength;
    let params = grid_params(config);

    let (binary, boxes, diagnostics) = tokio::task::spawn_blocking(move || {
        let binary = preprocess(&image, denoise)?;
        let (boxes, diagnostics) = grid::detect_cells(&binary, &params);
        Ok::<_, Table2JsonError>((binary, boxes, diagnostics))
    })
    .await
    .map_err(|e| Table2JsonError::Internal(format!("Preprocess task panicked: {e}")))??;
    let binary = Arc::new(binary);
    info!(
        "Detected {} cell boxes on {}x{} image",
        boxes.len(),
        binary.width(),
        binary.height()
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_boxes_detected(boxes.len());
    }

    let recon = ocr_cells_concurrent(&ocr, &binary, &boxes, config).await?;

    let psm = config.page_seg_mode;
    let raw_text = {
        let ocr = Arc::clone(&ocr);
        let binary = Arc::clone(&binary);
        tokio::task::spawn_blocking(move || ocr_whole_image(ocr.as_ref(), &binary, psm))
            .await
            .map_err(|e| Table2JsonError::Internal(format!("OCR task panicked: {e}")))??
    };

    let artifacts = assemble(raw_text, recon, diagnostics);
    debug!("Vision pipeline finished in {:?}", start.elapsed());
    finish(config, &artifacts);
    Ok(artifacts)
}

/// Full request: vision pipeline, model normalisation, optional comparison.
///
/// `expected_json` is validated before the model is called so a malformed
/// expectation doesn't cost a completion. When it is absent or the empty
/// string, no comparison runs and both score fields are `None`; any other
/// text (whitespace included) must parse as JSON.
pub async fn extract(
    request: ExtractRequest,
    ocr: Arc<dyn OcrEngine>,
    client: &dyn CompletionClient,
    config: &ExtractionConfig,
) -> Result<ExtractResponse, Table2JsonError> {
    let total_start = Instant::now();
    let expected = match request.expected_json.as_deref().filter(|s| !s.is_empty()) {
        Some(text) => Some(parse_expected(text)?),
        None => None,
    };

    let artifacts = extract_artifacts_async(request.image, ocr, config).await?;

    let model = request.model.as_deref().unwrap_or(&config.model);
    let records = llm::extract_structured_json(
        client,
        model,
        config.temperature,
        &artifacts,
        request.title_hint.as_deref(),
    )
    .await?;

    let comparison: Option<Comparison> = expected.map(|exp| compare_json_results(&records, &exp));
    if let Some(c) = &comparison {
        info!("Quality score {:.1} ({})", c.score, c.summary);
    }
    info!("Extraction complete in {:?}", total_start.elapsed());

    Ok(ExtractResponse {
        success: true,
        json_result: records,
        quality_score: comparison.as_ref().map(|c| c.score),
        comparison_summary: comparison.map(|c| c.summary),
        diagnostics: artifacts.diagnostics,
    })
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    request: ExtractRequest,
    ocr: Arc<dyn OcrEngine>,
    client: &dyn CompletionClient,
    config: &ExtractionConfig,
) -> Result<ExtractResponse, Table2JsonError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Table2JsonError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(extract(request, ocr, client, config))
}

/// Read `path` and run [`extract`] on its bytes.
///
/// # Errors
/// [`Table2JsonError::ImageNotFound`] when the file cannot be read; otherwise
/// whatever [`extract`] returns.
pub async fn extract_file(
    path: impl AsRef<Path>,
    request: ExtractRequest,
    ocr: Arc<dyn OcrEngine>,
    client: &dyn CompletionClient,
    config: &ExtractionConfig,
) -> Result<ExtractResponse, Table2JsonError> {
    let image = read_image(path).await?;
    extract(ExtractRequest { image, ..request }, ocr, client, config).await
}

/// Read an image file into memory.
pub async fn read_image(path: impl AsRef<Path>) -> Result<Vec<u8>, Table2JsonError> {
    let path = path.as_ref();
    tokio::fs::read(path)
        .await
        .map_err(|e| Table2JsonError::ImageNotFound {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Parse an expected-JSON string into records. A JSON `null` counts as an
/// empty array.
pub fn parse_expected(text: &str) -> Result<Vec<Record>, Table2JsonError> {
    let parsed: Option<Vec<Record>> =
        serde_json::from_str(text).map_err(|e| Table2JsonError::InvalidExpectedJson {
            detail: e.to_string(),
        })?;
    Ok(parsed.unwrap_or_default())
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn grid_params(config: &ExtractionConfig) -> GridParams {
    GridParams {
        line_kernel_len: config.line_kernel_len,
        min_width: config.min_cell_width,
        min_height: config.min_cell_height,
    }
}

fn cell_params(config: &ExtractionConfig) -> CellOcrParams {
    CellOcrParams {
        padding: config.cell_padding,
        row_band: config.row_band,
        page_seg_mode: config.page_seg_mode,
    }
}

fn ocr_whole_image(
    ocr: &dyn OcrEngine,
    binary: &GrayImage,
    psm: u8,
) -> Result<String, Table2JsonError> {
    ocr.recognize(binary, psm)
        .map_err(|e| Table2JsonError::OcrUnavailable {
            detail: e.to_string(),
        })
}

/// OCR cells on the blocking pool, at most `ocr_concurrency` at a time.
///
/// `buffered` yields results in input order regardless of completion order,
/// which keeps the rendered markdown independent of scheduling.
async fn ocr_cells_concurrent(
    ocr: &Arc<dyn OcrEngine>,
    binary: &Arc<GrayImage>,
    boxes: &[CellBox],
    config: &ExtractionConfig,
) -> Result<Reconstruction, Table2JsonError> {
    let total = boxes.len();
    let params = cell_params(config);

    let texts: Vec<(String, bool)> = stream::iter(boxes.iter().copied().enumerate().map(|(i, cell)| {
        let ocr = Arc::clone(ocr);
        let binary = Arc::clone(binary);
        let progress = config.progress_callback.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = reconstruct::ocr_cell(ocr.as_ref(), &binary, &cell, &params);
            reconstruct::settle_cell(i, total, &cell, outcome, progress.as_ref())
        })
    }))
    .buffered(config.ocr_concurrency.max(1))
    .map_err(|e| Table2JsonError::Internal(format!("Cell OCR task panicked: {e}")))
    .try_collect()
    .await?;

    let failed_cells = texts.iter().filter(|(_, failed)| *failed).count();
    let markdown = reconstruct::render_markdown(
        boxes.iter().zip(texts.iter().map(|(t, _)| t.as_str())),
        params.row_band,
    );
    Ok(Reconstruction {
        markdown,
        failed_cells,
    })
}

fn assemble(
    raw_text: String,
    recon: Reconstruction,
    mut diagnostics: crate::output::Diagnostics,
) -> OcrArtifacts {
    diagnostics.raw_text_chars = raw_text.chars().count();
    diagnostics.markdown_lines = reconstruct::count_lines(&recon.markdown);
    diagnostics.failed_cells = recon.failed_cells;
    OcrArtifacts {
        raw_text,
        markdown_table: recon.markdown,
        diagnostics,
    }
}

fn finish(config: &ExtractionConfig, artifacts: &OcrArtifacts) {
    let d = &artifacts.diagnostics;
    info!(
        "Artifacts: {} boxes, {} markdown lines, {} raw chars, {} failed cells",
        d.detected_boxes, d.markdown_lines, d.raw_text_chars, d.failed_cells
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_extraction_complete(d.markdown_lines);
    }
}
