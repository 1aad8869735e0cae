//! # table2json
//!
//! Convert photographed or scanned table images into JSON records.
//!
//! Image processing recovers the table grid, Tesseract reads every cell, and
//! a local language model (Ollama) normalises the recovered text into a
//! schema-shaped JSON array. An optional expected array can be supplied to
//! score the result.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image bytes
//!  │
//!  ├─ 1. Preprocess   decode, grayscale, NL-means denoise, Otsu threshold
//!  ├─ 2. Grid         40px line opening, contours, size filter, (y, x) order
//!  ├─ 3. Reconstruct  per-cell OCR, 20px row buckets, `| a | b |` rows
//!  │                  + whole-image OCR as raw-text fallback
//!  ├─ 4. Normalise    prompt → /api/generate (format: json) → records
//!  └─ 5. Compare      canonical JSON token-sort ratio vs expected (optional)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use table2json::{ExtractRequest, ExtractionConfig, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(ExtractionConfig::default())?;
//!     let image = std::fs::read("table.png")?;
//!     let response = pipeline
//!         .run(ExtractRequest::new(image).title_hint("Table 2 secondary outcomes"))
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&response.json_result)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `table2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | off     | Adds the axum HTTP surface and the `--serve` flag |
//!
//! ## External tools
//!
//! The default OCR engine runs the `tesseract` executable; the default
//! completion client talks to Ollama at `http://127.0.0.1:11434`. Both are
//! trait objects ([`OcrEngine`], [`CompletionClient`]) and can be replaced.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod compare;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use compare::{compare_json_results, Comparison};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{CellError, Table2JsonError};
pub use extract::{
    extract, extract_artifacts, extract_artifacts_async, extract_file, extract_sync, read_image,
    Pipeline,
};
pub use output::{CellBox, Diagnostics, ExtractRequest, ExtractResponse, OcrArtifacts, Record, RowGroup};
pub use pipeline::llm::{parse_completion, CompletionClient, OllamaClient};
pub use pipeline::ocr::{OcrEngine, TesseractCli};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
