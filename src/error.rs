//! Error types for the table2json library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Table2JsonError`] — **Fatal**: the request cannot produce a result
//!   (undecodable image, completion endpoint down, malformed model output).
//!   Returned as `Err(Table2JsonError)` from the `extract*` entry points and
//!   surfaced at the boundary as a single client-error response.
//!
//! * [`CellError`] — **Non-fatal**: OCR failed on one cell region. The cell
//!   is treated as empty text and counted in
//!   [`crate::output::Diagnostics::failed_cells`]; the rest of the table is
//!   still reconstructed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the table2json library.
#[derive(Debug, Error)]
pub enum Table2JsonError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Image bytes did not decode (empty, corrupt or unsupported format).
    #[error("Invalid image data: {detail}")]
    InvalidImage { detail: String },

    /// Input file was not found or could not be read.
    #[error("Image file not readable: '{path}': {source}")]
    ImageNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The expected-JSON string is not an array of objects.
    #[error("Expected JSON is not a JSON array of objects: {detail}")]
    InvalidExpectedJson { detail: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The whole-image OCR pass failed, so there is no text to normalise.
    #[error("OCR engine unavailable: {detail}\nIs tesseract installed and on PATH?")]
    OcrUnavailable { detail: String },

    // ── Language-model errors ─────────────────────────────────────────────
    /// Connection-level failure talking to the completion endpoint.
    #[error("Completion request to '{url}' failed: {detail}")]
    LlmTransport { url: String, detail: String },

    /// The completion endpoint did not answer within the configured timeout.
    #[error("Completion request timed out after {secs}s")]
    LlmTimeout { secs: u64 },

    /// The completion endpoint answered with a non-success status.
    #[error("Completion endpoint returned HTTP {status}: {body}")]
    LlmStatus { status: u16, body: String },

    /// The model output is not a JSON array (or `{"output": [...]}`).
    #[error("LLM output is not a JSON array: {detail}")]
    LlmFormat { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal OCR failure on a single cell region.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum CellError {
    /// The OCR engine could not be started.
    #[error("OCR engine failed to start: {detail}")]
    Spawn { detail: String },

    /// The OCR engine ran but exited unsuccessfully.
    #[error("OCR engine exited with {status}: {stderr}")]
    Engine { status: String, stderr: String },

    /// The region could not be handed to the engine (e.g. PNG encoding).
    #[error("OCR input preparation failed: {detail}")]
    Input { detail: String },
}
