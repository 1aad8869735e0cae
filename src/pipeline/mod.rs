//! Pipeline stages for table-image extraction.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested on synthetic images without the others.
//!
//! ## Data Flow
//!
//! ```text
//! preprocess ──▶ grid ──▶ reconstruct ──▶ llm
//! (binarise)   (boxes)   (OCR+markdown)  (records)
//!                           │
//!                          ocr (engine seam)
//! ```
//!
//! 1. [`preprocess`]  — decode, grayscale, non-local-means, Otsu threshold
//! 2. [`grid`]        — ruling-line morphology, contours, size filter, ordering
//! 3. [`ocr`]         — the [`ocr::OcrEngine`] trait and the tesseract engine
//! 4. [`reconstruct`] — per-cell OCR, row bucketing, markdown rendering
//! 5. [`llm`]         — completion request and response parsing; the only
//!    stage with network I/O

pub mod grid;
pub mod llm;
pub mod ocr;
pub mod preprocess;
pub mod reconstruct;
