//! Data types produced by the extraction pipeline.
//!
//! Every type here is serialisable so the CLI and the HTTP
//! surface can emit them directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One record in the model's output array.
///
/// The key set is only known at runtime (arm keys such as
/// `ABBV154_150mg_Q2W_n94` are derived from the table header), so records
/// are kept as ordered JSON maps rather than a fixed struct.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Axis-aligned rectangle in image-pixel coordinates.
///
/// Produced by [`crate::pipeline::grid::detect_cells`]; a detected box always
/// satisfies `width > 40 && height > 15` under the default configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CellBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Reading-order key: top edge first, then left edge.
    pub fn reading_key(&self) -> (u32, u32) {
        (self.y, self.x)
    }

    /// Shrink the box by `pad` on every side and clip it to `bounds`.
    ///
    /// Returns `None` when nothing is left (box narrower than `2 * pad`, or
    /// entirely outside the image).
    pub fn inset(&self, pad: u32, bounds: (u32, u32)) -> Option<(u32, u32, u32, u32)> {
        let (img_w, img_h) = bounds;
        let x0 = (self.x + pad).min(img_w);
        let y0 = (self.y + pad).min(img_h);
        let x1 = (self.x + self.width).saturating_sub(pad).min(img_w);
        let y1 = (self.y + self.height).saturating_sub(pad).min(img_h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Cells grouped by row bucket: bucket key → `(x, text)` pairs.
///
/// Keys are `y / band * band`; the `BTreeMap` gives ascending-key iteration,
/// and [`RowGroup::rows`] sorts each row by `x` on the way out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowGroup {
    band: u32,
    rows: BTreeMap<u32, Vec<(u32, String)>>,
}

impl RowGroup {
    pub fn new(band: u32) -> Self {
        Self {
            band: band.max(1),
            rows: BTreeMap::new(),
        }
    }

    /// Quantise a top-edge coordinate into its row bucket key.
    pub fn bucket(&self, y: u32) -> u32 {
        y / self.band * self.band
    }

    pub fn insert(&mut self, cell: &CellBox, text: String) {
        let key = self.bucket(cell.y);
        self.rows.entry(key).or_default().push((cell.x, text));
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Rows top-to-bottom, each row's cell texts left-to-right.
    pub fn rows(&self) -> Vec<Vec<&str>> {
        self.rows
            .values()
            .map(|cells| {
                let mut cells: Vec<&(u32, String)> = cells.iter().collect();
                // Stable: equal x keeps detection order.
                cells.sort_by_key(|(x, _)| *x);
                cells.into_iter().map(|(_, t)| t.as_str()).collect()
            })
            .collect()
    }
}

/// Per-request extraction diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Cell boxes surviving the minimum-size filter.
    pub detected_boxes: usize,
    /// Characters in the whole-image OCR text.
    pub raw_text_chars: usize,
    /// Lines in the rendered markdown table.
    pub markdown_lines: usize,
    /// Cells whose OCR call failed and were treated as empty.
    pub failed_cells: usize,
}

/// Complete output of the vision pipeline for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrArtifacts {
    pub raw_text: String,
    pub markdown_table: String,
    pub diagnostics: Diagnostics,
}

/// Inputs of one extraction request, minus the handles.
#[derive(Debug, Clone, Default)]
pub struct ExtractRequest {
    /// Encoded image bytes (PNG, JPEG, …).
    pub image: Vec<u8>,
    /// Overrides [`crate::config::ExtractionConfig::model`] for this request.
    pub model: Option<String>,
    /// Free-text hint such as "Table 2 secondary outcomes".
    pub title_hint: Option<String>,
    /// JSON array of objects to score the extraction against.
    pub expected_json: Option<String>,
}

impl ExtractRequest {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn title_hint(mut self, hint: impl Into<String>) -> Self {
        self.title_hint = Some(hint.into());
        self
    }

    pub fn expected_json(mut self, json: impl Into<String>) -> Self {
        self.expected_json = Some(json.into());
        self
    }
}

/// Response returned to the caller of [`crate::extract::extract`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub success: bool,
    pub json_result: Vec<Record>,
    pub quality_score: Option<f64>,
    pub comparison_summary: Option<String>,
    pub diagnostics: Diagnostics,
}
