//! Cell-to-markdown reconstruction.
//!
//! Each detected box is cropped with a small inset, OCR'd as a single block,
//! and the non-empty results are bucketed into rows by top edge
//! (`y / band * band`). Rows render top-to-bottom, cells left-to-right, as
//! `| a | b |` lines.
//!
//! A failing OCR call on one cell is logged and the cell is treated as
//! empty; only the caller decides what is fatal.

use crate::error::CellError;
use crate::output::{CellBox, RowGroup};
use crate::pipeline::ocr::{OcrEngine, PSM_SINGLE_BLOCK};
use crate::progress::ProgressCallback;
use image::{imageops, GrayImage};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static RE_LINE_BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]*(?:\r?\n)+[ \t]*").unwrap());

/// Knobs for [`ocr_cells_to_markdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellOcrParams {
    pub padding: u32,
    pub row_band: u32,
    pub page_seg_mode: u8,
}

impl Default for CellOcrParams {
    fn default() -> Self {
        Self {
            padding: 2,
            row_band: 20,
            page_seg_mode: PSM_SINGLE_BLOCK,
        }
    }
}

/// Markdown table plus the number of cells whose OCR call failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconstruction {
    pub markdown: String,
    pub failed_cells: usize,
}

/// Trim and fold embedded line breaks into single spaces.
pub fn clean_cell_text(raw: &str) -> String {
    RE_LINE_BREAKS.replace_all(raw.trim(), " ").into_owned()
}

/// Crop the inset region of `cell`; `None` when the inset leaves nothing.
pub fn crop_cell(binary: &GrayImage, cell: &CellBox, padding: u32) -> Option<GrayImage> {
    let (x, y, w, h) = cell.inset(padding, binary.dimensions())?;
    Some(imageops::crop_imm(binary, x, y, w, h).to_image())
}

/// OCR one cell and return its cleaned text.
pub fn ocr_cell(
    engine: &dyn OcrEngine,
    binary: &GrayImage,
    cell: &CellBox,
    params: &CellOcrParams,
) -> Result<String, CellError> {
    match crop_cell(binary, cell, params.padding) {
        Some(region) => Ok(clean_cell_text(
            &engine.recognize(&region, params.page_seg_mode)?,
        )),
        None => Ok(String::new()),
    }
}

/// Apply the per-cell tolerance policy to one OCR outcome.
///
/// Returns the text to render (empty for a failure) and whether it failed.
pub fn settle_cell(
    index: usize,
    total: usize,
    cell: &CellBox,
    outcome: Result<String, CellError>,
    progress: Option<&ProgressCallback>,
) -> (String, bool) {
    match outcome {
        Ok(text) => {
            if let Some(cb) = progress {
                cb.on_cell_complete(index, total, text.chars().count());
            }
            (text, false)
        }
        Err(e) => {
            warn!(
                "Cell {} at ({}, {}): OCR failed, treating as empty: {}",
                index, cell.x, cell.y, e
            );
            if let Some(cb) = progress {
                cb.on_cell_error(index, total, &e.to_string());
            }
            (String::new(), true)
        }
    }
}

/// Render `(box, text)` pairs as a pipe-delimited table.
///
/// Empty texts are skipped. The output is a pure function of its input set:
/// the same boxes and texts always give byte-identical markdown.
pub fn render_markdown<'a>(
    cells: impl IntoIterator<Item = (&'a CellBox, &'a str)>,
    row_band: u32,
) -> String {
    let mut rows = RowGroup::new(row_band);
    for (cell, text) in cells {
        if !text.is_empty() {
            rows.insert(cell, text.to_string());
        }
    }
    rows.rows()
        .iter()
        .map(|cols| format!("| {} |", cols.join(" | ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sequentially OCR every box and render the markdown table.
pub fn ocr_cells_to_markdown(
    engine: &dyn OcrEngine,
    binary: &GrayImage,
    boxes: &[CellBox],
    params: &CellOcrParams,
    progress: Option<&ProgressCallback>,
) -> Reconstruction {
    let total = boxes.len();
    let mut failed_cells = 0;
    let texts: Vec<String> = boxes
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let outcome = ocr_cell(engine, binary, cell, params);
            let (text, failed) = settle_cell(i, total, cell, outcome, progress);
            failed_cells += usize::from(failed);
            text
        })
        .collect();

    Reconstruction {
        markdown: render_markdown(boxes.iter().zip(texts.iter().map(String::as_str)), params.row_band),
        failed_cells,
    }
}

/// Number of rendered table lines (0 for an empty table).
pub fn count_lines(markdown: &str) -> usize {
    if markdown.is_empty() {
        0
    } else {
        markdown.lines().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers by the crop's width so each box can be scripted.
    struct ByWidth {
        answers: HashMap<u32, Result<String, CellError>>,
        calls: Mutex<usize>,
    }

    impl ByWidth {
        fn new(answers: impl IntoIterator<Item = (u32, Result<String, CellError>)>) -> Self {
            Self {
                answers: answers.into_iter().collect(),
                calls: Mutex::new(0),
            }
        }
    }

    impl OcrEngine for ByWidth {
        fn recognize(&self, region: &GrayImage, _psm: u8) -> Result<String, CellError> {
            *self.calls.lock().unwrap() += 1;
            self.answers
                .get(&region.width())
                .cloned()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn page() -> GrayImage {
        GrayImage::from_pixel(400, 200, Luma([255]))
    }

    #[test]
    fn two_cells_same_band_render_one_line() {
        // Inset widths: 50 - 4 = 46 and 60 - 4 = 56.
        let engine = ByWidth::new([(46, Ok("Arm A\n".into())), (56, Ok(" 94 ".into()))]);
        let boxes = [CellBox::new(10, 5, 50, 20), CellBox::new(100, 6, 60, 20)];
        let out = ocr_cells_to_markdown(&engine, &page(), &boxes, &CellOcrParams::default(), None);
        assert_eq!(out.markdown, "| Arm A | 94 |");
        assert_eq!(out.failed_cells, 0);
    }

    #[test]
    fn render_orders_rows_then_columns() {
        let a = CellBox::new(200, 41, 50, 20);
        let b = CellBox::new(10, 45, 50, 20);
        let c = CellBox::new(300, 2, 50, 20);
        let md = render_markdown([(&a, "x2"), (&b, "x1"), (&c, "top")], 20);
        assert_eq!(md, "| top |\n| x1 | x2 |");
    }

    #[test]
    fn band_boundary_splits_rows() {
        let a = CellBox::new(10, 19, 50, 20);
        let b = CellBox::new(100, 20, 50, 20);
        assert_eq!(render_markdown([(&a, "a"), (&b, "b")], 20), "| a |\n| b |");

        let c = CellBox::new(10, 18, 50, 20);
        let d = CellBox::new(100, 21, 50, 20);
        // 18 and 21 straddle the 20px boundary as well.
        assert_eq!(render_markdown([(&c, "c"), (&d, "d")], 20), "| c |\n| d |");
    }

    #[test]
    fn empty_texts_are_skipped() {
        let a = CellBox::new(10, 5, 50, 20);
        let b = CellBox::new(100, 5, 50, 20);
        assert_eq!(render_markdown([(&a, ""), (&b, "only")], 20), "| only |");
        assert_eq!(render_markdown([(&a, "")], 20), "");
    }

    #[test]
    fn failing_cell_becomes_empty() {
        let engine = ByWidth::new([
            (46, Ok("kept".into())),
            (
                56,
                Err(CellError::Engine {
                    status: "exit status: 1".into(),
                    stderr: "boom".into(),
                }),
            ),
        ]);
        let boxes = [CellBox::new(10, 5, 50, 20), CellBox::new(100, 5, 60, 20)];
        let out = ocr_cells_to_markdown(&engine, &page(), &boxes, &CellOcrParams::default(), None);
        assert_eq!(out.markdown, "| kept |");
        assert_eq!(out.failed_cells, 1);
    }

    #[test]
    fn no_boxes_means_no_ocr_calls() {
        let engine = ByWidth::new([]);
        let out = ocr_cells_to_markdown(&engine, &page(), &[], &CellOcrParams::default(), None);
        assert_eq!(out.markdown, "");
        assert_eq!(count_lines(&out.markdown), 0);
        assert_eq!(*engine.calls.lock().unwrap(), 0);
    }

    #[test]
    fn reconstruction_is_deterministic() {
        let engine = ByWidth::new([(46, Ok("a".into())), (56, Ok("b".into()))]);
        let boxes = [
            CellBox::new(100, 30, 60, 20),
            CellBox::new(10, 5, 50, 20),
            CellBox::new(10, 30, 50, 20),
        ];
        let params = CellOcrParams::default();
        let first = ocr_cells_to_markdown(&engine, &page(), &boxes, &params, None);
        let second = ocr_cells_to_markdown(&engine, &page(), &boxes, &params, None);
        assert_eq!(first, second);
        assert_eq!(first.markdown, "| a |\n| a | b |");
    }

    #[test]
    fn clean_folds_line_breaks() {
        assert_eq!(clean_cell_text("  12.5\n (3.1) \n"), "12.5 (3.1)");
        assert_eq!(clean_cell_text("a\r\n\r\nb"), "a b");
        assert_eq!(clean_cell_text("\n \n"), "");
    }

    #[test]
    fn crop_applies_inset() {
        let region = crop_cell(&page(), &CellBox::new(10, 5, 50, 20), 2).unwrap();
        assert_eq!(region.dimensions(), (46, 16));
        assert!(crop_cell(&page(), &CellBox::new(10, 5, 4, 4), 2).is_none());
    }

    #[test]
    fn count_lines_matches_rows() {
        assert_eq!(count_lines("| a |\n| b |"), 2);
        assert_eq!(count_lines(""), 0);
    }
}
