//! Grid detection: binarised image → cell boxes in reading order.
//!
//! Ruling lines are dark on a light page, so the image is inverted first to
//! make them foreground. Horizontal and vertical lines are isolated by
//! morphological opening with `N×1` and `1×N` rectangles, superimposed into
//! a grid skeleton, and every contour of that skeleton (outer borders and
//! holes alike) contributes its bounding rectangle as a cell candidate.
//!
//! No row/column clustering happens here; boxes are only sorted by
//! `(top, left)`. Grouping into rows is the reconstructor's job.

use crate::output::{CellBox, Diagnostics};
use image::{imageops, GrayImage, Luma};
use imageproc::contours::find_contours;
use tracing::debug;

/// Thresholds for [`detect_cells`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridParams {
    pub line_kernel_len: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            line_kernel_len: 40,
            min_width: 40,
            min_height: 15,
        }
    }
}

/// Detect candidate cell boxes on a binarised (black ink on white) image.
///
/// Returns boxes sorted by top edge, then left edge, along with diagnostics
/// carrying `detected_boxes`. A borderless table yields an empty vector.
pub fn detect_cells(binary: &GrayImage, params: &GridParams) -> (Vec<CellBox>, Diagnostics) {
    let inverted = invert(binary);
    let horizontal = open_horizontal(&inverted, params.line_kernel_len);
    let vertical = open_vertical(&inverted, params.line_kernel_len);
    let grid = superimpose(&horizontal, &vertical);

    let rects = contour_boxes(&grid);
    let found = rects.len();

    let boxes = filter_and_sort(rects, params.min_width, params.min_height);
    debug!(
        "Grid detection: {} contours, {} boxes after size filter",
        found,
        boxes.len()
    );

    let diagnostics = Diagnostics {
        detected_boxes: boxes.len(),
        ..Default::default()
    };
    (boxes, diagnostics)
}

/// Keep boxes with `width > min_width && height > min_height`, then order them
/// by `(y, x)`. The sort is stable, so exact duplicates keep contour order.
pub fn filter_and_sort(rects: Vec<CellBox>, min_width: u32, min_height: u32) -> Vec<CellBox> {
    let mut boxes: Vec<CellBox> = rects
        .into_iter()
        .filter(|b| b.width > min_width && b.height > min_height)
        .collect();
    boxes.sort_by_key(CellBox::reading_key);
    boxes
}

/// Smallest axis-aligned rectangle containing every point, inclusive of the
/// extreme pixels (a single point is a 1×1 box).
pub fn bounding_rect(points: impl IntoIterator<Item = (u32, u32)>) -> Option<CellBox> {
    let mut iter = points.into_iter();
    let (x0, y0) = iter.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
    for (x, y) in iter {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    Some(CellBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Bounding box of every contour in `mask`, outer borders and holes alike,
/// in tracing order.
///
/// The mask is traced inside a one-pixel background frame: a shape touching
/// the image edge otherwise has no traceable outer border and only its holes
/// would be reported.
pub fn contour_boxes(mask: &GrayImage) -> Vec<CellBox> {
    let (w, h) = mask.dimensions();
    let mut framed = GrayImage::new(w + 2, h + 2);
    imageops::replace(&mut framed, mask, 1, 1);

    find_contours::<u32>(&framed)
        .iter()
        .filter_map(|c| {
            bounding_rect(
                c.points
                    .iter()
                    .map(|p| (p.x.saturating_sub(1), p.y.saturating_sub(1))),
            )
        })
        .collect()
}

pub fn invert(img: &GrayImage) -> GrayImage {
    let mut out = img.clone();
    imageops::invert(&mut out);
    out
}

/// Opening with a `len×1` rectangle: only horizontal foreground runs at least
/// `len` pixels long survive, and they survive intact.
pub fn open_horizontal(img: &GrayImage, len: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for (start, end) in runs((0..w).map(|x| img.get_pixel(x, y).0[0] > 0)) {
            if end - start >= len {
                for x in start..end {
                    out.put_pixel(x, y, Luma([255]));
                }
            }
        }
    }
    out
}

/// Opening with a `1×len` rectangle; the vertical counterpart of
/// [`open_horizontal`].
pub fn open_vertical(img: &GrayImage, len: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::new(w, h);
    for x in 0..w {
        for (start, end) in runs((0..h).map(|y| img.get_pixel(x, y).0[0] > 0)) {
            if end - start >= len {
                for y in start..end {
                    out.put_pixel(x, y, Luma([255]));
                }
            }
        }
    }
    out
}

/// Pixel-wise saturating add of two equally sized masks.
pub fn superimpose(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut out = a.clone();
    for (p, q) in out.pixels_mut().zip(b.pixels()) {
        p.0[0] = p.0[0].saturating_add(q.0[0]);
    }
    out
}

/// Half-open `[start, end)` index ranges where `mask` is true.
fn runs(mask: impl Iterator<Item = bool>) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    let mut start: Option<u32> = None;
    let mut i = 0u32;
    for on in mask {
        match (on, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push((s, i));
                start = None;
            }
            _ => {}
        }
        i += 1;
    }
    if let Some(s) = start {
        out.push((s, i));
    }
    out
}
