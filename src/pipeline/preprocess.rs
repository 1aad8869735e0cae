//! Image preprocessing: encoded bytes → denoised, two-level `GrayImage`.
//!
//! ## Stages
//!
//! 1. decode to RGB (any format the `image` crate was built with)
//! 2. BT.601 luma conversion
//! 3. non-local-means denoising, strength `h`
//! 4. Otsu level from the histogram, then binary threshold (`> level` → 255)
//!
//! The threshold is derived per image so the pipeline adapts to uneven
//! lighting and contrast between photographs and clean scans.

use crate::error::Table2JsonError;
use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use tracing::debug;

/// Half-size of the 7×7 comparison patch.
const TEMPLATE_RADIUS: i64 = 3;
/// Half-size of the 21×21 search window.
const SEARCH_RADIUS: i64 = 10;

/// Decode `bytes` and produce the binarised image fed to grid detection.
///
/// # Errors
/// [`Table2JsonError::InvalidImage`] when the buffer is empty or does not
/// decode. No OCR has run at that point.
pub fn preprocess(bytes: &[u8], denoise_strength: f32) -> Result<GrayImage, Table2JsonError> {
    let rgb = decode_rgb(bytes)?;
    let gray = rgb_to_gray(&rgb);
    let denoised = denoise_nl_means(&gray, denoise_strength);
    let (binary, level) = binarize_otsu(&denoised);
    debug!(
        "Preprocessed {}x{} image (otsu level {})",
        binary.width(),
        binary.height(),
        level
    );
    Ok(binary)
}

/// Decode an encoded image into 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, Table2JsonError> {
    if bytes.is_empty() {
        return Err(Table2JsonError::InvalidImage {
            detail: "empty buffer".into(),
        });
    }
    let img = image::load_from_memory(bytes).map_err(|e| Table2JsonError::InvalidImage {
        detail: e.to_string(),
    })?;
    if img.width() == 0 || img.height() == 0 {
        return Err(Table2JsonError::InvalidImage {
            detail: "image has zero area".into(),
        });
    }
    Ok(img.to_rgb8())
}

/// Luma with BT.601 weights (0.299, 0.587, 0.114).
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
        Luma([l.round().clamp(0.0, 255.0) as u8])
    })
}

/// Otsu-level binary threshold. Returns the image and the chosen level.
pub fn binarize_otsu(gray: &GrayImage) -> (GrayImage, u8) {
    let level = otsu_level(gray);
    (threshold(gray, level, ThresholdType::Binary), level)
}

/// Non-local-means denoising for a single-channel image.
///
/// Each output pixel is a weighted mean of the pixels in its 21×21 search
/// window; the weight of a candidate is `exp(-d / h²)` where `d` is the mean
/// squared difference between the 7×7 patches around the two pixels.
///
/// Patch distances are evaluated one displacement at a time with a summed-area
/// table, so the cost is `O(pixels × search_area)` instead of
/// `O(pixels × search_area × patch_area)`. Borders are handled by clamping.
pub fn denoise_nl_means(gray: &GrayImage, h: f32) -> GrayImage {
    if h <= 0.0 || gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    let (w, ht) = (gray.width() as i64, gray.height() as i64);
    let n = (w * ht) as usize;
    let src: Vec<f32> = gray.as_raw().iter().map(|&v| f32::from(v)).collect();
    let at = |x: i64, y: i64| -> f32 { src[(y.clamp(0, ht - 1) * w + x.clamp(0, w - 1)) as usize] };

    let inv_h2 = 1.0 / (h * h);
    let mut num = vec![0f32; n];
    let mut den = vec![0f32; n];
    let mut sq = vec![0f64; n];
    let mut sat = vec![0f64; ((w + 1) * (ht + 1)) as usize];
    let stride = w + 1;

    for dy in -SEARCH_RADIUS..=SEARCH_RADIUS {
        for dx in -SEARCH_RADIUS..=SEARCH_RADIUS {
            for y in 0..ht {
                for x in 0..w {
                    let d = src[(y * w + x) as usize] - at(x + dx, y + dy);
                    sq[(y * w + x) as usize] = f64::from(d * d);
                }
            }
            // Summed-area table, row/col 0 are zero.
            for y in 0..ht {
                let mut row = 0f64;
                for x in 0..w {
                    row += sq[(y * w + x) as usize];
                    sat[((y + 1) * stride + x + 1) as usize] =
                        sat[(y * stride + x + 1) as usize] + row;
                }
            }
            for y in 0..ht {
                let y0 = (y - TEMPLATE_RADIUS).max(0);
                let y1 = (y + TEMPLATE_RADIUS + 1).min(ht);
                for x in 0..w {
                    let x0 = (x - TEMPLATE_RADIUS).max(0);
                    let x1 = (x + TEMPLATE_RADIUS + 1).min(w);
                    let ssd = sat[(y1 * stride + x1) as usize] - sat[(y0 * stride + x1) as usize]
                        - sat[(y1 * stride + x0) as usize]
                        + sat[(y0 * stride + x0) as usize];
                    let area = ((y1 - y0) * (x1 - x0)) as f64;
                    let dist = (ssd / area) as f32 * inv_h2;
                    if dist > 30.0 {
                        continue;
                    }
                    let weight = (-dist).exp();
                    let i = (y * w + x) as usize;
                    num[i] += weight * at(x + dx, y + dy);
                    den[i] += weight;
                }
            }
        }
    }

    let raw: Vec<u8> = num
        .iter()
        .zip(&den)
        .zip(&src)
        .map(|((&s, &d), &orig)| {
            // d ≥ 1 always (zero displacement), guard anyway.
            let v = if d > 0.0 { s / d } else { orig };
            v.round().clamp(0.0, 255.0) as u8
        })
        .collect();
    GrayImage::from_raw(gray.width(), gray.height(), raw).unwrap_or_else(|| gray.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(img: RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode png");
        buf
    }

    #[test]
    fn empty_buffer_is_invalid_image() {
        let err = preprocess(&[], 10.0).unwrap_err();
        assert!(matches!(err, Table2JsonError::InvalidImage { .. }));
    }

    #[test]
    fn garbage_bytes_are_invalid_image() {
        let err = preprocess(b"definitely not a png", 10.0).unwrap_err();
        assert!(matches!(err, Table2JsonError::InvalidImage { .. }));
    }

    #[test]
    fn output_is_two_level_and_same_size() {
        let img = RgbImage::from_fn(60, 40, |x, _| {
            if x < 30 {
                Rgb([20, 20, 20])
            } else {
                Rgb([230, 230, 230])
            }
        });
        let bin = preprocess(&png_bytes(img), 10.0).unwrap();
        assert_eq!(bin.dimensions(), (60, 40));
        assert!(bin.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert_eq!(bin.get_pixel(5, 20).0[0], 0);
        assert_eq!(bin.get_pixel(55, 20).0[0], 255);
    }

    #[test]
    fn threshold_splits_at_otsu_level() {
        let gray = GrayImage::from_fn(4, 1, |x, _| Luma([[10, 30, 200, 220][x as usize]]));
        let (bin, level) = binarize_otsu(&gray);
        assert!((30..200).contains(&level), "level {level}");
        let values: Vec<u8> = bin.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![0, 0, 255, 255]);
    }

    #[test]
    fn gray_uses_bt601_weights() {
        let rgb = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(rgb_to_gray(&rgb).get_pixel(0, 0).0[0], 76);
    }

    #[test]
    fn denoise_preserves_flat_regions() {
        let gray = GrayImage::from_pixel(25, 25, Luma([128]));
        let out = denoise_nl_means(&gray, 10.0);
        assert!(out.pixels().all(|p| p.0[0] == 128));
    }

    #[test]
    fn denoise_removes_isolated_speck() {
        let mut gray = GrayImage::from_pixel(30, 30, Luma([240]));
        gray.put_pixel(15, 15, Luma([120]));
        let out = denoise_nl_means(&gray, 10.0);
        assert!(out.get_pixel(15, 15).0[0] > 200, "got {}", out.get_pixel(15, 15).0[0]);
    }

    #[test]
    fn zero_strength_is_identity() {
        let gray = GrayImage::from_fn(8, 8, |x, y| Luma([(x * 30 + y) as u8]));
        assert_eq!(denoise_nl_means(&gray, 0.0), gray);
    }
}
