//! Mask preparation for the classical pipeline.
//!
//! Both policies end in a binary `GrayImage` where non-zero pixels are
//! foreground, ready for contour tracing.

use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::definitions::Image;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::integral_image::{integral_image, sum_image_pixels};
use imageproc::morphology;

use crate::config::{AdaptiveSettings, EdgeSettings};

/// Edge mask: grayscale, blur, Canny, dilate.
pub fn edge_mask(rgb: &RgbImage, settings: &EdgeSettings) -> GrayImage {
    let gray = luminance(rgb);
    let blurred = if settings.blur_sigma > 0.0 {
        gaussian_blur_f32(&gray, settings.blur_sigma)
    } else {
        gray
    };
    let edges = canny(&blurred, settings.canny_low, settings.canny_high);
    if settings.dilate_radius > 0 {
        morphology::dilate(&edges, Norm::LInf, settings.dilate_radius)
    } else {
        edges
    }
}

/// Adaptive mask: luminance, CLAHE, inverted local-mean threshold, median,
/// closing. The result is not padded.
pub fn adaptive_mask(rgb: &RgbImage, settings: &AdaptiveSettings) -> GrayImage {
    let luma = luminance(rgb);
    let equalized = clahe(&luma, settings.clahe_clip_limit, settings.clahe_tiles);
    let mut mask = adaptive_threshold_inv(&equalized, settings.block_radius, settings.offset);
    if settings.median_radius > 0 {
        mask = median_filter(&mask, settings.median_radius, settings.median_radius);
    }
    if settings.close_radius > 0 {
        mask = morphology::close(&mask, Norm::LInf, settings.close_radius);
    }
    mask
}

/// BT.601 luma, the Y plane of YCrCb.
pub fn luminance(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([y.round().clamp(0.0, 255.0) as u8])
    })
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into `tiles x tiles` regions; each region gets a
/// clipped, redistributed histogram LUT and pixels are mapped by bilinear
/// interpolation between the four nearest tile LUTs.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let tx = tiles.clamp(1, w) as usize;
    let ty = tiles.clamp(1, h) as usize;
    let tile_w = (w as usize).div_ceil(tx);
    let tile_h = (h as usize).div_ceil(ty);

    let mut luts = vec![[0u8; 256]; tx * ty];
    for j in 0..ty {
        for i in 0..tx {
            let x0 = i * tile_w;
            let y0 = j * tile_h;
            let x1 = ((i + 1) * tile_w).min(w as usize);
            let y1 = ((j + 1) * tile_h).min(h as usize);
            luts[j * tx + i] = tile_lut(gray, x0, y0, x1, y1, clip_limit);
        }
    }

    let axis = |pos: u32, tile: usize, count: usize| -> (usize, usize, f32) {
        let f = ((pos as f32 + 0.5) / tile as f32 - 0.5).max(0.0);
        let lo = (f.floor() as usize).min(count - 1);
        let hi = (lo + 1).min(count - 1);
        let t = (f - lo as f32).clamp(0.0, 1.0);
        (lo, hi, t)
    };

    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y).0[0] as usize;
        let (i0, i1, ax) = axis(x, tile_w, tx);
        let (j0, j1, ay) = axis(y, tile_h, ty);
        let p00 = luts[j0 * tx + i0][v] as f32;
        let p10 = luts[j0 * tx + i1][v] as f32;
        let p01 = luts[j1 * tx + i0][v] as f32;
        let p11 = luts[j1 * tx + i1][v] as f32;
        let top = p00 + (p10 - p00) * ax;
        let bottom = p01 + (p11 - p01) * ax;
        Luma([(top + (bottom - top) * ay).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(gray: &GrayImage, x0: usize, y0: usize, x1: usize, y1: usize, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[gray.get_pixel(x as u32, y as u32).0[0] as usize] += 1;
        }
    }
    let total = ((x1 - x0) * (y1 - y0)).max(1) as u32;

    if clip_limit > 0.0 {
        let clip = ((clip_limit * total as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                excess += *bin - clip;
                *bin = clip;
            }
        }
        let share = excess / 256;
        let remainder = (excess % 256) as usize;
        for (idx, bin) in hist.iter_mut().enumerate() {
            *bin += share + u32::from(idx < remainder);
        }
    }

    let mut lut = [0u8; 256];
    let scale = 255.0 / total as f32;
    let mut cdf = 0u32;
    for (idx, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[idx] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Inverted mean-of-neighbourhood threshold: a pixel becomes foreground
/// (255) when it is at or below the local mean minus `offset`.
///
/// The window is `(2r+1)^2`, clipped at the image border.
pub fn adaptive_threshold_inv(gray: &GrayImage, block_radius: u32, offset: i32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let integral: Image<Luma<u64>> = integral_image(gray);

    GrayImage::from_fn(w, h, |x, y| {
        let left = x.saturating_sub(block_radius);
        let top = y.saturating_sub(block_radius);
        let right = x.saturating_add(block_radius).min(w - 1);
        let bottom = y.saturating_add(block_radius).min(h - 1);
        let [sum] = sum_image_pixels(&integral, left, top, right, bottom);
        let count = ((right - left + 1) as u64 * (bottom - top + 1) as u64) as f64;
        let mean = sum as f64 / count;
        let value = gray.get_pixel(x, y).0[0] as f64;
        if value <= mean - offset as f64 {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Surround a mask with `margin` background pixels on every side.
pub fn pad(mask: &GrayImage, margin: u32) -> GrayImage {
    if margin == 0 {
        return mask.clone();
    }
    let mut padded = GrayImage::new(mask.width() + 2 * margin, mask.height() + 2 * margin);
    image::imageops::replace(&mut padded, mask, margin as i64, margin as i64);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn square_frame() -> RgbImage {
        let mut img = RgbImage::from_pixel(160, 120, Rgb([20, 20, 20]));
        for y in 40..80 {
            for x in 60..100 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        img
    }

    #[test]
    fn luminance_weights() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        assert_eq!(luminance(&img).get_pixel(0, 0).0[0], 76);
    }

    #[test]
    fn clahe_keeps_dimensions_and_order() {
        let gray = luminance(&square_frame());
        let eq = clahe(&gray, 2.0, 8);
        assert_eq!(eq.dimensions(), gray.dimensions());
        assert!(eq.get_pixel(80, 60).0[0] > eq.get_pixel(5, 5).0[0]);
    }

    #[test]
    fn clahe_on_tiny_image_uses_fewer_tiles() {
        let gray = GrayImage::from_pixel(3, 2, Luma([100]));
        let eq = clahe(&gray, 2.0, 8);
        assert_eq!(eq.dimensions(), (3, 2));
    }

    #[test]
    fn uniform_image_has_no_foreground() {
        let gray = GrayImage::from_pixel(32, 32, Luma([90]));
        let mask = adaptive_threshold_inv(&gray, 5, 7);
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn threshold_marks_dark_side_of_edges() {
        let gray = luminance(&square_frame());
        let mask = adaptive_threshold_inv(&gray, 6, 7);
        // just outside the bright square
        assert_eq!(mask.get_pixel(57, 60).0[0], 255);
        // far background and square interior
        assert_eq!(mask.get_pixel(5, 5).0[0], 0);
        assert_eq!(mask.get_pixel(80, 60).0[0], 0);
    }

    #[test]
    fn threshold_window_is_clipped_at_border() {
        let mut gray = GrayImage::from_pixel(3, 3, Luma([100]));
        gray.put_pixel(0, 0, Luma([80]));
        let mask = adaptive_threshold_inv(&gray, 1, 7);
        // corner mean over the 2x2 clipped window is 95
        assert_eq!(mask.get_pixel(0, 0).0[0], 255);
        assert_eq!(mask.get_pixel(1, 1).0[0], 0);
        assert_eq!(mask.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn pad_offsets_content() {
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(0, 0, Luma([255]));
        let padded = pad(&mask, 3);
        assert_eq!(padded.dimensions(), (10, 10));
        assert_eq!(padded.get_pixel(3, 3).0[0], 255);
        assert_eq!(padded.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn edge_mask_finds_square_outline() {
        let mask = edge_mask(&square_frame(), &EdgeSettings::default());
        assert!(mask.get_pixel(60, 60).0[0] > 0 || mask.get_pixel(59, 60).0[0] > 0);
        assert_eq!(mask.get_pixel(80, 60).0[0], 0);
    }
}
