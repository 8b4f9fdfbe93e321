use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;

use crate::geometry::AxisRect;

/// Geometry of one letterbox transform, needed to map boxes back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub size: u32,
    pub src_width: u32,
    pub src_height: u32,
}

impl Letterbox {
    /// Resize ratio and resized dimensions for fitting `w0 x h0` into a square side.
    pub fn scale_wh(w0: f32, h0: f32, side: f32) -> (f32, f32, f32) {
        let r = (side / w0).min(side / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    pub fn new(src_width: u32, src_height: u32, size: u32) -> Self {
        let (scale, nw, nh) = Self::scale_wh(src_width as f32, src_height as f32, size as f32);
        let nw = (nw as u32).clamp(1, size);
        let nh = (nh as u32).clamp(1, size);
        Self {
            scale,
            pad_x: (size - nw) / 2,
            pad_y: (size - nh) / 2,
            size,
            src_width,
            src_height,
        }
    }

    pub fn resized_dims(&self) -> (u32, u32) {
        let (_, nw, nh) = Self::scale_wh(self.src_width as f32, self.src_height as f32, self.size as f32);
        ((nw as u32).clamp(1, self.size), (nh as u32).clamp(1, self.size))
    }

    /// Source pixel to canvas pixel.
    pub fn forward(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.pad_x as f32, y * self.scale + self.pad_y as f32)
    }

    /// Canvas pixel to source pixel, unclamped.
    pub fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x as f32) / self.scale, (y - self.pad_y as f32) / self.scale)
    }

    /// Canvas corner box to a source-frame box clamped to the last valid
    /// pixel index on each axis.
    pub fn inverse_box(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> AxisRect {
        let w = self.src_width.saturating_sub(1) as f32;
        let h = self.src_height.saturating_sub(1) as f32;
        let (ax, ay) = self.inverse(x1, y1);
        let (bx, by) = self.inverse(x2, y2);
        AxisRect::from_corners(
            ax.clamp(0.0, w),
            ay.clamp(0.0, h),
            bx.clamp(0.0, w),
            by.clamp(0.0, h),
        )
    }

    /// Resize `image` into a padded square canvas.
    pub fn apply(&self, image: &RgbImage, fill: u8) -> RgbImage {
        let (nw, nh) = self.resized_dims();
        let resized = imageops::resize(image, nw, nh, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([fill, fill, fill]));
        imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
        canvas
    }
}

/// `1x3xHxW` tensor scaled to `[0, 1]`.
pub fn to_nchw(canvas: &RgbImage) -> Array4<f32> {
    let (w, h) = canvas.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        canvas.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_frame_pads_vertically() {
        let lb = Letterbox::new(640, 480, 640);
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 80);
    }

    #[test]
    fn portrait_frame_pads_horizontally() {
        let lb = Letterbox::new(480, 640, 320);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.resized_dims(), (240, 320));
        assert_eq!(lb.pad_x, 40);
        assert_eq!(lb.pad_y, 0);
    }

    #[test]
    fn round_trip_within_a_pixel() {
        let lb = Letterbox::new(1280, 720, 640);
        for &(x, y) in &[(0.0, 0.0), (13.0, 711.0), (640.5, 360.25), (1279.0, 719.0)] {
            let (fx, fy) = lb.forward(x, y);
            let (bx, by) = lb.inverse(fx, fy);
            assert!((bx - x).abs() <= 1.0 && (by - y).abs() <= 1.0);
        }
    }

    #[test]
    fn inverse_box_clamps_to_frame() {
        let lb = Letterbox::new(640, 480, 640);
        let rect = lb.inverse_box(-10.0, 40.0, 700.0, 300.0);
        assert_eq!(rect.x, 0.0);
        assert_eq!(rect.y, 0.0);
        assert_eq!(rect.x2(), 639.0);
        assert_eq!(rect.y2(), 220.0);

        let below = lb.inverse_box(100.0, 500.0, 200.0, 600.0);
        assert_eq!(below.y, 479.0);
        assert_eq!(below.h, 0.0);
    }

    #[test]
    fn canvas_fill_and_tensor_layout() {
        let img = RgbImage::from_pixel(64, 32, Rgb([255, 0, 0]));
        let lb = Letterbox::new(64, 32, 64);
        let canvas = lb.apply(&img, 114);
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([114, 114, 114]));
        assert_eq!(canvas.get_pixel(10, 32), &Rgb([255, 0, 0]));
        let tensor = to_nchw(&canvas);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert!((tensor[[0, 0, 32, 10]] - 1.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 1, 32, 10]], 0.0);
    }
}
