//! Tiled OCR fallback for receipt screenshots.
//!
//! Whole-image OCR often misses the amount on wallet screenshots: large
//! stylised digits on coloured backgrounds. The amount sits in a predictable
//! band of the upper-left area, so that band is cut into a grid, each cell is
//! padded, upscaled and enhanced, and OCR is retried with single-line and
//! single-word segmentation restricted to amount characters.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use recibo_core::first_amount;
use tracing::debug;

use crate::enhance::Enhancement;
use crate::ocr::{OcrEngine, OcrParams, PageSegMode};
use crate::OcrError;

pub const AMOUNT_WHITELIST: &str = "0123456789$.,";

const SEGMENTATIONS: [PageSegMode; 2] = [PageSegMode::SingleLine, PageSegMode::SingleWord];

/// Geometry of the scanned band, as fractions of the image size.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
    pub rows: u32,
    pub cols: u32,
    /// Horizontal padding per tile, as a fraction of the image width.
    pub pad_x: f64,
    /// Vertical padding per tile, as a fraction of the image height.
    pub pad_y: f64,
    pub upscale: u32,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self {
            top: 0.08,
            bottom: 0.48,
            left: 0.04,
            right: 0.70,
            rows: 4,
            cols: 6,
            pad_x: 0.08,
            pad_y: 0.04,
            upscale: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileGrid {
    /// Padded tile rectangles for an image, row-major, clamped to the image.
    pub fn tile_rects(&self, width: u32, height: u32) -> Vec<TileRect> {
        if self.rows == 0 || self.cols == 0 {
            return Vec::new();
        }
        let (w, h) = (f64::from(width), f64::from(height));
        let x0 = self.left * w;
        let y0 = self.top * h;
        let cell_w = (self.right - self.left) * w / f64::from(self.cols);
        let cell_h = (self.bottom - self.top) * h / f64::from(self.rows);
        let pad_x = self.pad_x * w;
        let pad_y = self.pad_y * h;

        let mut rects = Vec::with_capacity((self.rows * self.cols) as usize);
        for row in 0..self.rows {
            for col in 0..self.cols {
                let left = (x0 + f64::from(col) * cell_w - pad_x).max(0.0);
                let top = (y0 + f64::from(row) * cell_h - pad_y).max(0.0);
                let right = (x0 + f64::from(col + 1) * cell_w + pad_x).min(w);
                let bottom = (y0 + f64::from(row + 1) * cell_h + pad_y).min(h);
                let rect = TileRect {
                    x: left.floor() as u32,
                    y: top.floor() as u32,
                    width: (right.ceil() - left.floor()).max(0.0) as u32,
                    height: (bottom.ceil() - top.floor()).max(0.0) as u32,
                };
                if rect.width > 0 && rect.height > 0 {
                    rects.push(rect);
                }
            }
        }
        rects
    }

    fn prepare(&self, gray: &GrayImage, rect: TileRect) -> GrayImage {
        let tile = imageops::crop_imm(gray, rect.x, rect.y, rect.width, rect.height).to_image();
        let factor = self.upscale.max(1);
        if factor == 1 {
            return tile;
        }
        imageops::resize(
            &tile,
            rect.width * factor,
            rect.height * factor,
            FilterType::CatmullRom,
        )
    }
}

/// First plausible amount found in the grid, or `None`.
///
/// Order: tiles row-major, then enhancement pipeline, then segmentation mode.
/// Engine errors on a single tile are logged and skipped; an unavailable
/// engine ends the scan immediately.
pub fn scan_tiles(engine: &dyn OcrEngine, image: &DynamicImage, grid: &TileGrid) -> Option<f64> {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();

    for (index, rect) in grid.tile_rects(width, height).into_iter().enumerate() {
        let tile = grid.prepare(&gray, rect);
        for enhancement in Enhancement::ALL {
            let prepared = DynamicImage::ImageLuma8(enhancement.apply(&tile));
            for segmentation in SEGMENTATIONS {
                let params = OcrParams::new(segmentation).with_whitelist(AMOUNT_WHITELIST);
                match engine.recognize(&prepared, &params) {
                    Ok(text) => {
                        if let Some(amount) = first_amount(&text) {
                            debug!(
                                tile = index,
                                enhancement = enhancement.as_str(),
                                ?segmentation,
                                amount,
                                "tile OCR found amount"
                            );
                            return Some(amount);
                        }
                    }
                    Err(OcrError::Unavailable) => return None,
                    Err(e) => {
                        debug!(tile = index, error = %e, "tile OCR failed");
                    }
                }
            }
        }
    }
    None
}
