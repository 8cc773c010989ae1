//! Grayscale enhancement passes applied to tiles before OCR.

use image::{GrayImage, Luma};

/// One preprocessing pipeline. Tiles are tried with each in [`Enhancement::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enhancement {
    /// Linear stretch of the observed intensity range to 0..=255.
    Contrast,
    /// 3×3 median filter, then Otsu binarization.
    MedianOtsu,
    /// Gamma correction (0.6 brightens midtones of dark screenshots).
    Gamma,
}

pub const GAMMA: f32 = 0.6;

impl Enhancement {
    pub const ALL: [Enhancement; 3] = [Self::Contrast, Self::MedianOtsu, Self::Gamma];

    pub fn apply(&self, img: &GrayImage) -> GrayImage {
        match self {
            Self::Contrast => contrast_stretch(img),
            Self::MedianOtsu => {
                let smoothed = median3(img);
                let t = otsu_threshold(&smoothed);
                binarize(&smoothed, t)
            }
            Self::Gamma => gamma(img, GAMMA),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contrast => "contrast",
            Self::MedianOtsu => "median_otsu",
            Self::Gamma => "gamma",
        }
    }
}

pub fn contrast_stretch(img: &GrayImage) -> GrayImage {
    let (lo, hi) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi <= lo {
        return img.clone();
    }
    let span = f32::from(hi - lo);
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p[0] = (f32::from(p[0] - lo) * 255.0 / span).round() as u8;
    }
    out
}

/// 3×3 median with edge pixels replicated.
pub fn median3(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let mut window = [0u8; 9];
        let mut i = 0;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = (i64::from(x) + dx).clamp(0, i64::from(w) - 1) as u32;
                let ny = (i64::from(y) + dy).clamp(0, i64::from(h) - 1) as u32;
                window[i] = img.get_pixel(nx, ny)[0];
                i += 1;
            }
        }
        window.sort_unstable();
        Luma([window[4]])
    })
}

/// Otsu's threshold: the level maximising between-class variance.
pub fn otsu_threshold(img: &GrayImage) -> u8 {
    let mut hist = [0u64; 256];
    for p in img.pixels() {
        hist[usize::from(p[0])] += 1;
    }
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 127;
    }
    let weighted_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(level, &n)| level as f64 * n as f64)
        .sum();

    let mut best = (0u8, f64::MIN);
    let mut weight_bg = 0u64;
    let mut sum_bg = 0.0f64;
    for (level, &n) in hist.iter().enumerate() {
        weight_bg += n;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += level as f64 * n as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (weighted_total - sum_bg) / weight_fg as f64;
        let between = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if between > best.1 {
            best = (level as u8, between);
        }
    }
    best.0
}

/// Pixels above `threshold` become white, the rest black.
pub fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p[0] = if p[0] > threshold { 255 } else { 0 };
    }
    out
}

pub fn gamma(img: &GrayImage, g: f32) -> GrayImage {
    let lut: Vec<u8> = (0..=255u16)
        .map(|v| ((f32::from(v) / 255.0).powf(g) * 255.0).round() as u8)
        .collect();
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p[0] = lut[usize::from(p[0])];
    }
    out
}
