//! Raw text for one media payload: PDF text layer or OCR, plus the tiled
//! fallback for images whose whole-image OCR has no amount.

use recibo_core::{MediaKind, best_amount};
use tracing::{debug, warn};

use crate::ocr::{OcrEngine, OcrParams, decode_image};
use crate::pdf;
use crate::tiles::{TileGrid, scan_tiles};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedText {
    /// OCR or PDF text; empty when extraction failed.
    pub text: String,
    /// Amount recovered by the tiled fallback, if it ran and hit.
    pub tile_amount: Option<f64>,
}

/// Read a receipt. Blocking; failures degrade to empty text.
pub fn read_receipt(
    engine: &dyn OcrEngine,
    kind: MediaKind,
    bytes: &[u8],
    grid: &TileGrid,
) -> ExtractedText {
    match kind {
        MediaKind::Pdf => match pdf::extract_text(bytes) {
            Ok(text) => ExtractedText {
                text,
                tile_amount: None,
            },
            Err(e) => {
                warn!(error = %e, "PDF text extraction failed");
                ExtractedText::default()
            }
        },
        MediaKind::Image => read_image(engine, bytes, grid),
        MediaKind::Unsupported => ExtractedText::default(),
    }
}

fn read_image(engine: &dyn OcrEngine, bytes: &[u8], grid: &TileGrid) -> ExtractedText {
    let image = match decode_image(bytes) {
        Ok(image) => image,
        Err(e) => {
            warn!(error = %e, "could not decode receipt image");
            return ExtractedText::default();
        }
    };

    let text = engine
        .recognize(&image, &OcrParams::default())
        .unwrap_or_else(|e| {
            warn!(engine = engine.name(), error = %e, "whole-image OCR failed");
            String::new()
        });

    let tile_amount = if best_amount(&text).is_none() {
        debug!(
            width = image.width(),
            height = image.height(),
            "no amount in OCR text, trying tiles"
        );
        scan_tiles(engine, &image, grid)
    } else {
        None
    };

    ExtractedText { text, tile_amount }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{DynamicImage, GrayImage, Luma};

    use super::*;
    use crate::OcrError;
    use crate::ocr::{PageSegMode, encode_png};

    /// Whole-image calls return `page`; tile calls return `tile`.
    struct SplitEngine {
        page: &'static str,
        tile: &'static str,
        tile_calls: AtomicUsize,
    }

    impl OcrEngine for SplitEngine {
        fn name(&self) -> &str {
            "split"
        }

        fn recognize(&self, _image: &DynamicImage, params: &OcrParams) -> Result<String, OcrError> {
            if params.segmentation == PageSegMode::Auto {
                Ok(self.page.to_string())
            } else {
                self.tile_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.tile.to_string())
            }
        }
    }

    fn png() -> Vec<u8> {
        encode_png(&DynamicImage::ImageLuma8(GrayImage::from_pixel(
            60,
            120,
            Luma([255]),
        )))
        .unwrap()
    }

    #[test]
    fn page_amount_skips_tiles() {
        let engine = SplitEngine {
            page: "Transferencia $ 8.000",
            tile: "$1.000",
            tile_calls: AtomicUsize::new(0),
        };
        let out = read_receipt(&engine, MediaKind::Image, &png(), &TileGrid::default());
        assert_eq!(out.text, "Transferencia $ 8.000");
        assert_eq!(out.tile_amount, None);
        assert_eq!(engine.tile_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tiles_recover_missing_amount() {
        let engine = SplitEngine {
            page: "Comprobante de transferencia",
            tile: "$12.500",
            tile_calls: AtomicUsize::new(0),
        };
        let out = read_receipt(&engine, MediaKind::Image, &png(), &TileGrid::default());
        assert_eq!(out.tile_amount, Some(12_500.0));
        assert_eq!(engine.tile_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn undecodable_image_is_empty() {
        let engine = SplitEngine {
            page: "$ 1.000",
            tile: "",
            tile_calls: AtomicUsize::new(0),
        };
        let out = read_receipt(&engine, MediaKind::Image, b"nope", &TileGrid::default());
        assert_eq!(out, ExtractedText::default());
    }

    #[test]
    fn broken_pdf_is_empty() {
        let engine = SplitEngine {
            page: "",
            tile: "",
            tile_calls: AtomicUsize::new(0),
        };
        let out = read_receipt(&engine, MediaKind::Pdf, b"%PDF-garbage", &TileGrid::default());
        assert!(out.text.trim().is_empty());
        assert_eq!(out.tile_amount, None);
    }

    const RECEIPT_PDF: &[u8] = include_bytes!("../fixtures/receipt.pdf");

    #[test]
    fn pdf_text_layer_is_classified() {
        let engine = SplitEngine {
            page: "",
            tile: "$ 1.000",
            tile_calls: AtomicUsize::new(0),
        };
        let out = read_receipt(&engine, MediaKind::Pdf, RECEIPT_PDF, &TileGrid::default());
        assert!(out.text.contains("15.000"), "{:?}", out.text);
        assert_eq!(out.tile_amount, None);
        // PDFs never go through OCR.
        assert_eq!(engine.tile_calls.load(Ordering::SeqCst), 0);

        let verdict = crate::Classifier::default().classify(&out.text);
        assert!(verdict.accepted, "{verdict:?}");
        assert_eq!(verdict.amount, Some(15_000.0));
        assert_eq!(verdict.provider.as_deref(), Some("Mercado Pago"));
    }

    #[test]
    fn unsupported_media_is_empty() {
        let engine = SplitEngine {
            page: "$ 9.000",
            tile: "",
            tile_calls: AtomicUsize::new(0),
        };
        let out = read_receipt(&engine, MediaKind::Unsupported, b"", &TileGrid::default());
        assert_eq!(out, ExtractedText::default());
    }
}
