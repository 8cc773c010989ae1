//! Receipt reading layer: OCR for images, text layer for PDFs, tiled OCR
//! fallback and the weighted receipt classifier.

pub mod classifier;
pub mod enhance;
mod error;
pub mod extract;
pub mod ocr;
pub mod pdf;
pub mod signals;
pub mod tiles;

pub use classifier::{Classifier, DEFAULT_THRESHOLD, ReceiptVerdict, Signal, Weights};
pub use error::OcrError;
pub use extract::{ExtractedText, read_receipt};
pub use ocr::{OcrEngine, OcrParams, PageSegMode, UnavailableEngine, default_engine};
#[cfg(feature = "tesseract")]
pub use ocr::TesseractEngine;
pub use tiles::{TileGrid, scan_tiles};
