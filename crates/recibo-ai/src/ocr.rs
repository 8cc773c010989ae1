//! OCR engine seam.
//!
//! The pipeline only talks to [`OcrEngine`]. The tesseract-backed engine links
//! system leptonica and tesseract, so it is compiled only with the `tesseract`
//! feature; without it [`default_engine`] hands out an engine that always
//! reports [`OcrError::Unavailable`] and receipts are scored on caption text alone.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};

use crate::OcrError;

/// Tesseract page segmentation modes used by the receipt reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSegMode {
    /// Fully automatic layout analysis.
    #[default]
    Auto,
    SingleBlock,
    SingleLine,
    SingleWord,
}

impl PageSegMode {
    /// Value of the `tessedit_pageseg_mode` variable.
    pub fn tesseract_value(&self) -> &'static str {
        match self {
            Self::Auto => "3",
            Self::SingleBlock => "6",
            Self::SingleLine => "7",
            Self::SingleWord => "8",
        }
    }
}

/// Per-call recognition settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrParams {
    pub segmentation: PageSegMode,
    /// Restrict recognised characters, e.g. `0123456789$.,`.
    pub whitelist: Option<String>,
}

impl OcrParams {
    pub fn new(segmentation: PageSegMode) -> Self {
        Self {
            segmentation,
            whitelist: None,
        }
    }

    pub fn with_whitelist(mut self, chars: &str) -> Self {
        self.whitelist = Some(chars.to_string());
        self
    }
}

/// Every OCR backend implements this. Calls are blocking and may be slow.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, image: &DynamicImage, params: &OcrParams) -> Result<String, OcrError>;
}

/// Decode image bytes (PNG, JPEG, WebP).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, OcrError> {
    image::load_from_memory(bytes).map_err(OcrError::Decode)
}

/// Encode an image as PNG for engines that take encoded bytes.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, OcrError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(OcrError::Encode)?;
    Ok(buf)
}

#[cfg(feature = "tesseract")]
mod tess {
    use image::DynamicImage;
    use leptess::{LepTess, Variable};

    use super::{OcrEngine, OcrParams, encode_png};
    use crate::OcrError;

    /// Tesseract via leptess. A fresh instance per call keeps the engine
    /// `Send + Sync` without locking.
    pub struct TesseractEngine {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractEngine {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self {
                data_path,
                lang: lang.to_string(),
            }
        }
    }

    impl OcrEngine for TesseractEngine {
        fn name(&self) -> &str {
            "tesseract"
        }

        fn recognize(&self, image: &DynamicImage, params: &OcrParams) -> Result<String, OcrError> {
            let png = encode_png(image)?;
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(format!("tesseract init: {e}")))?;
            lt.set_variable(
                Variable::TesseditPagesegMode,
                params.segmentation.tesseract_value(),
            )
            .map_err(|e| OcrError::Engine(format!("set pageseg mode: {e}")))?;
            if let Some(chars) = &params.whitelist {
                lt.set_variable(Variable::TesseditCharWhitelist, chars)
                    .map_err(|e| OcrError::Engine(format!("set whitelist: {e}")))?;
            }
            lt.set_image_from_mem(&png)
                .map_err(|e| OcrError::Engine(format!("load image: {e}")))?;
            lt.get_utf8_text()
                .map_err(|e| OcrError::Engine(format!("tesseract run: {e}")))
        }
    }
}

#[cfg(feature = "tesseract")]
pub use tess::TesseractEngine;

/// Stand-in engine for builds without tesseract.
pub struct UnavailableEngine;

impl OcrEngine for UnavailableEngine {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn recognize(&self, _image: &DynamicImage, _params: &OcrParams) -> Result<String, OcrError> {
        Err(OcrError::Unavailable)
    }
}

/// The best engine this build supports, for the given tesseract language(s).
#[cfg(feature = "tesseract")]
pub fn default_engine(lang: &str) -> Arc<dyn OcrEngine> {
    Arc::new(TesseractEngine::new(None, lang))
}

/// The best engine this build supports, for the given tesseract language(s).
#[cfg(not(feature = "tesseract"))]
pub fn default_engine(lang: &str) -> Arc<dyn OcrEngine> {
    tracing::debug!(lang, "built without tesseract; OCR disabled");
    Arc::new(UnavailableEngine)
}
