use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image for the engine: {0}")]
    Encode(#[source] image::ImageError),

    #[error("ocr engine error: {0}")]
    Engine(String),

    #[error("no ocr engine available (build with the `tesseract` feature)")]
    Unavailable,
}
