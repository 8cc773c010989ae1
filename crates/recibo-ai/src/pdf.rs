//! Text layer extraction for PDF receipts.

use anyhow::Context;

/// Extract the embedded text of a PDF. Scanned PDFs without a text layer
/// yield an empty or whitespace-only string.
pub fn extract_text(bytes: &[u8]) -> anyhow::Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes).context("extracting PDF text")?;
    Ok(text)
}
