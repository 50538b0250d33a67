//! PDF text extraction wrapper
//!
//! Wraps the pdf-extract crate with error handling for:
//! - Encrypted PDFs
//! - Scanned/image-only PDFs (yield empty text, not an error)
//! - Corrupted PDFs (pdf-extract may panic on these)

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use super::{DocumentSource, ExtractedDocument, ExtractionError};

/// Extract full text from PDF bytes
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> Result<String, String> {
    if pdf_bytes.len() < 4 || &pdf_bytes[0..4] != b"%PDF" {
        return Err("not a PDF file".to_string());
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(pdf_bytes)));
    match result {
        Ok(Ok(text)) => Ok(text.trim().to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("PDF parser crashed on this file".to_string()),
    }
}

/// Reads PDFs from disk; the title defaults to the file stem
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextSource;

impl DocumentSource for PdfTextSource {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractionError> {
        let bytes = fs::read(path).map_err(|source| ExtractionError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let text = extract_text_from_pdf(&bytes).map_err(|message| ExtractionError::Unreadable {
            path: path.to_path_buf(),
            message,
        })?;

        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(ExtractedDocument { text, title })
    }
}
