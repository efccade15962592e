//! PDF text extraction, one entry per page.
//!
//! Wraps `pdf-extract`. Extraction never panics the caller: unreadable or
//! malformed files become [`DocQaError::DocumentExtraction`] and the
//! ingestion pipeline skips them.

use std::path::Path;

use crate::error::{DocQaError, Result};
use crate::models::PageText;

/// Whether `path` has a `.pdf` extension (case-insensitive).
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Read a PDF from disk and return its pages in order, numbered from 1.
///
/// The page's `source_id` is the file name.
pub fn extract_pages(path: &Path) -> Result<Vec<PageText>> {
    let bytes = std::fs::read(path).map_err(|e| DocQaError::DocumentExtraction {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let source_id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    extract_pages_from_mem(&bytes, &source_id).map_err(|message| DocQaError::DocumentExtraction {
        path: path.to_path_buf(),
        message,
    })
}

/// Extract pages from in-memory PDF bytes (e.g. an upload).
pub fn extract_pages_from_mem(bytes: &[u8], source_id: &str) -> std::result::Result<Vec<PageText>, String> {
    if !bytes.starts_with(b"%PDF") {
        return Err("not a PDF file (missing %PDF header)".to_string());
    }

    // pdf-extract panics on some malformed inputs.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| "PDF parser panicked on malformed input".to_string())?
        .map_err(|e| e.to_string())?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText::new(source_id, Some(i as u32 + 1), text))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn recognizes_pdf_extension() {
        assert!(is_pdf(Path::new("report.pdf")));
        assert!(is_pdf(Path::new("dir/REPORT.PDF")));
        assert!(!is_pdf(Path::new("notes.txt")));
        assert!(!is_pdf(Path::new("pdf")));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pages_from_mem(b"not a pdf", "x.pdf").unwrap_err();
        assert!(err.contains("%PDF"));
    }

    #[test]
    fn truncated_pdf_returns_error() {
        let err = extract_pages_from_mem(b"%PDF-1.4\n1 0 obj << /Type /Catalog", "x.pdf");
        assert!(err.is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let path = PathBuf::from("/no/such/dir/report.pdf");
        let err = extract_pages(&path).unwrap_err();
        assert!(matches!(err, DocQaError::DocumentExtraction { .. }));
        assert!(err.to_string().contains("report.pdf"));
    }
}
