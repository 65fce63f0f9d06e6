//! Text extraction from uploaded files.
//!
//! PDFs are read page by page with `pdf-extract`; `.txt` and `.md` files
//! are read as a single page. Extraction is CPU-bound and runs on the
//! blocking thread pool. A malformed PDF that makes the parser panic is
//! reported as an extraction error like any other.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{QaError, Result};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Turns a stored file into page texts.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Return the text of each page, in order.
    async fn extract(&self, path: &Path) -> Result<Vec<String>>;
}

/// Default extractor: PDF plus plain-text fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

fn extraction_error(path: &Path, message: impl Into<String>) -> QaError {
    QaError::Extraction {
        file: path.display().to_string(),
        message: message.into(),
    }
}

fn is_plain_text(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("txt") | Some("md")
    )
}

fn extract_pdf_pages(path: &Path, bytes: &[u8]) -> Result<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| extraction_error(path, format!("unreadable PDF: {}", e)))
}

#[async_trait]
impl TextExtractor for PdfExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<String>> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| extraction_error(path, format!("cannot read file: {}", e)))?;

        if is_plain_text(path) {
            let text = String::from_utf8(bytes)
                .map_err(|_| extraction_error(path, "file is not valid UTF-8"))?;
            return Ok(vec![text]);
        }

        if !bytes.starts_with(PDF_MAGIC) {
            return Err(extraction_error(path, "not a PDF document"));
        }

        let owned: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || extract_pdf_pages(&owned, &bytes))
            .await
            .map_err(|e| extraction_error(path, format!("PDF parser crashed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_garbage_is_extraction_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf at all").unwrap();

        let err = PdfExtractor.extract(&path).await.unwrap_err();
        assert!(matches!(err, QaError::Extraction { .. }));
        assert_eq!(err.code(), "extraction_failed");
    }

    #[tokio::test]
    async fn test_truncated_pdf_is_extraction_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("truncated.pdf");
        std::fs::write(&path, b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog").unwrap();

        assert!(matches!(
            PdfExtractor.extract(&path).await,
            Err(QaError::Extraction { .. })
        ));
    }

    #[tokio::test]
    async fn test_plain_text_is_one_page() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.md");
        std::fs::write(&path, "# Notes\n\nBreathe slowly.").unwrap();

        let pages = PdfExtractor.extract(&path).await.unwrap();
        assert_eq!(pages, vec!["# Notes\n\nBreathe slowly.".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_file_is_extraction_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            PdfExtractor.extract(&tmp.path().join("absent.pdf")).await,
            Err(QaError::Extraction { .. })
        ));
    }
}
