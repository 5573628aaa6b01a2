//! Page-level text extraction for policy documents.
//!
//! PDFs go through `pdf-extract`; its output separates pages with form
//! feeds, which become page boundaries. Plain-text and Markdown files are a
//! single page. Extraction never panics: callers log the error and skip the
//! file.

use std::path::Path;

/// Extraction error.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFileType(String),
    Io(std::io::Error),
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFileType(ext) => {
                write!(f, "unsupported file type: {}", ext)
            }
            ExtractError::Io(e) => write!(f, "failed to read file: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

impl From<std::io::Error> for ExtractError {
    fn from(e: std::io::Error) -> Self {
        ExtractError::Io(e)
    }
}

/// Extract the text of each page of `path`, in order.
///
/// Pages are returned as-is (possibly blank); the splitter drops empty text.
pub fn extract_pages(path: &Path) -> Result<Vec<String>, ExtractError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => extract_pdf_pages(&std::fs::read(path)?),
        "txt" | "md" | "markdown" => Ok(vec![std::fs::read_to_string(path)?]),
        _ => Err(ExtractError::UnsupportedFileType(ext)),
    }
}

pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(split_form_feeds(&text))
}

fn split_form_feeds(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\u{c}').map(|p| p.to_string()).collect();
    // A trailing form feed closes the last page rather than opening a new one.
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    pages
}
