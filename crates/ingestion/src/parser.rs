//! Page extraction
//!
//! PDFs are read page by page with lopdf; plain text files are split on form
//! feeds. Each page keeps its 1-based number as the page label.

use docchat_common::errors::FetchError;
use std::path::Path;
use tracing::{debug, warn};

/// One page of extracted text
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based page number, stored as the node's page label
    pub label: String,
    pub text: String,
}

/// Parse a downloaded file, choosing the parser by extension
pub fn parse_file(path: &Path, extension: &str) -> Result<Vec<Page>, FetchError> {
    match extension {
        "txt" | "md" | "text" => parse_plain_text(path),
        _ => parse_pdf(path),
    }
}

/// Extract text from every page of a PDF, skipping pages that fail
pub fn parse_pdf(path: &Path) -> Result<Vec<Page>, FetchError> {
    let doc = lopdf::Document::load(path).map_err(|e| parse_error(path, e))?;
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();

    debug!(page_count = page_numbers.len(), "Extracting text from PDF");

    let mut pages = Vec::with_capacity(page_numbers.len());
    for number in page_numbers {
        match doc.extract_text(&[number]) {
            Ok(text) => {
                let cleaned = clean_text(&text);
                if !cleaned.is_empty() {
                    pages.push(Page {
                        label: number.to_string(),
                        text: cleaned,
                    });
                }
            }
            Err(e) => {
                warn!(page = number, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }

    if pages.is_empty() {
        return Err(parse_error(path, "No text content extracted from PDF"));
    }

    Ok(pages)
}

/// Read a UTF-8 text file; form feeds separate pages
pub fn parse_plain_text(path: &Path) -> Result<Vec<Page>, FetchError> {
    let bytes = std::fs::read(path)?;
    let content = String::from_utf8(bytes).map_err(|e| parse_error(path, e))?;
    Ok(split_pages(&content))
}

fn split_pages(content: &str) -> Vec<Page> {
    content
        .split('\u{000C}')
        .enumerate()
        .filter_map(|(i, raw)| {
            let text = clean_text(raw);
            (!text.is_empty()).then(|| Page {
                label: (i + 1).to_string(),
                text,
            })
        })
        .collect()
}

fn parse_error(path: &Path, err: impl std::fmt::Display) -> FetchError {
    FetchError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Collapse whitespace and strip byte order marks
fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{FEFF}', "")
}
