//! Document Extractor — turns an uploaded document into bounded plain text.
//!
//! Flow: `Extraction::start(doc)` decodes the document, the returned value is
//! iterated for `ExtractionProgress` events (lazy, finite, not restartable),
//! and `finish(max_chars)` yields the bounded `ExtractedText`.
//!
//! Extraction is CPU-bound; async callers run it inside `spawn_blocking`.

mod docx;
mod pdf;

use std::iter::FusedIterator;

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::errors::PipelineError;

/// Appended to text cut at the character ceiling.
pub const TRUNCATION_SENTINEL: &str = "\n\n[...text truncated at context limit...]";

/// Separator placed between the texts of consecutive PDF pages.
const PAGE_SEPARATOR: &str = "\n\n";

// ────────────────────────────────────────────────────────────────────────────
// Source documents
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    /// Office Open XML word processing document (.docx).
    RichText,
    PlainText,
}

impl DocumentKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::RichText),
            "txt" => Some(Self::PlainText),
            _ => None,
        }
    }

    /// Declared kind from the file extension, falling back to PDF magic bytes.
    pub fn detect(file_name: &str, bytes: &[u8]) -> Option<Self> {
        extension_of(file_name)
            .and_then(Self::from_extension)
            .or_else(|| is_pdf_magic(bytes).then_some(Self::Pdf))
    }
}

/// An uploaded document. Owned by the caller and consumed once by extraction.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub file_name: String,
    pub bytes: Bytes,
    /// `None` when the document is of a kind the extractor cannot read.
    pub kind: Option<DocumentKind>,
}

impl SourceDocument {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let bytes = bytes.into();
        let kind = DocumentKind::detect(&file_name, &bytes);
        Self {
            file_name,
            bytes,
            kind,
        }
    }
}

fn extension_of(file_name: &str) -> Option<&str> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// PDF magic: `%PDF` after an optional UTF-8 BOM and whitespace.
fn is_pdf_magic(bytes: &[u8]) -> bool {
    let head = bytes
        .iter()
        .skip_while(|&&b| b == 0xEF || b == 0xBB || b == 0xBF || b.is_ascii_whitespace())
        .take(4)
        .copied()
        .collect::<Vec<_>>();

    head.starts_with(b"%PDF")
}

// ────────────────────────────────────────────────────────────────────────────
// Progress + bounded output
// ────────────────────────────────────────────────────────────────────────────

/// One observation of extraction progress. Purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtractionProgress {
    pub units_processed: usize,
    pub units_total: usize,
    /// 0 – 100
    pub percentage: u8,
}

impl ExtractionProgress {
    fn of(units_processed: usize, units_total: usize) -> Self {
        let percentage = if units_total == 0 {
            100
        } else {
            ((units_processed as f64 / units_total as f64) * 100.0).round() as u8
        };
        Self {
            units_processed,
            units_total,
            percentage,
        }
    }
}

/// Plain text bounded by a character ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    text: String,
    truncated: bool,
}

impl ExtractedText {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True when the original text exceeded the ceiling and the sentinel was appended.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Cuts `text` to exactly `max_chars` characters and appends the sentinel when
/// it is longer than the ceiling. Applying it again with the same ceiling to
/// its own output returns the same string.
pub fn bound_text(text: &str, max_chars: usize) -> ExtractedText {
    match text.char_indices().nth(max_chars) {
        None => ExtractedText {
            text: text.to_string(),
            truncated: false,
        },
        Some((cut, _)) => {
            let mut bounded = String::with_capacity(cut + TRUNCATION_SENTINEL.len());
            bounded.push_str(&text[..cut]);
            bounded.push_str(TRUNCATION_SENTINEL);
            ExtractedText {
                text: bounded,
                truncated: true,
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Extraction
// ────────────────────────────────────────────────────────────────────────────

enum Pending {
    /// Decoded PDF pages not yet folded into the output.
    Pages {
        pages: std::vec::IntoIter<String>,
        total: usize,
        processed: usize,
        reported_empty: bool,
    },
    /// Rich text and plain text decode in one shot: a synthetic 0% event,
    /// then 100% once the text is taken.
    Whole { text: Option<String>, started: bool },
}

/// An in-progress extraction. Iterating yields progress events; `finish`
/// drains whatever is left and returns the bounded text.
pub struct Extraction {
    file_name: String,
    pending: Pending,
    text: String,
}

impl Extraction {
    /// Decodes `doc` according to its declared kind.
    pub fn start(doc: SourceDocument) -> Result<Self, PipelineError> {
        let Some(kind) = doc.kind else {
            return Err(PipelineError::UnsupportedFormat {
                extension: extension_of(&doc.file_name)
                    .unwrap_or("none")
                    .to_ascii_lowercase(),
                file_name: doc.file_name,
            });
        };

        let failed = |reason: String| PipelineError::ExtractionFailed {
            file_name: doc.file_name.clone(),
            reason,
        };

        let pending = match kind {
            DocumentKind::Pdf => {
                let pages = pdf::page_texts(&doc.bytes).map_err(failed)?;
                debug!("Decoded {} PDF pages from {}", pages.len(), doc.file_name);
                Pending::Pages {
                    total: pages.len(),
                    pages: pages.into_iter(),
                    processed: 0,
                    reported_empty: false,
                }
            }
            DocumentKind::RichText => Pending::Whole {
                text: Some(docx::document_text(&doc.bytes).map_err(failed)?),
                started: false,
            },
            DocumentKind::PlainText => {
                let text = std::str::from_utf8(&doc.bytes)
                    .map_err(|e| failed(format!("invalid UTF-8: {e}")))?;
                Pending::Whole {
                    text: Some(text.trim_start_matches('\u{feff}').to_string()),
                    started: false,
                }
            }
        };

        Ok(Self {
            file_name: doc.file_name,
            pending,
            text: String::new(),
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Consumes any remaining progress and bounds the accumulated text.
    pub fn finish(mut self, max_chars: usize) -> ExtractedText {
        for _ in self.by_ref() {}
        let bounded = bound_text(&self.text, max_chars);
        if bounded.was_truncated() {
            debug!(
                "Truncated {} to {} characters",
                self.file_name, max_chars
            );
        }
        bounded
    }
}

impl Iterator for Extraction {
    type Item = ExtractionProgress;

    fn next(&mut self) -> Option<ExtractionProgress> {
        match &mut self.pending {
            Pending::Pages {
                pages,
                total,
                processed,
                reported_empty,
            } => {
                if *total == 0 {
                    if *reported_empty {
                        return None;
                    }
                    *reported_empty = true;
                    return Some(ExtractionProgress::of(0, 0));
                }
                let page = pages.next()?;
                if *processed > 0 {
                    self.text.push_str(PAGE_SEPARATOR);
                }
                self.text.push_str(&page);
                *processed += 1;
                Some(ExtractionProgress::of(*processed, *total))
            }
            Pending::Whole { text, started } => {
                if !*started {
                    *started = true;
                    return Some(ExtractionProgress::of(0, 1));
                }
                let whole = text.take()?;
                self.text = whole;
                Some(ExtractionProgress::of(1, 1))
            }
        }
    }
}

impl FusedIterator for Extraction {}

/// Extracts and bounds a document, discarding progress. The pipeline drives
/// `Extraction` directly to report progress.
#[cfg(test)]
pub fn extract(doc: SourceDocument, max_chars: usize) -> Result<ExtractedText, PipelineError> {
    Ok(Extraction::start(doc)?.finish(max_chars))
}
