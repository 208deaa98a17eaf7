use std::panic::{self, AssertUnwindSafe};

/// Decodes a PDF into one string per page.
///
/// pdf-extract panics on some malformed inputs; those are reported as decode
/// failures like any other.
pub(super) fn page_texts(bytes: &[u8]) -> Result<Vec<String>, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    })) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(format!("PDF decode error: {e}")),
        Err(_) => Err("PDF decoder aborted on malformed content".to_string()),
    }
}
