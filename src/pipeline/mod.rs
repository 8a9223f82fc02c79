//! Per-document pipeline stages.
//!
//! ```text
//! input ──▶ extract ──────────────────────────▶ (enrich) ──▶ (serialize)
//! (checks)   parse → OCR → layout → pictures
//! ```
//!
//! 1. [`input`]   : validate the path and read the file facts
//! 2. [`extract`] : the PageExtractor; backend calls run in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`layout`]  : text runs / plain text / VLM Markdown → blocks
//! 4. [`encode`]  : PNG and base64 helpers

pub mod encode;
pub mod extract;
pub mod input;
pub mod layout;

use crate::error::ExtractionError;

/// Run blocking backend work off the async runtime.
///
/// A panic inside `f` is resumed on the calling task so the processor's
/// panic boundary sees it.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ExtractionError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(ExtractionError::Cancelled),
    }
}
