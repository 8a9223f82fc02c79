//! End-to-end tests for edgequake-pdfbatch.
//!
//! These use real PDF files in `./test_cases/` and the real pdfium backend.
//! They are gated behind the `E2E_ENABLED` environment variable so they do
//! not run in CI unless explicitly requested. The OCR test also needs the
//! `tesseract` binary.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_batch_over_test_cases -- --nocapture

use edgequake_pdfbatch::batch::report::REPORT_FILE_NAME;
use edgequake_pdfbatch::{
    process_document, BatchOptions, BatchOrchestrator, DocumentConfig, ImageExportMode,
    OcrEngineKind, OutputTarget, PageSeparator, PdfBackend, ProcessorFactory,
};
use std::path::PathBuf;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Basic quality checks on rendered Markdown.
fn assert_markdown_quality(md: &str, context: &str) {
    assert!(!md.trim().is_empty(), "[{context}] Markdown is empty");
    assert!(md.ends_with('\n'), "[{context}] Markdown must end with a newline");
    assert!(
        !md.contains("\n\n\n\n"),
        "[{context}] Output has more than 3 consecutive blank lines"
    );
    for ch in ['\u{200B}', '\u{FEFF}', '\u{0000}'] {
        assert!(
            !md.contains(ch),
            "[{context}] Output contains invisible char U+{:04X}",
            ch as u32
        );
    }
    println!("[{context}] ✓  {} bytes, quality checks passed", md.len());
}

fn tesseract_available() -> bool {
    let cmd = std::env::var("TESSERACT_CMD").unwrap_or_else(|_| "tesseract".into());
    std::process::Command::new(cmd)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// ── Single documents ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_arxiv_paper_text_layer() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = DocumentConfig::builder()
        .max_pages(Some(3))
        .image_export_mode(ImageExportMode::Placeholder)
        .page_separator(PageSeparator::Comment)
        .build()
        .expect("valid config");
    let result = process_document(&path, &config)
        .await
        .expect("pdfium should be available");

    assert!(result.success(), "{:?}", result.error_message());
    assert_eq!(result.metadata().num_pages, 3);
    assert_eq!(result.metadata().total_pages, 15);
    assert_eq!(result.metadata().confidence_score, 1.0);
    assert!(result.content().contains("<!-- page 2 -->"));
    assert!(result.content().contains("Attention"));
    assert_markdown_quality(result.content(), "arxiv");

    let json: serde_json::Value = serde_json::from_str(result.json_content()).unwrap();
    assert_eq!(json["num_pages"], 3);
    assert!(!json["body"].as_array().unwrap().is_empty());

    std::fs::write(output_dir().join("arxiv_first3.md"), result.content()).unwrap();
}

#[tokio::test]
async fn test_pdfium_text_backend() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = DocumentConfig::builder()
        .pdf_backend(PdfBackend::PdfiumText)
        .max_pages(Some(1))
        .build()
        .unwrap();
    let result = process_document(&path, &config).await.unwrap();
    assert!(result.success(), "{:?}", result.error_message());
    assert_markdown_quality(result.content(), "pdfium_text");
}

#[tokio::test]
async fn test_irs_form_metadata() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));

    let result = process_document(&path, &DocumentConfig::default())
        .await
        .unwrap();
    assert!(result.success(), "{:?}", result.error_message());
    let meta = result.metadata();
    assert_eq!(meta.num_pages, 2);
    assert!(meta
        .document_metadata
        .title
        .as_deref()
        .unwrap_or("")
        .contains("1040"));
}

#[tokio::test]
async fn test_process_bytes_matches_process() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));

    let processor = ProcessorFactory::new()
        .create_with_defaults()
        .expect("pdfium should be available");
    let from_path = processor.process(&path).await;
    let bytes = std::fs::read(&path).unwrap();
    let from_bytes = processor.process_bytes(&bytes, "irs_form_1040.pdf").await;

    assert!(from_bytes.success());
    assert_eq!(from_path.content(), from_bytes.content());
    assert_eq!(from_bytes.file_path(), "irs_form_1040.pdf");
}

#[tokio::test]
async fn test_scanned_page_with_tesseract() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("scanned_letter.pdf"));
    if !tesseract_available() {
        println!("SKIP: tesseract not installed");
        return;
    }

    let config = DocumentConfig::builder()
        .ocr_enabled(true)
        .ocr_engine(OcrEngineKind::Tesseract)
        .build()
        .unwrap();
    let result = process_document(&path, &config).await.unwrap();
    assert!(result.success(), "{:?}", result.error_message());
    assert!(result.metadata().confidence_score > 0.0);
    assert_markdown_quality(result.content(), "tesseract");
}

#[tokio::test]
async fn test_nonexistent_file_is_a_failed_result() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP");
        return;
    }
    let result = process_document("/definitely/not/a/real/file.pdf", &DocumentConfig::default())
        .await
        .unwrap();
    assert!(!result.success());
    assert!(result
        .error_message()
        .unwrap_or_default()
        .starts_with("loading failed"));
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_over_test_cases() {
    let dir = e2e_skip_unless_ready!(test_cases_dir());
    let out = TempDir::new().unwrap();

    let config = DocumentConfig::builder()
        .max_pages(Some(2))
        .timeout_per_document(120)
        .build()
        .unwrap();
    let options = BatchOptions::new(&dir, OutputTarget::Directory(out.path().into())).workers(2);
    let report = BatchOrchestrator::new(config, options)
        .run()
        .await
        .expect("batch should run");

    let pdfs = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|x| x.eq_ignore_ascii_case("pdf"))
        })
        .count();
    assert_eq!(report.len(), pdfs);
    for r in report.iter() {
        if r.success() {
            assert_markdown_quality(r.content(), r.file_path());
        } else {
            println!("✗ {}: {:?}", r.file_path(), r.error_message());
        }
    }

    let lines = std::fs::read_to_string(out.path().join(REPORT_FILE_NAME)).unwrap();
    assert_eq!(lines.lines().count(), pdfs);
}
