//! Loading: validate a path before any backend touches it.
//!
//! pdfium reports most malformed inputs as a generic load failure, and some
//! inputs (a truncated download, an HTML error page saved as `.pdf`) make it
//! do a lot of work first. Reading the header and the tail ourselves gives
//! callers a precise error for the common cases.

use crate::document::SourceFile;
use crate::error::ExtractionError;
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// The `%%EOF` marker must appear within this many trailing bytes.
const EOF_WINDOW: u64 = 1024;

/// Bytes of header scanned for `%PDF-x.y`.
const HEADER_LEN: usize = 16;

fn io_error(path: &Path, e: std::io::Error) -> ExtractionError {
    match e.kind() {
        ErrorKind::NotFound => ExtractionError::FileNotFound {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => ExtractionError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExtractionError::Io {
            path: path.to_path_buf(),
            detail: e.to_string(),
        },
    }
}

/// True when `path` has a `.pdf` extension, ignoring case.
pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Check that `path` is a readable, complete PDF and describe it.
///
/// Checks, in order: exists, regular file, `.pdf` extension, `%PDF-` magic,
/// header major version ≤ 2, `%%EOF` in the last 1 KiB.
pub async fn load_source(path: &Path) -> Result<SourceFile, ExtractionError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| io_error(path, e))?;
    if !meta.is_file() {
        return Err(ExtractionError::NotAFile {
            path: path.to_path_buf(),
        });
    }
    if !has_pdf_extension(path) {
        return Err(ExtractionError::UnsupportedExtension {
            path: path.to_path_buf(),
        });
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| io_error(path, e))?;

    let mut header = Vec::with_capacity(HEADER_LEN);
    (&mut file)
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .await
        .map_err(|e| io_error(path, e))?;
    if !header.starts_with(b"%PDF-") {
        return Err(ExtractionError::NotAPdf {
            path: path.to_path_buf(),
            magic: header.iter().take(8).copied().collect(),
        });
    }
    if let Some(version) = header_version(&header) {
        let major = version.split('.').next().and_then(|m| m.parse::<u32>().ok());
        if major.is_some_and(|m| m > 2) {
            return Err(ExtractionError::UnsupportedVersion {
                path: path.to_path_buf(),
                version,
            });
        }
    }

    let size = meta.len();
    let tail_start = size.saturating_sub(EOF_WINDOW);
    file.seek(SeekFrom::Start(tail_start))
        .await
        .map_err(|e| io_error(path, e))?;
    let mut tail = Vec::with_capacity((size - tail_start) as usize);
    file.read_to_end(&mut tail)
        .await
        .map_err(|e| io_error(path, e))?;
    if !contains(&tail, b"%%EOF") {
        return Err(ExtractionError::Truncated {
            path: path.to_path_buf(),
        });
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    debug!("Loaded {} ({} bytes)", path.display(), size);
    Ok(SourceFile {
        path: path.to_path_buf(),
        file_name,
        extension,
        output_stem: stem.clone(),
        stem,
        size,
    })
}

/// `x.y` from a `%PDF-x.y` header, if well formed.
fn header_version(header: &[u8]) -> Option<String> {
    let rest = header.strip_prefix(b"%PDF-")?;
    let version: String = rest
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| *b as char)
        .collect();
    (!version.is_empty()).then_some(version)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn accepts_minimal_pdf() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "Report.PDF", b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n%%EOF\n");
        let source = load_source(&path).await.unwrap();
        assert_eq!(source.file_name, "Report.PDF");
        assert_eq!(source.extension, ".PDF");
        assert_eq!(source.stem, "Report");
        assert_eq!(source.size, 35);
    }

    #[tokio::test]
    async fn missing_file() {
        let err = load_source(Path::new("/nonexistent/a.pdf")).await.unwrap_err();
        assert!(matches!(err, ExtractionError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn directory_is_not_a_file() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("nested.pdf");
        std::fs::create_dir(&sub).unwrap();
        let err = load_source(&sub).await.unwrap_err();
        assert!(matches!(err, ExtractionError::NotAFile { .. }));
    }

    #[tokio::test]
    async fn wrong_extension() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "notes.txt", b"%PDF-1.4\n%%EOF");
        let err = load_source(&path).await.unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedExtension { .. }));
    }

    #[tokio::test]
    async fn html_saved_as_pdf() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "page.pdf", b"<!DOCTYPE html><html></html>");
        match load_source(&path).await.unwrap_err() {
            ExtractionError::NotAPdf { magic, .. } => assert_eq!(magic, b"<!DOCTYP".to_vec()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_file() {
        let dir = TempDir::new().unwrap();
        let mut bytes = b"%PDF-1.5\n".to_vec();
        bytes.extend(std::iter::repeat(b'x').take(4096));
        let path = write(&dir, "cut.pdf", &bytes);
        let err = load_source(&path).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Truncated { .. }));
    }

    #[tokio::test]
    async fn future_major_version() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "new.pdf", b"%PDF-3.0\n%%EOF\n");
        match load_source(&path).await.unwrap_err() {
            ExtractionError::UnsupportedVersion { version, .. } => assert_eq!(version, "3.0"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn extension_check_ignores_case() {
        assert!(has_pdf_extension(Path::new("a/B.Pdf")));
        assert!(!has_pdf_extension(Path::new("a/b.pdf.bak")));
        assert!(!has_pdf_extension(Path::new("a/pdf")));
    }
}
