//! Input handling: load a PDF from a path or URL, and stage uploads on disk.
//!
//! The extraction service works from files, so every invocation gets its own
//! `TempDir` holding the uploaded PDF and the result archive. The directory
//! name combines the sanitised file stem with a UUID, so concurrent uploads
//! of the same file never share a path. Dropping [`StagedUpload`] removes
//! everything, on success, on error, and on panic.

use crate::error::NotesError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use uuid::Uuid;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// PDF bytes plus the name they came with.
#[derive(Debug, Clone)]
pub struct LoadedPdf {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// One invocation's scratch directory.
#[derive(Debug)]
pub struct StagedUpload {
    dir: TempDir,
    pdf_path: PathBuf,
    stem: String,
}

impl StagedUpload {
    /// Write `bytes` as `<stem>.pdf` inside a fresh temp dir under `root`.
    pub async fn stage(bytes: &[u8], file_name: &str, root: &Path) -> Result<Self, NotesError> {
        let stem = sanitize_stem(file_name);
        let prefix = format!("{}-{}-", stem, Uuid::new_v4().simple());
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(root)
            .map_err(|e| NotesError::io(format!("Failed to create temp dir in {}", root.display()), e))?;

        let pdf_path = dir.path().join(format!("{stem}.pdf"));
        tokio::fs::write(&pdf_path, bytes)
            .await
            .map_err(|e| NotesError::io("Failed to write uploaded PDF", e))?;

        debug!("Staged '{}' at {}", file_name, pdf_path.display());
        Ok(Self { dir, pdf_path, stem })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn pdf_path(&self) -> &Path {
        &self.pdf_path
    }

    /// Where the extraction result archive is written.
    pub fn archive_path(&self) -> PathBuf {
        self.dir.path().join(format!("{}-extracted.zip", self.stem))
    }

    /// Remove the directory now and report failures. Dropping does the same
    /// silently.
    pub fn cleanup(self) -> Result<(), NotesError> {
        self.dir
            .close()
            .map_err(|e| NotesError::io("Failed to remove temp dir", e))
    }
}

/// File stem reduced to `[A-Za-z0-9_-]`, at most 48 chars, never empty.
pub fn sanitize_stem(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => base,
    };
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(48)
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Reject bytes that do not start with `%PDF`.
pub fn check_pdf_magic(name: &str, bytes: &[u8]) -> Result<(), NotesError> {
    if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        return Err(NotesError::NotAPdf {
            name: name.to_string(),
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    Ok(())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a PDF from a local path or an HTTP(S) URL.
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<LoadedPdf, NotesError> {
    let loaded = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_pdf_magic(&loaded.file_name, &loaded.bytes)?;
    Ok(loaded)
}

async fn read_local(path_str: &str) -> Result<LoadedPdf, NotesError> {
    let path = PathBuf::from(path_str);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(NotesError::PermissionDenied { path });
        }
        Err(_) => return Err(NotesError::FileNotFound { path }),
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(LoadedPdf { file_name, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedPdf, NotesError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| NotesError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            NotesError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            NotesError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(NotesError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| NotesError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(LoadedPdf {
        file_name: filename_from_url(url),
        bytes: bytes.to_vec(),
    })
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn stem_is_sanitised() {
        assert_eq!(sanitize_stem("report.pdf"), "report");
        assert_eq!(sanitize_stem("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_stem("My Paper (final).v2.pdf"), "My_Paper__final__v2");
        assert_eq!(sanitize_stem(".pdf"), "upload");
        assert_eq!(sanitize_stem(""), "upload");
        assert_eq!(sanitize_stem(&"x".repeat(100)).len(), 48);
    }

    #[test]
    fn magic_bytes_are_checked() {
        assert!(check_pdf_magic("a.pdf", b"%PDF-1.7\n...").is_ok());
        let err = check_pdf_magic("a.pdf", b"PK\x03\x04").unwrap_err();
        assert!(matches!(err, NotesError::NotAPdf { ref magic, .. } if magic == b"PK\x03\x04"));
        assert!(check_pdf_magic("a.pdf", b"%P").is_err());
    }

    #[test]
    fn filename_comes_from_url_path() {
        assert_eq!(filename_from_url("https://x.org/papers/attention.pdf"), "attention.pdf");
        assert_eq!(filename_from_url("https://x.org/download"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn staged_upload_is_unique_and_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let a = StagedUpload::stage(b"%PDF-1.4", "paper.pdf", root.path()).await.unwrap();
        let b = StagedUpload::stage(b"%PDF-1.4", "paper.pdf", root.path()).await.unwrap();
        assert_ne!(a.dir(), b.dir());
        assert!(a.pdf_path().ends_with("paper.pdf"));
        assert_eq!(std::fs::read(a.pdf_path()).unwrap(), b"%PDF-1.4");
        assert!(a
            .dir()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("paper-"));

        let dir_a = a.dir().to_path_buf();
        drop(a);
        assert!(!dir_a.exists());
        b.cleanup().unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let err = load_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, NotesError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_non_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"hello").unwrap();
        let err = load_input(path.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, NotesError::NotAPdf { ref name, .. } if name == "fake.pdf"));
    }
}
