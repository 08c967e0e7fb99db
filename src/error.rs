//! Error types for the edgequake-pdfnotes library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`NotesError`] — **Fatal**: the invocation cannot produce notes at all
//!   (corrupt archive, invalid manifest, both models down). Returned as
//!   `Err(NotesError)` from every public entry point.
//!
//! * [`FigureError`] — **Non-fatal**: a single figure could not be analysed.
//!   Stored inside [`crate::output::FigureAnalysis`] next to the sentinel
//!   description so the rest of the batch and the notes still go through.
//!
//! Callers branch on [`NotesError::kind`], a serialisable tag, rather than on
//! message text. The HTTP layer forwards that tag in every error body.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdfnotes library.
#[derive(Debug, Error)]
pub enum NotesError {
    // ── Extraction payload errors ─────────────────────────────────────────
    /// The extraction archive is unreadable or corrupt.
    #[error("Extraction archive is unreadable: {detail}")]
    Archive { detail: String },

    /// The manifest is missing, is not valid JSON, or lacks required fields.
    #[error("Extraction manifest is invalid: {detail}")]
    Parse { detail: String },

    /// An element failed validation (unknown kind, non-finite position, …).
    #[error("Invalid content element: {detail}")]
    Validation { detail: String },

    // ── Generation errors ─────────────────────────────────────────────────
    /// Notes could not be generated.
    #[error(transparent)]
    Generation(#[from] GenerationFailure),

    /// The external extraction service failed or returned nothing usable.
    #[error("Extraction service failed: {detail}")]
    Extraction { detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The uploaded or loaded bytes are not a PDF.
    #[error("'{name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: Vec<u8> },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Runtime errors ────────────────────────────────────────────────────
    /// The caller cancelled the invocation.
    #[error("Notes generation was cancelled")]
    Cancelled,

    /// Filesystem failure while staging temporary files.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotesError {
    /// The tag callers should match on.
    pub fn kind(&self) -> FaultKind {
        match self {
            NotesError::Archive { .. } => FaultKind::Archive,
            NotesError::Parse { .. } => FaultKind::Parse,
            NotesError::Validation { .. } => FaultKind::Validation,
            NotesError::Generation(_) => FaultKind::Generation,
            NotesError::Extraction { .. } => FaultKind::Extraction,
            NotesError::FileNotFound { .. }
            | NotesError::PermissionDenied { .. }
            | NotesError::NotAPdf { .. }
            | NotesError::DownloadFailed { .. }
            | NotesError::DownloadTimeout { .. } => FaultKind::Input,
            NotesError::ProviderNotConfigured { .. } | NotesError::InvalidConfig(_) => {
                FaultKind::Config
            }
            NotesError::Cancelled => FaultKind::Cancelled,
            NotesError::Io { .. } | NotesError::Internal(_) => FaultKind::Internal,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        NotesError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Structured kind tag carried by every [`NotesError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Archive,
    Parse,
    Validation,
    Generation,
    Extraction,
    Input,
    Config,
    Cancelled,
    Internal,
}

/// Why notes generation failed.
///
/// The `Display` text keeps the user-facing "Error generating notes: …"
/// wording; the variant is what callers inspect.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GenerationFailure {
    /// The element list was empty; no model was called.
    #[error("Error generating notes: No content found in the extracted data")]
    NoContent,

    /// Primary model failed and the single fallback attempt failed too.
    #[error(
        "Error generating notes: {fallback_error}. Please try again later. \
         (primary model '{primary}' failed first: {primary_error})"
    )]
    ModelsExhausted {
        primary: String,
        primary_error: String,
        fallback: String,
        fallback_error: String,
    },

    /// A model call inside the incremental pipeline failed.
    #[error("Error generating notes: {stage} call to model '{model}' failed: {detail}")]
    ModelFailed {
        stage: String,
        model: String,
        detail: String,
    },
}

/// A non-fatal error for a single figure.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum FigureError {
    /// The bytes could not be decoded or re-encoded as an image.
    #[error("Figure {index}: image could not be decoded: {detail}")]
    Decode { index: usize, detail: String },

    /// The vision model call failed.
    #[error("Figure {index}: vision model failed: {detail}")]
    Model { index: usize, detail: String },

    /// The queue shut down before the job ran.
    #[error("Figure {index}: analysis job was dropped before completion")]
    Dropped { index: usize },
}
