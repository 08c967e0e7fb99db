//! # edgequake-pdfnotes
//!
//! Turn the structured content of a PDF into AI-generated study notes.
//!
//! An external extraction service turns the PDF into a ZIP archive holding a
//! JSON manifest of text blocks and figure references plus the rendered
//! figure and table images. This crate decodes that archive, orders its
//! content by vertical position, and asks LLMs for notes, either in one pass
//! over the text or incrementally, analysing figures with a vision model
//! batch by batch and folding each batch's descriptions into the draft.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Stage      scoped temp dir per invocation
//!  ├─ 2. Extract    external service → ZIP archive
//!  ├─ 3. Decode     manifest elements + figure/table assets
//!  ├─ 4. Normalize  stable position sort, [Figure N] slots
//!  ├─ 5. Generate   single pass  │ incremental (draft → batches of figures)
//!  └─ 6. Output     elements + figures + notes + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfnotes::{extract_document, NotesConfig, NotesGenerator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / GEMINI_API_KEY / ANTHROPIC_API_KEY
//!     let config = NotesConfig::default();
//!     let generator = NotesGenerator::from_config(&config)?;
//!
//!     let archive = std::fs::read("extracted.zip")?;
//!     let doc = extract_document(&archive)?;
//!     let notes = generator.generate(&doc, &CancellationToken::new()).await?;
//!     println!("{}", notes.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | actix-web HTTP surface ([`server`]) |
//! | `cli`    | on      | The `pdfnotes` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Library-only use:
//! ```toml
//! edgequake-pdfnotes = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod images;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionServiceConfig, GenerationMode, NotesConfig, NotesConfigBuilder};
pub use document::{
    ContentElement, ElementKind, ExtractedDocument, FigureAsset, ManifestElement, TableAsset,
};
pub use error::{FaultKind, FigureError, GenerationFailure, NotesError};
pub use extract::{ExtractionService, HttpExtractionService};
pub use images::{ImageStore, PublishedImage};
pub use output::{FigureAnalysis, Notes, NotesStats, PipelineOutput, ANALYSIS_FAILED};
pub use pipeline::analyze::FigureAnalyzer;
pub use pipeline::llm::{ModelError, ModelRequest, ModelSet, NotesModel};
pub use pipeline::notes::NotesGenerator;
pub use pipeline::queue::{AnalysisQueue, JobHandle};
pub use process::{extract_document, Pipeline};
pub use progress::{NoopProgressCallback, NotesProgressCallback, ProgressCallback};
pub use stream::{analyze_stream, AnalysisStream};
