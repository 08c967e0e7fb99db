//! Pipeline stages between the extraction archive and the finished notes.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ archive ──▶ normalize ──▶ notes ──▶ llm
//! (stage)   (ZIP+JSON)  (sort, slots)   │
//!                                       └─▶ analyze / queue ──▶ encode ──▶ llm
//! ```
//!
//! 1. [`input`]     — stage uploads in scoped temp dirs; load PDFs from paths or URLs
//! 2. [`archive`]   — read the manifest and the figure/table renditions
//! 3. [`normalize`] — stable position sort, `[Figure N]` slots, reading ranks
//! 4. [`notes`]     — single-pass and incremental generation
//! 5. [`analyze`]   — one vision call per figure, sentinel on failure
//! 6. [`queue`]     — the same analysis behind a worker pool with job handles
//! 7. [`encode`]    — thumbnail + JPEG re-encode for the vision request
//! 8. [`llm`]       — the `NotesModel` seam and its edgequake-llm adapter

pub mod analyze;
pub mod archive;
pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod notes;
pub mod queue;
