//! Result types returned by the notes generator and the orchestrator.

use crate::config::GenerationMode;
use crate::document::{ContentElement, FigureAsset};
use crate::error::FigureError;
use serde::{Deserialize, Serialize};

/// Description returned for a figure whose analysis failed.
pub const ANALYSIS_FAILED: &str = "Error analyzing image";

/// Outcome of analysing one figure.
///
/// `description` is always usable prompt text: on failure it holds
/// [`ANALYSIS_FAILED`] and `error` records why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureAnalysis {
    /// 1-based discovery index of the figure.
    pub index: usize,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FigureError>,
}

impl FigureAnalysis {
    pub fn failed(index: usize, name: impl Into<String>, error: FigureError) -> Self {
        Self {
            index,
            name: name.into(),
            description: ANALYSIS_FAILED.to_string(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Generated notes plus how they were produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notes {
    pub text: String,
    pub stats: NotesStats,
}

/// Bookkeeping for one generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotesStats {
    pub mode: GenerationMode,
    /// Model that produced the final text.
    pub model: String,
    /// Text-model calls, fallback included.
    pub model_calls: usize,
    pub fallback_used: bool,
    /// Characters of document text before truncation.
    pub input_chars: usize,
    pub truncated: bool,
    pub batches: usize,
    pub figures_analyzed: usize,
    pub figure_failures: usize,
    /// `[Figure K]` markers still present in the final draft.
    pub unresolved_placeholders: Vec<usize>,
    pub duration_ms: u64,
}

/// What a full pipeline invocation returns to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub elements: Vec<ContentElement>,
    pub figures: Vec<FigureAsset>,
    pub notes: String,
    pub stats: NotesStats,
}
