//! Figure analysis: one figure's bytes → a short description.
//!
//! Never fails. Any decode, encode, or model error is logged, recorded as a
//! [`FigureError`], and replaced by the [`ANALYSIS_FAILED`] sentinel so one
//! bad figure cannot abort a batch or the notes. The generator's own
//! fallback chain is separate and does not apply here.
//!
//! Thumbnailing is CPU-bound and runs in `spawn_blocking`.

use crate::config::NotesConfig;
use crate::document::FigureAsset;
use crate::error::FigureError;
use crate::output::{FigureAnalysis, ANALYSIS_FAILED};
use crate::pipeline::encode::encode_figure;
use crate::pipeline::llm::{ModelRequest, NotesModel};
use crate::prompts::FIGURE_ANALYSIS_PROMPT;
use std::sync::Arc;
use tracing::{debug, warn};

/// Describes figures with a vision-capable model.
#[derive(Clone)]
pub struct FigureAnalyzer {
    model: Arc<dyn NotesModel>,
    max_px: u32,
    quality: u8,
}

impl FigureAnalyzer {
    pub fn new(model: Arc<dyn NotesModel>, config: &NotesConfig) -> Self {
        Self {
            model,
            max_px: config.thumbnail_max_px,
            quality: config.jpeg_quality,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Describe raw image bytes; returns [`ANALYSIS_FAILED`] on any failure.
    pub async fn analyze(&self, figure_bytes: &[u8]) -> String {
        match self.try_analyze(0, figure_bytes.to_vec()).await {
            Ok(description) => description,
            Err(e) => {
                warn!("{}", e);
                ANALYSIS_FAILED.to_string()
            }
        }
    }

    /// Describe figure `index` (1-based discovery index).
    pub async fn analyze_figure(&self, index: usize, figure: &FigureAsset) -> FigureAnalysis {
        match self.try_analyze(index, figure.data.clone()).await {
            Ok(description) => {
                debug!("Figure {} ({}): {} chars", index, figure.name, description.len());
                FigureAnalysis {
                    index,
                    name: figure.name.clone(),
                    description,
                    error: None,
                }
            }
            Err(e) => {
                warn!("{}; using sentinel description", e);
                FigureAnalysis::failed(index, figure.name.clone(), e)
            }
        }
    }

    async fn try_analyze(&self, index: usize, bytes: Vec<u8>) -> Result<String, FigureError> {
        let (max_px, quality) = (self.max_px, self.quality);
        let image = tokio::task::spawn_blocking(move || encode_figure(&bytes, max_px, quality))
            .await
            .map_err(|e| FigureError::Decode {
                index,
                detail: format!("encode task panicked: {e}"),
            })?
            .map_err(|e| FigureError::Decode {
                index,
                detail: e.to_string(),
            })?;

        let request = ModelRequest::with_image(FIGURE_ANALYSIS_PROMPT, image);
        self.model
            .generate(&request)
            .await
            .map_err(|e| FigureError::Model {
                index,
                detail: e.to_string(),
            })
    }
}
