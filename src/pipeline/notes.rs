//! Notes generation: normalized elements (+ figures) → summary text.
//!
//! Two strategies, selected per call:
//!
//! * **Single pass**: text elements joined with `\n`, cut to
//!   `max_input_chars` characters, one call to the primary model, at most one
//!   retry of the *identical* prompt against the fallback model.
//! * **Incremental**: the full text produces a draft with `[Figure K]`
//!   placeholders; figures are then analysed in fixed-size batches
//!   (discovery order) and after each batch the model rewrites the draft.
//!   Batches run one after another; the analyses inside a batch run
//!   concurrently and the batch waits for all of them.
//!
//! Both strategies return `Result<Notes, NotesError>`; failures are never
//! folded into the notes text. Every model call and every batch barrier
//! races the caller's [`CancellationToken`].

use crate::config::{GenerationMode, NotesConfig};
use crate::document::{ExtractedDocument, FigureAsset};
use crate::error::{GenerationFailure, NotesError};
use crate::output::{FigureAnalysis, Notes, NotesStats};
use crate::pipeline::analyze::FigureAnalyzer;
use crate::pipeline::llm::{ModelError, ModelRequest, ModelSet, NotesModel};
use crate::pipeline::queue::AnalysisQueue;
use crate::progress::ProgressCallback;
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[Figure (\d+)\]").unwrap());

/// Generates notes with injected models.
pub struct NotesGenerator {
    models: ModelSet,
    analyzer: FigureAnalyzer,
    mode: GenerationMode,
    max_input_chars: usize,
    batch_size: usize,
    use_queue: bool,
    queue_workers: usize,
    queue: OnceCell<Arc<AnalysisQueue>>,
    progress: Option<ProgressCallback>,
}

impl NotesGenerator {
    pub fn new(models: ModelSet, config: &NotesConfig) -> Self {
        let analyzer = FigureAnalyzer::new(Arc::clone(&models.vision), config);
        Self {
            models,
            analyzer,
            mode: config.mode,
            max_input_chars: config.max_input_chars,
            batch_size: config.batch_size.max(1),
            use_queue: config.use_queue,
            queue_workers: config.queue_workers,
            queue: OnceCell::new(),
            progress: config.progress_callback.clone(),
        }
    }

    /// Resolve models from `config` and build a generator.
    pub fn from_config(config: &NotesConfig) -> Result<Self, NotesError> {
        Ok(Self::new(ModelSet::resolve(config)?, config))
    }

    /// Route incremental-mode analyses through an existing queue.
    pub fn with_queue(mut self, queue: Arc<AnalysisQueue>) -> Self {
        self.use_queue = true;
        self.queue = OnceCell::new_with(Some(queue));
        self
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn analyzer(&self) -> &FigureAnalyzer {
        &self.analyzer
    }

    /// Generate with the configured mode.
    pub async fn generate(
        &self,
        doc: &ExtractedDocument,
        cancel: &CancellationToken,
    ) -> Result<Notes, NotesError> {
        self.generate_with_mode(self.mode, doc, cancel).await
    }

    pub async fn generate_with_mode(
        &self,
        mode: GenerationMode,
        doc: &ExtractedDocument,
        cancel: &CancellationToken,
    ) -> Result<Notes, NotesError> {
        match mode {
            GenerationMode::SinglePass => self.generate_single_pass(doc, cancel).await,
            GenerationMode::Incremental => self.generate_incremental(doc, cancel).await,
        }
    }

    /// Single pass with one fallback attempt.
    ///
    /// # Errors
    /// * [`GenerationFailure::NoContent`] when `doc.elements` is empty; no
    ///   model is called.
    /// * [`GenerationFailure::ModelsExhausted`] when primary and fallback
    ///   both fail.
    /// * [`NotesError::Cancelled`].
    pub async fn generate_single_pass(
        &self,
        doc: &ExtractedDocument,
        cancel: &CancellationToken,
    ) -> Result<Notes, NotesError> {
        let start = Instant::now();
        if doc.elements.is_empty() {
            return Err(GenerationFailure::NoContent.into());
        }

        let text = doc.text_content();
        let input_chars = text.chars().count();
        let truncated = truncate_chars(&text, self.max_input_chars);
        let prompt = prompts::single_pass_prompt(truncated, doc.figures.len());
        debug!(
            "Single pass: {} chars of text ({} sent), {} figures",
            input_chars,
            truncated.chars().count(),
            doc.figures.len()
        );

        if let Some(ref cb) = self.progress {
            cb.on_generation_start(doc.figures.len(), 0);
        }

        let mut stats = NotesStats {
            mode: GenerationMode::SinglePass,
            input_chars,
            truncated: input_chars > self.max_input_chars,
            ..Default::default()
        };

        let request = ModelRequest::text(prompt);
        stats.model_calls += 1;
        let text = match call_model(&self.models.primary, &request, cancel).await? {
            Ok(text) => {
                stats.model = self.models.primary.name().to_string();
                text
            }
            Err(primary_err) => {
                warn!(
                    "Primary model '{}' failed ({}), falling back to '{}'",
                    self.models.primary.name(),
                    primary_err,
                    self.models.fallback.name()
                );
                stats.model_calls += 1;
                stats.fallback_used = true;
                match call_model(&self.models.fallback, &request, cancel).await? {
                    Ok(text) => {
                        stats.model = self.models.fallback.name().to_string();
                        text
                    }
                    Err(fallback_err) => {
                        return Err(GenerationFailure::ModelsExhausted {
                            primary: self.models.primary.name().to_string(),
                            primary_error: primary_err.to_string(),
                            fallback: self.models.fallback.name().to_string(),
                            fallback_error: fallback_err.to_string(),
                        }
                        .into());
                    }
                }
            }
        };

        stats.duration_ms = start.elapsed().as_millis() as u64;
        if let Some(ref cb) = self.progress {
            cb.on_generation_complete(text.len());
        }
        info!(
            "Notes generated by '{}' in {}ms ({} chars)",
            stats.model,
            stats.duration_ms,
            text.len()
        );
        Ok(Notes { text, stats })
    }

    /// Draft with placeholders, then one rewrite per figure batch.
    ///
    /// # Errors
    /// * [`GenerationFailure::NoContent`] when the document has neither
    ///   elements nor figures.
    /// * [`GenerationFailure::ModelFailed`] on the first failing draft or
    ///   rewrite call. There is no fallback in this mode.
    /// * [`NotesError::Cancelled`].
    pub async fn generate_incremental(
        &self,
        doc: &ExtractedDocument,
        cancel: &CancellationToken,
    ) -> Result<Notes, NotesError> {
        let start = Instant::now();
        if doc.elements.is_empty() && doc.figures.is_empty() {
            return Err(GenerationFailure::NoContent.into());
        }

        let text = doc.text_content();
        let batches: Vec<_> = doc.figures.chunks(self.batch_size).collect();
        let total_batches = batches.len();
        let model = &self.models.primary;

        let mut stats = NotesStats {
            mode: GenerationMode::Incremental,
            model: model.name().to_string(),
            input_chars: text.chars().count(),
            batches: total_batches,
            ..Default::default()
        };

        if let Some(ref cb) = self.progress {
            cb.on_generation_start(doc.figures.len(), total_batches);
        }
        info!(
            "Incremental notes: {} figures in {} batches of ≤{}",
            doc.figures.len(),
            total_batches,
            self.batch_size
        );

        let prompt = prompts::initial_draft_prompt(&text, doc.figures.len(), doc.tables.len());
        stats.model_calls += 1;
        let mut draft = call_model(model, &ModelRequest::text(prompt), cancel)
            .await?
            .map_err(|e| model_failed("initial draft", model.as_ref(), e))?;
        if let Some(ref cb) = self.progress {
            cb.on_draft_ready(draft.len());
        }

        for (b, batch) in batches.into_iter().enumerate() {
            let batch_num = b + 1;
            // 1-based global index of the batch's first figure.
            let first_index = b * self.batch_size + 1;
            if let Some(ref cb) = self.progress {
                cb.on_batch_start(batch_num, total_batches);
            }

            let indexed = batch
                .iter()
                .enumerate()
                .map(|(i, fig)| (first_index + i, fig.clone()));
            let analyses = cancellable(cancel, self.analyze_batch(indexed)).await??;

            stats.figures_analyzed += analyses.len();
            stats.figure_failures += analyses.iter().filter(|a| !a.is_ok()).count();

            let labeled: Vec<(usize, &str)> = analyses
                .iter()
                .map(|a| (a.index, a.description.as_str()))
                .collect();
            let prompt = prompts::update_prompt(&draft, &labeled);
            stats.model_calls += 1;
            draft = call_model(model, &ModelRequest::text(prompt), cancel)
                .await?
                .map_err(|e| model_failed(&format!("batch {batch_num} update"), model.as_ref(), e))?;

            debug!(
                "Batch {}/{}: {} figures merged, draft now {} chars",
                batch_num,
                total_batches,
                analyses.len(),
                draft.len()
            );
            if let Some(ref cb) = self.progress {
                cb.on_batch_complete(batch_num, total_batches);
            }
        }

        stats.unresolved_placeholders = unresolved_placeholders(&draft);
        if !stats.unresolved_placeholders.is_empty() {
            warn!(
                "Final notes still contain placeholders for figures {:?}",
                stats.unresolved_placeholders
            );
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        if let Some(ref cb) = self.progress {
            cb.on_generation_complete(draft.len());
        }
        info!(
            "Incremental notes done: {} model calls, {} figure failures, {}ms",
            stats.model_calls, stats.figure_failures, stats.duration_ms
        );
        Ok(Notes { text: draft, stats })
    }

    /// Analyse one batch and wait for every figure. Results keep input order.
    async fn analyze_batch<I>(&self, figures: I) -> Result<Vec<FigureAnalysis>, NotesError>
    where
        I: Iterator<Item = (usize, FigureAsset)>,
    {
        if self.use_queue {
            let queue = self
                .queue
                .get_or_init(|| async {
                    Arc::new(AnalysisQueue::new(self.analyzer.clone(), self.queue_workers))
                })
                .await;
            let handles = queue.submit_batch(figures)?;
            let results = AnalysisQueue::join_all(handles).await;
            if let Some(ref cb) = self.progress {
                for r in &results {
                    cb.on_figure_analyzed(r.index, r.is_ok());
                }
            }
            return Ok(results);
        }

        let tasks = figures.map(|(index, figure)| async move {
            let result = self.analyzer.analyze_figure(index, &figure).await;
            if let Some(ref cb) = self.progress {
                cb.on_figure_analyzed(index, result.is_ok());
            }
            result
        });
        Ok(futures::future::join_all(tasks).await)
    }
}

/// Await `fut` unless `cancel` fires first.
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, NotesError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NotesError::Cancelled),
        out = fut => Ok(out),
    }
}

/// One model call. The outer `Result` is cancellation, the inner one the
/// model's own outcome.
async fn call_model(
    model: &Arc<dyn NotesModel>,
    request: &ModelRequest,
    cancel: &CancellationToken,
) -> Result<Result<String, ModelError>, NotesError> {
    cancellable(cancel, model.generate(request)).await
}

fn model_failed(stage: &str, model: &dyn NotesModel, err: ModelError) -> NotesError {
    GenerationFailure::ModelFailed {
        stage: stage.to_string(),
        model: model.name().to_string(),
        detail: err.to_string(),
    }
    .into()
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Distinct `[Figure K]` indices still present in `notes`, ascending.
pub fn unresolved_placeholders(notes: &str) -> Vec<usize> {
    RE_PLACEHOLDER
        .captures_iter(notes)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
