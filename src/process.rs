//! Pipeline orchestration: uploaded PDF → elements, figures, and notes.
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Stage     per-invocation TempDir (stem + UUID)
//!  ├─ 2. Extract   external service → archive in the same TempDir
//!  ├─ 3. Decode    ZIP → manifest elements + figure/table assets
//!  ├─ 4. Normalize stable position sort, figure slots
//!  ├─ 5. Generate  notes (configured mode), direct call
//!  └─ 6. Cleanup   TempDir removed on every exit path
//! ```
//!
//! The result is all-or-nothing: a generation failure fails the invocation
//! even though elements and figures were extracted.

use crate::config::{GenerationMode, NotesConfig};
use crate::document::ExtractedDocument;
use crate::error::NotesError;
use crate::extract::{ExtractionService, HttpExtractionService};
use crate::output::PipelineOutput;
use crate::pipeline::input::{check_pdf_magic, StagedUpload};
use crate::pipeline::notes::NotesGenerator;
use crate::pipeline::{archive, normalize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decode and normalize an extraction archive into a generator-ready
/// document. Pure and synchronous; no model is involved.
pub fn extract_document(archive_bytes: &[u8]) -> Result<ExtractedDocument, NotesError> {
    let decoded = archive::decode(archive_bytes)?;
    let elements = normalize::normalize(decoded.elements)?;
    Ok(ExtractedDocument {
        elements,
        figures: decoded.figures,
        tables: decoded.tables,
    })
}

/// The end-to-end pipeline with its collaborators injected.
pub struct Pipeline {
    generator: Arc<NotesGenerator>,
    extraction: Option<Arc<dyn ExtractionService>>,
    temp_root: PathBuf,
}

impl Pipeline {
    pub fn new(
        generator: Arc<NotesGenerator>,
        extraction: Option<Arc<dyn ExtractionService>>,
        config: &NotesConfig,
    ) -> Self {
        Self {
            generator,
            extraction,
            temp_root: config.temp_root(),
        }
    }

    /// Resolve models and, when a base URL is configured, the HTTP
    /// extraction client.
    pub fn from_config(config: &NotesConfig) -> Result<Self, NotesError> {
        let generator = Arc::new(NotesGenerator::from_config(config)?);
        let extraction: Option<Arc<dyn ExtractionService>> = match config.extraction.base_url {
            Some(_) => Some(Arc::new(HttpExtractionService::new(&config.extraction)?)),
            None => None,
        };
        Ok(Self::new(generator, extraction, config))
    }

    pub fn generator(&self) -> &Arc<NotesGenerator> {
        &self.generator
    }

    pub fn has_extraction(&self) -> bool {
        self.extraction.is_some()
    }

    /// Run the full pipeline on an uploaded PDF.
    ///
    /// # Errors
    /// Any [`NotesError`]; see [`NotesError::kind`] for the category.
    pub async fn run(
        &self,
        pdf_bytes: &[u8],
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, NotesError> {
        let start = Instant::now();
        info!("Processing upload '{}' ({} bytes)", file_name, pdf_bytes.len());

        let extraction = self.extraction.as_ref().ok_or_else(|| {
            NotesError::InvalidConfig(
                "no extraction service configured (set PDF_SERVICES_BASE_URL)".to_string(),
            )
        })?;
        check_pdf_magic(file_name, pdf_bytes)?;

        // ── Step 1: Stage ────────────────────────────────────────────────
        let staged = StagedUpload::stage(pdf_bytes, file_name, &self.temp_root).await?;

        // ── Step 2: Extract ──────────────────────────────────────────────
        let archive_path = staged.archive_path();
        extraction
            .extract(staged.pdf_path(), &archive_path, cancel)
            .await?;
        let archive_bytes = tokio::fs::read(&archive_path)
            .await
            .map_err(|e| NotesError::io("Failed to read extraction archive", e))?;
        debug!("Extraction archive: {} bytes", archive_bytes.len());

        // ── Steps 3–5 ────────────────────────────────────────────────────
        let output = self.run_archive(&archive_bytes, cancel).await;

        // ── Step 6: Cleanup ──────────────────────────────────────────────
        let dir = staged.dir().to_path_buf();
        if let Err(e) = staged.cleanup() {
            warn!("Temp dir {} not fully removed: {}", dir.display(), e);
        }

        let output = output?;
        info!(
            "Upload '{}' processed in {}ms",
            file_name,
            start.elapsed().as_millis()
        );
        Ok(output)
    }

    /// Decode, normalize, and generate from an archive already in memory,
    /// with the configured generation mode.
    pub async fn run_archive(
        &self,
        archive_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, NotesError> {
        self.run_archive_with_mode(self.generator.mode(), archive_bytes, cancel)
            .await
    }

    pub async fn run_archive_with_mode(
        &self,
        mode: GenerationMode,
        archive_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, NotesError> {
        let doc = extract_document(archive_bytes)?;
        info!(
            "Archive decoded: {} elements, {} figures, {} tables",
            doc.elements.len(),
            doc.figures.len(),
            doc.tables.len()
        );

        let notes = self.generator.generate_with_mode(mode, &doc, cancel).await?;
        Ok(PipelineOutput {
            elements: doc.elements,
            figures: doc.figures,
            notes: notes.text,
            stats: notes.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ElementKind;
    use crate::error::{FaultKind, GenerationFailure};
    use crate::pipeline::llm::scripted::ScriptedModel;
    use crate::pipeline::llm::ModelSet;
    use async_trait::async_trait;
    use std::io::{Cursor, Write};
    use std::path::Path;
    use std::sync::Mutex;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn example_archive() -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        zip.start_file("structuredData.json", opts).unwrap();
        zip.write_all(
            br#"{"elements":[{"Text":"Intro","Bounds":[10]},{"Path":"//Document/Figure/fig1","Bounds":[5]}]}"#,
        )
        .unwrap();
        zip.start_file("figures/fig1", opts).unwrap();
        zip.write_all(b"figure-bytes").unwrap();
        zip.finish().unwrap().into_inner()
    }

    /// Writes a fixed archive and remembers the directories it was given.
    struct CannedExtraction {
        archive: Vec<u8>,
        seen_dirs: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl ExtractionService for CannedExtraction {
        async fn extract(
            &self,
            pdf: &Path,
            archive_out: &Path,
            _cancel: &CancellationToken,
        ) -> Result<(), NotesError> {
            assert!(pdf.exists());
            self.seen_dirs
                .lock()
                .unwrap()
                .push(archive_out.parent().unwrap().to_path_buf());
            tokio::fs::write(archive_out, &self.archive).await.unwrap();
            Ok(())
        }
    }

    fn pipeline(
        primary: Arc<ScriptedModel>,
        extraction: Arc<CannedExtraction>,
        root: &Path,
    ) -> Pipeline {
        let config = NotesConfig::builder().temp_root(root).build().unwrap();
        let models = ModelSet {
            primary,
            fallback: ScriptedModel::failing("f", "down"),
            vision: ScriptedModel::replying("v", "x"),
        };
        Pipeline::new(
            Arc::new(NotesGenerator::new(models, &config)),
            Some(extraction),
            &config,
        )
    }

    #[tokio::test]
    async fn run_returns_sorted_elements_figures_and_notes() {
        let root = tempfile::tempdir().unwrap();
        let extraction = Arc::new(CannedExtraction {
            archive: example_archive(),
            seen_dirs: Mutex::new(Vec::new()),
        });
        let p = pipeline(ScriptedModel::replying("p", "Notes."), extraction.clone(), root.path());

        let out = p
            .run(b"%PDF-1.7 body", "paper.pdf", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.elements.len(), 2);
        assert_eq!(out.elements[0].kind, ElementKind::Figure);
        assert_eq!(out.elements[0].content, "[Figure 1]");
        assert_eq!(out.elements[0].position, 5.0);
        assert_eq!(out.elements[1].content, "Intro");
        assert_eq!(out.figures[0].name, "fig1");
        assert_eq!(out.notes, "Notes.");

        let dirs = extraction.seen_dirs.lock().unwrap().clone();
        assert!(!dirs[0].exists(), "temp dir must be removed");
    }

    #[tokio::test]
    async fn generation_failure_fails_invocation_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let extraction = Arc::new(CannedExtraction {
            archive: example_archive(),
            seen_dirs: Mutex::new(Vec::new()),
        });
        let p = pipeline(ScriptedModel::failing("p", "quota"), extraction.clone(), root.path());

        let err = p
            .run(b"%PDF-1.7", "paper.pdf", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Generation);
        assert!(matches!(
            err,
            NotesError::Generation(GenerationFailure::ModelsExhausted { .. })
        ));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn corrupt_archive_is_fatal_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let extraction = Arc::new(CannedExtraction {
            archive: b"not a zip".to_vec(),
            seen_dirs: Mutex::new(Vec::new()),
        });
        let primary = ScriptedModel::replying("p", "x");
        let p = pipeline(primary.clone(), extraction, root.path());

        let err = p
            .run(b"%PDF-1.7", "paper.pdf", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Archive);
        assert_eq!(primary.calls(), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn non_pdf_upload_is_rejected_before_staging() {
        let root = tempfile::tempdir().unwrap();
        let extraction = Arc::new(CannedExtraction {
            archive: example_archive(),
            seen_dirs: Mutex::new(Vec::new()),
        });
        let p = pipeline(ScriptedModel::replying("p", "x"), extraction.clone(), root.path());

        let err = p
            .run(b"GIF89a", "cat.gif", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Input);
        assert!(extraction.seen_dirs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_without_extraction_service_is_config_error() {
        let config = NotesConfig::default();
        let models = ModelSet {
            primary: ScriptedModel::replying("p", "x"),
            fallback: ScriptedModel::replying("f", "x"),
            vision: ScriptedModel::replying("v", "x"),
        };
        let p = Pipeline::new(Arc::new(NotesGenerator::new(models, &config)), None, &config);
        let err = p
            .run(b"%PDF-1.7", "a.pdf", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Config);
    }

    #[test]
    fn extract_document_matches_example() {
        let doc = extract_document(&example_archive()).unwrap();
        assert_eq!(doc.elements[0].figure_index, Some(1));
        assert_eq!(doc.elements[0].reading_rank, Some(1));
        assert_eq!(doc.text_content(), "Intro");
        assert_eq!(doc.figures[0].data, b"figure-bytes");
    }
}
