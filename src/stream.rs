//! Streaming figure analysis: emit descriptions as they complete.
//!
//! Useful for pre-analysing figures ahead of (or independently from) notes
//! generation, e.g. to fill an image gallery while the user waits. Unlike
//! the batch barrier inside incremental generation, [`analyze_stream`]
//! yields each [`FigureAnalysis`] as soon as its model call returns, so
//! items arrive in completion order (sort by `index` if order matters).

use crate::document::FigureAsset;
use crate::output::FigureAnalysis;
use crate::pipeline::analyze::FigureAnalyzer;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A boxed stream of figure analyses.
pub type AnalysisStream = Pin<Box<dyn Stream<Item = FigureAnalysis> + Send>>;

/// Analyse `figures` with at most `concurrency` calls in flight.
///
/// Figure `i` of the input is reported with index `i + 1`. The stream ends
/// early, without further items, once `cancel` fires.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdfnotes::{analyze_stream, FigureAnalyzer};
/// use futures::StreamExt;
/// # async fn demo(analyzer: FigureAnalyzer, figures: Vec<edgequake_pdfnotes::FigureAsset>) {
/// let cancel = tokio_util::sync::CancellationToken::new();
/// let mut stream = analyze_stream(analyzer, figures, 4, cancel);
/// while let Some(a) = stream.next().await {
///     println!("Figure {}: {}", a.index, a.description);
/// }
/// # }
/// ```
pub fn analyze_stream(
    analyzer: FigureAnalyzer,
    figures: Vec<FigureAsset>,
    concurrency: usize,
    cancel: CancellationToken,
) -> AnalysisStream {
    info!(
        "Streaming analysis of {} figures ({} concurrent)",
        figures.len(),
        concurrency.max(1)
    );

    let s = stream::iter(figures.into_iter().enumerate().map(move |(i, figure)| {
        let analyzer = analyzer.clone();
        async move { analyzer.analyze_figure(i + 1, &figure).await }
    }))
    .buffer_unordered(concurrency.max(1))
    .take_until(cancel.cancelled_owned());

    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotesConfig;
    use crate::output::ANALYSIS_FAILED;
    use crate::pipeline::analyze::tests::png_bytes;
    use crate::pipeline::llm::scripted::ScriptedModel;

    fn figures(n: usize) -> Vec<FigureAsset> {
        (0..n)
            .map(|i| FigureAsset {
                name: format!("f{i}.png"),
                data: png_bytes(),
            })
            .collect()
    }

    #[tokio::test]
    async fn every_figure_is_reported_once() {
        let vision = ScriptedModel::replying("v", "desc");
        let analyzer = FigureAnalyzer::new(vision.clone(), &NotesConfig::default());
        let mut figs = figures(4);
        figs[2].data = b"bad".to_vec();

        let mut results: Vec<_> = analyze_stream(analyzer, figs, 2, CancellationToken::new())
            .collect()
            .await;
        results.sort_by_key(|a| a.index);

        assert_eq!(results.iter().map(|a| a.index).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(results[2].description, ANALYSIS_FAILED);
        assert_eq!(vision.calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_stream_ends_early() {
        let vision = ScriptedModel::delayed("v", 5_000, |_, _| Ok("late".into()));
        let analyzer = FigureAnalyzer::new(vision, &NotesConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results: Vec<_> = analyze_stream(analyzer, figures(3), 3, cancel).collect().await;
        assert!(results.is_empty());
    }

    #[test]
    fn empty_input_is_an_empty_stream() {
        let analyzer = FigureAnalyzer::new(ScriptedModel::replying("v", "x"), &NotesConfig::default());
        let results: Vec<FigureAnalysis> = tokio_test::block_on(
            analyze_stream(analyzer, Vec::new(), 1, CancellationToken::new()).collect(),
        );
        assert!(results.is_empty());
    }
}
