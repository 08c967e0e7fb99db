//! Background figure-analysis queue.
//!
//! A fixed pool of workers pulls [`AnalysisJob`]s from one unbounded channel
//! and answers each through its own oneshot channel. The producer keeps a
//! [`JobHandle`] and can await it, poll it, or drop it; results of dropped
//! handles are parked in a bounded "completed" list instead of being lost.
//!
//! ```text
//!   submit() ──► mpsc ──► worker 0 ─┐
//!                     ├─► worker 1 ─┼─► oneshot per job ──► JobHandle::wait()
//!                     └─► worker N ─┘         │ (handle dropped)
//!                                             └──► completed()
//! ```
//!
//! Jobs are started in FIFO submission order; completion order depends on
//! per-image latency. [`AnalysisQueue::join_all`] is the batch barrier and
//! returns results in submission order regardless.

use crate::document::FigureAsset;
use crate::error::{FigureError, NotesError};
use crate::output::FigureAnalysis;
use crate::pipeline::analyze::FigureAnalyzer;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Results kept for dropped handles before the oldest are discarded.
pub const DEFAULT_COMPLETED_CAPACITY: usize = 256;

/// One figure waiting for analysis.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub id: Uuid,
    /// 1-based discovery index of the figure.
    pub index: usize,
    pub figure: FigureAsset,
}

struct QueuedJob {
    job: AnalysisJob,
    reply: oneshot::Sender<FigureAnalysis>,
}

/// Shared receiver for multiple workers pulling from one unbounded channel.
struct SharedReceiver<T> {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
}

impl<T> SharedReceiver<T> {
    fn new_unbounded(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

/// The caller's side of one submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    index: usize,
    name: String,
    rx: Option<oneshot::Receiver<FigureAnalysis>>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn figure_index(&self) -> usize {
        self.index
    }

    /// Await the result. A job abandoned by a shutting-down queue resolves
    /// to the sentinel description with [`FigureError::Dropped`].
    pub async fn wait(mut self) -> FigureAnalysis {
        match self.rx.take() {
            Some(rx) => match rx.await {
                Ok(result) => result,
                Err(_) => self.dropped(),
            },
            None => self.dropped(),
        }
    }

    /// Non-blocking poll. Returns the result at most once; `None` while the
    /// job is still queued or running, and after the result has been taken.
    pub fn try_result(&mut self) -> Option<FigureAnalysis> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(result) => {
                self.rx = None;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.rx = None;
                Some(self.dropped())
            }
        }
    }

    fn dropped(&self) -> FigureAnalysis {
        FigureAnalysis::failed(
            self.index,
            self.name.clone(),
            FigureError::Dropped { index: self.index },
        )
    }
}

/// Worker pool for figure analysis.
pub struct AnalysisQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    completed: Arc<StdMutex<VecDeque<FigureAnalysis>>>,
    cancel: CancellationToken,
    workers: usize,
}

impl AnalysisQueue {
    /// Start `workers` workers (at least one) on the current runtime.
    pub fn new(analyzer: FigureAnalyzer, workers: usize) -> Self {
        Self::with_completed_capacity(analyzer, workers, DEFAULT_COMPLETED_CAPACITY)
    }

    pub fn with_completed_capacity(
        analyzer: FigureAnalyzer,
        workers: usize,
        completed_capacity: usize,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = SharedReceiver::new_unbounded(rx);
        let completed = Arc::new(StdMutex::new(VecDeque::new()));
        let cancel = CancellationToken::new();

        spawn_analysis_workers(
            workers,
            rx,
            analyzer,
            completed.clone(),
            completed_capacity,
            cancel.clone(),
        );

        Self {
            tx,
            completed,
            cancel,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Enqueue one figure.
    ///
    /// # Errors
    /// [`NotesError::Cancelled`] once the queue has been shut down.
    pub fn submit(&self, index: usize, figure: FigureAsset) -> Result<JobHandle, NotesError> {
        if self.cancel.is_cancelled() {
            return Err(NotesError::Cancelled);
        }
        let (reply, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let name = figure.name.clone();
        self.tx
            .send(QueuedJob {
                job: AnalysisJob { id, index, figure },
                reply,
            })
            .map_err(|_| NotesError::Cancelled)?;
        tracing::debug!(job = %id, figure = index, "Analysis job queued");
        Ok(JobHandle {
            id,
            index,
            name,
            rx: Some(rx),
        })
    }

    /// Enqueue several figures, keeping the given order.
    pub fn submit_batch<I>(&self, figures: I) -> Result<Vec<JobHandle>, NotesError>
    where
        I: IntoIterator<Item = (usize, FigureAsset)>,
    {
        figures
            .into_iter()
            .map(|(index, figure)| self.submit(index, figure))
            .collect()
    }

    /// Wait for every handle; results come back in handle order.
    pub async fn join_all(handles: Vec<JobHandle>) -> Vec<FigureAnalysis> {
        futures::future::join_all(handles.into_iter().map(JobHandle::wait)).await
    }

    /// Drain results whose handles were dropped before completion.
    pub fn completed(&self) -> Vec<FigureAnalysis> {
        match self.completed.lock() {
            Ok(mut done) => done.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    /// Stop the workers. Queued jobs and jobs in flight resolve as dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for AnalysisQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_analysis_workers(
    count: usize,
    rx: SharedReceiver<QueuedJob>,
    analyzer: FigureAnalyzer,
    completed: Arc<StdMutex<VecDeque<FigureAnalysis>>>,
    completed_capacity: usize,
    cancel: CancellationToken,
) {
    for i in 0..count {
        let rx = rx.clone();
        let analyzer = analyzer.clone();
        let completed = completed.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            tracing::debug!(worker = i, "Analysis worker started");

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    job = rx.recv() => job,
                };
                let Some(QueuedJob { job, reply }) = next else {
                    break;
                };

                let result = tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(worker = i, job = %job.id, "Analysis abandoned on shutdown");
                        break;
                    }
                    result = analyzer.analyze_figure(job.index, &job.figure) => result,
                };

                tracing::debug!(
                    worker = i,
                    job = %job.id,
                    figure = job.index,
                    ok = result.is_ok(),
                    "Analysis job finished"
                );

                // Handle dropped: keep the result for `completed()`.
                if let Err(result) = reply.send(result) {
                    let mut done = match completed.lock() {
                        Ok(done) => done,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if completed_capacity == 0 {
                        continue;
                    }
                    while done.len() >= completed_capacity {
                        done.pop_front();
                    }
                    done.push_back(result);
                }
            }

            tracing::debug!(worker = i, "Analysis worker stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotesConfig;
    use crate::output::ANALYSIS_FAILED;
    use crate::pipeline::analyze::tests::png_bytes;
    use crate::pipeline::llm::scripted::ScriptedModel;
    use crate::pipeline::llm::{ModelError, ModelRequest, NotesModel};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn figure(name: &str) -> FigureAsset {
        FigureAsset {
            name: name.to_string(),
            data: png_bytes(),
        }
    }

    fn analyzer(model: Arc<dyn NotesModel>) -> FigureAnalyzer {
        FigureAnalyzer::new(model, &NotesConfig::default())
    }

    /// Tracks the highest number of concurrent calls.
    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl NotesModel for Gauge {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn generate(&self, _request: &ModelRequest) -> Result<String, ModelError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("described".to_string())
        }
    }

    #[tokio::test]
    async fn join_all_returns_results_in_submission_order() {
        let vision = ScriptedModel::replying("vision", "a chart");
        let queue = AnalysisQueue::new(analyzer(vision.clone()), 3);

        let handles = queue
            .submit_batch((1..=6).map(|i| (i, figure(&format!("f{i}.png")))))
            .unwrap();
        let results = AnalysisQueue::join_all(handles).await;

        assert_eq!(results.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert!(results.iter().all(|r| r.description == "a chart"));
        assert_eq!(vision.calls(), 6);
    }

    #[tokio::test]
    async fn worker_count_bounds_concurrency() {
        let gauge = Arc::new(Gauge::default());
        let queue = AnalysisQueue::new(analyzer(gauge.clone()), 2);

        let handles = queue
            .submit_batch((1..=6).map(|i| (i, figure("f.png"))))
            .unwrap();
        AnalysisQueue::join_all(handles).await;

        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failed_analysis_resolves_with_sentinel() {
        let queue = AnalysisQueue::new(analyzer(ScriptedModel::failing("vision", "quota")), 1);
        let result = queue.submit(3, figure("f.png")).unwrap().wait().await;
        assert_eq!(result.index, 3);
        assert_eq!(result.description, ANALYSIS_FAILED);
        assert!(matches!(result.error, Some(FigureError::Model { index: 3, .. })));
    }

    #[tokio::test]
    async fn try_result_polls_until_done() {
        let queue = AnalysisQueue::new(
            analyzer(ScriptedModel::delayed("vision", 50, |_, _| Ok("late".to_string()))),
            1,
        );
        let mut handle = queue.submit(1, figure("f.png")).unwrap();
        assert!(handle.try_result().is_none());

        let mut result = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(r) = handle.try_result() {
                result = Some(r);
                break;
            }
        }
        assert_eq!(result.expect("job completes").description, "late");
        assert!(handle.try_result().is_none());
    }

    #[tokio::test]
    async fn dropped_handle_result_lands_in_completed() {
        let queue = AnalysisQueue::new(analyzer(ScriptedModel::replying("vision", "kept")), 1);
        drop(queue.submit(7, figure("f7.png")).unwrap());

        let mut drained = Vec::new();
        for _ in 0..100 {
            drained = queue.completed();
            if !drained.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].index, 7);
        assert_eq!(drained[0].description, "kept");
        assert!(queue.completed().is_empty());
    }

    #[tokio::test]
    async fn completed_list_is_bounded() {
        let queue = AnalysisQueue::with_completed_capacity(
            analyzer(ScriptedModel::replying("vision", "x")),
            1,
            2,
        );
        // The last handle is awaited; a single worker runs FIFO, so the three
        // dropped jobs have finished by the time it resolves.
        for i in 1..=3 {
            drop(queue.submit(i, figure("f.png")).unwrap());
        }
        queue.submit(4, figure("f.png")).unwrap().wait().await;

        let drained = queue.completed();
        assert_eq!(drained.iter().map(|r| r.index).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn shutdown_drops_in_flight_and_rejects_new_jobs() {
        let queue = AnalysisQueue::new(
            analyzer(ScriptedModel::delayed("vision", 500, |_, _| Ok("never".to_string()))),
            1,
        );
        let handle = queue.submit(1, figure("f.png")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();

        let result = handle.wait().await;
        assert!(matches!(result.error, Some(FigureError::Dropped { index: 1 })));
        assert!(queue.is_shut_down());
        assert!(matches!(queue.submit(2, figure("f.png")), Err(NotesError::Cancelled)));
    }
}
