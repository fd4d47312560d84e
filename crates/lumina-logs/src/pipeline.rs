use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::entry::{LogEntry, Overview};
use crate::error::LogError;
use crate::search::{SearchClient, SearchParams};

const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const WORKER_COUNT: usize = 10;
const CHANNEL_CAPACITY: usize = 1000;

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<LogEntry>>>;

/// Async trace pipeline: a bounded ingress queue drained by a worker pool,
/// with one flusher task bulk-indexing into the search backend.
///
/// Each worker owns a local batch — there is no shared, lock-guarded batch.
/// A worker hands its batch to the flusher when it reaches [`BATCH_SIZE`]
/// or on the worker's five-second tick; the flusher coalesces whatever the
/// pool has handed off into a single bulk request. [`Pipeline::submit`]
/// never waits on the backend.
pub struct Pipeline {
    sender: StdMutex<Option<mpsc::Sender<LogEntry>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    search: SearchClient,
}

impl Pipeline {
    /// Connect to the search backend, attempt index bootstrap, and start
    /// the worker pool. A failed bootstrap is logged, not fatal — the
    /// backend may simply not be up yet.
    pub async fn new(opensearch_url: &str) -> Result<Self, LogError> {
        let search = SearchClient::new(opensearch_url)?;
        if let Err(err) = search.ensure_index().await {
            warn!(error = %err, "failed to create log index");
        }

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let receiver: SharedReceiver = Arc::new(AsyncMutex::new(receiver));
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<LogEntry>>(WORKER_COUNT);

        let mut tasks = Vec::with_capacity(WORKER_COUNT + 1);
        for _ in 0..WORKER_COUNT {
            tasks.push(tokio::spawn(worker(receiver.clone(), batch_tx.clone())));
        }
        drop(batch_tx);
        tasks.push(tokio::spawn(flusher(batch_rx, search.clone())));

        Ok(Self {
            sender: StdMutex::new(Some(sender)),
            tasks: StdMutex::new(tasks),
            search,
        })
    }

    /// Enqueue a trace without blocking. When the queue is full the entry
    /// is dropped with a warning — observability must not back-pressure
    /// the request path.
    pub fn submit(&self, entry: LogEntry) {
        let Ok(guard) = self.sender.lock() else {
            return;
        };
        let Some(sender) = guard.as_ref() else {
            warn!(trace_id = %entry.trace_id, "log pipeline closed, dropping entry");
            return;
        };
        match sender.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                warn!(trace_id = %entry.trace_id, "log channel full, dropping entry");
            }
            Err(TrySendError::Closed(entry)) => {
                warn!(trace_id = %entry.trace_id, "log channel closed, dropping entry");
            }
        }
    }

    /// Close the ingress queue and drain: workers hand off their final
    /// batches, then the flusher writes what remains.
    pub async fn close(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        drop(sender);

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "log pipeline task panicked");
            }
        }
    }

    pub async fn search(&self, params: &SearchParams) -> Result<(Vec<LogEntry>, i64), LogError> {
        self.search.search(params).await
    }

    pub async fn get_log(&self, trace_id: Uuid) -> Result<Option<LogEntry>, LogError> {
        self.search.get(trace_id).await
    }

    pub async fn get_stats(
        &self,
        user_id: Uuid,
        from_ts: OffsetDateTime,
        to_ts: OffsetDateTime,
    ) -> Result<Overview, LogError> {
        self.search.stats(user_id, from_ts, to_ts).await
    }
}

async fn worker(queue: SharedReceiver, batches: mpsc::Sender<Vec<LogEntry>>) {
    let mut batch: Vec<LogEntry> = Vec::with_capacity(BATCH_SIZE);
    let mut ticker = interval_at(Instant::now() + FLUSH_INTERVAL, FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = async { queue.lock().await.recv().await } => match received {
                Some(entry) => {
                    batch.push(entry);
                    if batch.len() >= BATCH_SIZE {
                        hand_off(&batches, &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => hand_off(&batches, &mut batch).await,
        }
    }
    hand_off(&batches, &mut batch).await;
}

async fn hand_off(batches: &mpsc::Sender<Vec<LogEntry>>, batch: &mut Vec<LogEntry>) {
    if batch.is_empty() {
        return;
    }
    if batches.send(std::mem::take(batch)).await.is_err() {
        error!("log flusher gone, dropping batch");
    }
}

/// Merges whatever the worker pool has handed off into one bulk write.
/// Simultaneous ticks across the pool therefore produce a single `_bulk`
/// request, not one per worker.
async fn flusher(mut batches: mpsc::Receiver<Vec<LogEntry>>, search: SearchClient) {
    while let Some(mut pending) = batches.recv().await {
        while let Ok(more) = batches.try_recv() {
            pending.extend(more);
        }
        debug!(count = pending.len(), "flushing log batch");
        if let Err(err) = search.bulk(&pending).await {
            // Dropped batches are observable only here; no retry.
            error!(error = %err, count = pending.len(), "failed to bulk index logs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{MetricsLog, RequestLog, ResponseLog};
    use std::time::Instant as StdInstant;

    fn sample_entry() -> LogEntry {
        LogEntry {
            trace_id: Uuid::new_v4(),
            timestamp: OffsetDateTime::now_utc(),
            virtual_key_name: "load".to_string(),
            virtual_key_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            request: RequestLog {
                model: "openai/gpt-4o".to_string(),
                provider: "openai".to_string(),
                ..Default::default()
            },
            response: ResponseLog {
                status_code: 200,
                ..Default::default()
            },
            metrics: MetricsLog::default(),
        }
    }

    #[tokio::test]
    async fn submit_never_blocks_even_with_a_dead_backend() {
        // Nothing listens on this port, so every flush fails fast and the
        // queue is the only thing absorbing entries.
        let pipeline = Pipeline::new("http://127.0.0.1:1").await.unwrap();

        let started = StdInstant::now();
        for _ in 0..2000 {
            pipeline.submit(sample_entry());
        }
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "submitting 2000 entries took {:?}",
            started.elapsed()
        );
        pipeline.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_drops_later_submissions() {
        let pipeline = Pipeline::new("http://127.0.0.1:1").await.unwrap();
        pipeline.close().await;
        pipeline.close().await;
        // Must not panic or block once the queue is gone.
        pipeline.submit(sample_entry());
    }
}
