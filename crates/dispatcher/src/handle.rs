//! SinkHandle - one sink behind its own queue and worker task

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{AlignedPair, DataSink};

use crate::metrics::SinkMetrics;

/// Handle to a running sink worker
pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<Arc<AlignedPair>>,
    metrics: Arc<SinkMetrics>,
    worker_handle: JoinHandle<()>,
}

impl SinkHandle {
    /// Spawn the worker task for `sink` with a queue of `queue_capacity` pairs
    pub fn spawn<S: DataSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();
        let worker_handle = tokio::spawn(async move {
            sink_worker(sink, rx, worker_metrics, worker_name).await;
        });

        Self {
            name,
            tx,
            metrics,
            worker_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue a pair without waiting
    ///
    /// Returns false when the queue is full (pair dropped for this sink only)
    /// or the worker is gone.
    pub fn try_send(&self, pair: Arc<AlignedPair>) -> bool {
        match self.tx.try_send(pair) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(pair)) => {
                self.metrics.record_dropped();
                observability::record_pair_dispatched(&self.name, false);
                warn!(
                    sink = %self.name,
                    trigger_index = pair.trigger_index,
                    "sink queue full, pair dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "sink worker closed unexpectedly");
                false
            }
        }
    }

    /// Close the queue and wait until the worker drained, flushed and closed
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "sink worker panicked");
        }
        debug!(sink = %self.name, "sink handle shut down");
    }
}

#[instrument(
    name = "sink_worker_loop",
    skip(sink, rx, metrics),
    fields(sink = %name)
)]
async fn sink_worker<S: DataSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<Arc<AlignedPair>>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!(sink = %name, "sink worker started");

    while let Some(pair) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        match sink.write(&pair).await {
            Ok(()) => {
                metrics.record_written(pair.trigger_index);
                observability::record_pair_dispatched(&name, true);
            }
            Err(e) => {
                // a failing write never stops the worker
                metrics.record_failed();
                observability::record_pair_dispatched(&name, false);
                error!(
                    sink = %name,
                    trigger_index = pair.trigger_index,
                    error = %e,
                    "write failed"
                );
            }
        }
    }

    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "close failed on shutdown");
    }

    debug!(sink = %name, "sink worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pair;
    use contracts::ContractError;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    struct MockSink {
        name: String,
        written: Arc<Mutex<Vec<u64>>>,
        closed: Arc<AtomicBool>,
        fail_odd: bool,
        delay_ms: u64,
    }

    impl MockSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                written: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
                fail_odd: false,
                delay_ms: 0,
            }
        }
    }

    impl DataSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, pair: &AlignedPair) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail_odd && pair.trigger_index % 2 == 1 {
                return Err(ContractError::sink_write(&self.name, "odd index"));
            }
            self.written.lock().unwrap().push(pair.trigger_index);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_handle_writes_in_order() {
        let sink = MockSink::new("test");
        let written = Arc::clone(&sink.written);
        let closed = Arc::clone(&sink.closed);

        let handle = SinkHandle::spawn(sink, 10);
        for i in 0..5 {
            assert!(handle.try_send(Arc::new(pair(i))));
        }
        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;

        assert_eq!(*written.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(metrics.written(), 5);
        assert_eq!(metrics.snapshot().last_trigger_index, 4);
    }

    #[tokio::test]
    async fn test_sink_handle_queue_full() {
        let mut sink = MockSink::new("slow");
        sink.delay_ms = 100;
        let handle = SinkHandle::spawn(sink, 2);

        let mut accepted = 0;
        for i in 0..10 {
            if handle.try_send(Arc::new(pair(i))) {
                accepted += 1;
            }
        }

        assert!(handle.metrics().dropped() > 0);
        assert_eq!(handle.metrics().dropped(), 10 - accepted);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sink_handle_failure_isolation() {
        let mut sink = MockSink::new("flaky");
        sink.fail_odd = true;
        let written = Arc::clone(&sink.written);

        let handle = SinkHandle::spawn(sink, 10);
        for i in 0..6 {
            handle.try_send(Arc::new(pair(i)));
        }
        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;

        assert_eq!(metrics.failed(), 3);
        assert_eq!(*written.lock().unwrap(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_block_sender() {
        let mut sink = MockSink::new("slow");
        sink.delay_ms = 200;
        let handle = SinkHandle::spawn(sink, 1);
        let sent = AtomicU64::new(0);

        let started = std::time::Instant::now();
        for i in 0..50 {
            if handle.try_send(Arc::new(pair(i))) {
                sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(sent.load(Ordering::Relaxed) <= 2);
        handle.shutdown().await;
    }
}
