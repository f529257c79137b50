//! PairForwarder - hands pairs from the aligner thread to the dispatcher
//!
//! The aligner calls [`OutputSink::accept`] synchronously, so forwarding must
//! stay within a bounded time. A full queue parks the aligner thread on a
//! timed send until the accept budget runs out, then the pair is dropped and
//! counted.

use std::sync::Arc;
use std::time::Duration;

use contracts::{AlignedPair, OutputSink};
use metrics::counter;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tracing::{debug, warn};

use crate::metrics::ForwarderMetrics;

/// Aligner-side end of the dispatcher input queue
pub struct PairForwarder {
    tx: mpsc::Sender<Arc<AlignedPair>>,
    budget: Duration,
    /// Drives the timed send; `accept` runs outside the runtime
    runtime: Handle,
    metrics: Arc<ForwarderMetrics>,
}

/// Create a forwarder and the receiver the dispatcher consumes
///
/// `runtime` must be the multi-threaded runtime the dispatcher runs on, and
/// the forwarder must only be used from threads outside it.
pub fn forwarder(
    capacity: usize,
    budget: Duration,
    runtime: Handle,
) -> (PairForwarder, mpsc::Receiver<Arc<AlignedPair>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let forwarder = PairForwarder {
        tx,
        budget,
        runtime,
        metrics: Arc::new(ForwarderMetrics::default()),
    };
    (forwarder, rx)
}

impl PairForwarder {
    pub fn metrics(&self) -> Arc<ForwarderMetrics> {
        Arc::clone(&self.metrics)
    }

    fn drop_pair(&self, trigger_index: u64, reason: &'static str) {
        self.metrics.record_dropped();
        counter!("evsync_forward_drops_total", "reason" => reason).increment(1);
        warn!(trigger_index, reason, "pair dropped before dispatch");
    }
}

impl OutputSink for PairForwarder {
    fn accept(&mut self, pair: AlignedPair) {
        let trigger_index = pair.trigger_index;
        let pending = match self.tx.try_send(Arc::new(pair)) {
            Ok(()) => {
                self.metrics.record_forwarded();
                return;
            }
            Err(TrySendError::Closed(_)) => {
                self.drop_pair(trigger_index, "dispatcher_closed");
                return;
            }
            Err(TrySendError::Full(back)) => back,
        };

        self.metrics.record_retried();
        match self
            .runtime
            .block_on(self.tx.send_timeout(pending, self.budget))
        {
            Ok(()) => {
                self.metrics.record_forwarded();
                debug!(trigger_index, "pair forwarded after waiting for queue space");
            }
            Err(SendTimeoutError::Timeout(_)) => self.drop_pair(trigger_index, "queue_full"),
            Err(SendTimeoutError::Closed(_)) => self.drop_pair(trigger_index, "dispatcher_closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pair;
    use std::time::Instant;
    use tokio::runtime::Runtime;

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_forward_in_order() {
        let rt = runtime();
        let (mut fwd, mut rx) = forwarder(8, Duration::from_millis(5), rt.handle().clone());
        for i in 0..5 {
            fwd.accept(pair(i));
        }
        let received: Vec<u64> = (0..5).map(|_| rx.try_recv().unwrap().trigger_index).collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        assert_eq!(fwd.metrics().forwarded(), 5);
    }

    #[test]
    fn test_full_queue_drops_after_budget() {
        let rt = runtime();
        let (mut fwd, _rx) = forwarder(2, Duration::from_millis(2), rt.handle().clone());
        let started = Instant::now();
        for i in 0..4 {
            fwd.accept(pair(i));
        }
        let metrics = fwd.metrics();
        assert_eq!(metrics.forwarded(), 2);
        assert_eq!(metrics.dropped(), 2);
        assert_eq!(metrics.retried(), 2);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_full_queue_waits_for_space() {
        let rt = runtime();
        let (mut fwd, mut rx) = forwarder(1, Duration::from_secs(5), rt.handle().clone());
        fwd.accept(pair(0));

        let reader = rt.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut received = Vec::new();
            while let Some(pair) = rx.recv().await {
                received.push(pair.trigger_index);
                if received.len() == 2 {
                    break;
                }
            }
            received
        });

        let started = Instant::now();
        fwd.accept(pair(1));
        assert!(started.elapsed() < Duration::from_secs(5));

        let received = rt.block_on(reader).unwrap();
        assert_eq!(received, vec![0, 1]);
        let metrics = fwd.metrics();
        assert_eq!(metrics.forwarded(), 2);
        assert_eq!(metrics.retried(), 1);
        assert_eq!(metrics.dropped(), 0);
    }

    #[test]
    fn test_closed_dispatcher_drops_immediately() {
        let rt = runtime();
        let (mut fwd, rx) = forwarder(2, Duration::from_secs(10), rt.handle().clone());
        drop(rx);
        let started = Instant::now();
        fwd.accept(pair(0));
        assert_eq!(fwd.metrics().dropped(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
