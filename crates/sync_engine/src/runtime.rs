//! Aligner consumer thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use contracts::{ContractError, OutputSink};
use tracing::{debug, info};

use crate::engine::{Aligner, AlignerReport};

/// Cooperative stop flag shared with the caller
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a running aligner thread
#[derive(Debug)]
pub struct AlignerRuntime {
    shutdown: ShutdownSignal,
    join: JoinHandle<Result<AlignerReport, ContractError>>,
}

impl AlignerRuntime {
    /// Run `aligner` on a named thread, handing every pair to `sink`
    ///
    /// The thread wakes on the doorbell or every `poll_interval_ms`, and ends
    /// when `shutdown` is triggered, both streams have ended, or a disconnect
    /// under the halt policy was seen. It flushes with `finish` before
    /// returning.
    pub fn spawn<S>(
        aligner: Aligner,
        sink: S,
        poll_interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ContractError>
    where
        S: OutputSink + 'static,
    {
        let signal = shutdown.clone();
        let join = thread::Builder::new()
            .name("aligner".to_string())
            .spawn(move || run(aligner, sink, poll_interval, signal))?;
        Ok(Self { shutdown, join })
    }

    /// Ask the thread to flush and stop
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the thread and collect its report
    pub fn join(self) -> Result<AlignerReport, ContractError> {
        self.join.join().map_err(|_| ContractError::Aligner {
            message: "aligner thread panicked".to_string(),
        })?
    }
}

fn run<S: OutputSink>(
    mut aligner: Aligner,
    mut sink: S,
    poll_interval: Duration,
    shutdown: ShutdownSignal,
) -> Result<AlignerReport, ContractError> {
    let started = Instant::now();
    info!(poll_ms = poll_interval.as_millis() as u64, "aligner thread started");

    loop {
        // Timeout and a rung bell both mean "look again"
        let _ = aligner.doorbell().recv_timeout(poll_interval);

        for pair in aligner.step(started.elapsed()) {
            sink.accept(pair);
        }

        if shutdown.is_triggered() {
            debug!("shutdown requested");
            break;
        }
        if aligner.is_halted() || aligner.is_exhausted() {
            break;
        }
    }

    for pair in aligner.finish(started.elapsed()) {
        sink.accept(pair);
    }

    let report = aligner.report();
    info!(
        pairs = report.stats.pairs_emitted,
        state = report.state.as_str(),
        "aligner thread stopped"
    );
    match aligner.halt_error() {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::connect;
    use contracts::{AlignedPair, AlignerState, SyncEngineConfig};
    use std::sync::Mutex;

    #[test]
    fn test_shutdown_signal_shared() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        clone.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn test_runtime_stops_on_signal() {
        let config = SyncEngineConfig::default();
        let (_events, _frames, inputs) = connect(&config);
        let aligner = Aligner::new(config, inputs);

        let seen = Arc::new(Mutex::new(Vec::<u64>::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = move |pair: AlignedPair| {
            if let Ok(mut seen) = sink_seen.lock() {
                seen.push(pair.trigger_index);
            }
        };

        let runtime = AlignerRuntime::spawn(
            aligner,
            sink,
            Duration::from_millis(5),
            ShutdownSignal::new(),
        )
        .unwrap();
        runtime.stop();
        let report = runtime.join().unwrap();

        assert_eq!(report.state, AlignerState::Shutdown);
        assert!(seen.lock().unwrap().is_empty());
    }
}
