//! Run statistics and the summary printed on exit.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use contracts::{AlignedPair, OutputSink};
use observability::SyncMetricsAggregator;
use sync_engine::AlignerReport;

/// Folds every pair into a shared aggregator before passing it on
pub struct SummarySink<S> {
    inner: S,
    aggregator: Arc<Mutex<SyncMetricsAggregator>>,
}

impl<S: OutputSink> SummarySink<S> {
    pub fn new(inner: S, aggregator: Arc<Mutex<SyncMetricsAggregator>>) -> Self {
        Self { inner, aggregator }
    }
}

impl<S: OutputSink> OutputSink for SummarySink<S> {
    fn accept(&mut self, pair: AlignedPair) {
        self.aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(&pair.meta, pair.event_count());
        self.inner.accept(pair);
    }
}

/// Statistics from one run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub duration: Duration,

    /// Device-side counters summed over both devices
    pub ingestion: ingestion::MetricsSnapshot,

    /// Pairs handed to the dispatcher
    pub forwarded: u64,

    /// Pairs dropped between aligner and dispatcher
    pub forward_drops: u64,

    pub report: Option<AlignerReport>,

    pub sinks: Vec<(String, dispatcher::MetricsSnapshot)>,

    pub sync_metrics: SyncMetricsAggregator,
}

impl PipelineStats {
    /// Pairs per second of wall time
    pub fn pair_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.sync_metrics.total_pairs as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Run Statistics ===");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!(
            "Pairs: {} ({:.2}/s)",
            self.sync_metrics.total_pairs,
            self.pair_rate()
        );
        if self.ingestion.samples_received > 0 {
            println!(
                "Samples received: {} (rejected {}, buffer drops {}, disconnects {})",
                self.ingestion.samples_received,
                self.ingestion.samples_rejected,
                self.ingestion.buffer_drops,
                self.ingestion.disconnects
            );
        }
        if self.forward_drops > 0 {
            println!(
                "Dispatch: forwarded {}, dropped {}",
                self.forwarded, self.forward_drops
            );
        }

        if let Some(report) = &self.report {
            let stats = &report.stats;
            println!("Aligner state: {}", report.state.as_str());
            println!(
                "Events: assigned {}, discarded {}, markers stripped {}",
                stats.events_assigned, stats.events_discarded, stats.markers_stripped
            );
            if stats.late_frames > 0 || stats.windows_abandoned > 0 {
                println!(
                    "Late frames: {}, windows abandoned: {}",
                    stats.late_frames, stats.windows_abandoned
                );
            }
        }

        for (name, sink) in &self.sinks {
            println!(
                "Sink {}: written {}, failed {}, dropped {}",
                name, sink.written, sink.failed, sink.dropped
            );
        }

        println!();
        print!("{}", self.sync_metrics.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        AlignerState, ClockSnapshot, Confidence, IncidentCounters, PairMeta, PairMode,
    };

    fn pair(trigger_index: u64) -> AlignedPair {
        AlignedPair {
            trigger_index,
            frame: None,
            events: Vec::new(),
            meta: PairMeta {
                window_start: 0.0,
                window_end: 1.0 / 30.0,
                window_start_device: 0,
                window_end_device: 33_333,
                frame_reference_ts: None,
                alignment_error_us: None,
                confidence: Confidence::Extrapolated,
                complete: true,
                mode: PairMode::EventOnly,
                state: AlignerState::Degraded,
                event_clock: ClockSnapshot::default(),
                frame_clock: ClockSnapshot::default(),
                incidents: IncidentCounters::default(),
            },
        }
    }

    #[test]
    fn test_summary_sink_aggregates_and_forwards() {
        let aggregator = Arc::new(Mutex::new(SyncMetricsAggregator::new()));
        let mut seen = Vec::new();
        {
            let mut sink = SummarySink::new(
                |pair: AlignedPair| seen.push(pair.trigger_index),
                Arc::clone(&aggregator),
            );
            sink.accept(pair(0));
            sink.accept(pair(1));
        }

        assert_eq!(seen, vec![0, 1]);
        let aggregator = aggregator.lock().unwrap();
        assert_eq!(aggregator.total_pairs, 2);
        assert_eq!(aggregator.extrapolated_pairs, 2);
    }

    #[test]
    fn test_pair_rate() {
        let mut stats = PipelineStats::default();
        assert_eq!(stats.pair_rate(), 0.0);
        stats.duration = Duration::from_secs(2);
        stats.sync_metrics.total_pairs = 60;
        assert_eq!(stats.pair_rate(), 30.0);
    }
}
