//! Sync metrics
//!
//! Prometheus counters/gauges fed from `PairMeta`, incidents and buffer
//! state, plus an in-memory aggregator for end-of-run summaries.

use std::collections::HashMap;

use contracts::{
    BufferStats, ClockSnapshot, Confidence, IncidentKind, PairMeta, PairMode, StreamKind,
    SyncIncident,
};
use metrics::{counter, gauge, histogram};

/// Record one emitted pair
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_pair_metrics;
///
/// for pair in aligner.step(now) {
///     record_pair_metrics(&pair.meta, pair.trigger_index, pair.events.len());
/// }
/// ```
pub fn record_pair_metrics(meta: &PairMeta, trigger_index: u64, event_count: usize) {
    let mode = match meta.mode {
        PairMode::Paired => "paired",
        PairMode::FrameOnly => "frame_only",
        PairMode::EventOnly => "event_only",
    };
    counter!("evsync_pairs_total", "mode" => mode).increment(1);
    gauge!("evsync_last_trigger_index").set(trigger_index as f64);
    gauge!("evsync_aligner_state", "state" => meta.state.as_str()).set(1.0);

    if !meta.complete {
        counter!("evsync_pairs_incomplete_total").increment(1);
    }
    if meta.confidence == Confidence::Extrapolated {
        counter!("evsync_pairs_extrapolated_total").increment(1);
    }

    histogram!("evsync_window_duration_ms").record(meta.window_duration() * 1000.0);
    histogram!("evsync_events_per_pair").record(event_count as f64);

    if let Some(error_us) = meta.alignment_error_us {
        gauge!("evsync_alignment_error_us").set(error_us);
        histogram!("evsync_alignment_error_us_hist").record(error_us.abs());
    }
}

/// Record one incident
pub fn record_incident(incident: &SyncIncident) {
    let stream = match incident {
        SyncIncident::MissedEdge { stream, .. }
        | SyncIncident::ClockAnomaly { stream, .. }
        | SyncIncident::DeviceDisconnected { stream, .. } => stream.as_str(),
        SyncIncident::BufferOverflowDrop { gap } => gap.stream.as_str(),
        SyncIncident::FrameDropped { .. } => StreamKind::Frame.as_str(),
        SyncIncident::ShutdownRequested => "none",
    };
    counter!(
        "evsync_incidents_total",
        "kind" => incident.kind().as_str(),
        "stream" => stream
    )
    .increment(1);

    if let SyncIncident::ClockAnomaly { residual_us, .. } = incident {
        histogram!("evsync_clock_anomaly_residual_us", "stream" => stream)
            .record(residual_us.abs());
    }
}

/// Record buffer occupancy
pub fn record_buffer_state(stream_id: &str, stats: &BufferStats) {
    let stream = stream_id.to_string();
    gauge!("evsync_buffer_depth", "stream" => stream.clone()).set(stats.depth as f64);
    gauge!("evsync_buffer_bytes", "stream" => stream.clone()).set(stats.bytes as f64);
    gauge!("evsync_buffer_fill_ratio", "stream" => stream).set(stats.fill_ratio());
}

/// Record the fitted clock mapping
pub fn record_clock_state(stream_id: &str, snapshot: &ClockSnapshot, residual_rms: Option<f64>) {
    let stream = stream_id.to_string();
    gauge!("evsync_clock_drift_ppm", "stream" => stream.clone()).set(snapshot.drift_ppm());
    gauge!("evsync_clock_samples", "stream" => stream.clone()).set(snapshot.sample_count as f64);
    if let Some(rms) = residual_rms {
        gauge!("evsync_clock_residual_rms_us", "stream" => stream).set(rms * 1e6);
    }
}

/// Record a raw sample arriving from a device
pub fn record_sample_received(stream_id: &str, kind: StreamKind) {
    counter!(
        "evsync_samples_received_total",
        "stream" => stream_id.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record pair dispatch to a sink
pub fn record_pair_dispatched(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "evsync_pairs_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Sync metrics aggregator
///
/// Aggregates in memory for summaries printed at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct SyncMetricsAggregator {
    pub total_pairs: u64,

    pub incomplete_pairs: u64,

    pub extrapolated_pairs: u64,

    pub frame_only_pairs: u64,

    pub event_only_pairs: u64,

    pub total_events: u64,

    /// Window length (ms)
    pub window_stats: RunningStats,

    /// |frame ref - window start| (us)
    pub alignment_stats: RunningStats,

    /// Events per pair
    pub event_stats: RunningStats,

    /// Drift of the latest clock snapshots (ppm)
    pub drift_ppm: HashMap<StreamKind, f64>,

    /// Cumulative incident counts as of the latest pair
    pub incidents: HashMap<IncidentKind, u64>,
}

impl SyncMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, meta: &PairMeta, event_count: usize) {
        self.total_pairs += 1;
        self.total_events += event_count as u64;

        if !meta.complete {
            self.incomplete_pairs += 1;
        }
        if meta.confidence == Confidence::Extrapolated {
            self.extrapolated_pairs += 1;
        }
        match meta.mode {
            PairMode::Paired => {}
            PairMode::FrameOnly => self.frame_only_pairs += 1,
            PairMode::EventOnly => self.event_only_pairs += 1,
        }

        self.window_stats.push(meta.window_duration() * 1000.0);
        self.event_stats.push(event_count as f64);
        if let Some(error_us) = meta.alignment_error_us {
            self.alignment_stats.push(error_us.abs());
        }

        self.drift_ppm
            .insert(StreamKind::Event, meta.event_clock.drift_ppm());
        self.drift_ppm
            .insert(StreamKind::Frame, meta.frame_clock.drift_ppm());

        for kind in [
            IncidentKind::MissedEdge,
            IncidentKind::BufferOverflowDrop,
            IncidentKind::ClockAnomaly,
            IncidentKind::FrameDropped,
            IncidentKind::DeviceDisconnected,
            IncidentKind::ShutdownRequested,
        ] {
            let count = meta.incidents.get(kind);
            if count > 0 {
                self.incidents.insert(kind, count);
            }
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let rate = |n: u64| {
            if self.total_pairs > 0 {
                n as f64 / self.total_pairs as f64 * 100.0
            } else {
                0.0
            }
        };
        let mut incidents: Vec<(String, u64)> = self
            .incidents
            .iter()
            .map(|(kind, count)| (kind.as_str().to_string(), *count))
            .collect();
        incidents.sort();

        MetricsSummary {
            total_pairs: self.total_pairs,
            total_events: self.total_events,
            incomplete_pairs: self.incomplete_pairs,
            extrapolated_pairs: self.extrapolated_pairs,
            frame_only_pairs: self.frame_only_pairs,
            event_only_pairs: self.event_only_pairs,
            incomplete_rate: rate(self.incomplete_pairs),
            extrapolated_rate: rate(self.extrapolated_pairs),
            window_ms: StatsSummary::from(&self.window_stats),
            alignment_error_us: StatsSummary::from(&self.alignment_stats),
            events_per_pair: StatsSummary::from(&self.event_stats),
            event_drift_ppm: self.drift_ppm.get(&StreamKind::Event).copied(),
            frame_drift_ppm: self.drift_ppm.get(&StreamKind::Frame).copied(),
            incidents,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Metrics summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_pairs: u64,
    pub total_events: u64,
    pub incomplete_pairs: u64,
    pub extrapolated_pairs: u64,
    pub frame_only_pairs: u64,
    pub event_only_pairs: u64,
    pub incomplete_rate: f64,
    pub extrapolated_rate: f64,
    pub window_ms: StatsSummary,
    pub alignment_error_us: StatsSummary,
    pub events_per_pair: StatsSummary,
    pub event_drift_ppm: Option<f64>,
    pub frame_drift_ppm: Option<f64>,
    /// Sorted by kind name
    pub incidents: Vec<(String, u64)>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Sync Metrics Summary ===")?;
        writeln!(f, "Total pairs: {}", self.total_pairs)?;
        writeln!(f, "Total events: {}", self.total_events)?;
        writeln!(
            f,
            "Incomplete pairs: {} ({:.2}%)",
            self.incomplete_pairs, self.incomplete_rate
        )?;
        writeln!(
            f,
            "Extrapolated pairs: {} ({:.2}%)",
            self.extrapolated_pairs, self.extrapolated_rate
        )?;
        if self.frame_only_pairs > 0 || self.event_only_pairs > 0 {
            writeln!(
                f,
                "Single-stream pairs: frame_only={}, event_only={}",
                self.frame_only_pairs, self.event_only_pairs
            )?;
        }
        writeln!(f, "Window (ms): {}", self.window_ms)?;
        writeln!(f, "Alignment error (us): {}", self.alignment_error_us)?;
        writeln!(f, "Events per pair: {}", self.events_per_pair)?;
        if let (Some(event), Some(frame)) = (self.event_drift_ppm, self.frame_drift_ppm) {
            writeln!(f, "Clock drift (ppm): events={:.2}, frames={:.2}", event, frame)?;
        }

        if !self.incidents.is_empty() {
            writeln!(f, "Incidents:")?;
            for (kind, count) in &self.incidents {
                writeln!(f, "  {}: {}", kind, count)?;
            }
        }

        Ok(())
    }
}

/// Summary of a `RunningStats`
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
