//! LogSink - periodic sync quality summaries via tracing

use std::collections::HashMap;

use contracts::{AlignedPair, ContractError, DataSink};
use observability::SyncMetricsAggregator;
use tracing::{debug, info, instrument};

const DEFAULT_INTERVAL: u64 = 30;

/// Sink that logs every pair at debug level and a summary every `interval`
/// pairs
pub struct LogSink {
    name: String,
    interval: u64,
    aggregator: SyncMetricsAggregator,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: DEFAULT_INTERVAL,
            aggregator: SyncMetricsAggregator::new(),
        }
    }

    /// Create from params map
    ///
    /// `interval`: pairs between summaries (default 30)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, String> {
        let mut sink = Self::new(name);
        if let Some(raw) = params.get("interval") {
            let interval: u64 = raw
                .trim()
                .parse()
                .map_err(|e| format!("invalid interval '{}': {}", raw, e))?;
            if interval == 0 {
                return Err("interval must be positive".to_string());
            }
            sink.interval = interval;
        }
        Ok(sink)
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn aggregator(&self) -> &SyncMetricsAggregator {
        &self.aggregator
    }

    fn log_summary(&self) {
        let summary = self.aggregator.summary();
        info!(
            sink = %self.name,
            pairs = summary.total_pairs,
            events = summary.total_events,
            incomplete = summary.incomplete_pairs,
            extrapolated = summary.extrapolated_pairs,
            alignment_error_mean_us = summary.alignment_error_us.mean,
            alignment_error_max_us = summary.alignment_error_us.max,
            event_drift_ppm = summary.event_drift_ppm,
            frame_drift_ppm = summary.frame_drift_ppm,
            "sync summary"
        );
    }
}

impl DataSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, pair),
        fields(sink = %self.name, trigger_index = pair.trigger_index)
    )]
    async fn write(&mut self, pair: &AlignedPair) -> Result<(), ContractError> {
        debug!(
            sink = %self.name,
            trigger_index = pair.trigger_index,
            events = pair.event_count(),
            frame_seq = pair.frame.as_ref().map(|f| f.seq),
            mode = ?pair.meta.mode,
            confidence = ?pair.meta.confidence,
            complete = pair.meta.complete,
            state = pair.meta.state.as_str(),
            "pair received"
        );

        self.aggregator.update(&pair.meta, pair.event_count());
        if self.aggregator.total_pairs.is_multiple_of(self.interval) {
            self.log_summary();
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if self.aggregator.total_pairs > 0 {
            info!(sink = %self.name, "final summary\n{}", self.aggregator.summary());
        }
        info!(sink = %self.name, "log sink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{full_pair, pair};
    use contracts::Confidence;

    #[tokio::test]
    async fn test_log_sink_aggregates() {
        let mut sink = LogSink::new("test_log");
        sink.write(&full_pair(0)).await.unwrap();
        let mut extrapolated = pair(1);
        extrapolated.meta.confidence = Confidence::Extrapolated;
        sink.write(&extrapolated).await.unwrap();

        let aggregator = sink.aggregator();
        assert_eq!(aggregator.total_pairs, 2);
        assert_eq!(aggregator.total_events, 3);
        assert_eq!(aggregator.extrapolated_pairs, 1);
        assert_eq!(aggregator.event_only_pairs, 1);
        assert!(sink.close().await.is_ok());
    }

    #[test]
    fn test_log_sink_params() {
        let sink = LogSink::from_params("my_logger", &HashMap::new()).unwrap();
        assert_eq!(sink.name(), "my_logger");
        assert_eq!(sink.interval(), 30);

        let params = HashMap::from([("interval".to_string(), "5".to_string())]);
        assert_eq!(LogSink::from_params("l", &params).unwrap().interval(), 5);

        let params = HashMap::from([("interval".to_string(), "0".to_string())]);
        assert!(LogSink::from_params("l", &params).is_err());
    }
}
