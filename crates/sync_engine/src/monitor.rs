//! Periodic health report for the aligner.

use std::time::Duration;

use contracts::{BufferStats, MonitorConfig, PairMeta};
use observability::RunningStats;
use tracing::{info, warn};

use crate::clock::ClockModel;

/// Folds pair diagnostics between reports and logs them every interval
#[derive(Debug)]
pub struct HealthMonitor {
    config: MonitorConfig,
    last_report: Option<Duration>,
    alignment: RunningStats,
    pairs: u64,
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            last_report: None,
            alignment: RunningStats::default(),
            pairs: 0,
        }
    }

    pub fn observe_pair(&mut self, meta: &PairMeta) {
        self.pairs += 1;
        if let Some(error_us) = meta.alignment_error_us {
            self.alignment.push(error_us.abs());
        }
    }

    /// Whether a report is due at aligner time `now`
    pub fn due(&mut self, now: Duration) -> bool {
        let interval = Duration::from_secs_f64(self.config.interval_s.max(0.0));
        match self.last_report {
            None => {
                self.last_report = Some(now);
                false
            }
            Some(last) => now.saturating_sub(last) >= interval,
        }
    }

    /// Log buffer, clock and alignment health, then start a new interval
    pub fn report(
        &mut self,
        now: Duration,
        buffers: [(&str, BufferStats); 2],
        clocks: [(&str, &ClockModel); 2],
    ) {
        self.last_report = Some(now);

        for (stream, stats) in buffers {
            let fill = stats.fill_ratio();
            if fill >= self.config.buffer_warning_ratio {
                warn!(
                    stream,
                    depth = stats.depth,
                    capacity = stats.capacity,
                    fill,
                    dropped = stats.dropped,
                    "stream buffer nearly full"
                );
            } else {
                info!(
                    stream,
                    depth = stats.depth,
                    capacity = stats.capacity,
                    fill,
                    dropped = stats.dropped,
                    "buffer health"
                );
            }
        }

        for (stream, clock) in clocks {
            info!(
                stream,
                drift_ppm = clock.drift_ppm(),
                samples = clock.sample_count(),
                rejected = clock.rejected_count(),
                residual_rms_us = clock.residual_rms().map(|r| r * 1e6),
                "clock health"
            );
        }

        if self.alignment.count() > 0 {
            let (avg, max) = (self.alignment.mean(), self.alignment.max());
            if max > self.config.alignment_warning_us {
                warn!(
                    pairs = self.pairs,
                    avg_us = avg,
                    max_us = max,
                    threshold_us = self.config.alignment_warning_us,
                    "frame-to-window alignment error above threshold"
                );
            } else {
                info!(pairs = self.pairs, avg_us = avg, max_us = max, "alignment health");
            }
        }

        self.alignment = RunningStats::default();
        self.pairs = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_due_after_interval() {
        let mut monitor = HealthMonitor::new(MonitorConfig {
            interval_s: 5.0,
            ..Default::default()
        });

        assert!(!monitor.due(Duration::from_secs(1)));
        assert!(!monitor.due(Duration::from_secs(5)));
        assert!(monitor.due(Duration::from_secs(6)));
    }
}
