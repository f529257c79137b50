//! Per-stream linear clock model.
//!
//! Maps device ticks onto the reference axis with `ref = slope * x + intercept`,
//! `x` being device seconds since the first accepted edge. Fitted by least
//! squares over the most recent matched edges; updates whose residual exceeds
//! the anomaly threshold are rejected and the previous fit is kept.

use std::collections::VecDeque;

use contracts::{ClockModelConfig, ClockSnapshot, StreamKind};
use nalgebra::DVector;
use thiserror::Error;
use tracing::{debug, warn};

/// Clock model errors
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ClockError {
    #[error("clock model not yet calibrated ({samples} of 2 matched edges)")]
    NotCalibrated { samples: u64 },

    #[error("clock anomaly: residual {residual_us:.1}us exceeds {threshold_us:.1}us")]
    Anomaly { residual_us: f64, threshold_us: f64 },
}

/// Outcome of an accepted update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockUpdate {
    /// Reference minus prediction before the update (seconds), `None` for
    /// the first edge
    pub residual: Option<f64>,
    /// The update replaced the history after repeated rejections
    pub reseeded: bool,
}

/// Linear device-to-reference mapping for one stream
#[derive(Debug, Clone)]
pub struct ClockModel {
    stream: StreamKind,
    config: ClockModelConfig,
    tick_hz: f64,
    origin: Option<u64>,
    /// (device seconds since origin, reference seconds)
    history: VecDeque<(f64, f64)>,
    slope: f64,
    intercept: f64,
    sample_count: u64,
    last_update: Option<f64>,
    consecutive_rejections: u32,
    rejected: u64,
    last_residual: Option<f64>,
}

impl ClockModel {
    pub fn new(stream: StreamKind, tick_hz: f64, config: ClockModelConfig) -> Self {
        Self {
            stream,
            history: VecDeque::with_capacity(config.history),
            config,
            tick_hz,
            origin: None,
            slope: 1.0,
            intercept: 0.0,
            sample_count: 0,
            last_update: None,
            consecutive_rejections: 0,
            rejected: 0,
            last_residual: None,
        }
    }

    /// At least two matched edges have been accepted
    pub fn is_calibrated(&self) -> bool {
        self.sample_count >= 2
    }

    fn device_seconds(&self, device_ts: f64) -> f64 {
        let origin = self.origin.unwrap_or(0) as f64;
        (device_ts - origin) / self.tick_hz
    }

    /// Device ticks to reference seconds
    pub fn project(&self, device_ts: u64) -> Result<f64, ClockError> {
        self.project_f64(device_ts as f64)
    }

    fn project_f64(&self, device_ts: f64) -> Result<f64, ClockError> {
        if !self.is_calibrated() {
            return Err(ClockError::NotCalibrated {
                samples: self.sample_count,
            });
        }
        Ok(self.slope * self.device_seconds(device_ts) + self.intercept)
    }

    /// Reference seconds to (fractional) device ticks
    pub fn inverse(&self, reference_ts: f64) -> Result<f64, ClockError> {
        if !self.is_calibrated() {
            return Err(ClockError::NotCalibrated {
                samples: self.sample_count,
            });
        }
        let origin = self.origin.unwrap_or(0) as f64;
        let x = (reference_ts - self.intercept) / self.slope;
        Ok(origin + x * self.tick_hz)
    }

    /// Fold in one matched edge
    ///
    /// The second edge is checked against the first at the nominal rate, every
    /// later one against the current fit.
    ///
    /// # Errors
    /// `ClockError::Anomaly` when the residual exceeds the threshold; the model
    /// is left unchanged.
    pub fn update(&mut self, device_ts: u64, reference_ts: f64) -> Result<ClockUpdate, ClockError> {
        let residual = match self.project(device_ts) {
            Ok(projected) => Some(reference_ts - projected),
            Err(_) => self.nominal_residual(device_ts, reference_ts),
        };
        let threshold_us = self.config.drift_anomaly_threshold_us;

        if let Some(r) = residual {
            let residual_us = r * 1e6;
            if residual_us.abs() > threshold_us {
                self.consecutive_rejections += 1;
                self.rejected += 1;
                if self.consecutive_rejections < self.config.reseed_after {
                    warn!(
                        stream = %self.stream,
                        device_ts,
                        residual_us,
                        threshold_us,
                        "clock update rejected"
                    );
                    return Err(ClockError::Anomaly {
                        residual_us,
                        threshold_us,
                    });
                }
                warn!(
                    stream = %self.stream,
                    rejections = self.consecutive_rejections,
                    "persistent clock anomaly, reseeding model"
                );
                // Nothing of the old fit survives; two fresh edges re-warm it
                self.history.clear();
                self.slope = 1.0;
                self.intercept = 0.0;
                self.sample_count = 0;
                self.origin = Some(device_ts);
                self.push(device_ts, reference_ts);
                return Ok(ClockUpdate {
                    residual,
                    reseeded: true,
                });
            }
        }

        if self.origin.is_none() {
            self.origin = Some(device_ts);
        }
        self.push(device_ts, reference_ts);
        debug!(
            stream = %self.stream,
            slope = self.slope,
            samples = self.sample_count,
            "clock model updated"
        );
        Ok(ClockUpdate {
            residual,
            reseeded: false,
        })
    }

    /// Residual of a second edge against the single retained one, assuming
    /// the device runs at its nominal rate
    fn nominal_residual(&self, device_ts: u64, reference_ts: f64) -> Option<f64> {
        let (x0, y0) = self.history.back().copied()?;
        let elapsed = self.device_seconds(device_ts as f64) - x0;
        Some(reference_ts - (y0 + elapsed))
    }

    fn push(&mut self, device_ts: u64, reference_ts: f64) {
        let x = self.device_seconds(device_ts as f64);
        if self.history.len() == self.config.history {
            self.history.pop_front();
        }
        self.history.push_back((x, reference_ts));
        self.refit();

        self.sample_count += 1;
        self.last_update = Some(reference_ts);
        self.consecutive_rejections = 0;
        self.last_residual = Some(self.fit_residual_rms());
    }

    fn refit(&mut self) {
        let n = self.history.len();
        if n == 0 {
            return;
        }
        let xs = DVector::from_iterator(n, self.history.iter().map(|(x, _)| *x));
        let ys = DVector::from_iterator(n, self.history.iter().map(|(_, y)| *y));
        let (x_mean, y_mean) = (xs.mean(), ys.mean());

        if n >= 2 {
            let dx = xs.add_scalar(-x_mean);
            let dy = ys.add_scalar(-y_mean);
            let sxx = dx.dot(&dx);
            if sxx > f64::EPSILON {
                self.slope = dx.dot(&dy) / sxx;
            }
        }
        // Single point: keep the previous slope and pass through it
        self.intercept = y_mean - self.slope * x_mean;
    }

    /// RMS distance of the retained edges from the current fit (seconds)
    fn fit_residual_rms(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .history
            .iter()
            .map(|(x, y)| {
                let r = y - (self.slope * x + self.intercept);
                r * r
            })
            .sum();
        (sum / self.history.len() as f64).sqrt()
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            slope: self.slope,
            intercept: self.intercept,
            origin_ts: self.origin.unwrap_or(0),
            sample_count: self.sample_count,
            last_update: self.last_update,
        }
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn drift_ppm(&self) -> f64 {
        (self.slope - 1.0) * 1e6
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn last_update(&self) -> Option<f64> {
        self.last_update
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// RMS fit residual after the last accepted update (seconds)
    pub fn residual_rms(&self) -> Option<f64> {
        self.last_residual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HZ: f64 = 30.0;

    fn model() -> ClockModel {
        ClockModel::new(StreamKind::Event, 1_000_000.0, ClockModelConfig::default())
    }

    /// Device ticks of trigger `i` for a clock with offset and ppm drift
    fn device_tick(i: u64, offset_us: f64, drift_ppm: f64) -> u64 {
        let t = i as f64 / HZ;
        (offset_us + t * 1e6 * (1.0 + drift_ppm * 1e-6)).round() as u64
    }

    #[test]
    fn test_uncalibrated_until_two_edges() {
        let mut clock = model();
        assert_eq!(
            clock.project(1000),
            Err(ClockError::NotCalibrated { samples: 0 })
        );
        clock.update(1000, 0.0).unwrap();
        assert!(clock.project(1000).is_err());
        assert!(clock.inverse(0.0).is_err());
        clock.update(34_333, 1.0 / HZ).unwrap();
        assert!(clock.is_calibrated());
    }

    #[test]
    fn test_converges_on_uniform_edges() {
        let mut clock = model();
        let (offset, drift) = (123_456.0, 80.0);
        let mut residuals = Vec::new();
        for i in 0..32 {
            let update = clock
                .update(device_tick(i, offset, drift), i as f64 / HZ)
                .unwrap();
            if let Some(r) = update.residual {
                residuals.push(r.abs());
            }
        }

        // Exact up to tick rounding once two edges are in
        assert!(residuals.iter().all(|r| *r < 5e-6));
        assert!(residuals.last().copied().unwrap_or(1.0) < 1e-6);
        assert!((clock.drift_ppm() + drift).abs() < 1.0);

        let later = device_tick(40, offset, drift);
        let projected = clock.project(later).unwrap();
        assert!((projected - 40.0 / HZ).abs() < 1e-6);
    }

    #[test]
    fn test_jittered_edges_average_out() {
        let mut clock = model();
        // deterministic +-10us jitter pattern
        let jitter = [7.0, -3.0, 10.0, -9.0, 1.0, -6.0, 4.0, -2.0];
        for i in 0..32u64 {
            let tick = device_tick(i, 0.0, 0.0) as f64 + jitter[i as usize % jitter.len()];
            clock.update(tick.round() as u64, i as f64 / HZ).unwrap();
        }
        let err = clock.project(device_tick(31, 0.0, 0.0)).unwrap() - 31.0 / HZ;
        assert!(err.abs() < 10e-6, "projection error {err}");
    }

    #[test]
    fn test_inverse_round_trips() {
        let mut clock = model();
        for i in 0..16 {
            clock
                .update(device_tick(i, 5_000.0, 200.0), i as f64 / HZ)
                .unwrap();
        }
        let tick = clock.inverse(10.0 / HZ).unwrap();
        assert!((tick - device_tick(10, 5_000.0, 200.0) as f64).abs() < 2.0);
        assert!((clock.project(tick.round() as u64).unwrap() - 10.0 / HZ).abs() < 2e-6);
    }

    #[test]
    fn test_anomalous_update_rejected() {
        let mut clock = model();
        for i in 0..5 {
            clock.update(device_tick(i, 0.0, 0.0), i as f64 / HZ).unwrap();
        }
        let before = clock.snapshot();

        // 20ms off: a corrupted edge
        let result = clock.update(device_tick(5, 20_000.0, 0.0), 5.0 / HZ);
        assert!(matches!(result, Err(ClockError::Anomaly { .. })));
        assert_eq!(clock.snapshot(), before);
        assert_eq!(clock.rejected_count(), 1);

        // Good edges keep flowing
        assert!(clock.update(device_tick(6, 0.0, 0.0), 6.0 / HZ).is_ok());
    }

    #[test]
    fn test_persistent_anomaly_reseeds() {
        let mut config = ClockModelConfig::default();
        config.reseed_after = 3;
        let mut clock = ClockModel::new(StreamKind::Frame, 1_000_000.0, config);
        for i in 0..5 {
            clock.update(device_tick(i, 0.0, 0.0), i as f64 / HZ).unwrap();
        }

        // device clock stepped by 1s
        let stepped = |i| device_tick(i, 1_000_000.0, 0.0);
        assert!(clock.update(stepped(5), 5.0 / HZ).is_err());
        assert!(clock.update(stepped(6), 6.0 / HZ).is_err());
        let update = clock.update(stepped(7), 7.0 / HZ).unwrap();
        assert!(update.reseeded);

        // re-warms from the reseeding edge
        assert!(!clock.is_calibrated());
        assert_eq!(clock.slope(), 1.0);
        clock.update(stepped(8), 8.0 / HZ).unwrap();
        let projected = clock.project(stepped(9)).unwrap();
        assert!((projected - 9.0 / HZ).abs() < 2e-6);
    }

    #[test]
    fn test_late_second_edge_does_not_poison_fit() {
        let mut clock = model();
        clock.update(device_tick(0, 0.0, 0.0), 0.0).unwrap();
        // second edge 12ms late
        let result = clock.update(device_tick(1, 12_000.0, 0.0), 1.0 / HZ);
        assert!(matches!(result, Err(ClockError::Anomaly { .. })));
        assert!(!clock.is_calibrated());

        for i in 2..200 {
            clock.update(device_tick(i, 0.0, 0.0), i as f64 / HZ).unwrap();
        }
        assert_eq!(clock.rejected_count(), 1);
        assert!(clock.drift_ppm().abs() < 1.0, "slope {}", clock.slope());
        let err = clock.project(device_tick(199, 0.0, 0.0)).unwrap() - 199.0 / HZ;
        assert!(err.abs() < 2e-6, "projection error {err}");
    }

    #[test]
    fn test_corrupted_first_edge_recovers_by_reseeding() {
        let mut clock = model();
        clock.update(device_tick(0, 12_000.0, 0.0), 0.0).unwrap();

        let mut reseeded_at = None;
        for i in 1..200u64 {
            match clock.update(device_tick(i, 0.0, 0.0), i as f64 / HZ) {
                Ok(update) if update.reseeded => reseeded_at = Some(i),
                Ok(_) => {}
                Err(err) => assert!(matches!(err, ClockError::Anomaly { .. })),
            }
        }

        // reseed_after rejections, the last of which reseeds
        assert_eq!(reseeded_at, Some(5));
        assert_eq!(clock.rejected_count(), 5);
        assert!(clock.drift_ppm().abs() < 1.0, "slope {}", clock.slope());
        let err = clock.project(device_tick(199, 0.0, 0.0)).unwrap() - 199.0 / HZ;
        assert!(err.abs() < 2e-6, "projection error {err}");
    }
}
