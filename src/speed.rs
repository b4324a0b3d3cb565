// src/speed.rs

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of samples averaged into the reported rate.
pub const WINDOW: usize = 5;

/// Samples closer together than this reuse the previous rate.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Anything faster is treated as a clock or counter glitch.
pub const MAX_PLAUSIBLE_RATE: f64 = 100.0 * 1024.0 * 1024.0;

/// Moving-average throughput estimator fed by progress ticks.
#[derive(Debug, Clone, Default)]
pub struct SpeedEstimator {
    /// Most recent rates in bytes per second, oldest first.
    recent: VecDeque<f64>,
    /// Baseline the next sample is measured against.
    last: Option<Observation>,
    /// The last value handed out; also the substitute for rejected samples.
    last_rate: f64,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    bytes: u64,
    at: Instant,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(WINDOW),
            last: None,
            last_rate: 0.0,
        }
    }

    /// Records a tick at the current time and returns the smoothed rate.
    pub fn sample(&mut self, bytes_written: u64) -> f64 {
        self.sample_at(bytes_written, Instant::now())
    }

    /// Records a tick observed at `now` and returns the smoothed rate.
    pub fn sample_at(&mut self, bytes_written: u64, now: Instant) -> f64 {
        let Some(last) = self.last else {
            self.last = Some(Observation { bytes: 0, at: now });
            return 0.0;
        };

        let elapsed = now.saturating_duration_since(last.at);
        if elapsed < MIN_SAMPLE_INTERVAL {
            return self.last_rate;
        }

        let mut rate = (bytes_written as f64 - last.bytes as f64) / elapsed.as_secs_f64();
        if !rate.is_finite() || rate < 0.0 || rate > MAX_PLAUSIBLE_RATE {
            rate = self.last_rate;
        }

        if self.recent.len() == WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(rate);

        let average = self.recent.iter().sum::<f64>() / self.recent.len() as f64;
        self.last = Some(Observation {
            bytes: bytes_written,
            at: now,
        });
        self.last_rate = average;
        average
    }

    /// Moves the baseline without touching the window, so bytes moved
    /// before a pause are not credited to the first sample after it.
    pub fn rebase(&mut self, bytes_written: u64, now: Instant) {
        self.last = Some(Observation {
            bytes: bytes_written,
            at: now,
        });
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// The last reported smoothed rate.
    pub fn current(&self) -> f64 {
        self.last_rate
    }
}
