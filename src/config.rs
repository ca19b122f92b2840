//! Engine configuration, loaded from RON.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, StatsError};
use crate::stats::Sample;

pub const DEFAULT_INTERVAL_US: u64 = 10_000_000;
pub const DEFAULT_IDLE_THRESHOLD_US: u64 = 10_000_000;

/// When an idle gap closes a communication interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum IdleGap {
    /// Split when the gap is strictly greater than the threshold.
    #[default]
    Exceeds,
    /// Split when the gap is greater than or equal to the threshold.
    Reaches,
}

impl IdleGap {
    pub fn splits(&self, gap: u64, threshold: u64) -> bool {
        match self {
            IdleGap::Exceeds => gap > threshold,
            IdleGap::Reaches => gap >= threshold,
        }
    }
}

/// Where the per-address rate scan starts inside an address's send history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum WindowStart {
    /// First stored timestamp inside the window.
    #[default]
    AtOrAfter,
    /// Stored timestamp closest to the interval start; ties go to the earlier one.
    Closest,
}

impl WindowStart {
    /// Index of the first sample that belongs to the window starting at `start`.
    /// With `after_boundary` a sample exactly at `start` belongs to the previous window
    /// and is never picked. `samples` must be sorted by timestamp.
    pub fn first_index(&self, samples: &[Sample], start: u64, after_boundary: bool) -> usize {
        let after = if after_boundary {
            samples.partition_point(|s| s.timestamp <= start)
        } else {
            samples.partition_point(|s| s.timestamp < start)
        };
        match self {
            WindowStart::AtOrAfter => after,
            WindowStart::Closest => {
                let before = match after.checked_sub(1) {
                    Some(before) if samples[before].timestamp < start => before,
                    _ => return after,
                };
                match samples.get(after) {
                    Some(next) if next.timestamp - start < start - samples[before].timestamp => after,
                    _ => before,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Gates checksum, payload, degree, anomaly and IP entropy computations.
    pub extended_signals: bool,
    /// Interval lengths computed side by side. Empty means "use the default length".
    pub interval_lengths_us: Vec<u64>,
    pub default_interval_us: u64,
    pub idle_threshold_us: u64,
    pub idle_gap: IdleGap,
    pub window_start: WindowStart,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            extended_signals: true,
            interval_lengths_us: vec![],
            default_interval_us: DEFAULT_INTERVAL_US,
            idle_threshold_us: DEFAULT_IDLE_THRESHOLD_US,
            idle_gap: IdleGap::default(),
            window_start: WindowStart::default(),
        }
    }
}

impl StatsConfig {
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn with_extended_signals(mut self, enabled: bool) -> Self {
        self.extended_signals = enabled;
        self
    }

    #[must_use]
    pub fn with_interval_lengths(mut self, lengths_us: Vec<u64>) -> Self {
        self.interval_lengths_us = lengths_us;
        self
    }

    #[must_use]
    pub fn with_default_interval(mut self, length_us: u64) -> Self {
        self.default_interval_us = length_us;
        self
    }

    #[must_use]
    pub fn with_idle_threshold(mut self, threshold_us: u64) -> Self {
        self.idle_threshold_us = threshold_us;
        self
    }

    #[must_use]
    pub fn with_idle_gap(mut self, idle_gap: IdleGap) -> Self {
        self.idle_gap = idle_gap;
        self
    }

    #[must_use]
    pub fn with_window_start(mut self, window_start: WindowStart) -> Self {
        self.window_start = window_start;
        self
    }

    /// Interval lengths to snapshot, the first one being the default table.
    pub fn effective_intervals(&self) -> Vec<u64> {
        if self.interval_lengths_us.is_empty() {
            vec![self.default_interval_us]
        } else {
            self.interval_lengths_us.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = self.effective_intervals();
        if intervals.iter().any(|&len| len == 0) {
            return Err(StatsError::InvalidConfig(format!(
                "interval lengths must be positive, got {:?}", intervals
            )));
        }
        Ok(())
    }

    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: StatsConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }
}
