//! Playback configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SkError, SkResult};

/// Lower bound for the transport tick period (ms)
pub const MIN_TICK_INTERVAL_MS: u64 = 10;

/// Upper bound for cancellation granularity (ms)
pub const MAX_WAIT_SLICE_MS: u64 = 100;

/// Timing and resource settings for a playback session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Transport clock advance period
    pub tick_interval_ms: u64,

    /// How long the worker blocks on an empty queue before re-checking
    pub poll_timeout_ms: u64,

    /// Sleep granularity while waiting for an event (pause/seek/stop latency)
    pub wait_slice_ms: u64,

    /// Queue-empty completion margin before the last event time
    pub finish_tolerance_ms: u64,

    /// Threads in the note executor
    pub max_workers: usize,

    /// Bounded join on the worker thread during stop/seek
    pub join_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            poll_timeout_ms: 100,
            wait_slice_ms: 100,
            finish_tolerance_ms: 100,
            max_workers: 15,
            join_timeout_ms: 500,
        }
    }
}

impl PlaybackConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(text: &str) -> SkResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> SkResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> SkResult<()> {
        if self.tick_interval_ms < MIN_TICK_INTERVAL_MS {
            return Err(SkError::InvalidConfig(format!(
                "tick_interval_ms must be at least {MIN_TICK_INTERVAL_MS}, got {}",
                self.tick_interval_ms
            )));
        }
        if self.wait_slice_ms == 0 || self.wait_slice_ms > MAX_WAIT_SLICE_MS {
            return Err(SkError::InvalidConfig(format!(
                "wait_slice_ms must be in 1..={MAX_WAIT_SLICE_MS}, got {}",
                self.wait_slice_ms
            )));
        }
        if self.poll_timeout_ms == 0 {
            return Err(SkError::InvalidConfig(
                "poll_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(SkError::InvalidConfig(
                "max_workers must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp every field into the range `validate` accepts
    ///
    /// For configs built by hand; a zero wait slice would otherwise spin.
    pub fn sanitized(mut self) -> Self {
        self.poll_timeout_ms = self.poll_timeout_ms.max(1);
        let (tick, slice, workers) = (self.tick_interval_ms, self.wait_slice_ms, self.max_workers);
        self.with_tick_interval(tick)
            .with_wait_slice(slice)
            .with_workers(workers)
    }

    /// Set executor thread count
    pub fn with_workers(mut self, count: usize) -> Self {
        self.max_workers = count.max(1);
        self
    }

    /// Set transport tick period (floored at 10ms)
    pub fn with_tick_interval(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms.max(MIN_TICK_INTERVAL_MS);
        self
    }

    /// Set wait slice (clamped to 1..=100ms)
    pub fn with_wait_slice(mut self, ms: u64) -> Self {
        self.wait_slice_ms = ms.clamp(1, MAX_WAIT_SLICE_MS);
        self
    }

    /// Set worker join timeout
    pub fn with_join_timeout(mut self, ms: u64) -> Self {
        self.join_timeout_ms = ms;
        self
    }

    #[inline]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[inline]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    #[inline]
    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }

    #[inline]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
