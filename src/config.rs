//! # Machine Configuration
//!
//! Configuration for the effect machine, with a builder and environment
//! variable loading.
//!
//! Supported environment variables:
//!
//! - `ICHOR_MAX_SEGMENTS` — segment stack limit (default: 65536)

use thiserror::Error;
use tracing::warn;

/// Minimum accepted segment stack limit.
const MIN_SEGMENTS: usize = 16;

/// Default segment stack limit.
const DEFAULT_MAX_SEGMENTS: usize = 64 * 1024;

/// Errors from configuration validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The segment limit is too small to evaluate anything useful.
    #[error("segment limit {given} is below the minimum of {}", MIN_SEGMENTS)]
    SegmentLimitTooSmall {
        /// The rejected value.
        given: usize,
    },
}

/// Configuration for a [`Machine`](crate::Machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MachineConfig {
    /// Maximum number of pending segments (handler frames plus pending
    /// sequencing steps). Evaluation faults with `StackExhausted` at this
    /// limit instead of growing without bound.
    pub max_segments: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }
}

impl MachineConfig {
    /// Start building a configuration.
    pub fn builder() -> MachineConfigBuilder {
        MachineConfigBuilder::default()
    }

    /// Load configuration from `ICHOR_*` environment variables, falling
    /// back to defaults for unset or unparseable values.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("ICHOR_MAX_SEGMENTS") {
            match raw.parse::<usize>() {
                Ok(n) if n >= MIN_SEGMENTS => config.max_segments = n,
                _ => warn!(value = %raw, "ignoring invalid ICHOR_MAX_SEGMENTS"),
            }
        }
        config
    }
}

/// Builder for [`MachineConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineConfigBuilder {
    max_segments: Option<usize>,
}

impl MachineConfigBuilder {
    /// Set the segment stack limit.
    pub fn max_segments(mut self, limit: usize) -> Self {
        self.max_segments = Some(limit);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<MachineConfig, ConfigError> {
        let max_segments = self.max_segments.unwrap_or(DEFAULT_MAX_SEGMENTS);
        if max_segments < MIN_SEGMENTS {
            return Err(ConfigError::SegmentLimitTooSmall { given: max_segments });
        }
        Ok(MachineConfig { max_segments })
    }
}
