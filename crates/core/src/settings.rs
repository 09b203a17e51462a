//! Validated batching parameters.
//!
//! Grid and threshold misconfiguration is fatal and must be caught
//! before any remote call is made, so every mode builds a
//! [`BatchSettings`] through [`BatchSettings::validate`] first.

use std::time::Duration;

use crate::error::CoreError;
use crate::grid::GridPacker;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default grid width in cells.
pub const DEFAULT_GRID_COLUMNS: u32 = 10;

/// Default maximum dimension for describe-mode grid eligibility.
pub const DEFAULT_DESCRIBE_THRESHOLD: u32 = 150;

/// Default maximum dimension for generate-mode grid eligibility.
pub const DEFAULT_GENERATE_THRESHOLD: u32 = 128;

/// Default gap between cells on generated sprite sheets.
pub const DEFAULT_GENERATE_PADDING: u32 = 20;

/// Default number of simultaneous remote calls.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on grid width; larger grids exceed provider canvas limits.
const MAX_GRID_COLUMNS: u32 = 64;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Parameters for classification, packing and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// Grid width in cells.
    pub columns: u32,
    /// Maximum items per batch.
    pub capacity: usize,
    /// Largest width/height that is still grid-eligible.
    pub size_threshold: u32,
    /// Gap between cells.
    pub padding: u32,
    /// Maximum simultaneous remote calls.
    pub max_concurrent: usize,
    /// Timeout applied to each remote call.
    pub call_timeout: Duration,
    /// Minimum gap between the starts of two remote calls.
    pub call_interval: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            columns: DEFAULT_GRID_COLUMNS,
            capacity: (DEFAULT_GRID_COLUMNS * DEFAULT_GRID_COLUMNS) as usize,
            size_threshold: DEFAULT_DESCRIBE_THRESHOLD,
            padding: 0,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            call_interval: Duration::ZERO,
        }
    }
}

impl BatchSettings {
    /// Check every field, returning the settings unchanged when valid.
    pub fn validate(self) -> Result<Self, CoreError> {
        if self.columns == 0 || self.columns > MAX_GRID_COLUMNS {
            return Err(CoreError::Validation(format!(
                "grid columns must be between 1 and {MAX_GRID_COLUMNS}, got {}",
                self.columns
            )));
        }
        if self.capacity == 0 {
            return Err(CoreError::Validation(
                "batch capacity must be at least 1".to_string(),
            ));
        }
        if self.size_threshold == 0 {
            return Err(CoreError::Validation(
                "size threshold must be at least 1".to_string(),
            ));
        }
        if self.padding > self.size_threshold {
            return Err(CoreError::Validation(format!(
                "cell padding {} exceeds the size threshold {}",
                self.padding, self.size_threshold
            )));
        }
        if self.max_concurrent == 0 {
            return Err(CoreError::Validation(
                "max concurrent calls must be at least 1".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(CoreError::Validation(
                "call timeout must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }

    /// Packer configured from these settings.
    pub fn packer(&self) -> GridPacker {
        GridPacker::new(self.capacity, self.columns, self.padding)
    }
}
