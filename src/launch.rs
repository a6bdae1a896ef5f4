//! Launch configuration for the fused cross-entropy kernels
//!
//! One row is processed by one block. The block covers the next power of
//! two above the vocabulary size; the worker-group size (the number of
//! reduction lanes inside a block) steps up with the block size.

use serde::Serialize;

use crate::error::{CrossEntropyError, Result};

/// Largest block a single row may occupy.
pub const MAX_FUSED_SIZE: usize = 65536;

/// Block-size thresholds for the worker-group step function.
pub const GROUP_THRESHOLD_MAX: usize = 32768;
pub const GROUP_THRESHOLD_LARGE: usize = 8192;
pub const GROUP_THRESHOLD_MEDIUM: usize = 2048;

/// Worker-group sizes selected by the thresholds above.
pub const GROUP_SIZE_MAX: usize = 32;
pub const GROUP_SIZE_LARGE: usize = 16;
pub const GROUP_SIZE_MEDIUM: usize = 8;
pub const GROUP_SIZE_MIN: usize = 4;

/// Per-row launch shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LaunchConfig {
    /// Power-of-two class slots per row (>= vocab_size).
    pub block_size: usize,
    /// Reduction lanes per row.
    pub group_size: usize,
}

impl LaunchConfig {
    /// Number of lanes that actually receive slots.
    ///
    /// Tiny blocks (e.g. a 2-class row) have fewer slots than the minimal
    /// group, so the lane count is clamped to the block.
    pub fn lanes(&self) -> usize {
        self.group_size.min(self.block_size).max(1)
    }

    /// Contiguous slots owned by each lane.
    pub fn lane_width(&self) -> usize {
        self.block_size / self.lanes()
    }
}

/// Pick block and group size for `vocab_size` classes.
///
/// Fails with [`CrossEntropyError::Configuration`] when the block would
/// exceed [`MAX_FUSED_SIZE`].
pub fn calculate_settings(vocab_size: usize) -> Result<LaunchConfig> {
    if vocab_size == 0 {
        return Err(CrossEntropyError::Config(
            "vocab_size must be positive".to_string(),
        ));
    }

    let block_size = vocab_size
        .checked_next_power_of_two()
        .unwrap_or(usize::MAX);
    if block_size > MAX_FUSED_SIZE {
        return Err(CrossEntropyError::Configuration {
            vocab_size,
            block_size,
            max: MAX_FUSED_SIZE,
        });
    }

    let group_size = if block_size >= GROUP_THRESHOLD_MAX {
        GROUP_SIZE_MAX
    } else if block_size >= GROUP_THRESHOLD_LARGE {
        GROUP_SIZE_LARGE
    } else if block_size >= GROUP_THRESHOLD_MEDIUM {
        GROUP_SIZE_MEDIUM
    } else {
        GROUP_SIZE_MIN
    };

    log::trace!(
        "launch settings: vocab_size={} block_size={} group_size={}",
        vocab_size,
        block_size,
        group_size
    );

    Ok(LaunchConfig {
        block_size,
        group_size,
    })
}
