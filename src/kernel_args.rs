//! Kernel entry arguments
//!
//! The explicit per-launch parameters shared by the forward and backward
//! kernels. Row count is implicit (one unit of work per row).

use serde::Serialize;

use crate::error::{CrossEntropyError, Result};
use crate::launch::{calculate_settings, LaunchConfig, GROUP_SIZE_MAX, MAX_FUSED_SIZE};
use crate::transform::LogitTransform;

/// Arguments for one forward or backward launch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CrossEntropyKernelArgs {
    pub vocab_size: usize,
    /// Elements between the starts of consecutive rows.
    pub row_stride: usize,
    pub launch: LaunchConfig,
    pub transform: LogitTransform,
}

impl CrossEntropyKernelArgs {
    /// Run the launch configurator and bundle the result.
    pub fn new(vocab_size: usize, row_stride: usize, transform: LogitTransform) -> Result<Self> {
        let launch = calculate_settings(vocab_size)?;
        let args = Self {
            vocab_size,
            row_stride,
            launch,
            transform,
        };
        args.validate()?;
        Ok(args)
    }

    /// Check the invariants the kernels rely on.
    ///
    /// Hand-built args (not from [`CrossEntropyKernelArgs::new`]) go through
    /// this before every launch.
    pub fn validate(&self) -> Result<()> {
        let block = self.launch.block_size;
        if !block.is_power_of_two() || block < self.vocab_size || block > MAX_FUSED_SIZE {
            return Err(CrossEntropyError::Configuration {
                vocab_size: self.vocab_size,
                block_size: block,
                max: MAX_FUSED_SIZE,
            });
        }
        if self.launch.group_size == 0 || self.launch.group_size > GROUP_SIZE_MAX {
            return Err(CrossEntropyError::Config(format!(
                "group_size must be in 1..={}, got {}",
                GROUP_SIZE_MAX, self.launch.group_size
            )));
        }
        if self.row_stride < self.vocab_size {
            return Err(CrossEntropyError::InvalidStride {
                row_stride: self.row_stride,
                vocab_size: self.vocab_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_runs_configurator() {
        let args = CrossEntropyKernelArgs::new(5, 8, LogitTransform::identity()).unwrap();
        assert_eq!(args.launch.block_size, 8);
        assert_eq!(args.launch.group_size, 4);
        assert_eq!(args.row_stride, 8);
    }

    #[test]
    fn test_rejects_narrow_block() {
        let mut args = CrossEntropyKernelArgs::new(5, 5, LogitTransform::identity()).unwrap();
        args.launch.block_size = 4;
        assert!(matches!(
            args.validate(),
            Err(CrossEntropyError::Configuration { .. })
        ));
    }

    #[test]
    fn test_rejects_non_power_of_two_block() {
        let mut args = CrossEntropyKernelArgs::new(5, 5, LogitTransform::identity()).unwrap();
        args.launch.block_size = 6;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_group() {
        let mut args = CrossEntropyKernelArgs::new(40000, 40000, LogitTransform::identity()).unwrap();
        args.launch.group_size = GROUP_SIZE_MAX * 2;
        assert!(matches!(args.validate(), Err(CrossEntropyError::Config(_))));
    }

    #[test]
    fn test_rejects_short_stride() {
        let err = CrossEntropyKernelArgs::new(5, 4, LogitTransform::identity()).unwrap_err();
        assert_eq!(
            err,
            CrossEntropyError::InvalidStride {
                row_stride: 4,
                vocab_size: 5
            }
        );
    }
}
