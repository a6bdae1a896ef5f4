//! Fused cross-entropy kernels
//!
//! One independent unit of work per row, run data-parallel over rows with
//! rayon. Rows never touch each other's data, so results do not depend on
//! thread count or on how rows are split across workers.

mod backward;
mod forward;

pub use backward::cross_entropy_backward;
pub use forward::{cross_entropy_forward, ForwardOutput};

use crate::error::{CrossEntropyError, Result};

/// Label value marking a row as excluded from loss and gradient.
pub const IGNORE_INDEX: i64 = -100;

/// Every label must be a class index or [`IGNORE_INDEX`].
pub(crate) fn validate_labels(labels: &[i64], vocab_size: usize) -> Result<()> {
    for (row, &label) in labels.iter().enumerate() {
        if label == IGNORE_INDEX {
            continue;
        }
        if label < 0 || label as u64 >= vocab_size as u64 {
            return Err(CrossEntropyError::LabelOutOfRange {
                row,
                label,
                vocab_size,
            });
        }
    }
    Ok(())
}

pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(CrossEntropyError::ShapeMismatch {
            what,
            expected,
            got,
        });
    }
    Ok(())
}
