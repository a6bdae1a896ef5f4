//! Intra-row log-sum-exp reduction
//!
//! A row block of `block_size` slots is split into `lanes()` contiguous
//! lanes of `lane_width()` slots. The row is reduced in two passes over the
//! lanes, always visiting them in lane order:
//!
//!   1. lane maxima            -> c = max over lanes
//!   2. lane sums exp(x - c)   -> s = sum over lanes, in lane order
//!   3. logsumexp = c + ln(s)
//!
//! Both passes run inside the task that owns the row. Slots at or past
//! `vocab_size` are masked to -inf and contribute nothing. The fixed
//! partial-sum grouping keeps the result bit-identical across runs and
//! thread counts.

use crate::launch::{LaunchConfig, GROUP_SIZE_MAX};

/// Stable log-sum-exp of one transformed row.
///
/// `values` holds the `vocab_size` live slots of the block; the rest of the
/// block is implicitly -inf. A row whose maximum is -inf (every class
/// masked) yields -inf.
///
/// A hand-built `launch` with more than [`GROUP_SIZE_MAX`] lanes is folded
/// onto `GROUP_SIZE_MAX` wider lanes.
pub fn row_logsumexp(values: &[f32], launch: &LaunchConfig) -> f32 {
    let (lanes, width) = if launch.lanes() <= GROUP_SIZE_MAX {
        (launch.lanes(), launch.lane_width())
    } else {
        (GROUP_SIZE_MAX, launch.block_size.div_ceil(GROUP_SIZE_MAX))
    };

    let mut partial = [f32::NEG_INFINITY; GROUP_SIZE_MAX];
    for (lane, slot) in partial.iter_mut().enumerate().take(lanes) {
        if let Some(chunk) = lane_slots(values, lane, width) {
            *slot = chunk.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        }
    }
    let c = partial[..lanes]
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);

    if c == f32::NEG_INFINITY {
        return f32::NEG_INFINITY;
    }

    let mut sums = [0.0f32; GROUP_SIZE_MAX];
    for (lane, slot) in sums.iter_mut().enumerate().take(lanes) {
        if let Some(chunk) = lane_slots(values, lane, width) {
            *slot = chunk.iter().map(|&x| (x - c).exp()).sum();
        }
    }
    let s: f32 = sums[..lanes].iter().sum();

    c + s.ln()
}

/// Live slots of `lane`, or `None` when the lane lies entirely in the mask.
#[inline]
fn lane_slots(values: &[f32], lane: usize, width: usize) -> Option<&[f32]> {
    let start = lane * width;
    if start >= values.len() {
        return None;
    }
    let end = (start + width).min(values.len());
    Some(&values[start..end])
}
