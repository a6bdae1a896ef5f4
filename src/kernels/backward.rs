//! Backward kernel: in-place gradient w.r.t. the raw scores
//!
//! With z = logsumexp(x) and L = z - x[label]:
//!
//!   dL/dx_i = softmax(x)_i - 1   for i == label
//!   dL/dx_i = softmax(x)_i       otherwise
//!
//! softmax(x)_i is recovered as exp(x_i - z) from the stored log-sum-exp,
//! then pulled back through softcap and scale with the chain rule and
//! multiplied by the row's upstream gradient. The result overwrites the
//! row's scores.

use rayon::prelude::*;

use super::{check_len, validate_labels, IGNORE_INDEX};
use crate::element::LogitElement;
use crate::error::{CrossEntropyError, Result};
use crate::kernel_args::CrossEntropyKernelArgs;
use crate::matrix::ScoreMatrixMut;
use crate::transform::LogitTransform;

/// Launch the backward kernel, overwriting `scores` with gradients.
///
/// `dlosses[row * dloss_row_stride]` is the upstream gradient of row `row`.
/// A stride of 0 broadcasts `dlosses[0]` to every row. Ignored rows use an
/// upstream gradient of 0.0 whatever `dlosses` holds.
///
/// `logsumexp` and `args.transform` must come from the forward launch on
/// the same, unmodified scores.
pub fn cross_entropy_backward<T: LogitElement>(
    scores: &mut ScoreMatrixMut<'_, T>,
    dlosses: &[f32],
    dloss_row_stride: usize,
    logsumexp: &[f32],
    labels: &[i64],
    args: &CrossEntropyKernelArgs,
) -> Result<()> {
    args.validate()?;
    check_len("vocab_size", args.vocab_size, scores.vocab_size())?;
    check_len("row stride", args.row_stride, scores.row_stride())?;

    let rows = scores.rows();
    check_len("labels", rows, labels.len())?;
    check_len("logsumexp", rows, logsumexp.len())?;
    validate_labels(labels, args.vocab_size)?;

    let needed = if rows == 0 {
        0
    } else {
        (rows - 1)
            .checked_mul(dloss_row_stride)
            .and_then(|span| span.checked_add(1))
            .ok_or(CrossEntropyError::ShapeOverflow {
                what: "upstream gradient (rows x dloss_row_stride)",
            })?
    };
    if dlosses.len() < needed {
        return Err(CrossEntropyError::ShapeMismatch {
            what: "upstream gradient length",
            expected: needed,
            got: dlosses.len(),
        });
    }

    log::debug!(
        "cross_entropy_backward: rows={} vocab={} block={} group={} dloss_stride={}",
        rows,
        args.vocab_size,
        args.launch.block_size,
        args.launch.group_size,
        dloss_row_stride
    );

    if rows == 0 {
        return Ok(());
    }

    let vocab = args.vocab_size;
    let transform = args.transform;
    scores
        .active_mut()
        .par_chunks_mut(args.row_stride)
        .enumerate()
        .for_each(|(row, chunk)| {
            let label = labels[row];
            let dloss = if label == IGNORE_INDEX {
                0.0
            } else {
                dlosses[row * dloss_row_stride]
            };
            backward_row(&mut chunk[..vocab], label, logsumexp[row], dloss, &transform);
        });

    Ok(())
}

fn backward_row<T: LogitElement>(
    row: &mut [T],
    label: i64,
    logsumexp: f32,
    dloss: f32,
    transform: &LogitTransform,
) {
    // Never equal to a column index for ignored rows
    let label_col = usize::try_from(label).ok();

    for (col, slot) in row.iter_mut().enumerate() {
        let (x, tanh_term) = transform.apply_with_tanh(slot.to_f32());
        let mut y = (x - logsumexp).exp();
        if label_col == Some(col) {
            y -= 1.0;
        }
        let grad = transform.chain(y, tanh_term);
        *slot = T::from_f32(dloss * grad);
    }
}
