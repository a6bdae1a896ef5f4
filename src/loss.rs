//! Batched loss entry point and loss reduction
//!
//! total_loss = sum(per_row_losses) / n_items
//!
//! where `n_items` defaults to the number of labels that are not
//! [`IGNORE_INDEX`]. The backward of that sum hands every row the same
//! upstream gradient `grad_output / n_items`, so it is passed to the kernel
//! as a single broadcast value (stride 0).

use crate::autograd::{CrossEntropyContext, FastCrossEntropyLoss};
use crate::config::LossConfig;
use crate::element::LogitElement;
use crate::error::{CrossEntropyError, Result};
use crate::kernels::IGNORE_INDEX;
use crate::matrix::ScoreMatrixMut;

/// Labels that take part in the loss.
pub fn count_items(labels: &[i64]) -> usize {
    labels.iter().filter(|&&l| l != IGNORE_INDEX).count()
}

/// Reduce per-row losses to the training loss.
///
/// Returns `(loss, n_items)`. With `n_items` inferred as 0 (every row
/// ignored) the loss is 0.0.
pub fn reduce_losses(losses: &[f32], labels: &[i64], n_items: Option<usize>) -> Result<(f32, usize)> {
    if losses.len() != labels.len() {
        return Err(CrossEntropyError::ShapeMismatch {
            what: "losses vs labels",
            expected: labels.len(),
            got: losses.len(),
        });
    }

    let n_items = match n_items {
        Some(0) => return Err(CrossEntropyError::InvalidItemCount(0)),
        Some(n) => n,
        None => count_items(labels),
    };

    if n_items == 0 {
        log::warn!("every label is the ignore index; loss is 0");
        return Ok((0.0, 0));
    }

    let total: f32 = losses.iter().sum();
    Ok((total / n_items as f32, n_items))
}

/// Scalar loss with the state needed to backpropagate it.
pub struct ReducedLoss<'a, T> {
    pub loss: f32,
    pub n_items: usize,
    pub losses: Vec<f32>,
    ctx: CrossEntropyContext<'a, T>,
}

impl<'a, T: LogitElement> ReducedLoss<'a, T> {
    pub fn context(&self) -> &CrossEntropyContext<'a, T> {
        &self.ctx
    }

    /// Overwrite the scores with d(grad_output * loss)/d(scores).
    pub fn backward(self, grad_output: f32) -> Result<&'a mut [T]> {
        let per_row = if self.n_items == 0 {
            0.0
        } else {
            grad_output / self.n_items as f32
        };
        let grad = self.ctx.backward_strided(&[per_row], 0)?;
        Ok(grad.into_inner())
    }
}

/// Fused cross-entropy over `[batch, seq_len, vocab_size]` logits.
///
/// `labels` is `[batch, seq_len]`, flattened row-major like `scores`.
pub fn fast_cross_entropy_loss<'a, T: LogitElement>(
    scores: &'a mut [T],
    labels: &'a [i64],
    shape: [usize; 3],
    config: &LossConfig,
    n_items: Option<usize>,
) -> Result<ReducedLoss<'a, T>> {
    config.validate()?;
    let [batch, seq_len, vocab_size] = shape;
    let rows = batch
        .checked_mul(seq_len)
        .ok_or(CrossEntropyError::ShapeOverflow {
            what: "batch * seq_len",
        })?;
    let elements = rows
        .checked_mul(vocab_size)
        .ok_or(CrossEntropyError::ShapeOverflow {
            what: "batch * seq_len * vocab_size",
        })?;

    if labels.len() != rows {
        return Err(CrossEntropyError::ShapeMismatch {
            what: "labels (batch * seq_len)",
            expected: rows,
            got: labels.len(),
        });
    }
    if scores.len() != elements {
        return Err(CrossEntropyError::ShapeMismatch {
            what: "scores (batch * seq_len * vocab_size)",
            expected: elements,
            got: scores.len(),
        });
    }

    let view = ScoreMatrixMut::new(scores, rows, vocab_size, vocab_size)?;
    let (losses, ctx) = FastCrossEntropyLoss::forward_with(view, labels, config.transform())?;
    let (loss, n_items) = reduce_losses(&losses, labels, n_items)?;

    log::trace!("fast_cross_entropy_loss: rows={} n_items={} loss={}", rows, n_items, loss);

    Ok(ReducedLoss {
        loss,
        n_items,
        losses,
        ctx,
    })
}
