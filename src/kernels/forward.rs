//! Forward kernel: per-row log-sum-exp and loss
//!
//! For one-hot labels the cross-entropy collapses to
//!
//!   CE = -log(softmax(x)[label]) = logsumexp(x) - x[label]
//!
//! so the softmax vector is never formed. The log-sum-exp is stored for
//! every row, ignored or not, because the backward kernel reuses it.

use rayon::prelude::*;

use super::{check_len, validate_labels, IGNORE_INDEX};
use crate::element::LogitElement;
use crate::error::Result;
use crate::kernel_args::CrossEntropyKernelArgs;
use crate::matrix::ScoreMatrix;
use crate::reduce::row_logsumexp;

/// Per-row outputs of the forward kernel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardOutput {
    /// Loss per row; 0.0 for ignored rows.
    pub losses: Vec<f32>,
    /// log-sum-exp of the transformed scores per row.
    pub logsumexp: Vec<f32>,
}

/// Launch the forward kernel over every row of `scores`.
///
/// The score buffer is only read.
pub fn cross_entropy_forward<T: LogitElement>(
    scores: &ScoreMatrix<'_, T>,
    labels: &[i64],
    args: &CrossEntropyKernelArgs,
) -> Result<ForwardOutput> {
    args.validate()?;
    check_len("vocab_size", args.vocab_size, scores.vocab_size())?;
    check_len("row stride", args.row_stride, scores.row_stride())?;
    check_len("labels", scores.rows(), labels.len())?;
    validate_labels(labels, args.vocab_size)?;

    let rows = scores.rows();
    log::debug!(
        "cross_entropy_forward: rows={} vocab={} block={} group={} scale={:?} softcap={:?}",
        rows,
        args.vocab_size,
        args.launch.block_size,
        args.launch.group_size,
        args.transform.do_logit_scaling.then_some(args.transform.logit_scale),
        args.transform.do_softcapping.then_some(args.transform.softcap),
    );

    let mut out = ForwardOutput {
        losses: vec![0.0; rows],
        logsumexp: vec![0.0; rows],
    };
    if rows == 0 {
        return Ok(out);
    }

    let vocab = args.vocab_size;
    scores
        .active()
        .par_chunks(args.row_stride)
        .zip(labels.par_iter())
        .zip(out.losses.par_iter_mut().zip(out.logsumexp.par_iter_mut()))
        .for_each_init(
            || Vec::with_capacity(vocab),
            |scratch, ((row, &label), (loss, lse))| {
                let (row_loss, row_lse) = forward_row(&row[..vocab], label, args, scratch);
                *loss = row_loss;
                *lse = row_lse;
            },
        );

    Ok(out)
}

/// One row: returns `(loss, logsumexp)`.
///
/// `scratch` holds the transformed scores of the row (the block's
/// registers); it is reused across rows handled by the same worker.
fn forward_row<T: LogitElement>(
    row: &[T],
    label: i64,
    args: &CrossEntropyKernelArgs,
    scratch: &mut Vec<f32>,
) -> (f32, f32) {
    let transform = &args.transform;

    scratch.clear();
    scratch.extend(row.iter().map(|&v| transform.apply(v.to_f32())));
    let logsumexp = row_logsumexp(scratch, &args.launch);

    let loss = if label != IGNORE_INDEX {
        // Reload the label's raw score and transform it identically
        let x = transform.apply(row[label as usize].to_f32());
        logsumexp - x
    } else {
        0.0
    };

    (loss, logsumexp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrossEntropyError;
    use crate::transform::LogitTransform;
    use pretty_assertions::assert_eq;

    fn args(vocab: usize, stride: usize, transform: LogitTransform) -> CrossEntropyKernelArgs {
        CrossEntropyKernelArgs::new(vocab, stride, transform).unwrap()
    }

    #[test]
    fn test_two_row_scenario() {
        let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let scores = ScoreMatrix::contiguous(&data, 5).unwrap();
        let out =
            cross_entropy_forward(&scores, &[2, IGNORE_INDEX], &args(5, 5, LogitTransform::identity()))
                .unwrap();

        assert!((out.losses[0] - 2.451_914).abs() < 1e-5, "loss = {}", out.losses[0]);
        assert_eq!(out.losses[1], 0.0);
        // Ignored rows still get a valid logsumexp
        assert!((out.logsumexp[1] - 5.451_914).abs() < 1e-5);
    }

    #[test]
    fn test_scores_untouched() {
        let data = vec![0.5f32, -1.0, 2.0, 0.0];
        let before = data.clone();
        let scores = ScoreMatrix::contiguous(&data, 2).unwrap();
        cross_entropy_forward(&scores, &[0, 1], &args(2, 2, LogitTransform::new(3.0, 2.0)))
            .unwrap();
        assert_eq!(data, before);
    }

    #[test]
    fn test_strided_view_skips_padding() {
        // Padding columns hold huge values that must not leak into the row
        let data = [1.0f32, 2.0, 1e30, 3.0, 4.0];
        let scores = ScoreMatrix::new(&data, 2, 2, 3).unwrap();
        let out =
            cross_entropy_forward(&scores, &[1, 0], &args(2, 3, LogitTransform::identity())).unwrap();
        let expected0 = (1.0f32.exp() + 2.0f32.exp()).ln() - 2.0;
        let expected1 = (3.0f32.exp() + 4.0f32.exp()).ln() - 3.0;
        assert!((out.losses[0] - expected0).abs() < 1e-6);
        assert!((out.losses[1] - expected1).abs() < 1e-6);
    }

    #[test]
    fn test_label_count_mismatch() {
        let data = [0.0f32; 6];
        let scores = ScoreMatrix::contiguous(&data, 3).unwrap();
        let err =
            cross_entropy_forward(&scores, &[0], &args(3, 3, LogitTransform::identity())).unwrap_err();
        assert_eq!(
            err,
            CrossEntropyError::ShapeMismatch {
                what: "labels",
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn test_args_must_match_view() {
        let data = [0.0f32; 6];
        let scores = ScoreMatrix::contiguous(&data, 3).unwrap();
        assert!(cross_entropy_forward(&scores, &[0, 0], &args(2, 3, LogitTransform::identity()))
            .is_err());
    }

    #[test]
    fn test_empty_matrix() {
        let data: [f32; 0] = [];
        let scores = ScoreMatrix::contiguous(&data, 4).unwrap();
        let out = cross_entropy_forward(&scores, &[], &args(4, 4, LogitTransform::identity()))
            .unwrap();
        assert_eq!(out, ForwardOutput::default());
    }
}
