//! Differentiable-function wrapper around the fused kernels
//!
//! `forward` launches the forward kernel and returns the per-row losses
//! together with a [`CrossEntropyContext`]. The context keeps the exclusive
//! borrow of the score buffer, the log-sum-exp, the labels and the transform
//! for exactly one backward call; `backward` consumes it, overwrites the
//! scores with their gradient and hands the buffer back.
//!
//! Because backward is a method on a value only forward can produce, a
//! backward without a matching forward cannot be expressed, and nothing else
//! can read the scores while the context is alive.

use crate::element::LogitElement;
use crate::error::{CrossEntropyError, Result};
use crate::kernel_args::CrossEntropyKernelArgs;
use crate::kernels::{cross_entropy_backward, cross_entropy_forward};
use crate::launch::LaunchConfig;
use crate::matrix::ScoreMatrixMut;
use crate::transform::LogitTransform;

/// Fused cross-entropy as a forward/backward pair.
pub struct FastCrossEntropyLoss;

impl FastCrossEntropyLoss {
    /// Per-row losses plus the state backward needs.
    ///
    /// `logit_softcapping` and `logit_scaling` of 0 disable the transform.
    pub fn forward<'a, T: LogitElement>(
        scores: ScoreMatrixMut<'a, T>,
        labels: &'a [i64],
        logit_softcapping: f32,
        logit_scaling: f32,
    ) -> Result<(Vec<f32>, CrossEntropyContext<'a, T>)> {
        let transform = LogitTransform::new(logit_softcapping, logit_scaling);
        Self::forward_with(scores, labels, transform)
    }

    pub fn forward_with<'a, T: LogitElement>(
        scores: ScoreMatrixMut<'a, T>,
        labels: &'a [i64],
        transform: LogitTransform,
    ) -> Result<(Vec<f32>, CrossEntropyContext<'a, T>)> {
        let args = CrossEntropyKernelArgs::new(scores.vocab_size(), scores.row_stride(), transform)?;
        let out = cross_entropy_forward(&scores.as_view(), labels, &args)?;

        let ctx = CrossEntropyContext {
            scores,
            logsumexp: out.logsumexp,
            labels,
            args,
        };
        Ok((out.losses, ctx))
    }
}

/// Saved state between one forward and its backward.
pub struct CrossEntropyContext<'a, T> {
    scores: ScoreMatrixMut<'a, T>,
    logsumexp: Vec<f32>,
    labels: &'a [i64],
    args: CrossEntropyKernelArgs,
}

impl<'a, T: LogitElement> CrossEntropyContext<'a, T> {
    pub fn rows(&self) -> usize {
        self.scores.rows()
    }

    pub fn logsumexp(&self) -> &[f32] {
        &self.logsumexp
    }

    pub fn transform(&self) -> LogitTransform {
        self.args.transform
    }

    pub fn launch(&self) -> LaunchConfig {
        self.args.launch
    }

    /// Gradient w.r.t. the scores for one upstream value per row.
    pub fn backward(self, dlosses: &[f32]) -> Result<ScoreMatrixMut<'a, T>> {
        if dlosses.len() != self.rows() {
            return Err(CrossEntropyError::ShapeMismatch {
                what: "upstream gradient rows",
                expected: self.rows(),
                got: dlosses.len(),
            });
        }
        self.backward_strided(dlosses, 1)
    }

    /// Like [`CrossEntropyContext::backward`] with an explicit element
    /// stride into `dlosses` (0 broadcasts a single value).
    pub fn backward_strided(
        self,
        dlosses: &[f32],
        dloss_row_stride: usize,
    ) -> Result<ScoreMatrixMut<'a, T>> {
        let Self {
            mut scores,
            logsumexp,
            labels,
            args,
        } = self;
        cross_entropy_backward(
            &mut scores,
            dlosses,
            dloss_row_stride,
            &logsumexp,
            labels,
            &args,
        )?;
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::IGNORE_INDEX;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_forward_backward_roundtrip() {
        let mut data = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let labels = [2i64, IGNORE_INDEX];
        let scores = ScoreMatrixMut::contiguous(&mut data, 5).unwrap();

        let (losses, ctx) = FastCrossEntropyLoss::forward(scores, &labels, 0.0, 0.0).unwrap();
        assert!((losses[0] - 2.451_914).abs() < 1e-5);
        assert_eq!(losses[1], 0.0);
        assert_eq!(ctx.rows(), 2);
        assert_eq!(ctx.launch().block_size, 8);
        assert!(ctx.transform().is_identity());

        let grad = ctx.backward(&[1.0, 1.0]).unwrap();
        assert!(grad.row(0)[2] < 0.0);
        assert_eq!(grad.row(1), &[0.0; 5]);
    }

    #[test]
    fn test_backward_row_count_mismatch() {
        let mut data = vec![0.0f32; 6];
        let labels = [0i64, 1];
        let scores = ScoreMatrixMut::contiguous(&mut data, 3).unwrap();
        let (_, ctx) = FastCrossEntropyLoss::forward(scores, &labels, 0.0, 0.0).unwrap();
        let err = ctx.backward(&[1.0, 1.0, 1.0]).err().unwrap();
        assert_eq!(
            err,
            CrossEntropyError::ShapeMismatch {
                what: "upstream gradient rows",
                expected: 2,
                got: 3
            }
        );
    }

    #[test]
    fn test_oversized_vocab_fails_before_launch() {
        let vocab = crate::launch::MAX_FUSED_SIZE + 1;
        let mut data = vec![0.0f32; vocab];
        let labels = [0i64];
        let scores = ScoreMatrixMut::contiguous(&mut data, vocab).unwrap();
        assert!(matches!(
            FastCrossEntropyLoss::forward(scores, &labels, 0.0, 0.0).err(),
            Some(CrossEntropyError::Configuration { .. })
        ));
    }

    #[test]
    fn test_oversized_upstream_stride_is_an_error() {
        let mut data = vec![1.0f32, 2.0, 3.0, 4.0];
        let labels = [1i64, 0];
        let scores = ScoreMatrixMut::contiguous(&mut data, 2).unwrap();
        let (_, ctx) = FastCrossEntropyLoss::forward(scores, &labels, 0.0, 0.0).unwrap();
        assert!(matches!(
            ctx.backward_strided(&[1.0], usize::MAX).err(),
            Some(CrossEntropyError::ShapeOverflow { .. })
        ));
    }
}
