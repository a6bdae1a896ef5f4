//! Unfused CPU reference
//!
//! Straightforward f64 versions of the loss and its gradient, used to check
//! the fused kernels. Every row is transformed, fully log-softmaxed and
//! differentiated without sharing anything with the kernel code paths, so a
//! bug in one does not hide in the other.
//!
//! Scores are contiguous `rows x vocab_size`.

use crate::kernels::IGNORE_INDEX;
use crate::transform::LogitTransform;

fn scale_of(transform: &LogitTransform) -> f64 {
    if transform.do_logit_scaling {
        transform.logit_scale as f64
    } else {
        1.0
    }
}

fn softcap_of(transform: &LogitTransform) -> Option<f64> {
    transform.do_softcapping.then_some(transform.softcap as f64)
}

/// Scale then softcap one row, widened to f64.
pub fn transformed_scores(row: &[f32], transform: &LogitTransform) -> Vec<f64> {
    let scale = scale_of(transform);
    let softcap = softcap_of(transform);
    row.iter()
        .map(|&x| {
            let x = x as f64 * scale;
            match softcap {
                Some(t) => t * (x / t).tanh(),
                None => x,
            }
        })
        .collect()
}

/// Row-wise log-softmax with max subtraction.
pub fn log_softmax(row: &[f64]) -> Vec<f64> {
    let max_val = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp_sum: f64 = row.iter().map(|&x| (x - max_val).exp()).sum();
    let log_sum = max_val + exp_sum.ln();
    row.iter().map(|&x| x - log_sum).collect()
}

/// Per-row losses; 0.0 for ignored rows.
pub fn reference_row_losses(
    scores: &[f32],
    labels: &[i64],
    vocab_size: usize,
    transform: &LogitTransform,
) -> Vec<f64> {
    labels
        .iter()
        .enumerate()
        .map(|(pos, &label)| {
            if label == IGNORE_INDEX {
                return 0.0;
            }
            let offset = pos * vocab_size;
            let row = transformed_scores(&scores[offset..offset + vocab_size], transform);
            -log_softmax(&row)[label as usize]
        })
        .collect()
}

/// Mean loss over non-ignored rows (0.0 if there are none).
pub fn reference_cross_entropy_loss(
    scores: &[f32],
    labels: &[i64],
    vocab_size: usize,
    transform: &LogitTransform,
) -> f64 {
    let losses = reference_row_losses(scores, labels, vocab_size, transform);
    let valid = labels.iter().filter(|&&l| l != IGNORE_INDEX).count();
    if valid == 0 {
        0.0
    } else {
        losses.iter().sum::<f64>() / valid as f64
    }
}

/// Gradient of `sum(dlosses[r] * loss[r])` w.r.t. the raw scores.
pub fn reference_gradient(
    scores: &[f32],
    labels: &[i64],
    vocab_size: usize,
    transform: &LogitTransform,
    dlosses: &[f64],
) -> Vec<f64> {
    let scale = scale_of(transform);
    let softcap = softcap_of(transform);
    let mut grad = vec![0.0f64; labels.len() * vocab_size];

    for (pos, &label) in labels.iter().enumerate() {
        if label == IGNORE_INDEX {
            continue;
        }
        let offset = pos * vocab_size;
        let raw = &scores[offset..offset + vocab_size];
        let log_probs = log_softmax(&transformed_scores(raw, transform));

        for i in 0..vocab_size {
            let one_hot = if i == label as usize { 1.0 } else { 0.0 };
            let d_transformed = log_probs[i].exp() - one_hot;

            // d(t * tanh(s*x/t))/dx = s * sech^2(s*x/t)
            let d_raw = match softcap {
                Some(t) => {
                    let sech = 1.0 / (raw[i] as f64 * scale / t).cosh();
                    scale * sech * sech
                }
                None => scale,
            };
            grad[offset + i] = dlosses[pos] * d_transformed * d_raw;
        }
    }

    grad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_softmax_normalizes() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f64 = lp.iter().map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_two_row_scenario() {
        let scores = [1.0f32, 2.0, 3.0, 4.0, 5.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let labels = [2, IGNORE_INDEX];
        let t = LogitTransform::identity();
        let losses = reference_row_losses(&scores, &labels, 5, &t);
        assert!((losses[0] - 2.451_914_395).abs() < 1e-8);
        assert_eq!(losses[1], 0.0);
        let mean = reference_cross_entropy_loss(&scores, &labels, 5, &t);
        assert!((mean - losses[0]).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let scores = [0.4f32, -1.1, 2.3, 0.0, 1.7, -0.6];
        let labels = [1, 2];
        let t = LogitTransform::new(3.0, 1.5);
        let grad = reference_gradient(&scores, &labels, 3, &t, &[1.0, 1.0]);

        let total = |s: &[f32]| reference_row_losses(s, &labels, 3, &t).iter().sum::<f64>();
        let h = 1e-2f32;
        for i in 0..scores.len() {
            let mut plus = scores;
            let mut minus = scores;
            plus[i] += h;
            minus[i] -= h;
            let numeric = (total(&plus) - total(&minus)) / (2.0 * h as f64);
            assert!(
                (numeric - grad[i]).abs() < 1e-3,
                "i={} numeric={} analytic={}",
                i,
                numeric,
                grad[i]
            );
        }
    }

    #[test]
    fn test_ignored_rows_contribute_nothing() {
        let scores = [1.0f32, 2.0, 3.0, 4.0];
        let labels = [IGNORE_INDEX, IGNORE_INDEX];
        let t = LogitTransform::identity();
        assert_eq!(reference_cross_entropy_loss(&scores, &labels, 2, &t), 0.0);
        assert_eq!(reference_gradient(&scores, &labels, 2, &t, &[1.0, 1.0]), vec![0.0; 4]);
    }
}
