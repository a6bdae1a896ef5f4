//! HLX Fused Cross-Entropy
//!
//! Row-parallel cross-entropy loss and its gradient for language-model
//! logits, with optional logit scaling and tanh softcapping fused into the
//! same pass.
//!
//! Architecture:
//!   - launch:      block / worker-group sizing per vocabulary size
//!   - kernels:     forward (loss + log-sum-exp) and in-place backward
//!   - autograd:    forward/backward pair with saved context
//!   - loss:        batched entry point with n_items reduction
//!   - reference:   unfused f64 implementation for validation
//!
//! Rows are independent and swept in parallel with rayon; each row's
//! reduction runs in a fixed lane order, so results do not depend on the
//! number of threads.
//!
//! ```no_run
//! use hlx_cross_entropy::{fast_cross_entropy_loss, LossConfig};
//!
//! let mut logits = vec![0.0f32; 2 * 8 * 32000];
//! let labels = vec![7i64; 2 * 8];
//! let config = LossConfig::default().with_softcap(30.0);
//! let out = fast_cross_entropy_loss(&mut logits, &labels, [2, 8, 32000], &config, None)?;
//! println!("loss = {}", out.loss);
//! let grads = out.backward(1.0)?;
//! # let _ = grads;
//! # Ok::<(), hlx_cross_entropy::CrossEntropyError>(())
//! ```

pub mod autograd;
pub mod config;
pub mod element;
pub mod error;
pub mod kernel_args;
pub mod kernels;
pub mod launch;
pub mod loss;
pub mod matrix;
pub mod reduce;
pub mod reference;
pub mod transform;

pub use autograd::{CrossEntropyContext, FastCrossEntropyLoss};
pub use config::LossConfig;
pub use element::LogitElement;
pub use error::{CrossEntropyError, Result};
pub use kernel_args::CrossEntropyKernelArgs;
pub use kernels::{cross_entropy_backward, cross_entropy_forward, ForwardOutput, IGNORE_INDEX};
pub use launch::{calculate_settings, LaunchConfig, MAX_FUSED_SIZE};
pub use loss::{count_items, fast_cross_entropy_loss, reduce_losses, ReducedLoss};
pub use matrix::{ScoreMatrix, ScoreMatrixMut};
pub use transform::LogitTransform;
