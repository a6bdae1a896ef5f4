//! Logit pre-transforms: scaling and tanh softcapping
//!
//! Applied to every class score before the reduction, always in the order
//! scale then softcap:
//!
//!   x' = s * x                 (logit scaling, Cohere-style)
//!   x'' = t * tanh(x' / t)     (softcapping, Gemma 2-style)
//!
//! The value 0 disables either transform.

use serde::Serialize;

/// Transform parameters shared by every row and class of one launch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LogitTransform {
    pub do_logit_scaling: bool,
    pub logit_scale: f32,
    pub do_softcapping: bool,
    pub softcap: f32,
}

impl LogitTransform {
    /// Build from raw parameters where 0 means "disabled".
    pub fn new(logit_softcapping: f32, logit_scaling: f32) -> Self {
        Self {
            do_logit_scaling: logit_scaling != 0.0,
            logit_scale: logit_scaling,
            do_softcapping: logit_softcapping != 0.0,
            softcap: logit_softcapping,
        }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        !self.do_logit_scaling && !self.do_softcapping
    }

    /// Transformed score.
    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        self.apply_with_tanh(x).0
    }

    /// Transformed score plus the tanh term needed by the softcap derivative.
    ///
    /// The tanh term is `tanh(s*x / t)`; it is 0 when softcapping is off and
    /// is not used by [`LogitTransform::chain`] in that case.
    #[inline]
    pub fn apply_with_tanh(&self, x: f32) -> (f32, f32) {
        let mut x = x;
        if self.do_logit_scaling {
            x *= self.logit_scale;
        }
        if self.do_softcapping {
            let tanh_term = (x / self.softcap).tanh();
            (self.softcap * tanh_term, tanh_term)
        } else {
            (x, 0.0)
        }
    }

    /// Pull a gradient w.r.t. the transformed score back to the raw score.
    ///
    /// d/dx [t * tanh(x/t)] = 1 - tanh^2(x/t), then d/dx [s * x] = s.
    #[inline]
    pub fn chain(&self, grad: f32, tanh_term: f32) -> f32 {
        let mut grad = grad;
        if self.do_softcapping {
            grad *= 1.0 - tanh_term * tanh_term;
        }
        if self.do_logit_scaling {
            grad *= self.logit_scale;
        }
        grad
    }
}
