//! Loss configuration
//!
//! Which transforms a given model architecture enables is decided by the
//! caller; this only carries and validates the values.

use serde::{Deserialize, Serialize};

use crate::error::{CrossEntropyError, Result};
use crate::transform::LogitTransform;

/// Transform parameters for one loss invocation. 0 disables a transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Softcap `t` in `t * tanh(x / t)`.
    pub logit_softcapping: f32,
    /// Multiplicative logit scale.
    pub logit_scaling: f32,
}

impl LossConfig {
    pub fn with_softcap(mut self, softcap: f32) -> Self {
        self.logit_softcapping = softcap;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.logit_scaling = scale;
        self
    }

    /// Parse and validate a JSON object such as `{"logit_softcapping": 30.0}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.logit_softcapping.is_finite() || self.logit_softcapping < 0.0 {
            return Err(CrossEntropyError::Config(format!(
                "logit_softcapping must be finite and non-negative, got {}",
                self.logit_softcapping
            )));
        }
        if !self.logit_scaling.is_finite() {
            return Err(CrossEntropyError::Config(format!(
                "logit_scaling must be finite, got {}",
                self.logit_scaling
            )));
        }
        Ok(())
    }

    pub fn transform(&self) -> LogitTransform {
        LogitTransform::new(self.logit_softcapping, self.logit_scaling)
    }
}
