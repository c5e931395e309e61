//! Denoiser tunables shared by the one-shot functions, sessions, and the texture integration.

use crate::device::ModelKind;
use crate::Error;
use serde::{Deserialize, Serialize};

/// Options for a denoise call or session.
///
/// Deserializes from JSON (e.g. a scene or script configuration); missing keys take their
/// defaults and unknown keys are rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DenoiserConfig {
    /// Denoiser model. Temporal sessions and [`crate::denoise_temporal`] always use
    /// [`ModelKind::Temporal`].
    pub model: ModelKind,
    /// Compute the input's average log intensity before each invocation.
    pub compute_intensity: bool,
    /// `0.0` = fully denoised, `1.0` = the noisy input.
    pub blend_factor: f32,
    /// Convert normal guides from the renderer's left-handed frame before submission.
    pub flip_normals: bool,
}

impl Default for DenoiserConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Hdr,
            compute_intensity: true,
            blend_factor: 0.0,
            flip_normals: true,
        }
    }
}

impl DenoiserConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if the JSON is malformed or a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.blend_factor) {
            return Err(Error::InvalidConfiguration(format!(
                "blend_factor must be within [0, 1], got {}",
                self.blend_factor
            )));
        }
        Ok(())
    }
}
