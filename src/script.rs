//! Call shapes for a scripting host.
//!
//! Scripts call `denoise(noisy, ...)` either with keyword channel names
//! (`albedo_ch_name=""`, `normals_ch_name=""`, `noisy_ch_name="<root>"`) or with guide images
//! (`albedo=None`, `normals=None`). [`DenoiseArgs`] captures both with the same defaults as the
//! Rust functions they forward to.

use crate::bitmap::Bitmap;
use crate::channels::{denoise_channels, ChannelNames};
use crate::config::DenoiserConfig;
use crate::denoiser::denoise;
use crate::device::DenoiserDevice;
use crate::Error;
use serde_json::{Map, Value};

/// Arguments following `noisy` in a scripted denoise call.
#[derive(Clone, Debug, PartialEq)]
pub enum DenoiseArgs<'a> {
    /// Pick the image and guides from `noisy` by channel name.
    Channels(ChannelNames),
    /// Guides passed as separate images.
    Images {
        albedo: Option<&'a Bitmap>,
        normals: Option<&'a Bitmap>,
    },
}

impl Default for DenoiseArgs<'_> {
    /// A call with no extra arguments: default channel names.
    fn default() -> Self {
        DenoiseArgs::Channels(ChannelNames::default())
    }
}

impl DenoiseArgs<'_> {
    /// Builds the channel-name shape from a script's keyword arguments. Missing keywords take
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for unknown keywords or non-string values.
    pub fn from_kwargs(kwargs: &Map<String, Value>) -> Result<Self, Error> {
        let names: ChannelNames = serde_json::from_value(Value::Object(kwargs.clone()))
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        Ok(DenoiseArgs::Channels(names))
    }

    /// Like [`Self::from_kwargs`], from a JSON object literal.
    pub fn from_kwargs_json(json: &str) -> Result<Self, Error> {
        let names: ChannelNames = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        Ok(DenoiseArgs::Channels(names))
    }
}

/// Dispatches a scripted call to [`denoise_channels`] or [`denoise`].
pub fn call<D: DenoiserDevice + ?Sized>(
    device: &D,
    noisy: &Bitmap,
    args: &DenoiseArgs<'_>,
    config: &DenoiserConfig,
) -> Result<Bitmap, Error> {
    match args {
        DenoiseArgs::Channels(names) => denoise_channels(device, noisy, names, config),
        DenoiseArgs::Images { albedo, normals } => denoise(device, noisy, *albedo, *normals, config),
    }
}
