//! Selecting the beauty, albedo and normal passes of a composite render by channel name.

use crate::bitmap::{Bitmap, ROOT_CHANNEL};
use crate::config::DenoiserConfig;
use crate::denoiser::denoise;
use crate::device::DenoiserDevice;
use crate::Error;
use serde::{Deserialize, Serialize};

/// Names of the sub-images to pull out of a composite bitmap.
///
/// An empty guide name means "no such guide". The keyword names match the scripting surface
/// (`albedo_ch_name`, `normals_ch_name`, `noisy_ch_name`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelNames {
    #[serde(rename = "albedo_ch_name")]
    pub albedo: String,
    #[serde(rename = "normals_ch_name")]
    pub normals: String,
    /// The image to denoise. Empty is treated as [`ROOT_CHANNEL`].
    #[serde(rename = "noisy_ch_name")]
    pub noisy: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            albedo: String::new(),
            normals: String::new(),
            noisy: ROOT_CHANNEL.to_string(),
        }
    }
}

impl ChannelNames {
    pub fn new(albedo: &str, normals: &str, noisy: &str) -> Self {
        Self {
            albedo: albedo.to_string(),
            normals: normals.to_string(),
            noisy: noisy.to_string(),
        }
    }
}

/// Sub-images selected from a composite.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub noisy: Bitmap,
    pub albedo: Option<Bitmap>,
    pub normals: Option<Bitmap>,
}

/// Splits `composite` with [`Bitmap::split`] and picks the requested sub-images.
///
/// Lookup is by name only, so the result does not depend on channel order. A bitmap that is
/// not multi-channel consists of a single [`ROOT_CHANNEL`] entry.
///
/// # Errors
///
/// Returns [`Error::ChannelNotFound`], naming the channel and listing the composite's channels,
/// if the noisy name or a non-empty guide name is absent.
pub fn select(composite: &Bitmap, names: &ChannelNames) -> Result<Selection, Error> {
    let parts = composite.split();
    let take = |name: &str| -> Result<Bitmap, Error> {
        match parts.iter().position(|(n, _)| n == name) {
            Some(index) => Ok(parts[index].1.clone()),
            None => Err(Error::ChannelNotFound {
                channel: name.to_string(),
                available: composite.to_string(),
            }),
        }
    };

    let noisy_name = if names.noisy.is_empty() {
        ROOT_CHANNEL
    } else {
        names.noisy.as_str()
    };
    let noisy = take(noisy_name)?;
    let albedo = (!names.albedo.is_empty())
        .then(|| take(&names.albedo))
        .transpose()?;
    let normals = (!names.normals.is_empty())
        .then(|| take(&names.normals))
        .transpose()?;

    Ok(Selection {
        noisy,
        albedo,
        normals,
    })
}

/// Denoises the `names.noisy` sub-image of `composite`, guided by the named albedo and normal
/// sub-images. The result has the format of the selected noisy sub-image.
pub fn denoise_channels<D: DenoiserDevice + ?Sized>(
    device: &D,
    composite: &Bitmap,
    names: &ChannelNames,
    config: &DenoiserConfig,
) -> Result<Bitmap, Error> {
    let selection = select(composite, names)?;
    denoise(
        device,
        &selection.noisy,
        selection.albedo.as_ref(),
        selection.normals.as_ref(),
        config,
    )
}
