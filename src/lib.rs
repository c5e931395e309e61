//! # optix-denoiser
//!
//! [NVIDIA OptiX](https://developer.nvidia.com/optix-denoiser) AI denoiser adapter for renderer
//! bitmaps. Hands a noisy [`Bitmap`] (plus optional albedo, normal, flow and previous-frame
//! guides) to the GPU denoiser and returns a denoised bitmap in the same format.
//!
//! The GPU side sits behind the [`DenoiserDevice`] trait. The `optix` feature provides
//! `optix::OptixDevice`, backed by the OptiX 7 denoiser on a CUDA stream.
//!
//! ## Setup
//!
//! With the `optix` feature, install the CUDA toolkit and the OptiX SDK and set **`OPTIX_ROOT`**
//! to the SDK directory (containing `include/optix.h`).
//!
//! ## Example: denoise a bitmap
//!
//! ```ignore
//! # use std::error::Error;
//! # fn main() -> Result<(), Box<dyn Error>> {
//! use optix_denoiser::{denoise, optix::OptixDevice, DenoiserConfig};
//!
//! let device = OptixDevice::new()?;
//! let denoised = denoise(&device, &noisy, Some(&albedo), Some(&normals), &DenoiserConfig::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Example: pick passes from a composite render
//!
//! ```ignore
//! # use std::error::Error;
//! # fn main() -> Result<(), Box<dyn Error>> {
//! use optix_denoiser::{denoise_channels, ChannelNames, DenoiserConfig};
//!
//! // Channels "R", "G", "B", "albedo.R", ..., "nn.X", "nn.Y", "nn.Z"
//! let names = ChannelNames::new("albedo", "nn", "<root>");
//! let denoised = denoise_channels(&device, &composite, &names, &DenoiserConfig::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Example: temporal session
//!
//! ```ignore
//! # use std::error::Error;
//! # fn main() -> Result<(), Box<dyn Error>> {
//! use optix_denoiser::{Denoiser, DenoiserConfig, DenoiserSettings, Guides};
//!
//! let settings = DenoiserSettings { albedo: true, normals: true, temporal: true };
//! let mut session = Denoiser::new(&device, width, height, settings, DenoiserConfig::default())?;
//! let mut previous = None;
//! for frame in &frames {
//!     let out = session.denoise(
//!         &frame.color,
//!         Guides {
//!             albedo: Some(&frame.albedo),
//!             normals: Some(&frame.normals),
//!             previous: previous.as_ref(),
//!             flow: Some(&frame.flow),
//!         },
//!     )?;
//!     previous = Some(out);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bitmap;
pub mod buffer;
pub mod channels;
pub mod config;
pub mod denoiser;
pub mod device;
pub mod error;
mod image;
pub mod script;
pub mod wgpu_integration;

#[cfg(feature = "optix")]
pub mod optix;

#[cfg(test)]
mod tests;

pub use bitmap::{Bitmap, ComponentFormat, PixelFormat, ROOT_CHANNEL};
pub use buffer::DeviceBuffer;
pub use channels::{denoise_channels, select, ChannelNames, Selection};
pub use config::DenoiserConfig;
pub use denoiser::{denoise, denoise_temporal, Denoiser, DenoiserSettings, Guides};
pub use device::{
    DenoiserDevice, DenoiserHandle, DenoiserOptions, DenoiserParams, DenoiserSizes, DevicePtr,
    DeviceSpan, GuideLayer, Image2D, ImageFormat, Layer, ModelKind,
};
pub use error::Error;
pub use image::flip_normals;
pub use script::DenoiseArgs;
pub use wgpu_integration::{
    denoise_texture, read_texture_to_bitmap, upload_bitmap_to_texture, DenoiseTextureFormat,
    TextureGuides,
};
