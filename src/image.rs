//! Conversion between renderer bitmaps and the packed float layouts the backend consumes.

use crate::bitmap::{Bitmap, ComponentFormat, PixelFormat};
use crate::Error;

/// Beauty image staged as packed RGB `f32`, with its alpha plane split off when present.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StagedColor {
    pub rgb: Vec<f32>,
    pub alpha: Option<Vec<f32>>,
}

/// Stages a beauty (or previous output) image. Alpha never goes to the backend; it is carried
/// on the host and re-attached by [`restore_output`].
pub(crate) fn stage_color(bitmap: &Bitmap) -> Result<StagedColor, Error> {
    if bitmap.pixel_format().has_alpha() {
        let rgba = bitmap
            .convert(PixelFormat::Rgba, ComponentFormat::Float32)?
            .to_f32();
        let mut rgb = Vec::with_capacity(bitmap.pixel_count() * 3);
        let mut alpha = Vec::with_capacity(bitmap.pixel_count());
        for px in rgba.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
            alpha.push(px[3]);
        }
        return Ok(StagedColor {
            rgb,
            alpha: Some(alpha),
        });
    }
    let rgb = bitmap
        .convert(PixelFormat::Rgb, ComponentFormat::Float32)?
        .to_f32();
    Ok(StagedColor { rgb, alpha: None })
}

pub(crate) fn stage_albedo(bitmap: &Bitmap) -> Result<Vec<f32>, Error> {
    Ok(bitmap
        .convert(PixelFormat::Rgb, ComponentFormat::Float32)?
        .to_f32())
}

/// Stages a shading-normal image as packed XYZ `f32`, optionally applying [`flip_normals`].
pub(crate) fn stage_normals(bitmap: &Bitmap, flip: bool) -> Result<Vec<f32>, Error> {
    let mut normals = bitmap
        .convert(PixelFormat::Xyz, ComponentFormat::Float32)?
        .to_f32();
    if flip {
        flip_normals(&mut normals);
    }
    Ok(normals)
}

/// Stages a motion-flow image: the first two channels of every pixel as packed `f32` pairs.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] if the image has fewer than two channels.
pub(crate) fn stage_flow(bitmap: &Bitmap) -> Result<Vec<f32>, Error> {
    let channels = bitmap.channel_count();
    if channels < 2 {
        return Err(Error::UnsupportedFormat);
    }
    Ok(bitmap
        .to_f32()
        .chunks_exact(channels)
        .flat_map(|px| [px[0], px[1]])
        .collect())
}

/// Converts packed XYZ normals from the renderer's left-handed frame to the denoiser's
/// right-handed, y-up frame by negating X and Z. Y is left untouched.
pub fn flip_normals(normals: &mut [f32]) {
    for n in normals.chunks_exact_mut(3) {
        n[0] = -n[0];
        n[2] = -n[2];
    }
}

/// Wraps denoised RGB samples into a bitmap with the same size, pixel format, component format
/// and channels as `like`.
///
/// Multi-channel inputs keep their extra channels unchanged. The denoised color goes into the
/// channels named `R`, `G`, `B`, or into the leading three when there are no such names, the same
/// channels [`stage_color`] read it from.
pub(crate) fn restore_output(
    rgb: &[f32],
    alpha: Option<&[f32]>,
    like: &Bitmap,
) -> Result<Bitmap, Error> {
    if rgb.len() != like.pixel_count() * 3 {
        return Err(Error::InvalidDimensions);
    }

    if like.pixel_format() == PixelFormat::MultiChannel {
        let channels = like.channel_count();
        let targets = like
            .named_channels(PixelFormat::Rgb.channel_names())
            .unwrap_or_else(|| (0..channels.min(3)).collect());
        let mut samples = like.to_f32();
        for (px, color) in samples.chunks_exact_mut(channels.max(1)).zip(rgb.chunks_exact(3)) {
            for (value, &channel) in color.iter().zip(&targets) {
                px[channel] = *value;
            }
        }
        return Bitmap::from_samples(
            PixelFormat::MultiChannel,
            like.component_format(),
            like.width(),
            like.height(),
            like.channel_names().to_vec(),
            &samples,
        );
    }

    let denoised = match alpha {
        Some(alpha) => {
            let mut rgba = Vec::with_capacity(like.pixel_count() * 4);
            for (color, a) in rgb.chunks_exact(3).zip(alpha) {
                rgba.extend_from_slice(color);
                rgba.push(*a);
            }
            Bitmap::from_f32(PixelFormat::Rgba, like.width(), like.height(), &rgba)?
        }
        None => Bitmap::from_f32(PixelFormat::Rgb, like.width(), like.height(), rgb)?,
    };
    denoised.convert(like.pixel_format(), like.component_format())
}
