//! Denoise wgpu textures by reading them back into [`Bitmap`]s, running the denoiser, and
//! uploading the result.

use crate::bitmap::{Bitmap, ComponentFormat, PixelFormat};
use crate::config::DenoiserConfig;
use crate::denoiser::denoise;
use crate::device::DenoiserDevice;
use crate::Error;
use std::sync::mpsc;
use tracing::debug;
use wgpu::util::DeviceExt;

/// Supported texture format for denoising input/output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenoiseTextureFormat {
    /// RGBA 32-bit float (4 components). Alpha is preserved.
    Rgba32Float,
    /// RGBA 16-bit float (4 components). Alpha is preserved.
    Rgba16Float,
}

impl DenoiseTextureFormat {
    /// Converts from a wgpu texture format if it is supported for denoising.
    pub fn from_wgpu(format: wgpu::TextureFormat) -> Option<Self> {
        format.try_into().ok()
    }

    fn bytes_per_pixel(self) -> u32 {
        match self {
            DenoiseTextureFormat::Rgba32Float => 16,
            DenoiseTextureFormat::Rgba16Float => 8,
        }
    }

    /// Bitmap component format matching the texture's texels.
    pub fn component_format(self) -> ComponentFormat {
        match self {
            DenoiseTextureFormat::Rgba32Float => ComponentFormat::Float32,
            DenoiseTextureFormat::Rgba16Float => ComponentFormat::Float16,
        }
    }
}

impl TryFrom<wgpu::TextureFormat> for DenoiseTextureFormat {
    type Error = ();

    fn try_from(format: wgpu::TextureFormat) -> Result<Self, Self::Error> {
        match format {
            wgpu::TextureFormat::Rgba32Float => Ok(Self::Rgba32Float),
            wgpu::TextureFormat::Rgba16Float => Ok(Self::Rgba16Float),
            _ => Err(()),
        }
    }
}

/// Optional guide textures, same size and format as the color texture.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextureGuides<'a> {
    pub albedo: Option<&'a wgpu::Texture>,
    /// Shading normals in the renderer's frame; flipped according to
    /// [`DenoiserConfig::flip_normals`].
    pub normal: Option<&'a wgpu::Texture>,
}

/// Row pitch for texture/buffer copies, rounded up to wgpu's copy alignment.
pub(crate) fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let alignment = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * bytes_per_pixel + alignment - 1) / alignment * alignment
}

/// Bytes of a padded copy buffer with `height` rows.
pub(crate) fn upload_size(padded_bytes_per_row: u32, height: u32) -> usize {
    padded_bytes_per_row as usize * height as usize
}

/// Denoises a wgpu texture by readback → denoiser → upload.
///
/// Input and output can be the same texture for in-place denoising, or different.
/// Only RGB is denoised; alpha is preserved.
///
/// **Texture usage:** `input` and the guides must have
/// [`TextureUsages::COPY_SRC`](wgpu::TextureUsages::COPY_SRC); `output` must have
/// [`TextureUsages::COPY_DST`](wgpu::TextureUsages::COPY_DST).
///
/// This is a blocking call: it submits copy commands, waits for readback, runs the denoiser and
/// waits for it, then uploads.
///
/// # Errors
///
/// Returns [`Error::InvalidDimensions`] if texture sizes or array layers are incompatible,
/// [`Error::BufferMapFailed`] if wgpu buffer mapping fails, and any error of [`denoise`].
#[allow(clippy::too_many_arguments)]
pub fn denoise_texture<D: DenoiserDevice + ?Sized>(
    device: &D,
    wgpu_device: &wgpu::Device,
    wgpu_queue: &wgpu::Queue,
    input: &wgpu::Texture,
    output: &wgpu::Texture,
    format: DenoiseTextureFormat,
    config: &DenoiserConfig,
    guides: TextureGuides<'_>,
) -> Result<(), Error> {
    let size = input.size();
    if size.depth_or_array_layers != 1 {
        return Err(Error::InvalidDimensions);
    }
    let same_size = |tex: &wgpu::Texture| {
        let s = tex.size();
        s.width == size.width && s.height == size.height && s.depth_or_array_layers == 1
    };
    if !same_size(output)
        || guides.albedo.is_some_and(|t| !same_size(t))
        || guides.normal.is_some_and(|t| !same_size(t))
    {
        return Err(Error::InvalidDimensions);
    }

    let color = read_texture_to_bitmap(wgpu_device, wgpu_queue, input, format)?;
    let albedo = guides
        .albedo
        .map(|t| read_texture_to_bitmap(wgpu_device, wgpu_queue, t, format))
        .transpose()?;
    let normal = guides
        .normal
        .map(|t| read_texture_to_bitmap(wgpu_device, wgpu_queue, t, format))
        .transpose()?;
    debug!(
        width = size.width,
        height = size.height,
        ?format,
        "texture read back for denoising"
    );

    let denoised = denoise(device, &color, albedo.as_ref(), normal.as_ref(), config)?;
    upload_bitmap_to_texture(wgpu_device, wgpu_queue, output, format, &denoised)
}

/// Reads a wgpu texture to an RGBA bitmap in the texture's component format. Blocking.
pub fn read_texture_to_bitmap(
    wgpu_device: &wgpu::Device,
    wgpu_queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    format: DenoiseTextureFormat,
) -> Result<Bitmap, Error> {
    let size = texture.size();
    let w = size.width;
    let h = size.height;
    let bytes_per_row = w * format.bytes_per_pixel();
    let padded = padded_bytes_per_row(w, format.bytes_per_pixel());

    let read_buffer = wgpu_device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("optix_denoiser readback"),
        size: upload_size(padded, h) as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder =
        wgpu_device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &read_buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(h),
            },
        },
        size,
    );
    wgpu_queue.submit(Some(encoder.finish()));

    let slice = read_buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    loop {
        let _ = wgpu_device.poll(wgpu::PollType::wait_indefinitely());
        match rx.try_recv() {
            Ok(Ok(())) => break,
            Ok(Err(e)) => return Err(Error::BufferMapFailed(e)),
            Err(mpsc::TryRecvError::Disconnected) => {
                return Err(Error::BufferMapFailed(wgpu::BufferAsyncError))
            }
            Err(mpsc::TryRecvError::Empty) => {
                std::thread::sleep(std::time::Duration::from_micros(100))
            }
        }
    }

    let mapped = slice.get_mapped_range();
    let mut data = Vec::with_capacity(bytes_per_row as usize * h as usize);
    for row in mapped.chunks_exact(padded as usize) {
        data.extend_from_slice(&row[..bytes_per_row as usize]);
    }
    drop(mapped);
    read_buffer.unmap();

    Bitmap::from_raw(
        PixelFormat::Rgba,
        format.component_format(),
        w,
        h,
        Vec::new(),
        data,
    )
}

/// Uploads a bitmap to a wgpu texture (padded row alignment), converting it to the texture's
/// RGBA layout first.
pub fn upload_bitmap_to_texture(
    wgpu_device: &wgpu::Device,
    wgpu_queue: &wgpu::Queue,
    output: &wgpu::Texture,
    format: DenoiseTextureFormat,
    bitmap: &Bitmap,
) -> Result<(), Error> {
    let size = output.size();
    if bitmap.width() != size.width || bitmap.height() != size.height {
        return Err(Error::InvalidDimensions);
    }
    let rgba = bitmap.convert(PixelFormat::Rgba, format.component_format())?;
    let w = size.width;
    let h = size.height;
    let bytes_per_row = w * format.bytes_per_pixel();
    let padded = padded_bytes_per_row(w, format.bytes_per_pixel());

    let mut upload_data = vec![0u8; upload_size(padded, h)];
    for (dst, src) in upload_data
        .chunks_exact_mut(padded as usize)
        .zip(rgba.data().chunks_exact(bytes_per_row as usize))
    {
        dst[..bytes_per_row as usize].copy_from_slice(src);
    }
    let write_buffer = wgpu_device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("optix_denoiser upload"),
        contents: &upload_data,
        usage: wgpu::BufferUsages::COPY_SRC,
    });
    let mut enc = wgpu_device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    enc.copy_buffer_to_texture(
        wgpu::TexelCopyBufferInfo {
            buffer: &write_buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(h),
            },
        },
        wgpu::TexelCopyTextureInfo {
            texture: output,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        size,
    );
    wgpu_queue.submit(Some(enc.finish()));
    Ok(())
}
