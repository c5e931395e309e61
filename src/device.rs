//! The GPU denoising service seen by the adapter: raw device addresses, the image/layer
//! descriptors the vendor library consumes, and the [`DenoiserDevice`] trait every backend
//! implements.
//!
//! Implementors own the context and the single command stream all calls are issued on.
//! Every fallible call is checked and reported as [`Error::Backend`]; nothing is retried.

use crate::Error;
use serde::{Deserialize, Serialize};

/// Raw device address. `0` is null.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A device allocation passed by address and size (state and scratch memory).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceSpan {
    pub ptr: DevicePtr,
    pub len: usize,
}

/// Opaque handle to a denoiser created by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DenoiserHandle(pub u64);

/// Built-in denoiser models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Low dynamic range input.
    Ldr,
    /// High dynamic range input.
    #[default]
    Hdr,
    /// High dynamic range input, temporally stable; consumes the previous output and a flow field.
    Temporal,
}

/// Guide channels a denoiser is created for. All false by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DenoiserOptions {
    pub guide_albedo: bool,
    pub guide_normal: bool,
}

/// Memory requirements reported by the backend for a given resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DenoiserSizes {
    pub state_size_in_bytes: usize,
    pub scratch_size_in_bytes_with_overlap: usize,
    pub scratch_size_in_bytes_without_overlap: usize,
    pub overlap_window_size_in_pixels: u32,
}

/// Per-invocation parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DenoiserParams {
    /// Device `f32` holding the average log intensity, or null to skip exposure normalization.
    pub hdr_intensity: DevicePtr,
    /// `0.0` = fully denoised, `1.0` = the noisy input.
    pub blend_factor: f32,
    /// Temporal model only: whether the previous invocation's internal layers are valid.
    pub temporal_use_previous_layers: bool,
}

/// Pixel formats the backend accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Two 16-bit half values, XY
    Half2,
    /// Three 16-bit half values, RGB
    Half3,
    /// Four 16-bit half values, RGBA
    Half4,
    /// Two 32-bit float values, XY
    Float2,
    /// Three 32-bit float values, RGB
    Float3,
    /// Four 32-bit float values, RGBA
    Float4,
}

impl ImageFormat {
    pub fn byte_size(self) -> u32 {
        match self {
            Self::Half2 => 4,
            Self::Half3 => 6,
            Self::Half4 | Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }
}

/// Strided 2D image in device memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Image2D {
    pub data: DevicePtr,
    pub width: u32,
    pub height: u32,
    pub row_stride_in_bytes: u32,
    pub pixel_stride_in_bytes: u32,
    pub format: ImageFormat,
}

impl Image2D {
    /// A tightly packed image: pixel stride is the format size, row stride `width` pixels.
    pub fn packed(data: DevicePtr, format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            row_stride_in_bytes: width * format.byte_size(),
            pixel_stride_in_bytes: format.byte_size(),
            format,
        }
    }

    /// The amount of memory in bytes required for an image of a certain width, format, and height
    pub fn required_buffer_size(format: ImageFormat, width: u32, height: u32) -> usize {
        width as usize * height as usize * format.byte_size() as usize
    }

    pub fn byte_size(&self) -> usize {
        self.row_stride_in_bytes as usize * self.height as usize
    }
}

/// Guide images shared by all layers of an invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GuideLayer {
    pub albedo: Option<Image2D>,
    pub normal: Option<Image2D>,
    /// Per-pixel motion from the previous to the current frame, in pixels (temporal only).
    pub flow: Option<Image2D>,
}

/// The beauty layer of an invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layer {
    pub input: Image2D,
    /// Previous frame's denoised output (temporal only).
    pub previous_output: Option<Image2D>,
    pub output: Image2D,
}

/// A GPU denoising service: device memory, a stream, and the vendor denoiser protocol
/// (create, size, set up, compute intensity, invoke).
///
/// Copies and denoiser calls are enqueued on the implementor's stream; [`Self::synchronize`]
/// blocks until it drains. [`Self::copy_to_host`] is synchronous with respect to work already
/// enqueued.
pub trait DenoiserDevice {
    /// Allocates `byte_size` bytes of device memory.
    fn alloc(&self, byte_size: usize) -> Result<DevicePtr, Error>;

    /// Releases memory returned by [`Self::alloc`]. Failures are logged, not returned.
    fn free(&self, ptr: DevicePtr);

    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), Error>;

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8]) -> Result<(), Error>;

    /// Waits until all work issued on the device's stream has completed.
    fn synchronize(&self) -> Result<(), Error>;

    fn create_denoiser(
        &self,
        kind: ModelKind,
        options: DenoiserOptions,
    ) -> Result<DenoiserHandle, Error>;

    /// Destroys a handle from [`Self::create_denoiser`]. Failures are logged, not returned.
    fn destroy_denoiser(&self, handle: DenoiserHandle);

    fn compute_memory_resources(
        &self,
        handle: DenoiserHandle,
        width: u32,
        height: u32,
    ) -> Result<DenoiserSizes, Error>;

    fn setup(
        &self,
        handle: DenoiserHandle,
        width: u32,
        height: u32,
        state: DeviceSpan,
        scratch: DeviceSpan,
    ) -> Result<(), Error>;

    /// Writes the average log intensity of `input` into the device `f32` at `intensity`.
    fn compute_intensity(
        &self,
        handle: DenoiserHandle,
        input: &Image2D,
        intensity: DevicePtr,
        scratch: DeviceSpan,
    ) -> Result<(), Error>;

    fn invoke(
        &self,
        handle: DenoiserHandle,
        params: &DenoiserParams,
        state: DeviceSpan,
        guide: &GuideLayer,
        layer: &Layer,
        scratch: DeviceSpan,
    ) -> Result<(), Error>;
}
