//! [`DenoiserDevice`] backed by the OptiX 7 denoiser on a CUDA stream.
//!
//! Calls go straight to the raw `optixDenoiser*` entry points so that device memory stays under
//! the adapter's control ([`crate::DeviceBuffer`]).

use crate::device::{
    DenoiserDevice, DenoiserHandle, DenoiserOptions, DenoiserParams, DenoiserSizes, DevicePtr,
    DeviceSpan, GuideLayer, Image2D, ImageFormat, Layer, ModelKind,
};
use crate::Error;
use optix::context::DeviceContext;
use optix::cust::context::Context;
use optix::cust::memory::{cuda_free, cuda_malloc, memcpy_dtoh, memcpy_htod, DevicePointer};
use optix::cust::stream::{Stream, StreamFlags};
use optix::{optix_call, sys};
use std::ffi::c_void;
use std::mem::MaybeUninit;
use tracing::{info, warn};

/// An OptiX device context on the first CUDA device, with its own stream.
///
/// Field order matters: the stream and OptiX context are released before the CUDA context.
pub struct OptixDevice {
    stream: Stream,
    ctx: DeviceContext,
    _cuda: Context,
}

impl std::fmt::Debug for OptixDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptixDevice").finish_non_exhaustive()
    }
}

impl OptixDevice {
    /// Initializes CUDA and OptiX and creates a context on device 0.
    pub fn new() -> Result<Self, Error> {
        let cuda = optix::cust::quick_init().map_err(|e| Error::backend("cuInit", e))?;
        optix::init().map_err(|e| Error::backend("optixInit", e))?;
        let ctx = DeviceContext::new(&cuda)
            .map_err(|e| Error::backend("optixDeviceContextCreate", e))?;
        // The legacy default stream orders synchronous copies with denoiser work.
        let stream = Stream::new(StreamFlags::DEFAULT, None)
            .map_err(|e| Error::backend("cuStreamCreate", e))?;
        info!("OptiX device context created");
        Ok(Self {
            stream,
            ctx,
            _cuda: cuda,
        })
    }

    fn raw_handle(handle: DenoiserHandle) -> sys::OptixDenoiser {
        handle.0 as usize as sys::OptixDenoiser
    }
}

fn model_kind(kind: ModelKind) -> sys::OptixDenoiserModelKind::Type {
    match kind {
        ModelKind::Ldr => sys::OptixDenoiserModelKind::OPTIX_DENOISER_MODEL_KIND_LDR,
        ModelKind::Hdr => sys::OptixDenoiserModelKind::OPTIX_DENOISER_MODEL_KIND_HDR,
        ModelKind::Temporal => sys::OptixDenoiserModelKind::OPTIX_DENOISER_MODEL_KIND_TEMPORAL,
    }
}

fn pixel_format(format: ImageFormat) -> sys::OptixPixelFormat::Type {
    match format {
        ImageFormat::Half2 => sys::OptixPixelFormat::OPTIX_PIXEL_FORMAT_HALF2,
        ImageFormat::Half3 => sys::OptixPixelFormat::OPTIX_PIXEL_FORMAT_HALF3,
        ImageFormat::Half4 => sys::OptixPixelFormat::OPTIX_PIXEL_FORMAT_HALF4,
        ImageFormat::Float2 => sys::OptixPixelFormat::OPTIX_PIXEL_FORMAT_FLOAT2,
        ImageFormat::Float3 => sys::OptixPixelFormat::OPTIX_PIXEL_FORMAT_FLOAT3,
        ImageFormat::Float4 => sys::OptixPixelFormat::OPTIX_PIXEL_FORMAT_FLOAT4,
    }
}

fn raw_image(image: &Image2D) -> sys::OptixImage2D {
    sys::OptixImage2D {
        data: image.data.0,
        width: image.width,
        height: image.height,
        rowStrideInBytes: image.row_stride_in_bytes,
        pixelStrideInBytes: image.pixel_stride_in_bytes,
        format: pixel_format(image.format),
    }
}

// OptixPixelFormat has no zero value, so an empty image still names a format.
fn null_image() -> sys::OptixImage2D {
    sys::OptixImage2D {
        data: 0,
        width: 0,
        height: 0,
        rowStrideInBytes: 0,
        pixelStrideInBytes: 0,
        format: sys::OptixPixelFormat::OPTIX_PIXEL_FORMAT_FLOAT2,
    }
}

fn optional_image(image: Option<&Image2D>) -> sys::OptixImage2D {
    image.map(raw_image).unwrap_or_else(null_image)
}

impl DenoiserDevice for OptixDevice {
    fn alloc(&self, byte_size: usize) -> Result<DevicePtr, Error> {
        let ptr = unsafe { cuda_malloc::<u8>(byte_size) }
            .map_err(|e| Error::backend("cuMemAlloc", e))?;
        Ok(DevicePtr(ptr.as_raw()))
    }

    fn free(&self, ptr: DevicePtr) {
        if let Err(e) = unsafe { cuda_free(DevicePointer::<u8>::from_raw(ptr.0)) } {
            warn!(ptr = ptr.0, error = %e, "cuMemFree failed");
        }
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), Error> {
        unsafe { memcpy_htod(dst.0, src.as_ptr() as *const c_void, src.len()) }
            .map_err(|e| Error::backend("cuMemcpyHtoD", e))
    }

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8]) -> Result<(), Error> {
        unsafe { memcpy_dtoh(dst.as_mut_ptr() as *mut c_void, src.0, dst.len()) }
            .map_err(|e| Error::backend("cuMemcpyDtoH", e))
    }

    fn synchronize(&self) -> Result<(), Error> {
        self.stream
            .synchronize()
            .map_err(|e| Error::backend("cuStreamSynchronize", e))
    }

    fn create_denoiser(
        &self,
        kind: ModelKind,
        options: DenoiserOptions,
    ) -> Result<DenoiserHandle, Error> {
        let raw_options = sys::OptixDenoiserOptions {
            guideAlbedo: options.guide_albedo as u32,
            guideNormal: options.guide_normal as u32,
            denoiseAlpha: sys::OptixDenoiserAlphaMode::OPTIX_DENOISER_ALPHA_MODE_COPY,
        };
        let mut raw = MaybeUninit::uninit();
        unsafe {
            optix_call!(optixDenoiserCreate(
                self.ctx.as_raw(),
                model_kind(kind),
                &raw_options as *const _,
                raw.as_mut_ptr()
            ))
            .map_err(|e| Error::backend("optixDenoiserCreate", e))?;
            Ok(DenoiserHandle(raw.assume_init() as usize as u64))
        }
    }

    fn destroy_denoiser(&self, handle: DenoiserHandle) {
        let result = unsafe { optix_call!(optixDenoiserDestroy(Self::raw_handle(handle))) };
        if let Err(e) = result {
            warn!(handle = handle.0, error = %e, "optixDenoiserDestroy failed");
        }
    }

    fn compute_memory_resources(
        &self,
        handle: DenoiserHandle,
        width: u32,
        height: u32,
    ) -> Result<DenoiserSizes, Error> {
        let mut sizes = MaybeUninit::<sys::OptixDenoiserSizes>::uninit();
        unsafe {
            optix_call!(optixDenoiserComputeMemoryResources(
                Self::raw_handle(handle),
                width,
                height,
                sizes.as_mut_ptr()
            ))
            .map_err(|e| Error::backend("optixDenoiserComputeMemoryResources", e))?;
            let sizes = sizes.assume_init();
            Ok(DenoiserSizes {
                state_size_in_bytes: sizes.stateSizeInBytes,
                scratch_size_in_bytes_with_overlap: sizes.withOverlapScratchSizeInBytes,
                scratch_size_in_bytes_without_overlap: sizes.withoutOverlapScratchSizeInBytes,
                overlap_window_size_in_pixels: sizes.overlapWindowSizeInPixels,
            })
        }
    }

    fn setup(
        &self,
        handle: DenoiserHandle,
        width: u32,
        height: u32,
        state: DeviceSpan,
        scratch: DeviceSpan,
    ) -> Result<(), Error> {
        unsafe {
            optix_call!(optixDenoiserSetup(
                Self::raw_handle(handle),
                self.stream.as_inner(),
                width,
                height,
                state.ptr.0,
                state.len,
                scratch.ptr.0,
                scratch.len
            ))
        }
        .map_err(|e| Error::backend("optixDenoiserSetup", e))
    }

    fn compute_intensity(
        &self,
        handle: DenoiserHandle,
        input: &Image2D,
        intensity: DevicePtr,
        scratch: DeviceSpan,
    ) -> Result<(), Error> {
        let raw_input = raw_image(input);
        unsafe {
            optix_call!(optixDenoiserComputeIntensity(
                Self::raw_handle(handle),
                self.stream.as_inner(),
                &raw_input as *const _,
                intensity.0,
                scratch.ptr.0,
                scratch.len
            ))
        }
        .map_err(|e| Error::backend("optixDenoiserComputeIntensity", e))
    }

    fn invoke(
        &self,
        handle: DenoiserHandle,
        params: &DenoiserParams,
        state: DeviceSpan,
        guide: &GuideLayer,
        layer: &Layer,
        scratch: DeviceSpan,
    ) -> Result<(), Error> {
        let raw_params = sys::OptixDenoiserParams {
            hdrIntensity: params.hdr_intensity.0,
            hdrAverageColor: 0,
            blendFactor: params.blend_factor,
            temporalModeUsePreviousLayers: params.temporal_use_previous_layers as u32,
        };
        let raw_guide = sys::OptixDenoiserGuideLayer {
            albedo: optional_image(guide.albedo.as_ref()),
            normal: optional_image(guide.normal.as_ref()),
            flow: optional_image(guide.flow.as_ref()),
            previousOutputInternalGuideLayer: null_image(),
            outputInternalGuideLayer: null_image(),
            flowTrustworthiness: null_image(),
        };
        let raw_layer = sys::OptixDenoiserLayer {
            type_: sys::OptixDenoiserAOVType::OPTIX_DENOISER_AOV_TYPE_BEAUTY,
            input: raw_image(&layer.input),
            previousOutput: optional_image(layer.previous_output.as_ref()),
            output: raw_image(&layer.output),
        };
        unsafe {
            optix_call!(optixDenoiserInvoke(
                Self::raw_handle(handle),
                self.stream.as_inner(),
                &raw_params as *const _,
                state.ptr.0,
                state.len,
                &raw_guide as *const _,
                &raw_layer as *const _,
                1,
                0,
                0,
                scratch.ptr.0,
                scratch.len
            ))
        }
        .map_err(|e| Error::backend("optixDenoiserInvoke", e))
    }
}
