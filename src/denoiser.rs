//! Denoising sessions and the one-shot [`denoise`] / [`denoise_temporal`] functions.
//!
//! A [`Denoiser`] owns a backend denoiser handle plus every device buffer it needs for one
//! resolution and guide configuration. The one-shot functions build a session, run it once, and
//! drop it, so all device memory is released before they return, on success and on error.

use crate::bitmap::Bitmap;
use crate::buffer::DeviceBuffer;
use crate::config::DenoiserConfig;
use crate::device::{
    DenoiserDevice, DenoiserHandle, DenoiserOptions, DenoiserParams, DenoiserSizes, DevicePtr,
    GuideLayer, Image2D, ImageFormat, Layer, ModelKind,
};
use crate::image::{self, StagedColor};
use crate::Error;
use tracing::{debug, info};

/// Guide channels a [`Denoiser`] session is built for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DenoiserSettings {
    /// Expect an albedo guide on every call.
    pub albedo: bool,
    /// Expect a normal guide on every call. Requires `albedo`.
    pub normals: bool,
    /// Use the temporal model: every call after the first needs the previous output and a flow
    /// field.
    pub temporal: bool,
}

impl DenoiserSettings {
    fn validate(&self) -> Result<(), Error> {
        if self.normals && !self.albedo {
            return Err(Error::InvalidConfiguration(
                "a normal guide requires an albedo guide".into(),
            ));
        }
        Ok(())
    }
}

/// Per-call guide images. Images that the session was not configured for are ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct Guides<'a> {
    pub albedo: Option<&'a Bitmap>,
    pub normals: Option<&'a Bitmap>,
    /// Denoised output of the previous frame (temporal sessions).
    pub previous: Option<&'a Bitmap>,
    /// Motion from the previous to the current frame in pixels, first two channels (temporal
    /// sessions).
    pub flow: Option<&'a Bitmap>,
}

/// Backend denoiser handle, destroyed on drop.
struct OwnedHandle<'d, D: DenoiserDevice + ?Sized> {
    device: &'d D,
    raw: DenoiserHandle,
}

impl<D: DenoiserDevice + ?Sized> Drop for OwnedHandle<'_, D> {
    fn drop(&mut self) {
        debug!(handle = self.raw.0, "destroying denoiser");
        self.device.destroy_denoiser(self.raw);
    }
}

/// A stateful denoiser for a fixed resolution and guide configuration.
///
/// Device state, scratch memory and staging buffers are allocated once in [`Self::new`] and
/// reused by every [`Self::denoise`] call. `denoise` takes `&mut self` because those buffers are
/// overwritten in place.
pub struct Denoiser<'d, D: DenoiserDevice + ?Sized> {
    // Declared first so the handle is destroyed before its state and scratch memory are freed.
    handle: OwnedHandle<'d, D>,
    device: &'d D,
    kind: ModelKind,
    settings: DenoiserSettings,
    config: DenoiserConfig,
    width: u32,
    height: u32,
    sizes: DenoiserSizes,
    state: DeviceBuffer<'d, D>,
    scratch: DeviceBuffer<'d, D>,
    intensity: Option<DeviceBuffer<'d, D>>,
    input: DeviceBuffer<'d, D>,
    output: DeviceBuffer<'d, D>,
    albedo: Option<DeviceBuffer<'d, D>>,
    normal: Option<DeviceBuffer<'d, D>>,
    previous: Option<DeviceBuffer<'d, D>>,
    flow: Option<DeviceBuffer<'d, D>>,
    frames: u64,
}

impl<D: DenoiserDevice + ?Sized> std::fmt::Debug for Denoiser<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Denoiser")
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl<'d, D: DenoiserDevice + ?Sized> Denoiser<'d, D> {
    /// Creates a session for `width` x `height` images.
    ///
    /// The model is temporal if `settings.temporal` is set or `config.model` is
    /// [`ModelKind::Temporal`]; otherwise `config.model`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for normals without albedo or an invalid
    /// `config`, before any device call is made; [`Error::InvalidDimensions`] for a zero-sized
    /// image; otherwise the first failing backend call.
    pub fn new(
        device: &'d D,
        width: u32,
        height: u32,
        settings: DenoiserSettings,
        config: DenoiserConfig,
    ) -> Result<Self, Error> {
        settings.validate()?;
        config.validate()?;
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions);
        }

        let mut settings = settings;
        settings.temporal |= config.model == ModelKind::Temporal;
        let kind = if settings.temporal {
            ModelKind::Temporal
        } else {
            config.model
        };
        let options = DenoiserOptions {
            guide_albedo: settings.albedo,
            guide_normal: settings.normals,
        };

        let raw = device.create_denoiser(kind, options)?;
        let handle = OwnedHandle { device, raw };

        let sizes = device.compute_memory_resources(raw, width, height)?;
        debug!(
            state = sizes.state_size_in_bytes,
            scratch = sizes.scratch_size_in_bytes_without_overlap,
            "denoiser memory requirements"
        );
        let state = DeviceBuffer::new(device, sizes.state_size_in_bytes)?;
        let scratch = DeviceBuffer::new(device, sizes.scratch_size_in_bytes_without_overlap)?;
        device.setup(raw, width, height, state.span(), scratch.span())?;

        let rgb_size = Image2D::required_buffer_size(ImageFormat::Float3, width, height);
        let flow_size = Image2D::required_buffer_size(ImageFormat::Float2, width, height);
        let alloc_if = |enabled: bool, size: usize| -> Result<Option<DeviceBuffer<'d, D>>, Error> {
            if enabled {
                DeviceBuffer::new(device, size).map(Some)
            } else {
                Ok(None)
            }
        };

        let intensity = alloc_if(config.compute_intensity, std::mem::size_of::<f32>())?;
        let input = DeviceBuffer::new(device, rgb_size)?;
        let output = DeviceBuffer::new(device, rgb_size)?;
        let albedo = alloc_if(settings.albedo, rgb_size)?;
        let normal = alloc_if(settings.normals, rgb_size)?;
        let previous = alloc_if(settings.temporal, rgb_size)?;
        let flow = alloc_if(settings.temporal, flow_size)?;

        info!(width, height, model = ?kind, albedo = settings.albedo, normals = settings.normals, "denoiser session ready");

        Ok(Self {
            handle,
            device,
            kind,
            settings,
            config,
            width,
            height,
            sizes,
            state,
            scratch,
            intensity,
            input,
            output,
            albedo,
            normal,
            previous,
            flow,
            frames: 0,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn model(&self) -> ModelKind {
        self.kind
    }

    pub fn settings(&self) -> DenoiserSettings {
        self.settings
    }

    /// Memory requirements the backend reported at creation.
    pub fn sizes(&self) -> DenoiserSizes {
        self.sizes
    }

    /// Number of completed [`Self::denoise`] calls.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Denoises `noisy`, returning an image with its size, pixel format, component format and
    /// channels.
    ///
    /// On the first call of a temporal session, a missing previous output defaults to the noisy
    /// input and a missing flow field to zero motion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] if any image does not match the session size,
    /// [`Error::MissingGuide`] if a configured guide is absent, or the first failing backend
    /// call.
    pub fn denoise(&mut self, noisy: &Bitmap, guides: Guides<'_>) -> Result<Bitmap, Error> {
        self.check_size(noisy)?;
        let w = self.width;
        let h = self.height;
        let rgb_image = |ptr: DevicePtr| Image2D::packed(ptr, ImageFormat::Float3, w, h);

        let staged = image::stage_color(noisy)?;
        self.input.write(bytemuck::cast_slice(&staged.rgb))?;

        let mut guide = GuideLayer::default();
        if let Some(buffer) = &self.albedo {
            let albedo = guides.albedo.ok_or(Error::MissingGuide("albedo"))?;
            self.check_size(albedo)?;
            buffer.write(bytemuck::cast_slice(&image::stage_albedo(albedo)?))?;
            guide.albedo = Some(rgb_image(buffer.as_ptr()));
        }
        if let Some(buffer) = &self.normal {
            let normals = guides.normals.ok_or(Error::MissingGuide("normal"))?;
            self.check_size(normals)?;
            let staged_normals = image::stage_normals(normals, self.config.flip_normals)?;
            buffer.write(bytemuck::cast_slice(&staged_normals))?;
            guide.normal = Some(rgb_image(buffer.as_ptr()));
        }

        let mut previous_output = None;
        if let (Some(previous_buffer), Some(flow_buffer)) = (&self.previous, &self.flow) {
            let previous = match guides.previous {
                Some(previous) => {
                    self.check_size(previous)?;
                    image::stage_color(previous)?.rgb
                }
                None if self.frames == 0 => staged.rgb.clone(),
                None => return Err(Error::MissingGuide("previous output")),
            };
            let flow = match guides.flow {
                Some(flow) => {
                    self.check_size(flow)?;
                    image::stage_flow(flow)?
                }
                None if self.frames == 0 => vec![0.0; w as usize * h as usize * 2],
                None => return Err(Error::MissingGuide("flow")),
            };
            previous_buffer.write(bytemuck::cast_slice(&previous))?;
            flow_buffer.write(bytemuck::cast_slice(&flow))?;
            previous_output = Some(rgb_image(previous_buffer.as_ptr()));
            guide.flow = Some(Image2D::packed(
                flow_buffer.as_ptr(),
                ImageFormat::Float2,
                w,
                h,
            ));
        }

        let layer = Layer {
            input: rgb_image(self.input.as_ptr()),
            previous_output,
            output: rgb_image(self.output.as_ptr()),
        };
        let rgb = self.run(&layer, &guide)?;
        self.frames += 1;

        let StagedColor { alpha, .. } = staged;
        image::restore_output(&rgb, alpha.as_deref(), noisy)
    }

    /// Intensity, invoke, wait, read back. Returns packed RGB `f32`.
    fn run(&self, layer: &Layer, guide: &GuideLayer) -> Result<Vec<f32>, Error> {
        let raw = self.handle.raw;
        let hdr_intensity = match &self.intensity {
            Some(intensity) => {
                debug!("computing input intensity");
                self.device.compute_intensity(
                    raw,
                    &layer.input,
                    intensity.as_ptr(),
                    self.scratch.span(),
                )?;
                intensity.as_ptr()
            }
            None => DevicePtr::NULL,
        };

        let params = DenoiserParams {
            hdr_intensity,
            blend_factor: self.config.blend_factor,
            temporal_use_previous_layers: self.kind == ModelKind::Temporal && self.frames > 0,
        };
        debug!(frame = self.frames, model = ?self.kind, "invoking denoiser");
        self.device.invoke(
            raw,
            &params,
            self.state.span(),
            guide,
            layer,
            self.scratch.span(),
        )?;
        self.device.synchronize()?;

        let mut rgb = vec![0.0f32; self.width as usize * self.height as usize * 3];
        self.output.read(bytemuck::cast_slice_mut(&mut rgb))?;
        debug!(frame = self.frames, "denoised output read back");
        Ok(rgb)
    }

    fn check_size(&self, bitmap: &Bitmap) -> Result<(), Error> {
        if bitmap.width() != self.width || bitmap.height() != self.height {
            return Err(Error::InvalidDimensions);
        }
        Ok(())
    }
}

/// Denoises a single image with optional albedo and normal guides.
///
/// Creates a denoiser, allocates and frees all device memory within the call. The model is
/// `config.model` (HDR by default). The result has the size, pixel format, component format and
/// channels of `noisy`.
///
/// # Errors
///
/// Returns [`Error::InvalidConfiguration`] if `normals` is given without `albedo`,
/// [`Error::InvalidDimensions`] if guide sizes differ from `noisy`, or the first failing
/// backend call.
pub fn denoise<D: DenoiserDevice + ?Sized>(
    device: &D,
    noisy: &Bitmap,
    albedo: Option<&Bitmap>,
    normals: Option<&Bitmap>,
    config: &DenoiserConfig,
) -> Result<Bitmap, Error> {
    let settings = DenoiserSettings {
        albedo: albedo.is_some(),
        normals: normals.is_some(),
        temporal: false,
    };
    let mut session = Denoiser::new(device, noisy.width(), noisy.height(), settings, config.clone())?;
    session.denoise(
        noisy,
        Guides {
            albedo,
            normals,
            ..Guides::default()
        },
    )
}

/// Denoises one frame of a sequence with the temporal model.
///
/// `previous_denoised` is the previous frame's result and `flow` the per-pixel motion from the
/// previous to this frame. Like [`denoise`], all device memory lives only for this call; use a
/// temporal [`Denoiser`] session to keep it across frames.
pub fn denoise_temporal<D: DenoiserDevice + ?Sized>(
    device: &D,
    noisy: &Bitmap,
    flow: &Bitmap,
    previous_denoised: &Bitmap,
    albedo: Option<&Bitmap>,
    normals: Option<&Bitmap>,
    config: &DenoiserConfig,
) -> Result<Bitmap, Error> {
    let settings = DenoiserSettings {
        albedo: albedo.is_some(),
        normals: normals.is_some(),
        temporal: true,
    };
    let mut session = Denoiser::new(device, noisy.width(), noisy.height(), settings, config.clone())?;
    session.denoise(
        noisy,
        Guides {
            albedo,
            normals,
            previous: Some(previous_denoised),
            flow: Some(flow),
        },
    )
}
