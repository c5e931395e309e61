//! Example: denoise a wgpu texture with OptiX (blocking).
//!
//! Run with: cargo run --example wgpu_denoise --features optix
//! Creates a headless wgpu device, a small noisy texture, denoises it in place, then exits.

use optix_denoiser::optix::OptixDevice;
use optix_denoiser::{
    denoise_texture, upload_bitmap_to_texture, Bitmap, DenoiseTextureFormat, DenoiserConfig,
    PixelFormat, TextureGuides,
};
use pollster::block_on;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    block_on(async {
        let desc = wgpu::InstanceDescriptor::default();
        let instance = wgpu::Instance::new(&desc);
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|e| format!("request_adapter: {}", e))?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default())
            .await
            .map_err(|e| format!("request_device: {}", e))?;

        let w = 64u32;
        let h = 64u32;
        let format = DenoiseTextureFormat::Rgba16Float;
        let pixels: Vec<f32> = (0..(w * h) as usize)
            .flat_map(|i| {
                let x = (i % w as usize) as f32 / w as f32;
                let y = (i / w as usize) as f32 / h as f32;
                let v = (x * y).sin() * 0.5 + 0.5;
                [v, v, v, 1.0]
            })
            .collect();
        let noisy = Bitmap::from_f32(PixelFormat::Rgba, w, h, &pixels)?;

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("optix_denoiser example texture"),
            size: wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba16Float,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        upload_bitmap_to_texture(&device, &queue, &texture, format, &noisy)?;

        let optix = OptixDevice::new()?;
        denoise_texture(
            &optix,
            &device,
            &queue,
            &texture,
            &texture,
            format,
            &DenoiserConfig::default(),
            TextureGuides::default(),
        )?;

        println!("Denoised {}x{} wgpu texture successfully.", w, h);
        Ok(())
    })
}
