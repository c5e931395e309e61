//! Example: denoise a composite render (beauty + albedo + normal passes) with OptiX.
//!
//! Run with: cargo run --example optix_denoise --features optix
//! Requires the OptiX SDK (OPTIX_ROOT) and a CUDA-capable GPU. Set RUST_LOG=debug to see the
//! denoiser protocol.

use optix_denoiser::optix::OptixDevice;
use optix_denoiser::{
    denoise_channels, Bitmap, ChannelNames, ComponentFormat, DenoiserConfig, PixelFormat,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let width = 64u32;
    let height = 64u32;
    let channels = [
        "R", "G", "B", "albedo.R", "albedo.G", "albedo.B", "nn.X", "nn.Y", "nn.Z",
    ];

    // Fake path tracer output: a gradient with per-sample noise, flat grey albedo, normals
    // facing the camera.
    let mut samples = Vec::with_capacity((width * height) as usize * channels.len());
    for i in 0..(width * height) as usize {
        let x = (i % width as usize) as f32 / width as f32;
        let y = (i / width as usize) as f32 / height as f32;
        let base = (x * y).sin() * 0.5 + 0.5;
        for c in 0..3 {
            samples.push(base + rand_simple(i * 3 + c) * 0.1);
        }
        samples.extend_from_slice(&[0.5, 0.5, 0.5]);
        samples.extend_from_slice(&[0.0, 0.0, -1.0]);
    }
    let composite = Bitmap::from_raw(
        PixelFormat::MultiChannel,
        ComponentFormat::Float32,
        width,
        height,
        channels.iter().map(|s| s.to_string()).collect(),
        bytemuck::cast_slice(&samples).to_vec(),
    )?;

    let device = OptixDevice::new()?;
    let names = ChannelNames::new("albedo", "nn", "<root>");
    let denoised = denoise_channels(&device, &composite, &names, &DenoiserConfig::default())?;

    println!(
        "Denoised {}x{} {:?} image successfully.",
        denoised.width(),
        denoised.height(),
        denoised.pixel_format()
    );
    Ok(())
}

fn rand_simple(seed: usize) -> f32 {
    let x = (seed as u64).wrapping_mul(0x9e3779b97f4a7c15);
    ((x >> 32) as f32) / (u32::MAX as f32)
}
