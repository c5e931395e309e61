//! Unit tests against the in-memory [`mock::MockDevice`]; no GPU required.


use crate::bitmap::{Bitmap, ComponentFormat, PixelFormat, ROOT_CHANNEL};
use crate::buffer::DeviceBuffer;
use crate::channels::{denoise_channels, select, ChannelNames};
use crate::config::DenoiserConfig;
use crate::denoiser::{denoise, denoise_temporal, Denoiser, DenoiserSettings, Guides};
use crate::device::ModelKind;
use crate::script::{self, DenoiseArgs};
use crate::wgpu_integration::{padded_bytes_per_row, upload_size};
use crate::{flip_normals, Error};
use mock::MockDevice;
use std::io;
use std::sync::{Arc, Mutex};

const W: u32 = 4;
const H: u32 = 3;

fn pixels() -> usize {
    (W * H) as usize
}

fn rgb_image(f: impl Fn(usize) -> [f32; 3]) -> Bitmap {
    let samples: Vec<f32> = (0..pixels()).flat_map(f).collect();
    Bitmap::from_f32(PixelFormat::Rgb, W, H, &samples).expect("rgb bitmap")
}

fn noisy() -> Bitmap {
    rgb_image(|i| [0.2 + i as f32 * 0.01, 0.4, 0.8])
}

fn albedo() -> Bitmap {
    rgb_image(|_| [0.5, 0.25, 0.125])
}

fn normals() -> Bitmap {
    let samples: Vec<f32> = (0..pixels()).flat_map(|_| [0.1, 0.2, 0.3]).collect();
    Bitmap::from_f32(PixelFormat::Xyz, W, H, &samples).expect("xyz bitmap")
}

/// A multi-channel composite whose sample values depend only on channel name and pixel.
fn composite(names: &[&str]) -> Bitmap {
    const CANONICAL: [&str; 9] = [
        "R", "G", "B", "albedo.R", "albedo.G", "albedo.B", "nn.X", "nn.Y", "nn.Z",
    ];
    let mut samples = Vec::with_capacity(pixels() * names.len());
    for p in 0..pixels() {
        for name in names {
            let c = CANONICAL.iter().position(|n| n == name).expect("known channel");
            samples.push(0.05 * (c + 1) as f32 + 0.001 * p as f32);
        }
    }
    Bitmap::from_raw(
        PixelFormat::MultiChannel,
        ComponentFormat::Float32,
        W,
        H,
        names.iter().map(|s| s.to_string()).collect(),
        bytemuck::cast_slice(&samples).to_vec(),
    )
    .expect("composite bitmap")
}

/// A multi-channel bitmap repeating `pixel` for every pixel.
fn multi(names: &[&str], pixel: &[f32]) -> Bitmap {
    let samples: Vec<f32> = (0..pixels()).flat_map(|_| pixel.iter().copied()).collect();
    Bitmap::from_raw(
        PixelFormat::MultiChannel,
        ComponentFormat::Float32,
        W,
        H,
        names.iter().map(|s| s.to_string()).collect(),
        bytemuck::cast_slice(&samples).to_vec(),
    )
    .expect("multichannel bitmap")
}

fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-5, "{x} != {y}");
    }
}

#[test]
fn test_denoise_halves_rgb_and_keeps_format() {
    let device = MockDevice::new();
    let input = noisy();
    let out = denoise(&device, &input, None, None, &DenoiserConfig::default()).expect("denoise");

    assert_eq!(out.pixel_format(), PixelFormat::Rgb);
    assert_eq!(out.component_format(), ComponentFormat::Float32);
    assert_eq!((out.width(), out.height()), (W, H));
    let expected: Vec<f32> = input.to_f32().iter().map(|v| v * 0.5).collect();
    assert_close(&out.to_f32(), &expected);

    let call = device.last_invocation();
    assert_eq!(call.kind, ModelKind::Hdr);
    assert!(!call.options.guide_albedo && !call.options.guide_normal);
    assert!(call.albedo.is_none() && call.normal.is_none() && call.flow.is_none());
}

#[test]
fn test_denoise_preserves_alpha_and_half_format() {
    let device = MockDevice::new();
    let samples: Vec<f32> = (0..pixels()).flat_map(|_| [0.5, 1.0, 2.0, 0.75]).collect();
    let input = Bitmap::from_f32(PixelFormat::Rgba, W, H, &samples)
        .and_then(|b| b.convert(PixelFormat::Rgba, ComponentFormat::Float16))
        .expect("rgba16 bitmap");

    let out = denoise(&device, &input, None, None, &DenoiserConfig::default()).expect("denoise");
    assert_eq!(out.pixel_format(), PixelFormat::Rgba);
    assert_eq!(out.component_format(), ComponentFormat::Float16);
    for px in out.to_f32().chunks_exact(4) {
        assert_eq!(px, [0.25, 0.5, 1.0, 0.75]);
    }
    // Alpha never reaches the backend.
    assert_eq!(device.last_invocation().input.len(), pixels() * 3);
}

#[test]
fn test_denoise_luminance_uint8_round_trip() {
    let device = MockDevice::new();
    let input = Bitmap::from_raw(
        PixelFormat::Y,
        ComponentFormat::UInt8,
        W,
        H,
        Vec::new(),
        vec![128; pixels()],
    )
    .expect("y8 bitmap");

    let out = denoise(&device, &input, None, None, &DenoiserConfig::default()).expect("denoise");
    assert_eq!(out.pixel_format(), PixelFormat::Y);
    assert_eq!(out.component_format(), ComponentFormat::UInt8);
    assert_eq!(out.channel_names(), ["Y"]);
    assert!(out.data().iter().all(|&v| v == 64));
}

#[test]
fn test_denoise_multichannel_keeps_extra_channels() {
    let device = MockDevice::new();
    let samples: Vec<f32> = (0..pixels()).flat_map(|i| [0.2, 0.4, 0.6, i as f32]).collect();
    let input = Bitmap::from_raw(
        PixelFormat::MultiChannel,
        ComponentFormat::Float32,
        W,
        H,
        vec!["R".into(), "G".into(), "B".into(), "depth".into()],
        bytemuck::cast_slice(&samples).to_vec(),
    )
    .expect("multichannel bitmap");

    let out = denoise(&device, &input, None, None, &DenoiserConfig::default()).expect("denoise");
    assert_eq!(out.pixel_format(), PixelFormat::MultiChannel);
    assert_eq!(out.channel_names(), input.channel_names());
    for (i, px) in out.to_f32().chunks_exact(4).enumerate() {
        assert_close(px, &[0.1, 0.2, 0.3, i as f32]);
    }
}

#[test]
fn test_denoise_multichannel_uses_named_color_channels() {
    let device = MockDevice::new();
    let input = multi(&["depth", "R", "G", "B"], &[9.0, 0.2, 0.4, 0.6]);

    let out = denoise(&device, &input, None, None, &DenoiserConfig::default()).expect("denoise");
    assert_close(&device.last_invocation().input[..3], &[0.2, 0.4, 0.6]);
    assert_eq!(out.channel_names(), input.channel_names());
    for px in out.to_f32().chunks_exact(4) {
        assert_close(px, &[9.0, 0.1, 0.2, 0.3]);
    }
}

#[test]
fn test_multichannel_guides_read_by_name() {
    let device = MockDevice::new();
    let albedo = multi(&["B", "depth", "R", "G"], &[0.125, 7.0, 0.5, 0.25]);
    let normals = multi(&["Z", "X", "Y"], &[0.3, 0.1, 0.2]);
    denoise(
        &device,
        &noisy(),
        Some(&albedo),
        Some(&normals),
        &DenoiserConfig::default(),
    )
    .expect("denoise");

    let call = device.last_invocation();
    assert_close(&call.albedo.expect("albedo guide")[..3], &[0.5, 0.25, 0.125]);
    assert_close(&call.normal.expect("normal guide")[..3], &[-0.1, 0.2, -0.3]);
}

#[test]
fn test_denoise_channels_root_with_extra_channel() {
    let device = MockDevice::new();
    let image = multi(
        &["depth", "R", "G", "B", "albedo.G", "albedo.R", "albedo.B"],
        &[5.0, 0.2, 0.4, 0.6, 0.25, 0.5, 0.125],
    );
    let names = ChannelNames::new("albedo", "", ROOT_CHANNEL);

    let out = denoise_channels(&device, &image, &names, &DenoiserConfig::default())
        .expect("denoise");
    assert_eq!(out.pixel_format(), PixelFormat::MultiChannel);
    assert_eq!(out.channel_names(), ["depth", "R", "G", "B"]);
    for px in out.to_f32().chunks_exact(4) {
        assert_close(px, &[5.0, 0.1, 0.2, 0.3]);
    }
    let call = device.last_invocation();
    assert_close(&call.input[..3], &[0.2, 0.4, 0.6]);
    assert_close(&call.albedo.expect("albedo guide")[..3], &[0.5, 0.25, 0.125]);
}

#[test]
fn test_single_channel_flow_rejected() {
    let device = MockDevice::new();
    let flow = Bitmap::from_f32(PixelFormat::Y, W, H, &vec![0.5; pixels()]).expect("flow");
    let err = denoise_temporal(
        &device,
        &noisy(),
        &flow,
        &noisy(),
        None,
        None,
        &DenoiserConfig::default(),
    )
    .expect_err("flow needs two channels");
    assert!(matches!(err, Error::UnsupportedFormat));
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn test_guides_reach_backend_with_flipped_normals() {
    let device = MockDevice::new();
    denoise(
        &device,
        &noisy(),
        Some(&albedo()),
        Some(&normals()),
        &DenoiserConfig::default(),
    )
    .expect("denoise");

    let call = device.last_invocation();
    assert!(call.options.guide_albedo && call.options.guide_normal);
    assert_close(&call.albedo.expect("albedo guide")[..3], &[0.5, 0.25, 0.125]);
    assert_close(&call.normal.expect("normal guide")[..3], &[-0.1, 0.2, -0.3]);
}

#[test]
fn test_normals_unflipped_when_disabled() {
    let device = MockDevice::new();
    let config = DenoiserConfig {
        flip_normals: false,
        ..DenoiserConfig::default()
    };
    denoise(&device, &noisy(), Some(&albedo()), Some(&normals()), &config).expect("denoise");
    assert_close(
        &device.last_invocation().normal.expect("normal guide")[..3],
        &[0.1, 0.2, 0.3],
    );
}

#[test]
fn test_flip_normals_negates_x_and_z() {
    let mut n = vec![1.0, 2.0, 3.0, -4.0, 5.0, -6.0];
    flip_normals(&mut n);
    assert_eq!(n, [-1.0, 2.0, -3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_normals_without_albedo_rejected_before_device_calls() {
    let device = MockDevice::new();
    let err = denoise(&device, &noisy(), None, Some(&normals()), &DenoiserConfig::default())
        .expect_err("normals without albedo");
    assert!(matches!(err, Error::InvalidConfiguration(_)));
    assert!(device.calls().is_empty());

    let settings = DenoiserSettings {
        normals: true,
        ..DenoiserSettings::default()
    };
    let err = Denoiser::new(&device, W, H, settings, DenoiserConfig::default())
        .expect_err("session with normals only");
    assert!(matches!(err, Error::InvalidConfiguration(_)));
    assert!(device.calls().is_empty());
}

#[test]
fn test_zero_dimensions_rejected() {
    let device = MockDevice::new();
    let err = Denoiser::new(&device, 0, H, DenoiserSettings::default(), DenoiserConfig::default())
        .expect_err("zero width");
    assert!(matches!(err, Error::InvalidDimensions));
    assert!(device.calls().is_empty());
}

#[test]
fn test_guide_size_mismatch() {
    let device = MockDevice::new();
    let small = Bitmap::from_f32(PixelFormat::Rgb, 2, 2, &[0.0; 12]).expect("bitmap");
    let err = denoise(&device, &noisy(), Some(&small), None, &DenoiserConfig::default())
        .expect_err("size mismatch");
    assert!(matches!(err, Error::InvalidDimensions));
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn test_protocol_order_and_release() {
    let device = MockDevice::new();
    denoise(&device, &noisy(), Some(&albedo()), None, &DenoiserConfig::default())
        .expect("denoise");

    let calls = device.calls();
    let at = |name: &str| calls.iter().position(|c| *c == name).expect(name);
    assert!(at("create_denoiser") < at("compute_memory_resources"));
    assert!(at("compute_memory_resources") < at("setup"));
    assert!(at("setup") < at("compute_intensity"));
    assert!(at("compute_intensity") < at("invoke"));
    assert!(at("invoke") < at("synchronize"));
    assert!(at("synchronize") < at("copy_to_host"));
    assert!(at("copy_to_host") < at("destroy_denoiser"));
    // The handle goes before the memory it was set up with.
    assert!(at("destroy_denoiser") < at("free"));
    assert_eq!(device.count("alloc"), device.count("free"));
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn test_intensity_skipped_when_disabled() {
    let device = MockDevice::new();
    let config = DenoiserConfig {
        compute_intensity: false,
        blend_factor: 0.25,
        ..DenoiserConfig::default()
    };
    denoise(&device, &noisy(), None, None, &config).expect("denoise");
    assert_eq!(device.count("compute_intensity"), 0);
    let params = device.last_invocation().params;
    assert!(params.hdr_intensity.is_null());
    assert_eq!(params.blend_factor, 0.25);
}

#[test]
fn test_no_leaks_when_backend_fails() {
    for call in [
        "create_denoiser",
        "compute_memory_resources",
        "alloc",
        "setup",
        "copy_to_device",
        "compute_intensity",
        "invoke",
        "synchronize",
        "copy_to_host",
    ] {
        let device = MockDevice::failing_on(call);
        let err = denoise(
            &device,
            &noisy(),
            Some(&albedo()),
            Some(&normals()),
            &DenoiserConfig::default(),
        )
        .expect_err(call);
        match err {
            Error::Backend { call: failed, .. } => assert_eq!(failed, call),
            other => panic!("unexpected error for {call}: {other}"),
        }
        assert_eq!(device.live_allocations(), 0, "leaked memory after {call}");
        assert_eq!(device.live_handles(), 0, "leaked handle after {call}");
    }
}

#[test]
fn test_session_reuses_device_resources() {
    let device = MockDevice::new();
    let settings = DenoiserSettings {
        albedo: true,
        ..DenoiserSettings::default()
    };
    let mut session =
        Denoiser::new(&device, W, H, settings, DenoiserConfig::default()).expect("session");
    // state, scratch, intensity, input, output, albedo
    assert_eq!(device.live_allocations(), 6);

    let guide = albedo();
    let guides = Guides {
        albedo: Some(&guide),
        ..Guides::default()
    };
    let a = session.denoise(&noisy(), guides).expect("first");
    let b = session.denoise(&noisy(), guides).expect("second");
    assert_eq!(a, b);
    assert_eq!(session.frames(), 2);
    assert_eq!(device.count("create_denoiser"), 1);
    assert_eq!(device.count("alloc"), 6);

    let err = session
        .denoise(&noisy(), Guides::default())
        .expect_err("albedo missing");
    assert!(matches!(err, Error::MissingGuide("albedo")));

    drop(session);
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.live_handles(), 0);
}

#[test]
fn test_temporal_session_requirements() {
    let device = MockDevice::new();
    let settings = DenoiserSettings {
        temporal: true,
        ..DenoiserSettings::default()
    };
    let mut session =
        Denoiser::new(&device, W, H, settings, DenoiserConfig::default()).expect("session");
    assert_eq!(session.model(), ModelKind::Temporal);

    let input = noisy();
    let first = session.denoise(&input, Guides::default()).expect("first frame");
    let call = device.last_invocation();
    assert_eq!(call.kind, ModelKind::Temporal);
    assert!(!call.params.temporal_use_previous_layers);
    assert_eq!(call.previous.expect("previous output"), input.to_f32());
    assert_eq!(call.flow.expect("flow"), vec![0.0; pixels() * 2]);

    let err = session
        .denoise(&input, Guides::default())
        .expect_err("previous output required");
    assert!(matches!(err, Error::MissingGuide("previous output")));

    let err = session
        .denoise(
            &input,
            Guides {
                previous: Some(&first),
                ..Guides::default()
            },
        )
        .expect_err("flow required");
    assert!(matches!(err, Error::MissingGuide("flow")));

    let flow = Bitmap::from_f32(PixelFormat::Rgb, W, H, &vec![1.0; pixels() * 3]).expect("flow");
    session
        .denoise(
            &input,
            Guides {
                previous: Some(&first),
                flow: Some(&flow),
                ..Guides::default()
            },
        )
        .expect("second frame");
    let call = device.last_invocation();
    assert!(call.params.temporal_use_previous_layers);
    assert_close(&call.previous.expect("previous output"), &first.to_f32());
    assert_eq!(session.frames(), 2);
}

#[test]
fn test_denoise_temporal_one_shot() {
    let device = MockDevice::new();
    let flow_samples: Vec<f32> = (0..pixels()).flat_map(|i| [i as f32, -1.0, 9.0]).collect();
    let flow = Bitmap::from_raw(
        PixelFormat::MultiChannel,
        ComponentFormat::Float32,
        W,
        H,
        vec!["u".into(), "v".into(), "w".into()],
        bytemuck::cast_slice(&flow_samples).to_vec(),
    )
    .expect("flow bitmap");
    let previous = rgb_image(|_| [0.3, 0.3, 0.3]);

    let out = denoise_temporal(
        &device,
        &noisy(),
        &flow,
        &previous,
        Some(&albedo()),
        None,
        &DenoiserConfig::default(),
    )
    .expect("temporal denoise");
    assert_eq!(out.pixel_format(), PixelFormat::Rgb);

    let call = device.last_invocation();
    assert_eq!(call.kind, ModelKind::Temporal);
    let expected_flow: Vec<f32> = (0..pixels()).flat_map(|i| [i as f32, -1.0]).collect();
    assert_eq!(call.flow.expect("flow"), expected_flow);
    assert_close(&call.previous.expect("previous"), &previous.to_f32());
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn test_temporal_model_in_config_acts_as_first_frame() {
    let device = MockDevice::new();
    let config = DenoiserConfig {
        model: ModelKind::Temporal,
        ..DenoiserConfig::default()
    };
    denoise(&device, &noisy(), None, None, &config).expect("denoise");
    let call = device.last_invocation();
    assert_eq!(call.kind, ModelKind::Temporal);
    assert!(call.flow.is_some());
}

#[test]
fn test_select_independent_of_channel_order() {
    let ordered = composite(&[
        "R", "G", "B", "albedo.R", "albedo.G", "albedo.B", "nn.X", "nn.Y", "nn.Z",
    ]);
    let shuffled = composite(&[
        "nn.Z", "albedo.G", "B", "nn.X", "R", "albedo.B", "G", "nn.Y", "albedo.R",
    ]);
    let names = ChannelNames::new("albedo", "nn", ROOT_CHANNEL);

    let a = select(&ordered, &names).expect("ordered");
    let b = select(&shuffled, &names).expect("shuffled");
    assert_eq!(a, b);
    assert_eq!(a.noisy.pixel_format(), PixelFormat::Rgb);
    assert_eq!(a.albedo.as_ref().map(Bitmap::pixel_format), Some(PixelFormat::Rgb));
    assert_eq!(a.normals.as_ref().map(Bitmap::pixel_format), Some(PixelFormat::Xyz));

    let device = MockDevice::new();
    let config = DenoiserConfig::default();
    let out_a = denoise_channels(&device, &ordered, &names, &config).expect("ordered");
    let out_b = denoise_channels(&device, &shuffled, &names, &config).expect("shuffled");
    assert_eq!(out_a, out_b);
    let invocations = device.invocations();
    assert_eq!(invocations[0].albedo, invocations[1].albedo);
    assert_eq!(invocations[0].normal, invocations[1].normal);
}

#[test]
fn test_select_missing_channel_names_it() {
    let image = composite(&["R", "G", "B", "albedo.R", "albedo.G", "albedo.B"]);
    let device = MockDevice::new();
    let names = ChannelNames::new("albedo", "nn", ROOT_CHANNEL);
    let err = denoise_channels(&device, &image, &names, &DenoiserConfig::default())
        .expect_err("missing normals");
    match &err {
        Error::ChannelNotFound { channel, available } => {
            assert_eq!(channel, "nn");
            assert!(available.contains("albedo.R"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().starts_with("could not find channel 'nn' in:"));
    assert!(device.calls().is_empty());

    let err = select(&image, &ChannelNames::new("", "", "beauty")).expect_err("missing noisy");
    assert!(matches!(err, Error::ChannelNotFound { channel, .. } if channel == "beauty"));
}

#[test]
fn test_select_defaults_and_plain_bitmaps() {
    let image = composite(&["R", "G", "B", "albedo.R", "albedo.G", "albedo.B"]);
    let selection = select(&image, &ChannelNames::new("", "", "")).expect("empty noisy is root");
    assert!(selection.albedo.is_none() && selection.normals.is_none());
    assert_eq!(selection.noisy.channel_count(), 3);

    let plain = noisy();
    let selection = select(&plain, &ChannelNames::default()).expect("root of plain bitmap");
    assert_eq!(selection.noisy, plain);
    let err = select(&plain, &ChannelNames::new("albedo", "", ROOT_CHANNEL))
        .expect_err("plain bitmap has no sub-images");
    assert!(matches!(err, Error::ChannelNotFound { .. }));
}

#[test]
fn test_split_groups_by_prefix() {
    let image = composite(&["G", "albedo.B", "R", "albedo.R", "B", "albedo.G"]);
    let parts = image.split();
    let names: Vec<&str> = parts.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, [ROOT_CHANNEL, "albedo"]);
    let (_, root) = &parts[0];
    assert_eq!(root.channel_names(), ["R", "G", "B"]);
    let first: Vec<f32> = root.to_f32()[..3].to_vec();
    assert_close(&first, &[0.05, 0.10, 0.15]);
}

#[test]
fn test_split_unknown_suffixes_stay_multichannel() {
    let samples = vec![0.0f32; pixels() * 2];
    let image = Bitmap::from_raw(
        PixelFormat::MultiChannel,
        ComponentFormat::Float32,
        W,
        H,
        vec!["motion.u".into(), "motion.v".into()],
        bytemuck::cast_slice(&samples).to_vec(),
    )
    .expect("bitmap");
    let parts = image.split();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].0, "motion");
    assert_eq!(parts[0].1.pixel_format(), PixelFormat::MultiChannel);
    assert_eq!(parts[0].1.channel_names(), ["u", "v"]);
}

#[test]
fn test_bitmap_convert() {
    let image = Bitmap::from_f32(PixelFormat::Rgb, 1, 1, &[1.0, 1.0, 1.0]).expect("bitmap");
    let y = image
        .convert(PixelFormat::Y, ComponentFormat::Float32)
        .expect("to luminance");
    assert_close(&y.to_f32(), &[1.0]);

    let rgba = y
        .convert(PixelFormat::Rgba, ComponentFormat::Float32)
        .expect("to rgba");
    assert_eq!(rgba.to_f32(), [1.0, 1.0, 1.0, 1.0]);

    let shuffled = Bitmap::from_raw(
        PixelFormat::MultiChannel,
        ComponentFormat::Float32,
        1,
        1,
        vec!["G".into(), "B".into(), "R".into()],
        bytemuck::cast_slice(&[0.5f32, 0.25, 1.0]).to_vec(),
    )
    .expect("bitmap");
    let rgba = shuffled
        .convert(PixelFormat::Rgba, ComponentFormat::Float32)
        .expect("named channels to rgba");
    assert_eq!(rgba.to_f32(), [1.0, 0.5, 0.25, 1.0]);

    let narrow = Bitmap::multi_channel(ComponentFormat::Float32, 1, 1, ["a", "b"]);
    let err = narrow
        .convert(PixelFormat::Rgb, ComponentFormat::Float32)
        .expect_err("two channels cannot become rgb");
    assert!(matches!(err, Error::UnsupportedFormat));
}

#[test]
fn test_bitmap_from_raw_validates() {
    let err = Bitmap::from_raw(
        PixelFormat::Rgb,
        ComponentFormat::Float32,
        2,
        2,
        Vec::new(),
        vec![0; 10],
    )
    .expect_err("wrong byte count");
    assert!(matches!(err, Error::InvalidDimensions));

    let err = Bitmap::from_raw(
        PixelFormat::Rgb,
        ComponentFormat::UInt8,
        1,
        1,
        vec!["R".into(), "G".into()],
        vec![0; 2],
    )
    .expect_err("wrong channel count");
    assert!(matches!(err, Error::UnsupportedFormat));
}

#[test]
fn test_bitmap_display_lists_channels() {
    let text = composite(&["R", "G", "B", "nn.X", "nn.Y", "nn.Z"]).to_string();
    assert!(text.contains("MultiChannel"));
    assert!(text.contains("\"nn.Y\""));
}

#[test]
fn test_device_buffer() {
    let device = MockDevice::new();
    let empty = DeviceBuffer::new(&device, 0).expect("empty buffer");
    assert!(empty.is_empty() && empty.as_ptr().is_null());
    drop(empty);
    assert!(device.calls().is_empty());

    let buffer = DeviceBuffer::from_host(&device, &[1, 2, 3]).expect("buffer");
    assert_eq!(buffer.read_to_vec().expect("read"), [1, 2, 3]);
    let err = buffer.write(&[0; 8]).expect_err("too large");
    assert!(matches!(err, Error::InvalidDimensions));
    drop(buffer);
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn test_config_json() {
    let config = DenoiserConfig::from_json(r#"{"model": "ldr", "blend_factor": 0.5}"#)
        .expect("valid config");
    assert_eq!(config.model, ModelKind::Ldr);
    assert_eq!(config.blend_factor, 0.5);
    assert!(config.compute_intensity && config.flip_normals);

    let err = DenoiserConfig::from_json(r#"{"blend_factor": 1.5}"#).expect_err("out of range");
    assert!(matches!(err, Error::InvalidConfiguration(_)));
    let err = DenoiserConfig::from_json(r#"{"quality": "high"}"#).expect_err("unknown key");
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}

#[test]
fn test_script_kwargs() {
    assert_eq!(
        DenoiseArgs::from_kwargs_json("{}").expect("no kwargs"),
        DenoiseArgs::default()
    );
    let args = DenoiseArgs::from_kwargs_json(r#"{"albedo_ch_name": "albedo"}"#).expect("kwargs");
    assert_eq!(
        args,
        DenoiseArgs::Channels(ChannelNames::new("albedo", "", ROOT_CHANNEL))
    );
    let err = DenoiseArgs::from_kwargs_json(r#"{"albedo": "albedo"}"#).expect_err("unknown kw");
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}

#[test]
fn test_script_call_dispatch() {
    let device = MockDevice::new();
    let config = DenoiserConfig::default();
    let image = composite(&["R", "G", "B", "albedo.R", "albedo.G", "albedo.B"]);

    let mut kwargs = serde_json::Map::new();
    kwargs.insert("albedo_ch_name".into(), "albedo".into());
    let args = DenoiseArgs::from_kwargs(&kwargs).expect("kwargs");
    let out = script::call(&device, &image, &args, &config).expect("by channel name");
    assert_eq!(out.pixel_format(), PixelFormat::Rgb);
    assert!(device.last_invocation().options.guide_albedo);

    let guide = albedo();
    let args = DenoiseArgs::Images {
        albedo: Some(&guide),
        normals: None,
    };
    let out = script::call(&device, &noisy(), &args, &config).expect("by image");
    assert_eq!(out.pixel_format(), PixelFormat::Rgb);
    assert_close(
        &device.last_invocation().albedo.expect("albedo guide")[..3],
        &[0.5, 0.25, 0.125],
    );
}

/// Log sink shared between a test and its subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_empty_buffer_logs_no_alloc() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let device = MockDevice::new();
    tracing::subscriber::with_default(subscriber, || {
        let empty = DeviceBuffer::new(&device, 0).expect("empty buffer");
        let full = DeviceBuffer::new(&device, 16).expect("buffer");
        drop((empty, full));
    });

    let text = String::from_utf8(logs.0.lock().expect("log lock").clone()).expect("utf8 logs");
    assert_eq!(text.matches("device alloc").count(), 1);
    assert_eq!(text.matches("device free").count(), 1);
}

#[test]
#[cfg(target_pointer_width = "64")]
fn test_upload_size_does_not_overflow() {
    let padded = padded_bytes_per_row(16384, 16);
    assert_eq!(upload_size(padded, 16384), 1usize << 32);
}

#[test]
fn test_padded_bytes_per_row() {
    assert_eq!(padded_bytes_per_row(1, 16), 256);
    assert_eq!(padded_bytes_per_row(64, 4), 256);
    assert_eq!(padded_bytes_per_row(65, 4), 512);
}
