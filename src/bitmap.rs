//! Renderer-side multi-channel image ([`Bitmap`]) with pixel/component layout conversion and
//! splitting of composite renders into named sub-images.

use crate::Error;
use bytemuck::pod_read_unaligned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name under which un-prefixed channels of a composite bitmap are grouped by [`Bitmap::split`].
pub const ROOT_CHANNEL: &str = "<root>";

/// Rec. 709 luminance weights used when collapsing RGB to a single channel.
const LUMINANCE: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Channel semantics of a bitmap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Single luminance channel.
    Y,
    /// Luminance + alpha.
    YA,
    Rgb,
    Rgba,
    /// Three vector components (normals, positions).
    Xyz,
    Xyza,
    /// Arbitrary named channels, e.g. a beauty pass with AOVs attached.
    MultiChannel,
}

impl PixelFormat {
    /// Canonical channel names; empty for [`PixelFormat::MultiChannel`].
    pub fn channel_names(self) -> &'static [&'static str] {
        match self {
            PixelFormat::Y => &["Y"],
            PixelFormat::YA => &["Y", "A"],
            PixelFormat::Rgb => &["R", "G", "B"],
            PixelFormat::Rgba => &["R", "G", "B", "A"],
            PixelFormat::Xyz => &["X", "Y", "Z"],
            PixelFormat::Xyza => &["X", "Y", "Z", "A"],
            PixelFormat::MultiChannel => &[],
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(
            self,
            PixelFormat::YA | PixelFormat::Rgba | PixelFormat::Xyza
        )
    }

    /// Number of non-alpha channels. `None` for multi-channel.
    fn color_channels(self) -> Option<usize> {
        match self {
            PixelFormat::Y | PixelFormat::YA => Some(1),
            PixelFormat::Rgb | PixelFormat::Rgba | PixelFormat::Xyz | PixelFormat::Xyza => Some(3),
            PixelFormat::MultiChannel => None,
        }
    }

    /// Finds the fixed format whose channel set equals `suffixes` (in any order), returning it
    /// together with the position of each canonical channel in `suffixes`.
    fn infer(suffixes: &[&str]) -> Option<(PixelFormat, Vec<usize>)> {
        const CANDIDATES: [PixelFormat; 6] = [
            PixelFormat::Rgba,
            PixelFormat::Rgb,
            PixelFormat::Xyza,
            PixelFormat::Xyz,
            PixelFormat::YA,
            PixelFormat::Y,
        ];
        CANDIDATES.into_iter().find_map(|format| {
            let names = format.channel_names();
            if names.len() != suffixes.len() {
                return None;
            }
            let order: Option<Vec<usize>> = names
                .iter()
                .map(|n| suffixes.iter().position(|s| s == n))
                .collect();
            order.map(|o| (format, o))
        })
    }
}

/// Storage type of each channel sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentFormat {
    /// Normalized 8-bit, mapped linearly to `[0, 1]`.
    UInt8,
    Float16,
    Float32,
}

impl ComponentFormat {
    /// Bytes per sample.
    pub fn size(self) -> usize {
        match self {
            ComponentFormat::UInt8 => 1,
            ComponentFormat::Float16 => 2,
            ComponentFormat::Float32 => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            ComponentFormat::UInt8 => bytes[0] as f32 / 255.0,
            ComponentFormat::Float16 => half::f16::from_bits(pod_read_unaligned(&bytes[..2])).to_f32(),
            ComponentFormat::Float32 => pod_read_unaligned(&bytes[..4]),
        }
    }

    fn encode(self, value: f32, out: &mut [u8]) {
        match self {
            ComponentFormat::UInt8 => out[0] = (value.clamp(0.0, 1.0) * 255.0).round() as u8,
            ComponentFormat::Float16 => {
                out[..2].copy_from_slice(&half::f16::from_f32(value).to_bits().to_ne_bytes())
            }
            ComponentFormat::Float32 => out[..4].copy_from_slice(&value.to_ne_bytes()),
        }
    }
}

/// Interleaved, tightly packed, row-major image as produced by the renderer's film.
#[derive(Clone, PartialEq)]
pub struct Bitmap {
    pixel_format: PixelFormat,
    component_format: ComponentFormat,
    width: u32,
    height: u32,
    channel_names: Vec<String>,
    data: Vec<u8>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("pixel_format", &self.pixel_format)
            .field("component_format", &self.component_format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channel_names", &self.channel_names)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bitmap[")?;
        writeln!(f, "  pixel_format = {:?},", self.pixel_format)?;
        writeln!(f, "  component_format = {:?},", self.component_format)?;
        writeln!(f, "  size = [{}, {}],", self.width, self.height)?;
        writeln!(f, "  channels = [")?;
        for name in &self.channel_names {
            writeln!(f, "    \"{}\",", name)?;
        }
        writeln!(f, "  ]")?;
        write!(f, "]")
    }
}

impl Bitmap {
    /// Creates a zero-filled bitmap with the canonical channels of `pixel_format`.
    ///
    /// A [`PixelFormat::MultiChannel`] bitmap created this way has no channels; use
    /// [`Self::multi_channel`] to name them.
    pub fn new(
        pixel_format: PixelFormat,
        component_format: ComponentFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let channel_names: Vec<String> = pixel_format
            .channel_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let len = width as usize * height as usize * channel_names.len() * component_format.size();
        Self {
            pixel_format,
            component_format,
            width,
            height,
            channel_names,
            data: vec![0; len],
        }
    }

    /// Creates a zero-filled multi-channel bitmap with the given channel names.
    pub fn multi_channel<I, S>(
        component_format: ComponentFormat,
        width: u32,
        height: u32,
        channel_names: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channel_names: Vec<String> = channel_names.into_iter().map(Into::into).collect();
        let len = width as usize * height as usize * channel_names.len() * component_format.size();
        Self {
            pixel_format: PixelFormat::MultiChannel,
            component_format,
            width,
            height,
            channel_names,
            data: vec![0; len],
        }
    }

    /// Wraps existing sample bytes. `channel_names` may be empty for fixed pixel formats, in
    /// which case the canonical names are used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] if `data` is not exactly
    /// `width * height * channels * component size` bytes, and [`Error::UnsupportedFormat`] if
    /// the channel names do not fit the pixel format.
    pub fn from_raw(
        pixel_format: PixelFormat,
        component_format: ComponentFormat,
        width: u32,
        height: u32,
        channel_names: Vec<String>,
        data: Vec<u8>,
    ) -> Result<Self, Error> {
        let channel_names = if channel_names.is_empty() {
            pixel_format
                .channel_names()
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            channel_names
        };
        if pixel_format != PixelFormat::MultiChannel
            && channel_names.len() != pixel_format.channel_names().len()
        {
            return Err(Error::UnsupportedFormat);
        }
        let expected =
            width as usize * height as usize * channel_names.len() * component_format.size();
        if data.len() != expected {
            return Err(Error::InvalidDimensions);
        }
        Ok(Self {
            pixel_format,
            component_format,
            width,
            height,
            channel_names,
            data,
        })
    }

    /// Builds a `Float32` bitmap with canonical channels from interleaved samples.
    pub fn from_f32(
        pixel_format: PixelFormat,
        width: u32,
        height: u32,
        samples: &[f32],
    ) -> Result<Self, Error> {
        Self::from_raw(
            pixel_format,
            ComponentFormat::Float32,
            width,
            height,
            Vec::new(),
            bytemuck::cast_slice(samples).to_vec(),
        )
    }

    /// Builds a bitmap from `f32` samples, encoding them into `component_format`.
    pub(crate) fn from_samples(
        pixel_format: PixelFormat,
        component_format: ComponentFormat,
        width: u32,
        height: u32,
        channel_names: Vec<String>,
        samples: &[f32],
    ) -> Result<Self, Error> {
        let size = component_format.size();
        let mut data = vec![0u8; samples.len() * size];
        for (value, out) in samples.iter().zip(data.chunks_exact_mut(size)) {
            component_format.encode(*value, out);
        }
        Self::from_raw(pixel_format, component_format, width, height, channel_names, data)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn component_format(&self) -> ComponentFormat {
        self.component_format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.channel_count() * self.component_format.size()
    }

    /// Total size of the sample data in bytes.
    pub fn buffer_size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// All samples decoded to `f32`, interleaved.
    pub fn to_f32(&self) -> Vec<f32> {
        let size = self.component_format.size();
        self.data
            .chunks_exact(size)
            .map(|c| self.component_format.decode(c))
            .collect()
    }

    /// Converts to another pixel and component format.
    ///
    /// Luminance is broadcast to three channels; RGB collapses to Rec. 709 luminance and XYZ to
    /// its Y component. Alpha is kept when both formats carry it and set to 1 when gained.
    /// RGB and XYZ are treated as the same three-component layout. A multi-channel source
    /// provides the channels named like the target's (`R`, `G`, `B`, ...) wherever they sit,
    /// and its leading channels when it has no such names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] if a multi-channel source has neither the target's
    /// channel names nor enough channels to fill it by position.
    pub fn convert(
        &self,
        pixel_format: PixelFormat,
        component_format: ComponentFormat,
    ) -> Result<Bitmap, Error> {
        if pixel_format == self.pixel_format && component_format == self.component_format {
            return Ok(self.clone());
        }
        let src = self.to_f32();
        let src_channels = self.channel_count();

        // Any target can take a relabel of the source's channels.
        if pixel_format == PixelFormat::MultiChannel || pixel_format == self.pixel_format {
            return Bitmap::from_samples(
                pixel_format,
                component_format,
                self.width,
                self.height,
                self.channel_names.clone(),
                &src,
            );
        }

        let dst_channels = pixel_format.channel_names().len();
        let dst_color = pixel_format.color_channels().unwrap_or(dst_channels);
        let dst_alpha = pixel_format.has_alpha();
        let mut out = Vec::with_capacity(self.pixel_count() * dst_channels);

        match self.pixel_format.color_channels() {
            None => {
                let source = self.source_channels(pixel_format)?;
                for px in src.chunks_exact(src_channels.max(1)) {
                    out.extend(source.iter().map(|index| index.map_or(1.0, |i| px[i])));
                }
            }
            Some(src_color) => {
                let src_alpha = self.pixel_format.has_alpha();
                let xyz_source = matches!(self.pixel_format, PixelFormat::Xyz | PixelFormat::Xyza);
                for px in src.chunks_exact(src_channels) {
                    match (src_color, dst_color) {
                        (1, 3) => out.extend_from_slice(&[px[0]; 3]),
                        (3, 1) if xyz_source => out.push(px[1]),
                        (3, 1) => out.push(
                            LUMINANCE[0] * px[0] + LUMINANCE[1] * px[1] + LUMINANCE[2] * px[2],
                        ),
                        (n, _) => out.extend_from_slice(&px[..n]),
                    }
                    if dst_alpha {
                        out.push(if src_alpha { px[src_color] } else { 1.0 });
                    }
                }
            }
        }

        Bitmap::from_samples(
            pixel_format,
            component_format,
            self.width,
            self.height,
            Vec::new(),
            &out,
        )
    }

    /// Positions of `names` among this bitmap's channels, if all of them are present.
    pub(crate) fn named_channels(&self, names: &[&str]) -> Option<Vec<usize>> {
        names
            .iter()
            .map(|name| self.channel_names.iter().position(|c| c == name))
            .collect()
    }

    /// Which source channel feeds each channel of `target` when converting from multi-channel.
    /// `None` entries are an alpha channel the source lacks, filled with 1.
    fn source_channels(&self, target: PixelFormat) -> Result<Vec<Option<usize>>, Error> {
        let names = target.channel_names();
        if let Some(found) = self.named_channels(names) {
            return Ok(found.into_iter().map(Some).collect());
        }
        if target.has_alpha() {
            let color = &names[..names.len() - 1];
            if let Some(found) = self.named_channels(color) {
                return Ok(found.into_iter().map(Some).chain([None]).collect());
            }
        }
        if self.channel_count() < names.len() {
            return Err(Error::UnsupportedFormat);
        }
        Ok((0..names.len()).map(Some).collect())
    }

    /// Splits a composite bitmap into named sub-bitmaps.
    ///
    /// Channels named `prefix.suffix` are grouped by `prefix`; channels without a prefix are
    /// grouped under [`ROOT_CHANNEL`]. Groups whose suffixes form a known layout (`R,G,B`,
    /// `X,Y,Z`, ...) get that pixel format with channels in canonical order, others stay
    /// multi-channel. Groups are returned in order of first appearance. A bitmap that is not
    /// multi-channel yields a single root entry.
    pub fn split(&self) -> Vec<(String, Bitmap)> {
        if self.pixel_format != PixelFormat::MultiChannel {
            return vec![(ROOT_CHANNEL.to_string(), self.clone())];
        }

        let mut groups: Vec<(String, Vec<(usize, &str)>)> = Vec::new();
        for (index, name) in self.channel_names.iter().enumerate() {
            let (prefix, suffix) = match name.rsplit_once('.') {
                Some((prefix, suffix)) => (prefix, suffix),
                None => (ROOT_CHANNEL, name.as_str()),
            };
            match groups.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, members)) => members.push((index, suffix)),
                None => groups.push((prefix.to_string(), vec![(index, suffix)])),
            }
        }

        groups
            .into_iter()
            .map(|(prefix, members)| {
                let suffixes: Vec<&str> = members.iter().map(|(_, s)| *s).collect();
                let (pixel_format, source, names) = match PixelFormat::infer(&suffixes) {
                    Some((format, order)) => (
                        format,
                        order.iter().map(|&i| members[i].0).collect::<Vec<_>>(),
                        Vec::new(),
                    ),
                    None => (
                        PixelFormat::MultiChannel,
                        members.iter().map(|(i, _)| *i).collect(),
                        suffixes.iter().map(|s| s.to_string()).collect(),
                    ),
                };
                let sub = self.extract_channels(pixel_format, &source, names);
                (prefix, sub)
            })
            .collect()
    }

    fn extract_channels(
        &self,
        pixel_format: PixelFormat,
        source: &[usize],
        channel_names: Vec<String>,
    ) -> Bitmap {
        let size = self.component_format.size();
        let bpp = self.bytes_per_pixel();
        let mut data = Vec::with_capacity(self.pixel_count() * source.len() * size);
        for px in self.data.chunks_exact(bpp.max(1)) {
            for &channel in source {
                data.extend_from_slice(&px[channel * size..(channel + 1) * size]);
            }
        }
        let channel_names = if channel_names.is_empty() {
            pixel_format
                .channel_names()
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            channel_names
        };
        Bitmap {
            pixel_format,
            component_format: self.component_format,
            width: self.width,
            height: self.height,
            channel_names,
            data,
        }
    }
}
