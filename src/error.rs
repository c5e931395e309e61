//! Error types for the denoiser adapter.
//!
//! See [`Error`] for the main error type returned by public APIs.

use thiserror::Error;

/// Errors from the denoiser adapter or the GPU backend behind it.
///
/// Every variant is terminal for the current call: nothing is retried and no
/// partial result is returned.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A channel name requested from a composite bitmap does not exist.
    #[error("could not find channel '{channel}' in:\n{available}")]
    ChannelNotFound { channel: String, available: String },
    /// Guide/model combination the backend cannot run (e.g. normals without albedo).
    #[error("invalid denoiser configuration: {0}")]
    InvalidConfiguration(String),
    /// A guide image required by the session's configuration was not supplied.
    #[error("missing {0} image for this denoiser invocation")]
    MissingGuide(&'static str),
    /// Image dimensions do not match the session or buffer size.
    #[error("invalid image dimensions")]
    InvalidDimensions,
    /// Pixel layout cannot be converted to what the backend expects.
    #[error("unsupported pixel format for denoising")]
    UnsupportedFormat,
    /// A call into the GPU backend failed.
    #[error("{call} failed: {message}")]
    Backend { call: &'static str, message: String },
    /// wgpu buffer mapping failed.
    #[error("wgpu buffer map failed: {0:?}")]
    BufferMapFailed(wgpu::BufferAsyncError),
}

impl Error {
    pub(crate) fn backend(call: &'static str, message: impl std::fmt::Display) -> Self {
        Error::Backend {
            call,
            message: message.to_string(),
        }
    }
}
