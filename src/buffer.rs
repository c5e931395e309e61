//! Scoped device allocations.
//!
//! See [`DeviceBuffer`]: memory is released when the buffer is dropped, so every exit path of
//! a denoise call (including `?` on a failed backend call) frees what it allocated.

use crate::device::{DenoiserDevice, DevicePtr, DeviceSpan};
use crate::error::Error;
use tracing::trace;

/// Device memory owned by the adapter.
pub struct DeviceBuffer<'d, D: DenoiserDevice + ?Sized> {
    device: &'d D,
    ptr: DevicePtr,
    len: usize,
}

impl<D: DenoiserDevice + ?Sized> std::fmt::Debug for DeviceBuffer<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<'d, D: DenoiserDevice + ?Sized> DeviceBuffer<'d, D> {
    /// Allocates `byte_size` bytes. Contents are undefined until written.
    ///
    /// A zero-sized buffer holds a null pointer and performs no device call.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if allocation fails.
    pub fn new(device: &'d D, byte_size: usize) -> Result<Self, Error> {
        let ptr = if byte_size == 0 {
            DevicePtr::NULL
        } else {
            let ptr = device.alloc(byte_size)?;
            trace!(ptr = ptr.0, bytes = byte_size, "device alloc");
            ptr
        };
        Ok(Self {
            device,
            ptr,
            len: byte_size,
        })
    }

    /// Allocates a buffer sized for `data` and copies it over.
    pub fn from_host(device: &'d D, data: &[u8]) -> Result<Self, Error> {
        let buffer = Self::new(device, data.len())?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Copies host bytes into the start of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] if `data` is larger than the buffer.
    pub fn write(&self, data: &[u8]) -> Result<(), Error> {
        if data.len() > self.len {
            return Err(Error::InvalidDimensions);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.device.copy_to_device(self.ptr, data)
    }

    /// Copies the start of the buffer into `out`.
    pub fn read(&self, out: &mut [u8]) -> Result<(), Error> {
        if out.len() > self.len {
            return Err(Error::InvalidDimensions);
        }
        if out.is_empty() {
            return Ok(());
        }
        self.device.copy_to_host(self.ptr, out)
    }

    /// Copies the whole buffer back to host memory.
    pub fn read_to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut out = vec![0u8; self.len];
        self.read(&mut out)?;
        Ok(out)
    }

    pub fn as_ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn span(&self) -> DeviceSpan {
        DeviceSpan {
            ptr: self.ptr,
            len: self.len,
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<D: DenoiserDevice + ?Sized> Drop for DeviceBuffer<'_, D> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            trace!(ptr = self.ptr.0, bytes = self.len, "device free");
            self.device.free(self.ptr);
        }
    }
}
