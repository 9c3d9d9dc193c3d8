//! Errors raised by the graphics layer.
use thiserror::Error;

/// Error raised by the graphics layer.
#[derive(Debug, Error)]
pub enum GxError {
    /// No suitable physical device was found.
    #[error("no suitable graphics adapter found")]
    NoAdapter,
    /// The logical device could not be created.
    #[error("failed to request logical device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    /// Mapping a buffer for readback failed.
    #[error("failed to map buffer for reading: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),
    /// A shader module or pipeline failed validation.
    #[error("shader or pipeline validation failed ({label}): {message}")]
    Validation {
        /// Label of the object that failed.
        label: String,
        /// Message reported by the device.
        message: String,
    },
    /// A size or format mismatch between resources.
    #[error("resource mismatch: {0}")]
    Mismatch(String),
}
