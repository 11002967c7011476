//! Error types for the ray tracing subsystem.
//!
//! These never cross the public [`RayTracer`](crate::RayTracer) boundary:
//! the facade logs them and hands callers a sentinel instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for backend operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No hardware/driver path for this backend
    #[error("Ray tracing not supported: {0}")]
    Unsupported(String),

    /// Operation called before the backend was initialized
    #[error("Backend not initialized")]
    NotInitialized,

    /// Caller passed something unusable (empty list, bad stride, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Handle id unknown to this backend's table
    #[error("Invalid {kind} handle: {id}")]
    InvalidHandle { kind: &'static str, id: u32 },

    /// Refit called with a different instance count than the initial build
    #[error("Instance count mismatch: TLAS has {expected}, got {actual}")]
    InstanceCountMismatch { expected: u32, actual: u32 },

    /// Refit referenced a BLAS that was not part of the initial build
    #[error("BLAS {blas} is not part of TLAS {tlas}; rebuild required")]
    TopologyChanged { tlas: u32, blas: u32 },

    /// TLAS references a BLAS that has since been destroyed
    #[error("TLAS {tlas} references destroyed BLAS {blas}")]
    DanglingBlas { tlas: u32, blas: u32 },

    /// Device memory allocation failed
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// Acceleration-structure build or dispatch failed on the device
    #[error("Build failed: {0}")]
    BuildFailed(String),

    /// Mapping a host-visible buffer failed
    #[error("Readback failed: {0}")]
    Readback(String),

    /// Per-kind id counter wrapped
    #[error("Resource ids exhausted for {0}")]
    IdsExhausted(&'static str),

    /// No adapter for the requested native API
    #[error("Adapter request failed: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    /// Device creation failed
    #[error("Device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    /// Config file missing or unreadable
    #[error("Config not readable: {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`RtConfig`](crate::RtConfig)
    #[error("Invalid config: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    /// PNG encoding failed
    #[error("Image encode failed: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error from a string.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an unsupported error from a string.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::InvalidHandle { kind: "BLAS", id: 7 };
        assert!(e.to_string().contains("BLAS"));
        assert!(e.to_string().contains('7'));

        let e = Error::InstanceCountMismatch { expected: 2, actual: 3 };
        assert!(e.to_string().contains('2'));
        assert!(e.to_string().contains('3'));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::ConfigFormat(_)));
    }
}
