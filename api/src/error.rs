//! The error type shared by the device and record layers.
//!
//! Higher layers in `bpfs-core` wrap this error with `#[from]` the same way
//! this module wraps `io::Error` and `bincode::Error`, so `?` composes
//! across the whole stack from the device up to the file system facade.

use std::io;
use thiserror::Error;

/// Errors raised by the device and on-media record (de)serialization layer.
#[derive(Error, Debug)]
pub enum APIError {
    /// I/O failure while mapping or flushing the backing device.
    #[error("device I/O error")]
    DeviceIO(#[from] io::Error),
    /// Failure (de)serializing a fixed-width on-media record.
    #[error("record (de)serialization error")]
    Serialize(#[from] bincode::Error),
    /// Invalid input to the device layer.
    #[error("invalid device input: {0}")]
    ControllerInput(&'static str),
    /// Invalid input to a block or buffer.
    #[error("invalid block input: {0}")]
    BlockInput(&'static str),
}

/// Shorthand for a `Result` with the error type [`APIError`].
pub type Result<T> = std::result::Result<T, APIError>;
