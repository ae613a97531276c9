use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Error type for block device operations and registry lookups.
///
/// [`DeviceError::Io`] stores a human-readable `String` so backends that are not file based can
/// surface their failures without a platform-specific error type.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("out of range: offset={offset} len={len} capacity={capacity}")]
    OutOfRange { offset: u32, len: usize, capacity: u32 },

    #[error("integer overflow while computing byte offsets")]
    OffsetOverflow,

    #[error("device is read-only")]
    ReadOnly,

    #[error("device image too large: {0} bytes")]
    TooLarge(u64),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Io(err.to_string())
    }
}
