//! Per-format image handler contract (§4.4) and the small value types
//! every format shares.

use fujinet_fs::FsError;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DiskError {
    #[error("slot not mounted")]
    NotMounted,
    #[error("sector {0} is out of range")]
    OutOfRange(u32),
    #[error("image is read-only")]
    ReadOnly,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("image already exists")]
    AlreadyExists,
    #[error("unsupported image type")]
    UnsupportedImageType,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<FsError> for DiskError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::AlreadyExists(_) => DiskError::AlreadyExists,
            other => DiskError::Io(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Atr,
    Ssd,
    Dsd,
    Raw,
}

/// Wire-level "Auto, or force this format" selector for `mount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeOverride {
    #[default]
    Auto,
    Atr,
    Ssd,
    Dsd,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub sector_size: u16,
    pub sector_count: u32,
    pub supports_variable_sector_size: bool,
}

/// A mounted image: owns the open file handle (exclusively, per §3
/// ownership rules) and knows how to translate an LBA into bytes.
pub trait ImageHandler: Send {
    fn image_type(&self) -> ImageType;
    fn geometry(&self) -> DiskGeometry;
    fn read_only(&self) -> bool;

    /// `dst.len()` must be at least `sector_size_for(lba)`; returns the
    /// number of bytes actually written into `dst`.
    fn read_sector(&mut self, lba: u32, dst: &mut [u8]) -> Result<usize, DiskError>;

    /// `src.len()` must equal exactly `sector_size_for(lba)`.
    fn write_sector(&mut self, lba: u32, src: &[u8]) -> Result<usize, DiskError>;

    fn flush(&mut self) -> Result<(), DiskError>;
}
