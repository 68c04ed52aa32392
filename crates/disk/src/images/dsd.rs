//! `.dsd` (BBC double-sided DFS) placeholder (§4.4): there is no handler
//! yet, mount always fails with `UnsupportedImageType` rather than
//! silently mis-reading a single-sided catalogue.

use fujinet_fs::IFile;

use crate::image::{DiskError, ImageHandler};

pub fn mount(_file: Box<dyn IFile>, _read_only: bool) -> Result<Box<dyn ImageHandler>, DiskError> {
    Err(DiskError::UnsupportedImageType)
}
