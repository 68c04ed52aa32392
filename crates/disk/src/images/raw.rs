//! Flat raw sector image handler (§4.4): no header, sector size is
//! supplied by the caller as a hint and must evenly divide the file size.

use fujinet_fs::IFile;

use crate::image::{DiskError, DiskGeometry, ImageHandler, ImageType};

pub struct RawHandler {
    file: Box<dyn IFile>,
    read_only: bool,
    geometry: DiskGeometry,
}

impl RawHandler {
    pub fn mount(mut file: Box<dyn IFile>, read_only: bool, sector_size_hint: u16) -> Result<Self, DiskError> {
        if sector_size_hint == 0 {
            return Err(DiskError::InvalidArgument("raw images require a sector size hint".to_string()));
        }
        let len = file.seek(std::io::SeekFrom::End(0)).map_err(|e| DiskError::Io(e.to_string()))?;
        if len % sector_size_hint as u64 != 0 {
            return Err(DiskError::InvalidArgument("raw image size is not a multiple of the sector size".to_string()));
        }
        let sector_count = (len / sector_size_hint as u64) as u32;
        Ok(Self {
            file,
            read_only,
            geometry: DiskGeometry {
                sector_size: sector_size_hint,
                sector_count,
                supports_variable_sector_size: false,
            },
        })
    }

    pub fn create(file: &mut dyn IFile, sector_size: u16, sector_count: u32) -> Result<(), DiskError> {
        if sector_size == 0 || sector_count == 0 {
            return Err(DiskError::InvalidArgument("raw images require sector_size>0 && sector_count>0".to_string()));
        }
        let total = sector_size as u64 * sector_count as u64;
        file.seek(std::io::SeekFrom::Start(total - 1)).map_err(|e| DiskError::Io(e.to_string()))?;
        file.write(&[0u8]).map_err(|e| DiskError::Io(e.to_string()))?;
        file.flush().map_err(|e| DiskError::Io(e.to_string()))?;
        Ok(())
    }
}

impl ImageHandler for RawHandler {
    fn image_type(&self) -> ImageType {
        ImageType::Raw
    }

    fn geometry(&self) -> DiskGeometry {
        self.geometry
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn read_sector(&mut self, lba: u32, dst: &mut [u8]) -> Result<usize, DiskError> {
        if lba >= self.geometry.sector_count {
            return Err(DiskError::OutOfRange(lba));
        }
        let size = self.geometry.sector_size as usize;
        let offset = lba as u64 * self.geometry.sector_size as u64;
        let n = size.min(dst.len());
        self.file.read_at(offset, &mut dst[..n]).map_err(|e| DiskError::Io(e.to_string()))?;
        Ok(n)
    }

    fn write_sector(&mut self, lba: u32, src: &[u8]) -> Result<usize, DiskError> {
        if self.read_only {
            return Err(DiskError::ReadOnly);
        }
        if lba >= self.geometry.sector_count {
            return Err(DiskError::OutOfRange(lba));
        }
        let size = self.geometry.sector_size as usize;
        if src.len() != size {
            return Err(DiskError::InvalidArgument(format!(
                "write to sector {lba} must be exactly {size} bytes, got {}",
                src.len()
            )));
        }
        let offset = lba as u64 * self.geometry.sector_size as u64;
        self.file.write_at(offset, src).map_err(|e| DiskError::Io(e.to_string()))?;
        Ok(size)
    }

    fn flush(&mut self) -> Result<(), DiskError> {
        self.file.flush().map_err(|e| DiskError::Io(e.to_string()))
    }
}
