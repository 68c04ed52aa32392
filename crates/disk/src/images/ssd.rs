//! BBC Micro DFS `.ssd` image handler (§4.4): flat 256-byte sectors, only
//! 400- or 800-sector disks are recognized.

use fujinet_fs::IFile;

use crate::image::{DiskError, DiskGeometry, ImageHandler, ImageType};

const SECTOR_SIZE: u16 = 256;
const VALID_SECTOR_COUNTS: [u32; 2] = [400, 800];

pub struct SsdHandler {
    file: Box<dyn IFile>,
    read_only: bool,
    geometry: DiskGeometry,
}

impl SsdHandler {
    pub fn mount(mut file: Box<dyn IFile>, read_only: bool) -> Result<Self, DiskError> {
        let len = file.seek(std::io::SeekFrom::End(0)).map_err(|e| DiskError::Io(e.to_string()))?;
        if len % SECTOR_SIZE as u64 != 0 {
            return Err(DiskError::InvalidArgument("SSD image size is not sector-aligned".to_string()));
        }
        let sector_count = (len / SECTOR_SIZE as u64) as u32;
        if !VALID_SECTOR_COUNTS.contains(&sector_count) {
            return Err(DiskError::InvalidArgument(format!(
                "SSD images must be 400 or 800 sectors, got {sector_count}"
            )));
        }
        Ok(Self {
            file,
            read_only,
            geometry: DiskGeometry {
                sector_size: SECTOR_SIZE,
                sector_count,
                supports_variable_sector_size: false,
            },
        })
    }

    /// Writes a minimal DFS 0.90 catalogue into sectors 0-1 and
    /// sparse-extends the file to `sector_count` sectors.
    pub fn create(file: &mut dyn IFile, sector_count: u32) -> Result<(), DiskError> {
        if !VALID_SECTOR_COUNTS.contains(&sector_count) {
            return Err(DiskError::InvalidArgument(format!(
                "SSD images must be 400 or 800 sectors, got {sector_count}"
            )));
        }

        let mut sector0 = [0u8; SECTOR_SIZE as usize];
        sector0[0..8].copy_from_slice(b"FUJINET ");

        let mut sector1 = [0u8; SECTOR_SIZE as usize];
        sector1[0..4].copy_from_slice(b"    ");
        sector1[4] = 0; // cycle number
        sector1[5] = ((sector_count >> 8) & 0x03) as u8; // file count (0) in high bits, sector-count bits 8-9
        sector1[6] = (sector_count & 0xFF) as u8;
        sector1[7] = 0; // boot option / unused

        file.write_at(0, &sector0).map_err(|e| DiskError::Io(e.to_string()))?;
        file.write_at(SECTOR_SIZE as u64, &sector1).map_err(|e| DiskError::Io(e.to_string()))?;

        let total = sector_count as u64 * SECTOR_SIZE as u64;
        file.seek(std::io::SeekFrom::Start(total.saturating_sub(1)))
            .map_err(|e| DiskError::Io(e.to_string()))?;
        file.write(&[0u8]).map_err(|e| DiskError::Io(e.to_string()))?;
        file.flush().map_err(|e| DiskError::Io(e.to_string()))?;
        Ok(())
    }
}

impl ImageHandler for SsdHandler {
    fn image_type(&self) -> ImageType {
        ImageType::Ssd
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
        let offset = lba as u64 * SECTOR_SIZE as u64;
        let n = (SECTOR_SIZE as usize).min(dst.len());
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
        if src.len() != SECTOR_SIZE as usize {
            return Err(DiskError::InvalidArgument(format!(
                "write to sector {lba} must be exactly {SECTOR_SIZE} bytes, got {}",
                src.len()
            )));
        }
        let offset = lba as u64 * SECTOR_SIZE as u64;
        self.file.write_at(offset, src).map_err(|e| DiskError::Io(e.to_string()))?;
        Ok(src.len())
    }

    fn flush(&mut self) -> Result<(), DiskError> {
        self.file.flush().map_err(|e| DiskError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fujinet_fs::{IFileSystem, LocalFilesystem, OpenMode};

    #[test]
    fn rejects_odd_sector_counts() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new("host", dir.path());
        fs.open("d.ssd", OpenMode::CreateReadWrite).unwrap();
        let mut file = fs.open("d.ssd", OpenMode::ReadWrite).unwrap();
        assert!(SsdHandler::create(file.as_mut(), 123).is_err());
    }

    #[test]
    fn creates_and_mounts_400_sector_image() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new("host", dir.path());
        fs.open("d.ssd", OpenMode::CreateReadWrite).unwrap();
        let mut file = fs.open("d.ssd", OpenMode::ReadWrite).unwrap();
        SsdHandler::create(file.as_mut(), 400).unwrap();
        drop(file);

        let file = fs.open("d.ssd", OpenMode::ReadWrite).unwrap();
        let handler = SsdHandler::mount(file, false).unwrap();
        assert_eq!(handler.geometry().sector_count, 400);
        assert_eq!(handler.geometry().sector_size, 256);
    }
}
