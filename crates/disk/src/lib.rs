//! `DiskService`: 8 fixed disk slots, mount/unmount/read/write/create
//! driven through an abstract filesystem, plus `DiskDevice`, the bus wire
//! wrapper around it (§4.4).

pub mod device;
pub mod image;
pub mod images;

use std::sync::Arc;

use fujinet_fs::{IFileSystem, OpenMode};
use tracing::{debug, warn};

pub use image::{DiskError, DiskGeometry, ImageHandler, ImageType, TypeOverride};
pub use device::DiskDevice;

/// Fixed slot count (§3 "Disk Slot").
pub const SLOT_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct MountOptions {
    pub read_only_requested: bool,
    pub type_override: TypeOverride,
    pub sector_size_hint: u16,
}

#[derive(Debug, Clone)]
pub struct DiskSlotInfo {
    pub inserted: bool,
    pub read_only: bool,
    pub dirty: bool,
    pub changed: bool,
    pub image_type: Option<ImageType>,
    pub geometry: Option<DiskGeometry>,
    pub last_error: Option<DiskError>,
    pub fs_name: String,
    pub path: String,
}

struct Slot {
    read_only: bool,
    dirty: bool,
    changed: bool,
    image_type: Option<ImageType>,
    last_error: Option<DiskError>,
    fs_name: String,
    path: String,
    handler: Option<Box<dyn ImageHandler>>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            read_only: false,
            dirty: false,
            changed: false,
            image_type: None,
            last_error: None,
            fs_name: String::new(),
            path: String::new(),
            handler: None,
        }
    }
}

impl Slot {
    fn inserted(&self) -> bool {
        self.handler.is_some()
    }
}

fn derive_type_from_extension(path: &str) -> Option<ImageType> {
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "atr" => Some(ImageType::Atr),
        "ssd" => Some(ImageType::Ssd),
        "dsd" => Some(ImageType::Dsd),
        "img" | "raw" => Some(ImageType::Raw),
        _ => None,
    }
}

fn resolve_type(path: &str, override_: TypeOverride) -> Result<ImageType, DiskError> {
    match override_ {
        TypeOverride::Auto => derive_type_from_extension(path).ok_or(DiskError::UnsupportedImageType),
        TypeOverride::Atr => Ok(ImageType::Atr),
        TypeOverride::Ssd => Ok(ImageType::Ssd),
        TypeOverride::Dsd => Ok(ImageType::Dsd),
        TypeOverride::Raw => Ok(ImageType::Raw),
    }
}

fn open_handler(
    fs: &dyn IFileSystem,
    path: &str,
    image_type: ImageType,
    read_only: bool,
    sector_size_hint: u16,
) -> Result<Box<dyn ImageHandler>, DiskError> {
    let mode = if read_only { OpenMode::Read } else { OpenMode::ReadWrite };
    let file = fs.open(path, mode)?;
    match image_type {
        ImageType::Atr => Ok(Box::new(images::AtrHandler::mount(file, read_only)?)),
        ImageType::Ssd => Ok(Box::new(images::SsdHandler::mount(file, read_only)?)),
        ImageType::Raw => Ok(Box::new(images::RawHandler::mount(file, read_only, sector_size_hint)?)),
        ImageType::Dsd => images::dsd::mount(file, read_only),
    }
}

/// N=8 disk slots, each exclusively owning an image handler which in
/// turn exclusively owns its file handle.
pub struct DiskService {
    slots: Vec<Slot>,
}

impl Default for DiskService {
    fn default() -> Self {
        let mut slots = Vec::with_capacity(SLOT_COUNT);
        slots.resize_with(SLOT_COUNT, Slot::default);
        Self { slots }
    }
}

impl DiskService {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Slot, DiskError> {
        self.slots.get_mut(slot).ok_or(DiskError::InvalidArgument(format!("no such slot {slot}")))
    }

    pub fn mount(
        &mut self,
        slot: usize,
        fs: Arc<dyn IFileSystem>,
        path: &str,
        options: MountOptions,
    ) -> Result<(), DiskError> {
        let image_type = resolve_type(path, options.type_override)?;

        let mut read_only = options.read_only_requested;
        let handler = match open_handler(fs.as_ref(), path, image_type, read_only, options.sector_size_hint) {
            Ok(h) => h,
            Err(_) if !read_only => {
                // Writable open failed: degrade to read-only per §4.4.
                read_only = true;
                warn!(slot, path, "writable mount failed, degrading to read-only");
                open_handler(fs.as_ref(), path, image_type, read_only, options.sector_size_hint)?
            }
            Err(e) => return Err(e),
        };

        let slot_ref = self.slot_mut(slot)?;
        if let Some(mut old) = slot_ref.handler.take() {
            let _ = old.flush();
        }

        slot_ref.handler = Some(handler);
        slot_ref.read_only = read_only;
        slot_ref.dirty = false;
        slot_ref.changed = true;
        slot_ref.image_type = Some(image_type);
        slot_ref.last_error = None;
        slot_ref.fs_name = fs.name().to_string();
        slot_ref.path = path.to_string();
        debug!(slot, path, ?image_type, read_only, "disk mounted");
        Ok(())
    }

    pub fn unmount(&mut self, slot: usize) -> Result<(), DiskError> {
        let slot_ref = self.slot_mut(slot)?;
        if let Some(mut handler) = slot_ref.handler.take() {
            handler.flush()?;
        }
        slot_ref.changed = true;
        slot_ref.dirty = false;
        slot_ref.image_type = None;
        slot_ref.fs_name.clear();
        slot_ref.path.clear();
        Ok(())
    }

    pub fn read_sector(&mut self, slot: usize, lba: u32, dst: &mut [u8]) -> Result<usize, DiskError> {
        let slot_ref = self.slot_mut(slot)?;
        let Some(handler) = slot_ref.handler.as_mut() else {
            return Err(DiskError::NotMounted);
        };
        let result = handler.read_sector(lba, dst);
        if let Err(e) = &result {
            slot_ref.last_error = Some(e.clone());
        }
        result
    }

    pub fn write_sector(&mut self, slot: usize, lba: u32, src: &[u8]) -> Result<usize, DiskError> {
        let slot_ref = self.slot_mut(slot)?;
        let Some(handler) = slot_ref.handler.as_mut() else {
            return Err(DiskError::NotMounted);
        };
        if slot_ref.read_only {
            slot_ref.last_error = Some(DiskError::ReadOnly);
            return Err(DiskError::ReadOnly);
        }
        let result = handler.write_sector(lba, src);
        match &result {
            Ok(_) => slot_ref.dirty = true,
            Err(e) => slot_ref.last_error = Some(e.clone()),
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_image(
        &self,
        fs: &dyn IFileSystem,
        path: &str,
        image_type: ImageType,
        sector_size: u16,
        sector_count: u32,
        overwrite: bool,
    ) -> Result<(), DiskError> {
        if sector_size == 0 || sector_count == 0 {
            return Err(DiskError::InvalidArgument("sector_size>0 && sector_count>0 required".to_string()));
        }
        if fs.exists(path) && !overwrite {
            return Err(DiskError::AlreadyExists);
        }
        let mut file = fs.open(path, OpenMode::CreateReadWrite)?;
        match image_type {
            ImageType::Atr => images::AtrHandler::create(file.as_mut(), sector_size, sector_count)?,
            ImageType::Ssd => images::SsdHandler::create(file.as_mut(), sector_count)?,
            ImageType::Raw => images::RawHandler::create(file.as_mut(), sector_size, sector_count)?,
            ImageType::Dsd => return Err(DiskError::UnsupportedImageType),
        }
        file.flush()?;
        Ok(())
    }

    pub fn info(&self, slot: usize) -> Result<DiskSlotInfo, DiskError> {
        let slot_ref = self.slots.get(slot).ok_or(DiskError::InvalidArgument(format!("no such slot {slot}")))?;
        Ok(DiskSlotInfo {
            inserted: slot_ref.inserted(),
            read_only: slot_ref.read_only,
            dirty: slot_ref.dirty,
            changed: slot_ref.changed,
            image_type: slot_ref.image_type,
            geometry: slot_ref.handler.as_ref().map(|h| h.geometry()),
            last_error: slot_ref.last_error.clone(),
            fs_name: slot_ref.fs_name.clone(),
            path: slot_ref.path.clone(),
        })
    }

    pub fn clear_changed(&mut self, slot: usize) -> Result<(), DiskError> {
        self.slot_mut(slot)?.changed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fujinet_fs::LocalFilesystem;

    fn fs(dir: &tempfile::TempDir) -> Arc<dyn IFileSystem> {
        Arc::new(LocalFilesystem::new("host", dir.path()))
    }

    #[test]
    fn scenario_s3_create_mount_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let filesystem = fs(&dir);
        let mut service = DiskService::new();

        service
            .create_image(filesystem.as_ref(), "disk.atr", ImageType::Atr, 256, 10, false)
            .unwrap();

        service
            .mount(
                0,
                filesystem.clone(),
                "disk.atr",
                MountOptions {
                    read_only_requested: false,
                    type_override: TypeOverride::Auto,
                    sector_size_hint: 0,
                },
            )
            .unwrap();

        let info = service.info(0).unwrap();
        assert!(info.inserted);
        assert!(info.changed);
        let geometry = info.geometry.unwrap();
        assert_eq!(geometry.sector_size, 256);
        assert_eq!(geometry.sector_count, 10);
        assert!(geometry.supports_variable_sector_size);

        service.clear_changed(0).unwrap();
        assert!(!service.info(0).unwrap().changed);

        let pattern = [0x11u8; 256];
        service.write_sector(0, 3, &pattern).unwrap();
        assert!(service.info(0).unwrap().dirty);
        assert!(!service.info(0).unwrap().changed);

        let mut dst = [0u8; 256];
        let n = service.read_sector(0, 3, &mut dst).unwrap();
        assert_eq!(n, 256);
        assert_eq!(dst, pattern);

        assert_eq!(service.read_sector(0, 10, &mut dst), Err(DiskError::OutOfRange(10)));
    }

    #[test]
    fn mount_then_unmount_sets_changed_and_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let filesystem = fs(&dir);
        let mut service = DiskService::new();
        service
            .create_image(filesystem.as_ref(), "d.raw", ImageType::Raw, 128, 4, false)
            .unwrap();
        service
            .mount(
                0,
                filesystem.clone(),
                "d.raw",
                MountOptions {
                    read_only_requested: false,
                    type_override: TypeOverride::Raw,
                    sector_size_hint: 128,
                },
            )
            .unwrap();
        service.clear_changed(0).unwrap();

        service.unmount(0).unwrap();
        let info = service.info(0).unwrap();
        assert!(!info.inserted);
        assert!(info.changed);
    }

    #[test]
    fn create_image_refuses_existing_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let filesystem = fs(&dir);
        let mut service = DiskService::new();
        service
            .create_image(filesystem.as_ref(), "d.raw", ImageType::Raw, 128, 4, false)
            .unwrap();
        assert_eq!(
            service.create_image(filesystem.as_ref(), "d.raw", ImageType::Raw, 128, 4, false),
            Err(DiskError::AlreadyExists)
        );
        service
            .create_image(filesystem.as_ref(), "d.raw", ImageType::Raw, 128, 4, true)
            .unwrap();
    }

    #[test]
    fn dsd_always_fails_to_mount() {
        let dir = tempfile::tempdir().unwrap();
        let filesystem = fs(&dir);
        filesystem.open("d.dsd", fujinet_fs::OpenMode::CreateReadWrite).unwrap();
        let mut service = DiskService::new();
        let result = service.mount(
            0,
            filesystem.clone(),
            "d.dsd",
            MountOptions {
                read_only_requested: false,
                type_override: TypeOverride::Auto,
                sector_size_hint: 0,
            },
        );
        assert_eq!(result, Err(DiskError::UnsupportedImageType));
    }
}
