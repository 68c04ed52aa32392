//! `DiskDevice` (§4.4 tail, §6): wire framing for `DiskService` over the
//! bus. Six commands plus `Create`; slot numbers are 1-based on the wire,
//! 0-based everywhere inside `DiskService`.

use std::sync::Arc;

use fujinet_bus::Device;
use fujinet_fs::StorageManager;
use fujinet_wire::{CodecError, IORequest, IOResponse, Reader, StatusCode, Writer, PROTOCOL_VERSION};

use crate::{DiskError, DiskService, ImageType, MountOptions, TypeOverride};

pub const OP_MOUNT: u16 = 0x01;
pub const OP_UNMOUNT: u16 = 0x02;
pub const OP_READ_SECTOR: u16 = 0x03;
pub const OP_WRITE_SECTOR: u16 = 0x04;
pub const OP_INFO: u16 = 0x05;
pub const OP_CLEAR_CHANGED: u16 = 0x06;
pub const OP_CREATE: u16 = 0x07;

fn type_to_wire(t: ImageType) -> u8 {
    match t {
        ImageType::Atr => 1,
        ImageType::Ssd => 2,
        ImageType::Dsd => 3,
        ImageType::Raw => 4,
    }
}

fn wire_to_override(v: u8) -> TypeOverride {
    match v {
        1 => TypeOverride::Atr,
        2 => TypeOverride::Ssd,
        3 => TypeOverride::Dsd,
        4 => TypeOverride::Raw,
        _ => TypeOverride::Auto,
    }
}

fn wire_to_type(v: u8) -> Result<ImageType, DiskError> {
    match v {
        1 => Ok(ImageType::Atr),
        2 => Ok(ImageType::Ssd),
        3 => Ok(ImageType::Dsd),
        4 => Ok(ImageType::Raw),
        _ => Err(DiskError::UnsupportedImageType),
    }
}

fn error_to_byte(e: &DiskError) -> u8 {
    match e {
        DiskError::NotMounted => 1,
        DiskError::OutOfRange(_) => 2,
        DiskError::ReadOnly => 3,
        DiskError::Io(_) => 4,
        DiskError::AlreadyExists => 5,
        DiskError::UnsupportedImageType => 6,
        DiskError::InvalidArgument(_) => 7,
    }
}

fn error_to_status(e: &DiskError) -> StatusCode {
    match e {
        DiskError::NotMounted => StatusCode::NotReady,
        DiskError::OutOfRange(_) => StatusCode::InvalidRequest,
        DiskError::ReadOnly => StatusCode::IoError,
        DiskError::Io(_) => StatusCode::IoError,
        DiskError::AlreadyExists => StatusCode::InvalidRequest,
        DiskError::UnsupportedImageType => StatusCode::Unsupported,
        DiskError::InvalidArgument(_) => StatusCode::InvalidRequest,
    }
}

/// Converts the 1-based wire slot to the 0-based `DiskService` index.
fn wire_slot_to_index(slot: u8) -> Result<usize, CodecError> {
    if slot == 0 {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(slot as usize - 1)
}

pub struct DiskDevice {
    service: DiskService,
    storage: Arc<StorageManager>,
}

impl DiskDevice {
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self {
            service: DiskService::new(),
            storage,
        }
    }

    pub fn service(&self) -> &DiskService {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut DiskService {
        &mut self.service
    }

    fn handle_mount(&mut self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let result: Result<(), StatusCode> = (|| {
            let wire_slot = r.u8().map_err(|_| StatusCode::InvalidRequest)?;
            let flags = r.u8().map_err(|_| StatusCode::InvalidRequest)?;
            let type_override = r.u8().map_err(|_| StatusCode::InvalidRequest)?;
            let sector_size_hint = r.u16().map_err(|_| StatusCode::InvalidRequest)?;
            let fs_name = r.lp_str().map_err(|_| StatusCode::InvalidRequest)?;
            let path = r.lp_str().map_err(|_| StatusCode::InvalidRequest)?;

            let slot = wire_slot_to_index(wire_slot).map_err(|_| StatusCode::InvalidRequest)?;
            let Some(fs) = self.storage.get(&fs_name) else {
                return Err(StatusCode::DeviceNotFound);
            };

            let options = MountOptions {
                read_only_requested: flags & 0x01 != 0,
                type_override: wire_to_override(type_override),
                sector_size_hint,
            };
            self.service.mount(slot, fs, &path, options).map_err(|e| error_to_status(&e))
        })();

        match result {
            Ok(()) => IOResponse::ok(req, minimal_response()),
            Err(status) => IOResponse::error(req, status),
        }
    }

    fn handle_unmount(&mut self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let Ok(wire_slot) = r.u8() else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let Ok(slot) = wire_slot_to_index(wire_slot) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        match self.service.unmount(slot) {
            Ok(()) => IOResponse::ok(req, minimal_response()),
            Err(e) => IOResponse::error(req, error_to_status(&e)),
        }
    }

    fn handle_read_sector(&mut self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let (Ok(wire_slot), Ok(lba), Ok(max_bytes)) = (r.u8(), r.u32(), r.u16()) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let Ok(slot) = wire_slot_to_index(wire_slot) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };

        let mut buf = vec![0u8; max_bytes as usize];
        match self.service.read_sector(slot, lba, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                let mut w = Writer::new();
                w.version().u8(wire_slot).lp_bytes(&buf);
                IOResponse::ok(req, w.into_vec())
            }
            Err(e) => IOResponse::error(req, error_to_status(&e)),
        }
    }

    fn handle_write_sector(&mut self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let (Ok(wire_slot), Ok(lba)) = (r.u8(), r.u32()) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let Ok(data) = r.lp_bytes() else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let Ok(slot) = wire_slot_to_index(wire_slot) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };

        match self.service.write_sector(slot, lba, data) {
            Ok(written) => {
                let mut w = Writer::new();
                w.version().u8(wire_slot).u16(written as u16);
                IOResponse::ok(req, w.into_vec())
            }
            Err(e) => IOResponse::error(req, error_to_status(&e)),
        }
    }

    fn handle_info(&mut self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let Ok(wire_slot) = r.u8() else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let Ok(slot) = wire_slot_to_index(wire_slot) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };

        match self.service.info(slot) {
            Ok(info) => {
                let mut flags = 0u8;
                if info.inserted {
                    flags |= 0x01;
                }
                if info.read_only {
                    flags |= 0x02;
                }
                if info.dirty {
                    flags |= 0x04;
                }
                if info.changed {
                    flags |= 0x08;
                }
                let mut w = Writer::new();
                w.version()
                    .u8(wire_slot)
                    .u8(flags)
                    .u8(info.image_type.map(type_to_wire).unwrap_or(0))
                    .u16(info.geometry.map(|g| g.sector_size).unwrap_or(0))
                    .u32(info.geometry.map(|g| g.sector_count).unwrap_or(0))
                    .u8(info.last_error.as_ref().map(|e| error_to_byte(e)).unwrap_or(0));
                IOResponse::ok(req, w.into_vec())
            }
            Err(e) => IOResponse::error(req, error_to_status(&e)),
        }
    }

    fn handle_clear_changed(&mut self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let Ok(wire_slot) = r.u8() else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let Ok(slot) = wire_slot_to_index(wire_slot) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        match self.service.clear_changed(slot) {
            Ok(()) => IOResponse::ok(req, minimal_response()),
            Err(e) => IOResponse::error(req, error_to_status(&e)),
        }
    }

    fn handle_create(&mut self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let result: Result<(), StatusCode> = (|| {
            let flags = r.u8().map_err(|_| StatusCode::InvalidRequest)?;
            let type_byte = r.u8().map_err(|_| StatusCode::InvalidRequest)?;
            let sector_size = r.u16().map_err(|_| StatusCode::InvalidRequest)?;
            let sector_count = r.u32().map_err(|_| StatusCode::InvalidRequest)?;
            let fs_name = r.lp_str().map_err(|_| StatusCode::InvalidRequest)?;
            let path = r.lp_str().map_err(|_| StatusCode::InvalidRequest)?;

            let image_type = wire_to_type(type_byte).map_err(|e| error_to_status(&e))?;
            let Some(fs) = self.storage.get(&fs_name) else {
                return Err(StatusCode::DeviceNotFound);
            };
            let overwrite = flags & 0x01 != 0;
            self.service
                .create_image(fs.as_ref(), &path, image_type, sector_size, sector_count, overwrite)
                .map_err(|e| error_to_status(&e))
        })();

        match result {
            Ok(()) => IOResponse::ok(req, minimal_response()),
            Err(status) => IOResponse::error(req, status),
        }
    }
}

fn minimal_response() -> Vec<u8> {
    let mut w = Writer::new();
    w.version();
    w.into_vec()
}

impl Device for DiskDevice {
    fn handle(&mut self, request: &IORequest) -> IOResponse {
        match request.command {
            OP_MOUNT => self.handle_mount(request),
            OP_UNMOUNT => self.handle_unmount(request),
            OP_READ_SECTOR => self.handle_read_sector(request),
            OP_WRITE_SECTOR => self.handle_write_sector(request),
            OP_INFO => self.handle_info(request),
            OP_CLEAR_CHANGED => self.handle_clear_changed(request),
            OP_CREATE => self.handle_create(request),
            _ => IOResponse::error(request, StatusCode::InvalidRequest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fujinet_fs::LocalFilesystem;

    fn device_with_host_fs(dir: &tempfile::TempDir) -> DiskDevice {
        let mut storage = StorageManager::new();
        storage.register(Arc::new(LocalFilesystem::new("host", dir.path())));
        DiskDevice::new(Arc::new(storage))
    }

    fn create_request(fs_name: &str, path: &str, image_type: u8, sector_size: u16, sector_count: u32) -> IORequest {
        let mut w = Writer::new();
        w.version().u8(0).u8(image_type).u16(sector_size).u32(sector_count).lp_str(fs_name).lp_str(path);
        IORequest::new(1, 0xF1, OP_CREATE, w.into_vec())
    }

    fn mount_request(slot: u8, fs_name: &str, path: &str) -> IORequest {
        let mut w = Writer::new();
        w.version().u8(slot).u8(0).u8(0).u16(0).lp_str(fs_name).lp_str(path);
        IORequest::new(2, 0xF1, OP_MOUNT, w.into_vec())
    }

    #[test]
    fn create_mount_read_write_info_clear_changed() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = device_with_host_fs(&dir);

        let resp = device.handle(&create_request("host", "d.raw", 4, 128, 8));
        assert_eq!(resp.status, StatusCode::Ok);

        let resp = device.handle(&mount_request(1, "host", "d.raw"));
        assert_eq!(resp.status, StatusCode::Ok);

        let mut w = Writer::new();
        w.version().u8(1).u8(0);
        let resp = device.handle(&IORequest::new(3, 0xF1, OP_INFO, w.into_vec()));
        assert_eq!(resp.status, StatusCode::Ok);
        let mut r = Reader::new(&resp.payload);
        r.version(PROTOCOL_VERSION).unwrap();
        let slot_echo = r.u8().unwrap();
        let flags = r.u8().unwrap();
        assert_eq!(slot_echo, 1);
        assert_eq!(flags & 0x01, 0x01); // inserted
        assert_eq!(flags & 0x08, 0x08); // changed

        let mut w = Writer::new();
        w.version().u8(1).u32(2).lp_bytes(&[0x33u8; 128]);
        let resp = device.handle(&IORequest::new(4, 0xF1, OP_WRITE_SECTOR, w.into_vec()));
        assert_eq!(resp.status, StatusCode::Ok);

        let mut w = Writer::new();
        w.version().u8(1).u32(2).u16(128);
        let resp = device.handle(&IORequest::new(5, 0xF1, OP_READ_SECTOR, w.into_vec()));
        assert_eq!(resp.status, StatusCode::Ok);
        let mut r = Reader::new(&resp.payload);
        r.version(PROTOCOL_VERSION).unwrap();
        let _slot = r.u8().unwrap();
        let data = r.lp_bytes().unwrap();
        assert_eq!(data, vec![0x33u8; 128]);

        let mut w = Writer::new();
        w.version().u8(1);
        let resp = device.handle(&IORequest::new(6, 0xF1, OP_CLEAR_CHANGED, w.into_vec()));
        assert_eq!(resp.status, StatusCode::Ok);
    }

    #[test]
    fn mount_unknown_filesystem_is_device_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = device_with_host_fs(&dir);
        let resp = device.handle(&mount_request(1, "sd0", "d.raw"));
        assert_eq!(resp.status, StatusCode::DeviceNotFound);
    }
}
