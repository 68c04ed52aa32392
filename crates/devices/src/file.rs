//! `FileDevice` (§2 component I): a thin bus wrapper over
//! `StorageManager`/`IFileSystem` — stat, list, read, write, mkdir, each a
//! single stateless round trip (no open file handles survive past one
//! request, unlike `NetworkDevice`'s sessions).

use std::io::SeekFrom;
use std::sync::Arc;

use fujinet_bus::Device;
use fujinet_fs::{FsError, IFileSystem, OpenMode, StorageManager};
use fujinet_wire::{CodecError, IORequest, IOResponse, Reader, StatusCode, Writer, PROTOCOL_VERSION};
use tracing::trace;

pub const OP_STAT: u16 = 0x01;
pub const OP_LIST_DIRECTORY: u16 = 0x02;
pub const OP_READ_FILE: u16 = 0x03;
pub const OP_WRITE_FILE: u16 = 0x04;
pub const OP_MAKE_DIRECTORY: u16 = 0x05;

fn fs_error_to_status(e: FsError) -> StatusCode {
    match e {
        FsError::NotFound(_) => StatusCode::IoError,
        FsError::AlreadyExists(_) => StatusCode::InvalidRequest,
        FsError::NotADirectory(_) => StatusCode::InvalidRequest,
        FsError::IsADirectory(_) => StatusCode::InvalidRequest,
        FsError::PermissionDenied(_) => StatusCode::IoError,
        FsError::Io(_) => StatusCode::IoError,
    }
}

struct FsAndPath {
    fs: Arc<dyn IFileSystem>,
    path: String,
}

fn decode_fs_and_path(r: &mut Reader) -> Result<(String, String), CodecError> {
    let fs = r.lp_str()?;
    let path = r.lp_str()?;
    Ok((fs, path))
}

pub struct FileDevice {
    storage: Arc<StorageManager>,
}

impl FileDevice {
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self { storage }
    }

    fn resolve(&self, fs_name: &str, path: String) -> Result<FsAndPath, StatusCode> {
        let fs = self.storage.get(fs_name).ok_or(StatusCode::DeviceNotFound)?;
        Ok(FsAndPath { fs, path })
    }

    fn handle_stat(&self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let Ok((fs_name, path)) = decode_fs_and_path(&mut r) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let target = match self.resolve(&fs_name, path) {
            Ok(t) => t,
            Err(status) => return IOResponse::error(req, status),
        };
        match target.fs.stat(&target.path) {
            Ok(stat) => {
                let mut w = Writer::new();
                w.version().u8(stat.is_directory as u8).u64(stat.size);
                IOResponse::ok(req, w.into_vec())
            }
            Err(e) => IOResponse::error(req, fs_error_to_status(e)),
        }
    }

    fn handle_list_directory(&self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let Ok((fs_name, path)) = decode_fs_and_path(&mut r) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let target = match self.resolve(&fs_name, path) {
            Ok(t) => t,
            Err(status) => return IOResponse::error(req, status),
        };
        match target.fs.list_directory(&target.path) {
            Ok(entries) => {
                let mut w = Writer::new();
                w.version().u16(entries.len() as u16);
                for entry in &entries {
                    w.lp_str(&entry.name).u8(entry.is_directory as u8).u64(entry.size);
                }
                trace!(fs = %fs_name, count = entries.len(), "listed directory");
                IOResponse::ok(req, w.into_vec())
            }
            Err(e) => IOResponse::error(req, fs_error_to_status(e)),
        }
    }

    fn handle_read_file(&self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let Ok((fs_name, path)) = decode_fs_and_path(&mut r) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let (Ok(offset), Ok(max_bytes)) = (r.u64(), r.u16()) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let target = match self.resolve(&fs_name, path) {
            Ok(t) => t,
            Err(status) => return IOResponse::error(req, status),
        };
        let mut file = match target.fs.open(&target.path, OpenMode::Read) {
            Ok(f) => f,
            Err(e) => return IOResponse::error(req, fs_error_to_status(e)),
        };
        if let Err(e) = file.seek(SeekFrom::Start(offset)) {
            return IOResponse::error(req, fs_error_to_status(e));
        }
        let mut buf = vec![0u8; max_bytes as usize];
        let n = match file.read(&mut buf) {
            Ok(n) => n,
            Err(e) => return IOResponse::error(req, fs_error_to_status(e)),
        };
        buf.truncate(n);
        let mut w = Writer::new();
        w.version().u64(offset).lp_bytes(&buf);
        IOResponse::ok(req, w.into_vec())
    }

    fn handle_write_file(&self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let Ok((fs_name, path)) = decode_fs_and_path(&mut r) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let Ok(create) = r.u8() else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let (Ok(offset), Ok(data)) = (r.u64(), r.lp_bytes()) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let data = data.to_vec();
        let target = match self.resolve(&fs_name, path) {
            Ok(t) => t,
            Err(status) => return IOResponse::error(req, status),
        };
        let mode = if create != 0 { OpenMode::CreateReadWrite } else { OpenMode::Write };
        let mut file = match target.fs.open(&target.path, mode) {
            Ok(f) => f,
            Err(e) => return IOResponse::error(req, fs_error_to_status(e)),
        };
        if let Err(e) = file.seek(SeekFrom::Start(offset)) {
            return IOResponse::error(req, fs_error_to_status(e));
        }
        let written = match file.write(&data) {
            Ok(n) => n,
            Err(e) => return IOResponse::error(req, fs_error_to_status(e)),
        };
        if let Err(e) = file.flush() {
            return IOResponse::error(req, fs_error_to_status(e));
        }
        let mut w = Writer::new();
        w.version().u16(written as u16);
        IOResponse::ok(req, w.into_vec())
    }

    fn handle_make_directory(&self, req: &IORequest) -> IOResponse {
        let mut r = Reader::new(&req.payload);
        if r.version(PROTOCOL_VERSION).is_err() {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        }
        let Ok((fs_name, path)) = decode_fs_and_path(&mut r) else {
            return IOResponse::error(req, StatusCode::InvalidRequest);
        };
        let target = match self.resolve(&fs_name, path) {
            Ok(t) => t,
            Err(status) => return IOResponse::error(req, status),
        };
        match target.fs.create_directory(&target.path) {
            Ok(()) => {
                let mut w = Writer::new();
                w.version();
                IOResponse::ok(req, w.into_vec())
            }
            Err(e) => IOResponse::error(req, fs_error_to_status(e)),
        }
    }
}

impl Device for FileDevice {
    fn handle(&mut self, request: &IORequest) -> IOResponse {
        match request.command {
            OP_STAT => self.handle_stat(request),
            OP_LIST_DIRECTORY => self.handle_list_directory(request),
            OP_READ_FILE => self.handle_read_file(request),
            OP_WRITE_FILE => self.handle_write_file(request),
            OP_MAKE_DIRECTORY => self.handle_make_directory(request),
            _ => IOResponse::error(request, StatusCode::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fujinet_fs::LocalFilesystem;

    fn device_with_host_fs() -> (FileDevice, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = StorageManager::new();
        storage.register(Arc::new(LocalFilesystem::new("host", dir.path())));
        (FileDevice::new(Arc::new(storage)), dir)
    }

    fn req(command: u16, payload: Vec<u8>) -> IORequest {
        IORequest::new(1, 0xF3, command, payload)
    }

    fn fs_path_payload(fs: &str, path: &str) -> Vec<u8> {
        let mut w = Writer::new();
        w.version().lp_str(fs).lp_str(path);
        w.into_vec()
    }

    #[test]
    fn unknown_filesystem_is_device_not_found() {
        let (mut dev, _dir) = device_with_host_fs();
        let resp = dev.handle(&req(OP_STAT, fs_path_payload("sd0", "/x")));
        assert_eq!(resp.status, StatusCode::DeviceNotFound);
    }

    #[test]
    fn write_then_read_then_stat_round_trips() {
        let (mut dev, _dir) = device_with_host_fs();

        let mut w = Writer::new();
        w.version().lp_str("host").lp_str("/hello.txt").u8(1).u64(0).lp_bytes(b"hello world");
        let write_resp = dev.handle(&req(OP_WRITE_FILE, w.into_vec()));
        assert_eq!(write_resp.status, StatusCode::Ok);

        let mut w = Writer::new();
        w.version().lp_str("host").lp_str("/hello.txt").u64(0).u16(64);
        let read_resp = dev.handle(&req(OP_READ_FILE, w.into_vec()));
        assert_eq!(read_resp.status, StatusCode::Ok);
        let mut r = Reader::new(&read_resp.payload);
        r.version(PROTOCOL_VERSION).unwrap();
        let _offset = r.u64().unwrap();
        assert_eq!(r.lp_bytes().unwrap(), b"hello world");

        let stat_resp = dev.handle(&req(OP_STAT, fs_path_payload("host", "/hello.txt")));
        assert_eq!(stat_resp.status, StatusCode::Ok);
        let mut r = Reader::new(&stat_resp.payload);
        r.version(PROTOCOL_VERSION).unwrap();
        let is_dir = r.u8().unwrap();
        let size = r.u64().unwrap();
        assert_eq!(is_dir, 0);
        assert_eq!(size, 11);
    }

    #[test]
    fn make_directory_then_list_shows_it() {
        let (mut dev, _dir) = device_with_host_fs();
        let mkdir_resp = dev.handle(&req(OP_MAKE_DIRECTORY, fs_path_payload("host", "/sub")));
        assert_eq!(mkdir_resp.status, StatusCode::Ok);

        let list_resp = dev.handle(&req(OP_LIST_DIRECTORY, fs_path_payload("host", "/")));
        assert_eq!(list_resp.status, StatusCode::Ok);
        let mut r = Reader::new(&list_resp.payload);
        r.version(PROTOCOL_VERSION).unwrap();
        let count = r.u16().unwrap();
        assert_eq!(count, 1);
        let name = r.lp_str().unwrap();
        let is_dir = r.u8().unwrap();
        let _size = r.u64().unwrap();
        assert_eq!(name, "sub");
        assert_eq!(is_dir, 1);
    }

    #[test]
    fn read_file_missing_is_io_error() {
        let (mut dev, _dir) = device_with_host_fs();
        let mut w = Writer::new();
        w.version().lp_str("host").lp_str("/missing.txt").u64(0).u16(16);
        let resp = dev.handle(&req(OP_READ_FILE, w.into_vec()));
        assert_eq!(resp.status, StatusCode::IoError);
    }
}
