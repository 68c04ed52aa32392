//! Uniform file/directory operations with stream handles, the way
//! `DiskService` and the (out-of-scope) console want to see flash, SD, or
//! host storage: one small trait pair plus a name-keyed registry.

use std::io::SeekFrom;

mod local;
pub use local::LocalFilesystem;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
    /// Create the file (truncating if present) and open it read-write.
    CreateReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_directory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
}

/// An open stream handle returned by `IFileSystem::open`.
pub trait IFile: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError>;
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError>;
    fn tell(&mut self) -> Result<u64, FsError>;
    fn flush(&mut self) -> Result<(), FsError>;

    /// Convenience used by image handlers: seek then read-exact.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), FsError> {
        self.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            let n = self.read(&mut buf[read..])?;
            if n == 0 {
                return Err(FsError::Io("short read".into()));
            }
            read += n;
        }
        Ok(())
    }

    /// Convenience used by image handlers: seek then write-all.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), FsError> {
        self.seek(SeekFrom::Start(offset))?;
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                return Err(FsError::Io("short write".into()));
            }
            written += n;
        }
        Ok(())
    }
}

/// A mountable filesystem backend, named so `DiskService` and the console
/// can refer to it (`"flash"`, `"sd0"`, `"host"`).
pub trait IFileSystem: Send + Sync {
    fn name(&self) -> &str;
    fn exists(&self, path: &str) -> bool;
    fn is_directory(&self, path: &str) -> bool;
    fn create_directory(&self, path: &str) -> Result<(), FsError>;
    fn remove_file(&self, path: &str) -> Result<(), FsError>;
    fn remove_directory(&self, path: &str) -> Result<(), FsError>;
    fn rename(&self, from: &str, to: &str) -> Result<(), FsError>;
    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn IFile>, FsError>;
    fn stat(&self, path: &str) -> Result<FileStat, FsError>;
    fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, FsError>;
}

/// Name -> filesystem registry, as named in §4.8.
#[derive(Default)]
pub struct StorageManager {
    filesystems: std::collections::HashMap<String, std::sync::Arc<dyn IFileSystem>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, fs: std::sync::Arc<dyn IFileSystem>) {
        self.filesystems.insert(fs.name().to_string(), fs);
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn IFileSystem>> {
        self.filesystems.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_manager_looks_up_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = StorageManager::new();
        mgr.register(std::sync::Arc::new(LocalFilesystem::new(
            "host",
            dir.path(),
        )));
        assert!(mgr.get("host").is_some());
        assert!(mgr.get("sd0").is_none());
    }
}
