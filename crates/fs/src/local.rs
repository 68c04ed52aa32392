//! `std::fs`-backed filesystem, rooted at a directory on the machine this
//! core runs on. Named `"host"` when registered for development/testing;
//! the POSIX target is the development path, same as the HTTP backend.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::{DirEntry, FileStat, FsError, IFile, IFileSystem, OpenMode};

pub struct LocalFilesystem {
    name: String,
    root: PathBuf,
}

impl LocalFilesystem {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Resolves a POSIX-style path against the root, rejecting escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        if path.split('/').any(|part| part == "..") {
            return Err(FsError::PermissionDenied(path.to_string()));
        }
        Ok(posix_join(&self.root, path))
    }

    fn map_io_err(path: &str, err: std::io::Error) -> FsError {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_string()),
            _ => FsError::Io(err.to_string()),
        }
    }
}

struct LocalFile {
    file: File,
    path: String,
}

impl IFile for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        self.file.read(buf).map_err(|e| LocalFilesystem::map_io_err(&self.path, e))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        self.file.write(buf).map_err(|e| LocalFilesystem::map_io_err(&self.path, e))
    }

    fn seek(&mut self, pos: std::io::SeekFrom) -> Result<u64, FsError> {
        self.file.seek(pos).map_err(|e| LocalFilesystem::map_io_err(&self.path, e))
    }

    fn tell(&mut self) -> Result<u64, FsError> {
        self.file
            .stream_position()
            .map_err(|e| LocalFilesystem::map_io_err(&self.path, e))
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.file.flush().map_err(|e| LocalFilesystem::map_io_err(&self.path, e))
    }
}

impl IFileSystem for LocalFilesystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn is_directory(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }

    fn create_directory(&self, path: &str) -> Result<(), FsError> {
        let p = self.resolve(path)?;
        fs::create_dir_all(&p).map_err(|e| Self::map_io_err(path, e))
    }

    fn remove_file(&self, path: &str) -> Result<(), FsError> {
        let p = self.resolve(path)?;
        fs::remove_file(&p).map_err(|e| Self::map_io_err(path, e))
    }

    fn remove_directory(&self, path: &str) -> Result<(), FsError> {
        let p = self.resolve(path)?;
        fs::remove_dir(&p).map_err(|e| Self::map_io_err(path, e))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        fs::rename(&src, &dst).map_err(|e| Self::map_io_err(from, e))
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn IFile>, FsError> {
        let p = self.resolve(path)?;
        let mut opts = OpenOptions::new();
        match mode {
            OpenMode::Read => {
                opts.read(true);
            }
            OpenMode::Write => {
                opts.write(true);
            }
            OpenMode::ReadWrite => {
                opts.read(true).write(true);
            }
            OpenMode::CreateReadWrite => {
                opts.read(true).write(true).create(true).truncate(true);
            }
        }
        let file = opts.open(&p).map_err(|e| Self::map_io_err(path, e))?;
        Ok(Box::new(LocalFile {
            file,
            path: path.to_string(),
        }))
    }

    fn stat(&self, path: &str) -> Result<FileStat, FsError> {
        let p = self.resolve(path)?;
        let meta = fs::metadata(&p).map_err(|e| Self::map_io_err(path, e))?;
        Ok(FileStat {
            size: meta.len(),
            is_directory: meta.is_dir(),
        })
    }

    fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let p = self.resolve(path)?;
        let mut out = Vec::new();
        for entry in fs::read_dir(&p).map_err(|e| Self::map_io_err(path, e))? {
            let entry = entry.map_err(|e| Self::map_io_err(path, e))?;
            let meta = entry.metadata().map_err(|e| Self::map_io_err(path, e))?;
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory: meta.is_dir(),
                size: meta.len(),
            });
        }
        Ok(out)
    }
}

/// Joins a POSIX-style relative path onto `root`, stripping any leading
/// slash so it can't be mistaken for an absolute path by `PathBuf::join`.
fn posix_join(root: &Path, rel: &str) -> PathBuf {
    root.join(rel.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new("host", dir.path());

        let mut f = fs.open("image.raw", OpenMode::CreateReadWrite).unwrap();
        f.write_at(0, b"hello").unwrap();

        let mut buf = [0u8; 5];
        f.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        assert_eq!(fs.stat("image.raw").unwrap().size, 5);
    }

    #[test]
    fn path_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new("host", dir.path());
        assert!(matches!(
            fs.open("../escape", OpenMode::Read),
            Err(FsError::PermissionDenied(_))
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new("host", dir.path());
        assert!(matches!(fs.open("nope", OpenMode::Read), Err(FsError::NotFound(_))));
    }
}
