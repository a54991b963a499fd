//! Filesystem adapter (spec §4.A).
//!
//! Every other component reads and writes through [`FileSystem`] rather
//! than calling `std::fs` directly, so the engine can run unmodified
//! against an in-memory store in tests or against whatever storage a
//! non-native host provides.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::error::{Categorize, ErrorKind};

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Categorize for Error {
    fn category(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::RepoNotFound,
            Self::NotADirectory(_) => ErrorKind::InvalidInput,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Io(e) => crate::error::categorize_io(e),
        }
    }
}

/// A directory entry as returned by [`FileSystem::readdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Minimal POSIX-style file API. Implementors need not be `Send`/`Sync`
/// themselves to be used safely: the session manager only ever touches a
/// given canonical key's subtree from one thread at a time (spec §5).
pub trait FileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>, Error>;
    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), Error>;
    fn mkdir(&self, path: &Path) -> Result<(), Error>;
    fn stat(&self, path: &Path) -> Result<bool, Error>;
    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>, Error>;
    fn unlink(&self, path: &Path) -> Result<(), Error>;
    fn remove_dir_all(&self, path: &Path) -> Result<(), Error>;
}

/// Backs [`FileSystem`] with the host OS's filesystem.
#[derive(Debug, Clone, Default)]
pub struct NativeFs;

impl FileSystem for NativeFs {
    fn read(&self, path: &Path) -> Result<Vec<u8>, Error> {
        std::fs::read(path).map_err(|e| io_error(path, e))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        std::fs::write(path, contents).map_err(|e| io_error(path, e))
    }

    fn mkdir(&self, path: &Path) -> Result<(), Error> {
        std::fs::create_dir_all(path).map_err(|e| io_error(path, e))
    }

    fn stat(&self, path: &Path) -> Result<bool, Error> {
        Ok(path.exists())
    }

    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>, Error> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path).map_err(|e| io_error(path, e))? {
            let entry = entry.map_err(|e| io_error(path, e))?;
            let file_type = entry.file_type().map_err(|e| io_error(path, e))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        Ok(entries)
    }

    fn unlink(&self, path: &Path) -> Result<(), Error> {
        std::fs::remove_file(path).map_err(|e| io_error(path, e))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), Error> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path, e)),
        }
    }
}

fn io_error(path: &Path, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_path_buf()),
        _ => Error::Io(e),
    }
}

/// An in-memory tree, for tests and for hosts with no durable filesystem.
#[derive(Debug, Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<BTreeMap<PathBuf, ()>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSystem for MemFs {
    fn read(&self, path: &Path) -> Result<Vec<u8>, Error> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_path_buf()))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            self.dirs.lock().unwrap().insert(parent.to_path_buf(), ());
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn mkdir(&self, path: &Path) -> Result<(), Error> {
        self.dirs.lock().unwrap().insert(path.to_path_buf(), ());
        Ok(())
    }

    fn stat(&self, path: &Path) -> Result<bool, Error> {
        let files = self.files.lock().unwrap();
        let dirs = self.dirs.lock().unwrap();
        Ok(files.contains_key(path) || dirs.contains_key(path))
    }

    fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>, Error> {
        let files = self.files.lock().unwrap();
        let dirs = self.dirs.lock().unwrap();
        let mut seen = BTreeMap::new();

        for p in files.keys().chain(dirs.keys()) {
            if let Ok(rest) = p.strip_prefix(path) {
                if let Some(first) = rest.components().next() {
                    let name = first.as_os_str().to_string_lossy().into_owned();
                    let is_dir = rest.components().count() > 1 || dirs.contains_key(p);
                    seen.entry(name.clone()).or_insert(DirEntry { name, is_dir });
                }
            }
        }
        if seen.is_empty() && !dirs.contains_key(path) {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        Ok(seen.into_values().collect())
    }

    fn unlink(&self, path: &Path) -> Result<(), Error> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(path.to_path_buf()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), Error> {
        self.files.lock().unwrap().retain(|p, _| !p.starts_with(path));
        self.dirs.lock().unwrap().retain(|p, _| !p.starts_with(path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_fs_write_then_read() {
        let fs = MemFs::new();
        fs.write(Path::new("/a/b.txt"), b"hello").unwrap();
        assert_eq!(fs.read(Path::new("/a/b.txt")).unwrap(), b"hello");
    }

    #[test]
    fn mem_fs_missing_file_is_not_found() {
        let fs = MemFs::new();
        assert!(matches!(
            fs.read(Path::new("/nope")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn mem_fs_remove_dir_all_clears_subtree() {
        let fs = MemFs::new();
        fs.write(Path::new("/a/b.txt"), b"x").unwrap();
        fs.write(Path::new("/a/c/d.txt"), b"y").unwrap();
        fs.remove_dir_all(Path::new("/a")).unwrap();
        assert!(fs.read(Path::new("/a/b.txt")).is_err());
        assert!(fs.read(Path::new("/a/c/d.txt")).is_err());
    }
}
