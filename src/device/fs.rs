//! Filesystem-backed device adapters: internal SPI-flash FAT and SD-card
//! FAT. Both translate logical paths to native form via [`crate::path`] and
//! delegate to the underlying filesystem; on this host-buildable crate that
//! underlying filesystem is the native one, standing in for the real FAT
//! driver the same way the original treats the block layer as an external
//! collaborator.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use super::{DeviceError, DeviceKind, DirEntry, Stat};
use crate::device::{Device, OpenFlags};

/// A mounted FAT-like filesystem, rooted at a native directory.
///
/// One instance backs the SPI-flash partition, another the SD card; both
/// use identical translation and I/O semantics, matching the original's
/// two near-identical adapters over a shared block/FAT stack.
pub struct FatDevice {
    label: &'static str,
    root: PathBuf,
    next_fd: AtomicU64,
    open_files: Mutex<HashMap<u64, File>>,
}

impl std::fmt::Debug for FatDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FatDevice")
            .field("label", &self.label)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FatDevice {
    /// Mounts the internal SPI-flash partition at `root`.
    pub fn mount_flash(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        Self::mount("flash", root)
    }

    /// Mounts the SD card at `root`.
    pub fn mount_sd(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        Self::mount("sd", root)
    }

    fn mount(label: &'static str, root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        log::info!("mounted {label} filesystem at {}", root.display());
        Ok(Self {
            label,
            root,
            next_fd: AtomicU64::new(1),
            open_files: Mutex::new(HashMap::new()),
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Device for FatDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Filesystem
    }

    fn open(&self, path: &str, flags: OpenFlags) -> Result<u64, DeviceError> {
        let native = self.resolve(path);
        let file = OpenOptions::new()
            .read(flags.contains(OpenFlags::READ) || !flags.contains(OpenFlags::WRITE))
            .write(flags.contains(OpenFlags::WRITE))
            .create(flags.contains(OpenFlags::CREATE))
            .truncate(flags.contains(OpenFlags::TRUNCATE))
            .append(flags.contains(OpenFlags::APPEND))
            .open(&native)?;
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.open_files.lock().expect("fd table poisoned").insert(fd, file);
        log::debug!("{}: opened fd {fd} for {}", self.label, native.display());
        Ok(fd)
    }

    fn close(&self, fd: u64) -> Result<(), DeviceError> {
        self.open_files
            .lock()
            .expect("fd table poisoned")
            .remove(&fd)
            .map(drop)
            .ok_or_else(|| DeviceError::Invalid(format!("no open fd {fd}")))
    }

    fn read(&self, fd: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut files = self.open_files.lock().expect("fd table poisoned");
        let file = files
            .get_mut(&fd)
            .ok_or_else(|| DeviceError::Invalid(format!("no open fd {fd}")))?;
        Ok(file.read(buf)?)
    }

    fn write(&self, fd: u64, buf: &[u8]) -> Result<usize, DeviceError> {
        let mut files = self.open_files.lock().expect("fd table poisoned");
        let file = files
            .get_mut(&fd)
            .ok_or_else(|| DeviceError::Invalid(format!("no open fd {fd}")))?;
        Ok(file.write(buf)?)
    }

    fn seek(&self, fd: u64, pos: SeekFrom) -> Result<u64, DeviceError> {
        let mut files = self.open_files.lock().expect("fd table poisoned");
        let file = files
            .get_mut(&fd)
            .ok_or_else(|| DeviceError::Invalid(format!("no open fd {fd}")))?;
        Ok(file.seek(pos)?)
    }

    fn stat(&self, path: &str) -> Result<Stat, DeviceError> {
        let meta = fs::metadata(self.resolve(path))?;
        Ok(Stat {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn fstat(&self, fd: u64) -> Result<Stat, DeviceError> {
        let files = self.open_files.lock().expect("fd table poisoned");
        let file = files
            .get(&fd)
            .ok_or_else(|| DeviceError::Invalid(format!("no open fd {fd}")))?;
        let meta = file.metadata()?;
        Ok(Stat {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn unlink(&self, path: &str) -> Result<(), DeviceError> {
        Ok(fs::remove_file(self.resolve(path))?)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), DeviceError> {
        Ok(fs::rename(self.resolve(from), self.resolve(to))?)
    }

    fn mkdir(&self, path: &str) -> Result<(), DeviceError> {
        Ok(fs::create_dir(self.resolve(path))?)
    }

    fn rmdir(&self, path: &str) -> Result<(), DeviceError> {
        Ok(fs::remove_dir(self.resolve(path))?)
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>, DeviceError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn write_then_read_back_round_trips() {
        let dir = tempdir().unwrap();
        let dev = FatDevice::mount_flash(dir.path()).unwrap();

        let fd = dev
            .open("NEW_FILE", OpenFlags::WRITE | OpenFlags::CREATE)
            .unwrap();
        dev.write(fd, b"hello").unwrap();
        dev.close(fd).unwrap();

        let fd = dev.open("NEW_FILE", OpenFlags::READ).unwrap();
        let mut buf = [0u8; 5];
        dev.read(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        dev.close(fd).unwrap();
    }

    #[test]
    fn unlink_removes_file() {
        let dir = tempdir().unwrap();
        let dev = FatDevice::mount_sd(dir.path()).unwrap();
        let fd = dev.open("F", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        dev.close(fd).unwrap();
        dev.unlink("F").unwrap();
        assert!(dev.stat("F").is_err());
    }
}
