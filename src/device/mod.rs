//! Device table: binds logical device names to capability objects.
//!
//! Grounded in the original `device.c`/`device.h` vtable-by-function-pointer
//! design, re-architected per §9 as a trait object registry: no raw
//! function pointers, one `Device` trait with optional capabilities exposed
//! as default-`Unsupported` methods that concrete device kinds override.

pub mod fs;
pub mod pseudo;

use std::{
    collections::HashMap,
    io::SeekFrom,
    sync::{Arc, Mutex},
};

use bitflags::bitflags;
use thiserror::Error;

use crate::error::ErrorKind;

/// Failure modes for device table and device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device registered under that name.
    #[error("no device named {0:?}")]
    NotFound(String),
    /// A device is already registered under that name.
    #[error("device {0:?} already registered")]
    AlreadyExists(String),
    /// The requested operation is not part of this device's capability set.
    #[error("unsupported operation on this device")]
    Unsupported,
    /// The caller passed an invalid path, fd or argument.
    #[error("invalid argument: {0}")]
    Invalid(String),
    /// Underlying filesystem/transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Classifies this error into the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::NotFound(_) => ErrorKind::NotFound,
            DeviceError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            DeviceError::Unsupported => ErrorKind::Unsupported,
            DeviceError::Invalid(_) => ErrorKind::Invalid,
            DeviceError::Io(_) => ErrorKind::Io,
        }
    }
}

/// The type tag on a registered device, per the data model in §3.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DeviceKind {
    /// Raw block storage.
    Block,
    /// A mounted filesystem exposing the full file capability set.
    Filesystem,
    /// The LCD panel.
    Lcd,
    /// The keyboard.
    Keyboard,
    /// An I2C or similar peripheral bus.
    Bus,
    /// A single device hanging off an I2C bus.
    I2cDevice,
    /// The Wi-Fi radio pseudo-device.
    Wifi,
    /// A socket-backed pseudo-device.
    Socket,
}

bitflags! {
    /// Flags passed to [`Device::open`].
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct OpenFlags: u32 {
        /// Open for reading.
        const READ = 0b0001;
        /// Open for writing.
        const WRITE = 0b0010;
        /// Create the file if it does not exist.
        const CREATE = 0b0100;
        /// Truncate an existing file to zero length.
        const TRUNCATE = 0b1000;
        /// Append writes to the end of the file.
        const APPEND = 0b1_0000;
    }
}

/// One entry in a directory listing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DirEntry {
    /// Entry name, relative to the directory it was read from.
    pub name: String,
    /// True if the entry is itself a directory.
    pub is_dir: bool,
}

/// Metadata returned by `stat`/`fstat`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Stat {
    /// File size in bytes.
    pub size: u64,
    /// True if the entry is a directory.
    pub is_dir: bool,
}

/// The capability set every registered device exposes.
///
/// Every device implements `open`/`close`/`read`/`write`/`seek`. The
/// richer filesystem capabilities (`stat`, `unlink`, `rename`, `mkdir`,
/// `rmdir`, `opendir`/`readdir`/`closedir`) and the LCD/bus-specific
/// capabilities default to [`DeviceError::Unsupported`] so that a single
/// trait object can represent every device kind, matching the original's
/// "vtable with some null entries" shape without raw function pointers.
pub trait Device: Send + Sync {
    /// This device's type tag.
    fn kind(&self) -> DeviceKind;

    /// Opens `path` (native, device-relative) and returns a file descriptor.
    fn open(&self, path: &str, flags: OpenFlags) -> Result<u64, DeviceError>;

    /// Closes a descriptor previously returned by `open`.
    fn close(&self, fd: u64) -> Result<(), DeviceError>;

    /// Reads into `buf`, returning the number of bytes read.
    fn read(&self, fd: u64, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Writes `buf`, returning the number of bytes written.
    fn write(&self, fd: u64, buf: &[u8]) -> Result<usize, DeviceError>;

    /// Repositions the descriptor's cursor.
    fn seek(&self, fd: u64, pos: SeekFrom) -> Result<u64, DeviceError>;

    /// Returns metadata for `path`.
    fn stat(&self, _path: &str) -> Result<Stat, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    /// Returns metadata for an open descriptor.
    fn fstat(&self, _fd: u64) -> Result<Stat, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    /// Removes a file.
    fn unlink(&self, _path: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported)
    }

    /// Renames `from` to `to` within the same device.
    fn rename(&self, _from: &str, _to: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported)
    }

    /// Creates a directory.
    fn mkdir(&self, _path: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported)
    }

    /// Removes an empty directory.
    fn rmdir(&self, _path: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported)
    }

    /// Lists the contents of a directory.
    fn readdir(&self, _path: &str) -> Result<Vec<DirEntry>, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

/// Process-wide registry mapping device name to device object.
///
/// Names are case-preserving but matched case-sensitively. Once registered
/// a device's capability set is stable for the system's lifetime; the
/// mutex guards only the name → device map, never a device's own
/// operations (§5 ordering guarantees).
#[derive(Default)]
pub struct DeviceTable {
    devices: Mutex<HashMap<String, Arc<dyn Device>>>,
}

impl std::fmt::Debug for DeviceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTable").finish_non_exhaustive()
    }
}

impl DeviceTable {
    /// Creates an empty device table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `device` under `name`. Fails if the name is already taken.
    pub fn register(&self, name: impl Into<String>, device: Arc<dyn Device>) -> Result<(), DeviceError> {
        let name = name.into();
        let mut devices = self.devices.lock().expect("device table mutex poisoned");
        if devices.contains_key(&name) {
            log::warn!("device {name:?} already registered");
            return Err(DeviceError::AlreadyExists(name));
        }
        log::info!("registered device {name:?} ({:?})", device.kind());
        devices.insert(name, device);
        Ok(())
    }

    /// Looks up a device by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.devices
            .lock()
            .expect("device table mutex poisoned")
            .get(name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    struct NullDevice(AtomicU64);

    impl Device for NullDevice {
        fn kind(&self) -> DeviceKind {
            DeviceKind::Wifi
        }
        fn open(&self, _path: &str, _flags: OpenFlags) -> Result<u64, DeviceError> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst))
        }
        fn close(&self, _fd: u64) -> Result<(), DeviceError> {
            Ok(())
        }
        fn read(&self, _fd: u64, _buf: &mut [u8]) -> Result<usize, DeviceError> {
            Ok(0)
        }
        fn write(&self, _fd: u64, buf: &[u8]) -> Result<usize, DeviceError> {
            Ok(buf.len())
        }
        fn seek(&self, _fd: u64, _pos: SeekFrom) -> Result<u64, DeviceError> {
            Ok(0)
        }
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let table = DeviceTable::new();
        table
            .register("WIFI0", Arc::new(NullDevice(AtomicU64::new(0))))
            .unwrap();
        assert!(matches!(
            table.register("WIFI0", Arc::new(NullDevice(AtomicU64::new(0)))),
            Err(DeviceError::AlreadyExists(_))
        ));
    }

    #[test]
    fn get_returns_registered_device() {
        let table = DeviceTable::new();
        table
            .register("WIFI0", Arc::new(NullDevice(AtomicU64::new(0))))
            .unwrap();
        assert!(table.get("WIFI0").is_some());
        assert!(table.get("wifi0").is_none());
        assert!(table.get("MISSING").is_none());
    }
}
