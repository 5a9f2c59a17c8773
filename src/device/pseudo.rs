//! Pseudo-devices: `tty`, `socket`, `wifi`. None of these own real block
//! storage; each is a thin adapter wrapping a host capability.

use std::{
    collections::HashMap,
    io::{Read, SeekFrom, Write},
    net::TcpStream,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use super::{DeviceError, DeviceKind, Device, OpenFlags};

/// Console pseudo-device: stdout writes characters, stdin reads one byte
/// at a time. There is exactly one descriptor, `0`, shared by every open.
#[derive(Debug, Default)]
pub struct TtyDevice;

impl Device for TtyDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Bus
    }

    fn open(&self, _path: &str, _flags: OpenFlags) -> Result<u64, DeviceError> {
        Ok(0)
    }

    fn close(&self, _fd: u64) -> Result<(), DeviceError> {
        Ok(())
    }

    fn read(&self, _fd: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut byte = [0u8; 1];
        let n = std::io::stdin().read(&mut byte)?;
        if n == 1 {
            buf[0] = byte[0];
        }
        Ok(n)
    }

    fn write(&self, _fd: u64, buf: &[u8]) -> Result<usize, DeviceError> {
        let mut stdout = std::io::stdout();
        stdout.write_all(buf)?;
        stdout.flush()?;
        Ok(buf.len())
    }

    fn seek(&self, _fd: u64, _pos: SeekFrom) -> Result<u64, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

/// Socket pseudo-device: `open` only ever succeeds for a bare device path
/// (no directory, no filename — real sockets are created by the sockets
/// layer and adopted here by fd, not opened by path). `read`/`write`/
/// `close` delegate to the adopted stream.
#[derive(Debug, Default)]
pub struct SocketDevice {
    next_fd: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl SocketDevice {
    /// Creates an empty socket device.
    pub fn new() -> Self {
        Self {
            next_fd: AtomicU64::new(1),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an already-connected stream and returns its descriptor.
    pub fn adopt(&self, stream: TcpStream) -> u64 {
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.streams.lock().expect("socket table poisoned").insert(fd, stream);
        fd
    }
}

impl Device for SocketDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Socket
    }

    fn open(&self, path: &str, _flags: OpenFlags) -> Result<u64, DeviceError> {
        if !path.is_empty() {
            return Err(DeviceError::Invalid(
                "socket device does not accept a directory or filename".into(),
            ));
        }
        Err(DeviceError::Unsupported)
    }

    fn close(&self, fd: u64) -> Result<(), DeviceError> {
        self.streams
            .lock()
            .expect("socket table poisoned")
            .remove(&fd)
            .map(drop)
            .ok_or_else(|| DeviceError::Invalid(format!("no open socket fd {fd}")))
    }

    fn read(&self, fd: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut streams = self.streams.lock().expect("socket table poisoned");
        let stream = streams
            .get_mut(&fd)
            .ok_or_else(|| DeviceError::Invalid(format!("no open socket fd {fd}")))?;
        Ok(stream.read(buf)?)
    }

    fn write(&self, fd: u64, buf: &[u8]) -> Result<usize, DeviceError> {
        let mut streams = self.streams.lock().expect("socket table poisoned");
        let stream = streams
            .get_mut(&fd)
            .ok_or_else(|| DeviceError::Invalid(format!("no open socket fd {fd}")))?;
        Ok(stream.write(buf)?)
    }

    fn seek(&self, _fd: u64, _pos: SeekFrom) -> Result<u64, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

/// Wi-Fi pseudo-device: `open`/`close` are no-ops gated to an empty path;
/// `read`/`write` always return 0. Real Wi-Fi control goes through
/// [`crate::wifi`], not through file descriptors.
#[derive(Debug, Default)]
pub struct WifiDevice;

impl Device for WifiDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Wifi
    }

    fn open(&self, path: &str, _flags: OpenFlags) -> Result<u64, DeviceError> {
        if !path.is_empty() {
            return Err(DeviceError::Invalid("wifi device has no filesystem".into()));
        }
        Ok(0)
    }

    fn close(&self, _fd: u64) -> Result<(), DeviceError> {
        Ok(())
    }

    fn read(&self, _fd: u64, _buf: &mut [u8]) -> Result<usize, DeviceError> {
        Ok(0)
    }

    fn write(&self, _fd: u64, _buf: &[u8]) -> Result<usize, DeviceError> {
        Ok(0)
    }

    fn seek(&self, _fd: u64, _pos: SeekFrom) -> Result<u64, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_device_rejects_nonempty_path() {
        let dev = WifiDevice;
        assert!(dev.open("subdir", OpenFlags::empty()).is_err());
        assert_eq!(dev.open("", OpenFlags::empty()).unwrap(), 0);
    }

    #[test]
    fn wifi_device_read_write_are_zero() {
        let dev = WifiDevice;
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(0, &mut buf).unwrap(), 0);
        assert_eq!(dev.write(0, &buf).unwrap(), 0);
    }

    #[test]
    fn socket_device_rejects_path_open() {
        let dev = SocketDevice::new();
        assert!(dev.open("foo", OpenFlags::empty()).is_err());
    }
}
