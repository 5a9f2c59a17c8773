//! Error taxonomy shared by every subsystem.
//!
//! Each subsystem defines its own `thiserror` enum (see `path::PathError`,
//! `device::DeviceError`, etc.); this module provides the abstract
//! [`ErrorKind`] taxonomy from the error handling design and [`BadgeError`],
//! the crate-wide enum subsystems compose into when they call each other
//! (OTA calling HTTP and the registry, the registry calling the device
//! table, and so on).

use thiserror::Error;

use crate::{
    compositor::CompositorError, device::DeviceError, http::HttpError, ota::OtaError,
    path::PathError, process::ProcessError, registry::RegistryError, wifi::WifiError,
};

/// Abstract error category, independent of which subsystem raised it.
///
/// APIs that return a sentinel (`-1`, `None`) instead of a `Result` still
/// record one of these in a thread-local "last error kind" slot; typed
/// errors expose the same classification through `kind()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Path, device, application or symbol not found.
    NotFound,
    /// Application or device already registered under that name.
    AlreadyExists,
    /// Malformed input: bad path grammar, bad argument, wrong device type.
    Invalid,
    /// Filesystem or HTTP transport failure.
    Io,
    /// HTTP status outside 2xx, or malformed response body.
    Protocol,
    /// Out of memory, too many open descriptors.
    Resource,
    /// Operation illegal in the current state machine state.
    State,
    /// A bounded wait expired before completion.
    Timeout,
    /// Recognized but deliberately unimplemented (proxies, some auth modes).
    Unsupported,
}

/// Crate-wide error composing every subsystem's error type.
///
/// Used at the seams where one subsystem drives another — `OtaUpdater`
/// calling `HttpClient` and `AppRegistry`, `AppRegistry::launch` calling
/// `ProcessMgr`, and so on.
#[derive(Debug, Error)]
pub enum BadgeError {
    /// Error from [`crate::path`].
    #[error(transparent)]
    Path(#[from] PathError),
    /// Error from [`crate::device`].
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// Error from [`crate::registry`].
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Error from [`crate::process`].
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Error from [`crate::compositor`].
    #[error(transparent)]
    Compositor(#[from] CompositorError),
    /// Error from [`crate::wifi`].
    #[error(transparent)]
    Wifi(#[from] WifiError),
    /// Error from [`crate::http`].
    #[error(transparent)]
    Http(#[from] HttpError),
    /// Error from [`crate::ota`].
    #[error(transparent)]
    Ota(#[from] OtaError),
}

impl BadgeError {
    /// Classifies this error into the abstract taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BadgeError::Path(e) => e.kind(),
            BadgeError::Device(e) => e.kind(),
            BadgeError::Registry(e) => e.kind(),
            BadgeError::Process(e) => e.kind(),
            BadgeError::Compositor(e) => e.kind(),
            BadgeError::Wifi(e) => e.kind(),
            BadgeError::Http(e) => e.kind(),
            BadgeError::Ota(e) => e.kind(),
        }
    }
}
