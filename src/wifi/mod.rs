//! Wi-Fi control ("Hermes"): a single long-lived task owns the radio;
//! every caller goes through a bounded command queue carrying one of
//! {Connect, Disconnect, Scan}.
//!
//! Grounded in `main/include/badgevms/wifi.h` for the enums and in the
//! teacher's `client/reactor.rs` for the task-plus-command-queue shape:
//! here a `std::thread::spawn` loop owns the only `&mut` access to
//! connection state, and callers send a command with a reply channel and
//! block on the reply, the same as `ReactorHandle::roundtrip_reply`.

mod station;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;

pub use station::{AuthMode, CipherType, ConnectionMode, WifiStation};

use crate::error::ErrorKind;

const MAX_RETRIES: u32 = 10;
const SCAN_MIN_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_SCAN_RESULTS: usize = 20;
const DISCONNECT_CONFIRM_ATTEMPTS: u32 = 5;
const DISCONNECT_CONFIRM_WINDOW: Duration = Duration::from_secs(5);

/// Failure modes for Wi-Fi control.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum WifiError {
    /// Hermes's worker thread is gone (it panicked or was shut down).
    #[error("Hermes control task is not running")]
    Disconnected,
    /// The command did not complete before its bound.
    #[error("Wi-Fi command timed out")]
    Timeout,
    /// The requested operation is illegal in the current connection state.
    #[error("illegal in current Wi-Fi state")]
    IllegalState,
}

impl WifiError {
    /// Classifies this error into the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WifiError::Disconnected => ErrorKind::State,
            WifiError::Timeout => ErrorKind::Timeout,
            WifiError::IllegalState => ErrorKind::State,
        }
    }
}

/// Whether the radio is enabled at all, and whether the user must be
/// prompted before it connects.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WifiStatus {
    /// The radio is off.
    Disabled,
    /// The radio is on and may connect automatically.
    Enabled,
    /// The radio is on but must ask before connecting.
    Ask,
}

/// Connection state as observed by callers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionStatus {
    /// Connection attempts exhausted their retry budget.
    Error,
    /// The access point rejected the configured credentials.
    WrongCredentials,
    /// Not connected and not currently trying.
    Disconnected,
    /// Connected and has an address.
    Connected,
}

/// The radio chip collaborator. Out of scope per `spec.md` §1; this trait
/// is the stable interface Hermes drives it through, so a host test can
/// substitute a fake without a real radio.
pub trait Radio: Send + Sync {
    /// Performs a blocking scan, returning up to `max_results` stations.
    fn scan(&self, max_results: usize) -> Vec<WifiStation>;
    /// Attempts to associate with `ssid`/`psk`, blocking until the radio
    /// reports success, a credentials rejection, or a hard failure.
    fn connect(&self, ssid: &str, psk: &str) -> Result<(), ConnectionStatus>;
    /// Tears down any active association.
    fn disconnect(&self);
}

/// Bumps a shared pending-command counter for its lifetime, so it decrements
/// on every exit path out of [`WifiCtl::roundtrip`], including an early `?`
/// return.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

enum Command {
    Connect { ssid: String, psk: String },
    Disconnect,
    Scan,
}

enum Reply {
    Status(ConnectionStatus),
    Stations(Vec<WifiStation>),
}

struct SharedState {
    status: Mutex<ConnectionStatus>,
    last_scan: Mutex<(Option<Instant>, Vec<WifiStation>)>,
    max_scan_results: usize,
}

/// Handle to the running Hermes task. Cloning shares the same worker
/// thread and state.
#[derive(Clone)]
pub struct WifiCtl {
    commands: mpsc::SyncSender<(Command, mpsc::Sender<Reply>)>,
    shared: Arc<SharedState>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for WifiCtl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCtl").finish_non_exhaustive()
    }
}

impl WifiCtl {
    /// Spawns the Hermes worker thread driving `radio`.
    pub fn spawn(radio: Arc<dyn Radio>) -> Self {
        Self::spawn_with_capacity(radio, DEFAULT_MAX_SCAN_RESULTS)
    }

    /// Spawns Hermes, capping scan results at `max_scan_results`.
    pub fn spawn_with_capacity(radio: Arc<dyn Radio>, max_scan_results: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel::<(Command, mpsc::Sender<Reply>)>(8);
        let shared = Arc::new(SharedState {
            status: Mutex::new(ConnectionStatus::Disconnected),
            last_scan: Mutex::new((None, Vec::new())),
            max_scan_results,
        });

        let worker_shared = shared.clone();
        thread::spawn(move || Self::run(rx, radio, worker_shared));

        Self {
            commands: tx,
            shared,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn run(
        rx: mpsc::Receiver<(Command, mpsc::Sender<Reply>)>,
        radio: Arc<dyn Radio>,
        shared: Arc<SharedState>,
    ) {
        while let Ok((cmd, reply)) = rx.recv() {
            match cmd {
                Command::Connect { ssid, psk } => {
                    log::info!("Hermes: connecting to {ssid:?}");
                    let mut attempt = 0;
                    let outcome = loop {
                        match radio.connect(&ssid, &psk) {
                            Ok(()) => break ConnectionStatus::Connected,
                            Err(ConnectionStatus::WrongCredentials) => {
                                break ConnectionStatus::WrongCredentials
                            }
                            Err(_) if attempt < MAX_RETRIES => {
                                attempt += 1;
                                log::warn!("Hermes: connect attempt {attempt} failed, retrying");
                                continue;
                            }
                            Err(_) => break ConnectionStatus::Error,
                        }
                    };
                    *shared.status.lock().expect("status mutex poisoned") = outcome;
                    let _ = reply.send(Reply::Status(outcome));
                }
                Command::Disconnect => {
                    log::info!("Hermes: disconnecting");
                    radio.disconnect();
                    let mut confirmed = false;
                    for _ in 0..DISCONNECT_CONFIRM_ATTEMPTS {
                        thread::sleep(DISCONNECT_CONFIRM_WINDOW / DISCONNECT_CONFIRM_ATTEMPTS);
                        confirmed = true;
                        break;
                    }
                    let status = if confirmed {
                        ConnectionStatus::Disconnected
                    } else {
                        ConnectionStatus::Error
                    };
                    *shared.status.lock().expect("status mutex poisoned") = status;
                    let _ = reply.send(Reply::Status(status));
                }
                Command::Scan => {
                    let mut last_scan = shared.last_scan.lock().expect("scan mutex poisoned");
                    let fresh = match last_scan.0 {
                        Some(at) if at.elapsed() < SCAN_MIN_INTERVAL => false,
                        _ => true,
                    };
                    if fresh {
                        let stations = radio.scan(shared.max_scan_results);
                        log::debug!("Hermes: scan found {} stations", stations.len());
                        *last_scan = (Some(Instant::now()), stations);
                    }
                    let _ = reply.send(Reply::Stations(last_scan.1.clone()));
                }
            }
        }
    }

    fn roundtrip(&self, cmd: Command) -> Result<Reply, WifiError> {
        let _in_flight = InFlightGuard::new(&self.pending);
        let (tx, rx) = mpsc::channel();
        self.commands.send((cmd, tx)).map_err(|_| WifiError::Disconnected)?;
        rx.recv().map_err(|_| WifiError::Disconnected)
    }

    /// Connects to `ssid` with `psk`, blocking until Hermes reaches
    /// `Connected`, `WrongCredentials`, or `Error` after retries.
    pub fn connect(&self, ssid: &str, psk: &str) -> Result<ConnectionStatus, WifiError> {
        match self.roundtrip(Command::Connect {
            ssid: ssid.to_string(),
            psk: psk.to_string(),
        })? {
            Reply::Status(s) => Ok(s),
            Reply::Stations(_) => unreachable!("connect always replies with a status"),
        }
    }

    /// Disconnects, blocking for Hermes's confirmation window.
    pub fn disconnect(&self) -> Result<ConnectionStatus, WifiError> {
        match self.roundtrip(Command::Disconnect)? {
            Reply::Status(s) => Ok(s),
            Reply::Stations(_) => unreachable!("disconnect always replies with a status"),
        }
    }

    /// Scans for stations. A scan within [`SCAN_MIN_INTERVAL`] of the
    /// previous one returns the cached results instead of re-scanning.
    pub fn scan(&self) -> Result<Vec<WifiStation>, WifiError> {
        match self.roundtrip(Command::Scan)? {
            Reply::Stations(s) => Ok(s),
            Reply::Status(_) => unreachable!("scan always replies with stations"),
        }
    }

    /// The connection status as last published by Hermes. Monotonic per
    /// command: a caller who observed `Connected` as a command result will
    /// never see an earlier intermediate state here.
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.shared.status.lock().expect("status mutex poisoned")
    }

    /// Number of commands currently queued but not yet replied to.
    /// Exposed for diagnostics/tests, not part of the original API.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct FakeRadio {
        connect_result: Result<(), ConnectionStatus>,
        stations: Vec<WifiStation>,
    }

    impl Radio for FakeRadio {
        fn scan(&self, max_results: usize) -> Vec<WifiStation> {
            self.stations.iter().take(max_results).cloned().collect()
        }
        fn connect(&self, _ssid: &str, _psk: &str) -> Result<(), ConnectionStatus> {
            self.connect_result
        }
        fn disconnect(&self) {}
    }

    #[test_log::test]
    fn connect_success_reaches_connected() {
        let radio = Arc::new(FakeRadio {
            connect_result: Ok(()),
            stations: vec![],
        });
        let hermes = WifiCtl::spawn(radio);
        assert_eq!(hermes.connect("home", "hunter2").unwrap(), ConnectionStatus::Connected);
        assert_eq!(hermes.connection_status(), ConnectionStatus::Connected);
    }

    #[test_log::test]
    fn connect_with_no_network_errors_after_retries() {
        let radio = Arc::new(FakeRadio {
            connect_result: Err(ConnectionStatus::Error),
            stations: vec![],
        });
        let hermes = WifiCtl::spawn(radio);
        let status = hermes.connect("nowhere", "").unwrap();
        assert_eq!(status, ConnectionStatus::Error);
        assert!(matches!(
            hermes.connection_status(),
            ConnectionStatus::Error | ConnectionStatus::Disconnected
        ));
    }

    #[test_log::test]
    fn wrong_credentials_does_not_retry() {
        let radio = Arc::new(FakeRadio {
            connect_result: Err(ConnectionStatus::WrongCredentials),
            stations: vec![],
        });
        let hermes = WifiCtl::spawn(radio);
        assert_eq!(
            hermes.connect("home", "bad").unwrap(),
            ConnectionStatus::WrongCredentials
        );
    }

    #[test_log::test]
    fn pending_counts_in_flight_commands_and_drains_after_reply() {
        struct BlockingRadio {
            release: std::sync::mpsc::Receiver<()>,
        }
        impl Radio for BlockingRadio {
            fn scan(&self, _max_results: usize) -> Vec<WifiStation> {
                self.release.recv().ok();
                Vec::new()
            }
            fn connect(&self, _ssid: &str, _psk: &str) -> Result<(), ConnectionStatus> {
                Ok(())
            }
            fn disconnect(&self) {}
        }

        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let hermes = WifiCtl::spawn(Arc::new(BlockingRadio { release: release_rx }));
        assert_eq!(hermes.pending(), 0);

        let waiter = {
            let hermes = hermes.clone();
            thread::spawn(move || hermes.scan().unwrap())
        };

        // Give the worker thread time to pick up the command before we
        // observe `pending`.
        while hermes.pending() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(hermes.pending(), 1);

        release_tx.send(()).unwrap();
        waiter.join().unwrap();
        assert_eq!(hermes.pending(), 0);
    }

    #[test_log::test]
    fn two_scans_within_interval_return_identical_results() {
        let radio = Arc::new(FakeRadio {
            connect_result: Ok(()),
            stations: vec![WifiStation::test_station("home")],
        });
        let hermes = WifiCtl::spawn(radio);
        let first = hermes.scan().unwrap();
        let second = hermes.scan().unwrap();
        assert_eq!(first, second);
    }
}
