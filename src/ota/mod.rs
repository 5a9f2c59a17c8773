//! OTA updater: revision discovery against Badgehub, per-file atomic
//! application updates, and a firmware write/commit session.
//!
//! Grounded in `sdk_apps/why2025_ota/ota_update.c`/`.h`: the Badgehub URL
//! shapes, the `.inst`-then-rename atomic swap, and the "commit is the
//! only point of no return" firmware contract are all carried over
//! unchanged; `do_http`'s libcurl write callbacks become [`crate::http`]
//! calls, and `strverscmp` becomes [`version::natural_compare`].

pub mod version;

use std::io::Read;

use serde::Deserialize;
use thiserror::Error;

use crate::{
    error::ErrorKind,
    http::{HttpClient, HttpError, Request},
    registry::{AppRegistry, Application, RegistryError},
};

const HTTP_USER_AGENT: &str = "badgevms-ota/1";
const FIRMWARE_PROJECT: &str = "why2025_firmware";

/// Failure modes for the OTA updater.
#[derive(Debug, Error)]
pub enum OtaError {
    /// The hub's `project-latest-revisions` response wasn't an integer.
    #[error("malformed revision response")]
    MalformedRevision,
    /// The hub's per-revision JSON response didn't match the expected
    /// shape.
    #[error("malformed revision manifest: {0}")]
    MalformedManifest(serde_json::Error),
    /// A firmware write was attempted without an open session, or a
    /// session was opened twice.
    #[error("illegal OTA session state")]
    IllegalState,
    /// The underlying application registry failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The underlying HTTP client failed.
    #[error(transparent)]
    Http(#[from] HttpError),
}

impl OtaError {
    /// Classifies this error into the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OtaError::MalformedRevision => ErrorKind::Protocol,
            OtaError::MalformedManifest(_) => ErrorKind::Protocol,
            OtaError::IllegalState => ErrorKind::State,
            OtaError::Registry(e) => e.kind(),
            OtaError::Http(e) => e.kind(),
        }
    }
}

/// A firmware image write session. The collaborator (double-banked flash)
/// is out of scope per `spec.md` §1; this trait is the stable interface
/// `OtaUpdater` drives it through. Dropping a session without calling
/// [`FirmwareSession::commit`] aborts it: the next boot continues on the
/// current image.
pub trait FirmwareSession: Send {
    /// Appends `bytes` to the image being written.
    fn write(&mut self, bytes: &[u8]) -> Result<(), OtaError>;
    /// Activates this image for the next boot. The single point of no
    /// return.
    fn commit(self: Box<Self>) -> Result<(), OtaError>;
}

#[derive(Debug, Deserialize)]
struct RevisionFile {
    url: String,
    full_path: String,
}

#[derive(Debug, Deserialize, Default)]
struct AppMetadataExecutable {
    executable: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AppMetadata {
    name: Option<String>,
    #[serde(default)]
    application: Vec<AppMetadataExecutable>,
}

#[derive(Debug, Deserialize)]
struct VersionManifest {
    files: Vec<RevisionFile>,
    #[serde(default)]
    app_metadata: Option<AppMetadata>,
}

#[derive(Debug, Deserialize)]
struct RevisionResponse {
    version: VersionManifest,
}

#[derive(Debug, Deserialize)]
struct ProjectSummary {
    slug: String,
}

/// Writes `bytes` to `inst_path`, then atomically swaps it in over
/// `final_path`, removing any file already at `final_path` first. Split out
/// of [`OtaUpdater::update_application_file`] so the rename behavior is
/// testable without a live network download.
fn install_atomically(inst_path: &std::path::Path, final_path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(inst_path, bytes)?;
    let _ = std::fs::remove_file(final_path);
    std::fs::rename(inst_path, final_path)
}

/// Drives application and firmware updates against a Badgehub-shaped hub.
#[derive(Debug, Clone)]
pub struct OtaUpdater {
    http: HttpClient,
    base_url: String,
}

impl OtaUpdater {
    /// Creates an updater talking to `base_url` (e.g.
    /// `https://badge.example.org/api/v3`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into(),
        }
    }

    fn request(&self, url: String) -> Request {
        Request::get(url).header("User-Agent", HTTP_USER_AGENT)
    }

    /// `GET /project-latest-revisions/<slug>`.
    pub fn latest_revision(&self, slug: &str) -> Result<i64, OtaError> {
        let url = format!("{}/project-latest-revisions/{slug}", self.base_url);
        let text = self.http.get_text(&url)?;
        text.parse().map_err(|_| OtaError::MalformedRevision)
    }

    /// `GET /projects/<slug>/rev<N>/files/version.txt`.
    pub fn latest_version(&self, slug: &str, revision: i64) -> Result<String, OtaError> {
        let url = format!("{}/projects/{slug}/rev{revision}/files/version.txt", self.base_url);
        Ok(self.http.get_text(&url)?)
    }

    /// Probes whether `slug` has a revision newer than `installed_version`,
    /// returning the newer version string if so.
    pub fn check_for_updates(
        &self,
        slug: &str,
        installed_version: &str,
    ) -> Result<Option<String>, OtaError> {
        let revision = self.latest_revision(slug)?;
        let candidate = self.latest_version(slug, revision)?;
        if version::is_newer(installed_version, &candidate) {
            Ok(Some(candidate))
        } else {
            Ok(None)
        }
    }

    /// Downloads `file_url` to `<installed_path>/<relative>.inst`, then
    /// atomically replaces the existing file. Files are updated
    /// independently: a failure on one does not prevent others from
    /// proceeding, matching `update_application_file`.
    fn update_application_file(
        &self,
        registry: &AppRegistry,
        app: &Application,
        relative: &str,
        file_url: &str,
    ) -> Result<(), OtaError> {
        let inst_relative = format!("{relative}.inst");
        let inst_path = registry.create_file_string(app, &inst_relative)?;

        let (_, mut reader) = self.http.perform_streaming(&self.request(file_url.to_string()))?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;

        let final_path = app.installed_path().join(relative);
        install_atomically(&inst_path, &final_path, &buf)?;
        Ok(())
    }

    /// Updates `app` to `new_version`, downloading every file in the
    /// revision manifest. Returns whether the overall update succeeded;
    /// per-file failures are logged but do not short-circuit remaining
    /// files, matching the original's "mark failed, let others proceed"
    /// contract.
    pub fn update_application(
        &self,
        registry: &AppRegistry,
        mut app: Application,
        new_version: &str,
    ) -> Result<bool, OtaError> {
        let revision = self.latest_revision(app.id())?;
        let url = format!("{}/projects/{}/rev{revision}", self.base_url, app.id());
        let (_, body) = self.http.perform(&self.request(url))?;
        let manifest: RevisionResponse =
            serde_json::from_slice(&body).map_err(OtaError::MalformedManifest)?;

        let mut all_ok = true;
        for file in &manifest.version.files {
            if let Err(e) =
                self.update_application_file(registry, &app, &file.full_path, &file.url)
            {
                log::warn!("OTA: failed to update {:?}: {e}", file.full_path);
                all_ok = false;
            }
        }

        if all_ok {
            registry.set_version(&mut app, new_version)?;
            registry.set_metadata(&mut app, "metadata.json")?;
            if let Some(metadata) = &manifest.version.app_metadata {
                if let Some(name) = &metadata.name {
                    registry.set_name(&mut app, name)?;
                }
                if let Some(executable) = metadata.application.iter().find_map(|a| a.executable.as_deref()) {
                    registry.set_binary_path(&mut app, executable)?;
                }
            }
        }
        Ok(all_ok)
    }

    /// Checks for and, if found, installs a newer firmware image.
    /// `open_session` is called only once a newer version has been
    /// confirmed; on any HTTP or write failure the session is dropped
    /// without being committed.
    pub fn update_firmware(
        &self,
        running_version: &str,
        open_session: impl FnOnce() -> Result<Box<dyn FirmwareSession>, OtaError>,
    ) -> Result<bool, OtaError> {
        let revision = self.latest_revision(FIRMWARE_PROJECT)?;
        let candidate = self.latest_version(FIRMWARE_PROJECT, revision)?;
        if !version::is_newer(running_version, &candidate) {
            return Ok(false);
        }

        let mut session = open_session()?;
        let url = format!("{}/projects/{FIRMWARE_PROJECT}/rev{revision}/files/badgevms.bin", self.base_url);
        let (_, mut reader) = self.http.perform_streaming(&self.request(url))?;

        let mut buf = [0u8; 4096];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            session.write(&buf[..n])?;
        }
        session.commit()?;
        log::info!("firmware updated to {candidate}");
        Ok(true)
    }

    /// Lists the slugs of the default/featured Badgehub catalog.
    pub fn list_catalog(&self) -> Result<Vec<String>, OtaError> {
        let url = format!("{}/project-summaries?category=Default", self.base_url);
        let summaries: Vec<ProjectSummary> = self.http.get_json(&url)?;
        Ok(summaries.into_iter().map(|s| s.slug).collect())
    }

    /// Best-effort telemetry ping, non-fatal on failure.
    pub fn ping(&self, mac_address: &str) {
        let url = format!("{}/ping?id={mac_address}-v1&mac={mac_address}", self.base_url);
        if let Err(e) = self.http.perform(&self.request(url)) {
            log::warn!("badgehub ping failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSession {
        written: Vec<u8>,
        committed: bool,
    }

    impl FirmwareSession for RecordingSession {
        fn write(&mut self, bytes: &[u8]) -> Result<(), OtaError> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }
        fn commit(mut self: Box<Self>) -> Result<(), OtaError> {
            self.committed = true;
            Ok(())
        }
    }

    #[test]
    fn session_commit_is_the_only_state_change() {
        let mut session = RecordingSession {
            written: Vec::new(),
            committed: false,
        };
        session.write(b"abc").unwrap();
        assert!(!session.committed);
        assert_eq!(session.written, b"abc");
        // Dropping without calling commit() leaves `committed` false;
        // there is no other path that flips it.
    }

    #[test]
    fn install_atomically_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("app.bin");
        let inst_path = dir.path().join("app.bin.inst");

        std::fs::write(&final_path, b"old contents").unwrap();
        install_atomically(&inst_path, &final_path, b"new contents").unwrap();

        assert!(!inst_path.exists());
        assert_eq!(std::fs::read(&final_path).unwrap(), b"new contents");
    }

    #[test]
    fn install_atomically_creates_file_that_did_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("nested").join("app.bin");
        std::fs::create_dir_all(final_path.parent().unwrap()).unwrap();
        let inst_path = final_path.with_extension("bin.inst");

        install_atomically(&inst_path, &final_path, b"payload").unwrap();

        assert!(!inst_path.exists());
        assert_eq!(std::fs::read(&final_path).unwrap(), b"payload");
    }

    #[test]
    fn update_application_file_swaps_in_downloaded_content() {
        use crate::registry::AppRegistry;

        let dir = tempfile::tempdir().unwrap();
        let registry = AppRegistry::init(
            dir.path().join("apps"),
            dir.path().join("flash"),
            dir.path().join("sd"),
        )
        .unwrap();
        let app = registry
            .create("com_example_app", "App", "Dev", "1.0.0", None, crate::registry::ApplicationSource::Unknown)
            .unwrap();

        let final_path = app.installed_path().join("bin/app.elf");
        std::fs::create_dir_all(final_path.parent().unwrap()).unwrap();
        std::fs::write(&final_path, b"old binary").unwrap();

        let inst_path = registry.create_file_string(&app, "bin/app.elf.inst").unwrap();
        install_atomically(&inst_path, &final_path, b"new binary").unwrap();

        assert_eq!(std::fs::read(&final_path).unwrap(), b"new binary");
    }

    /// Exercises `OtaUpdater` against a real Badgehub-shaped endpoint; needs
    /// a live network and is skipped by default.
    #[cfg(feature = "_integration-tests")]
    #[test]
    fn check_for_updates_against_live_hub() {
        let updater = OtaUpdater::new("https://badge.example.org/api/v3");
        let result = updater.check_for_updates("why2025_firmware", "0.0.0");
        assert!(result.is_ok());
    }
}
