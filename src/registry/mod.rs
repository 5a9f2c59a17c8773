//! Application registry: per-app directories and JSON metadata under a
//! configured applications root; enumeration, lookup, launch.
//!
//! Grounded in `application.c`: `validate_path`/`get_metadata_path`/
//! `get_application_dir` become [`Application`] path helpers,
//! `application_to_json`/`json_to_application` become `serde` derives
//! instead of hand-rolled cJSON walking, and `application_create`/
//! `application_destroy`/`application_list` keep their exact semantics.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

/// Failure modes for the application registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No application with that identifier is registered.
    #[error("no application {0:?}")]
    NotFound(String),
    /// An application with that identifier already exists.
    #[error("application {0:?} already exists")]
    AlreadyExists(String),
    /// The identifier or a path-valued field failed validation.
    #[error("invalid application field: {0}")]
    Invalid(String),
    /// The metadata file exists but could not be parsed.
    #[error("malformed metadata for {0:?}: {1}")]
    Malformed(String, serde_json::Error),
    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Classifies this error into the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            RegistryError::Invalid(_) => ErrorKind::Invalid,
            RegistryError::Malformed(..) => ErrorKind::Protocol,
            RegistryError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Where an application's files came from.
///
/// Serialized as a bare integer (0=Unknown, 1=Badgehub) via the `source`
/// field on [`Metadata`] rather than through a `serde` derive on this type,
/// matching the wire format in `spec.md` §6.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ApplicationSource {
    /// Sideloaded or otherwise untracked.
    Unknown = 0,
    /// Installed or updated from Badgehub.
    Badgehub = 1,
}

impl ApplicationSource {
    /// A short human-readable label, e.g. for a launcher's detail view.
    pub fn label(&self) -> &'static str {
        match self {
            ApplicationSource::Unknown => "Unknown",
            ApplicationSource::Badgehub => "Badgehub",
        }
    }
}

/// The on-disk, serializable form of an application's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Metadata {
    unique_identifier: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    interpreter: String,
    #[serde(default)]
    metadata_file: String,
    #[serde(default)]
    binary_path: String,
    #[serde(default)]
    source: u8,
}

/// An installed application: an identifier, descriptive fields, and the
/// paths it lives at. Returned by `create`/`get`/`list` as an independent
/// snapshot of the on-disk JSON at the moment it was read.
#[derive(Debug, Clone)]
pub struct Application {
    unique_identifier: String,
    name: String,
    author: String,
    version: String,
    interpreter: Option<String>,
    metadata_file: String,
    installed_path: PathBuf,
    binary_path: String,
    source: ApplicationSource,
}

impl Application {
    /// The filesystem-safe identifier this application is stored under.
    pub fn id(&self) -> &str {
        &self.unique_identifier
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Author string.
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Version string, compared with [`crate::ota::version::natural_compare`].
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Optional interpreter (e.g. for script-based apps).
    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    /// Absolute directory this application's files are installed under.
    pub fn installed_path(&self) -> &Path {
        &self.installed_path
    }

    /// Path to the executable, relative to `installed_path`.
    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }

    /// Where this application's files came from.
    pub fn source(&self) -> ApplicationSource {
        self.source
    }

    fn to_metadata(&self) -> Metadata {
        Metadata {
            unique_identifier: self.unique_identifier.clone(),
            name: self.name.clone(),
            author: self.author.clone(),
            version: self.version.clone(),
            interpreter: self.interpreter.clone().unwrap_or_default(),
            metadata_file: self.metadata_file.clone(),
            binary_path: self.binary_path.clone(),
            source: self.source as u8,
        }
    }
}

fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-'))
}

/// Manages the applications root: one `<id>.json` sidecar and one `<id>/`
/// directory per installed application.
#[derive(Debug)]
pub struct AppRegistry {
    apps_dir: PathBuf,
    #[allow(dead_code)]
    flash_dir: PathBuf,
    #[allow(dead_code)]
    sd_dir: PathBuf,
}

impl AppRegistry {
    /// Creates `apps_dir`, `flash_dir` and `sd_dir` if missing and returns a
    /// registry rooted at `apps_dir`.
    pub fn init(
        apps_dir: impl Into<PathBuf>,
        flash_dir: impl Into<PathBuf>,
        sd_dir: impl Into<PathBuf>,
    ) -> Result<Self, RegistryError> {
        let apps_dir = apps_dir.into();
        let flash_dir = flash_dir.into();
        let sd_dir = sd_dir.into();
        fs::create_dir_all(&apps_dir)?;
        fs::create_dir_all(&flash_dir)?;
        fs::create_dir_all(&sd_dir)?;
        log::info!("application registry rooted at {}", apps_dir.display());
        Ok(Self {
            apps_dir,
            flash_dir,
            sd_dir,
        })
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.apps_dir.join(format!("{id}.json"))
    }

    fn app_dir(&self, id: &str) -> PathBuf {
        self.apps_dir.join(id)
    }

    fn from_metadata(&self, meta: Metadata) -> Application {
        Application {
            installed_path: self.app_dir(&meta.unique_identifier),
            unique_identifier: meta.unique_identifier,
            name: meta.name,
            author: meta.author,
            version: meta.version,
            interpreter: (!meta.interpreter.is_empty()).then_some(meta.interpreter),
            metadata_file: meta.metadata_file,
            binary_path: meta.binary_path,
            source: if meta.source == 1 {
                ApplicationSource::Badgehub
            } else {
                ApplicationSource::Unknown
            },
        }
    }

    fn save(&self, app: &Application) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(&app.to_metadata())
            .expect("Metadata serialization is infallible");
        fs::write(self.metadata_path(&app.unique_identifier), json)?;
        Ok(())
    }

    /// Creates a new application. Fails if `id` is not filesystem-safe or a
    /// metadata file for it already exists.
    pub fn create(
        &self,
        id: &str,
        name: &str,
        author: &str,
        version: &str,
        interpreter: Option<&str>,
        source: ApplicationSource,
    ) -> Result<Application, RegistryError> {
        if !is_valid_identifier(id) {
            return Err(RegistryError::Invalid(format!("bad identifier {id:?}")));
        }
        if self.metadata_path(id).exists() {
            return Err(RegistryError::AlreadyExists(id.to_string()));
        }

        let app = Application {
            unique_identifier: id.to_string(),
            name: name.to_string(),
            author: author.to_string(),
            version: version.to_string(),
            interpreter: interpreter.map(str::to_string),
            metadata_file: format!("{id}.json"),
            installed_path: self.app_dir(id),
            binary_path: String::new(),
            source,
        };

        fs::create_dir_all(&app.installed_path)?;
        self.save(&app)?;
        log::info!("created application {id:?}");
        Ok(app)
    }

    /// Loads an application's current metadata from disk.
    pub fn get(&self, id: &str) -> Result<Application, RegistryError> {
        let bytes = fs::read(self.metadata_path(id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RegistryError::NotFound(id.to_string())
            } else {
                RegistryError::Io(e)
            }
        })?;
        let meta: Metadata = serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::Malformed(id.to_string(), e))?;
        Ok(self.from_metadata(meta))
    }

    /// Lists every application with a metadata file in the apps root, in
    /// directory-read order.
    pub fn list(&self) -> Result<Vec<Application>, RegistryError> {
        let mut apps = Vec::new();
        for entry in fs::read_dir(&self.apps_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get(id) {
                Ok(app) => apps.push(app),
                Err(RegistryError::Malformed(id, e)) => {
                    log::warn!("skipping malformed metadata for {id:?}: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(apps)
    }

    fn validate_relative(&self, app: &Application, relative: &str) -> Result<(), RegistryError> {
        if relative.contains("..") {
            return Err(RegistryError::Invalid(format!(
                "path {relative:?} escapes {}",
                app.installed_path.display()
            )));
        }
        Ok(())
    }

    /// Updates `name` and persists it.
    pub fn set_name(&self, app: &mut Application, name: &str) -> Result<(), RegistryError> {
        app.name = name.to_string();
        self.save(app)
    }

    /// Updates `author` and persists it.
    pub fn set_author(&self, app: &mut Application, author: &str) -> Result<(), RegistryError> {
        app.author = author.to_string();
        self.save(app)
    }

    /// Updates `version` and persists it.
    pub fn set_version(&self, app: &mut Application, version: &str) -> Result<(), RegistryError> {
        app.version = version.to_string();
        self.save(app)
    }

    /// Updates `interpreter` and persists it.
    pub fn set_interpreter(
        &self,
        app: &mut Application,
        interpreter: Option<&str>,
    ) -> Result<(), RegistryError> {
        app.interpreter = interpreter.map(str::to_string);
        self.save(app)
    }

    /// Updates `binary_path`, which must be a relative path inside
    /// `installed_path`, and persists it.
    pub fn set_binary_path(&self, app: &mut Application, binary_path: &str) -> Result<(), RegistryError> {
        self.validate_relative(app, binary_path)?;
        app.binary_path = binary_path.to_string();
        self.save(app)
    }

    /// Updates `metadata_file`, which must be a relative path inside
    /// `installed_path`, and persists it.
    pub fn set_metadata(&self, app: &mut Application, metadata_file: &str) -> Result<(), RegistryError> {
        self.validate_relative(app, metadata_file)?;
        app.metadata_file = metadata_file.to_string();
        self.save(app)
    }

    /// Recursively removes the application directory and its metadata
    /// sidecar. The original leaves the sidecar's removal to the caller;
    /// this registry removes it too so that `list()` excludes `id`
    /// immediately after `destroy` returns (see the Open Questions in
    /// `DESIGN.md`).
    pub fn destroy(&self, app: Application) -> Result<(), RegistryError> {
        let id = app.unique_identifier.clone();
        if app.installed_path.exists() {
            fs::remove_dir_all(&app.installed_path)?;
        }
        let meta_path = self.metadata_path(&id);
        if meta_path.exists() {
            fs::remove_file(meta_path)?;
        }
        log::info!("destroyed application {id:?}");
        Ok(())
    }

    /// Ensures the intermediate directories for `relative` exist under
    /// `app`'s installed path and returns its absolute path, without
    /// creating or truncating the file itself. Callers that only need a
    /// path to write through some other API (an HTTP download, a rename
    /// target) should use this instead of [`create_file`](Self::create_file).
    pub fn create_file_string(&self, app: &Application, relative: &str) -> Result<PathBuf, RegistryError> {
        self.validate_relative(app, relative)?;
        let absolute = app.installed_path.join(relative);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(absolute)
    }

    /// Like [`create_file_string`](Self::create_file_string), but also
    /// creates (or truncates) the file and returns it open for writing.
    pub fn create_file(&self, app: &Application, relative: &str) -> Result<fs::File, RegistryError> {
        let absolute = self.create_file_string(app, relative)?;
        Ok(fs::File::create(absolute)?)
    }

    /// The absolute binary path for `app`, resolved for launching.
    pub fn resolved_binary_path(&self, app: &Application) -> PathBuf {
        app.installed_path.join(&app.binary_path)
    }
}

/// Something that can turn a resolved binary path into a running process.
/// Implemented by [`crate::process::ProcessManager`]; kept as a trait here
/// so `registry` never depends on `process`.
pub trait Spawner {
    /// Spawns `path` with the given argv, returning the new pid.
    fn spawn(&self, path: &Path, argv: &[String]) -> Result<u32, RegistryError>;
}

impl AppRegistry {
    /// Resolves `id`'s binary path and hands it to `spawner`.
    pub fn launch(&self, id: &str, spawner: &dyn Spawner, argv: &[String]) -> Result<u32, RegistryError> {
        let app = self.get(id)?;
        let path = self.resolved_binary_path(&app);
        spawner.spawn(&path, argv)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    fn registry() -> (tempfile::TempDir, AppRegistry) {
        let dir = tempdir().unwrap();
        let reg = AppRegistry::init(
            dir.path().join("apps"),
            dir.path().join("flash"),
            dir.path().join("sd"),
        )
        .unwrap();
        (dir, reg)
    }

    #[test_log::test]
    fn create_then_get_round_trips() {
        let (_dir, reg) = registry();
        reg.create(
            "com_example_myapp",
            "My Test App",
            "Example Developer",
            "1.0.0",
            None,
            ApplicationSource::Unknown,
        )
        .unwrap();

        let mut app = reg.get("com_example_myapp").unwrap();
        assert_eq!(app.version(), "1.0.0");

        reg.set_version(&mut app, "1.0.1").unwrap();
        assert_eq!(reg.get("com_example_myapp").unwrap().version(), "1.0.1");
    }

    #[test_log::test]
    fn create_twice_fails_second_time() {
        let (_dir, reg) = registry();
        assert!(reg
            .create("dup", "n", "a", "1", None, ApplicationSource::Unknown)
            .is_ok());
        assert!(matches!(
            reg.create("dup", "n", "a", "1", None, ApplicationSource::Unknown),
            Err(RegistryError::AlreadyExists(_))
        ));
    }

    #[test_log::test]
    fn list_yields_every_created_app_once() {
        let (_dir, reg) = registry();
        for id in ["a", "b", "c"] {
            reg.create(id, id, "a", "1", None, ApplicationSource::Unknown)
                .unwrap();
        }
        let mut ids: Vec<_> = reg.list().unwrap().into_iter().map(|a| a.id().to_string()).collect();
        ids.sort();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test_log::test]
    fn destroy_removes_directory_and_metadata() {
        let (_dir, reg) = registry();
        let app = reg
            .create("gone", "n", "a", "1", None, ApplicationSource::Unknown)
            .unwrap();
        let installed_path = app.installed_path().to_path_buf();
        reg.destroy(app).unwrap();

        assert!(matches!(reg.get("gone"), Err(RegistryError::NotFound(_))));
        assert!(!installed_path.exists());
        assert!(reg.list().unwrap().is_empty());
    }

    #[test_log::test]
    fn create_file_string_ensures_parent_dir_without_creating_file() {
        let (_dir, reg) = registry();
        let app = reg
            .create("strpath", "n", "a", "1", None, ApplicationSource::Unknown)
            .unwrap();

        let path = reg.create_file_string(&app, "assets/sprite.bin").unwrap();
        assert_eq!(path, app.installed_path().join("assets/sprite.bin"));
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());
    }

    #[test_log::test]
    fn create_file_opens_an_empty_file_at_the_path() {
        use std::io::Write;

        let (_dir, reg) = registry();
        let app = reg
            .create("filepath", "n", "a", "1", None, ApplicationSource::Unknown)
            .unwrap();

        let mut file = reg.create_file(&app, "data.txt").unwrap();
        file.write_all(b"hello").unwrap();
        drop(file);

        let path = app.installed_path().join("data.txt");
        assert_eq!(fs::read(path).unwrap(), b"hello");
    }
}
