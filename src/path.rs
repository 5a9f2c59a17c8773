//! VMS-style path parsing: `DEVICE:[DIR.SUB]FILE.EXT`.
//!
//! Grounded in the original `pathfuncs.c` tokenizer: one left-to-right pass
//! over the device, an optional bracketed directory, and an optional
//! trailing filename, each validated against its own character class.

use std::{
    cell::OnceCell,
    fs, io,
    path::{Path as StdPath, PathBuf},
};

use thiserror::Error;

use crate::error::ErrorKind;

/// Failure modes for [`parse`], matching `path_parse_result_t` one-to-one.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum PathError {
    /// The input was empty.
    #[error("empty path")]
    EmptyPath,
    /// A `:` was present but nothing preceded it.
    #[error("empty device")]
    EmptyDevice,
    /// No `:` was found anywhere in the input.
    #[error("no device")]
    NoDevice,
    /// A `[` was opened but never closed.
    #[error("unclosed directory")]
    UnclosedDirectory,
    /// The device segment contained a character outside `[A-Za-z0-9_$-]`.
    #[error("invalid character in device name")]
    InvalidDeviceChar,
    /// The directory segment contained a character outside `[A-Za-z0-9_$.-]`.
    #[error("invalid character in directory")]
    InvalidDirChar,
    /// The filename segment contained a character outside `[A-Za-z0-9_$.-]`.
    #[error("invalid character in filename")]
    InvalidFileChar,
}

impl PathError {
    /// Classifies this error into the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Invalid
    }
}

fn is_valid_device_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-')
}

fn is_valid_path_char(c: char) -> bool {
    is_valid_device_char(c) || c == '.'
}

/// A parsed VMS-style path: device, directory components, filename, and a
/// lazily-computed, cached native rendering.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Path {
    device: String,
    directory: Vec<String>,
    filename: Option<String>,
    native: OnceCell<String>,
}

impl Path {
    /// The device segment, e.g. `FLASH0`.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// The directory components, in order, e.g. `["SUBDIR", "ANOTHER"]`.
    pub fn directory(&self) -> &[String] {
        &self.directory
    }

    /// The filename segment, if any.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// `/DEVICE/DIR/SUB/FILENAME`, directory `.` separators rewritten to `/`.
    ///
    /// Deterministic and idempotent: repeated calls return the same string
    /// without recomputing it.
    pub fn to_native(&self) -> &str {
        self.native.get_or_init(|| {
            let mut out = String::from("/");
            out.push_str(&self.device);
            for component in &self.directory {
                out.push('/');
                out.push_str(component);
            }
            if let Some(filename) = &self.filename {
                out.push('/');
                out.push_str(filename);
            }
            out
        })
    }
}

/// Tokenizes `text` in one left-to-right pass: device up to `:`, optional
/// `[dir.sub]`, optional trailing filename.
pub fn parse(text: &str) -> Result<Path, PathError> {
    if text.is_empty() {
        return Err(PathError::EmptyPath);
    }

    let colon = text.find(':').ok_or(PathError::NoDevice)?;
    let device = &text[..colon];
    if device.is_empty() {
        return Err(PathError::EmptyDevice);
    }
    if !device.chars().all(is_valid_device_char) {
        return Err(PathError::InvalidDeviceChar);
    }

    let mut rest = &text[colon + 1..];
    let mut directory = Vec::new();

    if let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped.find(']').ok_or(PathError::UnclosedDirectory)?;
        let dir_text = &stripped[..close];
        if !dir_text.chars().all(is_valid_path_char) {
            return Err(PathError::InvalidDirChar);
        }
        directory = dir_text.split('.').map(str::to_string).collect();
        rest = &stripped[close + 1..];
    }

    let filename = if rest.is_empty() {
        None
    } else {
        if !rest.chars().all(is_valid_path_char) {
            return Err(PathError::InvalidFileChar);
        }
        Some(rest.to_string())
    };

    Ok(Path {
        device: device.to_string(),
        directory,
        filename,
        native: OnceCell::new(),
    })
}

/// The device segment of a raw path string, without parsing the rest.
pub fn devname(text: &str) -> Result<String, PathError> {
    Ok(parse(text)?.device)
}

/// The filename segment of a native (slash-separated) path.
pub fn basename(native: &str) -> &str {
    native.rsplit('/').next().unwrap_or(native)
}

/// The directory portion of a native path, with the final component removed.
pub fn dirname(native: &str) -> &str {
    match native.rfind('/') {
        Some(0) => "/",
        Some(idx) => &native[..idx],
        None => "",
    }
}

/// Joins a native base directory with a subdirectory component.
pub fn dirconcat(base: &str, subdir: &str) -> String {
    let mut out = base.trim_end_matches('/').to_string();
    out.push('/');
    out.push_str(subdir.trim_start_matches('/'));
    out
}

/// Joins a native base directory with a filename.
pub fn fileconcat(base: &str, file: &str) -> String {
    dirconcat(base, file)
}

/// Joins a native base path with a relative native path.
pub fn concat(base: &str, relative: &str) -> String {
    dirconcat(base, relative)
}

/// Recursively creates `path` and all missing parent directories.
///
/// Reports success as a boolean rather than propagating `io::Error`,
/// matching the original's "stop at first error, report a bool" contract.
pub fn mkdir_p(path: &StdPath) -> bool {
    fs::create_dir_all(path).is_ok()
}

/// Recursively removes `path`, whether file or directory.
pub fn rm_rf(path: &StdPath) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).is_ok(),
        Ok(_) => fs::remove_file(path).is_ok(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(_) => false,
    }
}

/// Converts a native path string to a [`PathBuf`] for filesystem calls.
pub fn native_to_pathbuf(native: &str) -> PathBuf {
    PathBuf::from(native)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn device_only_is_legal() {
        let p = parse("FLASH0:").unwrap();
        assert_eq!(p.device(), "FLASH0");
        assert!(p.directory().is_empty());
        assert_eq!(p.filename(), None);
    }

    #[test]
    fn full_path_e2e_scenario() {
        let p = parse("FLASH0:[SUBDIR.ANOTHER]NEW_FILE").unwrap();
        assert_eq!(p.device(), "FLASH0");
        assert_eq!(p.directory(), ["SUBDIR", "ANOTHER"]);
        assert_eq!(p.filename(), Some("NEW_FILE"));
        assert_eq!(p.to_native(), "/FLASH0/SUBDIR/ANOTHER/NEW_FILE");
        // idempotent
        assert_eq!(p.to_native(), "/FLASH0/SUBDIR/ANOTHER/NEW_FILE");
    }

    #[test]
    fn empty_input_is_empty_path() {
        assert_eq!(parse(""), Err(PathError::EmptyPath));
    }

    #[test]
    fn missing_colon_is_no_device() {
        assert_eq!(parse("DEVICE"), Err(PathError::NoDevice));
    }

    #[test]
    fn leading_colon_is_empty_device() {
        assert_eq!(parse(":FILE"), Err(PathError::EmptyDevice));
    }

    #[test]
    fn unclosed_bracket() {
        assert_eq!(
            parse("DEVICE:[sub.dir"),
            Err(PathError::UnclosedDirectory)
        );
    }

    #[test]
    fn space_in_device_is_invalid() {
        assert_eq!(parse("DEV ICE:FILE"), Err(PathError::InvalidDeviceChar));
    }

    #[test]
    fn filename_without_device_never_legal() {
        // ":FILE" already rejected above as EmptyDevice; there is no
        // grammar production that yields a bare filename.
        assert!(parse("FILE").is_err());
    }
}
