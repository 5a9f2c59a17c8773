//! File-backed cookie jar, analogous to `CURLOPT_COOKIEJAR`/
//! `CURLOPT_COOKIEFILE`: a plain text file an application chooses the
//! path for.

use std::{collections::HashMap, fs, path::Path};

use super::HttpError;

/// A simple `name=value` cookie jar, persisted as one line per cookie.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: HashMap<String, String>,
}

impl CookieJar {
    /// An empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a jar from `path`. Missing files yield an empty jar.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HttpError> {
        let path = path.as_ref();
        let mut cookies = HashMap::new();
        match fs::read_to_string(path) {
            Ok(contents) => {
                for line in contents.lines() {
                    if let Some((name, value)) = line.split_once('=') {
                        cookies.insert(name.to_string(), value.to_string());
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self { cookies })
    }

    /// Saves the jar to `path`, one `name=value` per line.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HttpError> {
        let mut contents = String::new();
        let mut names: Vec<_> = self.cookies.keys().collect();
        names.sort();
        for name in names {
            contents.push_str(name);
            contents.push('=');
            contents.push_str(&self.cookies[name]);
            contents.push('\n');
        }
        fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    /// Sets a cookie.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Reads a cookie's value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cookies.txt");

        let mut jar = CookieJar::new();
        jar.set("session", "abc123");
        jar.save(&path).unwrap();

        let loaded = CookieJar::load(&path).unwrap();
        assert_eq!(loaded.get("session"), Some("abc123"));
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let jar = CookieJar::load("/nonexistent/path/cookies.txt").unwrap();
        assert_eq!(jar.get("anything"), None);
    }
}
