//! File-backed profile store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use schoolsync_core::{Profile, ProfileStore};
use tracing::debug;

/// Reads the persisted profile from a JSON file of the form
/// `{ "role": "...", "name": "..." }`. Both keys are optional.
///
/// A missing file is an empty profile, not an error.
#[derive(Debug, Clone)]
pub struct JsonProfileStore {
    path: PathBuf,
}

impl JsonProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfileStore for JsonProfileStore {
    fn load(&self) -> anyhow::Result<Profile> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted profile");
                return Ok(Profile::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading profile {}", self.path.display()))
            }
        };
        serde_json::from_str(&raw).with_context(|| format!("parsing profile {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use schoolsync_core::role::route_from_store;
    use schoolsync_core::{Destination, Role, Section};

    use super::*;

    fn store_with(contents: &str) -> (tempfile::TempDir, JsonProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, contents).unwrap();
        (dir, JsonProfileStore::new(path))
    }

    #[test]
    fn loads_role_and_name() {
        let (_dir, store) = store_with(r#"{ "role": "docente", "name": "Ana" }"#);
        let profile = store.load().unwrap();
        assert_eq!(profile.role.as_deref(), Some("docente"));
        assert_eq!(profile.name.as_deref(), Some("Ana"));
        assert_eq!(route_from_store(None, None, &store), Destination::Home(Role::Teacher));
    }

    #[test]
    fn missing_file_is_an_empty_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProfileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load().unwrap(), Profile::default());
        assert_eq!(route_from_store(None, None, &store), Destination::Onboarding);
    }

    #[test]
    fn corrupt_file_routes_to_onboarding() {
        let (_dir, store) = store_with("{ role: ");
        assert!(store.load().is_err());
        assert_eq!(route_from_store(None, None, &store), Destination::Onboarding);
    }

    #[test]
    fn unknown_role_falls_back() {
        let (_dir, store) = store_with(r#"{ "role": "bogus" }"#);
        assert_eq!(route_from_store(None, None, &store), Destination::Onboarding);
        assert_eq!(
            route_from_store(None, Some("section/grades"), &store),
            Destination::Section(Section::Grades)
        );
        assert_eq!(
            route_from_store(Some("Settings"), None, &store),
            Destination::Screen("Settings".to_string())
        );
    }
}
