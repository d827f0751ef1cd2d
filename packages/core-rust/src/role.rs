//! Startup routing from a persisted profile to a navigation target.
//!
//! Evaluated once at startup, first match wins:
//!
//! 1. An explicit destination handed in from outside is used verbatim.
//! 2. A deep-link hint naming a known [`Section`] routes to that section.
//! 3. The persisted role routes through a fixed role table; an unknown or
//!    absent role routes to onboarding.
//!
//! Nothing here fails: unreadable profiles count as "no role".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::traits::ProfileStore;

// ---------------------------------------------------------------------------
// Roles and sections
// ---------------------------------------------------------------------------

/// Role of the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Enrolled student; lands on their own grades and messages.
    Student,
    /// Teaching staff.
    Teacher,
    /// Parent or legal guardian of a student.
    Guardian,
    /// School administration.
    Admin,
}

impl Role {
    /// Parses a persisted role string, case-insensitively and trimming whitespace.
    ///
    /// Returns `None` for anything outside the role table.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "student" | "estudiante" | "alumno" => Some(Self::Student),
            "teacher" | "docente" | "profesor" => Some(Self::Teacher),
            "guardian" | "parent" | "acudiente" | "padre" | "madre" => Some(Self::Guardian),
            "admin" | "administrator" | "administrador" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// A section of the app that deep links may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    /// Grade book and averages.
    Grades,
    /// Direct messages.
    Messages,
    /// Notification feed.
    Notifications,
    /// Class timetable.
    Schedule,
    /// The user's own profile.
    Profile,
}

impl FromStr for Section {
    type Err = ();

    /// Accepts `grades`, `/grades`, `section/grades` in any letter case.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim().trim_start_matches('/').to_lowercase();
        let name = trimmed.strip_prefix("section/").unwrap_or(&trimmed);
        match name.trim_end_matches('/') {
            "grades" | "notas" => Ok(Self::Grades),
            "messages" | "mensajes" => Ok(Self::Messages),
            "notifications" | "notificaciones" => Ok(Self::Notifications),
            "schedule" | "horario" => Ok(Self::Schedule),
            "profile" | "perfil" => Ok(Self::Profile),
            _ => Err(()),
        }
    }
}

/// Where the app should land.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// A screen named explicitly by the caller.
    Screen(String),
    /// A deep-linked section.
    Section(Section),
    /// The home screen of a role.
    Home(Role),
    /// Fallback for unknown or missing roles.
    Onboarding,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Screen(name) => write!(f, "screen:{name}"),
            Self::Section(s) => write!(f, "section:{s:?}"),
            Self::Home(r) => write!(f, "home:{r:?}"),
            Self::Onboarding => f.write_str("onboarding"),
        }
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Persisted user profile, as read from the profile store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Resolves the startup destination. See the module docs for the precedence.
///
/// Blank explicit destinations and blank hints are treated as absent.
#[must_use]
pub fn resolve(
    explicit_destination: Option<&str>,
    deep_link_hint: Option<&str>,
    persisted_role: Option<&str>,
) -> Destination {
    if let Some(screen) = explicit_destination.filter(|s| !s.trim().is_empty()) {
        return Destination::Screen(screen.to_string());
    }

    if let Some(section) = deep_link_hint.and_then(|h| h.parse::<Section>().ok()) {
        return Destination::Section(section);
    }

    match persisted_role.and_then(Role::parse) {
        Some(role) => Destination::Home(role),
        None => {
            if let Some(raw) = persisted_role {
                tracing::debug!(role = raw, "unrecognized role, routing to onboarding");
            }
            Destination::Onboarding
        }
    }
}

/// Resolves the startup destination reading the role from `store`.
///
/// A store failure is logged and treated as an absent role.
pub fn route_from_store(
    explicit_destination: Option<&str>,
    deep_link_hint: Option<&str>,
    store: &dyn ProfileStore,
) -> Destination {
    let profile = match store.load() {
        Ok(profile) => profile,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read persisted profile");
            Profile::default()
        }
    };
    resolve(explicit_destination, deep_link_hint, profile.role.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStore(Profile);

    impl ProfileStore for FixedStore {
        fn load(&self) -> anyhow::Result<Profile> {
            Ok(self.0.clone())
        }
    }

    struct BrokenStore;

    impl ProfileStore for BrokenStore {
        fn load(&self) -> anyhow::Result<Profile> {
            anyhow::bail!("disk on fire")
        }
    }

    #[test]
    fn explicit_destination_wins() {
        let dest = resolve(Some("ChatScreen"), Some("grades"), Some("teacher"));
        assert_eq!(dest, Destination::Screen("ChatScreen".to_string()));
    }

    #[test]
    fn deep_link_beats_role() {
        assert_eq!(
            resolve(None, Some("/Grades"), Some("teacher")),
            Destination::Section(Section::Grades)
        );
        assert_eq!(
            resolve(None, Some("section/messages"), None),
            Destination::Section(Section::Messages)
        );
    }

    #[test]
    fn unknown_deep_link_falls_through_to_role() {
        assert_eq!(
            resolve(None, Some("nowhere"), Some("student")),
            Destination::Home(Role::Student)
        );
    }

    #[test]
    fn role_comparison_is_case_insensitive() {
        assert_eq!(resolve(None, None, Some("TEACHER")), Destination::Home(Role::Teacher));
        assert_eq!(resolve(None, None, Some("  Docente ")), Destination::Home(Role::Teacher));
        assert_eq!(resolve(None, None, Some("Parent")), Destination::Home(Role::Guardian));
    }

    #[test]
    fn unknown_or_missing_role_is_onboarding() {
        assert_eq!(resolve(None, None, Some("bogus")), Destination::Onboarding);
        assert_eq!(resolve(None, None, None), Destination::Onboarding);
        assert_eq!(resolve(None, None, Some("")), Destination::Onboarding);
    }

    #[test]
    fn blank_explicit_destination_is_ignored() {
        assert_eq!(resolve(Some("  "), None, Some("admin")), Destination::Home(Role::Admin));
    }

    #[test]
    fn store_role_is_used() {
        let store = FixedStore(Profile {
            role: Some("Estudiante".to_string()),
            name: Some("Ana".to_string()),
        });
        assert_eq!(route_from_store(None, None, &store), Destination::Home(Role::Student));
    }

    #[test]
    fn store_failure_is_absent_role() {
        assert_eq!(route_from_store(None, None, &BrokenStore), Destination::Onboarding);
        assert_eq!(
            route_from_store(Some("Settings"), None, &BrokenStore),
            Destination::Screen("Settings".to_string())
        );
    }

    #[test]
    fn destination_display() {
        assert_eq!(Destination::Home(Role::Guardian).to_string(), "home:Guardian");
        assert_eq!(Destination::Onboarding.to_string(), "onboarding");
    }
}
