use crate::role::Profile;

/// Read-only access to the persisted user profile.
///
/// Implementations wrap whatever the platform persists the profile in; the
/// core only ever reads it. Failures are reported, never panicked on, and
/// callers decide how to degrade.
pub trait ProfileStore: Send + Sync {
    /// Loads the current profile.
    fn load(&self) -> anyhow::Result<Profile>;
}
