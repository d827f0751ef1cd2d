//! Configuration types for the client layer.

use std::path::Path;

use anyhow::Context;
use schoolsync_core::GradeFields;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Where each aggregate reads its documents from.
    pub collections: CollectionsConfig,
    /// Field names recognized by the grade resolver.
    pub grade_fields: GradeFields,
    /// Logging setup for binaries.
    pub log: LogConfig,
}

impl ClientConfig {
    /// Reads a JSON config file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting config fails [`validate`](Self::validate).
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would otherwise fail later at runtime.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collections.validate()?;
        self.log.validate()
    }
}

/// A collection and the field that ties its documents to a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    pub collection: String,
    pub owner_field: String,
}

impl FeedConfig {
    pub fn new(collection: impl Into<String>, owner_field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            owner_field: owner_field.into(),
        }
    }

    fn validate(&self, feed: &'static str) -> Result<(), ConfigError> {
        if self.collection.trim().is_empty() {
            return Err(ConfigError::EmptyCollection { feed });
        }
        if self.owner_field.trim().is_empty() {
            return Err(ConfigError::EmptyOwnerField { feed });
        }
        Ok(())
    }
}

/// Source collections for the built-in aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectionsConfig {
    pub notifications: FeedConfig,
    pub messages: FeedConfig,
    pub grades: FeedConfig,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            notifications: FeedConfig::new("notifications", "userId"),
            messages: FeedConfig::new("messages", "recipientId"),
            grades: FeedConfig::new("grades", "studentId"),
        }
    }
}

impl CollectionsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.notifications.validate("notifications")?;
        self.messages.validate("messages")?;
        self.grades.validate("grades")?;
        // The unread aggregate observes both feeds under one consumer; equal
        // feeds would yield equal queries and replace each other.
        if self.notifications == self.messages {
            return Err(ConfigError::DuplicateFeed {
                first: "notifications",
                second: "messages",
            });
        }
        Ok(())
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,schoolsync_client=debug".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LogConfig {
    /// Parses the filter directives.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyLogFilter`] or
    /// [`ConfigError::InvalidLogFilter`].
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        if self.filter.trim().is_empty() {
            return Err(ConfigError::EmptyLogFilter);
        }
        EnvFilter::try_new(&self.filter).map_err(|e| ConfigError::InvalidLogFilter {
            filter: self.filter.clone(),
            reason: e.to_string(),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.env_filter().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.collections.notifications.collection, "notifications");
        assert_eq!(config.collections.notifications.owner_field, "userId");
        assert_eq!(config.collections.messages.owner_field, "recipientId");
        assert_eq!(config.collections.grades.collection, "grades");
        assert_eq!(config.collections.grades.owner_field, "studentId");
        assert_eq!(config.grade_fields, GradeFields::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.filter, "info,schoolsync_client=debug");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn empty_collection_is_rejected() {
        let mut config = ClientConfig::default();
        config.collections.messages.collection = "  ".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptyCollection { feed: "messages" })
        );
    }

    #[test]
    fn empty_owner_field_is_rejected() {
        let mut config = ClientConfig::default();
        config.collections.grades.owner_field = String::new();
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptyOwnerField { feed: "grades" })
        );
    }

    #[test]
    fn notification_and_message_feeds_must_differ() {
        let mut config = ClientConfig::default();
        config.collections.messages = config.collections.notifications.clone();
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateFeed {
                first: "notifications",
                second: "messages",
            })
        );

        // Same collection with a different owner field is fine.
        config.collections.messages.owner_field = "recipientId".to_string();
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn empty_log_filter_is_rejected() {
        let mut config = ClientConfig::default();
        config.log.filter = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyLogFilter));
    }

    #[test]
    fn invalid_log_filter_is_rejected() {
        let log = LogConfig {
            filter: "info,schoolsync=loud".to_string(),
            format: LogFormat::Json,
        };
        assert!(matches!(
            log.env_filter(),
            Err(ConfigError::InvalidLogFilter { .. })
        ));
    }

    #[test]
    fn partial_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "collections": {{ "grades": {{ "collection": "notas", "ownerField": "alumnoId" }} }},
                 "log": {{ "format": "json" }} }}"#
        )
        .unwrap();

        let config = ClientConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.collections.grades, FeedConfig::new("notas", "alumnoId"));
        assert_eq!(config.collections.messages.collection, "messages");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter, LogConfig::default().filter);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ClientConfig::from_json_file(&dir.path().join("nope.json")).is_err());
    }
}
