//! Schema-less documents mirrored from the remote store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Errors raised when decoding a document payload handed over by a source adapter.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid MsgPack document payload: {0}")]
    MsgPack(#[from] rmp_serde::decode::Error),
    #[error("invalid JSON document payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document payload has no string `id` field")]
    MissingId,
}

/// One record from a remote collection.
///
/// No schema is guaranteed: producers may omit fields or use alternate names
/// for the same concept. Field order is deterministic (`BTreeMap`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    /// Document id, unique within its collection.
    pub id: String,
    /// Field name to value.
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    /// Creates an empty document with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Inserts or replaces a field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Merges `patch` into this document, overwriting fields present in both.
    pub fn merge(&mut self, patch: BTreeMap<String, Value>) {
        self.fields.extend(patch);
    }

    /// Decodes a document from a MsgPack map that carries its id in an `id` field.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::MsgPack`] for malformed bytes and
    /// [`DocumentError::MissingId`] if the map has no string `id`.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, DocumentError> {
        let fields: BTreeMap<String, Value> = rmp_serde::from_slice(bytes)?;
        Self::from_fields(fields)
    }

    /// Decodes a document from a JSON object that carries its id in an `id` field.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Json`] for malformed input and
    /// [`DocumentError::MissingId`] if the object has no string `id`.
    pub fn from_json(value: serde_json::Value) -> Result<Self, DocumentError> {
        let fields: BTreeMap<String, Value> = serde_json::from_value(value)?;
        Self::from_fields(fields)
    }

    fn from_fields(mut fields: BTreeMap<String, Value>) -> Result<Self, DocumentError> {
        match fields.remove("id") {
            Some(Value::String(id)) => Ok(Self { id, fields }),
            _ => Err(DocumentError::MissingId),
        }
    }
}
