//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Envelope types and the JSON wire codec."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::{Result, SdkError};

/// Status tag carried by successful replies.
pub const STATUS_OK: &str = "ok";
/// Status tag carried by failed replies.
pub const STATUS_ERROR: &str = "error";

/// Free-form string metadata attached to an envelope.
pub type Meta = BTreeMap<String, String>;

/// Envelope exchanged between modules on the bus.
///
/// No field is validated; an empty `command` is forwarded as-is.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Command name used by the receiving module for dispatch.
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub command: String,
    /// Opaque argument payload.
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub args: String,
    /// Optional metadata, omitted on the wire when empty.
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

impl Message {
    /// Construct an envelope without metadata.
    pub fn new(command: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: args.into(),
            meta: Meta::new(),
        }
    }

    /// Attach a metadata entry, replacing any previous value for `key`.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Structured reply to a [`Message`].
///
/// `status` is conventionally [`STATUS_OK`] or [`STATUS_ERROR`] but any string
/// is forwarded verbatim.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub status: String,
    /// Human-readable outcome description.
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub message: String,
    /// Optional opaque result payload, omitted on the wire when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Response {
    pub fn new(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(STATUS_OK, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(STATUS_ERROR, message)
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Whether the status tag equals [`STATUS_OK`].
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Serialize a value into its UTF-8 JSON wire form.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(SdkError::Encode)
}

/// Deserialize a value from its JSON wire form. Missing or `null` fields take
/// their zero value; malformed JSON is a [`SdkError::Decode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(SdkError::Decode)
}
