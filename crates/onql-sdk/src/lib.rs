//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus client SDK for ONQL modules."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Client SDK that lets ONQL modules exchange request/response envelopes over
//! a shared message bus, plus a lifecycle hook registry.

pub mod lifecycle;
pub mod logging;
pub mod nats;
pub mod sdk;
pub mod subject;
pub mod transport;
pub mod types;

/// Shared result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Failure kinds surfaced by the SDK.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// An operation needed a connection before [`Sdk::initialize`] succeeded.
    #[error("sdk is not initialized")]
    NotInitialized,
    /// The bus endpoint could not be reached.
    #[error("failed to connect to bus at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },
    /// No reply arrived within the request timeout.
    #[error("request to '{subject}' timed out")]
    Timeout { subject: String },
    /// Nothing is subscribed to the request subject.
    #[error("no responders available for '{subject}'")]
    NoResponders { subject: String },
    /// Any other failure reported by the bus client.
    #[error("transport error: {0}")]
    Transport(String),
    /// A payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
    /// A payload received from the bus could not be deserialized.
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
    /// A subject or subscription pattern is malformed.
    #[error("invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: &'static str },
    /// The connection was closed.
    #[error("bus connection closed")]
    Closed,
}

pub use lifecycle::{Hook, LifecycleEvent, LifecycleHooks};
pub use logging::{log_message, MessageDirection, SdkMetrics};
pub use nats::{NatsBus, NatsConnector};
pub use sdk::{Handler, Sdk, SubscriptionId, WaitOutcome};
pub use subject::{subject_matches, Subjects};
pub use transport::{Bus, Connector, Inbound, LocalBus, LocalConnection, Subscription};
pub use types::{decode, encode, Message, Meta, Response, STATUS_ERROR, STATUS_OK};
