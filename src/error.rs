//! Error taxonomy shared by the reader, writer, and signing layers.

use thiserror::Error;

/// Errors surfaced by the relay data-access and signing layers.
///
/// A missing record is not an error: loaders return `Ok(None)` for records
/// that were never created, and for payloads that failed to decode.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed public key or identity input.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Malformed private key input.
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// No relay session could be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A single relay misbehaved or rejected a request.
    #[error("relay error ({relay}): {message}")]
    Relay { relay: String, message: String },

    /// The signer does not control the profile being edited.
    #[error("identity mismatch: profile belongs to {expected} but the signer is {actual}")]
    IdentityMismatch { expected: String, actual: String },

    /// No delegated signer is installed.
    #[error("nostr extension not available")]
    ExtensionUnavailable,

    /// The signer failed or returned an unusable event.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Publishing stopped part way through a signed batch.
    #[error(
        "publish failed for event {failed} after {} event(s) were published: {reason}",
        published.len()
    )]
    PublishFailed {
        /// Ids of events that reached at least one relay before the failure.
        published: Vec<String>,
        /// Id of the event that could not be published.
        failed: String,
        reason: String,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
