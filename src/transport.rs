//! The outbound transport seam.
//!
//! The chat-protocol client is an external collaborator; the queue only
//! needs a connectivity probe and a send primitive. Implementations wrap
//! whatever session layer the host application maintains.

use std::future::Future;
use thiserror::Error;

/// Media category used to pick the protocol-level message kind.
///
/// Derived from the stored MIME string, see [`crate::media::categorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video clip.
    Video,
    /// Audio clip or voice note.
    Audio,
    /// Anything else, sent as a file attachment.
    Document,
}

/// Attachment content: either bytes loaded from disk or a remote URL the
/// transport fetches itself.
#[derive(Debug, Clone)]
pub enum MediaContent {
    /// Raw file bytes.
    Bytes(Vec<u8>),
    /// Absolute http(s) URL, passed through unchanged.
    Url(String),
}

/// One outbound message.
#[derive(Debug, Clone)]
pub enum OutboundPayload {
    /// Plain text message.
    Text {
        /// Message body.
        body: String,
    },
    /// Media message with an optional caption.
    Media {
        /// Protocol-level message kind.
        kind: MediaKind,
        /// Attachment bytes or URL.
        content: MediaContent,
        /// Optional caption shown with the media.
        caption: Option<String>,
        /// MIME type as stored on the schedule item.
        mimetype: Option<String>,
        /// File name shown for document sends.
        file_name: Option<String>,
    },
}

/// Structured failure categories, used by the retry classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operation timed out.
    Timeout,
    /// The connection was reset mid-flight.
    ConnectionReset,
    /// The remote refused the connection.
    ConnectionRefused,
    /// Name resolution failed.
    Dns,
    /// The socket was closed before a response arrived.
    SocketHangUp,
    /// The server asked us to slow down.
    RateLimited,
    /// HTTP 500/502/503-class server failure.
    ServerError,
    /// The transport has no live session.
    NotConnected,
    /// The server rejected the message permanently.
    Rejected,
    /// Anything the transport could not categorize.
    Other,
}

/// Failure reported by a transport send.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Structured category, when the transport can tell.
    pub kind: ErrorKind,
    /// Human-readable description, stored on the item on terminal failure.
    pub message: String,
}

impl TransportError {
    /// Build an error with an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error whose kind is recovered from the message text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: crate::retry::classify_message(&message),
            message,
        }
    }
}

/// The send capability consumed by the delivery worker.
pub trait Transport: Send + Sync + 'static {
    /// Whether a live protocol session exists right now.
    fn connected(&self) -> bool;

    /// Deliver one payload to one recipient.
    fn send(
        &self,
        recipient: &str,
        payload: OutboundPayload,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
