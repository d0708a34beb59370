//! Engine error types.

use ptimer_codec::{DecodeError, EncodeError};
use ptimer_document::NotEncodable;
use ptimer_worker::Kind;

/// Failures of the message boundary itself.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
  /// The worker crashed, exited, or never replied.
  #[error("transport fault: {message}")]
  TransportFault { message: String },

  /// A request was issued before the readiness handshake completed.
  #[error("engine is not ready")]
  Unready,

  /// The worker answered with a reply of the wrong kind.
  #[error("expected a {expected} reply, got {actual}")]
  UnexpectedResponse { expected: Kind, actual: Kind },
}

impl ProtocolError {
  pub(crate) fn transport(message: impl Into<String>) -> Self {
    Self::TransportFault {
      message: message.into(),
    }
  }
}

/// Errors returned to collaborators by the [`Engine`](crate::Engine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error(transparent)]
  Decode(#[from] DecodeError),

  #[error(transparent)]
  Encode(#[from] EncodeError),

  #[error(transparent)]
  Protocol(#[from] ProtocolError),

  /// The document failed the advisory check; no encode was attempted.
  #[error("document cannot be compiled: {0}")]
  NotEncodable(#[from] NotEncodable),

  /// A session operation needs an open document.
  #[error("no document is open")]
  NoDocument,

  /// Reading the input for a parse request failed.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
