//! Request/response envelopes.

use std::fmt;

use bytes::Bytes;
use ptimer_asset::{AssetResolver, ByteStream};
use ptimer_codec::{DecodeError, EncodeError};
use ptimer_document::Document;

/// The closed set of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
  Heartbeat,
  Parse,
  Compile,
}

impl Kind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Kind::Heartbeat => "heartbeat",
      Kind::Parse => "parse",
      Kind::Compile => "compile",
    }
  }
}

impl fmt::Display for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Identifier pairing a request with its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
  /// Generate a fresh id for a request of the given kind.
  pub fn new(kind: Kind) -> Self {
    Self(format!("{}_{}", kind, uuid::Uuid::new_v4()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for CorrelationId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

impl fmt::Display for CorrelationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Request payloads.
///
/// Parse and compile carry the caller's resolver: decoded assets are
/// registered with it, and assets to encode are dereferenced through it.
pub enum Request {
  /// Readiness handshake.
  Heartbeat,
  /// Decode a container. The stream is moved into the worker.
  Parse {
    data: ByteStream,
    resolver: AssetResolver,
  },
  /// Encode a document.
  Compile {
    document: Document,
    resolver: AssetResolver,
  },
}

impl Request {
  pub fn kind(&self) -> Kind {
    match self {
      Request::Heartbeat => Kind::Heartbeat,
      Request::Parse { .. } => Kind::Parse,
      Request::Compile { .. } => Kind::Compile,
    }
  }
}

impl fmt::Debug for Request {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Request::Heartbeat => f.write_str("Heartbeat"),
      Request::Parse { .. } => f.debug_struct("Parse").finish_non_exhaustive(),
      Request::Compile { document, .. } => f
        .debug_struct("Compile")
        .field("title", &document.metadata.title)
        .field("steps", &document.steps.len())
        .field("assets", &document.assets.len())
        .finish(),
    }
  }
}

/// Reply payloads. Parse and compile carry a tagged result.
#[derive(Debug)]
pub enum Response {
  Heartbeat { sqlite_version: String },
  Parse(Result<Document, DecodeError>),
  Compile(Result<Bytes, EncodeError>),
}

impl Response {
  pub fn kind(&self) -> Kind {
    match self {
      Response::Heartbeat { .. } => Kind::Heartbeat,
      Response::Parse(_) => Kind::Parse,
      Response::Compile(_) => Kind::Compile,
    }
  }
}

/// A request envelope.
#[derive(Debug)]
pub struct RequestMessage {
  pub id: CorrelationId,
  pub request: Request,
}

impl RequestMessage {
  /// Wrap a request with a fresh correlation id.
  pub fn new(request: Request) -> Self {
    Self {
      id: CorrelationId::new(request.kind()),
      request,
    }
  }

  pub fn kind(&self) -> Kind {
    self.request.kind()
  }
}

/// A response envelope.
#[derive(Debug)]
pub struct ResponseMessage {
  pub id: CorrelationId,
  pub response: Response,
}

impl ResponseMessage {
  /// Build the reply to the request with id `to`.
  pub fn reply(to: CorrelationId, response: Response) -> Self {
    Self { id: to, response }
  }

  pub fn kind(&self) -> Kind {
    self.response.kind()
  }
}
