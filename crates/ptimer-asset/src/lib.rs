//! Ptimer Asset
//!
//! This crate owns the lifetime of the binary payloads (sounds, media) that a
//! ptimer document carries. Instead of passing raw bytes through the editing
//! layer, each payload is fronted by an [`AssetRef`]: an opaque, revocable
//! handle that can be dereferenced back into bytes.
//!
//! The [`AssetResolver`] is the only shared mutable state in the engine. It is
//! an explicit component constructed per editing session and handed to
//! whoever needs to materialize, revoke or dereference a payload.
//!
//! Payloads are either held in memory or fetched lazily from a
//! [`BlobSource`] (e.g. a file on disk) at the time they are dereferenced.

mod reference;
mod resolver;
mod source;

pub use reference::AssetRef;
pub use resolver::AssetResolver;
pub use source::{BlobSource, ByteStream, FileSource, collect_stream, stream_from_bytes};

/// Error type for resolver operations.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
  /// The reference was revoked (or never issued by this resolver).
  #[error("asset reference revoked: {reference}")]
  Revoked { reference: AssetRef },

  /// The reference is live but its lazy source could not produce bytes.
  #[error("asset {reference} is unavailable: {source}")]
  Unavailable {
    reference: AssetRef,
    #[source]
    source: std::io::Error,
  },
}
