//! Ptimer Codec
//!
//! This crate converts between a [`Document`](ptimer_document::Document) and
//! the `.ptimer` container: a single SQLite database file with a fixed
//! schema (see [`schema`]).
//!
//! - [`decode`] opens a container, checks the version gate, reads metadata,
//!   steps (in persisted index order) and the assets that at least one step
//!   plays, and registers each payload with the session's
//!   [`AssetResolver`](ptimer_asset::AssetResolver).
//! - [`encode`] writes a document into a fresh, private database inside a
//!   single transaction and returns the serialized file. Any failure
//!   discards the whole database, so callers never see a partial container.
//!
//! The codec is stateless: every call works against its own scratch
//! database.

mod decode;
mod encode;
pub mod schema;

pub use decode::{Container, ContainerAsset, decode, read_container};
pub use encode::{ContainerWriter, encode};

use ptimer_asset::ResolverError;

/// Errors raised while decoding a container.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
  /// The bytes are not a SQLite database, or lack the container relations.
  #[error("malformed container: {message}")]
  Malformed { message: String },

  /// The `metadata` relation has no row.
  #[error("container has no metadata row")]
  NoMetadata,

  /// The container was written by an unsupported format version.
  #[error("unsupported container version: {}", found.as_deref().unwrap_or("<unset>"))]
  UnsupportedVersion { found: Option<String> },

  /// Scratch space for the container could not be prepared.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl DecodeError {
  pub(crate) fn malformed(error: sqlx::Error) -> Self {
    Self::Malformed {
      message: error.to_string(),
    }
  }
}

/// Errors raised while encoding a document.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
  /// A schema-level constraint was violated (duplicate id, duplicate index,
  /// a step playing a missing asset, ...).
  #[error("constraint violation: {message}")]
  Constraint { message: String },

  /// The bytes behind an asset reference could not be obtained.
  #[error("asset {asset_id} is unavailable: {source}")]
  AssetUnavailable {
    asset_id: i64,
    #[source]
    source: ResolverError,
  },

  /// The embedded store failed for a reason other than a constraint.
  #[error("store error: {0}")]
  Store(sqlx::Error),

  /// Scratch space for the container could not be prepared or read back.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl EncodeError {
  pub(crate) fn constraint(message: impl Into<String>) -> Self {
    Self::Constraint {
      message: message.into(),
    }
  }
}

impl From<sqlx::Error> for EncodeError {
  fn from(error: sqlx::Error) -> Self {
    use sqlx::error::ErrorKind;

    match &error {
      sqlx::Error::Database(db) => match db.kind() {
        ErrorKind::UniqueViolation
        | ErrorKind::ForeignKeyViolation
        | ErrorKind::NotNullViolation
        | ErrorKind::CheckViolation => Self::constraint(db.message()),
        // Any other extended code in the SQLITE_CONSTRAINT family
        _ if db
          .code()
          .and_then(|code| code.parse::<i32>().ok())
          .is_some_and(|code| code & 0xff == 19) =>
        {
          Self::constraint(db.message())
        }
        _ => Self::Store(error),
      },
      _ => Self::Store(error),
    }
  }
}

/// Version string of the embedded SQLite library.
pub async fn store_version() -> Result<String, sqlx::Error> {
  use sqlx::Connection;

  let mut conn = sqlx::SqliteConnection::connect("sqlite::memory:").await?;
  let version: String = sqlx::query_scalar("SELECT sqlite_version()")
    .fetch_one(&mut conn)
    .await?;
  conn.close().await?;
  Ok(version)
}
