//! Container decoding.

use bytes::Bytes;
use ptimer_asset::AssetResolver;
use ptimer_document::{Asset, Document, Metadata, SUPPORTED_VERSION, Step};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection, FromRow, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::DecodeError;
use crate::schema::{CONTAINER_FILE, RELATIONS};

#[derive(FromRow)]
struct MetadataRow {
  version: Option<String>,
  title: String,
  description: Option<String>,
  lang: String,
}

#[derive(FromRow)]
struct StepRow {
  id: i64,
  title: String,
  description: Option<String>,
  sound: Option<i64>,
  duration_seconds: Option<i64>,
}

#[derive(FromRow)]
struct AssetRow {
  id: i64,
  name: String,
  mime: String,
  data: Vec<u8>,
  notice: Option<String>,
}

/// An asset as stored in a container, with its payload inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerAsset {
  pub id: i64,
  pub name: String,
  pub mime: String,
  pub notice: Option<String>,
  pub data: Bytes,
}

/// The decoded contents of a container, before payloads are handed to a
/// resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
  pub metadata: Metadata,
  pub steps: Vec<Step>,
  /// Only assets played by at least one step.
  pub assets: Vec<ContainerAsset>,
}

impl Container {
  /// Register every payload with `resolver` and build the editable document.
  pub fn into_document(self, resolver: &AssetResolver) -> Document {
    let assets = self
      .assets
      .into_iter()
      .map(|asset| Asset {
        data: resolver.materialize(asset.id, asset.data, asset.mime.clone()),
        id: asset.id,
        name: asset.name,
        mime: asset.mime,
        notice: asset.notice,
      })
      .collect();

    Document {
      metadata: self.metadata,
      steps: self.steps,
      assets,
    }
  }
}

/// Decode container bytes into a document whose asset payloads are
/// registered with `resolver`.
#[instrument(name = "container_decode", skip(bytes, resolver), fields(size = bytes.len()))]
pub async fn decode(bytes: &[u8], resolver: &AssetResolver) -> Result<Document, DecodeError> {
  let container = read_container(bytes).await?;

  info!(
    steps = container.steps.len(),
    assets = container.assets.len(),
    "container_decoded"
  );

  Ok(container.into_document(resolver))
}

/// Read a container without touching any resolver.
///
/// The input is copied into a private scratch database; `bytes` itself is
/// never modified.
pub async fn read_container(bytes: &[u8]) -> Result<Container, DecodeError> {
  let dir = tempfile::Builder::new()
    .prefix("ptimer-decode-")
    .tempdir()?;
  let path = dir.path().join(CONTAINER_FILE);
  tokio::fs::write(&path, bytes).await?;

  let mut conn = SqliteConnectOptions::new()
    .filename(&path)
    .create_if_missing(false)
    .journal_mode(SqliteJournalMode::Delete)
    .connect()
    .await
    .map_err(DecodeError::malformed)?;

  let result = read_relations(&mut conn).await;

  if let Err(e) = conn.close().await {
    warn!(error = %e, "failed to close scratch database");
  }

  result
}

async fn read_relations(conn: &mut SqliteConnection) -> Result<Container, DecodeError> {
  let tables: Vec<String> =
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
      .fetch_all(&mut *conn)
      .await
      .map_err(DecodeError::malformed)?;

  if let Some(missing) = RELATIONS
    .iter()
    .find(|relation| !tables.iter().any(|table| table == *relation))
  {
    return Err(DecodeError::Malformed {
      message: format!("missing relation '{}'", missing),
    });
  }

  // Containers from before the version column existed read as unset
  let version_columns: i64 = sqlx::query_scalar(
    "SELECT COUNT(*) FROM pragma_table_info('metadata') WHERE name = 'version'",
  )
  .fetch_one(&mut *conn)
  .await
  .map_err(DecodeError::malformed)?;
  let version_column = if version_columns > 0 { "version" } else { "NULL" };

  let metadata: MetadataRow = sqlx::query_as(&format!(
    "SELECT {} AS version, title, description, lang FROM metadata LIMIT 1",
    version_column
  ))
  .fetch_optional(&mut *conn)
  .await
  .map_err(DecodeError::malformed)?
  .ok_or(DecodeError::NoMetadata)?;

  if metadata.version.as_deref() != Some(SUPPORTED_VERSION) {
    return Err(DecodeError::UnsupportedVersion {
      found: metadata.version,
    });
  }

  let steps: Vec<StepRow> = sqlx::query_as(
    r#"
    SELECT id, title, description, sound, duration_seconds
    FROM step
    ORDER BY "index" ASC
    "#,
  )
  .fetch_all(&mut *conn)
  .await
  .map_err(DecodeError::malformed)?;

  let assets: Vec<AssetRow> = sqlx::query_as(
    r#"
    SELECT id, name, mime, data, notice
    FROM asset
    WHERE EXISTS (SELECT 1 FROM step WHERE step.sound = asset.id)
    ORDER BY id ASC
    "#,
  )
  .fetch_all(&mut *conn)
  .await
  .map_err(DecodeError::malformed)?;

  Ok(Container {
    metadata: Metadata {
      version: SUPPORTED_VERSION.to_string(),
      title: metadata.title,
      description: metadata.description,
      language: metadata.lang,
    },
    steps: steps
      .into_iter()
      .map(|row| Step {
        id: row.id,
        title: row.title,
        description: row.description,
        sound: row.sound,
        duration_seconds: row.duration_seconds,
      })
      .collect(),
    assets: assets
      .into_iter()
      .map(|row| ContainerAsset {
        id: row.id,
        name: row.name,
        mime: row.mime,
        notice: row.notice,
        data: Bytes::from(row.data),
      })
      .collect(),
  })
}
