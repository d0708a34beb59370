//! Container encoding.

use std::path::PathBuf;

use bytes::Bytes;
use ptimer_asset::AssetResolver;
use ptimer_document::{Document, Metadata, Step};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tempfile::TempDir;
use tracing::{info, instrument, warn};

use crate::EncodeError;
use crate::schema::{CONTAINER_FILE, PAGE_SIZE, STATEMENTS};

/// A fresh, private container being written.
///
/// Everything written goes into one open transaction. [`finish`] commits it
/// and returns the file; dropping the writer (or calling [`abort`]) discards
/// the database and its scratch directory.
///
/// [`finish`]: ContainerWriter::finish
/// [`abort`]: ContainerWriter::abort
pub struct ContainerWriter {
  dir: TempDir,
  path: PathBuf,
  pool: SqlitePool,
  tx: Transaction<'static, Sqlite>,
}

impl ContainerWriter {
  /// Create an empty container with the fixed schema.
  pub async fn create() -> Result<Self, EncodeError> {
    let dir = tempfile::Builder::new()
      .prefix("ptimer-encode-")
      .tempdir()?;
    let path = dir.path().join(CONTAINER_FILE);

    let options = SqliteConnectOptions::new()
      .filename(&path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Delete)
      .page_size(PAGE_SIZE);

    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;

    let mut tx = pool.begin().await?;
    for statement in STATEMENTS {
      sqlx::query(statement).execute(&mut *tx).await?;
    }

    Ok(Self {
      dir,
      path,
      pool,
      tx,
    })
  }

  /// Insert the metadata row.
  pub async fn insert_metadata(&mut self, metadata: &Metadata) -> Result<(), EncodeError> {
    self
      .insert_metadata_row(
        Some(&metadata.version),
        &metadata.title,
        metadata.description.as_deref(),
        &metadata.language,
      )
      .await
  }

  /// Insert a metadata row field by field. `version` may be left unset.
  pub async fn insert_metadata_row(
    &mut self,
    version: Option<&str>,
    title: &str,
    description: Option<&str>,
    language: &str,
  ) -> Result<(), EncodeError> {
    sqlx::query(
      r#"
      INSERT OR ABORT INTO metadata (version, title, description, lang)
      VALUES (?, ?, ?, ?)
      "#,
    )
    .bind(version)
    .bind(title)
    .bind(description)
    .bind(language)
    .execute(&mut *self.tx)
    .await?;

    Ok(())
  }

  /// Insert one asset row.
  pub async fn insert_asset(
    &mut self,
    id: i64,
    name: &str,
    mime: &str,
    notice: Option<&str>,
    data: &[u8],
  ) -> Result<(), EncodeError> {
    sqlx::query(
      r#"
      INSERT OR ABORT INTO asset (id, name, mime, data, notice)
      VALUES (?, ?, ?, ?, ?)
      "#,
    )
    .bind(id)
    .bind(name)
    .bind(mime)
    .bind(data)
    .bind(notice)
    .execute(&mut *self.tx)
    .await?;

    Ok(())
  }

  /// Insert one step row at the given position.
  pub async fn insert_step(&mut self, step: &Step, index: i64) -> Result<(), EncodeError> {
    sqlx::query(
      r#"
      INSERT OR ABORT INTO step (id, title, description, sound, duration_seconds, "index")
      VALUES (?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(step.id)
    .bind(&step.title)
    .bind(&step.description)
    .bind(step.sound)
    .bind(step.duration_seconds)
    .bind(index)
    .execute(&mut *self.tx)
    .await?;

    Ok(())
  }

  /// Commit and return the serialized container.
  pub async fn finish(self) -> Result<Bytes, EncodeError> {
    let Self {
      dir,
      path,
      pool,
      tx,
    } = self;

    tx.commit().await?;
    pool.close().await;

    let bytes = tokio::fs::read(&path).await?;
    drop(dir);

    Ok(Bytes::from(bytes))
  }

  /// Roll back and discard the container.
  pub async fn abort(self) {
    if let Err(e) = self.tx.rollback().await {
      warn!(error = %e, "failed to roll back container");
    }
    self.pool.close().await;
  }
}

/// Encode a document into container bytes.
///
/// Asset payloads are dereferenced through `resolver`; a revoked or
/// unavailable reference fails the whole encode.
#[instrument(
  name = "container_encode",
  skip(document, resolver),
  fields(steps = document.steps.len(), assets = document.assets.len())
)]
pub async fn encode(document: &Document, resolver: &AssetResolver) -> Result<Bytes, EncodeError> {
  for step in &document.steps {
    if let Some(asset_id) = step.sound
      && document.asset(asset_id).is_none()
    {
      return Err(EncodeError::constraint(format!(
        "step {} plays asset {}, which is not part of the document",
        step.id, asset_id
      )));
    }
  }

  let mut writer = ContainerWriter::create().await?;

  match write_document(&mut writer, document, resolver).await {
    Ok(()) => {
      let bytes = writer.finish().await?;
      info!(size = bytes.len(), "container_encoded");
      Ok(bytes)
    }
    Err(e) => {
      writer.abort().await;
      Err(e)
    }
  }
}

async fn write_document(
  writer: &mut ContainerWriter,
  document: &Document,
  resolver: &AssetResolver,
) -> Result<(), EncodeError> {
  writer.insert_metadata(&document.metadata).await?;

  for asset in &document.assets {
    let data = resolver
      .dereference(&asset.data)
      .await
      .map_err(|source| EncodeError::AssetUnavailable {
        asset_id: asset.id,
        source,
      })?;

    writer
      .insert_asset(
        asset.id,
        &asset.name,
        &asset.mime,
        asset.notice.as_deref(),
        &data,
      )
      .await?;
  }

  for (index, step) in document.steps.iter().enumerate() {
    writer.insert_step(step, index as i64).await?;
  }

  Ok(())
}
