//! Reference table mapping asset ids to ephemeral references.
//!
//! Every mutation (materialize, revoke) happens under a single write lock, so
//! concurrent calls for the same asset id are serialized: the last writer
//! wins, and the reference it supersedes is removed in the same critical
//! section. A superseded reference is never left dangling.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tracing::debug;

use crate::ResolverError;
use crate::reference::AssetRef;
use crate::source::{BlobSource, FileSource};

enum Payload {
  Loaded(Bytes),
  Lazy(Arc<dyn BlobSource>),
}

struct Entry {
  payload: Payload,
  mime: String,
  /// Asset id owning this reference. `None` for compiled outputs, which are
  /// not tied to any asset.
  owner: Option<i64>,
}

#[derive(Default)]
struct Table {
  entries: HashMap<AssetRef, Entry>,
  by_asset: HashMap<i64, AssetRef>,
}

impl Table {
  fn remove(&mut self, reference: &AssetRef) -> bool {
    let Some(entry) = self.entries.remove(reference) else {
      return false;
    };

    if let Some(owner) = entry.owner
      && self.by_asset.get(&owner) == Some(reference)
    {
      self.by_asset.remove(&owner);
    }

    true
  }

  fn insert(&mut self, entry: Entry) -> AssetRef {
    let reference = AssetRef::generate();

    if let Some(owner) = entry.owner
      && let Some(previous) = self.by_asset.insert(owner, reference.clone())
    {
      self.entries.remove(&previous);
      debug!(asset_id = owner, reference = %previous, "revoked superseded asset reference");
    }

    self.entries.insert(reference.clone(), entry);
    reference
  }
}

/// Issues, revokes and dereferences [`AssetRef`]s.
///
/// Cloning is cheap; clones share the same table.
#[derive(Clone, Default)]
pub struct AssetResolver {
  table: Arc<RwLock<Table>>,
}

impl AssetResolver {
  pub fn new() -> Self {
    Self::default()
  }

  fn read(&self) -> RwLockReadGuard<'_, Table> {
    self.table.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, Table> {
    self.table.write().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register in-memory bytes for asset `id`.
  ///
  /// If `id` already has a live reference, it is revoked before the new one
  /// is issued.
  pub fn materialize(&self, id: i64, data: impl Into<Bytes>, mime: impl Into<String>) -> AssetRef {
    let data = data.into();
    let size = data.len();
    let reference = self.write().insert(Entry {
      payload: Payload::Loaded(data),
      mime: mime.into(),
      owner: Some(id),
    });

    debug!(asset_id = id, reference = %reference, size, "materialized asset");
    reference
  }

  /// Register a lazily fetched payload for asset `id`.
  pub fn materialize_source(
    &self,
    id: i64,
    source: Arc<dyn BlobSource>,
    mime: impl Into<String>,
  ) -> AssetRef {
    let reference = self.write().insert(Entry {
      payload: Payload::Lazy(source),
      mime: mime.into(),
      owner: Some(id),
    });

    debug!(asset_id = id, reference = %reference, "materialized lazy asset");
    reference
  }

  /// Register a file on disk for asset `id`. The file is read when the
  /// reference is dereferenced, not now.
  pub fn materialize_file(
    &self,
    id: i64,
    path: impl Into<PathBuf>,
    mime: impl Into<String>,
  ) -> AssetRef {
    self.materialize_source(id, Arc::new(FileSource::new(path)), mime)
  }

  /// Register a compiled output. Outputs are not tied to an asset id; their
  /// owner is responsible for revoking them once superseded.
  pub fn materialize_output(&self, data: impl Into<Bytes>, mime: impl Into<String>) -> AssetRef {
    let reference = self.write().insert(Entry {
      payload: Payload::Loaded(data.into()),
      mime: mime.into(),
      owner: None,
    });

    debug!(reference = %reference, "materialized compiled output");
    reference
  }

  /// Release a reference. Revoking an already revoked reference is a no-op.
  pub fn revoke(&self, reference: &AssetRef) {
    if self.write().remove(reference) {
      debug!(reference = %reference, "revoked asset reference");
    }
  }

  /// Release every reference issued by this resolver.
  pub fn revoke_all(&self) {
    let mut table = self.write();
    let count = table.entries.len();
    table.entries.clear();
    table.by_asset.clear();
    debug!(count, "revoked all asset references");
  }

  /// Obtain the bytes behind a reference.
  ///
  /// Lazy sources are fetched outside the lock, so a slow fetch never blocks
  /// other materialize/revoke calls.
  pub async fn dereference(&self, reference: &AssetRef) -> Result<Bytes, ResolverError> {
    let source = {
      let table = self.read();
      match table.entries.get(reference).map(|entry| &entry.payload) {
        None => {
          return Err(ResolverError::Revoked {
            reference: reference.clone(),
          });
        }
        Some(Payload::Loaded(data)) => return Ok(data.clone()),
        Some(Payload::Lazy(source)) => source.clone(),
      }
    };

    source
      .fetch()
      .await
      .map_err(|source| ResolverError::Unavailable {
        reference: reference.clone(),
        source,
      })
  }

  /// MIME type recorded for a live reference.
  pub fn mime(&self, reference: &AssetRef) -> Option<String> {
    self
      .read()
      .entries
      .get(reference)
      .map(|entry| entry.mime.clone())
  }

  /// Whether the reference can still be dereferenced.
  pub fn is_live(&self, reference: &AssetRef) -> bool {
    self.read().entries.contains_key(reference)
  }

  /// The live reference currently bound to asset `id`, if any.
  pub fn reference_for(&self, id: i64) -> Option<AssetRef> {
    self.read().by_asset.get(&id).cloned()
  }

  /// Number of live references.
  pub fn len(&self) -> usize {
    self.read().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl std::fmt::Debug for AssetResolver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AssetResolver")
      .field("live_references", &self.len())
      .finish()
  }
}
