//! Editing sessions.
//!
//! A [`Session`] holds the document being edited and the latest compiled
//! output, and owns the lifetime of every asset reference they carry:
//!
//! - replacing an asset's payload revokes the reference it had before;
//! - opening another document or discarding the session revokes all of the
//!   current document's references;
//! - a new export revokes the previous output.
//!
//! Each session owns its own [`AssetResolver`], so sessions sharing one
//! engine never revoke each other's references.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use ptimer_asset::{AssetRef, AssetResolver, ByteStream};
use ptimer_document::{Asset, Document, Step};
use tracing::{debug, info};

use crate::engine::{Compiled, Engine};
use crate::error::EngineError;

pub struct Session {
  engine: Arc<Engine>,
  resolver: AssetResolver,
  document: Option<Document>,
  output: Option<AssetRef>,
}

impl Session {
  pub fn new(engine: Arc<Engine>) -> Self {
    Self {
      engine,
      resolver: AssetResolver::new(),
      document: None,
      output: None,
    }
  }

  /// The resolver every reference in this session belongs to.
  pub fn resolver(&self) -> &AssetResolver {
    &self.resolver
  }

  pub fn document(&self) -> Option<&Document> {
    self.document.as_ref()
  }

  pub fn document_mut(&mut self) -> Option<&mut Document> {
    self.document.as_mut()
  }

  /// Reference to the most recent export, if any.
  pub fn output(&self) -> Option<&AssetRef> {
    self.output.as_ref()
  }

  /// Start editing a new, empty document.
  pub fn create(&mut self, title: impl Into<String>, language: impl Into<String>) -> &mut Document {
    self.release_document();
    self.document.insert(Document::new(title, language))
  }

  /// Parse a container and make it the current document.
  ///
  /// On failure the current document is left untouched.
  pub async fn open(&mut self, source: ByteStream) -> Result<&Document, EngineError> {
    let document = self.engine.parse(source, &self.resolver).await?;
    self.release_document();
    Ok(self.document.insert(document))
  }

  /// Set the payload of asset `id`, adding the asset if it does not exist.
  /// Replacing an existing asset clears its notice.
  pub fn upload_asset(
    &mut self,
    id: i64,
    name: impl Into<String>,
    mime: impl Into<String>,
    data: impl Into<Bytes>,
  ) -> Result<AssetRef, EngineError> {
    if self.document.is_none() {
      return Err(EngineError::NoDocument);
    }

    let mime = mime.into();
    let reference = self.resolver().materialize(id, data, mime.clone());
    self.bind_asset(id, name.into(), mime, reference)
  }

  /// Like [`upload_asset`](Session::upload_asset), but the payload is read
  /// from `path` only when the document is exported.
  pub fn attach_file(
    &mut self,
    id: i64,
    name: impl Into<String>,
    mime: impl Into<String>,
    path: impl Into<PathBuf>,
  ) -> Result<AssetRef, EngineError> {
    if self.document.is_none() {
      return Err(EngineError::NoDocument);
    }

    let mime = mime.into();
    let reference = self.resolver().materialize_file(id, path, mime.clone());
    self.bind_asset(id, name.into(), mime, reference)
  }

  fn bind_asset(
    &mut self,
    id: i64,
    name: String,
    mime: String,
    reference: AssetRef,
  ) -> Result<AssetRef, EngineError> {
    let resolver = &self.resolver;
    let Some(document) = self.document.as_mut() else {
      resolver.revoke(&reference);
      return Err(EngineError::NoDocument);
    };

    match document.assets.iter_mut().find(|asset| asset.id == id) {
      Some(asset) => {
        let previous = std::mem::replace(&mut asset.data, reference.clone());
        resolver.revoke(&previous);
        asset.name = name;
        asset.mime = mime;
        // Attribution belonged to the previous payload
        asset.notice = None;
        debug!(asset_id = id, previous = %previous, reference = %reference, "replaced asset");
      }
      None => {
        document.assets.push(Asset {
          id,
          name,
          mime,
          notice: None,
          data: reference.clone(),
        });
        debug!(asset_id = id, reference = %reference, "added asset");
      }
    }

    Ok(reference)
  }

  /// Remove asset `id` and revoke its reference. Steps that still point at
  /// it will make the document unencodable.
  pub fn remove_asset(&mut self, id: i64) -> Option<Asset> {
    let document = self.document.as_mut()?;
    let position = document.assets.iter().position(|asset| asset.id == id)?;
    let asset = document.assets.remove(position);
    self.resolver.revoke(&asset.data);
    Some(asset)
  }

  pub fn remove_step(&mut self, id: i64) -> Option<Step> {
    let document = self.document.as_mut()?;
    let position = document.steps.iter().position(|step| step.id == id)?;
    Some(document.steps.remove(position))
  }

  /// Compile the current document and keep the result as the session's
  /// output, revoking the previous one. A failed export leaves the previous
  /// output in place.
  pub async fn export(&mut self) -> Result<Compiled, EngineError> {
    let document = self.document.as_ref().ok_or(EngineError::NoDocument)?;
    let compiled = self.engine.compile(document, &self.resolver).await?;

    let reference = self
      .resolver()
      .materialize_output(compiled.data.clone(), compiled.mime);
    if let Some(previous) = self.output.replace(reference) {
      self.resolver().revoke(&previous);
    }

    info!(file_name = %compiled.file_name, size = compiled.data.len(), "exported");
    Ok(compiled)
  }

  /// Drop the document and output, revoking every reference they held.
  pub fn discard(&mut self) {
    self.release_document();
    if let Some(output) = self.output.take() {
      self.resolver().revoke(&output);
    }
  }

  fn release_document(&mut self) {
    if let Some(document) = self.document.take() {
      for reference in document.asset_refs() {
        self.resolver().revoke(reference);
      }
    }
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    self.discard();
  }
}
