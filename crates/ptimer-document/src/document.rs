use ptimer_asset::AssetRef;
use serde::{Deserialize, Serialize};

/// The only container format version this crate reads and writes.
pub const SUPPORTED_VERSION: &str = "1.0";

/// MIME type of an encoded container.
pub const CONTAINER_MIME: &str = "application/x-ptimer";

/// Timer-level information. Exactly one per document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
  pub version: String,
  pub title: String,
  pub description: Option<String>,
  /// BCP 47 language tag, e.g. `en-GB`.
  #[serde(rename = "lang")]
  pub language: String,
}

/// A single step of the timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
  pub id: i64,
  pub title: String,
  pub description: Option<String>,
  /// Id of the asset played when the step starts.
  pub sound: Option<i64>,
  /// `None` means the step waits for the user; `Some(0)` is a zero-length
  /// timer.
  pub duration_seconds: Option<i64>,
}

/// A binary asset referenced by steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
  pub id: i64,
  pub name: String,
  pub mime: String,
  /// Attribution or license text.
  pub notice: Option<String>,
  pub data: AssetRef,
}

/// An editable timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
  pub metadata: Metadata,
  pub steps: Vec<Step>,
  pub assets: Vec<Asset>,
}

impl Document {
  /// Create an empty document at the supported version.
  pub fn new(title: impl Into<String>, language: impl Into<String>) -> Self {
    Self {
      metadata: Metadata {
        version: SUPPORTED_VERSION.to_string(),
        title: title.into(),
        description: None,
        language: language.into(),
      },
      steps: Vec::new(),
      assets: Vec::new(),
    }
  }

  /// Get an asset by id.
  pub fn asset(&self, id: i64) -> Option<&Asset> {
    self.assets.iter().find(|asset| asset.id == id)
  }

  /// Get a step by id.
  pub fn step(&self, id: i64) -> Option<&Step> {
    self.steps.iter().find(|step| step.id == id)
  }

  /// Whether any step plays the asset with the given id.
  pub fn is_referenced(&self, asset_id: i64) -> bool {
    self.steps.iter().any(|step| step.sound == Some(asset_id))
  }

  /// Assets that at least one step points at, in document order.
  ///
  /// This is the subset that survives an encode/decode round trip.
  pub fn referenced_assets(&self) -> impl Iterator<Item = &Asset> {
    self
      .assets
      .iter()
      .filter(|asset| self.is_referenced(asset.id))
  }

  /// Every asset reference held by this document.
  pub fn asset_refs(&self) -> impl Iterator<Item = &AssetRef> {
    self.assets.iter().map(|asset| &asset.data)
  }

  /// Suggested file name for the encoded container, derived from the title.
  pub fn file_name(&self) -> String {
    let title: String = self
      .metadata
      .title
      .trim()
      .chars()
      .map(|c| match c {
        '/' | '\\' | ':' | '\0' => '_',
        c => c,
      })
      .collect();

    if title.is_empty() {
      "untitled.ptimer".to_string()
    } else {
      format!("{}.ptimer", title)
    }
  }
}
