use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle standing in for an asset's binary payload.
///
/// References are cheap to clone and carry no bytes themselves. They are only
/// meaningful to the [`AssetResolver`](crate::AssetResolver) that issued them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
  pub(crate) fn generate() -> Self {
    Self(format!("asset:{}", uuid::Uuid::new_v4()))
  }

  /// The string form of the reference.
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for AssetRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
