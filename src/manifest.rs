//! JSON description of a timer whose assets live next to it on disk.

use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};
use ptimer_document::{Metadata, Step};
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "ptimer.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
  pub metadata: Metadata,
  pub steps: Vec<Step>,
  #[serde(default)]
  pub assets: Vec<ManifestAsset>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestAsset {
  pub id: i64,
  pub name: String,
  pub mime: String,
  /// Location of the payload, relative to the manifest's directory.
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notice: Option<String>,
}

/// Join `relative` onto `base`, refusing anything that could land outside
/// `base`.
pub fn contained_path(base: &Path, relative: &str) -> Result<PathBuf> {
  let relative_path = Path::new(relative);
  let mut has_name = false;

  for component in relative_path.components() {
    match component {
      Component::Normal(_) => has_name = true,
      Component::CurDir => {}
      Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
        bail!("path escapes {}: {}", base.display(), relative);
      }
    }
  }

  if !has_name {
    bail!("path does not name a file: {:?}", relative);
  }

  Ok(base.join(relative_path))
}
