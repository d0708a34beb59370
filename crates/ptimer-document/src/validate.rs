//! Advisory encodability check.
//!
//! Editors use this to gate a compile action before paying for a full
//! encode. The codec enforces its own invariants independently.

use thiserror::Error;

use crate::document::Document;

/// Reason a document cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotEncodable {
  #[error("metadata version is not set")]
  MissingVersion,

  #[error("title is empty")]
  EmptyTitle,

  #[error("timer has no steps")]
  NoSteps,

  #[error("step {step_id} plays asset {asset_id}, which does not exist")]
  DanglingSound { step_id: i64, asset_id: i64 },

  #[error("step {step_id} has a negative duration ({duration_seconds}s)")]
  NegativeDuration { step_id: i64, duration_seconds: i64 },
}

impl Document {
  /// Check whether this document can be encoded.
  pub fn is_encodable(&self) -> Result<(), NotEncodable> {
    if self.metadata.version.trim().is_empty() {
      return Err(NotEncodable::MissingVersion);
    }

    if self.metadata.title.is_empty() {
      return Err(NotEncodable::EmptyTitle);
    }

    if self.steps.is_empty() {
      return Err(NotEncodable::NoSteps);
    }

    for step in &self.steps {
      if let Some(duration_seconds) = step.duration_seconds
        && duration_seconds < 0
      {
        return Err(NotEncodable::NegativeDuration {
          step_id: step.id,
          duration_seconds,
        });
      }

      if let Some(asset_id) = step.sound
        && self.asset(asset_id).is_none()
      {
        return Err(NotEncodable::DanglingSound {
          step_id: step.id,
          asset_id,
        });
      }
    }

    Ok(())
  }
}
