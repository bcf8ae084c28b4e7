//! Polymorphic reference to the domain object a job operates on.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::TrackerError;

/// Entity type + id of the object being processed (an upload, an import, ...).
///
/// The store allows at most one tracker per trackable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackableRef {
    pub kind: String,
    pub id: String,
}

impl TrackableRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Fails with `Configuration` when either part is blank.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.kind.trim().is_empty() {
            return Err(TrackerError::Configuration(
                "trackable kind must not be blank".to_string(),
            ));
        }
        if self.id.trim().is_empty() {
            return Err(TrackerError::Configuration(format!(
                "trackable id must not be blank (kind={})",
                self.kind
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TrackableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}
