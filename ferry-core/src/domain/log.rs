//! Log domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a build, owned by the surrounding CRUD system
pub type BuildId = u64;

/// Largest build id the persistence layer can represent.
///
/// Stores keep build ids in a signed 64-bit column.
pub const MAX_STORED_BUILD_ID: BuildId = i64::MAX as BuildId;

/// A validated log line that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogLine {
    pub build_id: BuildId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NewLogLine {
    pub fn new(build_id: BuildId, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            build_id,
            message: message.into(),
            timestamp,
        }
    }

    /// Attach the identifier assigned by the store
    pub fn into_persisted(self, log_id: u64) -> LogLine {
        LogLine {
            log_id,
            build_id: self.build_id,
            message: self.message,
            timestamp: self.timestamp,
        }
    }
}

/// A durably persisted log line
///
/// `log_id` is unique and increases monotonically in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub log_id: u64,
    pub build_id: BuildId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
