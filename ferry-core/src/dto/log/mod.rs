//! Log DTOs pushed to live log subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::log::{BuildId, LogLine};

/// Name of the server-sent event carrying a [`LogEvent`]
pub const LOG_EVENT_NAME: &str = "message";

/// JSON body of one live log event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub log_id: u64,
    pub build_id: BuildId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<LogLine> for LogEvent {
    fn from(line: LogLine) -> Self {
        Self {
            log_id: line.log_id,
            build_id: line.build_id,
            message: line.message,
            timestamp: line.timestamp,
        }
    }
}

impl From<&LogLine> for LogEvent {
    fn from(line: &LogLine) -> Self {
        line.clone().into()
    }
}
