//! # ferry-proto
//!
//! RPC contract between build agents and the Ferry server.
//!
//! ```text
//! service Builds {
//!   rpc CreateLogStream(stream LogLineSubmission) returns (LogStreamSummary);
//! }
//! ```
//!
//! Build agents open one client-streaming call per connection, push any
//! number of [`v1::LogLineSubmission`]s and receive a single
//! [`v1::LogStreamSummary`] when they close their side of the stream.
//!
//! ## Wire Format Guarantees
//!
//! - Field numbers are never reused
//! - New fields are always optional or have defaults

/// Version 1 of the Ferry protocol.
pub mod v1 {
    use chrono::{DateTime, Utc};
    use ferry_core::domain::log::NewLogLine;

    pub use ::prost_types::Timestamp;

    /// One log line pushed by a build agent.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct LogLineSubmission {
        /// Build the line belongs to.
        #[prost(uint64, tag = "1")]
        pub build_id: u64,
        /// Raw log text.
        #[prost(string, tag = "2")]
        pub message: ::prost::alloc::string::String,
        /// When the line was produced.
        #[prost(message, optional, tag = "3")]
        pub timestamp: ::core::option::Option<Timestamp>,
    }

    /// Terminal response of a log stream.
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct LogStreamSummary {
        /// Number of lines durably persisted from the stream.
        #[prost(uint64, tag = "1")]
        pub lines_inserted: u64,
    }

    impl LogLineSubmission {
        /// Timestamp as a UTC instant, or `None` when missing or out of range.
        pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
            let ts = self.timestamp.as_ref()?;
            let nanos = u32::try_from(ts.nanos).ok().filter(|n| *n < 1_000_000_000)?;
            DateTime::from_timestamp(ts.seconds, nanos)
        }
    }

    impl From<&NewLogLine> for LogLineSubmission {
        fn from(line: &NewLogLine) -> Self {
            Self {
                build_id: line.build_id,
                message: line.message.clone(),
                timestamp: Some(timestamp_from(line.timestamp)),
            }
        }
    }

    /// Convert a UTC instant into a protobuf timestamp.
    pub fn timestamp_from(instant: DateTime<Utc>) -> Timestamp {
        Timestamp {
            seconds: instant.timestamp(),
            nanos: instant.timestamp_subsec_nanos() as i32,
        }
    }

    include!(concat!(env!("OUT_DIR"), "/ferry.v1.Builds.rs"));
}

#[cfg(test)]
mod tests {
    use super::v1::*;
    use chrono::{TimeZone, Utc};
    use ferry_core::domain::log::NewLogLine;
    use prost::Message;

    #[test]
    fn test_timestamp_utc_valid() {
        let instant = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let submission = LogLineSubmission::from(&NewLogLine::new(1, "a", instant));

        assert_eq!(submission.timestamp_utc(), Some(instant));
    }

    #[test]
    fn test_timestamp_utc_missing() {
        let submission = LogLineSubmission {
            build_id: 1,
            message: "a".to_string(),
            timestamp: None,
        };

        assert_eq!(submission.timestamp_utc(), None);
    }

    #[test]
    fn test_timestamp_utc_rejects_bad_nanos() {
        for nanos in [-1, 1_000_000_000] {
            let submission = LogLineSubmission {
                build_id: 1,
                message: "a".to_string(),
                timestamp: Some(prost_types::Timestamp { seconds: 0, nanos }),
            };
            assert_eq!(submission.timestamp_utc(), None, "nanos = {nanos}");
        }
    }

    #[test]
    fn test_timestamp_utc_rejects_out_of_range_seconds() {
        let submission = LogLineSubmission {
            build_id: 1,
            message: "a".to_string(),
            timestamp: Some(prost_types::Timestamp {
                seconds: i64::MAX,
                nanos: 0,
            }),
        };

        assert_eq!(submission.timestamp_utc(), None);
    }

    #[test]
    fn test_submission_wire_encoding() {
        let submission = LogLineSubmission {
            build_id: 1,
            message: "a".to_string(),
            timestamp: None,
        };

        // field 1 varint 1, field 2 length-delimited "a"
        assert_eq!(submission.encode_to_vec(), vec![0x08, 0x01, 0x12, 0x01, b'a']);
    }
}
