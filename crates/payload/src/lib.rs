//! # Payload
//!
//! The logical data model of the backup disk format, and the pluggable
//! structured encoding that turns it into the opaque byte strings the
//! framing layer carries.
//!
//! A backup file holds exactly one [`Metadata`] followed by any number of
//! [`Record`]s, each wrapped in a checksummed [`Envelope`]. How those values
//! become bytes is an injected capability ([`PayloadFormat`]) so the framing
//! and checksum core can be exercised with a trivial stub; the production
//! implementation is Avro ([`avro::AvroFormat`]).

pub mod avro;

pub use avro::AvroFormat;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Descriptive header written once at the start of every backup file, never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Disk format version. Current writers stamp 3.
    pub version: i32,
    pub tool_name: String,
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    /// Advisory record count known at backup time. Never authoritative:
    /// readers terminate on end-of-stream only.
    pub estimated_record_count: i64,
    pub topic_name: String,
    pub topic_id: Option<Uuid>,
    /// Must be 1. Multi-partition backups are not supported by this format.
    pub partition_count: i32,
}

/// One key/value header attached to a record. Order among a record's headers
/// is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// One backed-up message, corresponding to exactly one source message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<Header>,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: i64,
}

/// Checksummed wrapper around one structured-encoded record.
///
/// Transient: an envelope exists only to frame one record for one write or
/// read, it is never persisted as a standalone entity. The checksum covers
/// `record` (the encoded record bytes), not the envelope frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub record: Vec<u8>,
    pub checksum: Vec<u8>,
}

/// Structured payload encoder: typed values to opaque bytes and back.
///
/// The framing layer treats implementations as a black box. All methods are
/// fallible; decoding malformed bytes must fail rather than produce a
/// partial value.
pub trait PayloadFormat {
    fn encode_metadata(&self, metadata: &Metadata) -> Result<Vec<u8>, FormatError>;
    fn decode_metadata(&self, bytes: &[u8]) -> Result<Metadata, FormatError>;
    fn encode_record(&self, record: &Record) -> Result<Vec<u8>, FormatError>;
    fn decode_record(&self, bytes: &[u8]) -> Result<Record, FormatError>;
    fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, FormatError>;
    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope, FormatError>;
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("avro: {0}")]
    Avro(#[from] apache_avro::Error),
    /// Schema-valid bytes decoded to a value shape this model cannot hold.
    #[error("malformed {payload} payload: unexpected value for {field}")]
    Malformed {
        payload: &'static str,
        field: &'static str,
    },
    #[error("timestamp {0}ms is outside the representable range")]
    TimestampOutOfRange(i64),
}
