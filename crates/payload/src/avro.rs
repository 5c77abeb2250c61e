//! Avro implementation of [`PayloadFormat`].
//!
//! Schemas are fixed per payload type and compiled into the binary. Values
//! are encoded as single Avro datums (no object-container framing) since the
//! disk format supplies its own length prefix per frame.

use apache_avro::types::Value;
use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use chrono::TimeZone;
use chrono::Utc;
use uuid::Uuid;

use crate::{Envelope, FormatError, Header, Metadata, PayloadFormat, Record};

const METADATA_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "Metadata",
    "fields": [
        {"name": "version", "type": "int"},
        {"name": "tool_name", "type": "string"},
        {"name": "tool_version", "type": "string"},
        {"name": "created_at", "type": {"type": "long", "logicalType": "timestamp-millis"}},
        {"name": "estimated_record_count", "type": "long"},
        {"name": "topic_name", "type": "string"},
        {"name": "topic_id", "type": ["null", {"type": "string", "logicalType": "uuid"}]},
        {"name": "partition_count", "type": "int"}
    ]
}
"#;

const RECORD_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "Record",
    "fields": [
        {"name": "key", "type": ["null", "bytes"]},
        {"name": "value", "type": ["null", "bytes"]},
        {"name": "headers", "type": {"type": "array", "items": {
            "type": "record",
            "name": "Header",
            "fields": [
                {"name": "key", "type": "bytes"},
                {"name": "value", "type": "bytes"}
            ]
        }}},
        {"name": "partition", "type": "int"},
        {"name": "offset", "type": "long"},
        {"name": "timestamp_ms", "type": "long"}
    ]
}
"#;

const ENVELOPE_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "Envelope",
    "fields": [
        {"name": "record", "type": "bytes"},
        {"name": "checksum", "type": "bytes"}
    ]
}
"#;

/// The production payload encoding.
pub struct AvroFormat {
    metadata_schema: Schema,
    record_schema: Schema,
    envelope_schema: Schema,
}

impl AvroFormat {
    pub fn new() -> Result<Self, FormatError> {
        Ok(Self {
            metadata_schema: Schema::parse_str(METADATA_SCHEMA)?,
            record_schema: Schema::parse_str(RECORD_SCHEMA)?,
            envelope_schema: Schema::parse_str(ENVELOPE_SCHEMA)?,
        })
    }
}

impl PayloadFormat for AvroFormat {
    fn encode_metadata(&self, metadata: &Metadata) -> Result<Vec<u8>, FormatError> {
        let topic_id = match metadata.topic_id {
            Some(id) => Value::Union(1, Box::new(Value::Uuid(id))),
            None => Value::Union(0, Box::new(Value::Null)),
        };
        let value = Value::Record(vec![
            ("version".into(), Value::Int(metadata.version)),
            ("tool_name".into(), Value::String(metadata.tool_name.clone())),
            (
                "tool_version".into(),
                Value::String(metadata.tool_version.clone()),
            ),
            (
                "created_at".into(),
                Value::TimestampMillis(metadata.created_at.timestamp_millis()),
            ),
            (
                "estimated_record_count".into(),
                Value::Long(metadata.estimated_record_count),
            ),
            (
                "topic_name".into(),
                Value::String(metadata.topic_name.clone()),
            ),
            ("topic_id".into(), topic_id),
            ("partition_count".into(), Value::Int(metadata.partition_count)),
        ]);
        Ok(to_avro_datum(&self.metadata_schema, value)?)
    }

    fn decode_metadata(&self, bytes: &[u8]) -> Result<Metadata, FormatError> {
        let mut reader = bytes;
        let value = from_avro_datum(&self.metadata_schema, &mut reader, None)?;
        let mut fields = record_fields(value, "Metadata")?;

        let version = as_int(next_field(&mut fields, "Metadata", "version")?, "Metadata", "version")?;
        let tool_name = as_string(
            next_field(&mut fields, "Metadata", "tool_name")?,
            "Metadata",
            "tool_name",
        )?;
        let tool_version = as_string(
            next_field(&mut fields, "Metadata", "tool_version")?,
            "Metadata",
            "tool_version",
        )?;
        let created_at_ms = as_long(
            next_field(&mut fields, "Metadata", "created_at")?,
            "Metadata",
            "created_at",
        )?;
        let estimated_record_count = as_long(
            next_field(&mut fields, "Metadata", "estimated_record_count")?,
            "Metadata",
            "estimated_record_count",
        )?;
        let topic_name = as_string(
            next_field(&mut fields, "Metadata", "topic_name")?,
            "Metadata",
            "topic_name",
        )?;
        let topic_id = as_optional_uuid(next_field(&mut fields, "Metadata", "topic_id")?)?;
        let partition_count = as_int(
            next_field(&mut fields, "Metadata", "partition_count")?,
            "Metadata",
            "partition_count",
        )?;

        let created_at = Utc
            .timestamp_millis_opt(created_at_ms)
            .single()
            .ok_or(FormatError::TimestampOutOfRange(created_at_ms))?;

        Ok(Metadata {
            version,
            tool_name,
            tool_version,
            created_at,
            estimated_record_count,
            topic_name,
            topic_id,
            partition_count,
        })
    }

    fn encode_record(&self, record: &Record) -> Result<Vec<u8>, FormatError> {
        let headers = record
            .headers
            .iter()
            .map(|h| {
                Value::Record(vec![
                    ("key".into(), Value::Bytes(h.key.clone())),
                    ("value".into(), Value::Bytes(h.value.clone())),
                ])
            })
            .collect();
        let value = Value::Record(vec![
            ("key".into(), optional_bytes(&record.key)),
            ("value".into(), optional_bytes(&record.value)),
            ("headers".into(), Value::Array(headers)),
            ("partition".into(), Value::Int(record.partition)),
            ("offset".into(), Value::Long(record.offset)),
            ("timestamp_ms".into(), Value::Long(record.timestamp_ms)),
        ]);
        Ok(to_avro_datum(&self.record_schema, value)?)
    }

    fn decode_record(&self, bytes: &[u8]) -> Result<Record, FormatError> {
        let mut reader = bytes;
        let value = from_avro_datum(&self.record_schema, &mut reader, None)?;
        let mut fields = record_fields(value, "Record")?;

        let key = as_optional_bytes(next_field(&mut fields, "Record", "key")?, "Record", "key")?;
        let value_field =
            as_optional_bytes(next_field(&mut fields, "Record", "value")?, "Record", "value")?;
        let headers = as_headers(next_field(&mut fields, "Record", "headers")?)?;
        let partition = as_int(
            next_field(&mut fields, "Record", "partition")?,
            "Record",
            "partition",
        )?;
        let offset = as_long(next_field(&mut fields, "Record", "offset")?, "Record", "offset")?;
        let timestamp_ms = as_long(
            next_field(&mut fields, "Record", "timestamp_ms")?,
            "Record",
            "timestamp_ms",
        )?;

        Ok(Record {
            key,
            value: value_field,
            headers,
            partition,
            offset,
            timestamp_ms,
        })
    }

    fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, FormatError> {
        let value = Value::Record(vec![
            ("record".into(), Value::Bytes(envelope.record.clone())),
            ("checksum".into(), Value::Bytes(envelope.checksum.clone())),
        ]);
        Ok(to_avro_datum(&self.envelope_schema, value)?)
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope, FormatError> {
        let mut reader = bytes;
        let value = from_avro_datum(&self.envelope_schema, &mut reader, None)?;
        let mut fields = record_fields(value, "Envelope")?;

        let record = as_bytes(
            next_field(&mut fields, "Envelope", "record")?,
            "Envelope",
            "record",
        )?;
        let checksum = as_bytes(
            next_field(&mut fields, "Envelope", "checksum")?,
            "Envelope",
            "checksum",
        )?;

        Ok(Envelope { record, checksum })
    }
}

// ---- Value conversion helpers ----
//
// Decoded datums arrive with fields in schema order. Logical types may
// surface either as their logical variant or the underlying primitive
// depending on the decoder path, so extractors accept both.

fn record_fields(
    value: Value,
    payload: &'static str,
) -> Result<std::vec::IntoIter<(String, Value)>, FormatError> {
    match value {
        Value::Record(fields) => Ok(fields.into_iter()),
        _ => Err(FormatError::Malformed {
            payload,
            field: "(record root)",
        }),
    }
}

fn next_field(
    fields: &mut std::vec::IntoIter<(String, Value)>,
    payload: &'static str,
    name: &'static str,
) -> Result<Value, FormatError> {
    match fields.next() {
        Some((field_name, value)) if field_name == name => Ok(value),
        _ => Err(FormatError::Malformed {
            payload,
            field: name,
        }),
    }
}

fn unwrap_union(value: Value) -> Value {
    match value {
        Value::Union(_, inner) => *inner,
        other => other,
    }
}

fn as_int(value: Value, payload: &'static str, field: &'static str) -> Result<i32, FormatError> {
    match value {
        Value::Int(v) => Ok(v),
        _ => Err(FormatError::Malformed { payload, field }),
    }
}

fn as_long(value: Value, payload: &'static str, field: &'static str) -> Result<i64, FormatError> {
    match value {
        Value::Long(v) | Value::TimestampMillis(v) => Ok(v),
        _ => Err(FormatError::Malformed { payload, field }),
    }
}

fn as_string(
    value: Value,
    payload: &'static str,
    field: &'static str,
) -> Result<String, FormatError> {
    match value {
        Value::String(v) => Ok(v),
        _ => Err(FormatError::Malformed { payload, field }),
    }
}

fn as_bytes(value: Value, payload: &'static str, field: &'static str) -> Result<Vec<u8>, FormatError> {
    match value {
        Value::Bytes(v) => Ok(v),
        _ => Err(FormatError::Malformed { payload, field }),
    }
}

fn as_optional_bytes(
    value: Value,
    payload: &'static str,
    field: &'static str,
) -> Result<Option<Vec<u8>>, FormatError> {
    match unwrap_union(value) {
        Value::Null => Ok(None),
        Value::Bytes(v) => Ok(Some(v)),
        _ => Err(FormatError::Malformed { payload, field }),
    }
}

fn as_optional_uuid(value: Value) -> Result<Option<Uuid>, FormatError> {
    match unwrap_union(value) {
        Value::Null => Ok(None),
        Value::Uuid(id) => Ok(Some(id)),
        Value::String(s) => Uuid::parse_str(&s).map(Some).map_err(|_| FormatError::Malformed {
            payload: "Metadata",
            field: "topic_id",
        }),
        _ => Err(FormatError::Malformed {
            payload: "Metadata",
            field: "topic_id",
        }),
    }
}

fn optional_bytes(bytes: &Option<Vec<u8>>) -> Value {
    match bytes {
        Some(b) => Value::Union(1, Box::new(Value::Bytes(b.clone()))),
        None => Value::Union(0, Box::new(Value::Null)),
    }
}

fn as_headers(value: Value) -> Result<Vec<Header>, FormatError> {
    let items = match value {
        Value::Array(items) => items,
        _ => {
            return Err(FormatError::Malformed {
                payload: "Record",
                field: "headers",
            })
        }
    };
    items
        .into_iter()
        .map(|item| {
            let mut fields = record_fields(item, "Header")?;
            let key = as_bytes(next_field(&mut fields, "Header", "key")?, "Header", "key")?;
            let value = as_bytes(next_field(&mut fields, "Header", "value")?, "Header", "value")?;
            Ok(Header { key, value })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata(topic_id: Option<Uuid>) -> Metadata {
        Metadata {
            version: 3,
            tool_name: "topicvault".into(),
            tool_version: "0.3.0".into(),
            created_at: Utc.timestamp_millis_opt(1_690_000_000_123).unwrap(),
            estimated_record_count: 42,
            topic_name: "a-topic".into(),
            topic_id,
            partition_count: 1,
        }
    }

    // -------------------- Metadata --------------------

    #[test]
    fn metadata_roundtrip_without_topic_id() {
        let format = AvroFormat::new().unwrap();
        let metadata = sample_metadata(None);

        let bytes = format.encode_metadata(&metadata).unwrap();
        assert_eq!(format.decode_metadata(&bytes).unwrap(), metadata);
    }

    #[test]
    fn metadata_roundtrip_with_topic_id() {
        let format = AvroFormat::new().unwrap();
        let id = Uuid::parse_str("3b4b6d2a-4f2e-4b58-a0d4-24953acc21ea").unwrap();
        let metadata = sample_metadata(Some(id));

        let bytes = format.encode_metadata(&metadata).unwrap();
        assert_eq!(format.decode_metadata(&bytes).unwrap(), metadata);
    }

    #[test]
    fn metadata_created_at_keeps_millisecond_precision() {
        let format = AvroFormat::new().unwrap();
        let metadata = sample_metadata(None);

        let decoded = format
            .decode_metadata(&format.encode_metadata(&metadata).unwrap())
            .unwrap();
        assert_eq!(decoded.created_at.timestamp_millis(), 1_690_000_000_123);
    }

    // -------------------- Record --------------------

    #[test]
    fn record_roundtrip_minimal() {
        let format = AvroFormat::new().unwrap();
        let record = Record {
            key: None,
            value: Some(b"123".to_vec()),
            headers: vec![],
            partition: 0,
            offset: 0,
            timestamp_ms: 1_690_000_000_000,
        };

        let bytes = format.encode_record(&record).unwrap();
        assert_eq!(format.decode_record(&bytes).unwrap(), record);
    }

    #[test]
    fn record_roundtrip_with_headers() {
        let format = AvroFormat::new().unwrap();
        let record = Record {
            key: Some(b"a key".to_vec()),
            value: Some(b"a value".to_vec()),
            headers: vec![
                Header {
                    key: b"header1".to_vec(),
                    value: b"some value".to_vec(),
                },
                Header {
                    key: b"header2".to_vec(),
                    value: b"other value".to_vec(),
                },
            ],
            partition: 1,
            offset: 7,
            timestamp_ms: -1,
        };

        let bytes = format.encode_record(&record).unwrap();
        let decoded = format.decode_record(&bytes).unwrap();
        assert_eq!(decoded, record);
        // header order must survive the trip
        assert_eq!(decoded.headers[0].key, b"header1");
        assert_eq!(decoded.headers[1].key, b"header2");
    }

    #[test]
    fn record_roundtrip_tombstone_value() {
        let format = AvroFormat::new().unwrap();
        let record = Record {
            key: Some(b"k".to_vec()),
            value: None,
            headers: vec![],
            partition: 0,
            offset: 12,
            timestamp_ms: 0,
        };

        let bytes = format.encode_record(&record).unwrap();
        assert_eq!(format.decode_record(&bytes).unwrap(), record);
    }

    // -------------------- Envelope --------------------

    #[test]
    fn envelope_roundtrip() {
        let format = AvroFormat::new().unwrap();
        let envelope = Envelope {
            record: b"opaque encoded record".to_vec(),
            checksum: vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x11, 0x22, 0x33],
        };

        let bytes = format.encode_envelope(&envelope).unwrap();
        assert_eq!(format.decode_envelope(&bytes).unwrap(), envelope);
    }

    // -------------------- Malformed input --------------------

    #[test]
    fn decode_garbage_fails() {
        let format = AvroFormat::new().unwrap();
        assert!(format.decode_metadata(b"\xff\xff\xff").is_err());
        assert!(format.decode_record(b"\xff\xff\xff").is_err());
        assert!(format.decode_envelope(b"\xff").is_err());
    }
}
