//! Per-partition backup and restore sessions on top of the disk-format
//! core.
//!
//! This layer owns everything the byte-level crates deliberately do not:
//! tool identity stamped into metadata, topology and topic-identity
//! validation, and the translation between broker-facing record tuples and
//! on-disk [`Record`]s. The caller opens one file per partition and drives
//! one session per file; independent partition files may be processed in
//! parallel since sessions share no state.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use backup::{BackupError, BackupReader, BackupWriter};
use payload::{AvroFormat, Header, Metadata, Record};

pub const TOOL_NAME: &str = "topicvault";
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Disk format version stamped into every file this tool writes.
pub const FORMAT_VERSION: i32 = 3;

/// One message as reported by the upstream consumer.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: i64,
}

/// One message ready to be handed to the producer on restore.
///
/// Offsets are stored in the backup file but never replayed — the target
/// broker assigns new ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSend {
    pub topic_name: String,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub partition: i32,
    pub timestamp_ms: i64,
}

/// Truncates a timestamp to the millisecond precision the disk format
/// stores, so the stamped value round-trips exactly.
fn millisecond_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts.timestamp_millis())
        .single()
        .unwrap_or(ts)
}

/// Backs up one topic-partition to one output stream.
///
/// # Write Path
///
/// 1. [`store_metadata`](PartitionBackup::store_metadata) — exactly once,
///    first. Rejects `partition_count != 1` before any bytes are written.
/// 2. [`store_record`](PartitionBackup::store_record) — once per consumed
///    message, in consumption order.
/// 3. [`finish`](PartitionBackup::finish) — flushes and returns the stream.
pub struct PartitionBackup<W: Write> {
    writer: BackupWriter<W, AvroFormat>,
    records_stored: u64,
}

impl PartitionBackup<File> {
    /// Creates a new backup file at `path`. Fails if the file already
    /// exists: backups are never appended to or overwritten in place.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)?;
        Self::new(file)
    }
}

impl<W: Write> PartitionBackup<W> {
    pub fn new(out: W) -> Result<Self> {
        Ok(Self {
            writer: BackupWriter::new(out, AvroFormat::new()?),
            records_stored: 0,
        })
    }

    /// Constructs and writes the metadata frame, stamping current tool
    /// identity and creation time.
    pub fn store_metadata(
        &mut self,
        topic_name: &str,
        topic_id: Option<Uuid>,
        estimated_record_count: i64,
        partition_count: i32,
    ) -> Result<()> {
        if partition_count != 1 {
            return Err(BackupError::UnsupportedPartitionCount(partition_count).into());
        }

        let metadata = Metadata {
            version: FORMAT_VERSION,
            tool_name: TOOL_NAME.into(),
            tool_version: TOOL_VERSION.into(),
            created_at: millisecond_precision(Utc::now()),
            estimated_record_count,
            topic_name: topic_name.into(),
            topic_id,
            partition_count,
        };
        self.writer.write_metadata(&metadata)?;
        tracing::info!(
            topic = %topic_name,
            estimated_record_count,
            "stored backup metadata"
        );
        Ok(())
    }

    /// Stores one consumed message as one record frame.
    pub fn store_record(&mut self, consumed: ConsumedRecord) -> Result<()> {
        let record = Record {
            key: consumed.key,
            value: consumed.value,
            headers: consumed
                .headers
                .into_iter()
                .map(|(key, value)| Header { key, value })
                .collect(),
            partition: consumed.partition,
            offset: consumed.offset,
            // Stored exactly as the consumer reports it; the broker may
            // already have rewritten this to log-append time.
            timestamp_ms: consumed.timestamp_ms,
        };
        self.writer.write_record(&record)?;
        self.records_stored += 1;
        Ok(())
    }

    /// Flushes and returns the underlying stream.
    pub fn finish(self) -> Result<W> {
        let out = self.writer.finish()?;
        tracing::info!(records = self.records_stored, "backup complete");
        Ok(out)
    }
}

/// Restores one topic-partition from one input stream.
///
/// # Read Path
///
/// 1. [`start`](PartitionRestore::start) — reads and validates the metadata
///    frame: single-partition only, and the file's topic name must match
///    the expected topic.
/// 2. [`sends`](PartitionRestore::sends) — lazily yields one
///    [`ProducerSend`] per record until end-of-stream. Any checksum or
///    decode failure is fatal to the file; the restore must be treated as
///    failed past that point.
pub struct PartitionRestore<R: Read> {
    reader: BackupReader<R, AvroFormat>,
    topic_name: String,
}

impl PartitionRestore<File> {
    pub fn open<P: AsRef<Path>>(path: P, expected_topic: &str) -> Result<Self> {
        Self::new(File::open(path)?, expected_topic)
    }
}

impl<R: Read> PartitionRestore<R> {
    pub fn new(input: R, expected_topic: &str) -> Result<Self> {
        Ok(Self {
            reader: BackupReader::new(input, AvroFormat::new()?),
            topic_name: expected_topic.into(),
        })
    }

    /// Reads and validates the metadata frame. Must succeed before any
    /// record is yielded.
    pub fn start(&mut self) -> Result<Metadata> {
        let metadata = self.reader.read_metadata()?;
        if metadata.partition_count != 1 {
            return Err(BackupError::UnsupportedPartitionCount(metadata.partition_count).into());
        }
        if metadata.topic_name != self.topic_name {
            return Err(BackupError::TopicNameMismatch {
                expected: self.topic_name.clone(),
                actual: metadata.topic_name,
            }
            .into());
        }
        tracing::info!(
            topic = %metadata.topic_name,
            tool = %metadata.tool_name,
            version = metadata.version,
            "restoring backup"
        );
        Ok(metadata)
    }

    /// The lazy sequence of producer sends.
    pub fn sends(&mut self) -> Result<impl Iterator<Item = Result<ProducerSend>> + '_> {
        let topic_name = self.topic_name.clone();
        let records = self.reader.records()?;
        Ok(records.map(move |result| {
            let record = result?;
            Ok(ProducerSend {
                topic_name: topic_name.clone(),
                key: record.key,
                value: record.value,
                headers: record
                    .headers
                    .into_iter()
                    .map(|h| (h.key, h.value))
                    .collect(),
                partition: record.partition,
                timestamp_ms: record.timestamp_ms,
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload::PayloadFormat;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn consumed(key: Option<&[u8]>, value: &[u8], offset: i64) -> ConsumedRecord {
        ConsumedRecord {
            key: key.map(|k| k.to_vec()),
            value: Some(value.to_vec()),
            headers: vec![(b"h".to_vec(), b"v".to_vec())],
            partition: 0,
            offset,
            timestamp_ms: 1_690_000_000_000 + offset,
        }
    }

    // -------------------- Session round trip --------------------

    #[test]
    fn backup_and_restore_through_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("a-topic:0.bak");
        let topic_id = Uuid::parse_str("3b4b6d2a-4f2e-4b58-a0d4-24953acc21ea")?;

        let mut session = PartitionBackup::create(&path)?;
        session.store_metadata("a-topic", Some(topic_id), 2, 1)?;
        session.store_record(consumed(None, b"first", 10))?;
        session.store_record(consumed(Some(&b"k"[..]), b"second", 11))?;
        session.finish()?;

        let mut restore = PartitionRestore::open(&path, "a-topic")?;
        let metadata = restore.start()?;
        assert_eq!(metadata.version, FORMAT_VERSION);
        assert_eq!(metadata.tool_name, TOOL_NAME);
        assert_eq!(metadata.tool_version, TOOL_VERSION);
        assert_eq!(metadata.topic_id, Some(topic_id));
        assert_eq!(metadata.estimated_record_count, 2);

        let sends: Vec<ProducerSend> = restore.sends()?.collect::<Result<_>>()?;
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].topic_name, "a-topic");
        assert_eq!(sends[0].key, None);
        assert_eq!(sends[0].value, Some(b"first".to_vec()));
        assert_eq!(sends[0].headers, vec![(b"h".to_vec(), b"v".to_vec())]);
        assert_eq!(sends[0].timestamp_ms, 1_690_000_000_010);
        assert_eq!(sends[1].key, Some(b"k".to_vec()));
        Ok(())
    }

    // -------------------- Topology validation --------------------

    #[test]
    fn multi_partition_backup_is_rejected_before_writing() -> Result<()> {
        let mut session = PartitionBackup::new(Vec::new())?;
        let err = session.store_metadata("a-topic", None, 0, 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackupError>(),
            Some(BackupError::UnsupportedPartitionCount(2))
        ));
        assert!(session.finish()?.is_empty());
        Ok(())
    }

    #[test]
    fn multi_partition_restore_is_rejected() -> Result<()> {
        // hand-craft a file this tool's writer refuses to produce
        let format = AvroFormat::new()?;
        let metadata = Metadata {
            version: FORMAT_VERSION,
            tool_name: "other-tool".into(),
            tool_version: "1.0.0".into(),
            created_at: millisecond_precision(Utc::now()),
            estimated_record_count: 0,
            topic_name: "a-topic".into(),
            topic_id: None,
            partition_count: 4,
        };
        let mut buf = Vec::new();
        codec::write_sized(&mut buf, &format.encode_metadata(&metadata)?)?;

        let mut restore = PartitionRestore::new(Cursor::new(buf), "a-topic")?;
        let err = restore.start().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackupError>(),
            Some(BackupError::UnsupportedPartitionCount(4))
        ));
        Ok(())
    }

    #[test]
    fn topic_name_mismatch_is_rejected() -> Result<()> {
        let mut session = PartitionBackup::new(Vec::new())?;
        session.store_metadata("a-topic", None, 0, 1)?;
        let buf = session.finish()?;

        let mut restore = PartitionRestore::new(Cursor::new(buf), "b-topic")?;
        let err = restore.start().unwrap_err();
        match err.downcast_ref::<BackupError>() {
            Some(BackupError::TopicNameMismatch { expected, actual }) => {
                assert_eq!(expected, "b-topic");
                assert_eq!(actual, "a-topic");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn sends_before_start_is_rejected() -> Result<()> {
        let mut session = PartitionBackup::new(Vec::new())?;
        session.store_metadata("a-topic", None, 0, 1)?;
        let buf = session.finish()?;

        let mut restore = PartitionRestore::new(Cursor::new(buf), "a-topic")?;
        assert!(restore.sends().is_err());
        Ok(())
    }

    // -------------------- File handling --------------------

    #[test]
    fn create_refuses_existing_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("existing.bak");
        std::fs::write(&path, b"already here")?;
        assert!(PartitionBackup::create(&path).is_err());
        Ok(())
    }
}
