use std::io::Write;

use payload::{Envelope, Metadata, PayloadFormat, Record};

use crate::BackupError;

/// Writes one backup file: a metadata frame followed by zero or more
/// checksummed record frames.
///
/// The writer owns its output stream for its whole lifetime and only ever
/// appends — there are no random-access rewrites. The metadata frame must
/// be written exactly once before the first record; the writer enforces
/// the order at runtime.
///
/// Each record frame is a complete, independently recoverable unit once
/// flushed; a partially written file is simply truncated at the last whole
/// frame and is not valid for restore beyond it.
pub struct BackupWriter<W: Write, F: PayloadFormat> {
    out: W,
    format: F,
    metadata_written: bool,
}

impl<W: Write, F: PayloadFormat> BackupWriter<W, F> {
    pub fn new(out: W, format: F) -> Self {
        Self {
            out,
            format,
            metadata_written: false,
        }
    }

    /// Writes the metadata frame.
    ///
    /// # Errors
    ///
    /// [`BackupError::UnsupportedPartitionCount`] if `partition_count != 1`,
    /// raised before a single byte reaches the output;
    /// [`BackupError::MetadataAlreadyWritten`] on a second call.
    pub fn write_metadata(&mut self, metadata: &Metadata) -> Result<(), BackupError> {
        if self.metadata_written {
            return Err(BackupError::MetadataAlreadyWritten);
        }
        if metadata.partition_count != 1 {
            return Err(BackupError::UnsupportedPartitionCount(metadata.partition_count));
        }

        let encoded = self.format.encode_metadata(metadata)?;
        codec::write_sized(&mut self.out, &encoded)?;
        self.metadata_written = true;
        Ok(())
    }

    /// Encodes `record`, seals it in a checksummed envelope, and appends it
    /// as one sized frame.
    pub fn write_record(&mut self, record: &Record) -> Result<(), BackupError> {
        if !self.metadata_written {
            return Err(BackupError::MetadataMissing);
        }

        let encoded = self.format.encode_record(record)?;
        let envelope = Envelope {
            checksum: codec::digest(&encoded).to_vec(),
            record: encoded,
        };
        let framed = self.format.encode_envelope(&envelope)?;
        codec::write_sized(&mut self.out, &framed)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), BackupError> {
        Ok(self.out.flush()?)
    }

    /// Flushes and returns the underlying stream.
    pub fn finish(mut self) -> Result<W, BackupError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Writes one complete backup — metadata plus all records — in a single
/// call, returning the output stream.
pub fn write_backup<'a, W, F, I>(
    out: W,
    format: F,
    metadata: &Metadata,
    records: I,
) -> Result<W, BackupError>
where
    W: Write,
    F: PayloadFormat,
    I: IntoIterator<Item = &'a Record>,
{
    let mut writer = BackupWriter::new(out, format);
    writer.write_metadata(metadata)?;
    for record in records {
        writer.write_record(record)?;
    }
    writer.finish()
}
