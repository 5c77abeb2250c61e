use std::io::{BufRead, BufReader, Read};

use payload::{Metadata, PayloadFormat, Record};

use crate::BackupError;

/// Reads one backup file: the metadata frame, then a lazy, forward-only
/// sequence of records.
///
/// The reader owns its input stream for its whole lifetime and drives it
/// strictly forward: `Start → MetadataRead → (RecordRead)* → End`. Call
/// [`read_metadata`](BackupReader::read_metadata) first, validate it, then
/// iterate [`records`](BackupReader::records).
///
/// End-of-stream is detected with a non-consuming probe on the buffered
/// stream, so a file that ends cleanly on a frame boundary terminates the
/// sequence without error. The advisory `estimated_record_count` in the
/// metadata is never consulted.
pub struct BackupReader<R: Read, F: PayloadFormat> {
    input: BufReader<R>,
    format: F,
    metadata_read: bool,
}

impl<R: Read, F: PayloadFormat> BackupReader<R, F> {
    pub fn new(input: R, format: F) -> Self {
        Self {
            input: BufReader::new(input),
            format,
            metadata_read: false,
        }
    }

    /// Consumes exactly one sized frame as the file's metadata.
    pub fn read_metadata(&mut self) -> Result<Metadata, BackupError> {
        if self.metadata_read {
            return Err(BackupError::MetadataAlreadyRead);
        }
        let payload = codec::read_sized(&mut self.input)?;
        let metadata = self.format.decode_metadata(&payload)?;
        self.metadata_read = true;
        Ok(metadata)
    }

    /// Reports whether at least one more byte can be read without consuming
    /// anything.
    fn has_remaining(&mut self) -> Result<bool, BackupError> {
        Ok(!self.input.fill_buf()?.is_empty())
    }

    /// Reads one record frame: sized frame, envelope decode, checksum
    /// verification, record decode.
    fn read_record(&mut self) -> Result<Record, BackupError> {
        let framed = codec::read_sized(&mut self.input)?;
        let envelope = self.format.decode_envelope(&framed)?;
        codec::verify_digest(&envelope.record, &envelope.checksum)?;
        Ok(self.format.decode_record(&envelope.record)?)
    }

    /// Returns the lazy record sequence.
    ///
    /// The iterator is finite, forward-only, and non-restartable. The first
    /// failed step fuses it: a corrupt or truncated frame makes the rest of
    /// the file unreadable, so no further items are yielded after an `Err`.
    ///
    /// # Errors
    ///
    /// [`BackupError::MetadataMissing`] if the metadata frame has not been
    /// read yet.
    pub fn records(&mut self) -> Result<Records<'_, R, F>, BackupError> {
        if !self.metadata_read {
            return Err(BackupError::MetadataMissing);
        }
        Ok(Records {
            reader: self,
            done: false,
        })
    }
}

/// Lazy iterator over the record frames of one backup file.
pub struct Records<'a, R: Read, F: PayloadFormat> {
    reader: &'a mut BackupReader<R, F>,
    done: bool,
}

impl<R: Read, F: PayloadFormat> Iterator for Records<'_, R, F> {
    type Item = Result<Record, BackupError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.has_remaining() {
            Ok(false) => {
                self.done = true;
                None
            }
            Ok(true) => {
                let result = self.reader.read_record();
                if result.is_err() {
                    self.done = true;
                }
                Some(result)
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
