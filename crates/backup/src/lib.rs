//! # Backup — disk format v3
//!
//! Serializes the full record stream of a single topic-partition to one
//! file, and restores it later. A file is **write-once, read-forward**:
//! there is no index, no footer, and no random access.
//!
//! ## File layout (v3)
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ len (u32 BE) | Metadata payload               │
//! ├───────────────────────────────────────────────┤
//! │ len (u32 BE) | Envelope payload               │
//! │                                               │
//! │ ... repeated for each record ...              │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. There is no magic number and no trailing
//! record count — end-of-stream is the only terminator. Each `Envelope`
//! payload is the structured encoding of `{record: bytes, checksum: bytes}`,
//! where `checksum` is the 8-byte xxHash64 digest of the encoded record
//! bytes (not of the envelope frame).
//!
//! [`BackupWriter`] sequences one metadata frame followed by any number of
//! record frames; [`BackupReader`] reads the metadata frame and then lazily
//! yields records until the stream is exhausted. Any checksum or decode
//! failure during iteration is fatal to the file — there is no skip-and-
//! continue.

mod reader;
mod writer;

pub use reader::{BackupReader, Records};
pub use writer::{write_backup, BackupWriter};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Encode(#[from] codec::EncodeError),
    #[error(transparent)]
    Decode(#[from] codec::DecodeError),
    #[error(transparent)]
    Format(#[from] payload::FormatError),

    /// Only single-partition backups are supported by this format.
    #[error("cannot back up or restore multi-partition topics (partition_count = {0})")]
    UnsupportedPartitionCount(i32),
    /// The file's metadata names a different topic than the caller expects.
    #[error("metadata names topic {actual:?}, expected {expected:?}")]
    TopicNameMismatch { expected: String, actual: String },

    #[error("the metadata frame must be handled before any record")]
    MetadataMissing,
    #[error("the metadata frame has already been written")]
    MetadataAlreadyWritten,
    #[error("the metadata frame has already been read")]
    MetadataAlreadyRead,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
