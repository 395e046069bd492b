//! All error types used in this crate

use crate::parse::Method;

use super::encoding;

/// Any zip-related error, from invalid archives to encoding problems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not a valid zip file, or a variant that is unsupported.
    #[error("format: {0}")]
    Format(#[from] FormatError),

    /// Something is not supported by this crate
    #[error("unsupported: {0}")]
    Unsupported(#[from] UnsupportedError),

    /// Invalid UTF-8, Shift-JIS, or any problem encountered while decoding text in general.
    #[error("encoding: {0:?}")]
    Encoding(#[from] encoding::DecodingError),

    /// I/O-related error
    #[error("io: {0}")]
    IO(#[from] std::io::Error),

    /// Decompression-related error
    #[error("{method:?} decompression error: {msg}")]
    Decompression {
        /// The compression method that failed
        method: Method,
        /// Additional information
        msg: String,
    },

    /// Could not read as a zip because size could not be determined
    #[error("size must be known to open zip file")]
    UnknownSize,

    /// Protocol misuse by the caller, e.g. writing entry data before
    /// `put_entry`, or calling `finish` on a writer in error state.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
}

impl Error {
    /// Create a new error indicating that the given method is not supported.
    pub fn method_not_supported(method: Method) -> Self {
        Self::Unsupported(UnsupportedError::MethodNotSupported(method))
    }

    /// Create a new error indicating that the given method is not enabled.
    pub fn method_not_enabled(method: Method) -> Self {
        Self::Unsupported(UnsupportedError::MethodNotEnabled(method))
    }
}

/// Some part of the zip format is not supported by this crate.
///
/// The archive is (or may be) well-formed; the feature it uses is the
/// problem. These errors are recoverable: the caller can skip the entry and
/// keep reading others.
#[derive(Debug, thiserror::Error)]
pub enum UnsupportedError {
    /// The compression method is not supported.
    #[error("compression method not supported: {0:?}")]
    MethodNotSupported(Method),

    /// The compression method is supported, but not enabled in this build.
    #[error("compression method supported, but not enabled in this build: {0:?}")]
    MethodNotEnabled(Method),

    /// The entry is encrypted. This crate only detects encryption, it never
    /// decrypts.
    #[error("encrypted entries are not supported")]
    Encryption,

    /// A stored entry uses a data descriptor with no size known up front,
    /// and the caller did not allow the data-descriptor scan.
    #[error("stored entry with data descriptor is not supported (enable the allowance to scan for it)")]
    DataDescriptor,

    /// The archive is one volume of a split (multi-volume) archive.
    #[error("split (multi-volume) archives are not supported")]
    Splitting,
}

/// Specific zip format errors, mostly due to invalid zip archives but that could also stem from
/// implementation shortcomings.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FormatError {
    /// The end of central directory record was not found.
    ///
    /// This usually indicates that the file being read is not a zip archive.
    #[error("No end of central directory record found")]
    DirectoryEndSignatureNotFound,

    /// The zip64 end of central directory record could not be parsed.
    ///
    /// This is only returned when a zip64 end of central directory *locator* was found,
    /// so the archive should be zip64, but isn't.
    #[error("zip64 end of central directory record not found")]
    Directory64EndRecordInvalid,

    /// Corrupted/partial zip file: the offset we found for the central directory
    /// points outside of the current file.
    #[error("directory offset points outside of file")]
    DirectoryOffsetPointsOutsideFile,

    /// A central directory record carries a local header offset that points
    /// outside of the file.
    #[error("local header offset points outside of file")]
    HeaderOffsetPointsOutsideFile,

    /// The central record is corrupted somewhat.
    ///
    /// This can happen when the end of central directory record advertises
    /// a certain number of files, but we weren't able to read the same number of central directory
    /// headers.
    #[error("invalid central record: expected to read {expected} files, got {actual}")]
    InvalidCentralRecord {
        /// expected number of files
        expected: u16,
        /// actual number of files
        actual: u16,
    },

    /// End of central directory record claims an impossible number of files.
    ///
    /// Each entry takes a minimum amount of size, so if the overall archive size is smaller than
    /// claimed_records_count * minimum_entry_size, we know it's not a valid zip file.
    #[error("impossible number of files: claims to have {claimed_records_count}, but zip size is {zip_size}")]
    ImpossibleNumberOfFiles {
        /// number of files claimed in the end of central directory record
        claimed_records_count: u64,
        /// total size of the zip file
        zip_size: u64,
    },

    /// An extra field block declares more payload than there are bytes left.
    #[error("Bad extra field starting at {start}. Block length of {block_length} bytes exceeds remaining data of {remaining} bytes.")]
    ExtraFieldBlockTooLarge {
        /// offset of the faulting block inside the extra field buffer
        start: usize,
        /// declared payload length of the block
        block_length: usize,
        /// bytes actually remaining after the block's id/length prefix
        remaining: usize,
    },

    /// A registered extra-field parser rejected the payload bytes.
    #[error("Failed to parse corrupt ZIP extra field of type {tag:#x}")]
    CorruptExtraField {
        /// header id of the faulting extra field
        tag: u16,
    },

    /// The number of 8-byte slots in a zip64 extra field does not match the
    /// mask pattern of the surrounding header's 32-bit fields.
    #[error("zip64 extra field does not match masked header fields")]
    Zip64ExtraFieldMismatch,

    /// The local file header (before the file data) could not be parsed correctly.
    #[error("invalid local file header")]
    InvalidLocalHeader,

    /// The data descriptor (after the file data) could not be parsed correctly.
    #[error("invalid data descriptor")]
    InvalidDataDescriptor,

    /// Bytes ran out before a well-formed structure was complete.
    #[error("Truncated ZIP file")]
    Truncated,

    /// The uncompressed size didn't match
    #[error("uncompressed size didn't match: expected {expected}, got {actual}")]
    WrongSize {
        /// expected size in bytes (from the local header, data descriptor, etc.)
        expected: u64,
        /// actual size in bytes (from decompressing the entry)
        actual: u64,
    },

    /// The CRC-32 checksum didn't match.
    ///
    /// `expected` is the checksum stored in the archive, `actual` the one
    /// computed over the bytes we saw.
    #[error("Bad CRC checksum, expected {expected:x} instead of {actual:x}")]
    WrongChecksum {
        /// expected checksum (from the central directory, extra field, etc.)
        expected: u32,
        /// actual checksum (computed)
        actual: u32,
    },

    /// An entry needs zip64 fields (size or offset beyond the 32-bit range,
    /// or more than 65535 entries), but the writer's zip64 policy forbids
    /// them.
    #[error("{what} requires zip64, forbidden by the writer's zip64 policy")]
    Zip64Required {
        /// which quantity overflowed the classic format
        what: &'static str,
    },
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::IO(e) => e,
            e => std::io::Error::new(std::io::ErrorKind::Other, e),
        }
    }
}
