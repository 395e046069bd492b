//! The scatter writer: per-worker spill stores that defer central-directory
//! work until a final merge.
//!
//! Each producer thread owns a [ScatterBucket]. Adding an entry compresses
//! the payload into the bucket's spill file right away, together with the
//! finished metadata (checksum, sizes). At merge time every bucket replays
//! its spilled entries into a target [ArchiveWriter] through the raw-entry
//! path, so nothing is recompressed. The container's final order is the
//! concatenation of bucket orders; within a bucket, insertion order.
//!
//! The buckets themselves are not synchronized: one bucket, one thread. The
//! merge runs serially after all producers are done.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use chrono::Utc;
use flate2::{Compress, Compression, FlushCompress, Status};
use tracing::trace;

use ferrozip::{
    error::{Error, FormatError},
    parse::{Entry, GeneralPurposeBit, Method, Mode, UnixMode},
};

use super::{ArchiveWriter, EntrySpec, Sink};

/// A per-worker spill store of raw compressed entries and their metadata.
pub struct ScatterBucket {
    spill: File,
    records: Vec<Entry>,
    compression_level: u32,
}

impl ScatterBucket {
    /// A bucket spilling to an anonymous temporary file.
    pub fn new() -> io::Result<Self> {
        Self::with_compression_level(6)
    }

    /// Same, with an explicit deflate level.
    pub fn with_compression_level(compression_level: u32) -> io::Result<Self> {
        Ok(Self {
            spill: tempfile::tempfile()?,
            records: Vec::new(),
            compression_level: compression_level.min(9),
        })
    }

    /// Number of entries spilled so far.
    pub fn entry_count(&self) -> usize {
        self.records.len()
    }

    /// Compress one entry into the spill store. The payload is pulled from
    /// `supplier` immediately; the bucket owns the returned source until it
    /// is drained.
    pub fn add_entry<F, R>(&mut self, spec: EntrySpec, supplier: F) -> Result<(), Error>
    where
        F: FnOnce() -> io::Result<R>,
        R: Read,
    {
        let mut src = supplier().map_err(Error::IO)?;

        let mut hasher = crc32fast::Hasher::new();
        let mut uncompressed: u64 = 0;
        let mut compressed: u64 = 0;

        match spec.method {
            Method::Store => {
                let mut chunk = [0u8; 64 * 1024];
                loop {
                    let n = src.read(&mut chunk).map_err(Error::IO)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&chunk[..n]);
                    self.spill.write_all(&chunk[..n]).map_err(Error::IO)?;
                    uncompressed += n as u64;
                    compressed += n as u64;
                }
            }
            Method::Deflate => {
                let mut compress = Compress::new(
                    Compression::new(self.compression_level),
                    false,
                );
                let mut chunk = [0u8; 64 * 1024];
                let mut out = [0u8; 64 * 1024];
                loop {
                    let n = src.read(&mut chunk).map_err(Error::IO)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&chunk[..n]);
                    uncompressed += n as u64;

                    let mut input = &chunk[..n];
                    while !input.is_empty() {
                        let before_in = compress.total_in();
                        let before_out = compress.total_out();
                        compress
                            .compress(input, &mut out, FlushCompress::None)
                            .map_err(|e| Error::IO(io::Error::new(io::ErrorKind::Other, e)))?;
                        let consumed = (compress.total_in() - before_in) as usize;
                        let produced = (compress.total_out() - before_out) as usize;
                        self.spill.write_all(&out[..produced]).map_err(Error::IO)?;
                        compressed += produced as u64;
                        input = &input[consumed..];
                    }
                }
                loop {
                    let before_out = compress.total_out();
                    let status = compress
                        .compress(&[], &mut out, FlushCompress::Finish)
                        .map_err(|e| Error::IO(io::Error::new(io::ErrorKind::Other, e)))?;
                    let produced = (compress.total_out() - before_out) as usize;
                    self.spill.write_all(&out[..produced]).map_err(Error::IO)?;
                    compressed += produced as u64;
                    if status == Status::StreamEnd {
                        break;
                    }
                }
            }
            method => return Err(Error::method_not_supported(method)),
        }

        let is_dir = spec.name.ends_with('/');
        let unix_perms = spec.unix_mode.unwrap_or(if is_dir { 0o755 } else { 0o644 });
        let unix_full = if is_dir { 0o40000 } else { 0o100000 } | (unix_perms & 0o7777);

        let mut flags = GeneralPurposeBit::default();
        flags.set_uses_utf8_names(true);

        let entry = Entry {
            raw_name: spec.name.as_bytes().to_vec(),
            name: spec.name,
            method: spec.method,
            comment: spec.comment,
            modified: spec.modified.unwrap_or_else(Utc::now),
            flags,
            crc32: hasher.finalize(),
            compressed_size: compressed,
            uncompressed_size: uncompressed,
            mode: Mode::from(UnixMode(unix_full)),
            extra_fields: spec.extra_fields,
            external_attrs: (unix_full << 16) | if is_dir { 0x10 } else { 0 },
            ..Default::default()
        };
        trace!(
            name = %entry.name,
            compressed,
            uncompressed,
            "spilled scatter entry"
        );
        self.records.push(entry);
        Ok(())
    }

    /// Replay every spilled entry into `target`, in insertion order, through
    /// the raw-entry path. Consumes the bucket; the spill file is deleted
    /// when this returns.
    pub fn merge_into<S: Sink>(mut self, target: &mut ArchiveWriter<S>) -> Result<(), Error> {
        self.spill.seek(SeekFrom::Start(0)).map_err(Error::IO)?;
        for entry in &self.records {
            let payload = (&mut self.spill).take(entry.compressed_size);
            target.add_raw_entry(entry, payload)?;
        }
        // the spill must end exactly where the records say
        let mut probe = [0u8; 1];
        if self.spill.read(&mut probe).map_err(Error::IO)? != 0 {
            return Err(FormatError::Truncated.into());
        }
        Ok(())
    }
}
