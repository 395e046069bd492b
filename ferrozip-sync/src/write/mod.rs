//! Writing zip archives.
//!
//! [ArchiveWriter] adapts to its sink: over a [Seekable] sink it writes
//! local headers with placeholder sizes and patches them once an entry is
//! finished; over a [Streaming] sink it sets general-purpose bit 3 and
//! appends a data descriptor instead. Entries whose sizes are declared up
//! front need neither.

pub(crate) mod scatter;

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::{Compress, Compression, FlushCompress, Status};
use tracing::trace;

use ferrozip::{
    encoding::Encoding,
    error::{Error, FormatError},
    parse::{
        merge_central, merge_local, DataDescriptorRecord, DirectoryHeader,
        EndOfCentralDirectory64Locator, EndOfCentralDirectory64Record,
        EndOfCentralDirectoryRecord, Entry, ExtraField, GeneralPurposeBit, HostSystem,
        LocalFileHeaderRecord, Method, Mode, MsdosTimestamp, UnicodeExtraField, UnixMode,
        Version, Zip64ExtraField, ZipBytes, ZipString,
    },
};

/// The 32-bit saturation marker: a size or offset stored as this value
/// lives in a zip64 extra field instead.
const U32_MAX_MARKER: u64 = 0xFFFF_FFFF;

/// A byte sink an [ArchiveWriter] can write an archive to.
///
/// All offsets are relative to the first byte the writer emitted, so an
/// archive can be appended to pre-existing data (self-extracting stubs).
pub trait Sink: io::Write {
    /// Rewrite previously written bytes at `offset`. Returns false if this
    /// sink cannot go back (the writer then uses data descriptors).
    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<bool>;
}

/// A [Sink] over anything seekable: local headers get patched in place and
/// no data descriptors are emitted.
pub struct Seekable<W: Write + Seek> {
    inner: W,
    base: u64,
}

impl<W: Write + Seek> Seekable<W> {
    /// The current stream position becomes the start of the archive.
    pub fn new(mut inner: W) -> io::Result<Self> {
        let base = inner.stream_position()?;
        Ok(Self { inner, base })
    }

    /// Gives the wrapped writer back.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> io::Write for Seekable<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> Sink for Seekable<W> {
    fn patch(&mut self, offset: u64, bytes: &[u8]) -> io::Result<bool> {
        let pos = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(self.base + offset))?;
        self.inner.write_all(bytes)?;
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(true)
    }
}

/// A [Sink] over a plain writer: nothing can be rewritten, so entries of
/// unknown size carry data descriptors.
pub struct Streaming<W: Write> {
    inner: W,
}

impl<W: Write> Streaming<W> {
    /// Wrap a non-seekable writer.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Gives the wrapped writer back.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> io::Write for Streaming<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Sink for Streaming<W> {
    fn patch(&mut self, _offset: u64, _bytes: &[u8]) -> io::Result<bool> {
        Ok(false)
    }
}

/// When the writer reaches for zip64 structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zip64Policy {
    /// Refuse anything that would need them with
    /// [FormatError::Zip64Required].
    Never,
    /// Use them when a size, offset or count overflows the classic format.
    ///
    /// Note that an entry of *undeclared* size on any sink is assumed to
    /// fit; if it turns out not to, closing it fails. Declare sizes or pick
    /// [Zip64Policy::Always] when entries may cross 4 GiB.
    AsNeeded,
    /// Every entry gets zip64 size fields, and the archive a zip64 end of
    /// central directory.
    Always,
}

/// When the writer attaches an Info-ZIP Unicode path extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnicodeExtraPolicy {
    /// Never; unmappable names degrade to `%Uxxxx` escapes only.
    Never,
    /// For every name the archive encoding cannot losslessly hold.
    Always,
}

/// Builds entry compressors for a method this crate has no encoder for.
pub trait EncoderFactory: Send + Sync {
    /// Build an encoder for one entry.
    fn make_encoder(&self) -> Box<dyn EntryEncoder>;
}

/// Streaming compression for one entry, appending compressed bytes to a
/// caller buffer.
pub trait EntryEncoder {
    /// Compress all of `input`, appending the produced bytes to `out`.
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), Error>;

    /// Flush whatever the encoder still holds.
    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), Error>;
}

/// Knobs for the writer.
#[derive(Clone)]
pub struct WriterOptions {
    /// Encoding for names and comments. Names it cannot hold are escaped,
    /// cf. [Encoding::encode].
    pub encoding: Encoding,

    /// Set general-purpose bit 11 (the language encoding flag) when the
    /// archive encoding is UTF-8.
    pub language_encoding_flag: bool,

    /// Unicode path extra field policy.
    pub unicode_extra: UnicodeExtraPolicy,

    /// Zip64 policy.
    pub zip64: Zip64Policy,

    /// Deflate compression level, 0-9.
    pub compression_level: u32,

    /// Allow stored entries of unknown size on streaming sinks, giving
    /// them a data descriptor. Readers then have to scan for the
    /// descriptor, so this is off by default.
    pub allow_stored_dd: bool,

    /// Encoders for methods beyond Store and Deflate, by method code.
    pub encoders: HashMap<u16, Arc<dyn EncoderFactory>>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf8,
            language_encoding_flag: true,
            unicode_extra: UnicodeExtraPolicy::Never,
            zip64: Zip64Policy::AsNeeded,
            compression_level: 6,
            allow_stored_dd: false,
            encoders: HashMap::new(),
        }
    }
}

/// Everything the writer needs to know to open an entry.
#[derive(Clone)]
pub struct EntrySpec {
    /// Entry name, `/`-separated; a trailing `/` makes it a directory.
    pub name: String,

    /// Compression method; Store and Deflate are built in, anything else
    /// needs an encoder in [WriterOptions::encoders].
    pub method: Method,

    /// Last-modified time; the current time when absent.
    pub modified: Option<DateTime<Utc>>,

    /// Unix permission bits, e.g. `0o644`. The file-type bits are derived
    /// from the name.
    pub unix_mode: Option<u32>,

    /// Entry comment.
    pub comment: Option<String>,

    /// Uncompressed size, when known up front.
    pub known_size: Option<u64>,

    /// CRC-32 of the payload, when known up front. Together with
    /// [Self::known_size] this lets stored entries skip both patching and
    /// data descriptors.
    pub known_crc32: Option<u32>,

    /// Extra fields to attach to the entry.
    pub extra_fields: Vec<ExtraField>,
}

impl Default for EntrySpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            method: Method::Store,
            modified: None,
            unix_mode: None,
            comment: None,
            known_size: None,
            known_crc32: None,
            extra_fields: Vec::new(),
        }
    }
}

impl EntrySpec {
    /// A file entry with the given method.
    pub fn new(name: impl Into<String>, method: Method) -> Self {
        Self {
            name: name.into(),
            method,
            ..Default::default()
        }
    }

    /// A directory entry (stored, trailing slash enforced).
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self {
            name,
            method: Method::Store,
            ..Default::default()
        }
    }

    /// Set the last-modified time.
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Set the unix permission bits.
    pub fn with_unix_mode(mut self, mode: u32) -> Self {
        self.unix_mode = Some(mode);
        self
    }

    /// Set the entry comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Declare the payload's size and checksum up front.
    pub fn with_declared_contents(mut self, size: u64, crc32: u32) -> Self {
        self.known_size = Some(size);
        self.known_crc32 = Some(crc32);
        self
    }

    /// Attach an extra field.
    pub fn with_extra_field(mut self, field: ExtraField) -> Self {
        self.extra_fields.push(field);
        self
    }
}

enum WriterState {
    Ready,
    InEntry(Box<InProgress>),
    Finished,
    Failed,
}

struct InProgress {
    entry: Entry,
    use_descriptor: bool,
    needs_patch: bool,
    zip64: bool,
    /// archive-relative offset of the crc32 field inside the local header
    crc_field_offset: u64,
    /// archive-relative offset of the size pair inside the zip64 extra
    zip64_sizes_offset: Option<u64>,
    compressor: Compressor,
    hasher: crc32fast::Hasher,
    uncompressed: u64,
    compressed: u64,
    declared: Option<(u64, u32)>,
}

enum Compressor {
    Store,
    Deflate(Box<Compress>),
    Custom(Box<dyn EntryEncoder>),
}

/// Writes a zip archive to a [Sink], entry by entry.
///
/// The protocol per entry is [Self::put_entry], any number of
/// [Self::write_data] calls, then [Self::close_entry]; or
/// [Self::add_entry] for the one-shot version, or [Self::add_raw_entry]
/// to splice in an already-compressed payload verbatim. [Self::finish]
/// writes the central directory; nothing before that point makes the
/// archive readable, which is exactly what makes a failed write safe:
/// a writer that errored refuses everything but dropping it.
pub struct ArchiveWriter<S: Sink> {
    sink: S,
    written: u64,
    seekable: bool,
    options: WriterOptions,
    comment: Option<String>,
    central: Vec<Entry>,
    state: WriterState,
}

impl<W: Write + Seek> ArchiveWriter<Seekable<W>> {
    /// Write an archive to a seekable sink, starting at its current
    /// position.
    pub fn new(w: W) -> Result<Self, Error> {
        Self::with_options(w, WriterOptions::default())
    }

    /// Same, with explicit options.
    pub fn with_options(w: W, options: WriterOptions) -> Result<Self, Error> {
        Ok(Self::from_sink(Seekable::new(w)?, true, options))
    }
}

impl<W: Write> ArchiveWriter<Streaming<W>> {
    /// Write an archive to a non-seekable sink.
    pub fn new_streaming(w: W) -> Self {
        Self::with_options_streaming(w, WriterOptions::default())
    }

    /// Same, with explicit options.
    pub fn with_options_streaming(w: W, options: WriterOptions) -> Self {
        Self::from_sink(Streaming::new(w), false, options)
    }
}

impl<S: Sink> ArchiveWriter<S> {
    fn from_sink(sink: S, seekable: bool, options: WriterOptions) -> Self {
        Self {
            sink,
            written: 0,
            seekable,
            options,
            comment: None,
            central: Vec::new(),
            state: WriterState::Ready,
        }
    }

    /// Set the archive comment, written with the end of central directory
    /// record.
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    /// Number of entries added so far.
    pub fn entry_count(&self) -> usize {
        self.central.len()
    }

    fn check_ready(&self) -> Result<(), Error> {
        match self.state {
            WriterState::Ready => Ok(()),
            WriterState::InEntry(_) => Err(Error::IllegalState(
                "an entry is already open; close it first",
            )),
            WriterState::Finished => Err(Error::IllegalState("the writer is already finished")),
            WriterState::Failed => Err(Error::IllegalState("the writer is in a failed state")),
        }
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<(), Error> {
        // write_all loops until the sink accepted every byte; a zero-length
        // write surfaces as WriteZero
        match self.sink.write_all(bytes) {
            Ok(()) => {
                self.written += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.state = WriterState::Failed;
                Err(Error::IO(e))
            }
        }
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> Result<(), Error> {
        match self.sink.patch(offset, bytes) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.state = WriterState::Failed;
                Err(Error::IllegalState("this sink cannot rewrite headers"))
            }
            Err(e) => {
                self.state = WriterState::Failed;
                Err(Error::IO(e))
            }
        }
    }

    /// Open a new entry. Payload bytes go through [Self::write_data].
    pub fn put_entry(&mut self, spec: EntrySpec) -> Result<(), Error> {
        self.check_ready()?;

        let raw_name = self.options.encoding.encode(&spec.name);

        let mut flags = GeneralPurposeBit::default();
        if self.options.language_encoding_flag && self.options.encoding == Encoding::Utf8 {
            flags.set_uses_utf8_names(true);
        }

        let mut extra_fields = spec.extra_fields;
        if self.options.unicode_extra == UnicodeExtraPolicy::Always
            && !self.options.encoding.can_encode(&spec.name)
        {
            extra_fields.push(ExtraField::UnicodePath(UnicodeExtraField::new(
                &raw_name, &spec.name,
            )));
        }

        let compressor = match spec.method {
            Method::Store => Compressor::Store,
            Method::Deflate => Compressor::Deflate(Box::new(Compress::new(
                Compression::new(self.options.compression_level.min(9)),
                false,
            ))),
            method => match self.options.encoders.get(&u16::from(method)) {
                Some(factory) => Compressor::Custom(factory.make_encoder()),
                None => return Err(Error::method_not_supported(method)),
            },
        };

        let declared = match (spec.known_size, spec.known_crc32) {
            (Some(size), Some(crc)) => Some((size, crc)),
            _ => None,
        };

        let zip64 = match self.options.zip64 {
            Zip64Policy::Always => true,
            Zip64Policy::Never => {
                if matches!(declared, Some((size, _)) if size >= U32_MAX_MARKER) {
                    return Err(FormatError::Zip64Required { what: "entry size" }.into());
                }
                false
            }
            Zip64Policy::AsNeeded => {
                matches!(declared, Some((size, _)) if size >= U32_MAX_MARKER)
            }
        };

        // stored payloads compress to themselves, so a declared size fully
        // describes the entry up front
        let prefill = match (spec.method, declared) {
            (Method::Store, Some((size, crc))) => Some((size, crc)),
            _ => None,
        };

        let (use_descriptor, needs_patch) = if prefill.is_some() {
            (false, false)
        } else if self.seekable {
            (false, true)
        } else {
            if matches!(spec.method, Method::Store) && !self.options.allow_stored_dd {
                return Err(Error::IllegalState(
                    "cannot write a stored entry of unknown size to a non-seekable sink: \
                     declare its size and crc32, or enable allow_stored_dd",
                ));
            }
            (true, false)
        };
        if use_descriptor {
            flags.set_uses_data_descriptor(true);
        }

        if zip64 {
            let (uncomp, comp) = match prefill {
                Some((size, _)) => (size, size),
                None => (0, 0),
            };
            extra_fields.push(ExtraField::Zip64(Zip64ExtraField {
                uncompressed_size: Some(uncomp),
                compressed_size: Some(comp),
                header_offset: None,
                disk_start: None,
            }));
        }

        let (lfh_uncomp32, lfh_comp32, lfh_crc) = if zip64 {
            (
                U32_MAX_MARKER as u32,
                U32_MAX_MARKER as u32,
                prefill.map(|(_, crc)| crc).unwrap_or(0),
            )
        } else {
            match prefill {
                Some((size, crc)) => (size as u32, size as u32, crc),
                None => (0, 0, 0),
            }
        };

        let modified = spec.modified.unwrap_or_else(Utc::now);
        // the version-needed field carries no host byte; the host only
        // shows up in the central directory's version-made-by
        let reader_version = Version {
            host_system: HostSystem::MsDos,
            version: if zip64 {
                Version::NEEDED_ZIP64
            } else {
                Version::NEEDED_BASELINE
            },
        };

        let is_dir = spec.name.ends_with('/');
        let unix_perms = spec.unix_mode.unwrap_or(if is_dir { 0o755 } else { 0o644 });
        let unix_full = if is_dir { 0o40000 } else { 0o100000 } | (unix_perms & 0o7777);
        let external_attrs = (unix_full << 16) | if is_dir { 0x10 } else { 0 };

        let header_offset = self.written;
        let merged_extra = merge_local(&extra_fields);
        let zip64_sizes_offset = zip64.then(|| {
            // the zip64 field was pushed last; its two size slots sit at
            // the very end of the merged buffer
            header_offset
                + LocalFileHeaderRecord::FIXED_SIZE as u64
                + raw_name.len() as u64
                + merged_extra.len() as u64
                - 16
        });

        let lfh = LocalFileHeaderRecord {
            reader_version,
            flags,
            method: spec.method,
            modified: MsdosTimestamp::from_datetime(modified),
            crc32: lfh_crc,
            compressed_size: lfh_comp32,
            uncompressed_size: lfh_uncomp32,
            name: ZipString(raw_name.clone()),
            extra: ZipBytes(merged_extra),
        };
        let mut buf = Vec::with_capacity(128);
        lfh.write_to(&mut buf);
        self.emit(&buf)?;

        trace!(
            name = %spec.name,
            method = ?spec.method,
            header_offset,
            use_descriptor,
            zip64,
            "put entry"
        );

        let entry = Entry {
            name: spec.name,
            raw_name,
            method: spec.method,
            comment: spec.comment,
            modified,
            header_offset,
            reader_version,
            flags,
            crc32: prefill.map(|(_, crc)| crc).unwrap_or(0),
            compressed_size: prefill.map(|(size, _)| size).unwrap_or(0),
            uncompressed_size: prefill.map(|(size, _)| size).unwrap_or(0),
            mode: Mode::from(UnixMode(unix_full)),
            extra_fields,
            is_zip64: zip64,
            external_attrs,
            ..Default::default()
        };

        self.state = WriterState::InEntry(Box::new(InProgress {
            entry,
            use_descriptor,
            needs_patch,
            zip64,
            crc_field_offset: header_offset + 14,
            zip64_sizes_offset,
            compressor,
            hasher: crc32fast::Hasher::new(),
            uncompressed: 0,
            compressed: 0,
            declared,
        }));
        Ok(())
    }

    /// Feed payload bytes to the open entry.
    pub fn write_data(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut p = self.take_in_progress()?;

        p.hasher.update(data);
        p.uncompressed += data.len() as u64;

        let result = self.compress_chunk(&mut p, data);
        match result {
            Ok(()) => {
                self.state = WriterState::InEntry(p);
                Ok(())
            }
            Err(e) => {
                self.state = WriterState::Failed;
                Err(e)
            }
        }
    }

    /// Finish the open entry: flush its compressor, then either patch the
    /// local header or append a data descriptor.
    pub fn close_entry(&mut self) -> Result<(), Error> {
        let mut p = self.take_in_progress()?;

        let result = self.finish_entry(&mut p);
        match result {
            Ok(()) => {
                self.central.push(p.entry);
                self.state = WriterState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = WriterState::Failed;
                Err(e)
            }
        }
    }

    /// [Self::put_entry], [Self::write_data] and [Self::close_entry] in
    /// one call.
    pub fn add_entry(&mut self, spec: EntrySpec, data: &[u8]) -> Result<(), Error> {
        self.put_entry(spec)?;
        self.write_data(data)?;
        self.close_entry()
    }

    fn take_in_progress(&mut self) -> Result<Box<InProgress>, Error> {
        match std::mem::replace(&mut self.state, WriterState::Failed) {
            WriterState::InEntry(p) => Ok(p),
            other => {
                self.state = other;
                Err(Error::IllegalState("no entry is open"))
            }
        }
    }

    fn compress_chunk(&mut self, p: &mut InProgress, data: &[u8]) -> Result<(), Error> {
        match &mut p.compressor {
            Compressor::Store => {
                self.sink.write_all(data).map_err(Error::IO)?;
                self.written += data.len() as u64;
                p.compressed += data.len() as u64;
                Ok(())
            }
            Compressor::Deflate(compress) => {
                let mut input = data;
                let mut out = [0u8; 32 * 1024];
                while !input.is_empty() {
                    let before_in = compress.total_in();
                    let before_out = compress.total_out();
                    compress
                        .compress(input, &mut out, FlushCompress::None)
                        .map_err(|e| Error::IO(io::Error::new(io::ErrorKind::Other, e)))?;
                    let consumed = (compress.total_in() - before_in) as usize;
                    let produced = (compress.total_out() - before_out) as usize;
                    if consumed == 0 && produced == 0 {
                        return Err(Error::IO(io::Error::new(
                            io::ErrorKind::Other,
                            "deflate made no progress",
                        )));
                    }
                    self.sink.write_all(&out[..produced]).map_err(Error::IO)?;
                    self.written += produced as u64;
                    p.compressed += produced as u64;
                    input = &input[consumed..];
                }
                Ok(())
            }
            Compressor::Custom(encoder) => {
                let mut out = Vec::new();
                encoder.compress(data, &mut out)?;
                self.sink.write_all(&out).map_err(Error::IO)?;
                self.written += out.len() as u64;
                p.compressed += out.len() as u64;
                Ok(())
            }
        }
    }

    fn finish_entry(&mut self, p: &mut InProgress) -> Result<(), Error> {
        // flush the compressor's tail
        match &mut p.compressor {
            Compressor::Store => {}
            Compressor::Deflate(compress) => {
                let mut out = [0u8; 32 * 1024];
                loop {
                    let before_out = compress.total_out();
                    let status = compress
                        .compress(&[], &mut out, FlushCompress::Finish)
                        .map_err(|e| Error::IO(io::Error::new(io::ErrorKind::Other, e)))?;
                    let produced = (compress.total_out() - before_out) as usize;
                    self.sink.write_all(&out[..produced]).map_err(Error::IO)?;
                    self.written += produced as u64;
                    p.compressed += produced as u64;
                    if status == Status::StreamEnd {
                        break;
                    }
                }
            }
            Compressor::Custom(encoder) => {
                let mut out = Vec::new();
                encoder.finish(&mut out)?;
                self.sink.write_all(&out).map_err(Error::IO)?;
                self.written += out.len() as u64;
                p.compressed += out.len() as u64;
            }
        }

        let crc32 = std::mem::take(&mut p.hasher).finalize();

        if let Some((declared_size, declared_crc)) = p.declared {
            if declared_size != p.uncompressed {
                return Err(FormatError::WrongSize {
                    expected: declared_size,
                    actual: p.uncompressed,
                }
                .into());
            }
            if declared_crc != crc32 {
                return Err(FormatError::WrongChecksum {
                    expected: declared_crc,
                    actual: crc32,
                }
                .into());
            }
        }

        if !p.zip64 && (p.compressed >= U32_MAX_MARKER || p.uncompressed >= U32_MAX_MARKER) {
            return Err(FormatError::Zip64Required { what: "entry size" }.into());
        }

        if p.use_descriptor {
            let descriptor = DataDescriptorRecord {
                crc32,
                compressed_size: p.compressed,
                uncompressed_size: p.uncompressed,
            };
            let mut buf = Vec::with_capacity(24);
            descriptor.write_to(&mut buf, p.zip64);
            self.emit(&buf)?;
        } else if p.needs_patch {
            if p.zip64 {
                self.patch(p.crc_field_offset, &crc32.to_le_bytes())?;
                let mut sizes = Vec::with_capacity(16);
                sizes.extend_from_slice(&p.uncompressed.to_le_bytes());
                sizes.extend_from_slice(&p.compressed.to_le_bytes());
                let offset = p.zip64_sizes_offset.expect("zip64 entries record it");
                self.patch(offset, &sizes)?;
            } else {
                let mut fields = Vec::with_capacity(12);
                fields.extend_from_slice(&crc32.to_le_bytes());
                fields.extend_from_slice(&(p.compressed as u32).to_le_bytes());
                fields.extend_from_slice(&(p.uncompressed as u32).to_le_bytes());
                self.patch(p.crc_field_offset, &fields)?;
            }
        }

        p.entry.crc32 = crc32;
        p.entry.compressed_size = p.compressed;
        p.entry.uncompressed_size = p.uncompressed;

        // keep the zip64 extra we attach at finish() consistent with what
        // the entry actually needed
        if p.zip64 {
            for field in &mut p.entry.extra_fields {
                if let ExtraField::Zip64(z) = field {
                    z.uncompressed_size = Some(p.uncompressed);
                    z.compressed_size = Some(p.compressed);
                }
            }
        }

        trace!(
            name = %p.entry.name,
            crc32,
            compressed = p.compressed,
            uncompressed = p.uncompressed,
            "closed entry"
        );
        Ok(())
    }

    /// Copy an already-compressed entry verbatim: the local header carries
    /// the source entry's checksum and sizes, the payload is not touched,
    /// and no data descriptor is written even on a streaming sink.
    ///
    /// This is the re-archival path: pair it with
    /// [SyncEntry::raw_reader](crate::SyncEntry::raw_reader) or a scatter
    /// spill.
    pub fn add_raw_entry(&mut self, entry: &Entry, mut payload: impl Read) -> Result<(), Error> {
        self.check_ready()?;

        let raw_name = if entry.raw_name.is_empty() {
            self.options.encoding.encode(&entry.name)
        } else {
            entry.raw_name.clone()
        };

        let mut flags = entry.flags;
        // sizes are known, so the descriptor has no reason to exist
        flags.set_uses_data_descriptor(false);

        let needs_zip64_sizes = entry.compressed_size >= U32_MAX_MARKER
            || entry.uncompressed_size >= U32_MAX_MARKER;
        let zip64 = match self.options.zip64 {
            Zip64Policy::Always => true,
            Zip64Policy::AsNeeded => needs_zip64_sizes,
            Zip64Policy::Never => {
                if needs_zip64_sizes {
                    return Err(FormatError::Zip64Required { what: "entry size" }.into());
                }
                false
            }
        };

        let mut extra_fields: Vec<ExtraField> = entry
            .extra_fields
            .iter()
            .filter(|f| !matches!(f, ExtraField::Zip64(_)))
            .cloned()
            .collect();
        if zip64 {
            extra_fields.push(ExtraField::Zip64(Zip64ExtraField {
                uncompressed_size: Some(entry.uncompressed_size),
                compressed_size: Some(entry.compressed_size),
                header_offset: None,
                disk_start: None,
            }));
        }

        let reader_version = Version {
            host_system: HostSystem::MsDos,
            version: if zip64 {
                Version::NEEDED_ZIP64
            } else {
                Version::NEEDED_BASELINE
            },
        };

        let header_offset = self.written;
        let lfh = LocalFileHeaderRecord {
            reader_version,
            flags,
            method: entry.method,
            modified: MsdosTimestamp::from_datetime(entry.modified),
            crc32: entry.crc32,
            compressed_size: if zip64 {
                U32_MAX_MARKER as u32
            } else {
                entry.compressed_size as u32
            },
            uncompressed_size: if zip64 {
                U32_MAX_MARKER as u32
            } else {
                entry.uncompressed_size as u32
            },
            name: ZipString(raw_name.clone()),
            extra: ZipBytes(merge_local(&extra_fields)),
        };
        let mut buf = Vec::with_capacity(128);
        lfh.write_to(&mut buf);
        self.emit(&buf)?;

        // splice the payload through, and insist on every declared byte
        let mut remaining = entry.compressed_size;
        let mut chunk = [0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(chunk.len() as u64) as usize;
            let n = match payload.read(&mut chunk[..want]) {
                Ok(0) => {
                    self.state = WriterState::Failed;
                    return Err(FormatError::Truncated.into());
                }
                Ok(n) => n,
                Err(e) => {
                    self.state = WriterState::Failed;
                    return Err(Error::IO(e));
                }
            };
            self.emit(&chunk[..n])?;
            remaining -= n as u64;
        }

        let mut central_entry = entry.clone();
        central_entry.raw_name = raw_name;
        central_entry.flags = flags;
        central_entry.header_offset = header_offset;
        central_entry.reader_version = reader_version;
        central_entry.extra_fields = extra_fields;
        central_entry.is_zip64 = zip64;
        self.central.push(central_entry);
        Ok(())
    }

    /// Write the central directory, the zip64 records when needed, and the
    /// end of central directory record, then give the sink back.
    pub fn finish(mut self) -> Result<S, Error> {
        self.check_ready()?;

        let always64 = self.options.zip64 == Zip64Policy::Always;
        let cd_offset = self.written;

        let central = std::mem::take(&mut self.central);
        for entry in &central {
            let needs_uncomp = always64 || entry.uncompressed_size >= U32_MAX_MARKER;
            let needs_comp = always64 || entry.compressed_size >= U32_MAX_MARKER;
            let needs_offset = always64 || entry.header_offset >= U32_MAX_MARKER;

            if self.options.zip64 == Zip64Policy::Never && needs_offset {
                return Err(FormatError::Zip64Required {
                    what: "local header offset",
                }
                .into());
            }

            let mut extra_fields: Vec<ExtraField> = entry
                .extra_fields
                .iter()
                .filter(|f| !matches!(f, ExtraField::Zip64(_)))
                .cloned()
                .collect();
            if needs_uncomp || needs_comp || needs_offset {
                extra_fields.push(ExtraField::Zip64(Zip64ExtraField {
                    uncompressed_size: needs_uncomp.then_some(entry.uncompressed_size),
                    compressed_size: needs_comp.then_some(entry.compressed_size),
                    header_offset: needs_offset.then_some(entry.header_offset),
                    disk_start: None,
                }));
            }

            let zip64 = needs_uncomp || needs_comp || needs_offset;
            let version = if zip64 {
                Version::NEEDED_ZIP64
            } else {
                Version::NEEDED_BASELINE
            };
            // unix host in version-made-by, so external attributes are
            // interpreted as unix modes
            let creator_version = Version {
                host_system: HostSystem::Unix,
                version,
            };
            let reader_version = Version {
                host_system: HostSystem::MsDos,
                version,
            };

            let comment = match &entry.comment {
                Some(c) => self.options.encoding.encode(c),
                None => Vec::new(),
            };

            let header = DirectoryHeader {
                creator_version,
                reader_version,
                flags: entry.flags,
                method: entry.method.into(),
                modified: MsdosTimestamp::from_datetime(entry.modified),
                crc32: entry.crc32,
                compressed_size: if needs_comp {
                    U32_MAX_MARKER as u32
                } else {
                    entry.compressed_size as u32
                },
                uncompressed_size: if needs_uncomp {
                    U32_MAX_MARKER as u32
                } else {
                    entry.uncompressed_size as u32
                },
                disk_nbr_start: 0,
                internal_attrs: 0,
                external_attrs: entry.external_attrs,
                header_offset: if needs_offset {
                    U32_MAX_MARKER as u32
                } else {
                    entry.header_offset as u32
                },
                name: ZipString(entry.raw_name.clone()),
                extra: ZipBytes(merge_central(&extra_fields)),
                comment: ZipString(comment),
            };
            let mut buf = Vec::with_capacity(128);
            header.write_to(&mut buf);
            self.emit(&buf)?;
        }

        let cd_size = self.written - cd_offset;
        let records = central.len() as u64;

        let need64 = always64
            || records > 0xFFFF
            || cd_offset >= U32_MAX_MARKER
            || cd_size >= U32_MAX_MARKER;
        if need64 && self.options.zip64 == Zip64Policy::Never {
            return Err(FormatError::Zip64Required {
                what: "central directory",
            }
            .into());
        }

        if need64 {
            let z64_offset = self.written;
            let record = EndOfCentralDirectory64Record {
                record_size: 44,
                creator_version: Version::NEEDED_ZIP64 as u16,
                reader_version: Version::NEEDED_ZIP64 as u16,
                disk_nbr: 0,
                dir_disk_nbr: 0,
                dir_records_this_disk: records,
                directory_records: records,
                directory_size: cd_size,
                directory_offset: cd_offset,
            };
            let mut buf = Vec::with_capacity(76);
            record.write_to(&mut buf);
            let locator = EndOfCentralDirectory64Locator {
                dir_disk_number: 0,
                directory_offset: z64_offset,
                total_disks: 1,
            };
            locator.write_to(&mut buf);
            self.emit(&buf)?;
        }

        let comment = match &self.comment {
            Some(c) => self.options.encoding.encode(c),
            None => Vec::new(),
        };
        let eocd = EndOfCentralDirectoryRecord {
            disk_nbr: 0,
            dir_disk_nbr: 0,
            dir_records_this_disk: records.min(0xFFFF) as u16,
            directory_records: records.min(0xFFFF) as u16,
            directory_size: cd_size.min(U32_MAX_MARKER) as u32,
            directory_offset: cd_offset.min(U32_MAX_MARKER) as u32,
            comment,
        };
        let mut buf = Vec::with_capacity(64);
        eocd.write_to(&mut buf);
        self.emit(&buf)?;

        self.sink.flush().map_err(Error::IO)?;
        self.state = WriterState::Finished;
        Ok(self.sink)
    }
}
