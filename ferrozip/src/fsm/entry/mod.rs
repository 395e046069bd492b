use std::cmp;
use std::sync::Arc;

use oval::Buffer;
use tracing::trace;
use winnow::{
    error::ErrMode,
    stream::{AsBytes, Offset},
    Parser, Partial,
};

mod bit_stream;
mod store_dec;

#[cfg(feature = "deflate")]
mod deflate_dec;

#[cfg(feature = "deflate64")]
mod deflate64_dec;

#[cfg(feature = "bzip2")]
mod bzip2_dec;

#[cfg(feature = "zstd")]
mod zstd_dec;

mod explode;
mod unshrink_dec;

use crate::{
    codec::{default_registry, MethodRegistry},
    encoding::Encoding,
    error::{Error, FormatError, UnsupportedError},
    parse::{DataDescriptorRecord, Entry, LocalFileHeaderRecord, Method, ZipLong},
};

use super::FsmResult;

struct EntryReadMetrics {
    uncompressed_size: u64,
    crc32: u32,
}

#[derive(Default)]
enum State {
    /// Parsing the local file header (and, in streaming mode, building the
    /// [Entry] from it)
    ReadLocalHeader,

    /// Local header is parsed, the decompressor is not built yet. This is a
    /// separate stage so callers can look at the entry (and decide to skip
    /// it) before an unsupported method becomes an error.
    HeaderParsed,

    ReadData {
        /// Total compressed size, None when only the data descriptor knows
        known_size: Option<u64>,

        /// Amount of bytes we've fed to the decompressor
        compressed_bytes: u64,

        /// Amount of bytes the decompressor has produced
        uncompressed_bytes: u64,

        /// CRC32 hash of the decompressed data
        hasher: crc32fast::Hasher,

        /// The decompression method we're using
        decompressor: AnyDecompressor,
    },

    /// Stored entry of unknown size: scanning for a data descriptor
    /// signature followed by a size pair matching the bytes seen so far.
    ScanDataDescriptor {
        /// Amount of payload bytes handed out so far
        uncompressed_bytes: u64,

        /// CRC32 hash of the payload handed out so far
        hasher: crc32fast::Hasher,

        /// Bytes at the buffer front already confirmed to be payload
        pending: usize,
    },

    ReadDataDescriptor {
        /// Size we've decompressed + crc32 hash we've computed
        metrics: EntryReadMetrics,
    },

    Validate {
        /// Size we've decompressed + crc32 hash we've computed
        metrics: EntryReadMetrics,

        /// The data descriptor for this entry, if any
        descriptor: Option<DataDescriptorRecord>,
    },

    #[default]
    Transition,
}

/// A state machine that can parse and decompress a zip entry.
///
/// Construct it with an [Entry] when the central directory has already been
/// read (its sizes and checksum are then authoritative), or with `None` to
/// derive the entry from the local file header (streaming).
///
/// On [FsmResult::Done], the fsm gives back its buffer, which may contain
/// the first bytes of the next record: feed it to the next fsm.
pub struct EntryFsm {
    state: State,
    entry: Option<Entry>,
    /// whether the entry's sizes are trustworthy (from the central
    /// directory, or from a local header without a data descriptor)
    sizes_known: bool,
    registry: Arc<MethodRegistry>,
    fallback_encoding: Encoding,
    allow_stored_dd: bool,
    raw: bool,
    buffer: Buffer,
    eof: bool,
}

impl EntryFsm {
    /// Create a new state machine for reading a zip entry, using the default
    /// method registry.
    pub fn new(entry: Option<Entry>, remain: Option<Buffer>) -> Self {
        Self::with_registry(entry, remain, Arc::clone(default_registry()))
    }

    /// Create a new state machine for reading a zip entry with an explicit
    /// method registry.
    pub fn with_registry(
        entry: Option<Entry>,
        remain: Option<Buffer>,
        registry: Arc<MethodRegistry>,
    ) -> Self {
        let sizes_known = entry.is_some();
        Self {
            state: State::ReadLocalHeader,
            entry,
            sizes_known,
            registry,
            fallback_encoding: Encoding::Cp437,
            allow_stored_dd: false,
            raw: false,
            buffer: match remain {
                Some(remain) => remain,
                None => Buffer::with_capacity(256 * 1024),
            },
            eof: false,
        }
    }

    /// Set the encoding used for names when the UTF-8 flag is absent
    /// (streaming mode only; with a central-directory entry the name is
    /// already decoded).
    pub fn with_fallback_encoding(mut self, encoding: Encoding) -> Self {
        self.fallback_encoding = encoding;
        self
    }

    /// Allow stored entries with a data descriptor and no known size. These
    /// require scanning the payload for the descriptor signature, which can
    /// misfire on payloads that happen to contain it.
    pub fn with_allow_stored_dd(mut self, allow: bool) -> Self {
        self.allow_stored_dd = allow;
        self
    }

    /// Hand out the raw compressed bytes instead of decompressing them.
    /// Validation is skipped; a trailing data descriptor is still consumed.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// Don't expect a local file header: the input starts right at the
    /// entry's payload. Requires an entry.
    ///
    /// This is used by readers that trust the central directory exclusively
    /// and compute the payload offset from it.
    pub fn skipping_local_header(mut self) -> Self {
        assert!(
            self.entry.is_some(),
            "skipping the local header requires an entry"
        );
        self.state = State::HeaderParsed;
        self
    }

    /// The entry being read, if known yet. In streaming mode this becomes
    /// available once the local file header is parsed, cf.
    /// [Self::process_till_header].
    pub fn entry(&self) -> Option<&Entry> {
        self.entry.as_ref()
    }

    /// Whether the unread buffered bytes start with a central directory (or
    /// end of central directory) signature, which in a streaming read means
    /// there are no entries left.
    pub fn at_directory_boundary(&self) -> bool {
        match ZipLong::get(self.buffer.data(), 0) {
            Some(sig) => {
                sig == ZipLong::CENTRAL_FILE_HEADER || sig == ZipLong::END_OF_CENTRAL_DIRECTORY
            }
            None => false,
        }
    }

    /// Whether the buffer holds no unread bytes.
    pub fn is_buffer_empty(&self) -> bool {
        self.buffer.available_data() == 0
    }

    /// How many unread bytes the buffer holds.
    pub fn buffered(&self) -> usize {
        self.buffer.available_data()
    }

    /// The first segment of a split archive opens with a lone
    /// `PK\x07\x08` marker before the first local file header. If the
    /// buffer starts with one, consume it and report true.
    ///
    /// Only meaningful before any header has been parsed.
    pub fn skip_leading_split_marker(&mut self) -> bool {
        if ZipLong::get(self.buffer.data(), 0) == Some(ZipLong::DATA_DESCRIPTOR) {
            self.buffer.consume(ZipLong::SIZE);
            true
        } else {
            false
        }
    }

    /// Process buffered data until the local file header is parsed, and
    /// return the entry built from it. Returns `Ok(None)` if more input is
    /// needed.
    ///
    /// Unlike [Self::process], this never builds a decompressor, so it
    /// succeeds even for methods this build cannot decode - the caller gets
    /// to inspect the entry and decide.
    pub fn process_till_header(&mut self) -> Result<Option<&Entry>, Error> {
        if matches!(self.state, State::ReadLocalHeader) && !self.parse_local_header()? {
            return Ok(None);
        }
        Ok(self.entry.as_ref())
    }

    /// In `ReadLocalHeader`, try parsing the header. Returns whether it was
    /// parsed (false: needs more input).
    fn parse_local_header(&mut self) -> Result<bool, Error> {
        let mut input = Partial::new(self.buffer.data());
        match LocalFileHeaderRecord::parser.parse_next(&mut input) {
            Ok(header) => {
                let consumed = input.as_bytes().offset_from(&self.buffer.data());
                trace!(local_file_header = ?header, consumed, "parsed local file header");
                self.buffer.consume(consumed);

                if self.entry.is_none() {
                    // streaming: all we know comes from the local header.
                    // With a data descriptor, the sizes are only
                    // trustworthy if the writer filled them in anyway
                    // (zero and the zip64 saturation marker mean it
                    // didn't)
                    self.sizes_known = !header.has_data_descriptor()
                        || (header.compressed_size != 0 && header.compressed_size != !0u32);
                    self.entry = Some(header.as_entry(self.fallback_encoding)?);
                }
                self.state = State::HeaderParsed;
                Ok(true)
            }
            Err(ErrMode::Incomplete(_)) => Ok(false),
            Err(_e) => Err(Error::Format(FormatError::InvalidLocalHeader)),
        }
    }

    /// Build the decompressor and move to the payload-reading state.
    fn start_reading_data(&mut self) -> Result<(), Error> {
        let entry = self.entry.as_ref().expect("entry is known by now");

        if entry.is_encrypted() {
            return Err(UnsupportedError::Encryption.into());
        }

        let known_size = if self.sizes_known {
            Some(entry.compressed_size)
        } else {
            None
        };

        if known_size.is_none() {
            if self.raw {
                // we were asked to skip or re-emit this entry verbatim, but
                // nothing tells us where it ends
                return Err(FormatError::Truncated.into());
            }
            if matches!(entry.method, Method::Store) {
                if !self.allow_stored_dd {
                    return Err(UnsupportedError::DataDescriptor.into());
                }
                self.state = State::ScanDataDescriptor {
                    uncompressed_bytes: 0,
                    hasher: crc32fast::Hasher::new(),
                    pending: 0,
                };
                return Ok(());
            }
        }

        let decompressor = if self.raw {
            AnyDecompressor::Store(Default::default())
        } else {
            AnyDecompressor::new(entry.method, entry, &self.registry)?
        };

        self.state = State::ReadData {
            known_size,
            compressed_bytes: 0,
            uncompressed_bytes: 0,
            hasher: crc32fast::Hasher::new(),
            decompressor,
        };
        Ok(())
    }

    /// If this returns true, the caller should read data into
    /// [Self::space] — without forgetting to call [Self::fill] with the
    /// number of bytes written.
    pub fn wants_read(&self) -> bool {
        match self.state {
            State::ReadLocalHeader => true,
            State::HeaderParsed => false,
            State::ReadData { .. } | State::ScanDataDescriptor { .. } => {
                self.buffer.available_space() > 0
            }
            State::ReadDataDescriptor { .. } => true,
            State::Validate { .. } => false,
            State::Transition => unreachable!(),
        }
    }

    /// Process the input and write the output to the given buffer
    ///
    /// This function will return `FsmResult::Continue` if it needs more input
    /// to continue, or if it needs more space to write to. It will return
    /// `FsmResult::Done` when all the input has been decompressed and all
    /// the output has been written, giving back the buffer (which may hold
    /// the first bytes of the next record).
    ///
    /// Also, after writing all the output, process will read the data
    /// descriptor (if any), and make sure the CRC32 hash and the uncompressed
    /// size match the expected values.
    pub fn process(
        mut self,
        out: &mut [u8],
    ) -> Result<FsmResult<(Self, DecompressOutcome), Buffer>, Error> {
        use State as S;
        match &mut self.state {
            S::ReadLocalHeader => {
                if self.parse_local_header()? {
                    self.process(out)
                } else {
                    Ok(FsmResult::Continue((self, Default::default())))
                }
            }
            S::HeaderParsed => {
                self.start_reading_data()?;
                self.process(out)
            }
            S::ReadData {
                known_size,
                compressed_bytes,
                uncompressed_bytes,
                hasher,
                decompressor,
            } => {
                let in_buf = self.buffer.data();

                // don't feed the decompressor bytes beyond the entry's compressed size
                let in_buf_max_len = match *known_size {
                    Some(size) => cmp::min(in_buf.len(), (size - *compressed_bytes) as usize),
                    None => in_buf.len(),
                };
                let in_buf = &in_buf[..in_buf_max_len];

                let has_more_input = match *known_size {
                    Some(size) => {
                        if *compressed_bytes + in_buf.len() as u64 == size {
                            HasMoreInput::No
                        } else {
                            HasMoreInput::Yes
                        }
                    }
                    None => {
                        if self.eof {
                            HasMoreInput::No
                        } else {
                            HasMoreInput::Yes
                        }
                    }
                };

                let outcome = decompressor.decompress(in_buf, out, has_more_input)?;
                trace!(
                    ?outcome,
                    compressed_bytes = *compressed_bytes,
                    uncompressed_bytes = *uncompressed_bytes,
                    eof = self.eof,
                    "decompressed"
                );
                self.buffer.consume(outcome.bytes_read);
                *compressed_bytes += outcome.bytes_read as u64;

                // write the decompressed data to the hasher
                hasher.update(&out[..outcome.bytes_written]);
                // update the number of bytes we've decompressed
                *uncompressed_bytes += outcome.bytes_written as u64;

                let complete = match *known_size {
                    Some(size) => *compressed_bytes == size && outcome.bytes_written == 0,
                    None => outcome.done && outcome.bytes_written == 0,
                };

                if complete {
                    // we're done, let's read the data descriptor (if there's one)
                    transition!(self.state => (S::ReadData { uncompressed_bytes, hasher, .. }) {
                        let metrics = EntryReadMetrics {
                            uncompressed_size: uncompressed_bytes,
                            crc32: hasher.finalize(),
                        };

                        if self.entry.as_ref().unwrap().has_data_descriptor() {
                            S::ReadDataDescriptor { metrics }
                        } else {
                            S::Validate { metrics, descriptor: None }
                        }
                    });
                    return self.process(out);
                }

                if self.eof && outcome.bytes_read == 0 && outcome.bytes_written == 0 {
                    // the input ended before the entry did
                    return Err(FormatError::Truncated.into());
                }

                Ok(FsmResult::Continue((self, outcome)))
            }
            S::ScanDataDescriptor {
                uncompressed_bytes,
                hasher,
                pending,
            } => {
                if *pending > 0 {
                    let n = cmp::min(
                        cmp::min(*pending, out.len()),
                        self.buffer.available_data(),
                    );
                    if n == 0 {
                        // either the caller gave us no space, or we need a refill
                        return Ok(FsmResult::Continue((self, Default::default())));
                    }
                    out[..n].copy_from_slice(&self.buffer.data()[..n]);
                    hasher.update(&out[..n]);
                    *uncompressed_bytes += n as u64;
                    *pending -= n;
                    self.buffer.consume(n);
                    let outcome = DecompressOutcome {
                        bytes_read: n,
                        bytes_written: n,
                        done: false,
                    };
                    return Ok(FsmResult::Continue((self, outcome)));
                }

                let is_zip64 = self.entry.as_ref().unwrap().is_zip64;
                let descriptor_len = if is_zip64 { 24 } else { 16 };
                let data = self.buffer.data();

                let mut search_from = 0;
                loop {
                    match find_signature(data, search_from) {
                        None => {
                            if self.eof {
                                return Err(FormatError::Truncated.into());
                            }
                            // everything but a possible partial signature at
                            // the tail is payload
                            if data.len() > 3 {
                                *pending = data.len() - 3;
                                return self.process(out);
                            }
                            return Ok(FsmResult::Continue((self, Default::default())));
                        }
                        Some(pos) => {
                            if data.len() < pos + descriptor_len {
                                if self.eof {
                                    return Err(FormatError::Truncated.into());
                                }
                                // bytes before the first signature are payload
                                // either way; hold the candidate until we can
                                // see all of it
                                if pos > 0 {
                                    *pending = pos;
                                    return self.process(out);
                                }
                                return Ok(FsmResult::Continue((self, Default::default())));
                            }

                            let (_, descriptor) = DataDescriptorRecord::mk_parser(is_zip64)
                                .parse_peek(Partial::new(&data[pos..pos + descriptor_len]))
                                .map_err(|_| FormatError::InvalidDataDescriptor)?;

                            // a real descriptor carries the sizes of
                            // everything before it AND the checksum of
                            // those bytes; anything less is payload that
                            // happens to contain the signature
                            let payload_total = *uncompressed_bytes + pos as u64;
                            let consistent = descriptor.compressed_size == payload_total
                                && descriptor.uncompressed_size == payload_total
                                && descriptor.crc32 == {
                                    let mut candidate_crc = hasher.clone();
                                    candidate_crc.update(&data[..pos]);
                                    candidate_crc.finalize()
                                };
                            if !consistent {
                                // false positive: the signature bytes are payload
                                search_from = pos + 1;
                                continue;
                            }

                            if pos > 0 {
                                *pending = pos;
                                return self.process(out);
                            }

                            self.buffer.consume(descriptor_len);
                            transition!(self.state => (S::ScanDataDescriptor { uncompressed_bytes, hasher, .. }) {
                                let metrics = EntryReadMetrics {
                                    uncompressed_size: uncompressed_bytes,
                                    crc32: hasher.finalize(),
                                };
                                S::Validate { metrics, descriptor: Some(descriptor) }
                            });
                            return self.process(out);
                        }
                    }
                }
            }
            S::ReadDataDescriptor { .. } => {
                let is_zip64 = self.entry.as_ref().unwrap().is_zip64;
                let mut input = Partial::new(self.buffer.data());
                match DataDescriptorRecord::mk_parser(is_zip64).parse_next(&mut input) {
                    Ok(descriptor) => {
                        self.buffer
                            .consume(input.as_bytes().offset_from(&self.buffer.data()));
                        trace!(?descriptor, "data descriptor");
                        transition!(self.state => (S::ReadDataDescriptor { metrics }) {
                            S::Validate { metrics, descriptor: Some(descriptor) }
                        });
                        self.process(out)
                    }
                    Err(ErrMode::Incomplete(_)) => {
                        if self.eof {
                            return Err(FormatError::Truncated.into());
                        }
                        Ok(FsmResult::Continue((self, Default::default())))
                    }
                    Err(_e) => Err(Error::Format(FormatError::InvalidDataDescriptor)),
                }
            }
            S::Validate {
                metrics,
                descriptor,
            } => {
                if self.raw {
                    // raw mode: the caller wanted the bytes, not our opinion
                    return Ok(FsmResult::Done(self.buffer));
                }

                let entry = self.entry.as_ref().unwrap();

                let expected_crc32 = if entry.crc32 != 0 {
                    entry.crc32
                } else if let Some(descriptor) = descriptor.as_ref() {
                    descriptor.crc32
                } else {
                    0
                };

                let expected_size = if entry.uncompressed_size != 0 {
                    entry.uncompressed_size
                } else if let Some(descriptor) = descriptor.as_ref() {
                    descriptor.uncompressed_size
                } else {
                    0
                };

                if expected_size != metrics.uncompressed_size {
                    return Err(Error::Format(FormatError::WrongSize {
                        expected: expected_size,
                        actual: metrics.uncompressed_size,
                    }));
                }

                if expected_crc32 != 0 && expected_crc32 != metrics.crc32 {
                    return Err(Error::Format(FormatError::WrongChecksum {
                        expected: expected_crc32,
                        actual: metrics.crc32,
                    }));
                }

                Ok(FsmResult::Done(self.buffer))
            }
            S::Transition => {
                unreachable!("the state machine should never be in the transition state")
            }
        }
    }

    /// Returns a mutable slice with all the available space to write to.
    ///
    /// After writing to this, call [Self::fill] with the number of bytes written.
    #[inline]
    pub fn space(&mut self) -> &mut [u8] {
        if self.buffer.available_space() == 0 {
            self.buffer.shift();
        }
        self.buffer.space()
    }

    /// After having written data to [Self::space], call this to indicate how
    /// many bytes were written.
    ///
    /// If this is called with zero, it indicates eof
    #[inline]
    pub fn fill(&mut self, count: usize) -> usize {
        if count == 0 {
            self.eof = true;
        }
        self.buffer.fill(count)
    }
}

/// Position of the next data descriptor signature at or after `from`.
fn find_signature(data: &[u8], from: usize) -> Option<usize> {
    let sig = ZipLong::DATA_DESCRIPTOR.bytes();
    data.get(from..)?
        .windows(4)
        .position(|w| w == sig)
        .map(|p| p + from)
}

enum AnyDecompressor {
    Store(store_dec::StoreDec),
    #[cfg(feature = "deflate")]
    Deflate(Box<deflate_dec::DeflateDec>),
    Explode(Box<explode::ExplodeDec>),
    Unshrink(Box<unshrink_dec::UnshrinkDec>),
    #[cfg(feature = "deflate64")]
    Deflate64(Box<deflate64_dec::Deflate64Dec>),
    #[cfg(feature = "bzip2")]
    Bzip2(bzip2_dec::Bzip2Dec),
    #[cfg(feature = "zstd")]
    Zstd(zstd_dec::ZstdDec),
    Custom(Box<dyn Decompressor>),
}

/// What a decompressor did with the bytes it was given.
#[derive(Default, Debug)]
pub struct DecompressOutcome {
    /// Number of bytes read from input
    pub bytes_read: usize,

    /// Number of bytes written to output
    pub bytes_written: usize,

    /// Whether the decompressor saw the end of its stream. Decoders that
    /// can't tell (like Store) leave this false; the entry's compressed
    /// size bounds them instead.
    pub done: bool,
}

/// Whether more compressed bytes will follow the ones passed to
/// [Decompressor::decompress].
pub enum HasMoreInput {
    /// There is (or may be) more input.
    Yes,
    /// The input passed in this call is the last of it.
    No,
}

/// Incremental decompression: called repeatedly with compressed input,
/// writing decompressed output, until the stream ends.
pub trait Decompressor {
    /// Consume some of `in_buf`, write some of the result into `out`, and
    /// report both counts. A `(0, 0)` outcome means the decompressor needs
    /// either more input or a bigger output buffer.
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error>;
}

impl AnyDecompressor {
    fn new(method: Method, entry: &Entry, registry: &MethodRegistry) -> Result<Self, Error> {
        let dec = match method {
            Method::Store => Self::Store(Default::default()),

            #[cfg(feature = "deflate")]
            Method::Deflate => Self::Deflate(Default::default()),
            #[cfg(not(feature = "deflate"))]
            Method::Deflate => return Self::from_registry_or(method, entry, registry, true),

            Method::Implode => Self::Explode(Box::new(explode::ExplodeDec::from_flags(
                entry.flags,
            )?)),

            Method::Shrink => Self::Unshrink(Box::new(unshrink_dec::UnshrinkDec::new())),

            #[cfg(feature = "deflate64")]
            Method::Deflate64 => Self::Deflate64(Default::default()),
            #[cfg(not(feature = "deflate64"))]
            Method::Deflate64 => return Self::from_registry_or(method, entry, registry, true),

            #[cfg(feature = "bzip2")]
            Method::Bzip2 => Self::Bzip2(Default::default()),
            #[cfg(not(feature = "bzip2"))]
            Method::Bzip2 => return Self::from_registry_or(method, entry, registry, true),

            #[cfg(feature = "zstd")]
            Method::Zstd => Self::Zstd(zstd_dec::ZstdDec::new()?),
            #[cfg(not(feature = "zstd"))]
            Method::Zstd => return Self::from_registry_or(method, entry, registry, true),

            _ => return Self::from_registry_or(method, entry, registry, false),
        };
        Ok(dec)
    }

    /// Fall back to the registry; `enableable` distinguishes "turn a cargo
    /// feature on" from "this crate will never decode that".
    fn from_registry_or(
        method: Method,
        entry: &Entry,
        registry: &MethodRegistry,
        enableable: bool,
    ) -> Result<Self, Error> {
        match registry.lookup(method) {
            Some(factory) => Ok(Self::Custom(factory.make_decoder(entry)?)),
            None if enableable => Err(Error::method_not_enabled(method)),
            None => Err(Error::method_not_supported(method)),
        }
    }
}

impl Decompressor for AnyDecompressor {
    #[inline]
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        // forward to the appropriate decompressor
        match self {
            Self::Store(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "deflate")]
            Self::Deflate(dec) => dec.decompress(in_buf, out, has_more_input),
            Self::Explode(dec) => dec.decompress(in_buf, out, has_more_input),
            Self::Unshrink(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "deflate64")]
            Self::Deflate64(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "zstd")]
            Self::Zstd(dec) => dec.decompress(in_buf, out, has_more_input),
            Self::Custom(dec) => dec.decompress(in_buf, out, has_more_input),
        }
    }
}
