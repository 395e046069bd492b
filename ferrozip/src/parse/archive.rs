use chrono::{offset::Utc, DateTime, TimeZone};
use std::collections::HashMap;

use crate::{
    encoding::Encoding,
    parse::{zero_datetime, ExtraField, GeneralPurposeBit, Mode, UnixMode, Version},
};

/// An Archive contains general information about a zip file, along with a list
/// of [entries][Entry].
///
/// It is obtained by mounting a seekable source through a state machine like
/// [ArchiveFsm](crate::fsm::ArchiveFsm), although end-users tend to use the
/// higher-level interfaces in ferrozip-sync.
pub struct Archive {
    pub(crate) size: u64,
    pub(crate) encoding: Encoding,
    pub(crate) entries: Vec<Entry>,
    pub(crate) comment: Option<String>,
    pub(crate) name_index: HashMap<String, Vec<usize>>,
}

impl Archive {
    pub(crate) fn new(
        size: u64,
        encoding: Encoding,
        entries: Vec<Entry>,
        comment: Option<String>,
    ) -> Self {
        let mut name_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            name_index.entry(entry.name.clone()).or_default().push(i);
        }
        Self {
            size,
            encoding,
            entries,
            comment,
            name_index,
        }
    }

    /// The size of .zip file that was read, in bytes.
    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Iterate over all files in this zip, in central directory order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Iterate over all files in this zip, sorted by the offset of their
    /// local file header (the order the payloads appear in the container).
    pub fn entries_in_physical_order(&self) -> impl Iterator<Item = &Entry> {
        let mut sorted: Vec<&Entry> = self.entries.iter().collect();
        sorted.sort_by_key(|e| e.header_offset);
        sorted.into_iter()
    }

    /// Attempts to look up an entry by name. Names aren't necessarily unique
    /// (nor normalized) in zip archives; this returns the first match in
    /// central directory order. See [Self::entries_named] for all of them.
    pub fn by_name<N: AsRef<str>>(&self, name: N) -> Option<&Entry> {
        self.name_index
            .get(name.as_ref())
            .and_then(|v| v.first())
            .map(|&i| &self.entries[i])
    }

    /// All entries carrying the given name, in central directory order.
    pub fn entries_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Entry> + 'a {
        self.name_index
            .get(name)
            .map(|v| &v[..])
            .unwrap_or_default()
            .iter()
            .map(move |&i| &self.entries[i])
    }

    /// Returns the detected character encoding for text fields
    /// (names, comments) inside this zip archive.
    #[inline(always)]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Returns the comment for this archive, if any. When reading
    /// a zip file with an empty comment field, this will return None.
    #[inline(always)]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

/// Describes a zip archive entry (a file, a directory, a symlink)
#[derive(Clone)]
pub struct Entry {
    /// Name of the file
    ///
    /// This should be a relative path, separated by `/`. However, there are
    /// zip files in the wild with all sorts of evil variants (absolute
    /// paths, `..` traversals), so, be conservative in what you accept.
    pub name: String,

    /// The name bytes exactly as stored in the archive, before any decoding.
    pub raw_name: Vec<u8>,

    /// Compression method: Store, Deflate, Implode, etc.
    pub method: Method,

    /// Comment is any arbitrary user-defined string shorter than 64KiB
    pub comment: Option<String>,

    /// This entry's "last modified" timestamp - with caveats
    ///
    /// Due to the history of the ZIP file format, this may be inaccurate. It may be offset
    /// by a few hours, if there is no extended timestamp information. It may have a resolution
    /// as low as two seconds, if only MSDOS timestamps are present. It may default to the Unix
    /// epoch, if something went really wrong.
    ///
    /// If you're reading this after the year 2038, or after the year 2108, godspeed.
    pub modified: DateTime<Utc>,

    /// This entry's "created" timestamp, if available.
    ///
    /// See [Self::modified] for caveats.
    pub created: Option<DateTime<Utc>>,

    /// This entry's "last accessed" timestamp, if available.
    ///
    /// See [Self::modified] for caveats.
    pub accessed: Option<DateTime<Utc>>,

    /// Offset of the local file header in the zip file
    ///
    /// ```text
    /// [optional non-zip data]
    /// [local file header 1] <------ header_offset points here
    /// [encryption header 1]
    /// [file data 1]
    /// [data descriptor 1]
    /// ...
    /// [central directory]
    /// [optional zip64 end of central directory info]
    /// [end of central directory record]
    /// ```
    pub header_offset: u64,

    /// Version of zip needed to extract this archive.
    pub reader_version: Version,

    /// General purpose bit flag
    ///
    /// The most noteworthy bits: 11 for UTF-8 names, 3 for a trailing data
    /// descriptor, 0 for encryption (which this crate detects but does not
    /// support).
    pub flags: GeneralPurposeBit,

    /// Unix user ID
    ///
    /// Only present if an Asi or New Unix extra field was found.
    pub uid: Option<u32>,

    /// Unix group ID
    ///
    /// Only present if an Asi or New Unix extra field was found.
    pub gid: Option<u32>,

    /// CRC-32 hash as found in the central directory.
    ///
    /// Note that this may be zero, and the actual CRC32 might be in the local header, or (more
    /// commonly) in the data descriptor instead.
    pub crc32: u32,

    /// Size in bytes, after compression
    pub compressed_size: u64,

    /// Size in bytes, before compression
    ///
    /// This will be zero for directories.
    pub uncompressed_size: u64,

    /// File mode.
    pub mode: Mode,

    /// Target path, if the entry is a symlink described by an Asi extra
    /// field.
    pub link_target: Option<String>,

    /// The entry's extra fields, in the order they were stored.
    pub extra_fields: Vec<ExtraField>,

    /// Whether any size or offset of this entry required zip64 fields.
    pub is_zip64: bool,

    /// External attributes, as stored in the central directory.
    pub external_attrs: u32,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            name: String::new(),
            raw_name: Vec::new(),
            method: Method::Store,
            comment: None,
            modified: zero_datetime(),
            created: None,
            accessed: None,
            header_offset: 0,
            reader_version: Version {
                host_system: crate::parse::HostSystem::Unix,
                version: Version::NEEDED_BASELINE,
            },
            flags: GeneralPurposeBit::default(),
            uid: None,
            gid: None,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            mode: Mode(0),
            link_target: None,
            extra_fields: Vec::new(),
            is_zip64: false,
            external_attrs: 0,
        }
    }
}

impl Entry {
    /// Whether the entry is encrypted. This crate refuses to decode
    /// encrypted entries.
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.flags.uses_encryption()
    }

    /// Whether a data descriptor trails this entry's payload.
    #[inline]
    pub fn has_data_descriptor(&self) -> bool {
        self.flags.uses_data_descriptor()
    }

    /// Apply an extra field to the entry, updating its metadata.
    ///
    /// The Unicode path/comment overrides are not handled here: they need
    /// the raw name and comment bytes, which live with the header records.
    pub(crate) fn set_extra_field(&mut self, ef: &ExtraField) {
        match ef {
            ExtraField::Zip64(z64) => {
                if let Some(n) = z64.uncompressed_size {
                    self.uncompressed_size = n;
                }
                if let Some(n) = z64.compressed_size {
                    self.compressed_size = n;
                }
                if let Some(n) = z64.header_offset {
                    self.header_offset = n;
                }
            }
            ExtraField::Timestamp(ts) => {
                if let Some(mtime) = ts.mtime {
                    self.modified = Utc
                        .timestamp_opt(mtime as i64, 0)
                        .single()
                        .unwrap_or_else(zero_datetime);
                }
                if let Some(atime) = ts.atime {
                    self.accessed = Utc.timestamp_opt(atime as i64, 0).single();
                }
                if let Some(ctime) = ts.ctime {
                    self.created = Utc.timestamp_opt(ctime as i64, 0).single();
                }
            }
            ExtraField::Ntfs(nf) => {
                for attr in &nf.attrs {
                    // note: other attributes are unsupported
                    if let crate::parse::NtfsAttr::Attr1(attr) = attr {
                        self.modified = attr.mtime.to_datetime().unwrap_or_else(zero_datetime);
                        self.created = attr.ctime.and_then(|t| t.to_datetime());
                        self.accessed = attr.atime.and_then(|t| t.to_datetime());
                    }
                }
            }
            ExtraField::Asi(asi) => {
                self.uid = Some(asi.uid as u32);
                self.gid = Some(asi.gid as u32);
                self.mode = UnixMode(asi.unix_mode() as u32).into();
                if asi.is_link() {
                    self.link_target = Some(asi.link_target.clone());
                }
            }
            ExtraField::NewUnix(uf) => {
                self.uid = Some(uf.uid as u32);
                self.gid = Some(uf.gid as u32);
            }
            _ => {}
        };
    }
}

/// The entry's file type: a directory, a file, or a symbolic link.
#[derive(Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// The entry is a directory
    Directory,

    /// The entry is a file
    File,

    /// The entry is a symbolic link
    Symlink,
}

impl Entry {
    /// Determine the kind of this entry based on its mode.
    pub fn kind(&self) -> EntryKind {
        if self.mode.has(Mode::SYMLINK) {
            EntryKind::Symlink
        } else if self.mode.has(Mode::DIR) {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }
}

/// Compression method used for a file entry.
///
/// In archives that follow [ISO/IEC 21320-1:2015](https://www.iso.org/standard/60101.html), only
/// [Store][Method::Store] and [Deflate][Method::Deflate] should be used.
///
/// However, in the wild, it is not too uncommon to encounter legacy
/// [Shrink][Method::Shrink] and [Implode][Method::Implode] entries, or
/// [Bzip2][Method::Bzip2], [Lzma][Method::Lzma] and others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// No compression is applied
    Store,

    /// PKZIP's LZW variant, decoded by unshrinking
    Shrink,

    /// PKZIP's pre-deflate dictionary compression, decoded by exploding
    Implode,

    /// [DEFLATE (RFC 1951)](https://www.ietf.org/rfc/rfc1951.txt)
    Deflate,

    /// [DEFLATE64](https://deflate64.com/)
    Deflate64,

    /// [BZIP-2](https://github.com/dsnet/compress/blob/master/doc/bzip2-format.pdf)
    Bzip2,

    /// [LZMA](https://github.com/jljusten/LZMA-SDK/blob/master/DOC/lzma-specification.txt)
    Lzma,

    /// [zstd](https://datatracker.ietf.org/doc/html/rfc8878), the method id
    /// briefly assigned to it and later deprecated
    ZstdDeprecated,

    /// [zstd](https://datatracker.ietf.org/doc/html/rfc8878)
    Zstd,

    /// [MP3](https://www.iso.org/obp/ui/#iso:std:iso-iec:11172:-3:ed-1:v1:en)
    Mp3,

    /// [XZ](https://tukaani.org/xz/xz-file-format.txt)
    Xz,

    /// [JPEG](https://jpeg.org/jpeg/)
    Jpeg,

    /// [WavPack](https://www.wavpack.com/)
    WavPack,

    /// [PPMd](https://en.wikipedia.org/wiki/Prediction_by_partial_matching)
    Ppmd,

    /// AE-x encryption marker (see Appendix E of appnote)
    Aex,

    /// A compression method that isn't recognized by this crate.
    Unrecognized(u16),
}

impl Method {
    const STORE: u16 = 0;
    const SHRINK: u16 = 1;
    const IMPLODE: u16 = 6;
    const DEFLATE: u16 = 8;
    const DEFLATE64: u16 = 9;
    const BZIP2: u16 = 12;
    const LZMA: u16 = 14;
    const ZSTD_DEPRECATED: u16 = 20;
    const ZSTD: u16 = 93;
    const MP3: u16 = 94;
    const XZ: u16 = 95;
    const JPEG: u16 = 96;
    const WAV_PACK: u16 = 97;
    const PPMD: u16 = 98;
    const AEX: u16 = 99;
}

impl From<u16> for Method {
    fn from(u: u16) -> Self {
        match u {
            Self::STORE => Self::Store,
            Self::SHRINK => Self::Shrink,
            Self::IMPLODE => Self::Implode,
            Self::DEFLATE => Self::Deflate,
            Self::DEFLATE64 => Self::Deflate64,
            Self::BZIP2 => Self::Bzip2,
            Self::LZMA => Self::Lzma,
            Self::ZSTD_DEPRECATED => Self::ZstdDeprecated,
            Self::ZSTD => Self::Zstd,
            Self::MP3 => Self::Mp3,
            Self::XZ => Self::Xz,
            Self::JPEG => Self::Jpeg,
            Self::WAV_PACK => Self::WavPack,
            Self::PPMD => Self::Ppmd,
            Self::AEX => Self::Aex,
            u => Self::Unrecognized(u),
        }
    }
}

impl From<Method> for u16 {
    fn from(method: Method) -> Self {
        match method {
            Method::Store => Method::STORE,
            Method::Shrink => Method::SHRINK,
            Method::Implode => Method::IMPLODE,
            Method::Deflate => Method::DEFLATE,
            Method::Deflate64 => Method::DEFLATE64,
            Method::Bzip2 => Method::BZIP2,
            Method::Lzma => Method::LZMA,
            Method::ZstdDeprecated => Method::ZSTD_DEPRECATED,
            Method::Zstd => Method::ZSTD,
            Method::Mp3 => Method::MP3,
            Method::Xz => Method::XZ,
            Method::Jpeg => Method::JPEG,
            Method::WavPack => Method::WAV_PACK,
            Method::Ppmd => Method::PPMD,
            Method::Aex => Method::AEX,
            Method::Unrecognized(u) => u,
        }
    }
}
