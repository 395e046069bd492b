//! The extra fields carried by local file headers and central directory
//! headers.
//!
//! Recognized header ids decode into typed variants; unrecognized ones keep
//! their raw payload. A block whose declared length overruns the buffer is
//! handled according to [UnparseableBehavior], and the
//! [ExtraField::Unparseable] sentinel keeps the raw bytes so a re-emit
//! round-trips.

use crate::error::{Error, FormatError};
use crate::parse::{NtfsTimestamp, ZipEightByte, ZipLong, ZipShort};

/// Zip64 extended information, tag 0x0001
pub const TAG_ZIP64: u16 = 0x0001;
/// Extended (unix) timestamp, tag 0x5455 ("UT")
pub const TAG_TIMESTAMP: u16 = 0x5455;
/// NTFS timestamps, tag 0x000A
pub const TAG_NTFS: u16 = 0x000A;
/// ASi unix field, tag 0x756E ("nu")
pub const TAG_ASI: u16 = 0x756E;
/// Info-ZIP New Unix field, tag 0x7875 ("ux")
pub const TAG_NEW_UNIX: u16 = 0x7875;
/// Info-ZIP Unicode path field, tag 0x7075 ("up")
pub const TAG_UNICODE_PATH: u16 = 0x7075;
/// Info-ZIP Unicode comment field, tag 0x6375 ("uc")
pub const TAG_UNICODE_COMMENT: u16 = 0x6375;

/// What to do with an extra field block whose declared length exceeds the
/// remaining bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnparseableBehavior {
    /// Fail parsing the whole extra field buffer.
    Strict,
    /// Keep the raw remainder as an [ExtraField::Unparseable] sentinel.
    Read,
    /// Drop the remainder.
    Skip,
}

/// Which optional slots the zip64 extra field carries, derived from the
/// 32-bit fields of the surrounding record. From the appnote:
///
/// If one of the size or offset fields in the Local or Central directory record
/// is too small to hold the required data, a Zip64 extended information record
/// is created. The order of the fields in the zip64 extended information record
/// is fixed, but the fields MUST only appear if the corresponding Local or
/// Central directory record field is set to 0xFFFF or 0xFFFFFFFF.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtraFieldSettings {
    /// True if the record's uncompressed size was 0xFFFF_FFFF
    pub needs_uncompressed_size: bool,
    /// True if the record's compressed size was 0xFFFF_FFFF
    pub needs_compressed_size: bool,
    /// True if the record's local header offset was 0xFFFF_FFFF
    pub needs_header_offset: bool,
    /// True if the record's disk start number was 0xFFFF
    pub needs_disk_start: bool,
}

/// Information stored in a header's `extra` field.
///
/// This typically contains timestamps, file sizes and offsets, file mode,
/// uid/gid, and better-encoded variants of the entry's name and comment.
#[derive(Debug, Clone)]
pub enum ExtraField {
    /// Zip64 extended information extra field
    Zip64(Zip64ExtraField),
    /// Extended timestamp
    Timestamp(TimestampExtraField),
    /// NTFS (Win9x/WinNT FileTimes)
    Ntfs(NtfsExtraField),
    /// ASi UNIX: mode, uid/gid, symlink target
    Asi(AsiExtraField),
    /// Info-ZIP New Unix extra field
    NewUnix(NewUnixExtraField),
    /// Info-ZIP Unicode path
    UnicodePath(UnicodeExtraField),
    /// Info-ZIP Unicode comment
    UnicodeComment(UnicodeExtraField),
    /// Unknown extra field: raw payload is retained
    Unrecognized(UnrecognizedExtraField),
    /// A block a registered parser refused, or a truncated tail of the
    /// buffer, kept verbatim (id and length bytes included)
    Unparseable(UnparseableExtraFieldData),
}

impl ExtraField {
    /// The header id of this field.
    pub fn tag(&self) -> u16 {
        match self {
            ExtraField::Zip64(_) => TAG_ZIP64,
            ExtraField::Timestamp(_) => TAG_TIMESTAMP,
            ExtraField::Ntfs(_) => TAG_NTFS,
            ExtraField::Asi(_) => TAG_ASI,
            ExtraField::NewUnix(_) => TAG_NEW_UNIX,
            ExtraField::UnicodePath(_) => TAG_UNICODE_PATH,
            ExtraField::UnicodeComment(_) => TAG_UNICODE_COMMENT,
            ExtraField::Unrecognized(u) => u.tag,
            ExtraField::Unparseable(u) => u.tag,
        }
    }

    /// The payload written after `id || len` in a local file header.
    pub fn local_payload(&self) -> Vec<u8> {
        match self {
            ExtraField::Zip64(f) => f.payload(),
            ExtraField::Timestamp(f) => f.local_payload(),
            ExtraField::Ntfs(f) => f.payload(),
            ExtraField::Asi(f) => f.payload(),
            ExtraField::NewUnix(f) => f.local_payload(),
            ExtraField::UnicodePath(f) | ExtraField::UnicodeComment(f) => f.payload(),
            ExtraField::Unrecognized(u) => u.local.clone(),
            ExtraField::Unparseable(u) => u.data.clone(),
        }
    }

    /// The payload written after `id || len` in a central directory header.
    pub fn central_payload(&self) -> Vec<u8> {
        match self {
            ExtraField::Zip64(f) => f.payload(),
            ExtraField::Timestamp(f) => f.central_payload(),
            ExtraField::Ntfs(f) => f.payload(),
            ExtraField::Asi(f) => f.payload(),
            ExtraField::NewUnix(_) => Vec::new(),
            ExtraField::UnicodePath(f) | ExtraField::UnicodeComment(f) => f.payload(),
            ExtraField::Unrecognized(u) => u.central.clone(),
            ExtraField::Unparseable(u) => u.data.clone(),
        }
    }
}

/// Parse a whole extra field buffer: a sequence of `id || len || payload`
/// blocks.
///
/// `local` selects which byte form blocks are parsed as. A block that
/// declares more payload than there are bytes left is handled per
/// `behavior`; a registered parser rejecting its payload is an error.
pub fn parse_extra_fields(
    data: &[u8],
    local: bool,
    behavior: UnparseableBehavior,
    settings: ExtraFieldSettings,
) -> Result<Vec<ExtraField>, Error> {
    let mut fields = Vec::new();
    let mut start = 0usize;

    while start + 4 <= data.len() {
        let tag = ZipShort::get(data, start).unwrap().0;
        let length = ZipShort::get(data, start + 2).unwrap().0 as usize;

        if start + 4 + length > data.len() {
            let remaining = data.len() - start - 4;
            match behavior {
                UnparseableBehavior::Strict => {
                    return Err(FormatError::ExtraFieldBlockTooLarge {
                        start,
                        block_length: length,
                        remaining,
                    }
                    .into());
                }
                UnparseableBehavior::Read => {
                    fields.push(ExtraField::Unparseable(UnparseableExtraFieldData {
                        tag,
                        data: data[start..].to_vec(),
                    }));
                }
                UnparseableBehavior::Skip => {}
            }
            return Ok(fields);
        }

        let payload = &data[start + 4..start + 4 + length];
        fields.push(parse_one(tag, payload, local, settings)?);
        start += 4 + length;
    }

    if start < data.len() {
        // trailing garbage shorter than a block prefix
        match behavior {
            UnparseableBehavior::Skip => {}
            _ => fields.push(ExtraField::Unparseable(UnparseableExtraFieldData {
                tag: 0,
                data: data[start..].to_vec(),
            })),
        }
    }

    Ok(fields)
}

fn parse_one(
    tag: u16,
    payload: &[u8],
    local: bool,
    settings: ExtraFieldSettings,
) -> Result<ExtraField, Error> {
    let unrecognized = || {
        ExtraField::Unrecognized(UnrecognizedExtraField {
            tag,
            local: payload.to_vec(),
            central: payload.to_vec(),
        })
    };

    Ok(match tag {
        TAG_ZIP64 => ExtraField::Zip64(Zip64ExtraField::parse(payload, settings)?),
        TAG_TIMESTAMP => ExtraField::Timestamp(
            TimestampExtraField::parse(payload).ok_or(FormatError::CorruptExtraField { tag })?,
        ),
        TAG_NTFS => ExtraField::Ntfs(
            NtfsExtraField::parse(payload).ok_or(FormatError::CorruptExtraField { tag })?,
        ),
        TAG_ASI => ExtraField::Asi(AsiExtraField::parse(payload)?),
        // the central form of the new-unix field is empty
        TAG_NEW_UNIX if !local && payload.is_empty() => {
            ExtraField::NewUnix(NewUnixExtraField::default())
        }
        TAG_NEW_UNIX => ExtraField::NewUnix(
            NewUnixExtraField::parse(payload).ok_or(FormatError::CorruptExtraField { tag })?,
        ),
        TAG_UNICODE_PATH | TAG_UNICODE_COMMENT => {
            match UnicodeExtraField::parse(payload)
                .ok_or(FormatError::CorruptExtraField { tag })?
            {
                // version mismatch: keep raw bytes, ignore the field
                None => unrecognized(),
                Some(f) if tag == TAG_UNICODE_PATH => ExtraField::UnicodePath(f),
                Some(f) => ExtraField::UnicodeComment(f),
            }
        }
        _ => unrecognized(),
    })
}

/// Emit `id || len || payload` for each field, using local-header byte
/// forms, preserving order.
///
/// The unparseable sentinel is emitted verbatim: its id and length bytes are
/// already part of its payload.
pub fn merge_local(fields: &[ExtraField]) -> Vec<u8> {
    merge(fields, true)
}

/// Emit `id || len || payload` for each field, using central-directory byte
/// forms, preserving order.
pub fn merge_central(fields: &[ExtraField]) -> Vec<u8> {
    merge(fields, false)
}

fn merge(fields: &[ExtraField], local: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for f in fields {
        if let ExtraField::Unparseable(u) = f {
            out.extend_from_slice(&u.data);
            continue;
        }
        let payload = if local {
            f.local_payload()
        } else {
            f.central_payload()
        };
        ZipShort(f.tag()).put(&mut out);
        ZipShort(payload.len() as u16).put(&mut out);
        out.extend_from_slice(&payload);
    }
    out
}

/// A little cursor over an extra field payload.
struct Rd<'a> {
    b: &'a [u8],
    pos: usize,
}

impl<'a> Rd<'a> {
    fn new(b: &'a [u8]) -> Self {
        Self { b, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.b.len() - self.pos
    }

    fn u8(&mut self) -> Option<u8> {
        let v = *self.b.get(self.pos)?;
        self.pos += 1;
        Some(v)
    }

    fn u16(&mut self) -> Option<u16> {
        let v = ZipShort::get(self.b, self.pos)?.0;
        self.pos += 2;
        Some(v)
    }

    fn u32(&mut self) -> Option<u32> {
        let v = ZipLong::get(self.b, self.pos)?.0;
        self.pos += 4;
        Some(v)
    }

    fn u64(&mut self) -> Option<u64> {
        let v = ZipEightByte::get(self.b, self.pos)?.0;
        self.pos += 8;
        Some(v)
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let s = self.b.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(s)
    }
}

/// 4.5.3 Zip64 Extended Information Extra Field (0x0001)
///
/// Which slots are present is dictated by the saturated 32-bit fields of the
/// surrounding record, not by this field's length.
#[derive(Debug, Clone, Default)]
pub struct Zip64ExtraField {
    /// 64-bit uncompressed size, if the record's 32-bit slot was saturated
    pub uncompressed_size: Option<u64>,

    /// 64-bit compressed size, if the record's 32-bit slot was saturated
    pub compressed_size: Option<u64>,

    /// 64-bit local header offset, if the record's 32-bit slot was saturated
    pub header_offset: Option<u64>,

    /// 32-bit disk start number, if the record's 16-bit slot was saturated
    pub disk_start: Option<u32>,
}

impl Zip64ExtraField {
    fn parse(payload: &[u8], settings: ExtraFieldSettings) -> Result<Self, Error> {
        let mut rd = Rd::new(payload);
        let mismatch = || Error::from(FormatError::Zip64ExtraFieldMismatch);

        let mut out = Self::default();
        if settings.needs_uncompressed_size {
            out.uncompressed_size = Some(rd.u64().ok_or_else(mismatch)?);
        }
        if settings.needs_compressed_size {
            out.compressed_size = Some(rd.u64().ok_or_else(mismatch)?);
        }
        if settings.needs_header_offset {
            out.header_offset = Some(rd.u64().ok_or_else(mismatch)?);
        }
        if settings.needs_disk_start {
            out.disk_start = Some(rd.u32().ok_or_else(mismatch)?);
        }
        if rd.remaining() != 0 {
            // more 8-byte slots than saturated header fields
            return Err(mismatch());
        }
        Ok(out)
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(28);
        if let Some(v) = self.uncompressed_size {
            ZipEightByte(v).put(&mut out);
        }
        if let Some(v) = self.compressed_size {
            ZipEightByte(v).put(&mut out);
        }
        if let Some(v) = self.header_offset {
            ZipEightByte(v).put(&mut out);
        }
        if let Some(v) = self.disk_start {
            ZipLong(v).put(&mut out);
        }
        out
    }
}

/// Extended timestamp extra field (0x5455), unix epoch seconds.
#[derive(Debug, Clone, Default)]
pub struct TimestampExtraField {
    /// presence bits: 1 = mtime, 2 = atime, 4 = ctime
    pub flags: u8,
    /// modification time, seconds since epoch
    pub mtime: Option<u32>,
    /// access time, seconds since epoch
    pub atime: Option<u32>,
    /// creation time, seconds since epoch
    pub ctime: Option<u32>,
}

impl TimestampExtraField {
    /// A field carrying only a modification time.
    pub fn from_mtime(mtime: u32) -> Self {
        Self {
            flags: 1,
            mtime: Some(mtime),
            ..Default::default()
        }
    }

    fn parse(payload: &[u8]) -> Option<Self> {
        let mut rd = Rd::new(payload);
        let flags = rd.u8()?;
        let mut out = Self {
            flags,
            ..Default::default()
        };
        // the central variant is truncated after mtime, so stop reading at
        // the first absent value rather than failing
        if flags & 1 != 0 {
            out.mtime = rd.u32();
        }
        if flags & 2 != 0 && rd.remaining() >= 4 {
            out.atime = rd.u32();
        }
        if flags & 4 != 0 && rd.remaining() >= 4 {
            out.ctime = rd.u32();
        }
        Some(out)
    }

    fn local_payload(&self) -> Vec<u8> {
        let mut out = vec![self.flags];
        for v in [self.mtime, self.atime, self.ctime].into_iter().flatten() {
            ZipLong(v).put(&mut out);
        }
        out
    }

    fn central_payload(&self) -> Vec<u8> {
        let mut out = vec![self.flags];
        if let Some(v) = self.mtime {
            ZipLong(v).put(&mut out);
        }
        out
    }
}

/// 4.5.5 NTFS Extra Field (0x000a)
#[derive(Debug, Clone)]
pub struct NtfsExtraField {
    /// NTFS attributes
    pub attrs: Vec<NtfsAttr>,
}

impl NtfsExtraField {
    /// A field carrying a single attribute-1 triple.
    pub fn from_times(
        mtime: NtfsTimestamp,
        atime: Option<NtfsTimestamp>,
        ctime: Option<NtfsTimestamp>,
    ) -> Self {
        Self {
            attrs: vec![NtfsAttr::Attr1(NtfsAttr1 {
                mtime,
                atime,
                ctime,
            })],
        }
    }

    fn parse(payload: &[u8]) -> Option<Self> {
        let mut rd = Rd::new(payload);
        // 4 reserved bytes
        rd.take(4)?;
        let mut attrs = Vec::new();
        while rd.remaining() >= 4 {
            let tag = rd.u16()?;
            let len = rd.u16()? as usize;
            let payload = rd.take(len)?;
            attrs.push(NtfsAttr::parse(tag, payload)?);
        }
        Some(Self { attrs })
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        ZipLong(0).put(&mut out); // reserved
        for attr in &self.attrs {
            let payload = attr.payload();
            ZipShort(attr.tag()).put(&mut out);
            ZipShort(payload.len() as u16).put(&mut out);
            out.extend_from_slice(&payload);
        }
        out
    }
}

/// NTFS attribute for zip entries (mostly timestamps)
#[derive(Debug, Clone)]
pub enum NtfsAttr {
    /// NTFS attribute 1, which contains modified/accessed/created timestamps
    Attr1(NtfsAttr1),

    /// Unknown NTFS attribute, raw payload retained
    Unknown {
        /// tag of the attribute
        tag: u16,
        /// raw payload
        payload: Vec<u8>,
    },
}

impl NtfsAttr {
    fn parse(tag: u16, payload: &[u8]) -> Option<Self> {
        match tag {
            0x0001 => {
                let mut rd = Rd::new(payload);
                // one, two or three tick values, mtime first
                let mtime = NtfsTimestamp {
                    timestamp: rd.u64()?,
                };
                let atime = rd.u64().map(|timestamp| NtfsTimestamp { timestamp });
                let ctime = rd.u64().map(|timestamp| NtfsTimestamp { timestamp });
                Some(NtfsAttr::Attr1(NtfsAttr1 {
                    mtime,
                    atime,
                    ctime,
                }))
            }
            _ => Some(NtfsAttr::Unknown {
                tag,
                payload: payload.to_vec(),
            }),
        }
    }

    fn tag(&self) -> u16 {
        match self {
            NtfsAttr::Attr1(_) => 0x0001,
            NtfsAttr::Unknown { tag, .. } => *tag,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            NtfsAttr::Attr1(a) => {
                let mut out = Vec::with_capacity(24);
                ZipEightByte(a.mtime.timestamp).put(&mut out);
                for t in [a.atime, a.ctime].into_iter().flatten() {
                    ZipEightByte(t.timestamp).put(&mut out);
                }
                out
            }
            NtfsAttr::Unknown { payload, .. } => payload.clone(),
        }
    }
}

/// NTFS attribute 1, which contains modified/accessed/created timestamps
#[derive(Debug, Clone)]
pub struct NtfsAttr1 {
    /// modified time
    pub mtime: NtfsTimestamp,

    /// accessed time
    pub atime: Option<NtfsTimestamp>,

    /// created time
    pub ctime: Option<NtfsTimestamp>,
}

/// ASi UNIX extra field (0x756E): unix mode, uid/gid, and the target path
/// for symlinks. A CRC-32 over the body guards the whole block.
///
/// Clones are deep: the link target is an owned string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsiExtraField {
    /// permission bits (the low 12 bits of the unix mode)
    pub mode: u16,
    /// user id
    pub uid: u16,
    /// group id
    pub gid: u16,
    /// symlink target; empty if the entry is not a symlink
    pub link_target: String,
    /// whether the entry is a directory (only meaningful without a link
    /// target)
    pub directory: bool,
}

/// plain file bits in a unix mode word
const UNIX_FILE: u16 = 0o100000;
/// directory bits in a unix mode word
const UNIX_DIR: u16 = 0o040000;
/// symlink bits in a unix mode word
const UNIX_LINK: u16 = 0o120000;
const UNIX_PERM_MASK: u16 = 0o7777;

impl AsiExtraField {
    /// Whether this field describes a symlink.
    pub fn is_link(&self) -> bool {
        !self.link_target.is_empty()
    }

    /// The full unix mode word: file-type bits plus permissions.
    pub fn unix_mode(&self) -> u16 {
        let kind = if self.is_link() {
            UNIX_LINK
        } else if self.directory {
            UNIX_DIR
        } else {
            UNIX_FILE
        };
        kind | (self.mode & UNIX_PERM_MASK)
    }

    fn parse(payload: &[u8]) -> Result<Self, Error> {
        let corrupt = || Error::from(FormatError::CorruptExtraField { tag: TAG_ASI });

        let mut rd = Rd::new(payload);
        let stored_crc = rd.u32().ok_or_else(corrupt)?;
        let actual_crc = crc32fast::hash(&payload[4..]);
        if stored_crc != actual_crc {
            return Err(FormatError::WrongChecksum {
                expected: stored_crc,
                actual: actual_crc,
            }
            .into());
        }

        let mode = rd.u16().ok_or_else(corrupt)?;
        let link_len = rd.u32().ok_or_else(corrupt)? as usize;
        let uid = rd.u16().ok_or_else(corrupt)?;
        let gid = rd.u16().ok_or_else(corrupt)?;
        let link_bytes = rd.take(link_len).ok_or_else(corrupt)?;
        let link_target = String::from_utf8_lossy(link_bytes).into_owned();

        Ok(Self {
            mode: mode & UNIX_PERM_MASK,
            uid,
            gid,
            directory: mode & UNIX_DIR != 0 && link_target.is_empty(),
            link_target,
        })
    }

    fn payload(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(10 + self.link_target.len());
        ZipShort(self.unix_mode()).put(&mut body);
        ZipLong(self.link_target.len() as u32).put(&mut body);
        ZipShort(self.uid).put(&mut body);
        ZipShort(self.gid).put(&mut body);
        body.extend_from_slice(self.link_target.as_bytes());

        let mut out = Vec::with_capacity(4 + body.len());
        ZipLong(crc32fast::hash(&body)).put(&mut out);
        out.extend_from_slice(&body);
        out
    }
}

/// Info-ZIP New Unix Extra Field (0x7875):
///
/// ```text
/// Value         Size        Description
/// -----         ----        -----------
/// 0x7875        Short       tag for this extra block type ("ux")
/// TSize         Short       total data size for this block
/// Version       1 byte      version of this extra field, currently 1
/// UIDSize       1 byte      Size of UID field
/// UID           Variable    UID for this entry
/// GIDSize       1 byte      Size of GID field
/// GID           Variable    GID for this entry
/// ```
///
/// Values are little-endian with no fixed width; the encoder always trims
/// leading zero bytes but emits at least one byte per field, so
/// `encode(parse(x))` normalizes to the minimum-length form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewUnixExtraField {
    /// file user id
    pub uid: u64,

    /// file group id
    pub gid: u64,
}

impl Default for NewUnixExtraField {
    fn default() -> Self {
        // Info-ZIP's default owner, uid/gid 1000
        Self {
            uid: 1000,
            gid: 1000,
        }
    }
}

impl NewUnixExtraField {
    fn parse(payload: &[u8]) -> Option<Self> {
        let mut rd = Rd::new(payload);
        let _version = rd.u8()?;
        let uid = Self::parse_variable_length_integer(&mut rd)?;
        let gid = Self::parse_variable_length_integer(&mut rd)?;
        Some(Self { uid, gid })
    }

    fn parse_variable_length_integer(rd: &mut Rd) -> Option<u64> {
        let len = rd.u8()? as usize;
        if len > 8 {
            return None;
        }
        let bytes = rd.take(len)?;
        let mut v = 0u64;
        for (i, &b) in bytes.iter().enumerate() {
            v |= (b as u64) << (8 * i);
        }
        Some(v)
    }

    fn local_payload(&self) -> Vec<u8> {
        let mut out = vec![1u8];
        for v in [self.uid, self.gid] {
            let bytes = v.to_le_bytes();
            let significant = 8 - bytes.iter().rev().take_while(|&&b| b == 0).count();
            let significant = significant.max(1);
            out.push(significant as u8);
            out.extend_from_slice(&bytes[..significant]);
        }
        out
    }
}

/// Info-ZIP Unicode path (0x7075) / comment (0x6375) extra field:
/// a UTF-8 rendition of the name or comment, guarded by a CRC-32 over the
/// archive-encoded original so stale fields are detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicodeExtraField {
    /// CRC-32 of the archive-encoded (not UTF-8) name or comment
    pub name_crc32: u32,
    /// the UTF-8 bytes
    pub unicode: Vec<u8>,
}

impl UnicodeExtraField {
    /// Build a field for the given UTF-8 text and its archive-encoded form.
    pub fn new(encoded_original: &[u8], utf8: &str) -> Self {
        Self {
            name_crc32: crc32fast::hash(encoded_original),
            unicode: utf8.as_bytes().to_vec(),
        }
    }

    /// Whether this field applies to the raw name/comment bytes it claims to
    /// re-encode.
    pub fn applies_to(&self, raw: &[u8]) -> bool {
        crc32fast::hash(raw) == self.name_crc32
    }

    // Ok(None): unsupported version, field to be ignored
    fn parse(payload: &[u8]) -> Option<Option<Self>> {
        let mut rd = Rd::new(payload);
        let version = rd.u8()?;
        if version != 1 {
            return Some(None);
        }
        let name_crc32 = rd.u32()?;
        let unicode = rd.take(rd.remaining())?.to_vec();
        Some(Some(Self {
            name_crc32,
            unicode,
        }))
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.unicode.len());
        out.push(1u8);
        ZipLong(self.name_crc32).put(&mut out);
        out.extend_from_slice(&self.unicode);
        out
    }
}

/// An extra field this crate has no parser for. Local and central byte
/// forms are retained separately so a re-emit round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrecognizedExtraField {
    /// header id
    pub tag: u16,
    /// local file header payload
    pub local: Vec<u8>,
    /// central directory payload
    pub central: Vec<u8>,
}

/// Raw bytes of a block that could not be parsed, `id || len || payload`
/// included, emitted verbatim on merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnparseableExtraFieldData {
    /// header id of the faulting block (0 for a truncated prefix)
    pub tag: u16,
    /// the raw bytes, id and length prefix included
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{NtfsTimestamp, ZipEightByte, ZipLong, ZipShort};

    fn parse(
        data: &[u8],
        behavior: UnparseableBehavior,
    ) -> Result<Vec<ExtraField>, crate::error::Error> {
        parse_extra_fields(data, true, behavior, ExtraFieldSettings::default())
    }

    #[test]
    fn asi_encodes_plain_file() {
        let asi = AsiExtraField {
            mode: 0o123,
            uid: 5,
            gid: 6,
            ..Default::default()
        };
        let payload = asi.payload();
        assert_eq!(payload.len(), 14);
        // crc32 over the 10-byte body
        assert_eq!(&payload[..4], &0xB67802C6u32.to_le_bytes());
        assert_eq!(
            &payload[4..],
            &[0o123, 0x80, 0, 0, 0, 0, 5, 0, 6, 0],
            "mode 0o100123, no link, uid 5, gid 6"
        );

        let reparsed = AsiExtraField::parse(&payload).unwrap();
        assert_eq!(reparsed, asi);
        assert_eq!(reparsed.unix_mode(), 0o100123);
    }

    #[test]
    fn asi_encodes_symlink() {
        let asi = AsiExtraField {
            mode: 0o123,
            uid: 5,
            gid: 6,
            link_target: "test".to_string(),
            directory: false,
        };
        let payload = asi.payload();
        assert_eq!(payload.len(), 18);
        assert_eq!(&payload[..4], &0xFD418E75u32.to_le_bytes());
        assert_eq!(payload[5], 0xA0, "symlink type bits in the mode high byte");
        assert_eq!(&payload[14..], b"test");

        let reparsed = AsiExtraField::parse(&payload).unwrap();
        assert_eq!(reparsed.unix_mode(), 0o120123);
        assert_eq!(reparsed.link_target, "test");
        assert!(!reparsed.directory);
    }

    #[test]
    fn asi_rejects_bad_crc() {
        let asi = AsiExtraField {
            mode: 0o123,
            uid: 5,
            gid: 6,
            ..Default::default()
        };
        let mut payload = asi.payload();
        payload[..4].copy_from_slice(&[0, 0, 0, 0]);

        let err = AsiExtraField::parse(&payload).unwrap_err();
        assert_eq!(
            err.to_string(),
            "format: Bad CRC checksum, expected 0 instead of b67802c6"
        );
    }

    #[test]
    fn new_unix_parses_huge_ids() {
        // uid = gid = 2^32 - 2
        let payload = [0x01, 0x04, 0xFE, 0xFF, 0xFF, 0xFF, 0x04, 0xFE, 0xFF, 0xFF, 0xFF];
        let f = NewUnixExtraField::parse(&payload).unwrap();
        assert_eq!(f.uid, 4294967294);
        assert_eq!(f.gid, 4294967294);
        assert_eq!(f.local_payload(), &payload);
    }

    #[test]
    fn new_unix_normalizes_leading_zeros() {
        let payload = [0x01, 0x04, 0xFF, 0, 0, 0, 0x04, 0x80, 0, 0, 0];
        let f = NewUnixExtraField::parse(&payload).unwrap();
        assert_eq!((f.uid, f.gid), (255, 128));
        assert_eq!(f.local_payload(), &[0x01, 0x01, 0xFF, 0x01, 0x80]);
    }

    #[test]
    fn new_unix_zero_is_one_byte_per_field() {
        let f = NewUnixExtraField { uid: 0, gid: 0 };
        assert_eq!(f.local_payload(), &[0x01, 0x01, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn new_unix_central_form_is_empty() {
        let f = ExtraField::NewUnix(NewUnixExtraField::default());
        assert!(f.central_payload().is_empty());
        assert!(!f.local_payload().is_empty());
    }

    fn asi_then_unknown() -> Vec<u8> {
        let asi = AsiExtraField {
            mode: 0o755,
            directory: true,
            ..Default::default()
        };
        merge_local(&[
            ExtraField::Asi(asi),
            ExtraField::Unrecognized(UnrecognizedExtraField {
                tag: 0x5555,
                local: vec![0],
                central: vec![0],
            }),
        ])
    }

    #[test]
    fn merge_then_parse_round_trips() {
        let data = asi_then_unknown();
        let fields = parse(&data, UnparseableBehavior::Strict).unwrap();
        assert_eq!(fields.len(), 2);

        match &fields[0] {
            ExtraField::Asi(asi) => assert_eq!(asi.unix_mode(), 0o40755),
            other => panic!("expected Asi, got {other:?}"),
        }
        match &fields[1] {
            ExtraField::Unrecognized(u) => {
                assert_eq!(u.tag, 0x5555);
                assert_eq!(u.local.len(), 1);
            }
            other => panic!("expected Unrecognized, got {other:?}"),
        }

        assert_eq!(merge_local(&fields), data);
    }

    #[test]
    fn truncated_block_strict() {
        let mut data = asi_then_unknown();
        data.pop();

        let err = parse(&data, UnparseableBehavior::Strict).unwrap_err();
        assert_eq!(
            err.to_string(),
            "format: Bad extra field starting at 18. Block length of 1 bytes exceeds remaining data of 0 bytes."
        );
    }

    #[test]
    fn truncated_block_read() {
        let mut data = asi_then_unknown();
        data.pop();

        let fields = parse(&data, UnparseableBehavior::Read).unwrap();
        assert_eq!(fields.len(), 2);
        match &fields[1] {
            ExtraField::Unparseable(u) => {
                assert_eq!(u.tag, 0x5555);
                assert_eq!(u.data.len(), 4);
            }
            other => panic!("expected Unparseable, got {other:?}"),
        }

        // the sentinel re-emits its raw bytes without a fresh prefix
        assert_eq!(merge_local(&fields), data);
    }

    #[test]
    fn truncated_block_skip() {
        let mut data = asi_then_unknown();
        data.pop();

        let fields = parse(&data, UnparseableBehavior::Skip).unwrap();
        assert_eq!(fields.len(), 1);
        assert!(matches!(fields[0], ExtraField::Asi(_)));
    }

    #[test]
    fn zip64_slots_follow_the_mask() {
        let settings = ExtraFieldSettings {
            needs_uncompressed_size: true,
            needs_compressed_size: true,
            ..Default::default()
        };
        let mut payload = Vec::new();
        ZipEightByte(0x1_0000_0001).put(&mut payload);
        ZipEightByte(0x1_0000_0002).put(&mut payload);

        let f = Zip64ExtraField::parse(&payload, settings).unwrap();
        assert_eq!(f.uncompressed_size, Some(0x1_0000_0001));
        assert_eq!(f.compressed_size, Some(0x1_0000_0002));
        assert_eq!(f.header_offset, None);
        assert_eq!(f.payload(), payload);
    }

    #[test]
    fn zip64_slot_count_mismatch_is_an_error() {
        let settings = ExtraFieldSettings {
            needs_uncompressed_size: true,
            needs_compressed_size: true,
            ..Default::default()
        };
        // one slot short
        let mut payload = Vec::new();
        ZipEightByte(42).put(&mut payload);
        assert!(Zip64ExtraField::parse(&payload, settings).is_err());

        // one slot too many
        let mut payload = Vec::new();
        for v in [1u64, 2, 3] {
            ZipEightByte(v).put(&mut payload);
        }
        assert!(Zip64ExtraField::parse(&payload, settings).is_err());
    }

    #[test]
    fn unicode_path_version_mismatch_is_ignored() {
        let mut data = Vec::new();
        ZipShort(TAG_UNICODE_PATH).put(&mut data);
        ZipShort(9).put(&mut data);
        data.push(2); // version 2: not ours
        ZipLong(0xDEAD_BEEF).put(&mut data);
        data.extend_from_slice(b"name");

        let fields = parse(&data, UnparseableBehavior::Strict).unwrap();
        assert_eq!(fields.len(), 1);
        assert!(matches!(&fields[0], ExtraField::Unrecognized(u) if u.tag == TAG_UNICODE_PATH));
    }

    #[test]
    fn unicode_path_crc_guard() {
        let raw_name = b"fran\x87ais"; // cp437-encoded
        let field = UnicodeExtraField::new(raw_name, "français");
        assert!(field.applies_to(raw_name));
        assert!(!field.applies_to(b"francais"));

        let payload = field.payload();
        let reparsed = UnicodeExtraField::parse(&payload).unwrap().unwrap();
        assert_eq!(reparsed, field);
    }

    #[test]
    fn ntfs_round_trips() {
        let f = NtfsExtraField::from_times(
            NtfsTimestamp {
                timestamp: 0x01D3_4567_89AB_CDEF,
            },
            Some(NtfsTimestamp { timestamp: 17 }),
            None,
        );
        let payload = f.payload();
        let reparsed = NtfsExtraField::parse(&payload).unwrap();
        match &reparsed.attrs[..] {
            [NtfsAttr::Attr1(a)] => {
                assert_eq!(a.mtime.timestamp, 0x01D3_4567_89AB_CDEF);
                assert_eq!(a.atime.map(|t| t.timestamp), Some(17));
                assert_eq!(a.ctime, None);
            }
            other => panic!("expected one attr1, got {other:?}"),
        }
    }

    #[test]
    fn timestamp_central_form_is_mtime_only() {
        let f = TimestampExtraField {
            flags: 0b111,
            mtime: Some(100),
            atime: Some(200),
            ctime: Some(300),
        };
        assert_eq!(f.local_payload().len(), 13);
        assert_eq!(f.central_payload().len(), 5);

        let reparsed = TimestampExtraField::parse(&f.central_payload()).unwrap();
        assert_eq!(reparsed.mtime, Some(100));
        assert_eq!(reparsed.atime, None);
    }
}
