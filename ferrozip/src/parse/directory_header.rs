use tracing::trace;
use winnow::{
    binary::{le_u16, le_u32},
    prelude::PResult,
    token::literal,
    Parser, Partial,
};

use crate::{
    encoding::{detect_utf8, Encoding},
    error::Error,
    parse::{
        parse_extra_fields, zero_datetime, Entry, ExtraField, ExtraFieldSettings,
        GeneralPurposeBit, HostSystem, Method, Mode, MsdosMode, MsdosTimestamp, UnixMode,
        UnparseableBehavior, Version, ZipBytes, ZipLong, ZipShort, ZipString,
    },
};

/// 4.3.12 Central directory structure: File header
pub struct DirectoryHeader {
    /// version made by
    pub creator_version: Version,
    /// version needed to extract
    pub reader_version: Version,
    /// general purpose bit flag
    pub flags: GeneralPurposeBit,
    /// compression method
    pub method: u16,
    /// last mod file datetime
    pub modified: MsdosTimestamp,
    /// crc32
    pub crc32: u32,
    /// compressed size
    pub compressed_size: u32,
    /// uncompressed size
    pub uncompressed_size: u32,
    /// disk number start
    pub disk_nbr_start: u16,
    /// internal file attributes
    pub internal_attrs: u16,
    /// external file attributes
    pub external_attrs: u32,
    /// relative offset of local header
    pub header_offset: u32,

    /// name
    pub name: ZipString,
    /// extra
    pub extra: ZipBytes,
    /// comment
    pub comment: ZipString,
}

impl DirectoryHeader {
    const SIGNATURE: &'static str = "PK\x01\x02";

    /// Serialized size of the fixed part, name/extra/comment excluded.
    pub const FIXED_SIZE: usize = 46;

    /// Parser for the central directory file header
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        _ = literal(Self::SIGNATURE).parse_next(i)?;
        let creator_version = Version::parser.parse_next(i)?;
        let reader_version = Version::parser.parse_next(i)?;
        let flags = GeneralPurposeBit::parser.parse_next(i)?;
        let method = le_u16.parse_next(i)?;
        let modified = MsdosTimestamp::parser.parse_next(i)?;
        let crc32 = le_u32.parse_next(i)?;
        let compressed_size = le_u32.parse_next(i)?;
        let uncompressed_size = le_u32.parse_next(i)?;
        let name_len = le_u16.parse_next(i)?;
        let extra_len = le_u16.parse_next(i)?;
        let comment_len = le_u16.parse_next(i)?;
        let disk_nbr_start = le_u16.parse_next(i)?;
        let internal_attrs = le_u16.parse_next(i)?;
        let external_attrs = le_u32.parse_next(i)?;
        let header_offset = le_u32.parse_next(i)?;

        let name = ZipString::parser(name_len).parse_next(i)?;
        let extra = ZipBytes::parser(extra_len).parse_next(i)?;
        let comment = ZipString::parser(comment_len).parse_next(i)?;

        Ok(Self {
            creator_version,
            reader_version,
            flags,
            method,
            modified,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_nbr_start,
            internal_attrs,
            external_attrs,
            header_offset,
            name,
            extra,
            comment,
        })
    }

    /// Append the serialized header, name, extra and comment included.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        ZipLong::CENTRAL_FILE_HEADER.put(out);
        out.extend_from_slice(&self.creator_version.encode());
        out.extend_from_slice(&self.reader_version.encode());
        out.extend_from_slice(&self.flags.encode());
        ZipShort(self.method).put(out);
        out.extend_from_slice(&self.modified.encode());
        ZipLong(self.crc32).put(out);
        ZipLong(self.compressed_size).put(out);
        ZipLong(self.uncompressed_size).put(out);
        ZipShort(self.name.0.len() as u16).put(out);
        ZipShort(self.extra.0.len() as u16).put(out);
        ZipShort(self.comment.0.len() as u16).put(out);
        ZipShort(self.disk_nbr_start).put(out);
        ZipShort(self.internal_attrs).put(out);
        ZipLong(self.external_attrs).put(out);
        ZipLong(self.header_offset).put(out);
        out.extend_from_slice(&self.name.0);
        out.extend_from_slice(&self.extra.0);
        out.extend_from_slice(&self.comment.0);
    }

    /// Whether the name or comment of this entry cannot be UTF-8.
    pub fn is_non_utf8(&self) -> bool {
        let (valid1, require1) = detect_utf8(&self.name.0[..]);
        let (valid2, require2) = detect_utf8(&self.comment.0[..]);
        if !valid1 || !valid2 {
            // definitely not utf-8
            return true;
        }

        if !require1 && !require2 {
            // name and comment only use single-byte runes that overlap with UTF-8
            return false;
        }

        // Might be UTF-8, might be some other encoding; preserve existing flag.
        // Some ZIP writers use UTF-8 encoding without setting the UTF-8 flag.
        // Since it is impossible to always distinguish valid UTF-8 from some
        // other encoding (e.g., GBK or Shift-JIS), we trust the flag.
        !self.flags.uses_utf8_names()
    }

    /// Interpret this central directory header as an [Entry].
    ///
    /// The central directory is authoritative: when the local header
    /// disagrees on sizes or checksums, the values produced here win.
    pub fn as_entry(&self, encoding: Encoding, global_offset: u64) -> Result<Entry, Error> {
        let encoding = if self.flags.uses_utf8_names() {
            Encoding::Utf8
        } else {
            encoding
        };

        let name = encoding.decode(&self.name.0)?;
        let mut comment: Option<String> = None;
        if !self.comment.0.is_empty() {
            comment = Some(encoding.decode(&self.comment.0)?);
        }

        let needs_uncompressed_size = self.uncompressed_size == !0u32;
        let needs_compressed_size = self.compressed_size == !0u32;
        let needs_header_offset = self.header_offset == !0u32;
        let needs_disk_start = self.disk_nbr_start == !0u16;
        let settings = ExtraFieldSettings {
            needs_uncompressed_size,
            needs_compressed_size,
            needs_header_offset,
            needs_disk_start,
        };

        let extra_fields = parse_extra_fields(
            &self.extra.0,
            false,
            UnparseableBehavior::Read,
            settings,
        )?;

        let mut entry = Entry {
            name,
            raw_name: self.name.0.clone(),
            method: Method::from(self.method),
            comment,
            modified: self.modified.to_datetime().unwrap_or_else(zero_datetime),
            header_offset: self.header_offset as u64,
            reader_version: self.reader_version,
            flags: self.flags,
            crc32: self.crc32,
            compressed_size: self.compressed_size as u64,
            uncompressed_size: self.uncompressed_size as u64,
            external_attrs: self.external_attrs,
            is_zip64: needs_uncompressed_size || needs_compressed_size || needs_header_offset,
            ..Default::default()
        };

        for ef in &extra_fields {
            entry.set_extra_field(ef);
            match ef {
                ExtraField::UnicodePath(f) if f.applies_to(&self.name.0) => {
                    if let Ok(s) = std::str::from_utf8(&f.unicode) {
                        entry.name = s.to_string();
                    }
                }
                ExtraField::UnicodeComment(f) if f.applies_to(&self.comment.0) => {
                    if let Ok(s) = std::str::from_utf8(&f.unicode) {
                        entry.comment = Some(s.to_string());
                    }
                }
                _ => {}
            }
        }
        entry.extra_fields = extra_fields;

        // the header offset in the record is relative to the start of the
        // zip data, which isn't necessarily the start of the file
        entry.header_offset += global_offset;

        if entry.mode == Mode(0) {
            entry.mode = match self.creator_version.host_system {
                HostSystem::Unix | HostSystem::Osx => UnixMode(self.external_attrs >> 16).into(),
                HostSystem::WindowsNtfs | HostSystem::Vfat | HostSystem::MsDos => {
                    MsdosMode(self.external_attrs).into()
                }
                _ => Mode(0),
            };
        }
        if entry.name.ends_with('/') {
            // believe it or not, this is straight from the APPNOTE
            entry.mode |= Mode::DIR
        };

        trace!(name = %entry.name, method = ?entry.method, "parsed directory header");

        Ok(entry)
    }
}
