use crate::{
    encoding::Encoding,
    error::Error,
    parse::{
        parse_extra_fields, zero_datetime, Entry, ExtraField, ExtraFieldSettings,
        GeneralPurposeBit, Method, Mode, MsdosTimestamp, UnparseableBehavior, Version, ZipBytes,
        ZipLong, ZipShort, ZipString,
    },
};

use winnow::{
    binary::{le_u16, le_u32, le_u64},
    combinator::opt,
    seq,
    token::literal,
    PResult, Parser, Partial,
};

/// 4.3.7 Local file header
#[derive(Debug)]
pub struct LocalFileHeaderRecord {
    /// version needed to extract
    pub reader_version: Version,

    /// general purpose bit flag
    pub flags: GeneralPurposeBit,

    /// compression method
    pub method: Method,

    /// last mod file datetime
    pub modified: MsdosTimestamp,

    /// crc-32
    pub crc32: u32,

    /// compressed size
    pub compressed_size: u32,

    /// uncompressed size
    pub uncompressed_size: u32,

    /// file name
    pub name: ZipString,

    /// extra field
    pub extra: ZipBytes,
}

impl LocalFileHeaderRecord {
    /// The signature for a local file header
    pub const SIGNATURE: &'static str = "PK\x03\x04";

    /// Serialized size of the fixed part, name and extra excluded.
    pub const FIXED_SIZE: usize = 30;

    /// Parser for the local file header
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = literal(Self::SIGNATURE).parse_next(i)?;

        let reader_version = Version::parser.parse_next(i)?;
        let flags = GeneralPurposeBit::parser.parse_next(i)?;
        let method = le_u16.parse_next(i).map(Method::from)?;
        let modified = MsdosTimestamp::parser.parse_next(i)?;
        let crc32 = le_u32.parse_next(i)?;
        let compressed_size = le_u32.parse_next(i)?;
        let uncompressed_size = le_u32.parse_next(i)?;

        let name_len = le_u16.parse_next(i)?;
        let extra_len = le_u16.parse_next(i)?;

        let name = ZipString::parser(name_len).parse_next(i)?;
        let extra = ZipBytes::parser(extra_len).parse_next(i)?;

        Ok(Self {
            reader_version,
            flags,
            method,
            modified,
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }

    /// Append the serialized header, name and extra field included.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        ZipLong::LOCAL_FILE_HEADER.put(out);
        out.extend_from_slice(&self.reader_version.encode());
        out.extend_from_slice(&self.flags.encode());
        ZipShort(self.method.into()).put(out);
        out.extend_from_slice(&self.modified.encode());
        ZipLong(self.crc32).put(out);
        ZipLong(self.compressed_size).put(out);
        ZipLong(self.uncompressed_size).put(out);
        ZipShort(self.name.0.len() as u16).put(out);
        ZipShort(self.extra.0.len() as u16).put(out);
        out.extend_from_slice(&self.name.0);
        out.extend_from_slice(&self.extra.0);
    }

    /// Check for the presence of the bit flag that indicates a data descriptor
    /// is present after the file data.
    pub fn has_data_descriptor(&self) -> bool {
        // 4.3.9.1 This descriptor MUST exist if bit 3 of the general
        // purpose bit flag is set (see below).
        self.flags.uses_data_descriptor()
    }

    /// Interpret this local header as an [Entry].
    ///
    /// `fallback` is the archive encoding used when the UTF-8 flag is
    /// absent. Compared to an entry built from the central directory, some
    /// information is missing (offsets, external attributes).
    pub fn as_entry(&self, fallback: Encoding) -> Result<Entry, Error> {
        let encoding = if self.flags.uses_utf8_names() {
            Encoding::Utf8
        } else {
            fallback
        };
        let name = encoding.decode(&self.name.0)?;

        let needs_uncompressed_size = self.uncompressed_size == !0u32;
        let needs_compressed_size = self.compressed_size == !0u32;
        let settings = ExtraFieldSettings {
            needs_uncompressed_size,
            needs_compressed_size,
            ..Default::default()
        };
        let extra_fields = parse_extra_fields(
            &self.extra.0,
            true,
            UnparseableBehavior::Read,
            settings,
        )?;

        let mut entry = Entry {
            name,
            raw_name: self.name.0.clone(),
            method: self.method,
            modified: self.modified.to_datetime().unwrap_or_else(zero_datetime),
            reader_version: self.reader_version,
            flags: self.flags,
            crc32: self.crc32,
            compressed_size: self.compressed_size as u64,
            uncompressed_size: self.uncompressed_size as u64,
            is_zip64: needs_compressed_size || needs_uncompressed_size,
            ..Default::default()
        };

        for ef in &extra_fields {
            entry.set_extra_field(ef);
            if let ExtraField::UnicodePath(f) = ef {
                if f.applies_to(&self.name.0) {
                    if let Ok(s) = std::str::from_utf8(&f.unicode) {
                        entry.name = s.to_string();
                    }
                }
            }
        }
        entry.extra_fields = extra_fields;

        if entry.name.ends_with('/') {
            // believe it or not, this is straight from the APPNOTE
            entry.mode |= Mode::DIR
        }

        Ok(entry)
    }
}

/// 4.3.9  Data descriptor:
#[derive(Debug)]
pub struct DataDescriptorRecord {
    /// CRC32 checksum
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
}

impl DataDescriptorRecord {
    const SIGNATURE: &'static str = "PK\x07\x08";

    /// Create a parser for the data descriptor record.
    pub fn mk_parser(is_zip64: bool) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self> {
        move |i| {
            // From appnote.txt:
            //
            // 4.3.9.3 Although not originally assigned a signature, the value
            // 0x08074b50 has commonly been adopted as a signature value for the
            // data descriptor record.  Implementers SHOULD be aware that ZIP files
            // MAY be encountered with or without this signature marking data
            // descriptors and SHOULD account for either case when reading ZIP files
            // to ensure compatibility.
            let _ = opt(literal(Self::SIGNATURE)).parse_next(i)?;

            if is_zip64 {
                seq! {Self {
                    crc32: le_u32,
                    compressed_size: le_u64,
                    uncompressed_size: le_u64,
                }}
                .parse_next(i)
            } else {
                seq! {Self {
                    crc32: le_u32,
                    compressed_size: le_u32.map(|x| x as u64),
                    uncompressed_size: le_u32.map(|x| x as u64),
                }}
                .parse_next(i)
            }
        }
    }

    /// Append the serialized record. The signature, optional on read, is
    /// always written.
    pub fn write_to(&self, out: &mut Vec<u8>, is_zip64: bool) {
        ZipLong::DATA_DESCRIPTOR.put(out);
        ZipLong(self.crc32).put(out);
        if is_zip64 {
            crate::parse::ZipEightByte(self.compressed_size).put(out);
            crate::parse::ZipEightByte(self.uncompressed_size).put(out);
        } else {
            ZipLong(self.compressed_size as u32).put(out);
            ZipLong(self.uncompressed_size as u32).put(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{
        GeneralPurposeBit, HostSystem, Method, MsdosTimestamp, Version, ZipBytes, ZipString,
    };
    use winnow::{Parser, Partial};

    #[test]
    fn local_header_round_trips() {
        let header = LocalFileHeaderRecord {
            reader_version: Version {
                host_system: crate::parse::HostSystem::Unix,
                version: Version::NEEDED_BASELINE,
            },
            flags: GeneralPurposeBit(0x0800),
            method: Method::Deflate,
            modified: MsdosTimestamp {
                time: 0x7d1c,
                date: 0x354b,
            },
            crc32: 0x1234_5678,
            compressed_size: 100,
            uncompressed_size: 256,
            name: ZipString(b"dir/hello.txt".to_vec()),
            extra: ZipBytes(vec![]),
        };

        let mut bytes = Vec::new();
        header.write_to(&mut bytes);
        assert_eq!(
            bytes.len(),
            LocalFileHeaderRecord::FIXED_SIZE + header.name.0.len()
        );
        assert_eq!(&bytes[..4], b"PK\x03\x04");

        let (_, reparsed) = LocalFileHeaderRecord::parser
            .parse_peek(Partial::new(&bytes[..]))
            .unwrap();
        assert_eq!(reparsed.method, Method::Deflate);
        assert_eq!(reparsed.crc32, 0x1234_5678);
        assert_eq!(reparsed.compressed_size, 100);
        assert_eq!(reparsed.name, header.name);
        assert!(!reparsed.has_data_descriptor());
    }

    #[test]
    fn data_descriptor_signature_is_optional_on_read() {
        let record = DataDescriptorRecord {
            crc32: 0xCAFE_BABE,
            compressed_size: 10,
            uncompressed_size: 20,
        };

        let mut with_sig = Vec::new();
        record.write_to(&mut with_sig, false);
        assert_eq!(with_sig.len(), 16);

        let (_, parsed) = DataDescriptorRecord::mk_parser(false)
            .parse_peek(Partial::new(&with_sig[..]))
            .unwrap();
        assert_eq!(parsed.crc32, 0xCAFE_BABE);

        let (_, parsed) = DataDescriptorRecord::mk_parser(false)
            .parse_peek(Partial::new(&with_sig[4..]))
            .unwrap();
        assert_eq!(parsed.compressed_size, 10);
        assert_eq!(parsed.uncompressed_size, 20);
    }

    #[test]
    fn zip64_data_descriptor_uses_eight_byte_sizes() {
        let record = DataDescriptorRecord {
            crc32: 1,
            compressed_size: 0x1_0000_0000,
            uncompressed_size: 0x2_0000_0000,
        };
        let mut bytes = Vec::new();
        record.write_to(&mut bytes, true);
        assert_eq!(bytes.len(), 24);

        let (_, parsed) = DataDescriptorRecord::mk_parser(true)
            .parse_peek(Partial::new(&bytes[..]))
            .unwrap();
        assert_eq!(parsed.compressed_size, 0x1_0000_0000);
        assert_eq!(parsed.uncompressed_size, 0x2_0000_0000);
    }
}
