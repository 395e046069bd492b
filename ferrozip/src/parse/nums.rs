use std::fmt;

macro_rules! fmt_hex_debug {
    ($name: literal, $width: literal) => {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, concat!($name, "({:#0", stringify!($width), "x})"), self.0)
        }
    };
}

/// A 2-byte little-endian word, as stored in every zip record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ZipShort(pub u16);

impl ZipShort {
    /// Serialized size in bytes.
    pub const SIZE: usize = 2;

    /// The little-endian byte form of this word.
    #[inline]
    pub fn bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Read a word from `buf` at `offset`, if there's room.
    #[inline]
    pub fn get(buf: &[u8], offset: usize) -> Option<Self> {
        let b = buf.get(offset..offset + Self::SIZE)?;
        Some(Self(u16::from_le_bytes([b[0], b[1]])))
    }

    /// Append the little-endian byte form to `out`.
    #[inline]
    pub fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bytes());
    }

    /// The value with its bit pattern reinterpreted as signed.
    #[inline]
    pub fn signed(self) -> i16 {
        self.0 as i16
    }
}

impl From<u16> for ZipShort {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl fmt::Debug for ZipShort {
    fmt_hex_debug!("ZipShort", 6);
}

/// A 4-byte little-endian word.
///
/// Besides carrying sizes and offsets, specific constants of this type are
/// the record signatures that drive decoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ZipLong(pub u32);

impl ZipLong {
    /// Serialized size in bytes.
    pub const SIZE: usize = 4;

    /// `PK\x03\x04`, starts a local file header.
    pub const LOCAL_FILE_HEADER: Self = Self(0x0403_4B50);
    /// `PK\x07\x08`, starts a data descriptor (and marks the first segment
    /// of a split archive when found at offset zero).
    pub const DATA_DESCRIPTOR: Self = Self(0x0807_4B50);
    /// `PK\x01\x02`, starts a central directory header.
    pub const CENTRAL_FILE_HEADER: Self = Self(0x0201_4B50);
    /// `PK\x05\x06`, starts the end of central directory record.
    pub const END_OF_CENTRAL_DIRECTORY: Self = Self(0x0605_4B50);
    /// `PK\x06\x07`, starts the zip64 end of central directory locator.
    pub const ZIP64_EOCD_LOCATOR: Self = Self(0x0706_4B50);
    /// `PK\x06\x06`, starts the zip64 end of central directory record.
    pub const ZIP64_EOCD_RECORD: Self = Self(0x0606_4B50);

    /// The little-endian byte form of this word.
    #[inline]
    pub fn bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Read a word from `buf` at `offset`, if there's room.
    #[inline]
    pub fn get(buf: &[u8], offset: usize) -> Option<Self> {
        let b = buf.get(offset..offset + Self::SIZE)?;
        Some(Self(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
    }

    /// Append the little-endian byte form to `out`.
    #[inline]
    pub fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bytes());
    }

    /// The value with its bit pattern reinterpreted as signed.
    #[inline]
    pub fn signed(self) -> i32 {
        self.0 as i32
    }
}

impl From<u32> for ZipLong {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Debug for ZipLong {
    fmt_hex_debug!("ZipLong", 10);
}

/// An 8-byte little-endian word, used by zip64 records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ZipEightByte(pub u64);

impl ZipEightByte {
    /// Serialized size in bytes.
    pub const SIZE: usize = 8;

    /// The little-endian byte form of this word.
    #[inline]
    pub fn bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Read a word from `buf` at `offset`, if there's room.
    #[inline]
    pub fn get(buf: &[u8], offset: usize) -> Option<Self> {
        let b = buf.get(offset..offset + Self::SIZE)?;
        Some(Self(u64::from_le_bytes(b.try_into().unwrap())))
    }

    /// Append the little-endian byte form to `out`.
    #[inline]
    pub fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bytes());
    }

    /// The value with its bit pattern reinterpreted as signed.
    #[inline]
    pub fn signed(self) -> i64 {
        self.0 as i64
    }
}

impl From<u64> for ZipEightByte {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Debug for ZipEightByte {
    fmt_hex_debug!("ZipEightByte", 18);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_round_trip() {
        let s = ZipShort(0x4b50);
        assert_eq!(s.bytes(), [0x50, 0x4b]);
        assert_eq!(ZipShort::get(&s.bytes(), 0), Some(s));

        let l = ZipLong(0x0403_4b50);
        assert_eq!(l.bytes(), [0x50, 0x4b, 0x03, 0x04]);
        assert_eq!(ZipLong::get(&l.bytes(), 0), Some(l));

        let e = ZipEightByte(0x0102_0304_0506_0708);
        assert_eq!(ZipEightByte::get(&e.bytes(), 0), Some(e));
    }

    #[test]
    fn get_refuses_short_buffers() {
        assert_eq!(ZipLong::get(&[0x50, 0x4b, 0x03], 0), None);
        assert_eq!(ZipShort::get(&[0x50], 0), None);
    }

    #[test]
    fn sign_preserving_conversion() {
        assert_eq!(ZipLong(0xFFFF_FFFF).signed(), -1);
        assert_eq!(ZipShort(0x8000).signed(), i16::MIN);
    }

    #[test]
    fn signatures_match_their_ascii_form() {
        assert_eq!(&ZipLong::LOCAL_FILE_HEADER.bytes(), b"PK\x03\x04");
        assert_eq!(&ZipLong::DATA_DESCRIPTOR.bytes(), b"PK\x07\x08");
        assert_eq!(&ZipLong::CENTRAL_FILE_HEADER.bytes(), b"PK\x01\x02");
        assert_eq!(&ZipLong::END_OF_CENTRAL_DIRECTORY.bytes(), b"PK\x05\x06");
        assert_eq!(&ZipLong::ZIP64_EOCD_LOCATOR.bytes(), b"PK\x06\x07");
        assert_eq!(&ZipLong::ZIP64_EOCD_RECORD.bytes(), b"PK\x06\x06");
    }
}
