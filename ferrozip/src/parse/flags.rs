use std::fmt;

use winnow::{binary::le_u16, PResult, Parser, Partial};

/// The 16-bit general purpose bit flag carried by local file headers and
/// central directory headers.
///
/// The most noteworthy bits: bit 0 marks encryption, bit 3 announces a data
/// descriptor after the payload, bit 11 marks UTF-8 names and comments.
/// Bits 1 and 2 are overloaded per method; for Implode they select the
/// sliding dictionary size and the number of Shannon-Fano trees.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GeneralPurposeBit(pub u16);

impl GeneralPurposeBit {
    const ENCRYPTION: u16 = 1 << 0;
    const SLIDING_DICTIONARY_8K: u16 = 1 << 1;
    const THREE_SHANNON_FANO_TREES: u16 = 1 << 2;
    const DATA_DESCRIPTOR: u16 = 1 << 3;
    const STRONG_ENCRYPTION: u16 = 1 << 6;
    const UTF8_NAMES: u16 = 1 << 11;

    /// Parser for the flag word.
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        le_u16.map(Self).parse_next(i)
    }

    /// The two-byte little-endian form, as written into headers.
    #[inline]
    pub fn encode(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Whether a data descriptor trails the entry's payload (bit 3).
    #[inline]
    pub fn uses_data_descriptor(self) -> bool {
        self.0 & Self::DATA_DESCRIPTOR != 0
    }

    /// Set or clear the data descriptor bit.
    pub fn set_uses_data_descriptor(&mut self, b: bool) {
        self.set(Self::DATA_DESCRIPTOR, b)
    }

    /// Whether names and comments are UTF-8 encoded (bit 11, the
    /// "language encoding flag").
    #[inline]
    pub fn uses_utf8_names(self) -> bool {
        self.0 & Self::UTF8_NAMES != 0
    }

    /// Set or clear the language encoding flag.
    pub fn set_uses_utf8_names(&mut self, b: bool) {
        self.set(Self::UTF8_NAMES, b)
    }

    /// Whether the entry is encrypted (bit 0). Strong encryption (bit 6)
    /// implies this.
    #[inline]
    pub fn uses_encryption(self) -> bool {
        self.0 & Self::ENCRYPTION != 0
    }

    /// Set or clear the encryption bit. Clearing it also clears the strong
    /// encryption bit.
    pub fn set_uses_encryption(&mut self, b: bool) {
        self.set(Self::ENCRYPTION, b);
        if !b {
            self.set(Self::STRONG_ENCRYPTION, false);
        }
    }

    /// Whether the entry uses strong encryption (bit 6 together with bit 0).
    #[inline]
    pub fn uses_strong_encryption(self) -> bool {
        self.uses_encryption() && self.0 & Self::STRONG_ENCRYPTION != 0
    }

    /// Set strong encryption; setting also sets the plain encryption bit.
    pub fn set_uses_strong_encryption(&mut self, b: bool) {
        self.set(Self::STRONG_ENCRYPTION, b);
        if b {
            self.set(Self::ENCRYPTION, true);
        }
    }

    /// Sliding dictionary size used by the Implode method: 8192 bytes when
    /// bit 1 is set, 4096 otherwise.
    #[inline]
    pub fn implode_dictionary_size(self) -> usize {
        if self.0 & Self::SLIDING_DICTIONARY_8K != 0 {
            8192
        } else {
            4096
        }
    }

    /// Number of Shannon-Fano trees used by the Implode method: 3 when bit 2
    /// is set (a dedicated literal tree), 2 otherwise.
    #[inline]
    pub fn implode_tree_count(self) -> usize {
        if self.0 & Self::THREE_SHANNON_FANO_TREES != 0 {
            3
        } else {
            2
        }
    }

    fn set(&mut self, mask: u16, b: bool) {
        if b {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

impl From<u16> for GeneralPurposeBit {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl fmt::Debug for GeneralPurposeBit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GeneralPurposeBit({:#06x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::GeneralPurposeBit;

    #[test]
    fn round_trips_through_bytes() {
        let mut gpb = GeneralPurposeBit::default();
        gpb.set_uses_data_descriptor(true);
        gpb.set_uses_utf8_names(true);
        assert_eq!(gpb.encode(), [0x08, 0x08]);

        let parsed = GeneralPurposeBit(u16::from_le_bytes(gpb.encode()));
        assert_eq!(parsed, gpb);
        assert!(parsed.uses_data_descriptor());
        assert!(parsed.uses_utf8_names());
        assert!(!parsed.uses_encryption());
    }

    #[test]
    fn strong_encryption_implies_encryption() {
        let mut gpb = GeneralPurposeBit::default();
        gpb.set_uses_strong_encryption(true);
        assert!(gpb.uses_encryption());
        assert!(gpb.uses_strong_encryption());

        gpb.set_uses_encryption(false);
        assert!(!gpb.uses_strong_encryption());
        assert_eq!(gpb.0, 0);
    }

    #[test]
    fn implode_sub_flags() {
        assert_eq!(GeneralPurposeBit(0).implode_dictionary_size(), 4096);
        assert_eq!(GeneralPurposeBit(0).implode_tree_count(), 2);
        assert_eq!(GeneralPurposeBit(0b010).implode_dictionary_size(), 8192);
        assert_eq!(GeneralPurposeBit(0b100).implode_tree_count(), 3);
    }
}
