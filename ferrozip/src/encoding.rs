//! Character encodings used in ZIP files.
//!
//! ZIP entry paths may be encoded in a variety of character encodings:
//! historically, CP-437 was used, but many modern zip files use UTF-8 with an
//! optional UTF-8 flag (general-purpose bit 11).
//!
//! Others use the system's local character encoding, and we have no choice but
//! to make an educated guess thanks to the chardet-ng crate.
//!
//! On the write side, a name that cannot be represented in the archive
//! encoding is escaped one UTF-16 code unit at a time as `%Uxxxx`, so that
//! re-encoding is at least reversible by a human.

use std::fmt;

/// Encodings supported by this crate
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Encoding {
    /// [UTF-8](https://en.wikipedia.org/wiki/UTF-8), opt-in for ZIP files.
    Utf8,

    /// [Codepage 437](https://en.wikipedia.org/wiki/Code_page_437), also known as
    /// OEM-US, PC-8, or DOS Latin US.
    ///
    /// This is the fallback if UTF-8 is not specified and no other encoding
    /// is auto-detected. It was the original encoding of the zip format.
    Cp437,

    /// ISO/IBM 8859-1, a.k.a. Latin-1. One byte per code point, covering
    /// U+0000 through U+00FF.
    Latin1,

    /// Plain 7-bit US-ASCII. Everything above 0x7F is unmappable.
    Ascii,

    /// UTF-16, big-endian, no BOM. Rare in the wild but cheap to support
    /// since the escape fallback already thinks in UTF-16 code units.
    Utf16Be,

    /// [Shift JIS](https://en.wikipedia.org/wiki/Shift_JIS), also known as SJIS.
    ///
    /// Still in use by some Japanese users as of 2019.
    ShiftJis,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Encoding as T;
        match self {
            T::Utf8 => write!(f, "utf-8"),
            T::Cp437 => write!(f, "cp-437"),
            T::Latin1 => write!(f, "iso-8859-1"),
            T::Ascii => write!(f, "us-ascii"),
            T::Utf16Be => write!(f, "utf-16be"),
            T::ShiftJis => write!(f, "shift-jis"),
        }
    }
}

/// Errors encountered while converting text to UTF-8.
#[derive(Debug)]
pub enum DecodingError {
    /// Text claimed to be UTF-8, but wasn't (as far as we can tell).
    Utf8Error(std::str::Utf8Error),

    /// Text is too large to be converted.
    ///
    /// In practice, this happens if the text's length is larger than
    /// [usize::MAX], which seems unlikely.
    StringTooLarge,

    /// Text is not valid in the given encoding.
    EncodingError(&'static str),
}

impl From<std::str::Utf8Error> for DecodingError {
    fn from(e: std::str::Utf8Error) -> Self {
        DecodingError::Utf8Error(e)
    }
}

impl fmt::Display for DecodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8Error(utf8) => write!(f, "invalid utf-8: {utf8}"),
            Self::StringTooLarge => f.write_str("text too large to be converted"),
            Self::EncodingError(enc) => write!(f, "encoding error: {enc}"),
        }
    }
}

impl std::error::Error for DecodingError {}

impl Encoding {
    /// Decode bytes in this encoding into a Rust string.
    pub fn decode(&self, i: &[u8]) -> Result<String, DecodingError> {
        match self {
            Encoding::Utf8 => {
                let s = std::str::from_utf8(i)?;
                Ok(s.to_string())
            }
            Encoding::Cp437 => Ok(oem_cp::decode_string_complete_table(
                i,
                &oem_cp::code_table::DECODING_TABLE_CP437,
            )),
            Encoding::Latin1 => Ok(i.iter().map(|&b| b as char).collect()),
            Encoding::Ascii => {
                if i.iter().any(|&b| b >= 0x80) {
                    return Err(DecodingError::EncodingError("us-ascii"));
                }
                Ok(i.iter().map(|&b| b as char).collect())
            }
            Encoding::Utf16Be => self.decode_as(i, encoding_rs::UTF_16BE),
            Encoding::ShiftJis => self.decode_as(i, encoding_rs::SHIFT_JIS),
        }
    }

    fn decode_as(
        &self,
        i: &[u8],
        encoding: &'static encoding_rs::Encoding,
    ) -> Result<String, DecodingError> {
        let mut decoder = encoding.new_decoder_without_bom_handling();
        let len = decoder
            .max_utf8_buffer_length(i.len())
            .ok_or(DecodingError::StringTooLarge)?;
        let mut v = vec![0u8; len];
        let last = true;
        let (_decoder_result, _decoder_read, decoder_written, had_errors) =
            decoder.decode_to_utf8(i, &mut v, last);
        if had_errors {
            return Err(DecodingError::EncodingError(encoding.name()));
        }
        v.resize(decoder_written, 0u8);
        Ok(unsafe { String::from_utf8_unchecked(v) })
    }

    /// Whether every character of `s` has a representation in this encoding.
    ///
    /// When this returns true, [Encoding::encode] is lossless and
    /// [Encoding::decode] of the result round-trips.
    pub fn can_encode(&self, s: &str) -> bool {
        s.chars().all(|c| self.encode_char(c, &mut Vec::new()))
    }

    /// Encode a name into this encoding.
    ///
    /// Characters without a representation are escaped as ASCII `%Uxxxx`
    /// (uppercase hex), one escape per UTF-16 code unit: a code point outside
    /// the BMP produces two escapes, one per surrogate half.
    pub fn encode(&self, s: &str) -> Vec<u8> {
        // fast path: everything maps
        let mut out = Vec::with_capacity(s.len());
        let mut clean = true;
        for c in s.chars() {
            if !self.encode_char(c, &mut out) {
                clean = false;
                break;
            }
        }
        if clean {
            return out;
        }

        let units: Vec<u16> = s.encode_utf16().collect();
        self.encode_units(&units)
    }

    /// Encode a name given as raw UTF-16 code units.
    ///
    /// This is the full-fidelity variant of [Encoding::encode]: isolated
    /// surrogate halves are escaped as `%Uxxxx` like any other unmappable
    /// unit, except for a high surrogate that is the last unit of the input,
    /// which is dropped (the encoder is still waiting for the low half when
    /// the input ends).
    pub fn encode_units(&self, units: &[u16]) -> Vec<u8> {
        let mut out = Vec::with_capacity(units.len());
        let mut i = 0;
        while i < units.len() {
            let u = units[i];
            if (0xD800..0xDC00).contains(&u) {
                // high surrogate: pair it up if we can
                match units.get(i + 1) {
                    Some(&lo) if (0xDC00..0xE000).contains(&lo) => {
                        let c = char::from_u32(
                            0x10000 + (((u as u32 - 0xD800) << 10) | (lo as u32 - 0xDC00)),
                        )
                        .expect("valid surrogate pair");
                        if !self.encode_char(c, &mut out) {
                            push_escape(&mut out, u);
                            push_escape(&mut out, lo);
                        }
                        i += 2;
                        continue;
                    }
                    Some(_) => {
                        // unpaired high surrogate mid-input
                        push_escape(&mut out, u);
                        i += 1;
                        continue;
                    }
                    None => {
                        // partial surrogate at end of input: swallowed
                        break;
                    }
                }
            }
            if (0xDC00..0xE000).contains(&u) {
                // unpaired low surrogate
                push_escape(&mut out, u);
                i += 1;
                continue;
            }
            let c = char::from_u32(u as u32).expect("BMP code unit");
            if !self.encode_char(c, &mut out) {
                push_escape(&mut out, u);
            }
            i += 1;
        }
        out
    }

    /// Append the representation of `c`, returning false (and appending
    /// nothing) if this encoding has none.
    fn encode_char(&self, c: char, out: &mut Vec<u8>) -> bool {
        match self {
            Encoding::Utf8 => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                true
            }
            Encoding::Ascii => {
                if c.is_ascii() {
                    out.push(c as u8);
                    true
                } else {
                    false
                }
            }
            Encoding::Latin1 => {
                let v = c as u32;
                if v <= 0xFF {
                    out.push(v as u8);
                    true
                } else {
                    false
                }
            }
            Encoding::Cp437 => {
                if c.is_ascii() {
                    out.push(c as u8);
                    return true;
                }
                // the decoding table covers 0x80..=0xFF; invert it
                for (idx, &t) in oem_cp::code_table::DECODING_TABLE_CP437.iter().enumerate() {
                    if t == c {
                        out.push(0x80 + idx as u8);
                        return true;
                    }
                }
                false
            }
            Encoding::Utf16Be => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
                true
            }
            Encoding::ShiftJis => {
                let mut buf = [0u8; 4];
                let s = c.encode_utf8(&mut buf);
                let (bytes, _, had_errors) = encoding_rs::SHIFT_JIS.encode(s);
                if had_errors {
                    false
                } else {
                    out.extend_from_slice(&bytes);
                    true
                }
            }
        }
    }
}

fn push_escape(out: &mut Vec<u8>, unit: u16) {
    use std::io::Write;
    // %Uxxxx, uppercase, always 4 digits
    let _ = write!(out, "%U{unit:04X}");
}

// detect_utf8 reports whether s is a valid UTF-8 string, and whether the string
// must be considered UTF-8 encoding (i.e., not compatible with CP-437, ASCII,
// or any other common encoding).
pub(crate) fn detect_utf8(input: &[u8]) -> (bool, bool) {
    match std::str::from_utf8(input) {
        Err(_) => {
            // not valid utf-8
            (false, false)
        }
        Ok(s) => {
            let mut require = false;

            // Officially, ZIP uses CP-437, but many readers use the system's
            // local character encoding. Most encoding are compatible with a large
            // subset of CP-437, which itself is ASCII-like.
            //
            // Forbid 0x7e and 0x5c since EUC-KR and Shift-JIS replace those
            // characters with localized currency and overline characters.
            for c in s.chars() {
                if c < 0x20 as char || c > 0x7d as char || c == 0x5c as char {
                    require = true
                }
            }
            (true, require)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Encoding;

    #[test]
    fn ascii_escapes_diacritics() {
        let encoded = Encoding::Ascii.encode("äöü");
        assert_eq!(&encoded[..], b"%U00E4%U00F6%U00FC");

        let encoded = Encoding::Ascii.encode("ä ö ü");
        assert_eq!(&encoded[..], b"%U00E4 %U00F6 %U00FC");

        assert!(!Encoding::Ascii.can_encode("ä"));
        assert!(Encoding::Ascii.can_encode("a plain name.txt"));
    }

    #[test]
    fn ascii_escapes_surrogate_halves_of_rainbow() {
        // U+1F308 RAINBOW, surrogate pair D83C DF08
        let encoded = Encoding::Ascii.encode("\u{1F308}");
        assert_eq!(&encoded[..], b"%UD83C%UDF08");
    }

    #[test]
    fn utf16be_encodes_rainbow_raw() {
        let encoded = Encoding::Utf16Be.encode("\u{1F308}");
        assert_eq!(&encoded[..], &[0xD8, 0x3C, 0xDF, 0x08]);
    }

    #[test]
    fn partial_surrogate_at_end_of_input_is_swallowed() {
        let encoded = Encoding::Ascii.encode_units(&[0xD83C]);
        assert!(encoded.is_empty());
    }

    #[test]
    fn isolated_high_surrogate_mid_input_is_escaped() {
        let encoded = Encoding::Ascii.encode_units(&[0xD83C, 0x0041]);
        assert_eq!(&encoded[..], b"%UD83CA");
    }

    #[test]
    fn cp437_round_trips_french() {
        let encoded = Encoding::Cp437.encode("français");
        assert_eq!(encoded.len(), 8);
        let decoded = Encoding::Cp437.decode(&encoded).unwrap();
        assert_eq!(decoded, "français");
    }

    #[test]
    fn latin1_decodes_each_byte() {
        assert_eq!(Encoding::Latin1.decode(&[0x66, 0xE9]).unwrap(), "fé");
    }

    #[test]
    fn ascii_decode_rejects_high_bytes() {
        assert!(Encoding::Ascii.decode(&[0x80]).is_err());
    }
}
