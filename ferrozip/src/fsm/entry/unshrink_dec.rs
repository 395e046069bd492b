//! Decoder for method 1, PKZIP's "Shrink" compression: LZW with code
//! widths growing from 9 to at most 13 bits, controlled in-band by code
//! 256 (sub-code 1 widens, sub-code 2 partially clears the table).

use crate::error::Error;
use crate::parse::Method;

use super::bit_stream::BitStream;
use super::{DecompressOutcome, Decompressor, HasMoreInput};

fn unshrink_err(msg: impl Into<String>) -> Error {
    Error::Decompression {
        method: Method::Shrink,
        msg: msg.into(),
    }
}

const CONTROL_CODE: usize = 256;
const FIRST_FREE: usize = 257;
const INITIAL_CODE_SIZE: u8 = 9;
const MAX_CODE_SIZE: u8 = 13;
const MAX_TABLE_SIZE: usize = 1 << MAX_CODE_SIZE;

struct Table {
    /// prefix code of each entry, -1 for roots and free slots
    prefixes: Vec<i32>,
    /// last character of each entry
    characters: Vec<u8>,
    /// whether the slot currently holds a live entry
    is_used: Vec<bool>,
    /// where the next free-slot scan starts
    cursor: usize,
}

impl Table {
    fn new() -> Self {
        let mut t = Self {
            prefixes: vec![-1; MAX_TABLE_SIZE],
            characters: vec![0; MAX_TABLE_SIZE],
            is_used: vec![false; MAX_TABLE_SIZE],
            cursor: FIRST_FREE,
        };
        for i in 0..=255usize {
            t.characters[i] = i as u8;
            t.is_used[i] = true;
        }
        t.is_used[CONTROL_CODE] = true;
        t
    }

    /// Claim the next free slot for `prefix || character`. None when the
    /// table is full (the stream then keeps using existing codes).
    fn add_entry(&mut self, prefix: i32, character: u8) -> Option<usize> {
        while self.cursor < MAX_TABLE_SIZE && self.is_used[self.cursor] {
            self.cursor += 1;
        }
        if self.cursor == MAX_TABLE_SIZE {
            return None;
        }
        let slot = self.cursor;
        self.prefixes[slot] = prefix;
        self.characters[slot] = character;
        self.is_used[slot] = true;
        Some(slot)
    }

    /// Partial clear: free every entry that is not the prefix of another
    /// live entry, and let the next allocations reuse those slots.
    fn partial_clear(&mut self) {
        let mut is_parent = vec![false; MAX_TABLE_SIZE];
        for i in FIRST_FREE..MAX_TABLE_SIZE {
            if self.is_used[i] && self.prefixes[i] >= 0 {
                is_parent[self.prefixes[i] as usize] = true;
            }
        }
        for i in FIRST_FREE..MAX_TABLE_SIZE {
            if !is_parent[i] {
                self.is_used[i] = false;
                self.prefixes[i] = -1;
            }
        }
        self.cursor = FIRST_FREE;
    }

    /// The expansion of `code`, last character first. Errors on broken
    /// prefix chains (freed or cyclic), which a corrupt partial clear can
    /// produce.
    fn expand(&self, code: usize, out: &mut Vec<u8>) -> Result<(), Error> {
        out.clear();
        let mut entry = code as i32;
        while entry >= 0 {
            let idx = entry as usize;
            if !self.is_used[idx] || out.len() > MAX_TABLE_SIZE {
                return Err(unshrink_err(format!(
                    "corrupt prefix chain for code {code}"
                )));
            }
            out.push(self.characters[idx]);
            entry = self.prefixes[idx];
        }
        Ok(())
    }
}

pub(crate) struct UnshrinkDec {
    /// compressed bytes accumulated until the input ends; like the
    /// exploder, this decodes in one pass once everything is here
    input: Vec<u8>,

    output: Vec<u8>,
    out_pos: usize,
    decoded: bool,
}

impl UnshrinkDec {
    pub(crate) fn new() -> Self {
        Self {
            input: Vec::new(),
            output: Vec::new(),
            out_pos: 0,
            decoded: false,
        }
    }

    fn decode_all(&mut self) -> Result<(), Error> {
        let mut bits = BitStream::new(&self.input);
        let mut table = Table::new();
        let mut code_size = INITIAL_CODE_SIZE;

        let mut previous_code: i32 = -1;
        let mut previous_first_char: u8 = 0;
        let mut stack = Vec::new();

        loop {
            let code = match bits.next_bits(code_size) {
                None => break,
                Some(c) => c as usize,
            };

            if code == CONTROL_CODE {
                let sub_code = bits
                    .next_bits(code_size)
                    .ok_or_else(|| unshrink_err("unexpected end of stream after control code"))?;
                match sub_code {
                    1 => {
                        if code_size == MAX_CODE_SIZE {
                            return Err(unshrink_err(
                                "attempt to grow the code size beyond 13 bits",
                            ));
                        }
                        code_size += 1;
                    }
                    2 => table.partial_clear(),
                    other => {
                        return Err(unshrink_err(format!("invalid clear sub-code {other}")))
                    }
                }
                continue;
            }

            if code >= MAX_TABLE_SIZE {
                return Err(unshrink_err(format!("code {code} out of range")));
            }

            let mut added_unfinished_entry = false;
            if !table.is_used[code] {
                // the code being defined right now: its expansion must be
                // the previous one plus its own first character
                if previous_code < 0 {
                    return Err(unshrink_err(format!(
                        "the first code cannot be the undefined code {code}"
                    )));
                }
                let new_code = table.add_entry(previous_code, previous_first_char);
                if new_code != Some(code) {
                    // a partial clear can leave the stream referring to
                    // slots we'd never allocate next; bail out rather than
                    // invent data
                    return Err(unshrink_err(format!(
                        "undefined code {code} is not the next free slot"
                    )));
                }
                added_unfinished_entry = true;
            }

            table.expand(code, &mut stack)?;
            let first_char = *stack.last().expect("expansions are never empty");
            for &b in stack.iter().rev() {
                self.output.push(b);
            }

            if previous_code >= 0 && !added_unfinished_entry {
                // grow the table: previous expansion plus the first
                // character of this one. A full table is not an error.
                let _ = table.add_entry(previous_code, first_char);
            }

            previous_code = code as i32;
            previous_first_char = first_char;
        }

        Ok(())
    }
}

impl Decompressor for UnshrinkDec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        let mut outcome = DecompressOutcome {
            bytes_read: in_buf.len(),
            ..Default::default()
        };
        self.input.extend_from_slice(in_buf);

        if !self.decoded {
            match has_more_input {
                HasMoreInput::Yes => return Ok(outcome),
                HasMoreInput::No => {
                    self.decode_all()?;
                    self.decoded = true;
                }
            }
        }

        let remaining = &self.output[self.out_pos..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.out_pos += n;
        outcome.bytes_written = n;
        outcome.done = self.out_pos == self.output.len();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fsm::entry::{Decompressor, HasMoreInput};

    /// Pack `(value, width)` pairs LSB-first, the way shrunk streams are
    /// laid out.
    fn pack(codes: &[(u32, u8)]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cache: u32 = 0;
        let mut cached: u8 = 0;
        for &(value, width) in codes {
            cache |= value << cached;
            cached += width;
            while cached >= 8 {
                out.push(cache as u8);
                cache >>= 8;
                cached -= 8;
            }
        }
        if cached > 0 {
            out.push(cache as u8);
        }
        out
    }

    fn unshrink(input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut dec = UnshrinkDec::new();
        let mut out = vec![0u8; 4096];
        let outcome = dec.decompress(input, &mut out, HasMoreInput::No)?;
        assert!(outcome.done);
        out.truncate(outcome.bytes_written);
        Ok(out)
    }

    #[test]
    fn literals_and_table_codes() {
        // "abababab" shrinks to: a, b, 257 (=ab), 259 (=aba, the KwKwK
        // case: 259 is consumed while being defined), b
        let input = pack(&[(97, 9), (98, 9), (257, 9), (259, 9), (98, 9)]);
        assert_eq!(unshrink(&input).unwrap(), b"abababab");
    }

    #[test]
    fn control_code_grows_code_width() {
        let input = pack(&[(97, 9), (256, 9), (1, 9), (98, 10)]);
        assert_eq!(unshrink(&input).unwrap(), b"ab");
    }

    #[test]
    fn code_width_is_capped_at_13() {
        let mut codes = vec![(97u32, 9u8)];
        let mut width = 9;
        for _ in 0..5 {
            codes.push((256, width));
            codes.push((1, width));
            width += 1;
        }
        let input = pack(&codes);
        let err = unshrink(&input).unwrap_err();
        assert!(err.to_string().contains("beyond 13 bits"));
    }

    #[test]
    fn partial_clear_frees_non_prefix_entries() {
        // build 257=ab, 258=ba; the clear frees both; referring to 257
        // right after defines it anew as "aa" (the KwKwK case on a reused
        // slot), proving the old "ab" is gone
        let input = pack(&[
            (97, 9), // a
            (98, 9), // b, defines 257=ab
            (97, 9), // a, defines 258=ba
            (256, 9),
            (2, 9),   // partial clear
            (257, 9), // reused slot: 257=aa
        ]);
        assert_eq!(unshrink(&input).unwrap(), b"abaaa");
    }

    #[test]
    fn vacated_slot_with_broken_chain_is_an_error() {
        // 257=ab, 258=ba are freed by the clear; referring to 258 next
        // would allocate 257, not 258
        let input = pack(&[
            (97, 9),
            (98, 9),
            (97, 9),
            (256, 9),
            (2, 9),
            (258, 9),
        ]);
        assert!(unshrink(&input).is_err());
    }

    #[test]
    fn invalid_sub_code_is_an_error() {
        let input = pack(&[(97, 9), (256, 9), (7, 9)]);
        let err = unshrink(&input).unwrap_err();
        assert!(err.to_string().contains("sub-code"));
    }
}
