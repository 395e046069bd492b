//! Decoder for method 6, PKZIP's "Implode" compression: a 4 or 8 KiB
//! sliding dictionary, two or three Shannon-Fano trees, and matches of at
//! least two or three bytes, depending on the flag bits of the entry.

mod binary_tree;
mod window;

use binary_tree::BinaryTree;
use window::CircularWindow;

use crate::fsm::entry::bit_stream::BitStream;

use crate::{error::Error, parse::GeneralPurposeBit, parse::Method};

use super::{DecompressOutcome, Decompressor, HasMoreInput};

fn explode_err(msg: impl Into<String>) -> Error {
    Error::Decompression {
        method: Method::Implode,
        msg: msg.into(),
    }
}

pub(crate) struct ExplodeDec {
    dictionary_size: usize,
    tree_count: usize,

    /// compressed bytes accumulated until the input ends. The trees sit at
    /// the very front, so decoding only starts once everything is here;
    /// imploded entries are early-90s sized, buffering them whole is fine.
    input: Vec<u8>,

    output: Vec<u8>,
    out_pos: usize,
    decoded: bool,
}

impl ExplodeDec {
    pub(crate) fn new(dictionary_size: usize, tree_count: usize) -> Result<Self, Error> {
        if dictionary_size != 4096 && dictionary_size != 8192 {
            return Err(explode_err(format!(
                "invalid dictionary size: {dictionary_size} (must be 4096 or 8192)"
            )));
        }
        if tree_count != 2 && tree_count != 3 {
            return Err(explode_err(format!(
                "invalid number of trees: {tree_count} (must be 2 or 3)"
            )));
        }
        Ok(Self {
            dictionary_size,
            tree_count,
            input: Vec::new(),
            output: Vec::new(),
            out_pos: 0,
            decoded: false,
        })
    }

    /// Configuration comes from the entry's general purpose bits 1 and 2.
    pub(crate) fn from_flags(flags: GeneralPurposeBit) -> Result<Self, Error> {
        Self::new(flags.implode_dictionary_size(), flags.implode_tree_count())
    }

    fn decode_all(&mut self) -> Result<(), Error> {
        let mut offset = 0usize;

        let literal_tree = if self.tree_count == 3 {
            let (tree, consumed) = BinaryTree::decode(&self.input[offset..], 256)?;
            offset += consumed;
            Some(tree)
        } else {
            None
        };
        let (length_tree, consumed) = BinaryTree::decode(&self.input[offset..], 64)?;
        offset += consumed;
        let (distance_tree, consumed) = BinaryTree::decode(&self.input[offset..], 64)?;
        offset += consumed;

        let distance_low_bits: u8 = if self.dictionary_size == 4096 { 6 } else { 7 };
        let minimum_match_length = if self.tree_count == 3 { 2 } else { 3 };

        let mut window = CircularWindow::new(self.dictionary_size);
        let mut bits = BitStream::new(&self.input[offset..]);

        loop {
            let flag = match bits.next_bit() {
                None => break,
                Some(flag) => flag,
            };

            if flag == 1 {
                // literal byte
                let literal = match &literal_tree {
                    Some(tree) => match tree.read(&mut bits)? {
                        Some(v) => v as u8,
                        None => break,
                    },
                    None => match bits.next_bits(8) {
                        Some(v) => v as u8,
                        None => break,
                    },
                };
                window.put(literal);
            } else {
                let low = match bits.next_bits(distance_low_bits) {
                    Some(v) => v,
                    None => break,
                };
                let high = match distance_tree.read(&mut bits)? {
                    Some(v) => v,
                    // trailing padding bits decode as a zero flag and zero
                    // low distance bits, then run dry
                    None if low == 0 => break,
                    None => return Err(explode_err("unexpected end of stream mid-match")),
                };
                let distance = ((high << distance_low_bits) | low) as usize + 1;

                let mut length = match length_tree.read(&mut bits)? {
                    Some(v) => v as usize,
                    None => return Err(explode_err("unexpected end of stream mid-match")),
                };
                if length == 63 {
                    length += bits
                        .next_bits(8)
                        .ok_or_else(|| explode_err("unexpected end of stream mid-match"))?
                        as usize;
                }
                length += minimum_match_length;

                window.copy(distance, length);
            }

            while let Some(b) = window.get() {
                self.output.push(b);
            }
        }

        while let Some(b) = window.get() {
            self.output.push(b);
        }
        Ok(())
    }
}

impl Decompressor for ExplodeDec {
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
    use crate::fsm::entry::{Decompressor, HasMoreInput};

    /// length table for 64 six-bit codes: four runs of sixteen
    const FLAT_64: &[u8] = &[0x03, 0xF5, 0xF5, 0xF5, 0xF5];

    fn explode(dec: &mut ExplodeDec, input: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 1024];
        let outcome = dec.decompress(input, &mut out, HasMoreInput::No).unwrap();
        assert!(outcome.done);
        out.truncate(outcome.bytes_written);
        out
    }

    #[test]
    fn rejects_invalid_configurations() {
        assert!(ExplodeDec::new(4095, 2).is_err());
        assert!(ExplodeDec::new(4096, 4).is_err());
        assert!(ExplodeDec::new(4096, 2).is_ok());
        assert!(ExplodeDec::new(8192, 3).is_ok());
    }

    #[test]
    fn two_tree_literals() {
        // two raw literals 'A' and 'B', then zero padding
        let mut input = Vec::new();
        input.extend_from_slice(FLAT_64); // length tree
        input.extend_from_slice(FLAT_64); // distance tree
        input.extend_from_slice(&[0x83, 0x0A, 0x01]);

        let mut dec = ExplodeDec::new(4096, 2).unwrap();
        assert_eq!(explode(&mut dec, &input), b"AB");
    }

    #[test]
    fn two_tree_match_repeats_the_window() {
        // literal 'A', then a distance-1 length-3 match
        let mut input = Vec::new();
        input.extend_from_slice(FLAT_64);
        input.extend_from_slice(FLAT_64);
        input.extend_from_slice(&[0x83, 0x00, 0xFF, 0x0F]);

        let mut dec = ExplodeDec::new(4096, 2).unwrap();
        assert_eq!(explode(&mut dec, &input), b"AAAA");
    }

    #[test]
    fn three_tree_literal_goes_through_the_literal_tree() {
        // literal 'A' through the 256-value tree, then a distance-1
        // length-2 match (minimum match length is 2 with three trees)
        let mut input = Vec::new();
        input.push(0x0F); // literal tree: sixteen runs of sixteen 8-bit codes
        input.extend(std::iter::repeat(0xF7).take(16));
        input.extend_from_slice(FLAT_64);
        input.extend_from_slice(FLAT_64);
        input.extend_from_slice(&[0xFB, 0x00, 0xFF, 0x0F]);

        let mut dec = ExplodeDec::new(4096, 3).unwrap();
        assert_eq!(explode(&mut dec, &input), b"AAA");
    }

    #[test]
    fn input_arrives_in_pieces() {
        let mut input = Vec::new();
        input.extend_from_slice(FLAT_64);
        input.extend_from_slice(FLAT_64);
        input.extend_from_slice(&[0x83, 0x0A, 0x01]);

        let mut dec = ExplodeDec::new(4096, 2).unwrap();
        let mut out = vec![0u8; 1024];
        for chunk in input.chunks(3) {
            let outcome = dec
                .decompress(chunk, &mut out, HasMoreInput::Yes)
                .unwrap();
            assert_eq!(outcome.bytes_written, 0);
        }
        let outcome = dec.decompress(&[], &mut out, HasMoreInput::No).unwrap();
        assert!(outcome.done);
        assert_eq!(&out[..outcome.bytes_written], b"AB");
    }
}
