use crate::error::Error;
use crate::parse::Method;

use crate::fsm::entry::bit_stream::BitStream;

fn tree_err(msg: impl Into<String>) -> Error {
    Error::Decompression {
        method: Method::Implode,
        msg: msg.into(),
    }
}

/// A canonical Shannon-Fano tree, built from the compact "lengths table"
/// stream that precedes imploded data, decoding one value per read.
///
/// Nodes live in a flat array: children of node `i` are `2i+1` and `2i+2`.
pub(crate) struct BinaryTree {
    /// Slot values: [Self::UNDEFINED], [Self::NODE], or a leaf value.
    tree: Vec<i32>,
}

impl BinaryTree {
    const UNDEFINED: i32 = -1;
    const NODE: i32 = -2;

    fn new(depth: usize) -> Self {
        Self {
            tree: vec![Self::UNDEFINED; (1usize << (depth + 1)) - 1],
        }
    }

    /// Decode a tree from the compact representation: one byte holding the
    /// number of following bytes minus one, then run-encoded bit lengths,
    /// each byte packing `(count-1) << 4 | (bit_length-1)`.
    ///
    /// `total_values` is fixed by the caller: 256 for the literal tree, 64
    /// for the length and distance trees.
    pub(crate) fn decode(data: &[u8], total_values: usize) -> Result<(Self, usize), Error> {
        let size = *data.first().ok_or_else(|| tree_err("missing tree size"))? as usize + 1;
        if size > 2 * total_values {
            return Err(tree_err(format!(
                "ridiculously large lengths table: {size} bytes for {total_values} values"
            )));
        }
        let encoded = data
            .get(1..1 + size)
            .ok_or_else(|| tree_err("truncated lengths table"))?;

        let mut bit_lengths = vec![0usize; total_values];
        let mut max_length = 0usize;
        let mut pos = 0usize;
        for &b in encoded {
            let count = ((b as usize) >> 4) + 1;
            let bit_length = (b as usize & 0x0F) + 1;
            if pos + count > total_values {
                return Err(tree_err("lengths table describes too many values"));
            }
            for _ in 0..count {
                bit_lengths[pos] = bit_length;
                pos += 1;
            }
            max_length = max_length.max(bit_length);
        }

        // canonical code assignment: shortest codes get the numerically
        // highest 16-bit prefixes, walking values from last to first
        let mut permutation: Vec<usize> = (0..total_values).collect();
        permutation.sort_by_key(|&i| bit_lengths[i]);

        let mut codes = vec![0u32; total_values];
        let mut code = 0u32;
        let mut code_increment = 0u32;
        let mut last_bit_length = 0usize;
        for i in (0..total_values).rev() {
            code += code_increment;
            if bit_lengths[permutation[i]] != last_bit_length {
                last_bit_length = bit_lengths[permutation[i]];
                code_increment = 1 << (16 - last_bit_length);
            }
            codes[permutation[i]] = code;
        }

        let mut tree = Self::new(max_length.max(1));
        for (value, &bit_length) in bit_lengths.iter().enumerate() {
            if bit_length > 0 {
                let path = (codes[value] << 16).reverse_bits();
                tree.add_leaf(0, path, bit_length - 1, value as u32)?;
            }
        }

        Ok((tree, 1 + size))
    }

    /// Place a leaf for `value` at the end of `path` (LSB-first), `depth`
    /// being the number of edges left after the first.
    pub(crate) fn add_leaf(
        &mut self,
        node: usize,
        path: u32,
        depth: usize,
        value: u32,
    ) -> Result<(), Error> {
        let child = 2 * node + 1 + (path & 1) as usize;
        if depth == 0 {
            if self.tree[child] != Self::UNDEFINED {
                return Err(tree_err(format!(
                    "tree value at index {child} has already been assigned ({})",
                    self.tree[child]
                )));
            }
            self.tree[child] = value as i32;
            Ok(())
        } else {
            if self.tree[child] >= 0 {
                return Err(tree_err(format!(
                    "tree value at index {child} is a leaf, cannot become a node"
                )));
            }
            self.tree[child] = Self::NODE;
            self.add_leaf(child, path >> 1, depth - 1, value)
        }
    }

    /// Decode one value. `Ok(None)` means the stream ended cleanly before
    /// the first bit; running dry mid-symbol is an error.
    pub(crate) fn read(&self, bits: &mut BitStream) -> Result<Option<u32>, Error> {
        let mut current = 0usize;
        let mut consumed = 0usize;
        loop {
            let bit = match bits.next_bit() {
                Some(bit) => bit,
                None if consumed == 0 => return Ok(None),
                None => return Err(tree_err("unexpected end of stream mid-symbol")),
            };
            consumed += 1;
            let child = 2 * current + 1 + bit as usize;
            match self.tree.get(child).copied() {
                Some(Self::NODE) => current = child,
                Some(Self::UNDEFINED) | None => {
                    return Err(tree_err(format!(
                        "the child {bit} of node at index {current} is not defined"
                    )))
                }
                Some(value) => return Ok(Some(value as u32)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::entry::bit_stream::BitStream;

    /// 64 values, all six bits long: four runs of sixteen.
    const FLAT_64: &[u8] = &[0x03, 0xF5, 0xF5, 0xF5, 0xF5];

    #[test]
    fn perfect_tree_decodes_every_pattern() {
        let (tree, consumed) = BinaryTree::decode(FLAT_64, 64).unwrap();
        assert_eq!(consumed, 5);

        // with a flat 6-bit tree, value v sits at the bit-reversed pattern
        // of 63 - v
        let mut bits = BitStream::new(&[0b0011_1111]);
        assert_eq!(tree.read(&mut bits).unwrap(), Some(0));

        let mut bits = BitStream::new(&[0b0000_0000]);
        assert_eq!(tree.read(&mut bits).unwrap(), Some(63));
    }

    #[test]
    fn end_of_stream_before_first_bit_is_clean() {
        let (tree, _) = BinaryTree::decode(FLAT_64, 64).unwrap();
        let mut bits = BitStream::new(&[]);
        assert_eq!(tree.read(&mut bits).unwrap(), None);
    }

    #[test]
    fn end_of_stream_mid_symbol_is_an_error() {
        let (tree, _) = BinaryTree::decode(FLAT_64, 64).unwrap();
        // one byte holds 8 bits: a full 6-bit symbol, then 2 stray bits
        let mut bits = BitStream::new(&[0x3F]);
        assert_eq!(tree.read(&mut bits).unwrap(), Some(0));
        assert!(tree.read(&mut bits).is_err());
    }

    #[test]
    fn leaf_collision_is_rejected() {
        let mut tree = BinaryTree::new(2);
        tree.add_leaf(0, 0b0, 0, 1).unwrap();
        assert!(tree.add_leaf(0, 0b0, 0, 2).is_err());
        // and a leaf can't become an interior node either
        assert!(tree.add_leaf(0, 0b10, 1, 3).is_err());
    }

    #[test]
    fn oversized_lengths_table_is_rejected() {
        // 200 bytes of table for 64 values
        let mut data = vec![199u8];
        data.extend(std::iter::repeat(0x05).take(200));
        assert!(BinaryTree::decode(&data, 64).is_err());
    }

    #[test]
    fn overfull_run_encoding_is_rejected() {
        // five runs of sixteen 6-bit codes describe 80 values, not 64
        let data = &[0x04, 0xF5, 0xF5, 0xF5, 0xF5, 0xF5];
        assert!(BinaryTree::decode(data, 64).is_err());
    }
}
