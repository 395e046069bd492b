use crate::error::Error;

use super::{DecompressOutcome, Decompressor, HasMoreInput};

/// Method 0: no compression, the payload is the data.
///
/// The caller bounds the input by the entry's compressed size, so all
/// there is to do is move bytes; a stored stream has no end marker of its
/// own, which is why `done` stays false.
#[derive(Default)]
pub(crate) struct StoreDec;

impl Decompressor for StoreDec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        _has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        let n = in_buf.len().min(out.len());
        out[..n].copy_from_slice(&in_buf[..n]);
        Ok(DecompressOutcome {
            bytes_read: n,
            bytes_written: n,
            done: false,
        })
    }
}
