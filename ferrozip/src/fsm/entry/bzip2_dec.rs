use crate::{error::Error, parse::Method};

use super::{DecompressOutcome, Decompressor, HasMoreInput};

/// BZip2 (method 12), wrapping the low-level stateful decoder of the bzip2
/// crate. The library keeps running totals, so per-call counts fall out of
/// before/after deltas.
pub(crate) struct Bzip2Dec {
    stream: bzip2::Decompress,
    stream_ended: bool,
}

impl Default for Bzip2Dec {
    fn default() -> Self {
        Self {
            // `small` trades speed for memory; entries decode one at a
            // time, take the fast path
            stream: bzip2::Decompress::new(false),
            stream_ended: false,
        }
    }
}

impl Decompressor for Bzip2Dec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        _has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        if self.stream_ended {
            return Ok(DecompressOutcome {
                done: true,
                ..Default::default()
            });
        }

        let in_before = self.stream.total_in();
        let out_before = self.stream.total_out();
        match self.stream.decompress(in_buf, out) {
            Ok(bzip2::Status::StreamEnd) => self.stream_ended = true,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Decompression {
                    method: Method::Bzip2,
                    msg: e.to_string(),
                })
            }
        }

        Ok(DecompressOutcome {
            bytes_read: (self.stream.total_in() - in_before) as usize,
            bytes_written: (self.stream.total_out() - out_before) as usize,
            done: self.stream_ended,
        })
    }
}
