use deflate64::InflaterManaged;

use crate::{error::Error, parse::Method};

use super::{DecompressOutcome, Decompressor, HasMoreInput};

/// Deflate64 (method 9): deflate with a 64 KiB window and longer matches.
/// The deflate64 crate exposes a single inflate step that advances both
/// sides at once.
pub(crate) struct Deflate64Dec {
    inflater: InflaterManaged,
}

impl Default for Deflate64Dec {
    fn default() -> Self {
        Self {
            inflater: InflaterManaged::new(),
        }
    }
}

impl Decompressor for Deflate64Dec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        _has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        let step = self.inflater.inflate(in_buf, out);
        if step.data_error {
            return Err(Error::Decompression {
                method: Method::Deflate64,
                msg: "invalid deflate64 data".into(),
            });
        }

        Ok(DecompressOutcome {
            bytes_read: step.bytes_consumed,
            bytes_written: step.bytes_written,
            done: self.inflater.finished() && self.inflater.available_output() == 0,
        })
    }
}
