use std::io::Write;

use tracing::trace;
use zstd::stream::write::Decoder;

use crate::{error::Error, parse::Method};

use super::{DecompressOutcome, Decompressor, HasMoreInput};

/// Zstandard (method 93) through the zstd crate's write-side decoder,
/// which spills decompressed bytes into a Vec that the caller is then
/// served from.
pub(crate) struct ZstdDec {
    /// present while the stream is still being fed; taken at shutdown so
    /// the spill buffer can be recovered from it
    decoder: Option<Box<Decoder<'static, Vec<u8>>>>,

    /// output recovered from the decoder once it was shut down
    tail: Vec<u8>,
    tail_at: usize,
}

impl ZstdDec {
    pub(crate) fn new() -> Result<Self, Error> {
        Ok(Self {
            decoder: Some(Box::new(Decoder::new(Vec::new())?)),
            tail: Vec::new(),
            tail_at: 0,
        })
    }

    /// Serve buffered output: from the live decoder's spill, or from the
    /// recovered tail.
    fn serve(&mut self, out: &mut [u8]) -> usize {
        match &mut self.decoder {
            Some(decoder) => {
                let spill = decoder.get_mut();
                let n = spill.len().min(out.len());
                out[..n].copy_from_slice(&spill[..n]);
                spill.drain(..n);
                n
            }
            None => {
                let left = &self.tail[self.tail_at..];
                let n = left.len().min(out.len());
                out[..n].copy_from_slice(&left[..n]);
                self.tail_at += n;
                n
            }
        }
    }

    fn exhausted(&self) -> bool {
        match &self.decoder {
            Some(_) => false,
            None => self.tail_at == self.tail.len(),
        }
    }
}

impl Decompressor for ZstdDec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        let mut outcome = DecompressOutcome::default();

        outcome.bytes_written = self.serve(out);
        if outcome.bytes_written > 0 {
            trace!(
                served = outcome.bytes_written,
                "zstd: serving buffered output"
            );
            outcome.done = self.exhausted();
            return Ok(outcome);
        }

        if let Some(decoder) = &mut self.decoder {
            // feed as much as the decoder will take; it sometimes refuses
            // bytes until its frame state advances, so push in a loop and
            // stop once output shows up or it won't budge
            let mut fed = 0;
            let mut refused = false;
            while fed < in_buf.len() {
                let n = decoder.write(&in_buf[fed..]).map_err(zstd_err)?;
                fed += n;
                if n == 0 {
                    refused = true;
                    break;
                }
                if !decoder.get_ref().is_empty() {
                    break;
                }
            }
            outcome.bytes_read = fed;
            trace!(fed, refused, in_buf_len = in_buf.len(), "zstd: fed decoder");

            if matches!(has_more_input, HasMoreInput::No) && (fed == in_buf.len() || refused) {
                // frame epilogue bytes the decoder refuses to take are
                // dropped, but still count as consumed so the entry's
                // byte accounting closes
                outcome.bytes_read = in_buf.len();
                let mut decoder = self.decoder.take().expect("checked above");
                decoder.flush().map_err(zstd_err)?;
                self.tail = decoder.into_inner();
                self.tail_at = 0;
            }
        }

        outcome.bytes_written = self.serve(out);
        outcome.done = self.exhausted();
        Ok(outcome)
    }
}

fn zstd_err(e: std::io::Error) -> Error {
    Error::Decompression {
        method: Method::Zstd,
        msg: e.to_string(),
    }
}
