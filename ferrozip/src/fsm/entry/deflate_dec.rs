use std::cmp;

use miniz_oxide::inflate::{
    core::{
        decompress,
        inflate_flags::{TINFL_FLAG_HAS_MORE_INPUT, TINFL_FLAG_IGNORE_ADLER32},
        DecompressorOxide,
    },
    TINFLStatus,
};
use tracing::trace;

use crate::{error::Error, parse::Method};

use super::{DecompressOutcome, Decompressor, HasMoreInput};

/// Raw deflate (method 8) on top of miniz_oxide's core inflater.
///
/// The inflater insists on writing into a power-of-two ring that doubles as
/// its back-reference window, so output makes a stop in [Self::ring] before
/// the caller sees it. The ring is only handed back to the inflater once
/// the caller has drained it empty; refilling any earlier would let new
/// output land on bytes nobody read yet.
pub(crate) struct DeflateDec {
    /// ring buffer the inflater decompresses into
    ring: Vec<u8>,

    /// where the next drained byte comes from
    read_at: usize,

    /// bytes sitting in the ring, not yet handed to the caller
    pending: usize,

    inflate: DecompressorOxide,

    /// the deflate end-of-stream marker was reached; any further input
    /// belongs to whatever record follows the entry
    stream_ended: bool,
}

/// Twice the 32 KiB deflate window, so the dictionary survives a full
/// caller-sized drain.
const RING_SIZE: usize = 64 * 1024;

impl Default for DeflateDec {
    fn default() -> Self {
        Self {
            ring: vec![0u8; RING_SIZE],
            read_at: 0,
            pending: 0,
            inflate: DecompressorOxide::new(),
            stream_ended: false,
        }
    }
}

impl Decompressor for DeflateDec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        let mut outcome = DecompressOutcome::default();

        outcome.bytes_written = self.drain(out);
        if outcome.bytes_written > 0 {
            trace!(
                drained = outcome.bytes_written,
                "deflate: serving from the ring"
            );
            return Ok(outcome);
        }

        if self.stream_ended {
            outcome.done = true;
            return Ok(outcome);
        }

        // the ring is empty: run the inflater. With pending == 0, the read
        // cursor is also the write position.
        let mut flags = TINFL_FLAG_IGNORE_ADLER32;
        if matches!(has_more_input, HasMoreInput::Yes) {
            flags |= TINFL_FLAG_HAS_MORE_INPUT;
        }
        let (status, consumed, produced) = decompress(
            &mut self.inflate,
            in_buf,
            &mut self.ring,
            self.read_at,
            flags,
        );
        outcome.bytes_read = consumed;
        self.pending += produced;
        trace!(?status, consumed, produced, "deflate: inflater ran");

        match status {
            TINFLStatus::Done => self.stream_ended = true,
            // both fine: the caller comes back with more input, or with
            // room to drain into
            TINFLStatus::NeedsMoreInput | TINFLStatus::HasMoreOutput => {}
            TINFLStatus::FailedCannotMakeProgress => {
                return Err(deflate_err(
                    "input ended in the middle of the deflate stream",
                ))
            }
            TINFLStatus::BadParam | TINFLStatus::Adler32Mismatch | TINFLStatus::Failed => {
                return Err(deflate_err("invalid deflate data"))
            }
        }

        outcome.bytes_written = self.drain(out);
        outcome.done = self.stream_ended && self.pending == 0;
        Ok(outcome)
    }
}

impl DeflateDec {
    /// Copy ring contents out to the caller, wrapping as needed; returns
    /// how many bytes moved.
    fn drain(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        while written < out.len() && self.pending > 0 {
            let contiguous = cmp::min(self.pending, self.ring.len() - self.read_at);
            let n = cmp::min(contiguous, out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.ring[self.read_at..self.read_at + n]);
            written += n;
            self.pending -= n;
            self.read_at = (self.read_at + n) % self.ring.len();
        }
        written
    }
}

fn deflate_err(msg: &str) -> Error {
    Error::Decompression {
        method: Method::Deflate,
        msg: msg.to_string(),
    }
}
