use ferrozip::{
    codec::MethodRegistry,
    fsm::{EntryFsm, FsmResult},
    parse::Entry,
};
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::trace;

/// Reader for an entry inside an archive.
///
/// Decompresses (or, in raw mode, copies) the entry's payload; typed errors
/// from the state machine surface as `io::Error` with the original
/// [ferrozip::error::Error] as their source.
pub struct EntryReader<R>
where
    R: io::Read,
{
    rd: R,
    fsm: Option<EntryFsm>,
}

impl<R> fmt::Debug for EntryReader<R>
where
    R: io::Read,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryReader").finish_non_exhaustive()
    }
}

impl<R> EntryReader<R>
where
    R: io::Read,
{
    /// `rd` must be positioned at the entry's local file header.
    pub(crate) fn new(entry: &Entry, registry: Arc<MethodRegistry>, rd: R) -> Self {
        Self {
            rd,
            fsm: Some(EntryFsm::with_registry(
                Some(entry.clone()),
                None,
                registry,
            )),
        }
    }

    /// `rd` must be positioned right at the entry's payload; the local file
    /// header is not read at all (its name and extra lengths came from the
    /// central directory).
    pub(crate) fn new_at_data(entry: &Entry, registry: Arc<MethodRegistry>, rd: R) -> Self {
        Self {
            rd,
            fsm: Some(
                EntryFsm::with_registry(Some(entry.clone()), None, registry)
                    .skipping_local_header(),
            ),
        }
    }
}

impl<R> io::Read for EntryReader<R>
where
    R: io::Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut fsm = match self.fsm.take() {
                Some(fsm) => fsm,
                None => return Ok(0),
            };

            let mut filled_bytes = 0;
            if fsm.wants_read() {
                let space = fsm.space();
                // a full buffer means the fsm should drain, not that the
                // source is done
                if !space.is_empty() {
                    trace!(space_avail = space.len(), "fsm wants read");
                    let n = self.rd.read(space)?;
                    fsm.fill(n);
                    filled_bytes = n;
                }
            } else {
                trace!("fsm does not want read");
            }

            match fsm.process(buf)? {
                FsmResult::Continue((fsm, outcome)) => {
                    self.fsm = Some(fsm);

                    if outcome.bytes_written > 0 {
                        trace!("wrote {} bytes", outcome.bytes_written);
                        return Ok(outcome.bytes_written);
                    } else if filled_bytes > 0 || outcome.bytes_read > 0 {
                        // progress was made, keep reading
                        continue;
                    } else {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            "entry reader: no progress",
                        ));
                    }
                }
                FsmResult::Done(_remain) => {
                    // neat!
                    return Ok(0);
                }
            }
        }
    }
}
