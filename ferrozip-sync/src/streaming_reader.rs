use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use ferrozip::{
    codec::{default_registry, MethodRegistry},
    encoding::Encoding,
    error::{Error, FormatError},
    fsm::{EntryFsm, FsmResult},
    parse::Entry,
};
use tracing::trace;

/// Knobs for the streaming reader.
#[derive(Clone)]
pub struct StreamingOptions {
    /// Encoding for names without the UTF-8 flag.
    pub encoding: Encoding,

    /// Allow stored entries that only declare their size in a trailing data
    /// descriptor. Finding the descriptor means scanning the payload for
    /// its signature, which can misfire; off by default.
    pub allow_stored_dd: bool,

    /// The compression-method registry; defaults to the built-in methods.
    pub registry: Option<Arc<MethodRegistry>>,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Cp437,
            allow_stored_dd: false,
            registry: None,
        }
    }
}

/// Reads the entries of a zip archive front to back, based on local file
/// headers only, without seeking.
///
/// This is the wrong tool when the source can seek (use
/// [ReadZip](crate::ReadZip): the central directory is authoritative and
/// local headers lie), but the only tool when it cannot.
///
/// Entries come out one at a time through [Self::next_entry]; asking for
/// the next entry discards whatever is left of the current one. Structural
/// errors are terminal: once the reader has seen a truncated or malformed
/// archive, every further call repeats the error.
pub struct StreamingZipReader<R: Read> {
    rd: R,
    state: State,
    options: StreamingOptions,
    registry: Arc<MethodRegistry>,
    /// leading split-archive marker not yet checked for
    at_start: bool,
    /// the source returned 0 from read
    hit_eof: bool,
}

#[derive(Default)]
enum State {
    /// Positioned before the next local file header
    Ready { fsm: Box<EntryFsm> },

    /// An entry's payload is being (or could be) read
    InEntry { fsm: Box<EntryFsm> },

    /// Clean end: central directory reached (and discarded), or the input
    /// ended on an entry boundary
    AtEnd,

    /// Terminal failure, repeated on every call. Structural failures keep
    /// their exact error; anything else degrades to a fixed refusal.
    Broken(Option<FormatError>),

    #[default]
    Transition,
}

impl State {
    fn repeat_error(err: &Option<FormatError>) -> Error {
        match err {
            Some(f) => f.clone().into(),
            None => Error::IllegalState("the reader failed earlier and cannot continue"),
        }
    }
}

impl<R: Read> StreamingZipReader<R> {
    /// Start reading a zip archive from `rd`, which should be positioned at
    /// its very first byte.
    pub fn new(rd: R) -> Self {
        Self::with_options(rd, StreamingOptions::default())
    }

    /// Start reading with explicit options.
    pub fn with_options(rd: R, options: StreamingOptions) -> Self {
        let registry = options
            .registry
            .clone()
            .unwrap_or_else(|| Arc::clone(default_registry()));
        let fsm = Self::make_fsm(&options, &registry, None);
        Self {
            rd,
            state: State::Ready { fsm },
            options,
            registry,
            at_start: true,
            hit_eof: false,
        }
    }

    fn make_fsm(
        options: &StreamingOptions,
        registry: &Arc<MethodRegistry>,
        remain: Option<oval::Buffer>,
    ) -> Box<EntryFsm> {
        Box::new(
            EntryFsm::with_registry(None, remain, Arc::clone(registry))
                .with_fallback_encoding(options.encoding)
                .with_allow_stored_dd(options.allow_stored_dd),
        )
    }

    /// Advance to the next entry, discarding any unread payload of the
    /// current one, and hand out a view that reads its decompressed bytes.
    ///
    /// Returns `Ok(None)` once the central directory (or a clean end of
    /// input) is reached.
    pub fn next_entry(&mut self) -> Result<Option<StreamingEntry<'_, R>>, Error> {
        match &self.state {
            State::Broken(err) => return Err(State::repeat_error(err)),
            State::AtEnd => return Ok(None),
            _ => {}
        }

        if matches!(self.state, State::InEntry { .. }) {
            self.drain_current_entry()?;
        }

        loop {
            let buffered = match &self.state {
                State::Ready { fsm } => fsm.buffered(),
                State::AtEnd => return Ok(None),
                _ => unreachable!(),
            };

            // make sense of what's already buffered before asking the
            // source for more
            if buffered >= 4 || self.hit_eof {
                let (at_boundary, buffer_empty) = match &mut self.state {
                    State::Ready { fsm } => {
                        if self.at_start {
                            // a lone data-descriptor signature up front
                            // marks the first volume of a split archive;
                            // the local headers that follow are readable
                            // until the cut
                            if fsm.skip_leading_split_marker() {
                                trace!("skipped split-archive marker");
                            }
                            self.at_start = false;
                        }
                        (fsm.at_directory_boundary(), fsm.is_buffer_empty())
                    }
                    _ => unreachable!(),
                };

                if at_boundary {
                    // no more entries; consume the central directory and
                    // trailer so the source is left fully read
                    match io::copy(&mut self.rd, &mut io::sink()) {
                        Ok(_) => {}
                        Err(e) => return Err(self.latch_io(e)),
                    }
                    self.state = State::AtEnd;
                    return Ok(None);
                }

                let parsed = match &mut self.state {
                    State::Ready { fsm } => fsm.process_till_header().map(|e| e.is_some()),
                    _ => unreachable!(),
                };

                match parsed {
                    Ok(true) => {
                        transition!(self.state => (State::Ready { fsm }) {
                            State::InEntry { fsm }
                        });
                        return Ok(Some(StreamingEntry { reader: self }));
                    }
                    Ok(false) => {
                        if self.hit_eof {
                            if buffer_empty {
                                // ended exactly on an entry boundary: some
                                // truncated archives do, and there's
                                // nothing more to read either way
                                self.state = State::AtEnd;
                                return Ok(None);
                            }
                            return Err(self.latch(FormatError::Truncated));
                        }
                        // incomplete header: go read more
                    }
                    Err(Error::Format(e)) => return Err(self.latch(e)),
                    Err(e) => return Err(self.latch_other(e)),
                }
            }

            // top the buffer up
            let mut io_err = None;
            if let State::Ready { fsm } = &mut self.state {
                let space = fsm.space();
                if !space.is_empty() {
                    match self.rd.read(space) {
                        Ok(n) => {
                            if n == 0 {
                                self.hit_eof = true;
                            }
                            fsm.fill(n);
                        }
                        Err(e) => io_err = Some(e),
                    }
                }
            }
            if let Some(e) = io_err {
                return Err(self.latch_io(e));
            }
        }
    }

    /// Drop the rest of the current entry: decode it if we can (validating
    /// checksums along the way), copy it raw if we cannot.
    fn drain_current_entry(&mut self) -> Result<(), Error> {
        let readable = match &self.state {
            State::InEntry { fsm } => self
                .registry
                .can_read_entry_data(fsm.entry().expect("in entry, header was parsed")),
            _ => unreachable!(),
        };

        if !readable {
            // raw copy: needs the declared compressed size; entries that
            // only know their size from a data descriptor can't be skipped
            transition!(self.state => (State::InEntry { fsm }) {
                State::InEntry { fsm: Box::new((*fsm).raw()) }
            });
        }

        let mut scratch = [0u8; 16 * 1024];
        loop {
            match self.read_entry_data(&mut scratch) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// One read step against the current entry's fsm. `Ok(0)` means the
    /// entry is finished and the reader moved on to the next boundary.
    fn read_entry_data(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        loop {
            match &self.state {
                State::Broken(err) => return Err(State::repeat_error(err)),
                State::Ready { .. } | State::AtEnd => return Ok(0),
                State::InEntry { .. } => {}
                State::Transition => unreachable!(),
            }

            let mut fsm = match std::mem::take(&mut self.state) {
                State::InEntry { fsm } => fsm,
                _ => unreachable!(),
            };

            if fsm.wants_read() {
                let space = fsm.space();
                if !space.is_empty() {
                    match self.rd.read(space) {
                        Ok(n) => {
                            if n == 0 {
                                self.hit_eof = true;
                            }
                            fsm.fill(n);
                        }
                        Err(e) => return Err(self.latch_io(e)),
                    }
                }
            }

            match (*fsm).process(buf) {
                Ok(FsmResult::Continue((fsm, outcome))) => {
                    self.state = State::InEntry { fsm: Box::new(fsm) };
                    if outcome.bytes_written > 0 {
                        return Ok(outcome.bytes_written);
                    }
                    // no output yet: loop, the fsm will ask for more input
                }
                Ok(FsmResult::Done(remain)) => {
                    self.state = State::Ready {
                        fsm: Self::make_fsm(&self.options, &self.registry, Some(remain)),
                    };
                    return Ok(0);
                }
                Err(Error::Format(e)) => return Err(self.latch(e)),
                Err(e) => return Err(self.latch_other(e)),
            }
        }
    }

    fn latch(&mut self, err: FormatError) -> Error {
        self.state = State::Broken(Some(err.clone()));
        err.into()
    }

    fn latch_other(&mut self, err: Error) -> Error {
        self.state = State::Broken(None);
        err
    }

    fn latch_io(&mut self, err: io::Error) -> Error {
        // the stream position is unknown now; nothing good can follow
        self.state = State::Broken(None);
        Error::IO(err)
    }
}

/// A view over the current entry of a [StreamingZipReader], reading its
/// decompressed payload.
///
/// Dropping the view is fine: the next [StreamingZipReader::next_entry]
/// call skips whatever was not read.
pub struct StreamingEntry<'a, R: Read> {
    reader: &'a mut StreamingZipReader<R>,
}

impl<R: Read> fmt::Debug for StreamingEntry<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingEntry").finish_non_exhaustive()
    }
}

impl<R: Read> StreamingEntry<'_, R> {
    /// Metadata of this entry, from its local file header.
    pub fn entry(&self) -> &Entry {
        match &self.reader.state {
            State::InEntry { fsm } => fsm.entry().expect("in entry, header was parsed"),
            // the only way to hold a view in another state is after
            // reading the entry to its end
            _ => panic!("entry already finished"),
        }
    }

    /// Whether [Read] will produce bytes: false for encrypted entries and
    /// unregistered methods; those can still be skipped.
    pub fn can_read_data(&self) -> bool {
        self.reader.registry.can_read_entry_data(self.entry())
    }
}

impl<R: Read> Read for StreamingEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let State::InEntry { fsm } = &self.reader.state {
            if let Some(entry) = fsm.entry() {
                // fail with a typed unsupported-feature error before the
                // fsm gets a chance to be consumed by it
                self.reader.registry.check_entry_readable(entry)?;
            }
        }
        self.reader.read_entry_data(buf).map_err(io::Error::from)
    }
}
