//! A library for reading and writing zip files synchronously using std I/O
//! traits, built on top of [ferrozip](https://crates.io/crates/ferrozip).
//!
//! Reading comes in two flavors: [ReadZip] mounts a seekable source by
//! finding its central directory (the correct way), and
//! [StreamingZipReader] walks local file headers front to back for sources
//! that cannot seek. Writing goes through [ArchiveWriter], which adapts to
//! its sink: seekable sinks get their local headers patched in place,
//! streaming sinks get data descriptors. [ScatterBucket] spreads compression
//! work across caller-owned threads and merges the spills back into one
//! archive.

#![warn(missing_docs)]

macro_rules! transition {
    ($state: expr => ($pattern: pat) $body: expr) => {
        $state = if let $pattern = std::mem::take(&mut $state) {
            $body
        } else {
            unreachable!()
        };
    };
}

mod entry_reader;
mod read_zip;
mod streaming_reader;
mod write;

// re-exports
pub use ferrozip;
pub use entry_reader::EntryReader;
pub use read_zip::{
    HasCursor, ReadOptions, ReadZip, ReadZipWithOptions, ReadZipWithSize, SyncArchive, SyncEntry,
};
pub use streaming_reader::{StreamingEntry, StreamingOptions, StreamingZipReader};
pub use write::scatter::ScatterBucket;
pub use write::{
    ArchiveWriter, EncoderFactory, EntryEncoder, EntrySpec, Seekable, Sink, Streaming,
    UnicodeExtraPolicy, WriterOptions, Zip64Policy,
};
