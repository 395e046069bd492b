use ferrozip::{
    codec::{default_registry, MethodRegistry},
    encoding::Encoding,
    error::{Error, FormatError},
    fsm::{ArchiveFsm, FsmResult},
    parse::{merge_local, Archive, Entry, LocalFileHeaderRecord, ZipLong, ZipShort},
};
use std::sync::Arc;
use tracing::trace;

use crate::entry_reader::EntryReader;
use std::{fmt, io::Read, ops::Deref};

/// Knobs for mounting an archive.
#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Force this encoding for names and comments instead of detecting one.
    /// The per-entry UTF-8 flag still wins.
    pub encoding: Option<Encoding>,

    /// Never read local file headers: compute each entry's payload offset
    /// from the central directory alone. Archives with local extra fields
    /// that differ from their central ones will misbehave; archives with
    /// corrupt local headers become readable.
    pub ignore_local_headers: bool,

    /// The compression-method registry; defaults to the built-in methods.
    pub registry: Option<Arc<MethodRegistry>>,
}

/// A trait for reading something as a zip archive
///
/// See also [ReadZip].
pub trait ReadZipWithSize {
    /// The type of the file to read from.
    type File: HasCursor;

    /// Reads self as a zip archive.
    fn read_zip_with_size(&self, size: u64) -> Result<SyncArchive<'_, Self::File>, Error> {
        self.read_zip_with_size_and_options(size, ReadOptions::default())
    }

    /// Reads self as a zip archive, with explicit options.
    fn read_zip_with_size_and_options(
        &self,
        size: u64,
        options: ReadOptions,
    ) -> Result<SyncArchive<'_, Self::File>, Error>;
}

/// A trait for reading something as a zip archive when we can tell size from
/// self.
///
/// See also [ReadZipWithSize].
pub trait ReadZip {
    /// The type of the file to read from.
    type File: HasCursor;

    /// Reads self as a zip archive.
    fn read_zip(&self) -> Result<SyncArchive<'_, Self::File>, Error>;
}

/// [ReadZip] with explicit [ReadOptions].
pub trait ReadZipWithOptions: ReadZip {
    /// Reads self as a zip archive with the given options.
    fn read_zip_with_options(
        &self,
        options: ReadOptions,
    ) -> Result<SyncArchive<'_, Self::File>, Error>;
}

impl<F> ReadZipWithSize for F
where
    F: HasCursor,
{
    type File = F;

    fn read_zip_with_size_and_options(
        &self,
        size: u64,
        options: ReadOptions,
    ) -> Result<SyncArchive<'_, F>, Error> {
        trace!(%size, "read_zip_with_size");
        let mut fsm = ArchiveFsm::with_encoding(size, options.encoding);
        loop {
            if let Some(offset) = fsm.wants_read() {
                trace!(%offset, "read_zip_with_size: wants_read");
                match self.cursor_at(offset).read(fsm.space()) {
                    Ok(read_bytes) => {
                        trace!(%read_bytes, "read_zip_with_size: read");
                        if read_bytes == 0 {
                            return Err(Error::IO(std::io::ErrorKind::UnexpectedEof.into()));
                        }
                        fsm.fill(read_bytes);
                    }
                    Err(err) => return Err(Error::IO(err)),
                }
            }

            fsm = match fsm.process()? {
                FsmResult::Done(archive) => {
                    trace!("read_zip_with_size: done");
                    return Ok(SyncArchive {
                        file: self,
                        archive,
                        registry: options
                            .registry
                            .clone()
                            .unwrap_or_else(|| Arc::clone(default_registry())),
                        ignore_local_headers: options.ignore_local_headers,
                    });
                }
                FsmResult::Continue(fsm) => fsm,
            }
        }
    }
}

impl ReadZip for &[u8] {
    type File = Self;

    fn read_zip(&self) -> Result<SyncArchive<'_, Self::File>, Error> {
        self.read_zip_with_size(self.len() as u64)
    }
}

impl ReadZip for Vec<u8> {
    type File = Self;

    fn read_zip(&self) -> Result<SyncArchive<'_, Self::File>, Error> {
        self.read_zip_with_size(self.len() as u64)
    }
}

impl ReadZipWithOptions for &[u8] {
    fn read_zip_with_options(
        &self,
        options: ReadOptions,
    ) -> Result<SyncArchive<'_, Self>, Error> {
        self.read_zip_with_size_and_options(self.len() as u64, options)
    }
}

impl ReadZipWithOptions for Vec<u8> {
    fn read_zip_with_options(
        &self,
        options: ReadOptions,
    ) -> Result<SyncArchive<'_, Self>, Error> {
        self.read_zip_with_size_and_options(self.len() as u64, options)
    }
}

#[cfg(feature = "file")]
impl ReadZipWithOptions for std::fs::File {
    fn read_zip_with_options(
        &self,
        options: ReadOptions,
    ) -> Result<SyncArchive<'_, Self>, Error> {
        let size = self.metadata()?.len();
        self.read_zip_with_size_and_options(size, options)
    }
}

/// A zip archive, read synchronously from a file or other I/O resource.
///
/// This only contains metadata for the archive and its entries. Separate
/// readers can be created for arbitrary entries on-demand using
/// [SyncEntry::reader].
pub struct SyncArchive<'a, F>
where
    F: HasCursor,
{
    file: &'a F,
    archive: Archive,
    registry: Arc<MethodRegistry>,
    ignore_local_headers: bool,
}

impl<F> fmt::Debug for SyncArchive<'_, F>
where
    F: HasCursor,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncArchive").finish_non_exhaustive()
    }
}

impl<F> Deref for SyncArchive<'_, F>
where
    F: HasCursor,
{
    type Target = Archive;

    fn deref(&self) -> &Self::Target {
        &self.archive
    }
}

impl<F> SyncArchive<'_, F>
where
    F: HasCursor,
{
    /// Iterate over all files in this zip, in central directory order.
    pub fn entries(&self) -> impl Iterator<Item = SyncEntry<'_, F>> {
        self.archive.entries().map(move |entry| self.wrap(entry))
    }

    /// Iterate over all files sorted by the position of their payload in
    /// the container.
    pub fn entries_in_physical_order(&self) -> impl Iterator<Item = SyncEntry<'_, F>> {
        self.archive
            .entries_in_physical_order()
            .map(move |entry| self.wrap(entry))
    }

    /// Attempts to look up an entry by name. Names repeat in zip archives;
    /// this returns the first match, [Self::entries_named] all of them.
    pub fn by_name<N: AsRef<str>>(&self, name: N) -> Option<SyncEntry<'_, F>> {
        self.archive.by_name(name).map(|entry| self.wrap(entry))
    }

    /// All entries carrying the given name, in central directory order.
    pub fn entries_named<'b>(&'b self, name: &str) -> impl Iterator<Item = SyncEntry<'b, F>> {
        self.archive
            .entries_named(name)
            .map(move |entry| self.wrap(entry))
    }

    fn wrap<'b>(&'b self, entry: &'b Entry) -> SyncEntry<'b, F> {
        SyncEntry {
            file: self.file,
            entry,
            registry: &self.registry,
            ignore_local_headers: self.ignore_local_headers,
        }
    }
}

/// A zip entry, read synchronously from a file or other I/O resource.
pub struct SyncEntry<'a, F> {
    file: &'a F,
    entry: &'a Entry,
    registry: &'a Arc<MethodRegistry>,
    ignore_local_headers: bool,
}

impl<F> Deref for SyncEntry<'_, F> {
    type Target = Entry;

    fn deref(&self) -> &Self::Target {
        self.entry
    }
}

impl<'a, F> SyncEntry<'a, F>
where
    F: HasCursor,
{
    /// Whether this entry's payload can be decompressed: false for
    /// encrypted entries and methods without a registered decoder.
    pub fn can_read_data(&self) -> bool {
        self.registry.can_read_entry_data(self.entry)
    }

    /// Returns a decompressing reader for the entry.
    ///
    /// Fails upfront with an unsupported-feature error if the entry is
    /// encrypted or its method has no decoder.
    pub fn reader(&self) -> Result<EntryReader<<F as HasCursor>::Cursor<'a>>, Error> {
        self.registry.check_entry_readable(self.entry)?;
        if self.ignore_local_headers {
            let offset = self.data_offset()?;
            Ok(EntryReader::new_at_data(
                self.entry,
                Arc::clone(self.registry),
                self.file.cursor_at(offset),
            ))
        } else {
            Ok(EntryReader::new(
                self.entry,
                Arc::clone(self.registry),
                self.file.cursor_at(self.entry.header_offset),
            ))
        }
    }

    /// Returns a reader over the entry's compressed payload, verbatim.
    ///
    /// This works for any method and is how entries move between archives
    /// without being recompressed, cf.
    /// [ArchiveWriter::add_raw_entry](crate::ArchiveWriter::add_raw_entry).
    pub fn raw_reader(&self) -> Result<impl Read + 'a, Error> {
        let offset = self.data_offset()?;
        Ok(self
            .file
            .cursor_at(offset)
            .take(self.entry.compressed_size))
    }

    /// The absolute position of the entry's compressed payload.
    ///
    /// Normally this means reading the local file header to learn its name
    /// and extra lengths; in ignore-local-headers mode it is computed from
    /// central directory data alone.
    pub fn data_offset(&self) -> Result<u64, Error> {
        if self.ignore_local_headers {
            let local_extra_len = merge_local(&self.entry.extra_fields).len();
            return Ok(self.entry.header_offset
                + LocalFileHeaderRecord::FIXED_SIZE as u64
                + self.entry.raw_name.len() as u64
                + local_extra_len as u64);
        }

        let mut head = [0u8; LocalFileHeaderRecord::FIXED_SIZE];
        let mut cursor = self.file.cursor_at(self.entry.header_offset);
        cursor.read_exact(&mut head).map_err(Error::IO)?;

        if ZipLong::get(&head, 0) != Some(ZipLong::LOCAL_FILE_HEADER) {
            return Err(FormatError::InvalidLocalHeader.into());
        }
        let name_len = ZipShort::get(&head, 26).unwrap().0 as u64;
        let extra_len = ZipShort::get(&head, 28).unwrap().0 as u64;

        Ok(self.entry.header_offset
            + LocalFileHeaderRecord::FIXED_SIZE as u64
            + name_len
            + extra_len)
    }

    /// Reads the entire entry into a vector.
    pub fn bytes(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::new();
        self.reader()?.read_to_end(&mut v).map_err(Error::IO)?;
        Ok(v)
    }
}

/// A sliceable I/O resource: we can ask for a [Read] at a given offset.
pub trait HasCursor {
    /// The type of [Read] returned by [HasCursor::cursor_at].
    type Cursor<'a>: Read + 'a
    where
        Self: 'a;

    /// Returns a [Read] at the given offset.
    fn cursor_at(&self, offset: u64) -> Self::Cursor<'_>;
}

impl HasCursor for &[u8] {
    type Cursor<'a>
        = &'a [u8]
    where
        Self: 'a;

    fn cursor_at(&self, offset: u64) -> Self::Cursor<'_> {
        &self[offset.try_into().unwrap()..]
    }
}

impl HasCursor for Vec<u8> {
    type Cursor<'a>
        = &'a [u8]
    where
        Self: 'a;

    fn cursor_at(&self, offset: u64) -> Self::Cursor<'_> {
        &self[offset.try_into().unwrap()..]
    }
}

#[cfg(feature = "file")]
impl HasCursor for std::fs::File {
    type Cursor<'a>
        = positioned_io::Cursor<&'a std::fs::File>
    where
        Self: 'a;

    fn cursor_at(&self, offset: u64) -> Self::Cursor<'_> {
        positioned_io::Cursor::new_pos(self, offset)
    }
}

#[cfg(feature = "file")]
impl ReadZip for std::fs::File {
    type File = Self;

    fn read_zip(&self) -> Result<SyncArchive<'_, Self>, Error> {
        let size = self.metadata()?.len();
        self.read_zip_with_size(size)
    }
}
