use std::io::{Cursor, Read};

use chrono::{TimeZone, Utc};
use ferrozip::{
    encoding::Encoding,
    error::Error,
    parse::{Entry, EntryKind, GeneralPurposeBit, Method, ZipLong},
};
use ferrozip_sync::{
    ArchiveWriter, EntrySpec, ReadOptions, ReadZip, ReadZipWithOptions, ScatterBucket, Seekable,
    StreamingOptions, StreamingZipReader, WriterOptions, UnicodeExtraPolicy, Zip64Policy,
};

type SeekableWriter = ArchiveWriter<Seekable<Cursor<Vec<u8>>>>;

fn seekable_archive(build: impl FnOnce(&mut SeekableWriter)) -> Vec<u8> {
    let mut writer = ArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
    build(&mut writer);
    writer.finish().unwrap().into_inner().into_inner()
}

fn sample_archive() -> Vec<u8> {
    seekable_archive(|writer| {
        writer.set_comment("This is a zipfile comment.");
        writer
            .add_entry(
                EntrySpec::new("test.txt", Method::Store)
                    .with_unix_mode(0o644)
                    .with_modified(Utc.with_ymd_and_hms(2010, 9, 5, 2, 12, 0).unwrap()),
                b"This is a test text file.\n",
            )
            .unwrap();
        writer.add_entry(EntrySpec::directory("sub/"), b"").unwrap();
        writer
            .add_entry(
                EntrySpec::new("sub/squashed.bin", Method::Deflate),
                &b"wheee ".repeat(1000),
            )
            .unwrap();
    })
}

#[test_log::test]
fn write_then_read_seekable() {
    let bytes = sample_archive();
    let archive = bytes.read_zip().unwrap();

    assert_eq!(archive.comment(), Some("This is a zipfile comment."));
    assert_eq!(archive.entries().count(), 3);

    let entry = archive.by_name("test.txt").unwrap();
    assert_eq!(entry.kind(), EntryKind::File);
    assert_eq!(entry.mode.0 & 0o777, 0o644);
    assert_eq!(
        entry.modified,
        Utc.with_ymd_and_hms(2010, 9, 5, 2, 12, 0).unwrap()
    );
    assert!(!entry.has_data_descriptor());
    assert_eq!(entry.bytes().unwrap(), b"This is a test text file.\n");

    let dir = archive.by_name("sub/").unwrap();
    assert_eq!(dir.kind(), EntryKind::Directory);

    let squashed = archive.by_name("sub/squashed.bin").unwrap();
    assert_eq!(squashed.method, Method::Deflate);
    assert!(squashed.compressed_size < squashed.uncompressed_size);
    assert_eq!(squashed.bytes().unwrap(), b"wheee ".repeat(1000));
}

fn streamed_foo_archive() -> Vec<u8> {
    let mut writer = ArchiveWriter::new_streaming(Vec::new());
    writer
        .add_entry(EntrySpec::new("test1.txt", Method::Deflate), b"foo")
        .unwrap();
    writer.finish().unwrap().into_inner()
}

#[test_log::test]
fn streaming_sink_emits_data_descriptor() {
    let bytes = streamed_foo_archive();
    let foo_crc = crc32fast::hash(b"foo");

    // local file header: baseline version, bits 3 (descriptor) and 11
    // (utf-8) set, everything unknowable zeroed
    assert_eq!(ZipLong::get(&bytes, 0), Some(ZipLong::LOCAL_FILE_HEADER));
    assert_eq!(&bytes[4..6], &[20, 0], "version needed");
    assert_eq!(&bytes[6..8], &[0x08, 0x08], "general purpose bits");
    assert_eq!(ZipLong::get(&bytes, 14), Some(ZipLong(0)), "crc32");
    assert_eq!(ZipLong::get(&bytes, 18), Some(ZipLong(0)), "compressed");
    assert_eq!(ZipLong::get(&bytes, 22), Some(ZipLong(0)), "uncompressed");

    // the data descriptor sits immediately before the central directory
    let cdh = find_signature(&bytes, ZipLong::CENTRAL_FILE_HEADER).expect("central directory");
    let dd = cdh - 16;
    assert_eq!(ZipLong::get(&bytes, dd), Some(ZipLong::DATA_DESCRIPTOR));
    assert_eq!(ZipLong::get(&bytes, dd + 4), Some(ZipLong(foo_crc)));
    let compressed = ZipLong::get(&bytes, dd + 8).unwrap().0 as usize;
    assert_eq!(ZipLong::get(&bytes, dd + 12), Some(ZipLong(3)), "size");
    assert_eq!(
        30 + "test1.txt".len() + compressed,
        dd,
        "the descriptor follows the payload directly"
    );

    // the central directory mirrors the descriptor values
    assert_eq!(&bytes[cdh + 8..cdh + 10], &[0x08, 0x08]);
    assert_eq!(ZipLong::get(&bytes, cdh + 16), Some(ZipLong(foo_crc)));
    assert_eq!(
        ZipLong::get(&bytes, cdh + 20),
        Some(ZipLong(compressed as u32))
    );
    assert_eq!(ZipLong::get(&bytes, cdh + 24), Some(ZipLong(3)));

    // and the archive reads back fine both ways
    let archive = bytes.read_zip().unwrap();
    assert_eq!(
        archive.by_name("test1.txt").unwrap().bytes().unwrap(),
        b"foo"
    );
}

#[test_log::test]
fn seekable_sink_patches_in_place() {
    let bytes = seekable_archive(|writer| {
        writer
            .add_entry(EntrySpec::new("test1.txt", Method::Deflate), b"foo")
            .unwrap();
    });

    assert_eq!(&bytes[6..8], &[0x00, 0x08], "no descriptor bit");
    assert_eq!(
        ZipLong::get(&bytes, 14),
        Some(ZipLong(crc32fast::hash(b"foo"))),
        "crc32 patched into the local header"
    );
    assert_eq!(ZipLong::get(&bytes, 22), Some(ZipLong(3)));
    assert_eq!(
        find_signature(&bytes, ZipLong::DATA_DESCRIPTOR),
        None,
        "no data descriptor anywhere"
    );
}

fn find_signature(bytes: &[u8], sig: ZipLong) -> Option<usize> {
    bytes.windows(4).position(|w| w == sig.bytes())
}

/// Position a few bytes into the payload of the archive's last entry.
fn cut_inside_last_payload(bytes: &[u8]) -> usize {
    let last_lfh = bytes
        .windows(4)
        .enumerate()
        .filter(|(_, w)| *w == ZipLong::LOCAL_FILE_HEADER.bytes())
        .map(|(i, _)| i)
        .last()
        .expect("at least one local header");
    let name_len = u16::from_le_bytes([bytes[last_lfh + 26], bytes[last_lfh + 27]]) as usize;
    let extra_len = u16::from_le_bytes([bytes[last_lfh + 28], bytes[last_lfh + 29]]) as usize;
    last_lfh + 30 + name_len + extra_len + 5
}

fn collect_streaming(bytes: &[u8], options: StreamingOptions) -> Vec<(String, Vec<u8>)> {
    let mut reader = StreamingZipReader::with_options(bytes, options);
    let mut out = Vec::new();
    while let Some(mut entry) = reader.next_entry().unwrap() {
        let name = entry.entry().name.clone();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        out.push((name, contents));
    }
    out
}

#[test_log::test]
fn streaming_reader_agrees_with_random_access() {
    for bytes in [sample_archive(), streamed_foo_archive()] {
        let archive = bytes.read_zip().unwrap();
        let mut random_access: Vec<(String, Vec<u8>)> = archive
            .entries()
            .map(|e| (e.name.clone(), e.bytes().unwrap()))
            .collect();

        let mut streamed = collect_streaming(&bytes, StreamingOptions::default());

        random_access.sort();
        streamed.sort();
        assert_eq!(random_access, streamed);
    }
}

#[test_log::test]
fn zip64_always_round_trips() {
    let options = WriterOptions {
        zip64: Zip64Policy::Always,
        ..Default::default()
    };

    // seekable: sizes patched into the zip64 extra field
    let mut writer =
        ArchiveWriter::with_options(Cursor::new(Vec::new()), options.clone()).unwrap();
    writer
        .add_entry(EntrySpec::new("big.txt", Method::Deflate), b"hello zip64")
        .unwrap();
    let bytes = writer.finish().unwrap().into_inner().into_inner();

    assert!(find_signature(&bytes, ZipLong::ZIP64_EOCD_RECORD).is_some());
    assert!(find_signature(&bytes, ZipLong::ZIP64_EOCD_LOCATOR).is_some());
    assert_eq!(&bytes[4..6], &[45, 0], "zip64 version needed");

    let archive = bytes.read_zip().unwrap();
    let entry = archive.by_name("big.txt").unwrap();
    assert!(entry.is_zip64);
    assert_eq!(entry.uncompressed_size, 11);
    assert_eq!(entry.bytes().unwrap(), b"hello zip64");

    // streaming: the data descriptor switches to 8-byte sizes
    let mut writer = ArchiveWriter::with_options_streaming(Vec::new(), options);
    writer
        .add_entry(EntrySpec::new("big.txt", Method::Deflate), b"hello zip64")
        .unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let archive = bytes.read_zip().unwrap();
    assert_eq!(
        archive.by_name("big.txt").unwrap().bytes().unwrap(),
        b"hello zip64"
    );
    let streamed = collect_streaming(&bytes, StreamingOptions::default());
    assert_eq!(streamed, vec![("big.txt".to_string(), b"hello zip64".to_vec())]);
}

#[test_log::test]
fn raw_reentry_preserves_bytes() {
    let original = sample_archive();
    let archive = original.read_zip().unwrap();

    // splice every entry into a new archive over a non-seekable sink,
    // without recompressing
    let mut writer = ArchiveWriter::new_streaming(Vec::new());
    for entry in archive.entries_in_physical_order() {
        let payload = entry.raw_reader().unwrap();
        writer.add_raw_entry(&entry, payload).unwrap();
    }
    let copied = writer.finish().unwrap().into_inner();

    assert_eq!(
        find_signature(&copied, ZipLong::DATA_DESCRIPTOR),
        None,
        "raw entries never get data descriptors"
    );

    let reread = copied.read_zip().unwrap();
    for entry in archive.entries() {
        let twin = reread.by_name(&entry.name).unwrap();
        assert_eq!(twin.crc32, entry.crc32);
        assert_eq!(twin.compressed_size, entry.compressed_size);
        assert!(!twin.has_data_descriptor());
        if entry.kind() == EntryKind::File {
            assert_eq!(twin.bytes().unwrap(), entry.bytes().unwrap());
        }
    }
}

#[test_log::test]
fn truncated_zip_repeats_error() {
    let bytes = sample_archive();
    // cut in the middle of the last entry's payload
    let cut = cut_inside_last_payload(&bytes);
    let truncated = &bytes[..cut];

    let mut reader = StreamingZipReader::new(truncated);
    let mut names = Vec::new();
    let err = loop {
        match reader.next_entry() {
            Ok(Some(mut entry)) => {
                names.push(entry.entry().name.clone());
                let mut sink = Vec::new();
                if let Err(e) = entry.read_to_end(&mut sink) {
                    break Error::IO(e);
                }
            }
            Ok(None) => panic!("expected a truncation error, read {names:?}"),
            Err(e) => break e,
        }
    };
    assert!(
        err.to_string().contains("Truncated ZIP file"),
        "got: {err}"
    );

    // the reader is latched: every subsequent call repeats the failure
    for _ in 0..2 {
        let err = reader.next_entry().unwrap_err();
        assert_eq!(err.to_string(), "format: Truncated ZIP file");
    }
}

#[test_log::test]
fn split_marker_first_volume() {
    // the first segment of a split archive: marker, then entries, cut
    // before the end
    let inner = sample_archive();
    let mut bytes = ZipLong::DATA_DESCRIPTOR.bytes().to_vec();
    bytes.extend_from_slice(&inner);
    let cut = cut_inside_last_payload(&bytes);
    let bytes = &bytes[..cut];

    // mounting it can't work: the end of central directory is gone
    let err = bytes.to_vec().read_zip().unwrap_err();
    assert_eq!(
        err.to_string(),
        "format: No end of central directory record found"
    );

    // streaming it yields the complete entries, then the truncation
    let mut reader = StreamingZipReader::new(bytes);
    let first = reader.next_entry().unwrap().expect("first entry");
    assert_eq!(first.entry().name, "test.txt");

    let err = loop {
        match reader.next_entry() {
            Ok(Some(_)) => {}
            Ok(None) => panic!("expected a truncation error"),
            Err(e) => break e,
        }
    };
    assert_eq!(err.to_string(), "format: Truncated ZIP file");
    let err = reader.next_entry().unwrap_err();
    assert_eq!(err.to_string(), "format: Truncated ZIP file");
}

#[test_log::test]
fn stored_data_descriptor_scan() {
    // payload with two decoy descriptor signatures: one followed by
    // nonsense sizes, and one whose sizes match the bytes seen so far
    // but whose checksum doesn't
    let mut payload = b"stored bytes, and a decoy: ".to_vec();
    payload.extend_from_slice(&ZipLong::DATA_DESCRIPTOR.bytes());
    payload.extend_from_slice(&[0x99, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
    payload.extend_from_slice(b" more text ");
    let decoy_at = payload.len() as u32;
    let wrong_crc = !crc32fast::hash(&payload);
    payload.extend_from_slice(&ZipLong::DATA_DESCRIPTOR.bytes());
    payload.extend_from_slice(&wrong_crc.to_le_bytes());
    payload.extend_from_slice(&decoy_at.to_le_bytes());
    payload.extend_from_slice(&decoy_at.to_le_bytes());
    payload.extend_from_slice(b" ...and a tail");

    let options = WriterOptions {
        allow_stored_dd: true,
        ..Default::default()
    };
    let mut writer = ArchiveWriter::with_options_streaming(Vec::new(), options);
    writer
        .put_entry(EntrySpec::new("tricky.bin", Method::Store))
        .unwrap();
    writer.write_data(&payload).unwrap();
    writer.close_entry().unwrap();
    writer
        .add_entry(EntrySpec::new("after.txt", Method::Deflate), b"still here")
        .unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    // without the allowance, the stored entry is refused
    let mut strict = StreamingZipReader::new(&bytes[..]);
    let mut entry = strict.next_entry().unwrap().expect("entry");
    let err = entry.read(&mut [0u8; 16]).unwrap_err();
    assert!(err.to_string().contains("data descriptor"), "got: {err}");

    // with it, the scan steps over the decoy and finds the real one
    let streamed = collect_streaming(
        &bytes,
        StreamingOptions {
            allow_stored_dd: true,
            ..Default::default()
        },
    );
    assert_eq!(streamed.len(), 2);
    assert_eq!(streamed[0], ("tricky.bin".to_string(), payload));
    assert_eq!(streamed[1].1, b"still here");
}

#[test_log::test]
fn unsupported_method_is_detected_and_skippable() {
    let lzma_ish = b"\x5d\x00\x00\x01\x00";
    let mut fake = Entry {
        name: "weird.bin".to_string(),
        method: Method::Lzma,
        crc32: 0xDEAD_BEEF,
        compressed_size: lzma_ish.len() as u64,
        uncompressed_size: 64,
        ..Default::default()
    };
    fake.modified = Utc.with_ymd_and_hms(1994, 5, 1, 12, 0, 0).unwrap();

    let bytes = seekable_archive(|writer| {
        writer.add_raw_entry(&fake, &lzma_ish[..]).unwrap();
        writer
            .add_entry(EntrySpec::new("normal.txt", Method::Deflate), b"fine")
            .unwrap();
    });

    // random access: the entry is visible, refused for decoding, and
    // still available raw
    let archive = bytes.read_zip().unwrap();
    let entry = archive.by_name("weird.bin").unwrap();
    assert!(!entry.can_read_data());
    let err = entry.reader().unwrap_err();
    assert!(
        matches!(err, Error::Unsupported(_)),
        "expected unsupported, got: {err}"
    );
    let mut raw = Vec::new();
    entry.raw_reader().unwrap().read_to_end(&mut raw).unwrap();
    assert_eq!(raw, lzma_ish);

    assert!(archive.by_name("normal.txt").unwrap().can_read_data());

    // streaming: reading the entry fails, skipping it works
    let mut reader = StreamingZipReader::new(&bytes[..]);
    let mut entry = reader.next_entry().unwrap().expect("first entry");
    assert_eq!(entry.entry().name, "weird.bin");
    assert!(!entry.can_read_data());
    assert!(entry.read(&mut [0u8; 16]).is_err());

    let mut entry = reader.next_entry().unwrap().expect("second entry");
    assert_eq!(entry.entry().name, "normal.txt");
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents).unwrap();
    assert_eq!(contents, b"fine");
}

#[test_log::test]
fn encrypted_entry_is_refused() {
    let mut flags = GeneralPurposeBit::default();
    flags.set_uses_encryption(true);
    let sealed = Entry {
        name: "secret.txt".to_string(),
        method: Method::Store,
        flags,
        crc32: 1,
        compressed_size: 4,
        uncompressed_size: 4,
        ..Default::default()
    };

    let bytes = seekable_archive(|writer| {
        writer.add_raw_entry(&sealed, &b"\xDE\xAD\xBE\xEF"[..]).unwrap();
    });

    let archive = bytes.read_zip().unwrap();
    let entry = archive.by_name("secret.txt").unwrap();
    assert!(entry.is_encrypted());
    assert!(!entry.can_read_data());
    let err = entry.reader().unwrap_err();
    assert_eq!(err.to_string(), "unsupported: encrypted entries are not supported");
}

#[test_log::test]
fn scatter_buckets_merge_in_order() {
    let dirs = std::thread::spawn(|| {
        let mut bucket = ScatterBucket::new().unwrap();
        bucket
            .add_entry(EntrySpec::directory("a/"), || Ok(std::io::empty()))
            .unwrap();
        bucket
            .add_entry(EntrySpec::directory("b/"), || Ok(std::io::empty()))
            .unwrap();
        bucket
    });
    let files = std::thread::spawn(|| {
        let mut bucket = ScatterBucket::new().unwrap();
        bucket
            .add_entry(EntrySpec::new("a/one.txt", Method::Deflate), || {
                Ok(&b"first payload"[..])
            })
            .unwrap();
        bucket
            .add_entry(EntrySpec::new("b/two.txt", Method::Store), || {
                Ok(&b"second payload"[..])
            })
            .unwrap();
        bucket
    });

    let mut writer = ArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
    // directories first, then files: inter-bucket order is the merge
    // order, intra-bucket order is insertion order
    dirs.join().unwrap().merge_into(&mut writer).unwrap();
    files.join().unwrap().merge_into(&mut writer).unwrap();
    let bytes = writer.finish().unwrap().into_inner().into_inner();

    let archive = bytes.read_zip().unwrap();
    let names: Vec<_> = archive.entries().map(|e| e.name.clone()).collect();
    assert_eq!(names, ["a/", "b/", "a/one.txt", "b/two.txt"]);

    assert_eq!(
        archive.by_name("a/one.txt").unwrap().bytes().unwrap(),
        b"first payload"
    );
    assert_eq!(
        archive.by_name("b/two.txt").unwrap().bytes().unwrap(),
        b"second payload"
    );
    assert_eq!(archive.by_name("a/").unwrap().kind(), EntryKind::Directory);
}

#[test_log::test]
fn duplicate_names_are_preserved() {
    let bytes = seekable_archive(|writer| {
        writer
            .add_entry(EntrySpec::new("dup.txt", Method::Store), b"first")
            .unwrap();
        writer
            .add_entry(EntrySpec::new("dup.txt", Method::Store), b"second")
            .unwrap();
    });

    let archive = bytes.read_zip().unwrap();
    assert_eq!(archive.entries().count(), 2);

    let all: Vec<_> = archive
        .entries_named("dup.txt")
        .map(|e| e.bytes().unwrap())
        .collect();
    assert_eq!(all, [b"first".to_vec(), b"second".to_vec()]);

    // by_name picks the first one in central order
    assert_eq!(archive.by_name("dup.txt").unwrap().bytes().unwrap(), b"first");
}

#[test_log::test]
fn ignore_local_headers_mode() {
    let bytes = sample_archive();
    let archive = bytes
        .read_zip_with_options(ReadOptions {
            ignore_local_headers: true,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(
        archive.by_name("test.txt").unwrap().bytes().unwrap(),
        b"This is a test text file.\n"
    );
    assert_eq!(
        archive.by_name("sub/squashed.bin").unwrap().bytes().unwrap(),
        b"wheee ".repeat(1000)
    );

    // raw access keeps working too
    let raw = archive.by_name("test.txt").unwrap().raw_reader().unwrap();
    let contents: Vec<u8> = raw.bytes().map(|b| b.unwrap()).collect();
    assert_eq!(contents, b"This is a test text file.\n");
}

#[test_log::test]
fn entry_comments_round_trip() {
    let bytes = seekable_archive(|writer| {
        writer
            .add_entry(
                EntrySpec::new("noted.txt", Method::Store).with_comment("remember me"),
                b"x",
            )
            .unwrap();
    });

    let archive = bytes.read_zip().unwrap();
    assert_eq!(
        archive.by_name("noted.txt").unwrap().comment.as_deref(),
        Some("remember me")
    );
}

#[test_log::test]
fn archives_with_leading_junk_mount_fine() {
    let inner = sample_archive();
    let mut bytes = b"#!/bin/sh\necho self-extracting stub\n".to_vec();
    bytes.extend_from_slice(&inner);

    let archive = bytes.read_zip().unwrap();
    assert_eq!(archive.entries().count(), 3);
    assert_eq!(
        archive.by_name("test.txt").unwrap().bytes().unwrap(),
        b"This is a test text file.\n"
    );
}

#[test_log::test]
fn unicode_path_extra_field_restores_names() {
    let options = WriterOptions {
        encoding: Encoding::Ascii,
        unicode_extra: UnicodeExtraPolicy::Always,
        ..Default::default()
    };
    let mut writer = ArchiveWriter::with_options(Cursor::new(Vec::new()), options).unwrap();
    writer
        .add_entry(EntrySpec::new("café.txt", Method::Store), b"x")
        .unwrap();
    let bytes = writer.finish().unwrap().into_inner().into_inner();

    let archive = bytes.read_zip().unwrap();
    let entry = archive.by_name("café.txt").expect("unicode name restored");
    assert_eq!(entry.raw_name, b"caf%U00E9.txt");
    assert_eq!(entry.bytes().unwrap(), b"x");
}

#[test_log::test]
fn writer_protocol_misuse() {
    let mut writer = ArchiveWriter::new_streaming(Vec::new());
    let err = writer.write_data(b"no entry").unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));

    writer
        .put_entry(EntrySpec::new("a.txt", Method::Deflate))
        .unwrap();
    let err = writer
        .put_entry(EntrySpec::new("b.txt", Method::Deflate))
        .unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));

    // stored entries of unknown size don't fit a non-seekable sink
    writer.close_entry().unwrap();
    let err = writer
        .put_entry(EntrySpec::new("c.txt", Method::Store))
        .unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));

    // unless the size and checksum are declared
    writer
        .put_entry(
            EntrySpec::new("c.txt", Method::Store)
                .with_declared_contents(2, crc32fast::hash(b"ok")),
        )
        .unwrap();
    writer.write_data(b"ok").unwrap();
    writer.close_entry().unwrap();

    let bytes = writer.finish().unwrap().into_inner();
    let streamed = collect_streaming(&bytes, StreamingOptions::default());
    assert_eq!(streamed.len(), 2);
    assert_eq!(streamed[1], ("c.txt".to_string(), b"ok".to_vec()));
}

#[test_log::test]
fn zip64_never_policy_rejects_large_entries() {
    let options = WriterOptions {
        zip64: Zip64Policy::Never,
        ..Default::default()
    };
    let mut writer = ArchiveWriter::with_options_streaming(Vec::new(), options);
    let err = writer
        .put_entry(
            EntrySpec::new("huge.bin", Method::Store)
                .with_declared_contents(5 * 1024 * 1024 * 1024, 0),
        )
        .unwrap_err();
    assert!(err.to_string().contains("zip64"), "got: {err}");
}

#[test_log::test]
fn physical_order_differs_from_central_order_after_merge() {
    // build an archive whose central order (put order) is not name order,
    // then check the physical iterator agrees with offsets
    let bytes = seekable_archive(|writer| {
        for name in ["zebra.txt", "alpha.txt", "middle.txt"] {
            writer
                .add_entry(EntrySpec::new(name, Method::Store), name.as_bytes())
                .unwrap();
        }
    });

    let archive = bytes.read_zip().unwrap();
    let physical: Vec<_> = archive
        .entries_in_physical_order()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(physical, ["zebra.txt", "alpha.txt", "middle.txt"]);

    let mut offsets: Vec<u64> = archive.entries().map(|e| e.header_offset).collect();
    let sorted = {
        let mut s = offsets.clone();
        s.sort();
        s
    };
    assert_eq!(offsets, sorted, "put order is physical order here");
    offsets.dedup();
    assert_eq!(offsets.len(), 3);
}
