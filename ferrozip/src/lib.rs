#![warn(missing_docs)]

//! ferrozip is a [sans-io](https://sans-io.readthedocs.io/how-to-sans-io.html)
//! library for reading and writing zip files.
//!
//! It's made up of a bunch of types representing the various parts of a zip
//! file, winnow parsers (and matching emitters) that convert between byte
//! buffers and those types, and state machines that use the parsers to read
//! zip files from a stream or mount them from a seekable source.
//!
//! This crate is low-level: it never touches `std::io` on the decode path.
//! You may be interested in the higher-level wrapper
//! [ferrozip-sync](https://crates.io/crates/ferrozip-sync), which adds a
//! random-access reader, a streaming reader, a dual-mode writer and a
//! scatter writer on top of std I/O traits.

pub mod codec;
pub mod encoding;
pub mod error;
pub mod fsm;
pub mod parse;
