//! The compression-method registry.
//!
//! Store, Deflate, Implode and Shrink are built into this crate. Every other
//! method (Deflate64, BZip2, Zstd when their features are off, LZMA, XZ,
//! vendor methods) can be supplied by the host through [DecoderFactory].
//!
//! Registries are explicit values passed to readers at construction. A
//! process-wide default exists for convenience; it is built once and never
//! mutated afterwards, so sharing it across threads is safe.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::error::Error;
use crate::fsm::Decompressor;
use crate::parse::{Entry, Method};

/// Builds decoders for a compression method the core does not implement.
pub trait DecoderFactory: Send + Sync {
    /// Build a decoder for one entry. Called once per opened entry stream.
    fn make_decoder(&self, entry: &Entry) -> Result<Box<dyn Decompressor>, Error>;
}

/// Maps method codes to decoder factories.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    custom: HashMap<u16, Arc<dyn DecoderFactory>>,
}

impl MethodRegistry {
    /// A registry with only the built-in methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder factory for a method code. Replaces any prior
    /// registration for the same code.
    pub fn register(&mut self, method: Method, factory: Arc<dyn DecoderFactory>) {
        self.custom.insert(method.into(), factory);
    }

    pub(crate) fn lookup(&self, method: Method) -> Option<&Arc<dyn DecoderFactory>> {
        self.custom.get(&u16::from(method))
    }

    /// Whether entries using this method can be decoded: either by a
    /// built-in decoder, or through a registered factory.
    pub fn can_decode(&self, method: Method) -> bool {
        let builtin = match method {
            Method::Store | Method::Shrink | Method::Implode => true,
            Method::Deflate => cfg!(feature = "deflate"),
            Method::Deflate64 => cfg!(feature = "deflate64"),
            Method::Bzip2 => cfg!(feature = "bzip2"),
            Method::Zstd => cfg!(feature = "zstd"),
            _ => false,
        };
        builtin || self.custom.contains_key(&u16::from(method))
    }

    /// False iff the entry's method has no decoder, or the entry is
    /// encrypted.
    pub fn can_read_entry_data(&self, entry: &Entry) -> bool {
        !entry.is_encrypted() && self.can_decode(entry.method)
    }

    /// The error-typed version of [Self::can_read_entry_data]: Ok when the
    /// entry can be decoded, the specific [UnsupportedError] otherwise.
    pub fn check_entry_readable(&self, entry: &Entry) -> Result<(), Error> {
        use crate::error::UnsupportedError;

        if entry.is_encrypted() {
            return Err(UnsupportedError::Encryption.into());
        }
        if self.can_decode(entry.method) {
            return Ok(());
        }
        // methods behind cargo features get a friendlier complaint
        let enableable = matches!(
            entry.method,
            Method::Deflate | Method::Deflate64 | Method::Bzip2 | Method::Zstd
        );
        if enableable {
            Err(Error::method_not_enabled(entry.method))
        } else {
            Err(Error::method_not_supported(entry.method))
        }
    }
}

/// The process-wide default registry: built-in methods only. Built on first
/// use and never mutated.
pub fn default_registry() -> &'static Arc<MethodRegistry> {
    static DEFAULT: OnceLock<Arc<MethodRegistry>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(MethodRegistry::new()))
}
