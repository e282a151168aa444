//! The library-wide error type.
//!
//! Every failure mode in this crate (§7 of the design doc) is a variant here. I/O failures
//! are bubbled up verbatim via `#[from]`; everything else carries enough context to debug a
//! malformed archive without re-running with extra logging.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Wrong magic number, or a major version this crate does not support.
    #[error("unsupported ZIM format: {0}")]
    UnsupportedFormat(String),

    /// A structural inconsistency in otherwise well-formed bytes: descending offsets, a
    /// NUL-less string, a pointer past the end of the file, and so on.
    #[error("malformed archive: {0}")]
    FormatError(String),

    /// A cluster uses a compression codec that is not registered. Raised lazily, on first
    /// access to that specific cluster.
    #[error("cluster uses unavailable compression codec: {0}")]
    UnsupportedCompression(String),

    /// A lookup (by URL, title, or index) found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Following a redirect chain revisited an entry already seen.
    #[error("redirect loop detected at entry {0}")]
    RedirectLoop(u32),

    /// A redirect chain exceeded the configured maximum depth.
    #[error("redirect chain exceeds maximum depth of {0}")]
    RedirectTooDeep(u32),

    /// An operation that needs the owning archive was called on an unbound value.
    #[error("operation requires a bound entry or cluster")]
    BindRequired,

    /// `addEntry` without `overwrite` hit an existing URL in the same namespace.
    #[error("duplicate entry: {namespace}/{url}")]
    DuplicateEntry { namespace: char, url: String },

    /// The computed MD5 checksum did not match the trailer (only checked when
    /// `Policy::verify_checksum_on_open` is set).
    #[error("checksum mismatch: archive may be corrupt")]
    ChecksumMismatch,

    /// Bubbled up from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
