//! Error types for the RPA crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when working with RPA archives.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No known format matched the archive header.
    #[error("unrecognized archive format; force a version with -f or supply a manual offset/key")]
    UnrecognizedFormat,

    /// A format was matched but has no implemented decode path.
    #[error("the {0} format is not supported; supply a manual index offset and key (-o/-k) to decode it")]
    UnsupportedFormat(&'static str),

    /// A forced version name did not match any known format.
    #[error("unknown format version {given:?}; known versions are {known}")]
    UnknownVersion { given: String, known: &'static str },

    /// The archive header line matched a format but its parameters did not parse.
    #[error("malformed archive header: {0}")]
    MalformedHeader(String),

    /// The compressed index could not be inflated.
    #[error("corrupt archive index: {0}")]
    CorruptIndex(String),

    /// The index deserialized into something other than the expected shape.
    #[error("malformed archive index: {0}")]
    MalformedIndex(String),

    /// A chunk reference pointed outside the archive or contradicted itself.
    #[error("data corruption in {path}: {detail}")]
    DataCorruption { path: String, detail: String },

    /// The destination directory or file could not be written.
    #[error("destination error for {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// Reader errors only surface while walking the serialized index graph,
// where a truncated buffer means the index itself is malformed.
impl From<renarc_common::Error> for Error {
    fn from(err: renarc_common::Error) -> Self {
        Error::MalformedIndex(err.to_string())
    }
}

/// Result type for RPA operations.
pub type Result<T> = std::result::Result<T, Error>;
