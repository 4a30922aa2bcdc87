//! RPA archive reader for Ren'Py-style game archives.
//!
//! An RPA archive is a single file bundling many logical files behind a
//! zlib-compressed, optionally XOR-obfuscated index. Several incompatible
//! header variants exist:
//!
//! - `RPA-1.0` - bare index file, recognized by its `.rpi` extension
//! - `RPA-2.0` - header line carries the index offset
//! - `RPA-3.0` - header line carries the index offset and obfuscation key
//! - `ALT-1.0` - RPA-3.0 with a masked key and swapped header tokens
//! - `ZiX-12B` - recognized but undocumented; decoding it requires a
//!   manually supplied offset and key
//!
//! # Example
//!
//! ```no_run
//! use renarc_rpa::Archive;
//!
//! let mut archive = Archive::open("game.rpa")?;
//!
//! for path in archive.list_paths() {
//!     println!("{path}");
//! }
//!
//! let data = archive.read_file("script.rpy")?;
//! # Ok::<(), renarc_rpa::Error>(())
//! ```

mod archive;
mod error;
mod extract;
mod format;
mod index;
mod pickle;

pub use archive::Archive;
pub use error::{Error, Result};
pub use extract::{read_file, ExtractOptions, ExtractSummary};
pub use format::{detect, identify, read_first_line, ArchiveVariant};
pub use index::{decode, ChunkRef, RawIndex};
