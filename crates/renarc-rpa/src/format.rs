//! Archive format registry.
//!
//! The RPA family consists of a handful of incompatible header variants. Each
//! variant knows how to recognize itself from the archive's file extension and
//! first line, and how to recover the index offset and obfuscation key from
//! that line. Variants are tried in a fixed priority order; the first match
//! wins.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::{Error, Result};

/// XOR mask applied to the first header token to recover the ALT-1.0 key.
///
/// The ALT-1.0 header also swaps the key and offset tokens relative to
/// RPA-3.0. Both quirks are part of the wire format and must not be "fixed".
const ALT_XOR_KEY: u64 = 0xDABE_8DF0;

/// Longest header line we are willing to scan for a newline.
const MAX_HEADER_LINE: u64 = 256;

/// A recognized archive sub-format.
///
/// The set is closed: archives in the wild are one of these five shapes.
/// [`ArchiveVariant::ZiX`] is recognized so that it can be reported by name,
/// but its index parameters are stored in an undocumented obfuscated form and
/// deriving them fails with [`Error::UnsupportedFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveVariant {
    /// Bare index file, identified by its `.rpi` extension alone.
    V1,
    /// `RPA-2.0`: header carries the index offset.
    V2,
    /// `RPA-3.0`: header carries the index offset and an obfuscation key.
    V3,
    /// `ALT-1.0`: like V3 with masked key and swapped token order.
    Alt1,
    /// `ZiX-12B`: recognized but not decodable.
    ZiX,
}

impl ArchiveVariant {
    /// All variants in detection priority order.
    pub const ALL: [ArchiveVariant; 5] = [
        ArchiveVariant::V1,
        ArchiveVariant::V2,
        ArchiveVariant::V3,
        ArchiveVariant::Alt1,
        ArchiveVariant::ZiX,
    ];

    /// Display name of the variant.
    pub const fn name(self) -> &'static str {
        match self {
            ArchiveVariant::V1 => "RPA-1.0",
            ArchiveVariant::V2 => "RPA-2.0",
            ArchiveVariant::V3 => "RPA-3.0",
            ArchiveVariant::Alt1 => "ALT-1.0",
            ArchiveVariant::ZiX => "ZiX-12B",
        }
    }

    /// The ASCII token the header line starts with, if the variant is
    /// content-detected. `V1` is extension-detected and has no token.
    const fn header_token(self) -> Option<&'static [u8]> {
        match self {
            ArchiveVariant::V1 => None,
            ArchiveVariant::V2 => Some(b"RPA-2.0"),
            ArchiveVariant::V3 => Some(b"RPA-3.0"),
            ArchiveVariant::Alt1 => Some(b"ALT-1.0"),
            ArchiveVariant::ZiX => Some(b"ZiX-12B"),
        }
    }

    /// Detection predicate over the lower-cased extension and the first line.
    fn matches(self, extension: &str, first_line: &[u8]) -> bool {
        match self.header_token() {
            None => extension == "rpi",
            Some(token) => first_line.starts_with(token),
        }
    }

    /// Derive `(index_offset, obfuscation_key)` from the archive's first line.
    ///
    /// Numeric tokens are hexadecimal, whitespace-separated after the header
    /// token. See the variant docs for which token is which.
    pub fn derive_layout(self, first_line: &[u8]) -> Result<(u64, Option<u64>)> {
        match self {
            ArchiveVariant::V1 => Ok((0, None)),
            ArchiveVariant::V2 => {
                let tokens = hex_tokens(first_line, 1)?;
                Ok((tokens[0], None))
            }
            ArchiveVariant::V3 => {
                let tokens = hex_tokens(first_line, 2)?;
                Ok((tokens[0], Some(tokens[1])))
            }
            ArchiveVariant::Alt1 => {
                // Token order is swapped relative to RPA-3.0: key first,
                // offset second, with the key XOR-masked.
                let tokens = hex_tokens(first_line, 2)?;
                Ok((tokens[1], Some(tokens[0] ^ ALT_XOR_KEY)))
            }
            ArchiveVariant::ZiX => Err(Error::UnsupportedFormat(self.name())),
        }
    }

    /// Look up a variant by a user-supplied name, bypassing detection.
    ///
    /// Accepts the display name (`RPA-3.0`) or a short alias (`v3`),
    /// case-insensitively. Unknown names fail fast.
    pub fn from_name(name: &str) -> Result<ArchiveVariant> {
        match name.to_ascii_lowercase().as_str() {
            "v1" | "rpa-1.0" => Ok(ArchiveVariant::V1),
            "v2" | "rpa-2.0" => Ok(ArchiveVariant::V2),
            "v3" | "rpa-3.0" => Ok(ArchiveVariant::V3),
            "alt1" | "alt-1.0" => Ok(ArchiveVariant::Alt1),
            "zix" | "zix-12b" => Ok(ArchiveVariant::ZiX),
            _ => Err(Error::UnknownVersion {
                given: name.to_string(),
                known: "RPA-1.0, RPA-2.0, RPA-3.0, ALT-1.0, ZiX-12B",
            }),
        }
    }
}

impl std::fmt::Display for ArchiveVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Match an archive against the registry without touching the filesystem.
///
/// `extension` must already be lower-cased; `first_line` is the raw bytes up
/// to and including the first newline.
pub fn identify(extension: &str, first_line: &[u8]) -> Option<ArchiveVariant> {
    ArchiveVariant::ALL
        .iter()
        .copied()
        .find(|variant| variant.matches(extension, first_line))
}

/// Detect the variant of an archive on disk.
///
/// Reads the file extension and the first line once, then evaluates each
/// variant's predicate in priority order.
pub fn detect(path: &Path) -> Result<ArchiveVariant> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let first_line = read_first_line(path)?;

    identify(&extension, &first_line).ok_or(Error::UnrecognizedFormat)
}

/// Read the first line of a file: bytes up to and including the first
/// newline, capped at [`MAX_HEADER_LINE`] bytes if none is found.
pub fn read_first_line(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut line = Vec::new();
    let mut limited = BufReader::new(file).take(MAX_HEADER_LINE);

    let mut byte = [0u8; 1];
    loop {
        match limited.read(&mut byte)? {
            0 => break,
            _ => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
        }
    }

    Ok(line)
}

/// Parse exactly `count` hexadecimal tokens following the header token.
fn hex_tokens(first_line: &[u8], count: usize) -> Result<Vec<u64>> {
    let line = std::str::from_utf8(first_line)
        .map_err(|_| Error::MalformedHeader("header line is not valid UTF-8".to_string()))?;

    let tokens: Vec<u64> = line
        .split_ascii_whitespace()
        .skip(1) // header token
        .take(count)
        .map(|token| {
            u64::from_str_radix(token, 16)
                .map_err(|_| Error::MalformedHeader(format!("invalid hex token {token:?}")))
        })
        .collect::<Result<_>>()?;

    if tokens.len() < count {
        return Err(Error::MalformedHeader(format!(
            "expected {count} header tokens, found {}",
            tokens.len()
        )));
    }

    Ok(tokens)
}
