//! Extraction of logical files from an archive.
//!
//! The index only describes byte ranges; extraction slices them out of the
//! archive file and reassembles each logical file, prefix first. Whole-archive
//! extraction is single-threaded with absolute seeks, and per-file failures
//! either abort the run or are collected, depending on policy.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::index::{ChunkRef, RawIndex};
use crate::{Error, Result};

/// Policy knobs for whole-archive extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Keep going after a per-file failure instead of aborting the run.
    pub continue_on_error: bool,
    /// Create the destination directory if it does not exist.
    pub create_dirs: bool,
}

/// Outcome of a whole-archive extraction that was not aborted.
#[derive(Debug, Default)]
pub struct ExtractSummary {
    /// Number of files written successfully.
    pub extracted: usize,
    /// Per-file failures, as `(path, error message)` pairs. Only populated
    /// under [`ExtractOptions::continue_on_error`].
    pub failures: Vec<(String, String)>,
}

impl ExtractSummary {
    /// True when every file extracted successfully.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Assemble the full byte content of one logical file.
///
/// For each chunk in order: seek to its offset, read exactly
/// `length - prefix.len()` bytes, and emit the prefix followed by those
/// bytes. A prefix longer than the declared length, or a read running past
/// end-of-file, is data corruption rather than silent truncation.
pub fn read_file<R: Read + Seek>(
    archive: &mut R,
    path: &str,
    chunks: &[ChunkRef],
) -> Result<Vec<u8>> {
    let total: u64 = chunks.iter().map(|chunk| chunk.length).sum();
    let mut content = Vec::with_capacity(total as usize);

    for chunk in chunks {
        let prefix_len = chunk.prefix.len() as u64;
        if chunk.length < prefix_len {
            return Err(Error::DataCorruption {
                path: path.to_string(),
                detail: format!(
                    "prefix of {prefix_len} bytes exceeds declared length {}",
                    chunk.length
                ),
            });
        }

        archive.seek(SeekFrom::Start(chunk.offset))?;

        let mut body = vec![0u8; (chunk.length - prefix_len) as usize];
        archive.read_exact(&mut body).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::DataCorruption {
                    path: path.to_string(),
                    detail: format!(
                        "range {}+{} runs past end of archive",
                        chunk.offset, chunk.length
                    ),
                }
            } else {
                Error::Io(err)
            }
        })?;

        content.extend_from_slice(&chunk.prefix);
        content.append(&mut body);
    }

    Ok(content)
}

/// Extract every file in the index to `dest`.
///
/// Files are processed in sorted path order for stable progress reporting;
/// `report(fraction, path)` is called before each file and its return value
/// is never consulted. By default the first per-file failure aborts the run
/// with the underlying cause; with continue-on-error it is recorded in the
/// summary instead.
pub fn extract<R, F>(
    archive: &mut R,
    index: &RawIndex,
    dest: &Path,
    options: &ExtractOptions,
    mut report: F,
) -> Result<ExtractSummary>
where
    R: Read + Seek,
    F: FnMut(f64, &str),
{
    if !dest.is_dir() {
        if options.create_dirs {
            fs::create_dir_all(dest).map_err(|err| Error::Destination {
                path: dest.to_path_buf(),
                source: err,
            })?;
        } else {
            return Err(Error::Destination {
                path: dest.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "destination directory does not exist (pass -m to create it)",
                ),
            });
        }
    }

    let paths = index.list_paths();
    let total = paths.len();
    let mut summary = ExtractSummary::default();

    for (position, path) in paths.iter().enumerate() {
        report(position as f64 / total.max(1) as f64, path);

        let Some(chunks) = index.get(path) else {
            continue;
        };

        match extract_one(archive, path, chunks, dest) {
            Ok(()) => summary.extracted += 1,
            Err(err) if options.continue_on_error => {
                summary.failures.push((path.clone(), err.to_string()));
            }
            Err(err) => return Err(err),
        }
    }

    Ok(summary)
}

fn extract_one<R: Read + Seek>(
    archive: &mut R,
    path: &str,
    chunks: &[ChunkRef],
    dest: &Path,
) -> Result<()> {
    let content = read_file(archive, path, chunks)?;

    let target = dest.join(path);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::Destination {
            path: parent.to_path_buf(),
            source: err,
        })?;
    }
    fs::write(&target, content).map_err(|err| Error::Destination {
        path: target,
        source: err,
    })?;

    Ok(())
}
