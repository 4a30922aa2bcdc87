//! High-level archive handle tying detection, index decode, and extraction
//! together.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::extract::{self, ExtractOptions, ExtractSummary};
use crate::format::{self, ArchiveVariant};
use crate::index::{self, RawIndex};
use crate::{Error, Result};

/// An opened archive with its index decoded.
///
/// The archive file handle stays open for the lifetime of the value and is
/// shared across per-file reads; all seeks are absolute.
pub struct Archive {
    path: PathBuf,
    file: File,
    index: RawIndex,
}

impl Archive {
    /// Open an archive, detecting its format from the extension and header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let variant = format::detect(path)?;
        Self::open_as(path, variant)
    }

    /// Open an archive as a specific variant, bypassing detection.
    ///
    /// The variant still derives the index offset and key from the header
    /// line, so forcing [`ArchiveVariant::ZiX`] fails with
    /// [`Error::UnsupportedFormat`] before any index read happens.
    pub fn open_as<P: AsRef<Path>>(path: P, variant: ArchiveVariant) -> Result<Self> {
        let path = path.as_ref();
        let first_line = format::read_first_line(path)?;
        let (offset, key) = variant.derive_layout(&first_line)?;
        Self::open_at(path, offset, key)
    }

    /// Open an archive with a manually supplied index offset and key.
    ///
    /// This is the escape hatch for archives whose header the registry does
    /// not recognize.
    pub fn open_at<P: AsRef<Path>>(path: P, offset: u64, key: Option<u64>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let index = index::decode(&mut file, offset, key)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            index,
        })
    }

    /// Path the archive was opened from.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decoded index.
    #[inline]
    pub fn index(&self) -> &RawIndex {
        &self.index
    }

    /// All logical paths in the archive, sorted lexically.
    pub fn list_paths(&self) -> Vec<String> {
        self.index.list_paths()
    }

    /// Read the full content of one logical file.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let chunks = self
            .index
            .get(path)
            .ok_or_else(|| Error::DataCorruption {
                path: path.to_string(),
                detail: "no such entry in index".to_string(),
            })?;
        extract::read_file(&mut self.file, path, chunks)
    }

    /// Extract every file in the archive to `dest`. See [`extract::extract`].
    pub fn extract<F>(
        &mut self,
        dest: &Path,
        options: &ExtractOptions,
        report: F,
    ) -> Result<ExtractSummary>
    where
        F: FnMut(f64, &str),
    {
        extract::extract(&mut self.file, &self.index, dest, options, report)
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("entries", &self.index.len())
            .finish()
    }
}
