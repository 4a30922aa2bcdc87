//! Archive index decoding.
//!
//! The index lives at a format-specific offset and runs to end-of-file:
//! a zlib-compressed, serialized mapping from logical file path to the byte
//! ranges that hold its content. Depending on the variant, the stored offset
//! and length fields are XOR-obfuscated with a per-archive key.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use flate2::read::ZlibDecoder;

use crate::pickle::{self, Value};
use crate::{Error, Result};

/// One contiguous byte range within the archive backing a logical file,
/// plus an optional literal prefix prepended ahead of the bytes read from
/// `offset`.
///
/// On disk, entries come in two shapes: a legacy `(offset, length)` pair with
/// an implicit empty prefix, and a `(offset, length, prefix)` triple. Both
/// normalize to this one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRef {
    /// Absolute offset of the range within the archive file.
    pub offset: u64,
    /// Total length of the logical content, prefix included.
    pub length: u64,
    /// Literal bytes emitted before the bytes read from `offset`.
    pub prefix: Vec<u8>,
}

impl ChunkRef {
    /// Create a chunk with no literal prefix.
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            prefix: Vec::new(),
        }
    }
}

/// The decoded index: logical file path to ordered chunk list.
///
/// Paths are stored with the host path separator. Built once per run and
/// read-only afterwards.
#[derive(Debug, Default)]
pub struct RawIndex {
    entries: HashMap<String, Vec<ChunkRef>>,
}

impl RawIndex {
    /// Number of logical files in the index.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the index has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the chunk list for a logical path.
    pub fn get(&self, path: &str) -> Option<&[ChunkRef]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    /// Iterate over `(path, chunks)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ChunkRef])> {
        self.entries
            .iter()
            .map(|(path, chunks)| (path.as_str(), chunks.as_slice()))
    }

    /// All logical paths, sorted lexically.
    pub fn list_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// Decode the index of an open archive.
///
/// Seeks to `offset`, inflates the remainder of the file, deserializes the
/// object graph, normalizes paths and entry shapes, and finally reverses the
/// XOR obfuscation if `key` is present. A caller-supplied `(offset, key)`
/// bypasses variant-based derivation entirely.
pub fn decode<R: Read + Seek>(archive: &mut R, offset: u64, key: Option<u64>) -> Result<RawIndex> {
    archive.seek(SeekFrom::Start(offset))?;

    let mut compressed = Vec::new();
    archive.read_to_end(&mut compressed)?;

    let mut serialized = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut serialized)
        .map_err(|err| Error::CorruptIndex(err.to_string()))?;

    let graph = pickle::parse(&serialized)?;
    build_index(graph, key)
}

fn build_index(graph: Value, key: Option<u64>) -> Result<RawIndex> {
    let Value::Dict(pairs) = graph else {
        return Err(Error::MalformedIndex(
            "top-level value is not a mapping".to_string(),
        ));
    };

    let mut entries = HashMap::with_capacity(pairs.len());
    for (raw_path, raw_chunks) in pairs {
        // Duplicate paths are allowed by the format; last write wins.
        entries.insert(normalize_path(raw_path)?, chunk_list(raw_chunks)?);
    }

    // Obfuscation covers only the two integers, uniformly across both entry
    // shapes, so the XOR pass runs after shape normalization.
    if let Some(key) = key {
        for chunks in entries.values_mut() {
            for chunk in chunks {
                chunk.offset ^= key;
                chunk.length ^= key;
            }
        }
    }

    Ok(RawIndex { entries })
}

/// Keys are stored as raw bytes or text interchangeably; normalize to a
/// string with the host path separator.
fn normalize_path(value: Value) -> Result<String> {
    let Value::Bytes(bytes) = value else {
        return Err(Error::MalformedIndex(
            "index key is not a string".to_string(),
        ));
    };
    let path = String::from_utf8_lossy(&bytes);
    Ok(path.replace('/', std::path::MAIN_SEPARATOR_STR))
}

fn chunk_list(value: Value) -> Result<Vec<ChunkRef>> {
    let Value::List(items) = value else {
        return Err(Error::MalformedIndex(
            "index entry is not a sequence".to_string(),
        ));
    };
    items.into_iter().map(chunk_ref).collect()
}

/// Expand a 2- or 3-element tuple into a [`ChunkRef`].
fn chunk_ref(value: Value) -> Result<ChunkRef> {
    let Value::List(fields) = value else {
        return Err(Error::MalformedIndex(
            "chunk entry is not a tuple".to_string(),
        ));
    };

    match fields.as_slice() {
        [Value::Int(offset), Value::Int(length)] => Ok(ChunkRef::new(*offset, *length)),
        [Value::Int(offset), Value::Int(length), Value::Bytes(prefix)] => Ok(ChunkRef {
            offset: *offset,
            length: *length,
            prefix: prefix.clone(),
        }),
        _ => Err(Error::MalformedIndex(format!(
            "chunk entry has unexpected shape ({} fields)",
            fields.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use super::*;
    use crate::pickle::testenc;

    fn sep(path: &str) -> String {
        path.replace('/', std::path::MAIN_SEPARATOR_STR)
    }

    fn compressed_index(graph: &Value) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&testenc::encode(graph)).unwrap();
        encoder.finish().unwrap()
    }

    fn entry(path: &[u8], chunks: Vec<Value>) -> (Value, Value) {
        (Value::Bytes(path.to_vec()), Value::List(chunks))
    }

    fn pair(offset: u64, length: u64) -> Value {
        Value::List(vec![Value::Int(offset), Value::Int(length)])
    }

    fn triple(offset: u64, length: u64, prefix: &[u8]) -> Value {
        Value::List(vec![
            Value::Int(offset),
            Value::Int(length),
            Value::Bytes(prefix.to_vec()),
        ])
    }

    #[test]
    fn test_decode_roundtrip() {
        let graph = Value::Dict(vec![
            entry(b"game/script.rpy", vec![triple(100, 20, b"RP")]),
            entry(b"images/bg.png", vec![pair(300, 40)]),
        ]);
        let blob = compressed_index(&graph);

        // Index preceded by arbitrary content at offset 7.
        let mut archive = Cursor::new([b"HDR\nXYZ".to_vec(), blob].concat());
        let index = decode(&mut archive, 7, None).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get(&sep("game/script.rpy")).unwrap(),
            &[ChunkRef {
                offset: 100,
                length: 20,
                prefix: b"RP".to_vec(),
            }]
        );
        assert_eq!(
            index.get(&sep("images/bg.png")).unwrap(),
            &[ChunkRef::new(300, 40)]
        );
    }

    #[test]
    fn test_legacy_and_modern_shapes_decode_identically() {
        let graph = Value::Dict(vec![
            entry(b"legacy", vec![pair(100, 20)]),
            entry(b"modern", vec![triple(100, 20, b"")]),
        ]);
        let mut archive = Cursor::new(compressed_index(&graph));
        let index = decode(&mut archive, 0, None).unwrap();

        assert_eq!(index.get("legacy"), index.get("modern"));
    }

    #[test]
    fn test_keyed_decode_recovers_true_values() {
        let key = 0xFF;
        let graph = Value::Dict(vec![entry(b"file", vec![pair(100 ^ key, 20 ^ key)])]);
        let mut archive = Cursor::new(compressed_index(&graph));
        let index = decode(&mut archive, 0, Some(key)).unwrap();

        assert_eq!(index.get("file").unwrap(), &[ChunkRef::new(100, 20)]);
    }

    #[test]
    fn test_xor_is_its_own_inverse() {
        let key = 0xDEAD_BEEF_0123_4567;
        let graph = Value::Dict(vec![entry(
            b"file",
            vec![triple(4096 ^ key, 512 ^ key, b"pfx")],
        )]);
        let mut archive = Cursor::new(compressed_index(&graph));
        let index = decode(&mut archive, 0, Some(key)).unwrap();

        let chunk = &index.get("file").unwrap()[0];
        assert_eq!(chunk.offset, 4096);
        assert_eq!(chunk.length, 512);
        // Prefix bytes are not part of the obfuscation.
        assert_eq!(chunk.prefix, b"pfx");
    }

    #[test]
    fn test_duplicate_paths_last_write_wins() {
        let graph = Value::Dict(vec![
            entry(b"file", vec![pair(1, 2)]),
            entry(b"file", vec![pair(3, 4)]),
        ]);
        let mut archive = Cursor::new(compressed_index(&graph));
        let index = decode(&mut archive, 0, None).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("file").unwrap(), &[ChunkRef::new(3, 4)]);
    }

    #[test]
    fn test_corrupt_stream_is_corrupt_index() {
        let mut archive = Cursor::new(b"this is not a zlib stream".to_vec());
        assert!(matches!(
            decode(&mut archive, 0, None).unwrap_err(),
            Error::CorruptIndex(_)
        ));
    }

    #[test]
    fn test_non_mapping_graph_is_malformed() {
        let graph = Value::List(vec![Value::Int(1)]);
        let mut archive = Cursor::new(compressed_index(&graph));
        assert!(matches!(
            decode(&mut archive, 0, None).unwrap_err(),
            Error::MalformedIndex(_)
        ));
    }

    #[test]
    fn test_bad_chunk_shape_is_malformed() {
        let graph = Value::Dict(vec![entry(b"file", vec![Value::List(vec![Value::Int(1)])])]);
        let mut archive = Cursor::new(compressed_index(&graph));
        assert!(matches!(
            decode(&mut archive, 0, None).unwrap_err(),
            Error::MalformedIndex(_)
        ));
    }

    #[test]
    fn test_list_paths_sorted() {
        let graph = Value::Dict(vec![
            entry(b"b", vec![pair(0, 0)]),
            entry(b"a", vec![pair(0, 0)]),
            entry(b"c", vec![pair(0, 0)]),
        ]);
        let mut archive = Cursor::new(compressed_index(&graph));
        let index = decode(&mut archive, 0, None).unwrap();

        assert_eq!(index.list_paths(), vec!["a", "b", "c"]);
    }
}
