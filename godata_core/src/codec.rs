//! Codec registry: how values become files and files become values.
//!
//! Writers are keyed by [`Shape`] and carry the suffix of the files they
//! produce. Readers are keyed by file suffix. Both tables are plain maps, so
//! registering a key again replaces the earlier entry and registration order
//! never matters across different keys.

use crate::error::{Error, Result};
use crate::value::{Shape, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Writes a value to a real path.
pub type WriteFn = dyn Fn(&Value, &Path) -> Result<()> + Send + Sync;

/// Reads a value back from a real path.
pub type ReadFn = dyn Fn(&Path) -> Result<Value> + Send + Sync;

/// A resolved writer together with the suffix of the files it produces.
#[derive(Clone)]
pub struct Writer {
    suffix: String,
    write: Arc<WriteFn>,
}

impl Writer {
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn write(&self, value: &Value, path: &Path) -> Result<()> {
        (self.write)(value, path)
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

/// A resolved reader.
#[derive(Clone)]
pub struct Reader {
    read: Arc<ReadFn>,
}

impl Reader {
    pub fn read(&self, path: &Path) -> Result<Value> {
        (self.read)(path)
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader").finish_non_exhaustive()
    }
}

/// Registration tables for writers and readers.
#[derive(Default)]
pub struct CodecRegistry {
    writers: RwLock<HashMap<Shape, Writer>>,
    readers: RwLock<HashMap<String, Reader>>,
}

impl CodecRegistry {
    /// A registry with no entries at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry populated with the built-in codecs.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        register_builtins(&registry);
        registry
    }

    /// Register (or replace) the writer for `shape`.
    pub fn register_writer<F>(&self, shape: Shape, suffix: &str, write: F)
    where
        F: Fn(&Value, &Path) -> Result<()> + Send + Sync + 'static,
    {
        let writer = Writer {
            suffix: normalize_suffix(suffix).to_string(),
            write: Arc::new(write),
        };
        self.writers.write().insert(shape, writer);
    }

    /// Register (or replace) the reader for `suffix`.
    pub fn register_reader<F>(&self, suffix: &str, read: F)
    where
        F: Fn(&Path) -> Result<Value> + Send + Sync + 'static,
    {
        let reader = Reader {
            read: Arc::new(read),
        };
        self.readers
            .write()
            .insert(normalize_suffix(suffix).to_string(), reader);
    }

    /// The active writer for `value`'s shape.
    pub fn writer_for(&self, value: &Value) -> Result<Writer> {
        let shape = value.shape();
        self.writers
            .read()
            .get(&shape)
            .cloned()
            .ok_or_else(|| Error::no_writer(shape.as_str()))
    }

    /// The active reader for `suffix`.
    pub fn reader_for_suffix(&self, suffix: &str) -> Option<Reader> {
        self.readers.read().get(normalize_suffix(suffix)).cloned()
    }

    /// The active reader for a file, chosen by its extension.
    pub fn reader_for_path(&self, path: &Path) -> Result<Reader> {
        let suffix = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        self.reader_for_suffix(suffix)
            .ok_or_else(|| Error::no_reader(suffix, path))
    }

    /// The suffix the active writer for `value` would produce.
    pub fn suffix_for(&self, value: &Value) -> Result<String> {
        Ok(self.writer_for(value)?.suffix().to_string())
    }

    /// Read a file through the reader registered for its suffix.
    pub fn read(&self, path: &Path) -> Result<Value> {
        self.reader_for_path(path)?.read(path)
    }

    /// Write a value through the writer registered for its shape.
    pub fn write(&self, value: &Value, path: &Path) -> Result<()> {
        self.writer_for(value)?.write(value, path)
    }

    /// Shapes with an active writer, sorted.
    pub fn writer_shapes(&self) -> Vec<Shape> {
        let mut shapes: Vec<Shape> = self.writers.read().keys().cloned().collect();
        shapes.sort();
        shapes
    }

    /// Suffixes with an active reader, sorted.
    pub fn reader_suffixes(&self) -> Vec<String> {
        let mut suffixes: Vec<String> = self.readers.read().keys().cloned().collect();
        suffixes.sort();
        suffixes
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("writers", &self.writer_shapes())
            .field("readers", &self.reader_suffixes())
            .finish()
    }
}

/// Strip one leading dot. Matching is otherwise exact and case-sensitive.
fn normalize_suffix(suffix: &str) -> &str {
    suffix.strip_prefix('.').unwrap_or(suffix)
}

fn mismatch(expected: &Shape, value: &Value) -> Error {
    Error::codec(
        expected.as_str(),
        format!("writer received a `{}` value", value.shape()),
    )
}

fn register_builtins(registry: &CodecRegistry) {
    registry.register_writer(Shape::BYTES, "bin", |value, path| match value {
        Value::Bytes(bytes) => Ok(fs::write(path, bytes)?),
        other => Err(mismatch(&Shape::BYTES, other)),
    });
    registry.register_reader("bin", |path| Ok(Value::Bytes(fs::read(path)?)));

    registry.register_writer(Shape::TEXT, "txt", |value, path| match value {
        Value::Text(text) => Ok(fs::write(path, text)?),
        other => Err(mismatch(&Shape::TEXT, other)),
    });
    registry.register_reader("txt", read_text);
    registry.register_reader("md", read_text);

    registry.register_writer(Shape::JSON, "json", |value, path| match value {
        Value::Json(json) => {
            let mut out = BufWriter::new(fs::File::create(path)?);
            serde_json::to_writer_pretty(&mut out, json)?;
            out.flush()?;
            Ok(())
        }
        other => Err(mismatch(&Shape::JSON, other)),
    });
    registry.register_reader("json", |path| {
        let file = BufReader::new(fs::File::open(path)?);
        Ok(Value::Json(serde_json::from_reader(file)?))
    });

    registry.register_writer(Shape::RECORDS, "jsonl", |value, path| match value {
        Value::Records(records) => {
            let mut out = BufWriter::new(fs::File::create(path)?);
            for record in records {
                serde_json::to_writer(&mut out, record)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            Ok(())
        }
        other => Err(mismatch(&Shape::RECORDS, other)),
    });
    registry.register_reader("jsonl", |path| {
        let file = BufReader::new(fs::File::open(path)?);
        let mut records = Vec::new();
        for line in file.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(Value::Records(records))
    });
}

fn read_text(path: &Path) -> Result<Value> {
    let bytes = fs::read(path)?;
    String::from_utf8(bytes)
        .map(Value::Text)
        .map_err(|e| Error::codec(Shape::TEXT.as_str(), format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_then_read(registry: &CodecRegistry, value: &Value, dir: &Path) -> Value {
        let suffix = registry.suffix_for(value).unwrap();
        let path = dir.join(format!("test.{}", suffix));
        registry.write(value, &path).unwrap();
        registry.read(&path).unwrap()
    }

    #[test]
    fn test_builtin_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let registry = CodecRegistry::with_builtins();

        let values = vec![
            Value::Bytes(vec![0, 1, 2, 255]),
            Value::Text("line one\nline two\n".to_string()),
            Value::Json(json!({"name": "survey", "bands": [1, 2, 3]})),
            Value::Records(vec![json!({"id": 1}), json!({"id": 2, "tag": "x"})]),
        ];

        for value in values {
            assert_eq!(write_then_read(&registry, &value, temp_dir.path()), value);
        }
    }

    #[test]
    fn test_suffix_for_builtins() {
        let registry = CodecRegistry::with_builtins();
        assert_eq!(registry.suffix_for(&Value::Bytes(vec![])).unwrap(), "bin");
        assert_eq!(registry.suffix_for(&Value::from("x")).unwrap(), "txt");
        assert_eq!(registry.suffix_for(&Value::Json(json!(null))).unwrap(), "json");
        assert_eq!(registry.suffix_for(&Value::Records(vec![])).unwrap(), "jsonl");
    }

    #[test]
    fn test_no_writer_for_unknown_shape() {
        let registry = CodecRegistry::with_builtins();
        let value = Value::custom(Shape::new("grid"), 3u8);
        let err = registry.writer_for(&value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoWriterFound);
    }

    #[test]
    fn test_path_shape_has_no_writer() {
        let registry = CodecRegistry::with_builtins();
        let err = registry
            .writer_for(&Value::Path("/tmp/a.txt".into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoWriterFound);
    }

    #[test]
    fn test_no_reader_for_unknown_suffix() {
        let registry = CodecRegistry::with_builtins();
        let err = registry.reader_for_path(Path::new("/data/a.xyz")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoReaderFound);

        let err = registry.reader_for_path(Path::new("/data/noext")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoReaderFound);

        let found = registry.reader_for_path(Path::new("/data/a.txt"));
        assert_eq!(format!("{:?}", found), "Ok(Reader { .. })");
    }

    #[test]
    fn test_suffix_matching_is_exact() {
        let registry = CodecRegistry::with_builtins();
        assert!(registry.reader_for_suffix(".txt").is_some());
        assert!(registry.reader_for_suffix("txt").is_some());
        assert!(registry.reader_for_suffix("TXT").is_none());
        assert!(registry.reader_for_path(Path::new("a.TXT")).is_err());
    }

    #[test]
    fn test_later_registration_shadows() {
        let temp_dir = TempDir::new().unwrap();
        let registry = CodecRegistry::with_builtins();

        registry.register_writer(Shape::TEXT, ".upper", |value, path| match value {
            Value::Text(text) => Ok(fs::write(path, text.to_uppercase())?),
            other => Err(mismatch(&Shape::TEXT, other)),
        });
        registry.register_reader("upper", |path| {
            Ok(Value::Text(fs::read_to_string(path)?.to_lowercase()))
        });

        let value = Value::from("mixed Case");
        assert_eq!(registry.suffix_for(&value).unwrap(), "upper");

        let path = temp_dir.path().join("a.upper");
        registry.write(&value, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "MIXED CASE");
        assert_eq!(registry.read(&path).unwrap(), Value::from("mixed case"));

        // Unrelated keys are untouched
        assert_eq!(registry.suffix_for(&Value::Bytes(vec![])).unwrap(), "bin");
        assert!(registry.reader_for_suffix("txt").is_some());
    }

    #[test]
    fn test_custom_shape_codec() {
        let temp_dir = TempDir::new().unwrap();
        let registry = CodecRegistry::with_builtins();
        let grid = Shape::new("grid");

        let grid_for_writer = grid.clone();
        registry.register_writer(grid.clone(), "grid", move |value, path| {
            let rows = match value {
                Value::Custom(custom) => custom.downcast_ref::<Vec<Vec<u32>>>(),
                _ => None,
            }
            .ok_or_else(|| mismatch(&grid_for_writer, value))?;
            let text: Vec<String> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(u32::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .collect();
            Ok(fs::write(path, text.join("\n"))?)
        });

        let value = Value::custom(grid, vec![vec![1u32, 2], vec![3, 4]]);
        let path = temp_dir.path().join("g.grid");
        registry.write(&value, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1,2\n3,4");
    }

    #[test]
    fn test_text_reader_rejects_invalid_utf8() {
        let temp_dir = TempDir::new().unwrap();
        let registry = CodecRegistry::with_builtins();
        let path = temp_dir.path().join("bad.txt");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = registry.read(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
    }

    #[test]
    fn test_mismatched_value_is_codec_error() {
        let temp_dir = TempDir::new().unwrap();
        let registry = CodecRegistry::with_builtins();
        let writer = registry.writer_for(&Value::Bytes(vec![])).unwrap();
        let err = writer
            .write(&Value::from("text"), &temp_dir.path().join("x.bin"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
    }
}
