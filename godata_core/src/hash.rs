//! Content hashing for internal objects.

use crate::error::{Error, Result};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Digest size in bytes (BLAKE3 produces 256-bit hashes).
pub const HASH_SIZE: usize = 32;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// BLAKE3 with 256-bit output.
    Blake3,
}

impl Algorithm {
    /// Name used in the backend `config` file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake3 => "blake3-256",
        }
    }

    /// Parse algorithm from its config name.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blake3-256" => Ok(Algorithm::Blake3),
            _ => Err(Error::corrupted(
                "config",
                format!("unsupported algorithm `{}`", s),
            )),
        }
    }
}

/// Content ID of an object stored inside a project's storage scope.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Create a Hash from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    /// Parse a Hash from 64 hex characters.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != HASH_SIZE * 2 {
            return Err(Error::corrupted(
                hex_str,
                format!(
                    "expected {} hex characters, got {}",
                    HASH_SIZE * 2,
                    hex_str.len()
                ),
            ));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::corrupted(hex_str, format!("invalid hex: {}", e)))?;

        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&bytes);
        Ok(Hash(hash))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First two hex characters, used as the object shard directory.
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Remaining 62 hex characters, used as the object file stem.
    pub fn rest(&self) -> String {
        hex::encode(&self.0[1..])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Hash raw bytes.
    #[cfg(test)]
    pub fn hash_bytes(data: &[u8]) -> Self {
        Hash(*blake3::hash(data).as_bytes())
    }

    /// Hash everything a reader yields.
    pub fn hash_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        std::io::copy(&mut reader, &mut hasher)?;
        Ok(Hash(*hasher.finalize().as_bytes()))
    }

    /// Hash a file's contents.
    pub fn hash_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::hash_reader(file)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_hello_world() {
        // BLAKE3 of "hello world"
        assert_eq!(
            Hash::hash_bytes(b"hello world").to_hex(),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_hash_file_matches_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        std::fs::write(&path, b"some payload").unwrap();

        assert_eq!(
            Hash::hash_file(&path).unwrap(),
            Hash::hash_bytes(b"some payload")
        );
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(Algorithm::parse("blake3-256").unwrap(), Algorithm::Blake3);
        assert!(Algorithm::parse("sha1").is_err());
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        #[test]
        fn prop_shard_and_rest_rebuild_hex(bytes in prop::array::uniform32(any::<u8>())) {
            let hash = Hash::from_bytes(bytes);
            prop_assert_eq!(format!("{}{}", hash.shard(), hash.rest()), hash.to_hex());
            prop_assert_eq!(Hash::from_hex(&hash.to_hex())?, hash);
        }
    }
}
