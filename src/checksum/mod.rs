//! Streaming checksum computation over three algorithms.
//!
//! Chunked reads at a fixed buffer size feed an incremental hasher;
//! memory-mapping is deliberately not used here — the reconciler streams
//! file contents through the worker pool rather than mapping whole files,
//! so there's no large-file path that would benefit from it.

use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::FixityError;

/// 1 MiB read chunks.
const READ_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Blake3 => "blake3",
        }
    }

    /// Parses a config/catalog value into an algorithm. Unknown names are a
    /// `BadConfig` error raised before any stream is opened, never a panic
    /// or a silent fallback.
    pub fn parse(s: &str) -> Result<Self, FixityError> {
        match s {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            other => Err(FixityError::BadConfig(format!(
                "unknown checksum algorithm {other:?} (expected one of: md5, sha256, blake3)"
            ))),
        }
    }
}

enum Incremental {
    Md5(md5::Context),
    Sha256(Box<sha2::Sha256>),
    Blake3(Box<blake3::Hasher>),
}

impl Incremental {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Incremental::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => Incremental::Sha256(Box::new(sha2::Sha256::new())),
            ChecksumAlgorithm::Blake3 => Incremental::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Incremental::Md5(ctx) => ctx.consume(chunk),
            Incremental::Sha256(hasher) => {
                hasher.update(chunk);
            }
            Incremental::Blake3(hasher) => {
                hasher.update(chunk);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Incremental::Md5(ctx) => format!("{:x}", ctx.compute()),
            Incremental::Sha256(hasher) => hex_encode(&hasher.finalize()),
            Incremental::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Streams `reader` through `algorithm` in fixed-size chunks and returns the
/// lowercase hex digest. Does not close `reader`; ownership of the
/// underlying stream stays with the caller.
pub fn compute(algorithm: ChecksumAlgorithm, reader: &mut impl Read) -> std::io::Result<String> {
    let mut hasher = Incremental::new(algorithm);
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn same_input_same_algorithm_is_deterministic() {
        let a = compute(ChecksumAlgorithm::Blake3, &mut Cursor::new(b"hello world")).unwrap();
        let b = compute(ChecksumAlgorithm::Blake3, &mut Cursor::new(b"hello world")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_input_different_digest() {
        for algorithm in [
            ChecksumAlgorithm::Md5,
            ChecksumAlgorithm::Sha256,
            ChecksumAlgorithm::Blake3,
        ] {
            let a = compute(algorithm, &mut Cursor::new(b"hello world")).unwrap();
            let b = compute(algorithm, &mut Cursor::new(b"hello world!")).unwrap();
            assert_ne!(a, b);
        }
    }

    #[test]
    fn digest_lengths_match_algorithm() {
        let md5 = compute(ChecksumAlgorithm::Md5, &mut Cursor::new(b"hello world")).unwrap();
        assert_eq!(md5.len(), 32);
        let sha256 = compute(ChecksumAlgorithm::Sha256, &mut Cursor::new(b"hello world")).unwrap();
        assert_eq!(sha256.len(), 64);
        let blake3 = compute(ChecksumAlgorithm::Blake3, &mut Cursor::new(b"hello world")).unwrap();
        assert_eq!(blake3.len(), 64);
    }

    #[test]
    fn chunk_boundary_does_not_change_the_digest() {
        let small = vec![7u8; READ_CHUNK_SIZE - 1];
        let exact = vec![7u8; READ_CHUNK_SIZE];
        let over = vec![7u8; READ_CHUNK_SIZE + 1];
        let a = compute(ChecksumAlgorithm::Sha256, &mut Cursor::new(&small)).unwrap();
        let b = compute(ChecksumAlgorithm::Sha256, &mut Cursor::new(&exact)).unwrap();
        let c = compute(ChecksumAlgorithm::Sha256, &mut Cursor::new(&over)).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn empty_input_is_still_a_full_length_digest() {
        let digest = compute(ChecksumAlgorithm::Blake3, &mut Cursor::new(b"")).unwrap();
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn unknown_algorithm_name_is_bad_config() {
        let err = ChecksumAlgorithm::parse("crc32").unwrap_err();
        assert!(matches!(err, FixityError::BadConfig(_)));
    }
}
