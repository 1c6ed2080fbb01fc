//! Block decoders for compressed segment files.

use serde::Deserialize;
use std::io;
use std::sync::Arc;

/// Decodes one compressed block into a buffer sized for its decoded length.
pub trait BlockDecoder: Send + Sync {
    /// Decode `src` into `dst`, returning the decoded length.
    fn decode(&self, src: &[u8], dst: &mut [u8]) -> io::Result<usize>;

    fn name(&self) -> &'static str;
}

/// Blocks stored without compression.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredDecoder;

impl BlockDecoder for StoredDecoder {
    fn decode(&self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        if src.len() > dst.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stored block of {} bytes exceeds {}", src.len(), dst.len()),
            ));
        }
        dst[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }

    fn name(&self) -> &'static str {
        "stored"
    }
}

/// Zstandard frames, one per block.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZstdDecoder;

impl BlockDecoder for ZstdDecoder {
    fn decode(&self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        zstd::bulk::decompress_to_buffer(src, dst)
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

/// Compression codec named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Stored,
    Zstd,
}

impl Codec {
    pub fn decoder(self) -> Arc<dyn BlockDecoder> {
        match self {
            Self::Stored => Arc::new(StoredDecoder),
            Self::Zstd => Arc::new(ZstdDecoder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored() {
        let mut dst = [0u8; 4];
        assert_eq!(StoredDecoder.decode(b"abc", &mut dst).unwrap(), 3);
        assert_eq!(&dst[..3], b"abc");
        assert!(StoredDecoder.decode(b"abcde", &mut dst).is_err());
    }

    #[test]
    fn test_zstd() {
        let plain: Vec<u8> = (0..1000u32).map(|i| (i % 7) as u8).collect();
        let frame = zstd::bulk::compress(&plain, 3).unwrap();
        let mut dst = vec![0u8; plain.len()];
        assert_eq!(ZstdDecoder.decode(&frame, &mut dst).unwrap(), plain.len());
        assert_eq!(dst, plain);
        assert!(ZstdDecoder.decode(b"not zstd", &mut dst).is_err());
    }

    #[test]
    fn test_codec_lookup() {
        assert_eq!(Codec::Zstd.decoder().name(), "zstd");
        assert_eq!(Codec::default().decoder().name(), "stored");
    }
}
