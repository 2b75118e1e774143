// src/recording/compressor.rs
//! zstd compression for table chunks
//!
//! Each `write_rows` call lands as one chunk in the container. Chunks of
//! tables created with a compression level other than `None` are zstd-encoded.

use crate::utils::errors::{RecorderError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Compression levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Store chunks as-is
    #[default]
    None,

    /// Fast compression (level 1)
    Fast,

    /// Balanced (level 3)
    Balanced,

    /// Best compression (level 19)
    Best,
}

impl CompressionLevel {
    pub fn as_i32(&self) -> i32 {
        match self {
            CompressionLevel::None => 0,
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 3,
            CompressionLevel::Best => 19,
        }
    }

    /// Inverse of [`CompressionLevel::as_i32`], used when reading the catalog
    pub fn from_i32(level: i32) -> Result<Self> {
        match level {
            0 => Ok(CompressionLevel::None),
            1 => Ok(CompressionLevel::Fast),
            3 => Ok(CompressionLevel::Balanced),
            19 => Ok(CompressionLevel::Best),
            other => Err(RecorderError::Compression(format!(
                "Unknown compression level {}",
                other
            ))),
        }
    }

    /// Codec tag written next to each chunk
    pub fn codec(&self) -> Codec {
        match self {
            CompressionLevel::None => Codec::Raw,
            _ => Codec::Zstd,
        }
    }
}

/// On-disk chunk encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Raw,
    Zstd,
}

impl Codec {
    pub fn tag(&self) -> i64 {
        match self {
            Codec::Raw => 0,
            Codec::Zstd => 1,
        }
    }

    pub fn from_tag(tag: i64) -> Result<Self> {
        match tag {
            0 => Ok(Codec::Raw),
            1 => Ok(Codec::Zstd),
            other => Err(RecorderError::Compression(format!(
                "Unknown chunk codec {}",
                other
            ))),
        }
    }
}

/// Chunk compressor
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    pub fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Encode a chunk; returns the codec used alongside the payload
    pub fn compress(&self, data: &[u8]) -> Result<(Codec, Vec<u8>)> {
        let codec = self.level.codec();
        if codec == Codec::Raw {
            return Ok((codec, data.to_vec()));
        }

        let level = self.level.as_i32();
        let compressed = zstd::encode_all(data, level).map_err(|e| {
            RecorderError::Compression(format!("Compression error: {}", e))
        })?;

        debug!(
            "Compressed chunk {} bytes -> {} bytes at level {}",
            data.len(),
            compressed.len(),
            level
        );

        Ok((codec, compressed))
    }

    /// Decode a chunk written with `codec`
    pub fn decompress(codec: Codec, data: &[u8]) -> Result<Vec<u8>> {
        match codec {
            Codec::Raw => Ok(data.to_vec()),
            Codec::Zstd => zstd::decode_all(data).map_err(|e| {
                RecorderError::Compression(format!("Decompression error: {}", e))
            }),
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionLevel::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_levels() {
        assert_eq!(CompressionLevel::Fast.as_i32(), 1);
        assert_eq!(CompressionLevel::Balanced.as_i32(), 3);
        assert_eq!(CompressionLevel::Best.as_i32(), 19);
        assert_eq!(
            CompressionLevel::from_i32(19).unwrap(),
            CompressionLevel::Best
        );
        assert!(CompressionLevel::from_i32(7).is_err());
    }

    #[test]
    fn test_raw_passthrough() {
        let compressor = Compressor::default();
        let (codec, out) = compressor.compress(b"abc").unwrap();
        assert_eq!(codec, Codec::Raw);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_zeroed_frames_shrink() {
        let compressor = Compressor::new(CompressionLevel::Balanced);

        // A 23x29 f64 frame of zeros, typical of an idle sensor
        let frame = vec![0u8; 23 * 29 * 8];

        let (codec, compressed) = compressor.compress(&frame).unwrap();
        assert_eq!(codec, Codec::Zstd);
        assert!(compressed.len() < frame.len() / 10);

        let restored = Compressor::decompress(codec, &compressed).unwrap();
        assert_eq!(restored, frame);
    }

    #[test]
    fn test_unknown_codec_tag() {
        assert!(Codec::from_tag(9).is_err());
        assert_eq!(Codec::from_tag(1).unwrap(), Codec::Zstd);
    }
}
