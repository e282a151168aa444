//! Compression registry: maps the 4-bit compression tag in a cluster's info byte to a codec
//! that can decode (and, for clusters written by this crate, encode) the cluster body.
//!
//! The registry is a runtime map, not a compile-time feature matrix (§9 "absence is a
//! runtime condition, not a build-time error") - a caller can build one missing a codec (as
//! tests do to exercise `UnsupportedCompression`) without needing a different Cargo build.

use std::collections::HashMap;
use std::io::Read;

use crate::error::{Error, Result};

/// The compression tag stored in the low 4 bits of a cluster's info byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionTag {
    Uncompressed,
    Xz,
    Zstd,
}

impl CompressionTag {
    /// Parses the low nibble of a cluster info byte.
    pub fn from_nibble(nibble: u8) -> Result<CompressionTag> {
        match nibble {
            0 | 1 => Ok(CompressionTag::Uncompressed),
            4 => Ok(CompressionTag::Xz),
            5 | 6 => Ok(CompressionTag::Zstd),
            other => Err(Error::FormatError(format!(
                "unknown cluster compression tag {}",
                other
            ))),
        }
    }

    pub fn to_nibble(self) -> u8 {
        match self {
            CompressionTag::Uncompressed => 1,
            CompressionTag::Xz => 4,
            CompressionTag::Zstd => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionTag::Uncompressed => "none",
            CompressionTag::Xz => "xz",
            CompressionTag::Zstd => "zstd",
        }
    }
}

type DecodeFn = fn(&[u8]) -> Result<Vec<u8>>;
type EncodeFn = fn(&[u8]) -> Result<Vec<u8>>;
type StreamFn = fn(&[u8]) -> Result<Box<dyn Read + '_>>;

struct Codec {
    decode: DecodeFn,
    encode: EncodeFn,
    stream: StreamFn,
}

/// A runtime mapping from compression tag to codec. Built-ins are identity (tags 0/1) and xz
/// (tag 4); zstd (tags 5/6) registers the same way any extension codec would.
pub struct CompressionRegistry {
    codecs: HashMap<CompressionTag, Codec>,
}

impl CompressionRegistry {
    /// An empty registry: every lookup fails with `UnsupportedCompression`. Mostly useful as
    /// a builder base.
    pub fn empty() -> CompressionRegistry {
        CompressionRegistry {
            codecs: HashMap::new(),
        }
    }

    /// The registry every archive opens with unless told otherwise: identity, xz, and zstd
    /// all registered.
    pub fn with_defaults() -> CompressionRegistry {
        let mut registry = CompressionRegistry::empty();
        registry.register(
            CompressionTag::Uncompressed,
            identity_decode,
            identity_encode,
            identity_stream,
        );
        registry.register(CompressionTag::Xz, xz_decode, xz_encode, xz_stream);
        registry.register(CompressionTag::Zstd, zstd_decode, zstd_encode, zstd_stream);
        registry
    }

    /// The default registry with one codec removed, for exercising `UnsupportedCompression`
    /// (§8 scenario S3) without needing a different Cargo feature set.
    pub fn without(tag: CompressionTag) -> CompressionRegistry {
        let mut registry = CompressionRegistry::with_defaults();
        registry.codecs.remove(&tag);
        registry
    }

    pub fn register(&mut self, tag: CompressionTag, decode: DecodeFn, encode: EncodeFn, stream: StreamFn) {
        self.codecs.insert(tag, Codec { decode, encode, stream });
    }

    pub fn decode(&self, tag: CompressionTag, body: &[u8]) -> Result<Vec<u8>> {
        match self.codecs.get(&tag) {
            Some(codec) => (codec.decode)(body),
            None => Err(Error::UnsupportedCompression(tag.name().to_string())),
        }
    }

    pub fn encode(&self, tag: CompressionTag, body: &[u8]) -> Result<Vec<u8>> {
        match self.codecs.get(&tag) {
            Some(codec) => (codec.encode)(body),
            None => Err(Error::UnsupportedCompression(tag.name().to_string())),
        }
    }

    /// Returns a lazily-decoding reader over `body`, for the cluster subsystem's streaming
    /// representation (§4.F) - nothing is decompressed until the reader is pulled from.
    pub fn decode_stream<'a>(&self, tag: CompressionTag, body: &'a [u8]) -> Result<Box<dyn Read + 'a>> {
        match self.codecs.get(&tag) {
            Some(codec) => (codec.stream)(body),
            None => Err(Error::UnsupportedCompression(tag.name().to_string())),
        }
    }

    pub fn supports(&self, tag: CompressionTag) -> bool {
        self.codecs.contains_key(&tag)
    }
}

impl Default for CompressionRegistry {
    fn default() -> Self {
        CompressionRegistry::with_defaults()
    }
}

fn identity_decode(body: &[u8]) -> Result<Vec<u8>> {
    Ok(body.to_vec())
}

fn identity_encode(body: &[u8]) -> Result<Vec<u8>> {
    Ok(body.to_vec())
}

fn xz_decode(body: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = xz2::read::XzDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn xz_encode(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = xz2::read::XzEncoder::new(body, 6);
    let mut out = Vec::new();
    encoder.read_to_end(&mut out)?;
    Ok(out)
}

fn zstd_decode(body: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::decode_all(body).map_err(Error::from)
}

fn zstd_encode(body: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::encode_all(body, 0).map_err(Error::from)
}

fn identity_stream(body: &[u8]) -> Result<Box<dyn Read + '_>> {
    Ok(Box::new(body))
}

fn xz_stream(body: &[u8]) -> Result<Box<dyn Read + '_>> {
    Ok(Box::new(xz2::read::XzDecoder::new(body)))
}

fn zstd_stream(body: &[u8]) -> Result<Box<dyn Read + '_>> {
    Ok(Box::new(zstd::Decoder::new(body)?))
}
