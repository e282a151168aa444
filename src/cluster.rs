//! The cluster codec: offset-table framing, decompression, and blob extraction.
//!
//! A cluster starts with one info byte (compression tag in the low 4 bits, an "extended"
//! flag in bit 4 selecting 32- vs 64-bit offsets), followed by a body that is, after
//! decompression, an offset table of `blobCount + 1` monotonically increasing offsets
//! followed by the concatenated blob bytes (§3).
//!
//! Three representations share one observable contract (`blob_count`, `get_blob`,
//! `iter_blobs`): [`ClusterRepresentation::OffsetOnly`] decompresses once and slices lazily,
//! `InMemory` decompresses once and splits eagerly into owned blobs, and `Streaming`
//! decompresses incrementally through a live reader, restarting from the beginning only when
//! a request falls behind what's already been decoded (§4.F, §9).

use std::io::{Cursor, Read};

use crate::codec::{self, Source};
use crate::compression::{CompressionRegistry, CompressionTag};
use crate::error::{Error, Result};

/// Which in-memory shape a cluster should take when it's read. The policy picks one;
/// callers interact only through [`Cluster`]'s methods regardless of the choice (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRepresentation {
    OffsetOnly,
    InMemory,
    Streaming,
}

impl Default for ClusterRepresentation {
    fn default() -> Self {
        ClusterRepresentation::OffsetOnly
    }
}

enum Body {
    OffsetOnly { decompressed: Vec<u8> },
    InMemory { blobs: Vec<Vec<u8>> },
    Streaming(StreamingBody),
}

/// The compressed body plus whatever live decoder is already positioned against it.
/// `decoded_through` tracks how many decompressed bytes `reader` has already produced; a
/// request that starts before that point can't be satisfied by seeking backwards (xz/zstd
/// readers are forward-only), so it restarts decoding from byte zero instead.
struct StreamingBody {
    tag: CompressionTag,
    compressed: Vec<u8>,
    reader: Option<Box<dyn Read>>,
    decoded_through: u64,
}

/// A single cluster: an offset table plus the blob bytes it addresses.
pub struct Cluster {
    extended: bool,
    compression: CompressionTag,
    offsets: Vec<u64>,
    body: Body,
}

impl Cluster {
    /// Reads the cluster occupying `[offset, end)` of `source`.
    pub fn read<S: Source + ?Sized>(
        source: &mut S,
        registry: &CompressionRegistry,
        offset: u64,
        end: u64,
        representation: ClusterRepresentation,
    ) -> Result<Cluster> {
        if end <= offset {
            return Err(Error::FormatError(format!(
                "cluster at {} has non-positive length (end {})",
                offset, end
            )));
        }
        let info = codec::read_u8(source, offset)?;
        let extended = info & 0x10 != 0;
        let compression = CompressionTag::from_nibble(info & 0x0F)?;
        let body_bytes = codec::read_bytes(source, offset + 1, (end - offset - 1) as usize)?;
        let offset_width: u64 = if extended { 8 } else { 4 };

        if representation == ClusterRepresentation::Streaming {
            let mut reader = registry.decode_stream(compression, &body_bytes)?;
            let offsets = read_offset_table(&mut *reader, offset_width)?;
            let offset_table_len = offsets.len() as u64 * offset_width;
            return Ok(Cluster {
                extended,
                compression,
                offsets,
                body: Body::Streaming(StreamingBody {
                    tag: compression,
                    compressed: body_bytes,
                    reader: Some(reader),
                    decoded_through: offset_table_len,
                }),
            });
        }

        let decompressed = registry.decode(compression, &body_bytes)?;
        let offsets = parse_offsets(&decompressed, offset_width)?;
        let body = match representation {
            ClusterRepresentation::OffsetOnly => Body::OffsetOnly { decompressed },
            ClusterRepresentation::InMemory => {
                let mut blobs = Vec::with_capacity(offsets.len().saturating_sub(1));
                for w in offsets.windows(2) {
                    blobs.push(decompressed[w[0] as usize..w[1] as usize].to_vec());
                }
                Body::InMemory { blobs }
            }
            ClusterRepresentation::Streaming => unreachable!("handled by early return above"),
        };

        Ok(Cluster {
            extended,
            compression,
            offsets,
            body,
        })
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn compression(&self) -> CompressionTag {
        self.compression
    }

    pub fn offset_table(&self) -> &[u64] {
        &self.offsets
    }

    pub fn blob_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    fn blob_range(&self, index: usize) -> Result<(u64, u64)> {
        if index + 1 >= self.offsets.len() {
            return Err(Error::NotFound(format!(
                "blob {} (cluster has {} blobs)",
                index,
                self.blob_count()
            )));
        }
        Ok((self.offsets[index], self.offsets[index + 1]))
    }

    /// Returns the bytes of blob `index`.
    pub fn get_blob(&mut self, index: usize) -> Result<Vec<u8>> {
        let (start, end) = self.blob_range(index)?;
        match &mut self.body {
            Body::OffsetOnly { decompressed } => Ok(decompressed[start as usize..end as usize].to_vec()),
            Body::InMemory { blobs } => Ok(blobs[index].clone()),
            Body::Streaming(streaming) => streaming.read_range(start, end),
        }
    }

    /// Iterates over every blob in order. For the streaming representation this is the fast
    /// path: each call continues the live decode instead of restarting.
    pub fn iter_blobs(&mut self) -> ClusterBlobIter<'_> {
        ClusterBlobIter { cluster: self, next: 0 }
    }
}

impl StreamingBody {
    fn fresh_reader(&self) -> Result<Box<dyn Read>> {
        let body = self.compressed.clone();
        Ok(match self.tag {
            CompressionTag::Uncompressed => Box::new(Cursor::new(body)),
            CompressionTag::Xz => Box::new(xz2::read::XzDecoder::new(Cursor::new(body))),
            CompressionTag::Zstd => Box::new(zstd::Decoder::new(Cursor::new(body))?),
        })
    }

    fn read_range(&mut self, start: u64, end: u64) -> Result<Vec<u8>> {
        if start < self.decoded_through || self.reader.is_none() {
            self.reader = Some(self.fresh_reader()?);
            self.decoded_through = 0;
        }
        let reader = self.reader.as_mut().expect("just (re)initialized above");
        skip_exact(reader, start - self.decoded_through)?;
        let mut buf = vec![0u8; (end - start) as usize];
        reader.read_exact(&mut buf)?;
        self.decoded_through = end;
        Ok(buf)
    }
}

fn skip_exact(reader: &mut dyn Read, mut n: u64) -> Result<()> {
    let mut sink = [0u8; 4096];
    while n > 0 {
        let chunk = n.min(sink.len() as u64) as usize;
        reader.read_exact(&mut sink[..chunk])?;
        n -= chunk as u64;
    }
    Ok(())
}

/// Reads the offset table (but not the blob bytes) from a decompressed byte stream. The
/// streaming representation needs `blobCount` before it can do anything else, and this is the
/// only part of the cluster it must decode eagerly.
fn read_offset_table(reader: &mut dyn Read, offset_width: u64) -> Result<Vec<u64>> {
    let first = read_one_offset(reader, offset_width)?;
    if first % offset_width != 0 {
        return Err(Error::FormatError(format!(
            "first cluster offset {} is not a multiple of the offset width {}",
            first, offset_width
        )));
    }
    let count = first / offset_width;
    if count == 0 {
        return Err(Error::FormatError(
            "cluster offset table claims zero entries".into(),
        ));
    }
    let mut offsets = Vec::with_capacity(count as usize);
    offsets.push(first);
    for _ in 1..count {
        offsets.push(read_one_offset(reader, offset_width)?);
    }
    validate_monotonic(&offsets)?;
    Ok(offsets)
}

fn read_one_offset(reader: &mut dyn Read, offset_width: u64) -> Result<u64> {
    if offset_width == 8 {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        codec::le_u64(&buf)
    } else {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(codec::le_u32(&buf)? as u64)
    }
}

/// Parses the offset table out of an already-fully-decompressed body buffer, then checks that
/// the table's claimed body length matches what actually decompressed.
fn parse_offsets(decompressed: &[u8], offset_width: u64) -> Result<Vec<u64>> {
    let mut cursor = Cursor::new(decompressed);
    let offsets = read_offset_table(&mut cursor, offset_width)?;
    let last = *offsets.last().expect("read_offset_table always returns at least one entry");
    if last as usize != decompressed.len() {
        return Err(Error::FormatError(format!(
            "cluster offset table claims body length {} but decompressed body is {} bytes",
            last,
            decompressed.len()
        )));
    }
    Ok(offsets)
}

fn validate_monotonic(offsets: &[u64]) -> Result<()> {
    for w in offsets.windows(2) {
        if w[1] < w[0] {
            return Err(Error::FormatError(format!(
                "cluster offset table is not monotonic: {} followed by {}",
                w[0], w[1]
            )));
        }
    }
    Ok(())
}

/// Lazy iterator over every blob in a cluster, in order.
pub struct ClusterBlobIter<'a> {
    cluster: &'a mut Cluster,
    next: usize,
}

impl<'a> Iterator for ClusterBlobIter<'a> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.cluster.blob_count() {
            return None;
        }
        let result = self.cluster.get_blob(self.next);
        self.next += 1;
        Some(result)
    }
}
