//! Binary codec primitives: fixed-width little-endian integers, NUL-terminated strings, and
//! the offset-addressed byte source every other module reads through.
//!
//! Every read in this crate is addressed by an explicit offset - nothing here tracks an
//! ambient cursor position across calls, so two probes (say, a binary search's midpoint and
//! its prefix read) never interfere with each other even though they share one `Source`.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// A random-access byte container. Reads are addressed by an absolute offset; the
/// implementation is free to seek internally, but callers never need to track a cursor.
pub trait Source {
    fn len(&mut self) -> io::Result<u64>;
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A [`Source`] that also supports positioned writes and truncation, for the writer engine.
pub trait WritableSource: Source {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl<T: Read + Seek> Source for T {
    fn len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(end)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }
}

impl WritableSource for std::fs::File {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        std::fs::File::set_len(self, len)
    }
}

impl WritableSource for Cursor<Vec<u8>> {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let end = offset + buf.len() as u64;
        if end > self.get_ref().len() as u64 {
            self.get_mut().resize(end as usize, 0);
        }
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().resize(len as usize, 0);
        if self.position() > len {
            self.set_position(len);
        }
        Ok(())
    }
}

/// Adapts a [`Source`] so an archive embedded at a nonzero offset inside a larger file can be
/// opened as if it started at byte zero. Every position the rest of the crate ever passes
/// through `Source`/`WritableSource` is archive-relative; this wrapper adds the constant
/// `base_offset` before touching the underlying container, and reports `len()` as the
/// underlying length minus `base_offset` so size checks still see an archive-sized file.
pub struct OffsetSource<S> {
    inner: S,
    base_offset: u64,
}

impl<S> OffsetSource<S> {
    pub fn new(inner: S, base_offset: u64) -> Self {
        OffsetSource { inner, base_offset }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Source> Source for OffsetSource<S> {
    fn len(&mut self) -> io::Result<u64> {
        Ok(self.inner.len()?.saturating_sub(self.base_offset))
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_at(self.base_offset + offset, buf)
    }
}

impl<S: WritableSource> WritableSource for OffsetSource<S> {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.inner.write_at(self.base_offset + offset, buf)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.inner.set_len(self.base_offset + len)
    }
}

/// Reads a fixed-size buffer at `offset`.
pub fn read_bytes<S: Source + ?Sized>(source: &mut S, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    source.read_at(offset, &mut buf)?;
    Ok(buf)
}

pub fn read_u8<S: Source + ?Sized>(source: &mut S, offset: u64) -> Result<u8> {
    let mut buf = [0u8; 1];
    source.read_at(offset, &mut buf)?;
    Ok(buf[0])
}

pub fn read_u16<S: Source + ?Sized>(source: &mut S, offset: u64) -> Result<u16> {
    let mut buf = [0u8; 2];
    source.read_at(offset, &mut buf)?;
    Ok(Cursor::new(buf).read_u16::<LittleEndian>()?)
}

pub fn read_u32<S: Source + ?Sized>(source: &mut S, offset: u64) -> Result<u32> {
    let mut buf = [0u8; 4];
    source.read_at(offset, &mut buf)?;
    Ok(Cursor::new(buf).read_u32::<LittleEndian>()?)
}

pub fn read_u64<S: Source + ?Sized>(source: &mut S, offset: u64) -> Result<u64> {
    let mut buf = [0u8; 8];
    source.read_at(offset, &mut buf)?;
    Ok(Cursor::new(buf).read_u64::<LittleEndian>()?)
}

/// Reads a NUL-terminated, UTF-8 string starting at `offset`. `max_len` bounds the scan so a
/// truncated or corrupt archive can't make this read unboundedly far.
pub fn read_cstring<S: Source + ?Sized>(source: &mut S, offset: u64, max_len: u64) -> Result<String> {
    let mut bytes = Vec::new();
    let mut pos = offset;
    loop {
        if pos - offset > max_len {
            return Err(Error::FormatError(format!(
                "unterminated string starting at offset {}",
                offset
            )));
        }
        let b = read_u8(source, pos)?;
        if b == 0 {
            break;
        }
        bytes.push(b);
        pos += 1;
    }
    String::from_utf8(bytes).map_err(|e| Error::FormatError(format!("invalid UTF-8 string: {}", e)))
}

/// Parses a little-endian `u16` out of an in-memory slice, for the hot path of binary search
/// probes that have already pulled a small prefix into memory.
pub fn le_u16(buf: &[u8]) -> Result<u16> {
    Ok(Cursor::new(buf).read_u16::<LittleEndian>()?)
}

pub fn le_u32(buf: &[u8]) -> Result<u32> {
    Ok(Cursor::new(buf).read_u32::<LittleEndian>()?)
}

pub fn le_u64(buf: &[u8]) -> Result<u64> {
    Ok(Cursor::new(buf).read_u64::<LittleEndian>()?)
}

/// Appends a fixed-width little-endian integer to `buf`. Infallible because `Vec<u8>` writes
/// never fail; kept as a function (not a trait) so call sites read like the `read_*` family.
pub fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.write_u16::<LittleEndian>(v).expect("Vec<u8> write is infallible");
}

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.write_u32::<LittleEndian>(v).expect("Vec<u8> write is infallible");
}

pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.write_u64::<LittleEndian>(v).expect("Vec<u8> write is infallible");
}

pub fn write_cstring(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}
