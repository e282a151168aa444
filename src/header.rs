//! The 80-byte archive header.

use crate::codec::{self, Source};
use crate::error::{Error, Result};
use crate::uuid::Uuid;

/// Magic number identifying a ZIM file, `0x044D495A`.
pub const MAGIC: u32 = 0x044D_495A;

/// Sentinel value meaning "no main page" / "no layout page".
pub const NO_PAGE: u32 = 0xFFFF_FFFF;

pub const HEADER_LEN: u64 = 80;

/// The top-of-file metadata block. All integers are little-endian on disk.
#[derive(Debug, Clone)]
pub struct Header {
    pub major_version: u16,
    pub minor_version: u16,
    pub uuid: Uuid,
    pub entry_count: u32,
    pub cluster_count: u32,
    pub url_ptr_pos: u64,
    pub title_ptr_pos: u64,
    pub cluster_ptr_pos: u64,
    pub mime_list_pos: u64,
    pub main_page: Option<u32>,
    pub layout_page: Option<u32>,
    pub checksum_pos: u64,
}

/// The major versions this crate knows how to read.
const SUPPORTED_MAJOR_VERSIONS: &[u16] = &[5, 6];

impl Header {
    /// Reads and validates the header at the start of `source`.
    pub fn read<S: Source + ?Sized>(source: &mut S) -> Result<Header> {
        let magic = codec::read_u32(source, 0)?;
        if magic != MAGIC {
            return Err(Error::UnsupportedFormat(format!(
                "bad magic number: expected {:#010x}, found {:#010x}",
                MAGIC, magic
            )));
        }

        let major_version = codec::read_u16(source, 4)?;
        if !SUPPORTED_MAJOR_VERSIONS.contains(&major_version) {
            return Err(Error::UnsupportedFormat(format!(
                "unsupported major version {}",
                major_version
            )));
        }
        let minor_version = codec::read_u16(source, 6)?;

        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&codec::read_bytes(source, 8, 16)?);
        let uuid = Uuid::new(uuid_bytes);

        let entry_count = codec::read_u32(source, 24)?;
        let cluster_count = codec::read_u32(source, 28)?;
        let url_ptr_pos = codec::read_u64(source, 32)?;
        let title_ptr_pos = codec::read_u64(source, 40)?;
        let cluster_ptr_pos = codec::read_u64(source, 48)?;
        let mime_list_pos = codec::read_u64(source, 56)?;
        let main_page = sentinel(codec::read_u32(source, 64)?);
        let layout_page = sentinel(codec::read_u32(source, 68)?);
        let checksum_pos = codec::read_u64(source, 72)?;

        let file_len = source.len()?;
        for (name, pos) in [
            ("urlPtrPos", url_ptr_pos),
            ("titlePtrPos", title_ptr_pos),
            ("clusterPtrPos", cluster_ptr_pos),
            ("mimeListPos", mime_list_pos),
        ] {
            if pos < HEADER_LEN || pos > file_len {
                return Err(Error::FormatError(format!(
                    "{} points outside the file: {} (file length {})",
                    name, pos, file_len
                )));
            }
        }

        Ok(Header {
            major_version,
            minor_version,
            uuid,
            entry_count,
            cluster_count,
            url_ptr_pos,
            title_ptr_pos,
            cluster_ptr_pos,
            mime_list_pos,
            main_page,
            layout_page,
            checksum_pos,
        })
    }

    /// Serializes the header back to its fixed 80-byte on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN as usize);
        codec::write_u32(&mut buf, MAGIC);
        codec::write_u16(&mut buf, self.major_version);
        codec::write_u16(&mut buf, self.minor_version);
        buf.extend_from_slice(self.uuid.as_bytes());
        codec::write_u32(&mut buf, self.entry_count);
        codec::write_u32(&mut buf, self.cluster_count);
        codec::write_u64(&mut buf, self.url_ptr_pos);
        codec::write_u64(&mut buf, self.title_ptr_pos);
        codec::write_u64(&mut buf, self.cluster_ptr_pos);
        codec::write_u64(&mut buf, self.mime_list_pos);
        codec::write_u32(&mut buf, self.main_page.unwrap_or(NO_PAGE));
        codec::write_u32(&mut buf, self.layout_page.unwrap_or(NO_PAGE));
        codec::write_u64(&mut buf, self.checksum_pos);
        debug_assert_eq!(buf.len() as u64, HEADER_LEN);
        buf
    }
}

fn sentinel(v: u32) -> Option<u32> {
    if v == NO_PAGE {
        None
    } else {
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header_bytes() -> Vec<u8> {
        let header = Header {
            major_version: 5,
            minor_version: 0,
            uuid: Uuid::new([1u8; 16]),
            entry_count: 3,
            cluster_count: 1,
            url_ptr_pos: 80,
            title_ptr_pos: 104,
            cluster_ptr_pos: 116,
            mime_list_pos: 124,
            main_page: Some(0),
            layout_page: None,
            checksum_pos: 200,
        };
        let mut bytes = header.to_bytes();
        bytes.resize(300, 0);
        bytes
    }

    #[test]
    fn reads_valid_header() {
        let mut src = Cursor::new(sample_header_bytes());
        let header = Header::read(&mut src).unwrap();
        assert_eq!(header.major_version, 5);
        assert_eq!(header.entry_count, 3);
        assert_eq!(header.main_page, Some(0));
        assert_eq!(header.layout_page, None);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_header_bytes();
        bytes[0] = 0;
        let mut src = Cursor::new(bytes);
        assert!(matches!(
            Header::read(&mut src),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_pointer() {
        let mut header_bytes = sample_header_bytes();
        header_bytes.truncate(90); // shrink file so url_ptr_pos (80) is in range but mimeListPos isn't
        let mut src = Cursor::new(header_bytes);
        assert!(matches!(Header::read(&mut src), Err(Error::FormatError(_))));
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut src = Cursor::new(sample_header_bytes());
        let header = Header::read(&mut src).unwrap();
        let mut src2 = Cursor::new({
            let mut b = header.to_bytes();
            b.resize(300, 0);
            b
        });
        let header2 = Header::read(&mut src2).unwrap();
        assert_eq!(header.entry_count, header2.entry_count);
        assert_eq!(header.checksum_pos, header2.checksum_pos);
    }
}
