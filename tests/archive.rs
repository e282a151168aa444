//! Hand-assembles minimal archives byte-by-byte and drives the public API against them,
//! mirroring the end-to-end scenarios in SPEC_FULL.md §8. No on-disk fixture file: every
//! archive here is built in memory, so the suite is hermetic.

use std::io::Cursor;

use zim::archive::Archive;
use zim::codec::{self, OffsetSource};
use zim::compression::{CompressionRegistry, CompressionTag};
use zim::entry::{ContentEntry, DirectoryEntry, RedirectEntry};
use zim::error::Error;
use zim::header::{Header, HEADER_LEN};
use zim::namespace::Namespace;
use zim::policy::Policy;
use zim::uuid::Uuid;
use zim::writer::Writer;

/// Writes a single uncompressed cluster body (offset table + blob bytes) and returns it.
fn uncompressed_cluster_body(blobs: &[&[u8]]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut offsets = vec![(blobs.len() as u64 + 1) * 4];
    for blob in blobs {
        let last = *offsets.last().unwrap();
        offsets.push(last + blob.len() as u64);
    }
    for off in &offsets {
        codec::write_u32(&mut body, *off as u32);
    }
    for blob in blobs {
        body.extend_from_slice(blob);
    }
    body
}

/// S1: a 3-entry archive (`A/index`, `C/hello`, `C/world`) sharing one uncompressed cluster.
fn build_three_entry_archive() -> Vec<u8> {
    let entries = vec![
        DirectoryEntry::Content(ContentEntry {
            mime_index: 0,
            namespace: Namespace::from(b'A'),
            revision: 0,
            cluster_number: 0,
            blob_number: 0,
            url: "index".into(),
            title: "".into(),
            parameters: Vec::new(),
        }),
        DirectoryEntry::Content(ContentEntry {
            mime_index: 0,
            namespace: Namespace::CONTENT,
            revision: 0,
            cluster_number: 0,
            blob_number: 1,
            url: "hello".into(),
            title: "".into(),
            parameters: Vec::new(),
        }),
        DirectoryEntry::Content(ContentEntry {
            mime_index: 0,
            namespace: Namespace::CONTENT,
            revision: 0,
            cluster_number: 0,
            blob_number: 2,
            url: "world".into(),
            title: "".into(),
            parameters: Vec::new(),
        }),
    ];

    let mut buf = vec![0u8; HEADER_LEN as usize];
    let mime_list_pos = buf.len() as u64;
    buf.extend_from_slice(b"text/plain\0\0");

    let mut entry_offsets = Vec::new();
    for entry in &entries {
        entry_offsets.push(buf.len() as u64);
        buf.extend_from_slice(&entry.to_bytes());
    }

    let blobs: &[&[u8]] = &[b"Index\n", b"Hello\n", b"World\n"];
    let cluster_pos = buf.len() as u64;
    buf.push(1); // uncompressed, not extended
    buf.extend_from_slice(&uncompressed_cluster_body(blobs));

    let url_ptr_pos = buf.len() as u64;
    for offset in &entry_offsets {
        codec::write_u64(&mut buf, *offset);
    }
    let title_ptr_pos = buf.len() as u64;
    for i in 0..entries.len() as u32 {
        codec::write_u32(&mut buf, i);
    }
    let cluster_ptr_pos = buf.len() as u64;
    codec::write_u64(&mut buf, cluster_pos);
    let checksum_pos = buf.len() as u64;

    let header = Header {
        major_version: 5,
        minor_version: 0,
        uuid: Uuid::new([0u8; 16]),
        entry_count: entries.len() as u32,
        cluster_count: 1,
        url_ptr_pos,
        title_ptr_pos,
        cluster_ptr_pos,
        mime_list_pos,
        main_page: Some(0),
        layout_page: None,
        checksum_pos,
    };
    let header_bytes = header.to_bytes();
    buf[..header_bytes.len()].copy_from_slice(&header_bytes);
    buf
}

#[test]
fn s1_opens_and_reads_content_entries() {
    let bytes = build_three_entry_archive();
    let mut archive = Archive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.header().entry_count, 3);
    let mut entry = archive.get_content_entry_by_url("hello").unwrap();
    assert_eq!(entry.read().unwrap(), b"Hello\n");
}

#[test]
fn archive_embedded_at_a_nonzero_offset_opens_the_same_way() {
    let archive_bytes = build_three_entry_archive();
    let mut outer = vec![0xEEu8; 37]; // unrelated container bytes before the archive
    outer.extend_from_slice(&archive_bytes);
    let source = OffsetSource::new(Cursor::new(outer), 37);

    let mut archive = Archive::open(source).unwrap();
    assert_eq!(archive.header().entry_count, 3);
    let mut entry = archive.get_content_entry_by_url("world").unwrap();
    assert_eq!(entry.read().unwrap(), b"World\n");
}

/// S2: a two-entry archive where `C/home` redirects to `C/index`.
fn build_redirect_archive() -> Vec<u8> {
    let target = DirectoryEntry::Content(ContentEntry {
        mime_index: 0,
        namespace: Namespace::CONTENT,
        revision: 0,
        cluster_number: 0,
        blob_number: 0,
        url: "index".into(),
        title: "".into(),
        parameters: Vec::new(),
    });
    let redirect = DirectoryEntry::Redirect(RedirectEntry {
        namespace: Namespace::CONTENT,
        revision: 0,
        redirect_index: 0,
        url: "home".into(),
        title: "".into(),
        parameters: Vec::new(),
    });

    let mut buf = vec![0u8; HEADER_LEN as usize];
    let mime_list_pos = buf.len() as u64;
    buf.extend_from_slice(b"text/plain\0\0");

    let target_offset = buf.len() as u64;
    buf.extend_from_slice(&target.to_bytes());
    let redirect_offset = buf.len() as u64;
    buf.extend_from_slice(&redirect.to_bytes());

    let cluster_pos = buf.len() as u64;
    buf.push(1);
    buf.extend_from_slice(&uncompressed_cluster_body(&[b"Index page\n"]));

    let url_ptr_pos = buf.len() as u64;
    codec::write_u64(&mut buf, target_offset); // index 0: index
    codec::write_u64(&mut buf, redirect_offset); // index 1: home
    let title_ptr_pos = buf.len() as u64;
    codec::write_u32(&mut buf, 1); // "home" < "index" alphabetically
    codec::write_u32(&mut buf, 0);
    let cluster_ptr_pos = buf.len() as u64;
    codec::write_u64(&mut buf, cluster_pos);
    let checksum_pos = buf.len() as u64;

    let header = Header {
        major_version: 5,
        minor_version: 0,
        uuid: Uuid::new([1u8; 16]),
        entry_count: 2,
        cluster_count: 1,
        url_ptr_pos,
        title_ptr_pos,
        cluster_ptr_pos,
        mime_list_pos,
        main_page: Some(0),
        layout_page: None,
        checksum_pos,
    };
    let header_bytes = header.to_bytes();
    buf[..header_bytes.len()].copy_from_slice(&header_bytes);
    buf
}

#[test]
fn s2_redirect_resolves_to_its_content_target() {
    let bytes = build_redirect_archive();
    let mut archive = Archive::open(Cursor::new(bytes)).unwrap();
    let home = archive.get_entry_by_url(Namespace::CONTENT, "home").unwrap();
    assert!(home.is_redirect());
    let mut resolved = home.resolve().unwrap();
    assert!(!resolved.is_redirect());
    assert_eq!(resolved.url(), "index");
    assert_eq!(resolved.read().unwrap(), b"Index page\n");
}

/// S3: three clusters, the third zstd-compressed. Returns the archive bytes.
fn build_mixed_compression_archive() -> Vec<u8> {
    let registry = CompressionRegistry::with_defaults();

    let entries = vec![
        DirectoryEntry::Content(ContentEntry {
            mime_index: 0,
            namespace: Namespace::CONTENT,
            revision: 0,
            cluster_number: 0,
            blob_number: 0,
            url: "a".into(),
            title: "".into(),
            parameters: Vec::new(),
        }),
        DirectoryEntry::Content(ContentEntry {
            mime_index: 0,
            namespace: Namespace::CONTENT,
            revision: 0,
            cluster_number: 1,
            blob_number: 0,
            url: "b".into(),
            title: "".into(),
            parameters: Vec::new(),
        }),
        DirectoryEntry::Content(ContentEntry {
            mime_index: 0,
            namespace: Namespace::CONTENT,
            revision: 0,
            cluster_number: 2,
            blob_number: 0,
            url: "c".into(),
            title: "".into(),
            parameters: Vec::new(),
        }),
    ];

    let mut buf = vec![0u8; HEADER_LEN as usize];
    let mime_list_pos = buf.len() as u64;
    buf.extend_from_slice(b"text/plain\0\0");

    let mut entry_offsets = Vec::new();
    for entry in &entries {
        entry_offsets.push(buf.len() as u64);
        buf.extend_from_slice(&entry.to_bytes());
    }

    let mut cluster_offsets = Vec::new();

    cluster_offsets.push(buf.len() as u64);
    buf.push(1);
    buf.extend_from_slice(&uncompressed_cluster_body(&[b"A content\n"]));

    cluster_offsets.push(buf.len() as u64);
    buf.push(1);
    buf.extend_from_slice(&uncompressed_cluster_body(&[b"B content\n"]));

    cluster_offsets.push(buf.len() as u64);
    let zstd_body = registry.encode(CompressionTag::Zstd, b"C content\n").unwrap();
    buf.push(CompressionTag::Zstd.to_nibble());
    buf.extend_from_slice(&zstd_body);

    let url_ptr_pos = buf.len() as u64;
    for offset in &entry_offsets {
        codec::write_u64(&mut buf, *offset);
    }
    let title_ptr_pos = buf.len() as u64;
    for i in 0..entries.len() as u32 {
        codec::write_u32(&mut buf, i);
    }
    let cluster_ptr_pos = buf.len() as u64;
    for offset in &cluster_offsets {
        codec::write_u64(&mut buf, *offset);
    }
    let checksum_pos = buf.len() as u64;

    let header = Header {
        major_version: 5,
        minor_version: 0,
        uuid: Uuid::new([2u8; 16]),
        entry_count: entries.len() as u32,
        cluster_count: 3,
        url_ptr_pos,
        title_ptr_pos,
        cluster_ptr_pos,
        mime_list_pos,
        main_page: None,
        layout_page: None,
        checksum_pos,
    };
    let header_bytes = header.to_bytes();
    buf[..header_bytes.len()].copy_from_slice(&header_bytes);
    buf
}

#[test]
fn s3_unsupported_compression_only_fails_the_cluster_that_needs_it() {
    let bytes = build_mixed_compression_archive();
    let mut archive = Archive::open(Cursor::new(bytes)).unwrap();
    *archive.compression_registry_mut() = CompressionRegistry::without(CompressionTag::Zstd);

    let mut a = archive.get_content_entry_by_url("a").unwrap();
    assert_eq!(a.read().unwrap(), b"A content\n");
    let mut b = archive.get_content_entry_by_url("b").unwrap();
    assert_eq!(b.read().unwrap(), b"B content\n");

    let mut c = archive.get_content_entry_by_url("c").unwrap();
    assert!(matches!(c.read(), Err(Error::UnsupportedCompression(_))));
}

#[test]
fn s4_writer_adds_one_entry_and_the_reopened_archive_sees_it() {
    let mut writer = Writer::create(Cursor::new(Vec::new()), Uuid::new([9u8; 16]), Policy::default()).unwrap();
    writer
        .add_entry(Namespace::CONTENT, "a", "", "text/plain", b"x", false)
        .unwrap();
    writer.flush().unwrap();

    let mut policy = Policy::default();
    policy.verify_checksum_on_open = true;
    let mut archive = Archive::open_with_policy(writer.into_source(), policy).unwrap();
    assert_eq!(archive.header().entry_count, 1);
    let mut entry = archive.get_content_entry_by_url("a").unwrap();
    assert_eq!(entry.read().unwrap(), b"x");
}

#[test]
fn s6_add_then_remove_then_flush_matches_a_fresh_empty_archive() {
    let uuid = Uuid::new([3u8; 16]);
    let mut fresh = Writer::create(Cursor::new(Vec::new()), uuid, Policy::default()).unwrap();
    fresh.flush().unwrap();
    let fresh_bytes = fresh.into_source().into_inner();

    let mut edited = Writer::create(Cursor::new(Vec::new()), uuid, Policy::default()).unwrap();
    edited
        .add_entry(Namespace::CONTENT, "a", "", "text/plain", b"temporary", false)
        .unwrap();
    edited.remove_entry(Namespace::CONTENT, "a").unwrap();
    edited.flush().unwrap();
    let edited_bytes = edited.into_source().into_inner();

    assert_eq!(fresh_bytes, edited_bytes);
}
