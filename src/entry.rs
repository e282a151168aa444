//! Directory entries: one record per URL in the archive, either pointing at a blob
//! (`ContentEntry`) or at another entry (`RedirectEntry`).

use crate::codec::{self, Source};
use crate::error::Result;
use crate::mime::REDIRECT_MIME;
use crate::namespace::Namespace;

/// Maximum length this crate will scan looking for a NUL terminator inside a directory
/// entry's URL/title fields. Real archives never come close; this only bounds how far a
/// corrupt file can make a single read wander.
const MAX_STRING_LEN: u64 = 8192;

#[derive(Debug, Clone)]
pub struct ContentEntry {
    pub mime_index: u16,
    pub namespace: Namespace,
    pub revision: u32,
    pub cluster_number: u32,
    pub blob_number: u32,
    pub url: String,
    pub title: String,
    /// Opaque bytes following `title`, preserved on rewrite but never interpreted (§9).
    pub parameters: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RedirectEntry {
    pub namespace: Namespace,
    pub revision: u32,
    /// Index into the URL pointer list of the entry this redirects to.
    pub redirect_index: u32,
    pub url: String,
    pub title: String,
    pub parameters: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum DirectoryEntry {
    Content(ContentEntry),
    Redirect(RedirectEntry),
}

impl DirectoryEntry {
    pub fn namespace(&self) -> Namespace {
        match self {
            DirectoryEntry::Content(e) => e.namespace,
            DirectoryEntry::Redirect(e) => e.namespace,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            DirectoryEntry::Content(e) => &e.url,
            DirectoryEntry::Redirect(e) => &e.url,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            DirectoryEntry::Content(e) => &e.title,
            DirectoryEntry::Redirect(e) => &e.title,
        }
    }

    /// An empty title means "same as URL" (§3).
    pub fn effective_title(&self) -> &str {
        let title = self.title();
        if title.is_empty() {
            self.url()
        } else {
            title
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, DirectoryEntry::Redirect(_))
    }

    /// Parses a complete directory entry starting at `offset`.
    pub fn read<S: Source + ?Sized>(source: &mut S, offset: u64) -> Result<DirectoryEntry> {
        let mime_index = codec::read_u16(source, offset)?;
        let parameter_len = codec::read_u8(source, offset + 2)? as u64;
        let namespace = Namespace::from(codec::read_u8(source, offset + 3)?);
        let revision = codec::read_u32(source, offset + 4)?;

        if mime_index == REDIRECT_MIME {
            let redirect_index = codec::read_u32(source, offset + 8)?;
            let strings_at = offset + 12;
            let url = codec::read_cstring(source, strings_at, MAX_STRING_LEN)?;
            let title_at = strings_at + url.len() as u64 + 1;
            let title = codec::read_cstring(source, title_at, MAX_STRING_LEN)?;
            let params_at = title_at + title.len() as u64 + 1;
            let parameters = codec::read_bytes(source, params_at, parameter_len as usize)?;
            Ok(DirectoryEntry::Redirect(RedirectEntry {
                namespace,
                revision,
                redirect_index,
                url,
                title,
                parameters,
            }))
        } else {
            let cluster_number = codec::read_u32(source, offset + 8)?;
            let blob_number = codec::read_u32(source, offset + 12)?;
            let strings_at = offset + 16;
            let url = codec::read_cstring(source, strings_at, MAX_STRING_LEN)?;
            let title_at = strings_at + url.len() as u64 + 1;
            let title = codec::read_cstring(source, title_at, MAX_STRING_LEN)?;
            let params_at = title_at + title.len() as u64 + 1;
            let parameters = codec::read_bytes(source, params_at, parameter_len as usize)?;
            Ok(DirectoryEntry::Content(ContentEntry {
                mime_index,
                namespace,
                revision,
                cluster_number,
                blob_number,
                url,
                title,
                parameters,
            }))
        }
    }

    /// Reads only `(namespace, url)` at `offset`, without parsing the rest of the record.
    /// This is the read binary search uses for each probe (§4.G, §9) - a full
    /// [`DirectoryEntry::read`] would pull in the title and target fields for nothing.
    pub fn read_url_key<S: Source + ?Sized>(
        source: &mut S,
        offset: u64,
    ) -> Result<(Namespace, String)> {
        let mime_index = codec::read_u16(source, offset)?;
        let namespace = Namespace::from(codec::read_u8(source, offset + 3)?);
        let strings_at = if mime_index == REDIRECT_MIME {
            offset + 12
        } else {
            offset + 16
        };
        let url = codec::read_cstring(source, strings_at, MAX_STRING_LEN)?;
        Ok((namespace, url))
    }

    /// Reads `(namespace, effective title)` at `offset` without parsing parameters. The
    /// title-pointer-list binary search uses this probe; it still has to read past the URL
    /// string to reach the title, unlike [`DirectoryEntry::read_url_key`].
    pub fn read_title_key<S: Source + ?Sized>(
        source: &mut S,
        offset: u64,
    ) -> Result<(Namespace, String)> {
        let mime_index = codec::read_u16(source, offset)?;
        let namespace = Namespace::from(codec::read_u8(source, offset + 3)?);
        let strings_at = if mime_index == REDIRECT_MIME {
            offset + 12
        } else {
            offset + 16
        };
        let url = codec::read_cstring(source, strings_at, MAX_STRING_LEN)?;
        let title_at = strings_at + url.len() as u64 + 1;
        let title = codec::read_cstring(source, title_at, MAX_STRING_LEN)?;
        let effective = if title.is_empty() { url } else { title };
        Ok((namespace, effective))
    }

    /// Serializes this entry to its exact on-disk byte representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            DirectoryEntry::Content(e) => {
                codec::write_u16(&mut buf, e.mime_index);
                codec::write_u8(&mut buf, e.parameters.len() as u8);
                codec::write_u8(&mut buf, e.namespace.as_byte());
                codec::write_u32(&mut buf, e.revision);
                codec::write_u32(&mut buf, e.cluster_number);
                codec::write_u32(&mut buf, e.blob_number);
                codec::write_cstring(&mut buf, &e.url);
                codec::write_cstring(&mut buf, &e.title);
                buf.extend_from_slice(&e.parameters);
            }
            DirectoryEntry::Redirect(e) => {
                codec::write_u16(&mut buf, REDIRECT_MIME);
                codec::write_u8(&mut buf, e.parameters.len() as u8);
                codec::write_u8(&mut buf, e.namespace.as_byte());
                codec::write_u32(&mut buf, e.revision);
                codec::write_u32(&mut buf, e.redirect_index);
                codec::write_cstring(&mut buf, &e.url);
                codec::write_cstring(&mut buf, &e.title);
                buf.extend_from_slice(&e.parameters);
            }
        }
        buf
    }

    pub fn size_on_disk(&self) -> u64 {
        self.to_bytes().len() as u64
    }
}

/// Total order used to keep the URL pointer list sorted: `(namespace, url)` compared as raw
/// bytes, no locale (§4.E).
pub fn url_order(a: (Namespace, &str), b: (Namespace, &str)) -> std::cmp::Ordering {
    (a.0, a.1.as_bytes()).cmp(&(b.0, b.1.as_bytes()))
}

/// Total order used to keep the title pointer list sorted: `(namespace, title-or-url)`.
/// An empty title sorts as though it were the URL (§3, §4.E).
pub fn title_order(a: &DirectoryEntry, b: &DirectoryEntry) -> std::cmp::Ordering {
    (a.namespace(), a.effective_title().as_bytes()).cmp(&(b.namespace(), b.effective_title().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn content(url: &str, title: &str) -> DirectoryEntry {
        DirectoryEntry::Content(ContentEntry {
            mime_index: 0,
            namespace: Namespace::CONTENT,
            revision: 0,
            cluster_number: 1,
            blob_number: 2,
            url: url.into(),
            title: title.into(),
            parameters: Vec::new(),
        })
    }

    fn redirect(url: &str, redirect_index: u32) -> DirectoryEntry {
        DirectoryEntry::Redirect(RedirectEntry {
            namespace: Namespace::CONTENT,
            revision: 0,
            redirect_index,
            url: url.into(),
            title: String::new(),
            parameters: Vec::new(),
        })
    }

    #[test]
    fn round_trips_content_entry() {
        let entry = content("hello", "Hello!");
        let bytes = entry.to_bytes();
        let mut src = Cursor::new(bytes);
        let parsed = DirectoryEntry::read(&mut src, 0).unwrap();
        assert!(!parsed.is_redirect());
        assert_eq!(parsed.url(), "hello");
        assert_eq!(parsed.title(), "Hello!");
        match parsed {
            DirectoryEntry::Content(c) => {
                assert_eq!(c.cluster_number, 1);
                assert_eq!(c.blob_number, 2);
            }
            _ => panic!("expected content entry"),
        }
    }

    #[test]
    fn round_trips_redirect_entry() {
        let entry = redirect("home", 7);
        let bytes = entry.to_bytes();
        let mut src = Cursor::new(bytes);
        let parsed = DirectoryEntry::read(&mut src, 0).unwrap();
        assert!(parsed.is_redirect());
        match parsed {
            DirectoryEntry::Redirect(r) => assert_eq!(r.redirect_index, 7),
            _ => panic!("expected redirect entry"),
        }
    }

    #[test]
    fn empty_title_falls_back_to_url() {
        let entry = content("a/page", "");
        assert_eq!(entry.effective_title(), "a/page");
    }

    #[test]
    fn read_url_key_matches_full_parse_for_both_variants() {
        for entry in [content("hello", "Hello"), redirect("home", 3)] {
            let bytes = entry.to_bytes();
            let mut src = Cursor::new(bytes);
            let (ns, url) = DirectoryEntry::read_url_key(&mut src, 0).unwrap();
            assert_eq!(ns, entry.namespace());
            assert_eq!(url, entry.url());
        }
    }

    #[test]
    fn read_title_key_falls_back_to_url_when_title_empty() {
        let entry = content("a/page", "");
        let bytes = entry.to_bytes();
        let mut src = Cursor::new(bytes);
        let (_, title) = DirectoryEntry::read_title_key(&mut src, 0).unwrap();
        assert_eq!(title, "a/page");
    }

    #[test]
    fn preserves_opaque_parameters_on_round_trip() {
        let mut entry = content("x", "");
        if let DirectoryEntry::Content(ref mut c) = entry {
            c.parameters = vec![9, 8, 7];
        }
        let bytes = entry.to_bytes();
        let mut src = Cursor::new(bytes);
        let parsed = DirectoryEntry::read(&mut src, 0).unwrap();
        match parsed {
            DirectoryEntry::Content(c) => assert_eq!(c.parameters, vec![9, 8, 7]),
            _ => panic!(),
        }
    }

    #[test]
    fn url_order_compares_namespace_then_raw_bytes() {
        use std::cmp::Ordering;
        assert_eq!(
            url_order((Namespace::CONTENT, "a"), (Namespace::CONTENT, "b")),
            Ordering::Less
        );
        assert_eq!(
            url_order((Namespace::LAYOUT, "z"), (Namespace::CONTENT, "a")),
            Ordering::Less
        );
    }
}
