//! The writable-archive engine: append/replace/delete entries, relocate pointer lists, and
//! flush a coherent header (§4.K).
//!
//! Simplification carried into this implementation (recorded in the grounding ledger): each
//! entry added through [`Writer::add_entry`] gets its own single-blob cluster. The spec does
//! not require multi-blob clusters on write, only that writing always fully materializes and
//! (optionally) compresses a cluster through the registry — which this satisfies.

use log::debug;

use crate::allocator::Allocator;
use crate::codec::{self, WritableSource};
use crate::compression::{CompressionRegistry, CompressionTag};
use crate::entry::{ContentEntry, DirectoryEntry};
use crate::error::{Error, Result};
use crate::header::{Header, HEADER_LEN, MAGIC};
use crate::mime::MimeTable;
use crate::namespace::Namespace;
use crate::pointer_list::{ClusterPointerList, TitlePointerList, UrlPointerList};
use crate::policy::Policy;
use crate::uuid::Uuid;

/// A region of the file occupied by one serialized structure at its original allocation size,
/// so `flush` can tell whether a regrown structure still fits in place.
struct Allocated {
    offset: u64,
    capacity: u64,
}

pub struct Writer<S: WritableSource> {
    source: S,
    uuid: Uuid,
    main_page: Option<u32>,
    layout_page: Option<u32>,
    mime_table: MimeTable,
    mime_region: Allocated,
    url_ptrs: UrlPointerList,
    url_region: Allocated,
    title_ptrs: TitlePointerList,
    title_region: Allocated,
    cluster_ptrs: ClusterPointerList,
    cluster_region: Allocated,
    /// Byte length of each live entry, indexed the same way as `url_ptrs` - needed to release
    /// the right number of bytes on removal without re-deriving it from disk.
    entry_lengths: Vec<u64>,
    /// Byte range `(offset, length)` of each live cluster, indexed by cluster number.
    cluster_ranges: Vec<(u64, u64)>,
    allocator: Allocator,
    registry: CompressionRegistry,
    policy: Policy,
}

impl<S: WritableSource> Writer<S> {
    /// Creates a brand-new, empty archive in `source`, overwriting whatever was there.
    pub fn create(mut source: S, uuid: Uuid, policy: Policy) -> Result<Writer<S>> {
        let mime_offset = HEADER_LEN;
        let mime_bytes = MimeTable::new(Vec::new()).to_bytes();
        source.write_at(mime_offset, &mime_bytes)?;
        let end = mime_offset + mime_bytes.len() as u64;
        source.set_len(end)?;

        let mut writer = Writer {
            source,
            uuid,
            main_page: None,
            layout_page: None,
            mime_table: MimeTable::new(Vec::new()),
            mime_region: Allocated {
                offset: mime_offset,
                capacity: mime_bytes.len() as u64,
            },
            url_ptrs: UrlPointerList::new(Vec::new()),
            url_region: Allocated { offset: end, capacity: 0 },
            title_ptrs: TitlePointerList::new(Vec::new()),
            title_region: Allocated { offset: end, capacity: 0 },
            cluster_ptrs: ClusterPointerList::new(Vec::new()),
            cluster_region: Allocated { offset: end, capacity: 0 },
            entry_lengths: Vec::new(),
            cluster_ranges: Vec::new(),
            allocator: Allocator::new(end, policy.alloc_strategy, policy.coalesce_free_ranges),
            registry: CompressionRegistry::with_defaults(),
            policy,
        };
        writer.flush()?;
        Ok(writer)
    }

    /// Opens an existing archive for editing. Pointer lists and the MIME table are loaded
    /// eagerly (unlike the read-only [`crate::archive::Archive`]) because the writer must know
    /// their exact on-disk footprint to decide whether an edit fits in place.
    pub fn open(mut source: S, policy: Policy) -> Result<Writer<S>> {
        let header = Header::read(&mut source)?;
        let mime_table = MimeTable::read(&mut source, header.mime_list_pos)?;
        let url_ptrs = UrlPointerList::read(&mut source, header.url_ptr_pos, header.entry_count)?;
        let title_ptrs = TitlePointerList::read(&mut source, header.title_ptr_pos, header.entry_count)?;
        let cluster_ptrs =
            ClusterPointerList::read(&mut source, header.cluster_ptr_pos, header.cluster_count)?;

        let mut entry_lengths = Vec::with_capacity(url_ptrs.len());
        let mut live_regions = vec![
            (0u64, HEADER_LEN),
            (header.mime_list_pos, mime_table.to_bytes().len() as u64),
            (header.url_ptr_pos, url_ptrs.to_bytes().len() as u64),
            (header.title_ptr_pos, title_ptrs.to_bytes().len() as u64),
            (header.cluster_ptr_pos, cluster_ptrs.to_bytes().len() as u64),
        ];
        for i in 0..url_ptrs.len() {
            let offset = url_ptrs.get(i).expect("within range");
            let entry = DirectoryEntry::read(&mut source, offset)?;
            let len = entry.size_on_disk();
            entry_lengths.push(len);
            live_regions.push((offset, len));
        }

        let mut cluster_ranges = Vec::with_capacity(cluster_ptrs.len());
        for i in 0..cluster_ptrs.len() {
            let start = cluster_ptrs.get(i).expect("within range");
            let end = if i + 1 < cluster_ptrs.len() {
                cluster_ptrs.get(i + 1).expect("within range")
            } else {
                header.checksum_pos
            };
            cluster_ranges.push((start, end - start));
            live_regions.push((start, end - start));
        }

        let file_size = source.len()?;
        let allocator =
            Allocator::from_live_regions(file_size, &live_regions, policy.alloc_strategy, policy.coalesce_free_ranges);

        Ok(Writer {
            mime_region: Allocated {
                offset: header.mime_list_pos,
                capacity: mime_table.to_bytes().len() as u64,
            },
            url_region: Allocated {
                offset: header.url_ptr_pos,
                capacity: url_ptrs.to_bytes().len() as u64,
            },
            title_region: Allocated {
                offset: header.title_ptr_pos,
                capacity: title_ptrs.to_bytes().len() as u64,
            },
            cluster_region: Allocated {
                offset: header.cluster_ptr_pos,
                capacity: cluster_ptrs.to_bytes().len() as u64,
            },
            source,
            uuid: header.uuid,
            main_page: header.main_page,
            layout_page: header.layout_page,
            mime_table,
            url_ptrs,
            title_ptrs,
            cluster_ptrs,
            entry_lengths,
            cluster_ranges,
            allocator,
            registry: CompressionRegistry::with_defaults(),
            policy,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.url_ptrs.len()
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_ptrs.len()
    }

    fn title_insertion_point(&mut self, namespace: Namespace, effective_title: &str) -> Result<usize> {
        let mut low = 0usize;
        let mut high = self.title_ptrs.len();
        while low < high {
            let mid = low + (high - low) / 2;
            let url_index = self.title_ptrs.get(mid).expect("within range") as usize;
            let offset = self.url_ptrs.get(url_index).expect("within range");
            let entry = DirectoryEntry::read(&mut self.source, offset)?;
            let key = (entry.namespace(), entry.effective_title().to_string());
            if key < (namespace, effective_title.to_string()) {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    fn url_insertion_point(&mut self, namespace: Namespace, url: &str) -> Result<std::result::Result<usize, usize>> {
        let mut low = 0usize;
        let mut high = self.url_ptrs.len();
        while low < high {
            let mid = low + (high - low) / 2;
            let offset = self.url_ptrs.get(mid).expect("within range");
            let (probe_ns, probe_url) = DirectoryEntry::read_url_key(&mut self.source, offset)?;
            match (probe_ns, probe_url.as_str()).cmp(&(namespace, url)) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(low))
    }

    /// Adds a content entry. `overwrite = false` and an existing `(namespace, url)` yields
    /// `DuplicateEntry`; `overwrite = true` replaces the existing entry and releases its old
    /// entry and cluster space first.
    pub fn add_entry(
        &mut self,
        namespace: Namespace,
        url: &str,
        title: &str,
        mimetype: &str,
        content: &[u8],
        overwrite: bool,
    ) -> Result<()> {
        match self.url_insertion_point(namespace, url)? {
            Ok(existing_index) => {
                if !overwrite {
                    return Err(Error::DuplicateEntry {
                        namespace: namespace.as_byte() as char,
                        url: url.to_string(),
                    });
                }
                self.remove_at(existing_index)?;
            }
            Err(_) => {}
        }
        // Re-resolve the insertion point: removal (if any) shifted every later index down by one.
        let insertion_index = match self.url_insertion_point(namespace, url)? {
            Ok(_) => unreachable!("just removed any existing entry at this key"),
            Err(index) => index,
        };

        let mime_index = self.mime_table.index_of_or_insert(mimetype);
        let cluster_number = self.add_cluster(&[content])?;

        let entry = DirectoryEntry::Content(ContentEntry {
            mime_index,
            namespace,
            revision: 0,
            cluster_number,
            blob_number: 0,
            url: url.to_string(),
            title: title.to_string(),
            parameters: Vec::new(),
        });
        let entry_bytes = entry.to_bytes();
        let entry_offset = self.allocator.allocate(entry_bytes.len() as u64);
        self.source.write_at(entry_offset, &entry_bytes)?;

        self.url_ptrs.insert(insertion_index, entry_offset);
        self.entry_lengths.insert(insertion_index, entry_bytes.len() as u64);
        for v in self.title_ptrs.as_slice().to_vec().iter().enumerate() {
            let (i, &value) = v;
            if value as usize >= insertion_index {
                self.title_ptrs.set(i, value + 1);
            }
        }
        let title_index = self.title_insertion_point(namespace, entry.effective_title())?;
        self.title_ptrs.insert(title_index, insertion_index as u32);

        debug!("added entry {}/{} at pointer index {}", namespace, url, insertion_index);
        Ok(())
    }

    /// Appends a new cluster holding `blobs`, always uncompressed and non-extended (new
    /// clusters written by this engine are small enough that 32-bit offsets always suffice).
    /// Returns the new cluster's number. Always appended after the last existing cluster -
    /// this writer never inserts a cluster in the middle of the numbering.
    pub fn add_cluster(&mut self, blobs: &[&[u8]]) -> Result<u32> {
        let tag = CompressionTag::Uncompressed;
        let offset_width = 4u64;
        let mut body = Vec::new();
        let mut offsets = vec![(blobs.len() as u64 + 1) * offset_width];
        for blob in blobs {
            let last = *offsets.last().expect("always has at least the header entry");
            offsets.push(last + blob.len() as u64);
        }
        for off in &offsets {
            codec::write_u32(&mut body, *off as u32);
        }
        for blob in blobs {
            body.extend_from_slice(blob);
        }
        let encoded = self.registry.encode(tag, &body)?;

        let mut cluster_bytes = vec![tag.to_nibble()];
        cluster_bytes.extend_from_slice(&encoded);

        let offset = self.allocator.allocate(cluster_bytes.len() as u64);
        self.source.write_at(offset, &cluster_bytes)?;

        let cluster_number = self.cluster_ptrs.len() as u32;
        self.cluster_ptrs.insert(cluster_number as usize, offset);
        self.cluster_ranges.push((offset, cluster_bytes.len() as u64));
        Ok(cluster_number)
    }

    /// Removes the entry at `(namespace, url)`. Releases its directory-entry bytes and, if it
    /// is a content entry, its cluster's bytes (this writer never shares a cluster across
    /// entries, so every content entry's cluster is exclusively its own).
    pub fn remove_entry(&mut self, namespace: Namespace, url: &str) -> Result<()> {
        match self.url_insertion_point(namespace, url)? {
            Ok(index) => self.remove_at(index),
            Err(_) => Err(Error::NotFound(format!("{}/{}", namespace, url))),
        }
    }

    fn remove_at(&mut self, index: usize) -> Result<()> {
        let offset = self.url_ptrs.get(index).expect("valid index");
        let entry = DirectoryEntry::read(&mut self.source, offset)?;
        let entry_len = self.entry_lengths[index];
        self.allocator.release(offset, entry_len);

        let removed_mime_index = match &entry {
            DirectoryEntry::Content(content) => {
                let removed_cluster = content.cluster_number;
                let (cluster_offset, cluster_len) = self.cluster_ranges[removed_cluster as usize];
                self.allocator.release(cluster_offset, cluster_len);
                self.cluster_ptrs.remove(removed_cluster as usize);
                self.cluster_ranges.remove(removed_cluster as usize);
                self.renumber_clusters_after_removal(removed_cluster)?;
                Some(content.mime_index)
            }
            DirectoryEntry::Redirect(_) => None,
        };

        self.url_ptrs.remove(index);
        self.entry_lengths.remove(index);

        // If nothing else left on disk references the mimetype this entry used, and it sits at
        // the tail of the table, reclaim it - this is what lets addEntry+removeEntry+flush
        // round-trip back to a byte-identical archive (invariant 7).
        if let Some(mime_index) = removed_mime_index {
            let still_referenced = self.url_ptrs_reference_mime(mime_index)?;
            if !still_referenced {
                self.mime_table.pop_if_tail(mime_index);
            }
        }

        // Every title pointer referencing `index` is gone with it; every reference to a
        // later index shifts down by one.
        let remaining: Vec<u32> = self
            .title_ptrs
            .as_slice()
            .iter()
            .filter(|&&v| v as usize != index)
            .map(|&v| if v as usize > index { v - 1 } else { v })
            .collect();
        self.title_ptrs = TitlePointerList::new(remaining);

        Ok(())
    }

    fn url_ptrs_reference_mime(&mut self, mime_index: u16) -> Result<bool> {
        for i in 0..self.url_ptrs.len() {
            let offset = self.url_ptrs.get(i).expect("within range");
            let entry = DirectoryEntry::read(&mut self.source, offset)?;
            if let DirectoryEntry::Content(content) = entry {
                if content.mime_index == mime_index {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Content entries referencing a cluster number above the one just removed need their
    /// `clusterNumber` field decremented and rewritten in place (the field changes but the
    /// entry's total length does not, so no reallocation is needed).
    fn renumber_clusters_after_removal(&mut self, removed_cluster: u32) -> Result<()> {
        for i in 0..self.url_ptrs.len() {
            let offset = self.url_ptrs.get(i).expect("within range");
            let entry = DirectoryEntry::read(&mut self.source, offset)?;
            if let DirectoryEntry::Content(mut content) = entry {
                if content.cluster_number > removed_cluster {
                    content.cluster_number -= 1;
                    let rewritten = DirectoryEntry::Content(content).to_bytes();
                    self.source.write_at(offset, &rewritten)?;
                }
            }
        }
        Ok(())
    }

    /// Fetch-modify-replace: equivalent to `remove_entry` followed by `add_entry` with the
    /// same URL/namespace.
    pub fn edit_entry(
        &mut self,
        namespace: Namespace,
        url: &str,
        title: &str,
        mimetype: &str,
        content: &[u8],
    ) -> Result<()> {
        self.add_entry(namespace, url, title, mimetype, content, true)
    }

    fn rewrite_region(
        &mut self,
        region: &mut Allocated,
        bytes: &[u8],
    ) -> Result<u64> {
        if bytes.len() as u64 <= region.capacity {
            self.source.write_at(region.offset, bytes)?;
            Ok(region.offset)
        } else {
            self.allocator.release(region.offset, region.capacity);
            let new_offset = self.allocator.allocate(bytes.len() as u64);
            self.source.write_at(new_offset, bytes)?;
            *region = Allocated {
                offset: new_offset,
                capacity: bytes.len() as u64,
            };
            Ok(new_offset)
        }
    }

    /// Rewrites the MIME table, the three pointer lists, and the header; computes and writes
    /// the MD5 trailer over everything preceding it. This is the only point at which the file
    /// is guaranteed to be a valid, self-consistent archive (§4.K).
    pub fn flush(&mut self) -> Result<()> {
        let mime_bytes = self.mime_table.to_bytes();
        let mime_offset = self.rewrite_region_take(0, mime_bytes)?;

        // Pointer lists are written largest-first when they compete for the same hole (§4.K
        // tie-break): whichever of two contenders for an equal-sized hole runs first wins it,
        // so order the three writes by byte length, descending, rather than by list identity.
        let mut pointer_lists: Vec<(u8, Vec<u8>)> = vec![
            (1, self.url_ptrs.to_bytes()),
            (2, self.title_ptrs.to_bytes()),
            (3, self.cluster_ptrs.to_bytes()),
        ];
        pointer_lists.sort_by_key(|(_, bytes)| std::cmp::Reverse(bytes.len()));

        let mut url_offset = 0u64;
        let mut title_offset = 0u64;
        let mut cluster_offset = 0u64;
        for (which, bytes) in pointer_lists {
            let offset = self.rewrite_region_take(which, bytes)?;
            match which {
                1 => url_offset = offset,
                2 => title_offset = offset,
                _ => cluster_offset = offset,
            }
        }

        // The true end of live data, not a watermark: if add+remove freed everything back down
        // to some earlier point, this reports that earlier point, which is what lets
        // addEntry+removeEntry+flush reproduce a byte-identical archive (§8 invariant 7).
        let checksum_pos = self.allocator.live_end();

        let header = Header {
            major_version: 5,
            minor_version: 0,
            uuid: self.uuid,
            entry_count: self.url_ptrs.len() as u32,
            cluster_count: self.cluster_ptrs.len() as u32,
            url_ptr_pos: url_offset,
            title_ptr_pos: title_offset,
            cluster_ptr_pos: cluster_offset,
            mime_list_pos: mime_offset,
            main_page: self.main_page,
            layout_page: self.layout_page,
            checksum_pos,
        };
        let header_bytes = header.to_bytes();
        debug_assert_eq!(u32::from_le_bytes(header_bytes[0..4].try_into().unwrap()), MAGIC);
        self.source.write_at(0, &header_bytes)?;

        let body = codec::read_bytes(&mut self.source, 0, checksum_pos as usize)?;
        use md5::{Digest, Md5};
        let mut hasher = Md5::new();
        hasher.update(&body);
        let checksum = hasher.finalize();
        self.source.write_at(checksum_pos, checksum.as_slice())?;

        if self.policy.truncate_after_write {
            self.source.set_len(checksum_pos + 16)?;
        }

        debug!(
            "flushed archive: {} entries, {} clusters, {} bytes",
            header.entry_count,
            header.cluster_count,
            checksum_pos + 16
        );
        Ok(())
    }

    /// Helper indexing into the four tracked regions (0=mime, 1=url, 2=title, 3=cluster) so
    /// `flush` can borrow `self` mutably once per call instead of juggling four separate
    /// `&mut Allocated` borrows alongside `&mut self.allocator`.
    fn rewrite_region_take(&mut self, which: u8, bytes: Vec<u8>) -> Result<u64> {
        let mut region = match which {
            0 => std::mem::replace(&mut self.mime_region, Allocated { offset: 0, capacity: 0 }),
            1 => std::mem::replace(&mut self.url_region, Allocated { offset: 0, capacity: 0 }),
            2 => std::mem::replace(&mut self.title_region, Allocated { offset: 0, capacity: 0 }),
            _ => std::mem::replace(&mut self.cluster_region, Allocated { offset: 0, capacity: 0 }),
        };
        let result = self.rewrite_region(&mut region, &bytes);
        match which {
            0 => self.mime_region = region,
            1 => self.url_region = region,
            2 => self.title_region = region,
            _ => self.cluster_region = region,
        };
        result
    }

    pub fn into_source(self) -> S {
        self.source
    }
}
