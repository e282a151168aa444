//! The read-side archive handle: opens a source, parses the header and MIME table eagerly,
//! and lazily materializes pointer lists, directory entries, and clusters on first touch
//! (§3 "Lifecycle"). Superseded by [`crate::writer::Writer`] for editing.

use log::{debug, trace, warn};

use crate::cache::Cache;
use crate::cluster::Cluster;
use crate::codec::Source;
use crate::compression::CompressionRegistry;
use crate::entry::DirectoryEntry;
use crate::error::{Error, Result};
use crate::header::Header;
use crate::mime::MimeTable;
use crate::namespace::Namespace;
use crate::pointer_list::{ClusterPointerList, TitlePointerList, UrlPointerList};
use crate::policy::Policy;
use crate::resolver;
use crate::uuid::Uuid;

/// A directory entry together with the URL-pointer-list index it was read from, and a
/// non-owning reference back to the archive that can resolve/read it further (§9).
///
/// An `Entry` obtained from [`Archive::unbound_entry`] (or round-tripped through
/// [`Entry::unbind`]) carries no archive reference; calling [`Entry::read`] or
/// [`Entry::resolve`] on one fails with [`Error::BindRequired`].
pub struct Entry<'a, S: Source> {
    data: DirectoryEntry,
    index: usize,
    archive: Option<&'a mut Archive<S>>,
}

impl<'a, S: Source> Entry<'a, S> {
    pub fn namespace(&self) -> Namespace {
        self.data.namespace()
    }

    pub fn url(&self) -> &str {
        self.data.url()
    }

    pub fn title(&self) -> &str {
        self.data.effective_title()
    }

    pub fn full_url(&self) -> String {
        format!("{}/{}", self.namespace(), self.url())
    }

    pub fn is_redirect(&self) -> bool {
        self.data.is_redirect()
    }

    pub fn mimetype(&self) -> Option<&str> {
        match (&self.data, &self.archive) {
            (DirectoryEntry::Content(c), Some(archive)) => archive.mime_table.get(c.mime_index),
            _ => None,
        }
    }

    pub fn cluster_number(&self) -> Option<u32> {
        match &self.data {
            DirectoryEntry::Content(c) => Some(c.cluster_number),
            DirectoryEntry::Redirect(_) => None,
        }
    }

    pub fn blob_number(&self) -> Option<u32> {
        match &self.data {
            DirectoryEntry::Content(c) => Some(c.blob_number),
            DirectoryEntry::Redirect(_) => None,
        }
    }

    /// Reads this entry's blob content. Fails with [`Error::BindRequired`] if unbound, or if
    /// called on an unresolved redirect.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let cluster_number = match &self.data {
            DirectoryEntry::Content(c) => (c.cluster_number, c.blob_number),
            DirectoryEntry::Redirect(_) => {
                return Err(Error::FormatError(
                    "cannot read content of a redirect entry; call resolve() first".into(),
                ))
            }
        };
        let archive = self.archive.as_deref_mut().ok_or(Error::BindRequired)?;
        archive.read_blob(cluster_number.0, cluster_number.1)
    }

    /// Follows this entry's redirect chain (a no-op if it's already a content entry),
    /// returning the resolved, still-bound entry.
    pub fn resolve(self) -> Result<Entry<'a, S>> {
        let archive = self.archive.ok_or(Error::BindRequired)?;
        archive.ensure_url_ptrs()?;
        let (resolved, index) = resolver::resolve(
            &mut archive.source,
            archive.url_ptrs.as_ref().expect("just ensured"),
            self.index,
            self.data,
            archive.policy.redirect_max_depth,
        )?;
        Ok(Entry {
            data: resolved,
            index,
            archive: Some(archive),
        })
    }

    /// Detaches this entry from its archive. The returned value can still be inspected and
    /// serialized, but [`Entry::read`]/[`Entry::resolve`] will fail on it.
    pub fn unbind(self) -> DirectoryEntry {
        self.data
    }

    /// Attaches an unbound entry (e.g. one produced by [`Entry::unbind`], or read from a
    /// different archive entirely) to `archive`, so [`Entry::read`]/[`Entry::resolve`] work
    /// against it (§9). The entry's pointer-list index is unknown once detached, so redirect
    /// cycle detection treats it as its own starting point rather than any real index.
    pub fn bind(self, archive: &mut Archive<S>) -> Entry<'_, S> {
        Entry {
            data: self.data,
            index: usize::MAX,
            archive: Some(archive),
        }
    }
}

/// A read-only (or read-write, via [`crate::writer::Writer`]) view over a ZIM archive.
pub struct Archive<S: Source> {
    source: S,
    header: Header,
    mime_table: MimeTable,
    url_ptrs: Option<UrlPointerList>,
    title_ptrs: Option<TitlePointerList>,
    cluster_ptrs: Option<ClusterPointerList>,
    registry: CompressionRegistry,
    policy: Policy,
    entry_cache: Cache<usize, DirectoryEntry>,
    cluster_cache: Cache<u32, Cluster>,
}

impl<S: Source> Archive<S> {
    pub fn open(source: S) -> Result<Archive<S>> {
        Archive::open_with_policy(source, Policy::default())
    }

    /// Parses the header and MIME table eagerly; the pointer lists and clusters are left
    /// unmaterialized until first touch (§3 "Lifecycle"), so opening costs O(1) seeks
    /// regardless of `entryCount`/`clusterCount`.
    pub fn open_with_policy(mut source: S, policy: Policy) -> Result<Archive<S>> {
        let header = Header::read(&mut source)?;
        let mime_table = MimeTable::read(&mut source, header.mime_list_pos)?;

        if policy.verify_checksum_on_open {
            verify_checksum(&mut source, &header)?;
        }

        debug!(
            "opened archive uuid={} entries={} clusters={}",
            header.uuid, header.entry_count, header.cluster_count
        );

        Ok(Archive {
            source,
            entry_cache: Cache::new(policy.entry_cache_capacity, policy.entry_cache_eviction),
            cluster_cache: Cache::new(policy.cluster_cache_capacity, policy.cluster_cache_eviction),
            header,
            mime_table,
            url_ptrs: None,
            title_ptrs: None,
            cluster_ptrs: None,
            registry: CompressionRegistry::with_defaults(),
            policy,
        })
    }

    /// Materializes the URL pointer list on first call; later calls are free.
    fn ensure_url_ptrs(&mut self) -> Result<()> {
        if self.url_ptrs.is_none() {
            trace!("materializing url pointer list ({} entries)", self.header.entry_count);
            self.url_ptrs = Some(UrlPointerList::read(
                &mut self.source,
                self.header.url_ptr_pos,
                self.header.entry_count,
            )?);
        }
        Ok(())
    }

    /// Materializes the title pointer list on first call; later calls are free.
    fn ensure_title_ptrs(&mut self) -> Result<()> {
        if self.title_ptrs.is_none() {
            trace!("materializing title pointer list ({} entries)", self.header.entry_count);
            self.title_ptrs = Some(TitlePointerList::read(
                &mut self.source,
                self.header.title_ptr_pos,
                self.header.entry_count,
            )?);
        }
        Ok(())
    }

    /// Materializes the cluster pointer list on first call; later calls are free.
    fn ensure_cluster_ptrs(&mut self) -> Result<()> {
        if self.cluster_ptrs.is_none() {
            trace!("materializing cluster pointer list ({} entries)", self.header.cluster_count);
            self.cluster_ptrs = Some(ClusterPointerList::read(
                &mut self.source,
                self.header.cluster_ptr_pos,
                self.header.cluster_count,
            )?);
        }
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn uuid(&self) -> Uuid {
        self.header.uuid
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Registers or replaces a compression codec, e.g. to add an optional codec the default
    /// registry doesn't carry, or to remove one (simulating §8 scenario S3).
    pub fn compression_registry_mut(&mut self) -> &mut CompressionRegistry {
        &mut self.registry
    }

    fn page_entry(&mut self, page: Option<u32>, what: &str) -> Result<Entry<'_, S>> {
        let index = page.ok_or_else(|| Error::NotFound(what.to_string()))?;
        self.entry_by_index(index as usize)
    }

    pub fn main_page(&mut self) -> Result<Entry<'_, S>> {
        let page = self.header.main_page;
        self.page_entry(page, "main page")
    }

    pub fn layout_page(&mut self) -> Result<Entry<'_, S>> {
        let page = self.header.layout_page;
        self.page_entry(page, "layout page")
    }

    /// Reads a metadata value stored as a content entry in the `M` namespace, e.g. `Title` or
    /// `Language`.
    pub fn metadata(&mut self, key: &str) -> Result<Vec<u8>> {
        let mut entry = self.get_entry_by_url(Namespace::METADATA, key)?;
        entry.read()
    }

    fn directory_entry_at(&mut self, index: usize) -> Result<DirectoryEntry> {
        if let Some(entry) = self.entry_cache.get(&index) {
            return Ok(entry.clone());
        }
        self.ensure_url_ptrs()?;
        let offset = self
            .url_ptrs
            .as_ref()
            .expect("just ensured")
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("directory entry at index {}", index)))?;
        trace!("materializing directory entry at pointer index {}", index);
        let entry = DirectoryEntry::read(&mut self.source, offset)?;
        self.entry_cache.put(index, entry.clone());
        Ok(entry)
    }

    fn entry_by_index(&mut self, index: usize) -> Result<Entry<'_, S>> {
        let data = self.directory_entry_at(index)?;
        Ok(Entry {
            data,
            index,
            archive: Some(self),
        })
    }

    /// The directory entry at pointer-list position `index`. Equivalent to the spec's
    /// `getEntryById`.
    pub fn get_entry_by_id(&mut self, index: usize) -> Result<Entry<'_, S>> {
        self.ensure_url_ptrs()?;
        if index >= self.url_ptrs.as_ref().expect("just ensured").len() {
            return Err(Error::NotFound(format!("entry id {}", index)));
        }
        self.entry_by_index(index)
    }

    pub fn get_entry_by_url(&mut self, namespace: Namespace, url: &str) -> Result<Entry<'_, S>> {
        self.ensure_url_ptrs()?;
        let index = resolver::find_by_url(
            &mut self.source,
            self.url_ptrs.as_ref().expect("just ensured"),
            namespace,
            url,
        )?;
        self.entry_by_index(index)
    }

    pub fn get_entry_by_title(&mut self, namespace: Namespace, title: &str) -> Result<Entry<'_, S>> {
        self.ensure_title_ptrs()?;
        self.ensure_url_ptrs()?;
        let index = resolver::find_by_title(
            &mut self.source,
            self.title_ptrs.as_ref().expect("just ensured"),
            self.url_ptrs.as_ref().expect("just ensured"),
            namespace,
            title,
        )?;
        self.entry_by_index(index)
    }

    /// Parses `"N/path"` into a namespace and URL and looks it up.
    pub fn get_entry_by_full_url(&mut self, full_url: &str) -> Result<Entry<'_, S>> {
        let mut parts = full_url.splitn(2, '/');
        let namespace = parts
            .next()
            .filter(|p| p.len() == 1)
            .map(|p| Namespace::from(p.as_bytes()[0]))
            .ok_or_else(|| Error::FormatError(format!("malformed full URL: {}", full_url)))?;
        let url = parts
            .next()
            .ok_or_else(|| Error::FormatError(format!("malformed full URL: {}", full_url)))?;
        self.get_entry_by_url(namespace, url)
    }

    /// Shorthand for `get_entry_by_url(Namespace::CONTENT, url)`.
    pub fn get_content_entry_by_url(&mut self, url: &str) -> Result<Entry<'_, S>> {
        self.get_entry_by_url(Namespace::CONTENT, url)
    }

    /// Wraps a plain [`DirectoryEntry`] (e.g. one produced off-archive) as an unbound
    /// [`Entry`]; `read`/`resolve` will fail with [`Error::BindRequired`] until it is looked up
    /// through the archive instead.
    pub fn unbound_entry(data: DirectoryEntry) -> Entry<'static, S> {
        Entry {
            data,
            index: usize::MAX,
            archive: None,
        }
    }

    fn cluster_bounds(&mut self, cluster_number: u32) -> Result<(u64, u64)> {
        self.ensure_cluster_ptrs()?;
        let cluster_ptrs = self.cluster_ptrs.as_ref().expect("just ensured");
        let start = cluster_ptrs
            .get(cluster_number as usize)
            .ok_or_else(|| Error::NotFound(format!("cluster {}", cluster_number)))?;
        let end = if (cluster_number as usize + 1) < cluster_ptrs.len() {
            cluster_ptrs
                .get(cluster_number as usize + 1)
                .expect("checked above")
        } else {
            self.header.checksum_pos
        };
        Ok((start, end))
    }

    fn with_cluster<R>(&mut self, cluster_number: u32, f: impl FnOnce(&mut Cluster) -> Result<R>) -> Result<R> {
        if self.cluster_cache.get_mut(&cluster_number).is_none() {
            let (start, end) = self.cluster_bounds(cluster_number)?;
            trace!("materializing cluster {}", cluster_number);
            let representation = self.policy.cluster_representation_for_read;
            let cluster = Cluster::read(&mut self.source, &self.registry, start, end, representation)
                .map_err(|err| {
                    if matches!(err, Error::UnsupportedCompression(_)) {
                        warn!("cluster {} uses an unavailable compression codec", cluster_number);
                    }
                    err
                })?;
            self.cluster_cache.put(cluster_number, cluster);
        }
        let cluster = self
            .cluster_cache
            .get_mut(&cluster_number)
            .expect("just inserted");
        f(cluster)
    }

    fn read_blob(&mut self, cluster_number: u32, blob_number: u32) -> Result<Vec<u8>> {
        self.with_cluster(cluster_number, |cluster| cluster.get_blob(blob_number as usize))
    }

    /// Iterates every directory entry, optionally restricted to one namespace, in URL-pointer
    /// order. Lazy: each `next()` materializes (or serves from cache) exactly one entry.
    pub fn iter_entries(&mut self, namespace: Option<Namespace>) -> EntryIter<'_, S> {
        EntryIter {
            archive: self,
            next: 0,
            namespace,
        }
    }

    pub fn cluster_count(&self) -> u32 {
        self.header.cluster_count
    }

    /// Iterates every cluster in the archive in cluster-number order, yielding its identity and
    /// blob count. Each step materializes (or serves from cache) exactly one cluster; use
    /// [`Archive::iter_blobs`] on the yielded number to walk its content.
    pub fn iter_clusters(&mut self) -> ClusterIter<'_, S> {
        ClusterIter { archive: self, next: 0 }
    }

    /// Every blob in cluster `cluster_number`, in order. The cluster is pinned in the cache
    /// for the iterator's lifetime so it can't be evicted mid-scan (§5, §9), and unpinned when
    /// the iterator is dropped.
    pub fn iter_blobs(&mut self, cluster_number: u32) -> Result<BlobIter<'_, S>> {
        let total = self.with_cluster(cluster_number, |cluster| Ok(cluster.blob_count()))?;
        self.cluster_cache.pin(&cluster_number);
        Ok(BlobIter {
            archive: self,
            cluster_number,
            next: 0,
            total,
        })
    }
}

/// Lazy iterator over directory entries produced by [`Archive::iter_entries`].
pub struct EntryIter<'a, S: Source> {
    archive: &'a mut Archive<S>,
    next: usize,
    namespace: Option<Namespace>,
}

impl<'a, S: Source> Iterator for EntryIter<'a, S> {
    type Item = Result<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = self.archive.ensure_url_ptrs() {
            return Some(Err(err));
        }
        while self.next < self.archive.url_ptrs.as_ref().expect("just ensured").len() {
            let index = self.next;
            self.next += 1;
            match self.archive.directory_entry_at(index) {
                Ok(entry) => {
                    if self.namespace.map(|ns| ns == entry.namespace()).unwrap_or(true) {
                        return Some(Ok(entry));
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}

/// Identity and size of one cluster, yielded by [`Archive::iter_clusters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterSummary {
    pub cluster_number: u32,
    pub blob_count: usize,
}

/// Lazy iterator over clusters produced by [`Archive::iter_clusters`].
pub struct ClusterIter<'a, S: Source> {
    archive: &'a mut Archive<S>,
    next: u32,
}

impl<'a, S: Source> Iterator for ClusterIter<'a, S> {
    type Item = Result<ClusterSummary>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.archive.header.cluster_count {
            return None;
        }
        let cluster_number = self.next;
        self.next += 1;
        let result = self
            .archive
            .with_cluster(cluster_number, |cluster| Ok(cluster.blob_count()))
            .map(|blob_count| ClusterSummary { cluster_number, blob_count });
        Some(result)
    }
}

/// Lazy iterator over the blobs of one cluster, produced by [`Archive::iter_blobs`]. Holds a
/// pin on the cluster cache entry for its lifetime.
pub struct BlobIter<'a, S: Source> {
    archive: &'a mut Archive<S>,
    cluster_number: u32,
    next: usize,
    total: usize,
}

impl<'a, S: Source> Iterator for BlobIter<'a, S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.archive.with_cluster(self.cluster_number, |cluster| cluster.get_blob(index)))
    }
}

impl<'a, S: Source> Drop for BlobIter<'a, S> {
    fn drop(&mut self) {
        self.archive.cluster_cache.unpin(&self.cluster_number);
    }
}

fn verify_checksum<S: Source>(source: &mut S, header: &Header) -> Result<()> {
    use md5::{Digest, Md5};

    let total_len = source.len()?;
    if header.checksum_pos + 16 > total_len {
        return Err(Error::FormatError(
            "checksum position is past the end of the file".into(),
        ));
    }
    let body = crate::codec::read_bytes(source, 0, header.checksum_pos as usize)?;
    let trailer = crate::codec::read_bytes(source, header.checksum_pos, 16)?;

    let mut hasher = Md5::new();
    hasher.update(&body);
    let computed = hasher.finalize();

    if computed.as_slice() != trailer.as_slice() {
        return Err(Error::ChecksumMismatch);
    }
    Ok(())
}
