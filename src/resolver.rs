//! URL/title lookup and redirect-chain resolution (§4.G).
//!
//! Lookup is a binary search over a pointer list that reads only the `(namespace, key)` prefix
//! of each candidate entry — never the full record — so each probe costs one small seek, not a
//! full directory-entry parse.

use std::collections::HashSet;

use crate::codec::Source;
use crate::entry::DirectoryEntry;
use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::pointer_list::{TitlePointerList, UrlPointerList};

/// Binary-searches the URL pointer list for `(namespace, url)`, returning its index into the
/// pointer list (not its file offset).
pub fn find_by_url<S: Source + ?Sized>(
    source: &mut S,
    url_ptrs: &UrlPointerList,
    namespace: Namespace,
    url: &str,
) -> Result<usize> {
    let mut low = 0usize;
    let mut high = url_ptrs.len();
    while low < high {
        let mid = low + (high - low) / 2;
        let offset = url_ptrs.get(mid).expect("mid is within [low, high)");
        let (probe_ns, probe_url) = DirectoryEntry::read_url_key(source, offset)?;
        match (probe_ns, probe_url.as_str()).cmp(&(namespace, url)) {
            std::cmp::Ordering::Less => low = mid + 1,
            std::cmp::Ordering::Greater => high = mid,
            std::cmp::Ordering::Equal => return Ok(mid),
        }
    }
    Err(Error::NotFound(format!("{}/{}", namespace, url)))
}

/// Binary-searches the title pointer list for `(namespace, title)`. Each probe dereferences
/// through the URL pointer list to the actual directory entry (§4.G).
pub fn find_by_title<S: Source + ?Sized>(
    source: &mut S,
    title_ptrs: &TitlePointerList,
    url_ptrs: &UrlPointerList,
    namespace: Namespace,
    title: &str,
) -> Result<usize> {
    let mut low = 0usize;
    let mut high = title_ptrs.len();
    while low < high {
        let mid = low + (high - low) / 2;
        let url_index = title_ptrs.get(mid).expect("mid is within [low, high)") as usize;
        let offset = url_ptrs
            .get(url_index)
            .ok_or_else(|| Error::FormatError(format!("title pointer {} out of range", url_index)))?;
        let (probe_ns, probe_title) = DirectoryEntry::read_title_key(source, offset)?;
        match (probe_ns, probe_title.as_str()).cmp(&(namespace, title)) {
            std::cmp::Ordering::Less => low = mid + 1,
            std::cmp::Ordering::Greater => high = mid,
            std::cmp::Ordering::Equal => return Ok(url_index),
        }
    }
    Err(Error::NotFound(format!("{}/{} (by title)", namespace, title)))
}

/// Follows `entry`'s redirect chain until a content entry is reached, reading each hop at
/// `url_ptrs[index]`. `start_index` is the URL-pointer-list index `entry` itself was read
/// from, used to seed the cycle guard.
pub fn resolve<S: Source + ?Sized>(
    source: &mut S,
    url_ptrs: &UrlPointerList,
    start_index: usize,
    entry: DirectoryEntry,
    max_depth: u32,
) -> Result<(DirectoryEntry, usize)> {
    let mut current = entry;
    let mut current_index = start_index;
    let mut visited = HashSet::new();
    visited.insert(current_index);

    let mut depth = 0;
    loop {
        let redirect_index = match &current {
            DirectoryEntry::Content(_) => return Ok((current, current_index)),
            DirectoryEntry::Redirect(r) => r.redirect_index as usize,
        };

        depth += 1;
        if depth > max_depth {
            return Err(Error::RedirectTooDeep(max_depth));
        }
        if !visited.insert(redirect_index) {
            return Err(Error::RedirectLoop(redirect_index as u32));
        }

        let offset = url_ptrs.get(redirect_index).ok_or_else(|| {
            Error::FormatError(format!("redirect target {} out of range", redirect_index))
        })?;
        current = DirectoryEntry::read(source, offset)?;
        current_index = redirect_index;
    }
}
