//! Tunables shared by the cache, cluster, resolver, and allocator subsystems, and doubling as
//! this crate's configuration surface (§4.I, §4.L). `Policy` is plain data: no file format or
//! env var binding, constructible with [`Default`], passed by value into
//! [`crate::archive::Archive::open_with_policy`] and [`crate::writer::Writer::open`].

use crate::cache::EvictionPolicy;
use crate::cluster::ClusterRepresentation;

/// How the allocator chooses among candidate holes (§4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStrategy {
    FirstFit,
    BestFit,
}

#[derive(Debug, Clone)]
pub struct Policy {
    pub entry_cache_capacity: usize,
    pub entry_cache_eviction: EvictionPolicy,
    pub cluster_cache_capacity: usize,
    pub cluster_cache_eviction: EvictionPolicy,
    pub cluster_representation_for_read: ClusterRepresentation,
    pub alloc_strategy: AllocStrategy,
    pub coalesce_free_ranges: bool,
    pub redirect_max_depth: u32,
    pub verify_checksum_on_open: bool,
    pub truncate_after_write: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            entry_cache_capacity: 1024,
            entry_cache_eviction: EvictionPolicy::Lru,
            cluster_cache_capacity: 64,
            cluster_cache_eviction: EvictionPolicy::Lru,
            cluster_representation_for_read: ClusterRepresentation::OffsetOnly,
            alloc_strategy: AllocStrategy::FirstFit,
            coalesce_free_ranges: true,
            redirect_max_depth: 16,
            verify_checksum_on_open: false,
            truncate_after_write: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let policy = Policy::default();
        assert_eq!(policy.redirect_max_depth, 16);
        assert_eq!(policy.alloc_strategy, AllocStrategy::FirstFit);
        assert!(policy.coalesce_free_ranges);
        assert_eq!(
            policy.cluster_representation_for_read,
            ClusterRepresentation::OffsetOnly
        );
    }
}
