//! Free-space allocator: tracks holes in the backing file left by edits, so the writer can
//! recycle them instead of always appending (§4.J).

use crate::policy::AllocStrategy;

/// A free byte range `[start, start + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRange {
    pub start: u64,
    pub length: u64,
}

impl FreeRange {
    fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Tracks the free ranges of a file as a sorted, non-overlapping set of intervals, plus the
/// current logical end of the file (where `allocate` falls back to when no hole fits).
pub struct Allocator {
    ranges: Vec<FreeRange>,
    file_end: u64,
    strategy: AllocStrategy,
    coalesce: bool,
}

impl Allocator {
    /// An allocator with no free ranges yet (a freshly created file).
    pub fn new(file_end: u64, strategy: AllocStrategy, coalesce: bool) -> Allocator {
        Allocator {
            ranges: Vec::new(),
            file_end,
            strategy,
            coalesce,
        }
    }

    /// Builds an allocator from the set-difference between `[0, file_size)` and `live_regions`
    /// (the header, MIME table, pointer lists, live entries/clusters, checksum trailer).
    /// `live_regions` need not be sorted or non-overlapping.
    pub fn from_live_regions(
        file_size: u64,
        live_regions: &[(u64, u64)],
        strategy: AllocStrategy,
        coalesce: bool,
    ) -> Allocator {
        let mut sorted: Vec<(u64, u64)> = live_regions.to_vec();
        sorted.sort_by_key(|r| r.0);

        let mut ranges = Vec::new();
        let mut cursor = 0u64;
        for (start, len) in sorted {
            let region_end = start + len;
            if start > cursor {
                ranges.push(FreeRange {
                    start: cursor,
                    length: start - cursor,
                });
            }
            cursor = cursor.max(region_end);
        }
        if cursor < file_size {
            ranges.push(FreeRange {
                start: cursor,
                length: file_size - cursor,
            });
        }

        let mut allocator = Allocator {
            ranges,
            file_end: file_size,
            strategy,
            coalesce,
        };
        if coalesce {
            allocator.coalesce_all();
        }
        allocator
    }

    /// Reserves `size` bytes, preferring an existing hole per the configured strategy and
    /// falling back to extending the logical end of the file. Returns the offset reserved.
    pub fn allocate(&mut self, size: u64) -> u64 {
        if size == 0 {
            return self.file_end;
        }
        let candidate = match self.strategy {
            AllocStrategy::FirstFit => self.ranges.iter().position(|r| r.length >= size),
            AllocStrategy::BestFit => self
                .ranges
                .iter()
                .enumerate()
                .filter(|(_, r)| r.length >= size)
                .min_by_key(|(_, r)| r.length)
                .map(|(i, _)| i),
        };

        match candidate {
            Some(index) => {
                let range = self.ranges[index];
                let offset = range.start;
                if range.length == size {
                    self.ranges.remove(index);
                } else {
                    self.ranges[index] = FreeRange {
                        start: range.start + size,
                        length: range.length - size,
                    };
                }
                offset
            }
            None => {
                let offset = self.file_end;
                self.file_end += size;
                offset
            }
        }
    }

    /// Returns `(offset, size)` to the free set.
    pub fn release(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        let pos = self.ranges.iter().position(|r| r.start > offset).unwrap_or(self.ranges.len());
        self.ranges.insert(pos, FreeRange { start: offset, length: size });
        if self.coalesce {
            self.coalesce_all();
        }
    }

    /// Merges every pair of adjacent (touching) ranges. `ranges` is kept sorted by `start`, so
    /// this is a single left-to-right pass.
    fn coalesce_all(&mut self) {
        if self.ranges.is_empty() {
            return;
        }
        let mut merged: Vec<FreeRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.end() == range.start => {
                    prev.length += range.length;
                }
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }

    /// The current free ranges, for debugging and tests (§4.J).
    pub fn snapshot(&self) -> Vec<FreeRange> {
        self.ranges.clone()
    }

    pub fn file_end(&self) -> u64 {
        self.file_end
    }

    /// The offset past the last byte that is actually live: `file_end`, minus a trailing free
    /// range if one runs all the way up to it. Used by the writer to flush a file no larger
    /// than its live data actually requires, instead of a watermark that only ever grows.
    pub fn live_end(&self) -> u64 {
        match self.ranges.last() {
            Some(range) if range.end() == self.file_end => range.start,
            _ => self.file_end,
        }
    }


    /// Sum of live-region sizes implied by this allocator: `file_end - total free bytes`. Used
    /// by the conservation check in §8 property 6.
    pub fn free_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.length).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_prefers_first_fit_hole_over_extending() {
        let mut alloc = Allocator::new(1000, AllocStrategy::FirstFit, true);
        alloc.release(100, 50);
        let offset = alloc.allocate(20);
        assert_eq!(offset, 100);
        assert_eq!(alloc.file_end(), 1000);
        assert_eq!(alloc.snapshot(), vec![FreeRange { start: 120, length: 30 }]);
    }

    #[test]
    fn allocate_extends_file_end_when_no_hole_fits() {
        let mut alloc = Allocator::new(1000, AllocStrategy::FirstFit, true);
        let offset = alloc.allocate(500);
        assert_eq!(offset, 1000);
        assert_eq!(alloc.file_end(), 1500);
    }

    #[test]
    fn best_fit_picks_the_tightest_hole() {
        let mut alloc = Allocator::new(1000, AllocStrategy::BestFit, false);
        alloc.release(0, 100);
        alloc.release(200, 30);
        let offset = alloc.allocate(20);
        assert_eq!(offset, 200); // the 30-byte hole is tighter than the 100-byte one
    }

    #[test]
    fn release_coalesces_adjacent_ranges() {
        let mut alloc = Allocator::new(1000, AllocStrategy::FirstFit, true);
        alloc.release(100, 50); // [100,150)
        alloc.release(150, 20); // touches the previous range -> merges to [100,170)
        assert_eq!(alloc.snapshot(), vec![FreeRange { start: 100, length: 70 }]);
    }

    #[test]
    fn from_live_regions_computes_the_gaps() {
        let alloc = Allocator::from_live_regions(
            1000,
            &[(0, 80), (80, 24), (200, 100)],
            AllocStrategy::FirstFit,
            true,
        );
        assert_eq!(
            alloc.snapshot(),
            vec![
                FreeRange { start: 104, length: 96 },
                FreeRange { start: 300, length: 700 },
            ]
        );
    }

    #[test]
    fn live_end_excludes_a_trailing_free_range() {
        let mut alloc = Allocator::new(100, AllocStrategy::FirstFit, true);
        assert_eq!(alloc.live_end(), 100);
        alloc.release(80, 20); // [80, 100) now free, touches file_end
        assert_eq!(alloc.live_end(), 80);
        alloc.release(40, 10); // an interior hole, doesn't touch file_end
        assert_eq!(alloc.live_end(), 80);
    }

    #[test]
    fn conservation_holds_after_allocate_and_release() {
        let mut alloc = Allocator::new(500, AllocStrategy::FirstFit, true);
        let file_size_before = alloc.file_end();
        let offset = alloc.allocate(40);
        alloc.release(offset, 40);
        assert_eq!(alloc.file_end(), file_size_before);
        assert_eq!(alloc.free_bytes(), 40);
    }
}
