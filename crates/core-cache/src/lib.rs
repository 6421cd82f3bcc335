//! Content-addressed cache of already-shaped sub-segments.
//!
//! Keys are glyph-id strings as produced by cmap lookup, before any rule
//! rewriting. The structure is two-level: a fixed-length prefix selects a
//! bucket, the remaining suffix is matched linearly inside it (bounded, so
//! unique suffixes cannot flood a bucket). Accounting is access-based:
//! only hits count, and eviction ranks entries by `(access_count,
//! last_access)`.

use ahash::RandomState;
use core_types::{GlyphId, Position};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Glyph ids consumed by the first-level prefix.
pub const PREFIX_LENGTH: usize = 2;
/// Purge threshold divisor: entries accessed less than
/// `total / (PURGE_FACTOR * max_segments)` times are discarded.
pub const PURGE_FACTOR: u64 = 5;
/// Cap on entries sharing one prefix.
pub const MAX_SUFFIX_COUNT: usize = 15;
/// Sub-segments longer than this are not cached.
pub const MAX_CACHED_SEG: usize = 16;

/// Character provenance snapshotted alongside the shaped result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCharInfo {
    pub unicode: u32,
    pub before: usize,
    pub after: usize,
}

/// One shaped slot, flattened for replay into a fresh segment. Attachment
/// links are stored as indices within the cached run; collision offsets
/// travel along so repositioning reproduces the shaped origins.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSlot {
    pub gid: GlyphId,
    pub original: usize,
    pub before: usize,
    pub after: usize,
    pub origin: Position,
    pub advance: Position,
    pub offset: Position,
    pub parent: Option<usize>,
    pub attach_offset: Position,
    pub attach_with: Position,
    pub user: Vec<i16>,
}

/// A shaped sub-segment keyed by its input glyph string.
#[derive(Debug, Clone)]
pub struct SegCacheEntry {
    glyphs: Vec<GlyphId>,
    char_info: Vec<CachedCharInfo>,
    slots: Vec<CachedSlot>,
    access_count: u64,
    last_access: u64,
}

impl SegCacheEntry {
    pub fn glyph_length(&self) -> usize {
        self.glyphs.len()
    }

    pub fn char_info(&self) -> &[CachedCharInfo] {
        &self.char_info
    }

    pub fn slots(&self) -> &[CachedSlot] {
        &self.slots
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    /// Strict eviction rank: least-accessed first, ties broken by
    /// staleness.
    fn rank(&self) -> (u64, u64) {
        (self.access_count, self.last_access)
    }

    fn accessed(&mut self, cache_time: u64) {
        self.access_count += 1;
        self.last_access = cache_time;
    }
}

#[derive(Debug, Default)]
struct PrefixEntry {
    entries: Vec<SegCacheEntry>,
}

/// The segment cache for one face + feature combination.
pub struct SegCache {
    prefixes: HashMap<[GlyphId; PREFIX_LENGTH], PrefixEntry, RandomState>,
    max_segments: usize,
    segment_count: usize,
    total_accesses: u64,
    cache_time: u64,
}

fn prefix_of(glyphs: &[GlyphId]) -> [GlyphId; PREFIX_LENGTH] {
    let mut key = [0u16; PREFIX_LENGTH];
    for (k, &g) in key.iter_mut().zip(glyphs) {
        *k = g;
    }
    key
}

impl SegCache {
    pub fn new(max_segments: usize) -> Self {
        Self {
            prefixes: HashMap::default(),
            max_segments: max_segments.max(1),
            segment_count: 0,
            total_accesses: 0,
            cache_time: 0,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// Total number of hits served since creation.
    pub fn total_access_count(&self) -> u64 {
        self.total_accesses
    }

    /// Look up a shaped result. Hits bump the entry's access statistics
    /// and the cache clock; misses leave all accounting untouched.
    pub fn find(&mut self, glyphs: &[GlyphId]) -> Option<&SegCacheEntry> {
        if glyphs.is_empty() || glyphs.len() > MAX_CACHED_SEG {
            return None;
        }
        let bucket = self.prefixes.get_mut(&prefix_of(glyphs))?;
        let entry = bucket.entries.iter_mut().find(|e| e.glyphs == glyphs)?;
        self.cache_time += 1;
        self.total_accesses += 1;
        entry.accessed(self.cache_time);
        trace!(target: "cache", len = glyphs.len(), "hit");
        Some(entry)
    }

    /// Insert a freshly shaped sub-segment. Returns false when the key is
    /// uncacheable, already present, or its bucket is full. Insertion does
    /// not count as an access.
    pub fn insert(
        &mut self,
        glyphs: &[GlyphId],
        char_info: Vec<CachedCharInfo>,
        slots: Vec<CachedSlot>,
    ) -> bool {
        if glyphs.is_empty() || glyphs.len() > MAX_CACHED_SEG {
            return false;
        }
        let key = prefix_of(glyphs);
        if let Some(bucket) = self.prefixes.get(&key) {
            if bucket.entries.iter().any(|e| e.glyphs == glyphs) {
                return false;
            }
            if bucket.entries.len() >= MAX_SUFFIX_COUNT {
                debug!(target: "cache", "prefix bucket full");
                return false;
            }
        }
        if self.segment_count >= self.max_segments {
            self.purge();
            while self.segment_count >= self.max_segments {
                if !self.evict_min_rank() {
                    break;
                }
            }
        }
        self.prefixes
            .entry(key)
            .or_default()
            .entries
            .push(SegCacheEntry {
                glyphs: glyphs.to_vec(),
                char_info,
                slots,
                access_count: 0,
                last_access: 0,
            });
        self.segment_count += 1;
        trace!(target: "cache", len = glyphs.len(), total = self.segment_count, "insert");
        true
    }

    /// Drop entries whose use is negligible relative to total traffic.
    fn purge(&mut self) {
        let threshold = self.total_accesses / (PURGE_FACTOR * self.max_segments as u64);
        if threshold == 0 {
            return;
        }
        let mut removed = 0usize;
        for bucket in self.prefixes.values_mut() {
            let before = bucket.entries.len();
            bucket.entries.retain(|e| e.access_count >= threshold);
            removed += before - bucket.entries.len();
        }
        self.prefixes.retain(|_, b| !b.entries.is_empty());
        self.segment_count -= removed;
        if removed > 0 {
            debug!(target: "cache", removed, threshold, "purged");
        }
    }

    /// Remove the single lowest-ranked entry; used when the purge formula
    /// frees nothing but the cache is at capacity.
    fn evict_min_rank(&mut self) -> bool {
        let mut victim: Option<([GlyphId; PREFIX_LENGTH], usize, (u64, u64))> = None;
        for (key, bucket) in &self.prefixes {
            for (i, e) in bucket.entries.iter().enumerate() {
                let rank = e.rank();
                if victim.as_ref().is_none_or(|(_, _, best)| rank < *best) {
                    victim = Some((*key, i, rank));
                }
            }
        }
        let Some((key, i, _)) = victim else {
            return false;
        };
        let bucket = self.prefixes.get_mut(&key).expect("victim bucket");
        bucket.entries.remove(i);
        if bucket.entries.is_empty() {
            self.prefixes.remove(&key);
        }
        self.segment_count -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry_for(glyphs: &[GlyphId]) -> (Vec<CachedCharInfo>, Vec<CachedSlot>) {
        let chars = glyphs
            .iter()
            .enumerate()
            .map(|(i, &g)| CachedCharInfo {
                unicode: u32::from(g),
                before: i,
                after: i,
            })
            .collect();
        let slots = glyphs
            .iter()
            .enumerate()
            .map(|(i, &g)| CachedSlot {
                gid: g,
                original: i,
                before: i,
                after: i,
                origin: Position::new(10.0 * i as f32, 0.0),
                advance: Position::new(10.0, 0.0),
                offset: Position::zero(),
                parent: None,
                attach_offset: Position::zero(),
                attach_with: Position::zero(),
                user: Vec::new(),
            })
            .collect();
        (chars, slots)
    }

    fn insert(cache: &mut SegCache, glyphs: &[GlyphId]) -> bool {
        let (chars, slots) = entry_for(glyphs);
        cache.insert(glyphs, chars, slots)
    }

    #[test]
    fn hit_counts_miss_does_not() {
        let mut cache = SegCache::new(10);
        assert!(cache.find(&[1, 2]).is_none());
        assert_eq!(cache.total_access_count(), 0);
        assert!(insert(&mut cache, &[1, 2]));
        assert_eq!(cache.total_access_count(), 0);
        assert!(cache.find(&[1, 2]).is_some());
        assert_eq!(cache.total_access_count(), 1);
        assert_eq!(cache.segment_count(), 1);
    }

    #[test]
    fn distinct_suffixes_share_a_prefix_bucket() {
        let mut cache = SegCache::new(64);
        assert!(insert(&mut cache, &[1, 2, 3]));
        assert!(insert(&mut cache, &[1, 2, 4]));
        assert!(insert(&mut cache, &[1, 2]));
        assert_eq!(cache.segment_count(), 3);
        assert_eq!(cache.find(&[1, 2, 4]).unwrap().slots().len(), 3);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut cache = SegCache::new(10);
        assert!(insert(&mut cache, &[1, 2]));
        assert!(!insert(&mut cache, &[1, 2]));
        assert_eq!(cache.segment_count(), 1);
    }

    #[test]
    fn oversized_and_empty_keys_not_cached() {
        let mut cache = SegCache::new(10);
        let long: Vec<GlyphId> = (0..(MAX_CACHED_SEG as u16 + 1)).collect();
        assert!(!insert(&mut cache, &long));
        assert!(!insert(&mut cache, &[]));
        assert_eq!(cache.segment_count(), 0);
    }

    #[test]
    fn bucket_suffix_cap_enforced() {
        let mut cache = SegCache::new(64);
        for i in 0..(MAX_SUFFIX_COUNT as u16 + 3) {
            insert(&mut cache, &[7, 7, i]);
        }
        assert_eq!(cache.segment_count(), MAX_SUFFIX_COUNT);
    }

    #[test]
    fn capacity_eviction_prefers_least_used() {
        let mut cache = SegCache::new(3);
        insert(&mut cache, &[1]);
        insert(&mut cache, &[2]);
        insert(&mut cache, &[3]);
        // Touch two entries so the third is the cold one.
        cache.find(&[1]);
        cache.find(&[2]);
        insert(&mut cache, &[4]);
        assert_eq!(cache.segment_count(), 3);
        assert!(cache.find(&[3]).is_none());
        assert!(cache.find(&[1]).is_some());
    }

    #[test]
    fn rank_orders_by_count_then_staleness() {
        let mut cache = SegCache::new(2);
        insert(&mut cache, &[1]);
        insert(&mut cache, &[2]);
        // Equal counts: the earlier-touched entry is staler and evicts.
        cache.find(&[1]);
        cache.find(&[2]);
        insert(&mut cache, &[3]);
        assert!(cache.find(&[1]).is_none());
        assert!(cache.find(&[2]).is_some());
    }

    #[test]
    fn segcache_access_accounting_scenario() {
        // The canonical store-and-reuse sequence: ten distinct words, some
        // reused across strings, then one more word at capacity.
        let words: [&[GlyphId]; 10] = [
            &[10],
            &[10, 10],
            &[10, 10, 10],
            &[10, 10, 10, 11],
            &[10, 10, 10, 12],
            &[11],
            &[12],
            &[10, 10, 10, 13],
            &[10, 10, 10, 14],
            &[10, 10, 10, 10],
        ];
        let mut cache = SegCache::new(10);
        // Shaping pass: each word is looked up once, inserted on miss.
        // "a" recurs in "a b c", "aaa" in "aaa ", "aa" in " aa".
        let shaping_order: Vec<&[GlyphId]> = vec![
            &[10],
            &[10, 10],
            &[10, 10, 10],
            &[10, 10, 10, 11],
            &[10, 10, 10, 12],
            &[10],
            &[11],
            &[12],
            &[10, 10, 10],
            &[10, 10],
            &[10, 10, 10, 13],
            &[10, 10, 10, 14],
            &[10, 10, 10, 10],
        ];
        for w in shaping_order {
            if cache.find(w).is_none() {
                insert(&mut cache, w);
            }
        }
        assert_eq!(cache.segment_count(), 10);
        assert_eq!(cache.total_access_count(), 3);
        // Verification pass: every word probed once more.
        let mut probes = 0;
        for w in &words {
            assert!(cache.find(w).is_some());
            probes += 1;
        }
        assert_eq!(probes, 10);
        assert_eq!(cache.total_access_count(), 13);
    }
}
