//! PersistentCache - Disk-backable, content-hash addressed cache for rectangles.

mod index;
mod shard;

use crate::arc_cache::ArcCache;
use crate::errors::CacheError;
use index::{Index, IndexEntry};
use rfb_pixelbuffer::PixelFormat;
use shard::ShardStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PersistentCachedPixels {
    pub id: [u8; 16],
    pub pixels: Vec<u8>,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Stride in pixels (CRITICAL: pixels, not bytes)
    pub stride_pixels: usize,
    pub last_used: Instant,
}

impl PersistentCachedPixels {
    pub fn bytes(&self) -> usize {
        self.pixels.len()
    }
}

/// Snapshot of cache and ARC-engine statistics for logging/diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistentCacheStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub t1_size: usize,
    pub t2_size: usize,
    pub b1_size: usize,
    pub b2_size: usize,
    /// Entries hydrated from disk (cold -> hot) this session. Zero when no
    /// disk layer is configured.
    pub hydrated_from_disk: u64,
}

/// Disk-backed index + shard files for the cross-session variant. Absent
/// when the cache runs RAM-only (no directory configured, or disk setup
/// failed and the cache degraded to session-only behavior).
struct DiskStore {
    dir: PathBuf,
    index: Index,
    shards: ShardStore,
    disk_budget_bytes: u64,
    /// Inserts not yet written to shard/index; flushed by
    /// [`PersistentClientCache::flush_dirty_entries`].
    pending: Vec<PersistentCachedPixels>,
}

impl DiskStore {
    fn open(dir: PathBuf, disk_budget_bytes: u64, shard_mb: u64) -> std::io::Result<Self> {
        let index_path = dir.join("index.dat");
        let index = Index::load(&index_path);
        let shards = ShardStore::open(&dir, shard_mb, index.max_shard_id)?;
        Ok(Self {
            dir,
            index,
            shards,
            disk_budget_bytes,
            pending: Vec::new(),
        })
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.dat")
    }

    /// Queue an entry for the next [`Self::flush`]. A re-insert before the
    /// previous one flushed simply replaces the pending copy.
    fn queue_insert(&mut self, entry: &PersistentCachedPixels) {
        self.pending.retain(|p| p.id != entry.id);
        self.pending.push(entry.clone());
    }

    /// Drop any not-yet-flushed pending write for `id` (used when an entry
    /// is invalidated before it ever reached disk).
    fn cancel_pending(&mut self, id: &[u8; 16]) {
        self.pending.retain(|p| &p.id != id);
    }

    fn flush(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for entry in pending {
            let (shard_id, offset) = match self.shards.append(&entry.pixels) {
                Ok(loc) => loc,
                Err(e) => {
                    tracing::warn!(
                        "PersistentCache: shard write failed for id={:02x?}: {}",
                        entry.id,
                        CacheError::Disk(e)
                    );
                    continue;
                }
            };
            self.index.upsert(IndexEntry {
                key: entry.id,
                shard_id,
                offset,
                size: entry.bytes() as u32,
                width: entry.width,
                height: entry.height,
                stride_pixels: entry.stride_pixels as u32,
                pixel_format: entry.format,
                flags: 0,
            });
        }
        if count > 0 {
            self.gc();
            if let Err(e) = self.index.save(&self.index_path()) {
                tracing::warn!("{}", CacheError::Disk(e));
            }
        }
        count
    }

    /// Trim cold entries from the index once disk usage exceeds budget,
    /// down to ~90% of it. Shards are not compacted (see module docs).
    fn gc(&mut self) {
        if self.disk_budget_bytes == 0 || self.index.total_bytes() <= self.disk_budget_bytes {
            return;
        }
        let target = self.disk_budget_bytes.saturating_mul(9) / 10;
        let dropped = self.index.trim_cold_to(target);
        if !dropped.is_empty() {
            tracing::info!(
                "PersistentCache: GC trimmed {} cold entries to reclaim disk budget",
                dropped.len()
            );
        }
    }

    fn mark_cold(&mut self, id: &[u8; 16]) {
        if let Some(entry) = self.index.find_mut(id) {
            entry.set_cold(true);
            if let Err(e) = self.index.save(&self.index_path()) {
                tracing::warn!("{}", CacheError::Disk(e));
            }
        }
    }

    fn mark_hot(&mut self, id: &[u8; 16]) {
        if let Some(entry) = self.index.find_mut(id) {
            entry.set_cold(false);
        }
    }

    fn remove(&mut self, id: &[u8; 16]) {
        self.cancel_pending(id);
        if self.index.remove(id) {
            if let Err(e) = self.index.save(&self.index_path()) {
                tracing::warn!("{}", CacheError::Disk(e));
            }
        }
    }

    fn read_payload(&self, entry: &IndexEntry) -> std::io::Result<Vec<u8>> {
        self.shards.read(entry.shard_id, entry.offset, entry.size)
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("dir", &self.dir)
            .field("entries", &self.index.entries.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[derive(Debug)]
pub struct PersistentClientCache {
    map: HashMap<[u8; 16], PersistentCachedPixels>,
    max_size_mb: usize,
    current_bytes: usize,
    /// ARC eviction core tracking resident and ghost entries by cache ID.
    arc: ArcCache<[u8; 16]>,
    /// Set once a hash mismatch is observed for this session. While broken,
    /// `lookup` always reports a miss rather than risk blitting pixels that
    /// may no longer correspond to their claimed id.
    broken: bool,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
    hydrated_count: u64,
    disk: Option<DiskStore>,
}

impl PersistentClientCache {
    pub fn new(max_size_mb: usize) -> Self {
        let max_bytes = max_size_mb.saturating_mul(1024 * 1024);
        Self {
            map: HashMap::new(),
            max_size_mb,
            current_bytes: 0,
            arc: ArcCache::new(max_bytes),
            broken: false,
            hit_count: 0,
            miss_count: 0,
            eviction_count: 0,
            hydrated_count: 0,
            disk: None,
        }
    }

    /// Construct with disk-backed persistence rooted at `dir`. Disk setup
    /// failures (permissions, missing parent, corrupt index) degrade to
    /// RAM-only behavior rather than failing construction — per the wire
    /// protocol's disk-errors-are-never-fatal rule.
    pub fn with_disk(max_size_mb: usize, dir: PathBuf, disk_budget_bytes: u64, shard_mb: u64) -> Self {
        let mut cache = Self::new(max_size_mb);
        match DiskStore::open(dir.clone(), disk_budget_bytes, shard_mb) {
            Ok(disk) => {
                tracing::info!(
                    "PersistentCache: opened disk store at {} ({} indexed entries)",
                    dir.display(),
                    disk.index.entries.len()
                );
                cache.disk = Some(disk);
            }
            Err(e) => {
                tracing::warn!(
                    "PersistentCache: disk store unavailable at {} ({}), running RAM-only",
                    dir.display(),
                    CacheError::Disk(e)
                );
            }
        }
        cache
    }

    pub fn lookup(&mut self, id: &[u8; 16]) -> Option<&PersistentCachedPixels> {
        if self.broken {
            return None;
        }
        if self.map.contains_key(id) {
            self.arc.on_hit(id);
            self.hit_count += 1;
            return self.map.get(id);
        }
        if self.hydrate(id) {
            self.hit_count += 1;
            return self.map.get(id);
        }
        self.miss_count += 1;
        None
    }

    /// Read a cold entry's payload off disk into RAM and make it resident
    /// in the ARC core. Returns `false` (a miss) if there is no disk layer
    /// or the id isn't indexed.
    fn hydrate(&mut self, id: &[u8; 16]) -> bool {
        let Some(disk) = self.disk.as_mut() else {
            return false;
        };
        let Some(entry) = disk.index.find(id).cloned() else {
            return false;
        };
        let payload = match disk.read_payload(&entry) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("PersistentCache: hydration of id={:02x?} failed: {}", id, CacheError::Disk(e));
                return false;
            }
        };
        disk.mark_hot(id);
        let size = payload.len();
        let pixels = PersistentCachedPixels {
            id: *id,
            pixels: payload,
            format: entry.pixel_format,
            width: entry.width,
            height: entry.height,
            stride_pixels: entry.stride_pixels as usize,
            last_used: Instant::now(),
        };
        let evicted_ids = self.arc.insert_resident(*id, size);
        for evicted_id in evicted_ids {
            self.evict_from_ram(&evicted_id);
        }
        self.current_bytes = self.current_bytes.saturating_add(size);
        self.map.insert(*id, pixels);
        self.hydrated_count += 1;
        true
    }

    /// Opportunistic background hydration: pull up to `n` cold, currently
    /// non-resident entries into RAM. Returns the number hydrated.
    pub fn hydrate_next_batch(&mut self, n: usize) -> usize {
        let Some(disk) = self.disk.as_ref() else {
            return 0;
        };
        let candidates: Vec<[u8; 16]> = disk
            .index
            .entries
            .iter()
            .filter(|e| e.is_cold() && !self.map.contains_key(&e.key))
            .take(n)
            .map(|e| e.key)
            .collect();
        let mut count = 0;
        for id in candidates {
            if self.hydrate(&id) {
                count += 1;
            }
        }
        count
    }

    /// Write any pending (not-yet-flushed) inserts to shard + index files.
    /// Cross-session only: a no-op when no disk layer is configured.
    pub fn flush_dirty_entries(&mut self) -> usize {
        self.disk.as_mut().map(DiskStore::flush).unwrap_or(0)
    }

    fn evict_from_ram(&mut self, id: &[u8; 16]) {
        if let Some(old) = self.map.remove(id) {
            self.current_bytes = self.current_bytes.saturating_sub(old.bytes());
            self.eviction_count += 1;
        }
        if let Some(disk) = self.disk.as_mut() {
            // A RAM eviction only demotes an already-persisted entry to
            // cold; a non-persistent entry that was never written to disk
            // simply has no index entry, so `mark_cold` is a no-op for it.
            disk.mark_cold(id);
        }
    }

    /// Current statistics snapshot, mirroring `ContentCache::stats()` but
    /// also surfacing the ARC engine's list sizes for diagnostics.
    pub fn stats(&self) -> PersistentCacheStats {
        let (t1, t2, b1, b2) = self.arc.list_lengths();
        PersistentCacheStats {
            total_entries: self.map.len(),
            total_bytes: self.current_bytes,
            cache_hits: self.hit_count,
            cache_misses: self.miss_count,
            evictions: self.eviction_count,
            t1_size: t1,
            t2_size: t2,
            b1_size: b1,
            b2_size: b2,
            hydrated_from_disk: self.hydrated_count,
        }
    }

    /// Remove a poisoned entry from RAM, ghost lists, and the disk index.
    pub fn invalidate_by_content_id(&mut self, id: &[u8; 16]) {
        if let Some(old) = self.map.remove(id) {
            self.current_bytes = self.current_bytes.saturating_sub(old.bytes());
        }
        let _ = self.arc.remove_resident(id);
        if let Some(disk) = self.disk.as_mut() {
            disk.remove(id);
        }
    }

    /// Mark this session's cache broken after a hash mismatch. Cross-session
    /// only: the distinction is enforced by callers (session-only
    /// `ContentCache` entries are simply not inserted on mismatch).
    pub fn mark_broken(&mut self) {
        self.broken = true;
        tracing::error!("PersistentCache: marked broken after hash mismatch, serving misses only");
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Insert or replace an entry in the client cache.
    ///
    /// This integrates with the shared ARC core for eviction. The ARC
    /// operates purely on cache IDs and byte sizes; this layer owns the
    /// actual payloads. `persistent` controls whether the entry is ever
    /// written to disk: a `false` entry lives in RAM for this session only,
    /// even when a disk layer is configured.
    pub fn insert(&mut self, entry: PersistentCachedPixels, persistent: bool) {
        let id = entry.id;
        let size = entry.bytes();

        if let Some(old) = self.map.remove(&id) {
            self.current_bytes = self.current_bytes.saturating_sub(old.bytes());
            let _ = self.arc.remove_resident(&id);
        }

        let evicted_ids = self.arc.insert_resident(id, size);
        for evicted_id in evicted_ids {
            self.evict_from_ram(&evicted_id);
        }

        if persistent {
            if let Some(disk) = self.disk.as_mut() {
                disk.queue_insert(&entry);
            }
        }

        self.current_bytes = self.current_bytes.saturating_add(size);
        self.map.insert(id, entry);
    }

    /// Current cache usage in bytes.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    /// Configured capacity in megabytes.
    pub fn max_size_mb(&self) -> usize {
        self.max_size_mb
    }

    /// Retrieve and clear the list of cache IDs that were evicted by the ARC
    /// core since the last call.
    pub fn take_evicted_ids(&mut self) -> Vec<[u8; 16]> {
        self.arc.take_pending_evictions()
    }
}

impl Default for PersistentClientCache {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_pixelbuffer::PixelFormat;

    fn entry(id: [u8; 16], bytes: usize) -> PersistentCachedPixels {
        PersistentCachedPixels {
            id,
            pixels: vec![0u8; bytes],
            format: PixelFormat::rgb888(),
            width: 1,
            height: 1,
            stride_pixels: 1,
            last_used: Instant::now(),
        }
    }

    fn tmp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pcv3-cache-{tag}-{:x}", std::process::id()))
    }

    #[test]
    fn insert_then_lookup_hits() {
        let mut cache = PersistentClientCache::new(16);
        let id = [1u8; 16];
        cache.insert(entry(id, 64), false);
        assert!(cache.lookup(&id).is_some());
        assert_eq!(cache.current_bytes(), 64);
    }

    #[test]
    fn lookup_miss_returns_none() {
        let mut cache = PersistentClientCache::new(16);
        assert!(cache.lookup(&[9u8; 16]).is_none());
    }

    #[test]
    fn invalidate_removes_entry_and_frees_bytes() {
        let mut cache = PersistentClientCache::new(16);
        let id = [2u8; 16];
        cache.insert(entry(id, 128), false);
        cache.invalidate_by_content_id(&id);
        assert!(cache.lookup(&id).is_none());
        assert_eq!(cache.current_bytes(), 0);
    }

    #[test]
    fn mark_broken_forces_misses_even_for_resident_entries() {
        let mut cache = PersistentClientCache::new(16);
        let id = [3u8; 16];
        cache.insert(entry(id, 32), false);
        assert!(!cache.is_broken());
        cache.mark_broken();
        assert!(cache.is_broken());
        assert!(cache.lookup(&id).is_none());
    }

    #[test]
    fn reinsert_replaces_existing_entry_without_double_counting_bytes() {
        let mut cache = PersistentClientCache::new(16);
        let id = [4u8; 16];
        cache.insert(entry(id, 64), false);
        cache.insert(entry(id, 96), false);
        assert_eq!(cache.current_bytes(), 96);
    }

    #[test]
    fn stats_reflect_hits_misses_and_entries() {
        let mut cache = PersistentClientCache::new(16);
        let id = [5u8; 16];
        cache.insert(entry(id, 64), false);
        assert!(cache.lookup(&id).is_some());
        assert!(cache.lookup(&[6u8; 16]).is_none());

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_bytes, 64);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn insert_beyond_capacity_evicts_and_reports_evicted_ids() {
        // 1 MB capacity; each entry is 512 KiB so a third insert must evict.
        let mut cache = PersistentClientCache::new(1);
        let a = [10u8; 16];
        let b = [11u8; 16];
        let c = [12u8; 16];
        let half_mb = 512 * 1024;
        cache.insert(entry(a, half_mb), false);
        cache.insert(entry(b, half_mb), false);
        cache.insert(entry(c, half_mb), false);

        let evicted = cache.take_evicted_ids();
        assert!(!evicted.is_empty());
        assert!(cache.current_bytes() <= 1024 * 1024);
    }

    #[test]
    fn persistent_insert_survives_ram_eviction_via_disk_hydration() {
        let dir = tmp_dir("hydrate");
        let mut cache = PersistentClientCache::with_disk(1, dir.clone(), 4 * 1024 * 1024, 1);
        let id = [20u8; 16];
        cache.insert(entry(id, 64), true);
        assert_eq!(cache.flush_dirty_entries(), 1);

        // Evict it from RAM without touching the disk index (simulates an
        // ARC eviction elsewhere in a long session).
        let _ = cache.arc.remove_resident(&id);
        cache.map.remove(&id);
        cache.current_bytes = 0;
        if let Some(disk) = cache.disk.as_mut() {
            disk.mark_cold(&id);
        }

        assert!(cache.lookup(&id).is_some());
        assert_eq!(cache.stats().hydrated_from_disk, 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn non_persistent_insert_is_never_written_to_disk() {
        let dir = tmp_dir("nonpersistent");
        let mut cache = PersistentClientCache::with_disk(1, dir.clone(), 4 * 1024 * 1024, 1);
        let id = [21u8; 16];
        cache.insert(entry(id, 64), false);
        assert_eq!(cache.flush_dirty_entries(), 0);
        assert!(cache
            .disk
            .as_ref()
            .unwrap()
            .index
            .find(&id)
            .is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reopening_disk_store_recovers_index_across_process_restarts() {
        let dir = tmp_dir("reopen");
        let id = [22u8; 16];
        {
            let mut cache = PersistentClientCache::with_disk(1, dir.clone(), 4 * 1024 * 1024, 1);
            cache.insert(entry(id, 64), true);
            assert_eq!(cache.flush_dirty_entries(), 1);
        }
        // Fresh cache, same directory: nothing is resident yet, but the
        // index entry survived the "restart" and a lookup hydrates it.
        let mut cache = PersistentClientCache::with_disk(1, dir.clone(), 4 * 1024 * 1024, 1);
        assert_eq!(cache.stats().total_entries, 0);
        assert!(cache.lookup(&id).is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalidate_removes_disk_index_entry_too() {
        let dir = tmp_dir("invalidate-disk");
        let mut cache = PersistentClientCache::with_disk(1, dir.clone(), 4 * 1024 * 1024, 1);
        let id = [23u8; 16];
        cache.insert(entry(id, 64), true);
        assert_eq!(cache.flush_dirty_entries(), 1);
        cache.invalidate_by_content_id(&id);
        assert!(cache.disk.as_ref().unwrap().index.find(&id).is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
