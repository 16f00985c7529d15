//! PCV3 on-disk index format for the cross-session persistent cache.
//!
//! Layout: a fixed header followed by one fixed-size record per entry. The
//! index never embeds pixel payloads; those live in shard files addressed
//! by `(shard_id, offset, size)`. The whole file is rewritten on save —
//! entry counts here are bounded by the disk/RAM budgets (thousands, not
//! millions), so an O(n) rewrite is simpler and safer than patching records
//! in place.

use rfb_pixelbuffer::PixelFormat;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const MAGIC: [u8; 4] = *b"PCV3";
const VERSION: u32 = 3;
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 8 + 4 + 8; // magic, version, count, created, last_access, max_shard, reserved
const PIXEL_FORMAT_LEN: usize = 24;
const ENTRY_LEN: usize = 16 + 4 + 8 + 4 + 4 + 4 + 4 + PIXEL_FORMAT_LEN + 1;

/// Entry has been evicted from RAM; the payload is on disk only.
pub const FLAG_COLD: u8 = 0b0000_0001;

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub key: [u8; 16],
    pub shard_id: u32,
    pub offset: u64,
    pub size: u32,
    pub width: u32,
    pub height: u32,
    pub stride_pixels: u32,
    pub pixel_format: PixelFormat,
    pub flags: u8,
}

impl IndexEntry {
    pub fn is_cold(&self) -> bool {
        self.flags & FLAG_COLD != 0
    }

    pub fn set_cold(&mut self, cold: bool) {
        if cold {
            self.flags |= FLAG_COLD;
        } else {
            self.flags &= !FLAG_COLD;
        }
    }

    fn encode(&self) -> [u8; ENTRY_LEN] {
        let mut buf = [0u8; ENTRY_LEN];
        buf[0..16].copy_from_slice(&self.key);
        buf[16..20].copy_from_slice(&self.shard_id.to_be_bytes());
        buf[20..28].copy_from_slice(&self.offset.to_be_bytes());
        buf[28..32].copy_from_slice(&self.size.to_be_bytes());
        buf[32..36].copy_from_slice(&self.width.to_be_bytes());
        buf[36..40].copy_from_slice(&self.height.to_be_bytes());
        buf[40..44].copy_from_slice(&self.stride_pixels.to_be_bytes());
        buf[44..44 + PIXEL_FORMAT_LEN].copy_from_slice(&encode_pixel_format(&self.pixel_format));
        buf[44 + PIXEL_FORMAT_LEN] = self.flags;
        buf
    }

    fn decode(buf: &[u8; ENTRY_LEN]) -> io::Result<Self> {
        let pf_bytes: [u8; PIXEL_FORMAT_LEN] = buf[44..44 + PIXEL_FORMAT_LEN]
            .try_into()
            .expect("slice length matches PIXEL_FORMAT_LEN");
        Ok(Self {
            key: buf[0..16].try_into().expect("slice length matches key"),
            shard_id: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            offset: u64::from_be_bytes(buf[20..28].try_into().unwrap()),
            size: u32::from_be_bytes(buf[28..32].try_into().unwrap()),
            width: u32::from_be_bytes(buf[32..36].try_into().unwrap()),
            height: u32::from_be_bytes(buf[36..40].try_into().unwrap()),
            stride_pixels: u32::from_be_bytes(buf[40..44].try_into().unwrap()),
            pixel_format: decode_pixel_format(&pf_bytes),
            flags: buf[44 + PIXEL_FORMAT_LEN],
        })
    }
}

fn encode_pixel_format(pf: &PixelFormat) -> [u8; PIXEL_FORMAT_LEN] {
    let mut buf = [0u8; PIXEL_FORMAT_LEN];
    buf[0] = pf.bits_per_pixel;
    buf[1] = pf.depth;
    buf[2] = pf.big_endian as u8;
    buf[3] = pf.true_color as u8;
    buf[4..6].copy_from_slice(&pf.red_max.to_be_bytes());
    buf[6..8].copy_from_slice(&pf.green_max.to_be_bytes());
    buf[8..10].copy_from_slice(&pf.blue_max.to_be_bytes());
    buf[10] = pf.red_shift;
    buf[11] = pf.green_shift;
    buf[12] = pf.blue_shift;
    // buf[13..24] reserved, left zeroed
    buf
}

fn decode_pixel_format(buf: &[u8; PIXEL_FORMAT_LEN]) -> PixelFormat {
    PixelFormat {
        bits_per_pixel: buf[0],
        depth: buf[1],
        big_endian: buf[2] != 0,
        true_color: buf[3] != 0,
        red_max: u16::from_be_bytes(buf[4..6].try_into().unwrap()),
        green_max: u16::from_be_bytes(buf[6..8].try_into().unwrap()),
        blue_max: u16::from_be_bytes(buf[8..10].try_into().unwrap()),
        red_shift: buf[10],
        green_shift: buf[11],
        blue_shift: buf[12],
    }
}

/// In-memory view of `index.dat`.
#[derive(Debug)]
pub struct Index {
    pub entries: Vec<IndexEntry>,
    pub max_shard_id: u32,
    pub created_at: u64,
}

impl Index {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_shard_id: 0,
            created_at: unix_now(),
        }
    }

    /// Load `path`, returning a fresh empty index on any parse failure —
    /// disk corruption never fails the cache, it just starts over. The
    /// unreadable file is renamed aside rather than silently overwritten.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(index) => index,
            Err(e) => {
                if path.exists() {
                    tracing::warn!(
                        "PersistentCache: index {} unreadable ({}), starting fresh",
                        path.display(),
                        e
                    );
                    let _ = fs::rename(path, path.with_extension("dat.corrupt"));
                }
                Self::new()
            }
        }
    }

    fn try_load(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)?;
        if header[0..4] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad PCV3 magic"));
        }
        let version = u32::from_be_bytes(header[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported persistent cache index version {version}"),
            ));
        }
        let entry_count = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
        let created_at = u64::from_be_bytes(header[12..20].try_into().unwrap());
        let max_shard_id = u32::from_be_bytes(header[28..32].try_into().unwrap());

        let mut entries = Vec::with_capacity(entry_count.min(1 << 20));
        let mut rec = [0u8; ENTRY_LEN];
        for _ in 0..entry_count {
            file.read_exact(&mut rec)?;
            entries.push(IndexEntry::decode(&rec)?);
        }
        Ok(Self {
            entries,
            max_shard_id,
            created_at,
        })
    }

    /// Rewrite the index in full via temp-file-then-rename, so a crash
    /// mid-write never leaves a half-written index on disk.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("dat.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            let mut header = [0u8; HEADER_LEN];
            header[0..4].copy_from_slice(&MAGIC);
            header[4..8].copy_from_slice(&VERSION.to_be_bytes());
            header[8..12].copy_from_slice(&(self.entries.len() as u32).to_be_bytes());
            header[12..20].copy_from_slice(&self.created_at.to_be_bytes());
            header[20..28].copy_from_slice(&unix_now().to_be_bytes());
            header[28..32].copy_from_slice(&self.max_shard_id.to_be_bytes());
            file.write_all(&header)?;
            for entry in &self.entries {
                file.write_all(&entry.encode())?;
            }
            file.sync_all()?;
            set_index_permissions(&file)?;
        }
        fs::rename(&tmp_path, path)
    }

    pub fn find(&self, key: &[u8; 16]) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }

    pub fn find_mut(&mut self, key: &[u8; 16]) -> Option<&mut IndexEntry> {
        self.entries.iter_mut().find(|e| &e.key == key)
    }

    pub fn remove(&mut self, key: &[u8; 16]) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.key != key);
        self.entries.len() != before
    }

    pub fn upsert(&mut self, entry: IndexEntry) {
        self.max_shard_id = self.max_shard_id.max(entry.shard_id);
        if let Some(slot) = self.find_mut(&entry.key) {
            *slot = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Total payload bytes referenced by live entries. Shards may hold
    /// additional stale bytes behind superseded entries since they are
    /// never rewritten in place; this is the index's view, not `du`.
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size as u64).sum()
    }

    /// Drop cold entries in insertion (oldest-first) order until
    /// `total_bytes()` is at or below `target_bytes`. Hot entries are never
    /// trimmed this way. Returns the dropped keys.
    pub fn trim_cold_to(&mut self, target_bytes: u64) -> Vec<[u8; 16]> {
        let mut removed = Vec::new();
        let mut i = 0;
        while self.total_bytes() > target_bytes && i < self.entries.len() {
            if self.entries[i].is_cold() {
                removed.push(self.entries[i].key);
                self.entries.remove(i);
            } else {
                i += 1;
            }
        }
        removed
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn set_index_permissions(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_index_permissions(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_pixelbuffer::PixelFormat;

    fn entry(key: [u8; 16], shard_id: u32, offset: u64, size: u32) -> IndexEntry {
        IndexEntry {
            key,
            shard_id,
            offset,
            size,
            width: 8,
            height: 8,
            stride_pixels: 8,
            pixel_format: PixelFormat::rgb888(),
            flags: 0,
        }
    }

    #[test]
    fn save_then_load_round_trips_entries() {
        let dir = std::env::temp_dir().join(format!("pcv3-test-{:x}", std::process::id()));
        let path = dir.join("index.dat");
        let mut index = Index::new();
        index.upsert(entry([1u8; 16], 0, 0, 1024));
        index.upsert(entry([2u8; 16], 0, 1024, 2048));
        index.save(&path).unwrap();

        let loaded = Index::load(&path);
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.find(&[2u8; 16]).unwrap().offset, 1024);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_missing_file_starts_fresh() {
        let dir = std::env::temp_dir().join(format!("pcv3-missing-{:x}", std::process::id()));
        let index = Index::load(&dir.join("index.dat"));
        assert!(index.entries.is_empty());
    }

    #[test]
    fn load_corrupt_file_starts_fresh_and_renames_it() {
        let dir = std::env::temp_dir().join(format!("pcv3-corrupt-{:x}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("index.dat");
        fs::write(&path, b"not a pcv3 index").unwrap();

        let index = Index::load(&path);
        assert!(index.entries.is_empty());
        assert!(!path.exists());
        assert!(path.with_extension("dat.corrupt").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn trim_cold_to_drops_oldest_cold_entries_first() {
        let mut index = Index::new();
        let mut a = entry([1u8; 16], 0, 0, 1000);
        a.set_cold(true);
        let mut b = entry([2u8; 16], 0, 1000, 1000);
        b.set_cold(true);
        let mut c = entry([3u8; 16], 0, 2000, 1000);
        c.set_cold(false); // hot, must survive trimming
        index.upsert(a);
        index.upsert(b);
        index.upsert(c);

        let removed = index.trim_cold_to(1200);
        assert_eq!(removed, vec![[1u8; 16]]);
        assert!(index.find(&[1u8; 16]).is_none());
        assert!(index.find(&[2u8; 16]).is_some());
        assert!(index.find(&[3u8; 16]).is_some());
    }
}
