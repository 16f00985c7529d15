//! Append-only shard files backing persistent cache payloads.
//!
//! Each shard is a flat file of concatenated row-major pixel payloads named
//! `shard_NNNN.dat` (zero-padded). Shards are never rewritten in place:
//! superseded or evicted payloads simply become unreachable bytes until the
//! whole shard is dropped (out of scope for steady-state operation; see the
//! compaction non-goal).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct ShardStore {
    dir: PathBuf,
    shard_bytes: u64,
    current_id: u32,
    current_size: u64,
    current_file: Option<File>,
}

impl ShardStore {
    /// Open (creating if needed) the shard directory, resuming append at
    /// `starting_shard_id` — normally the index's `max_shard_id`.
    pub fn open(dir: &Path, shard_mb: u64, starting_shard_id: u32) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        set_dir_permissions(dir)?;
        let mut store = Self {
            dir: dir.to_path_buf(),
            shard_bytes: shard_mb.max(1) * 1024 * 1024,
            current_id: starting_shard_id,
            current_size: 0,
            current_file: None,
        };
        store.current_size = fs::metadata(store.shard_path(starting_shard_id))
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(store)
    }

    fn shard_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("shard_{id:04}.dat"))
    }

    fn current_file(&mut self) -> io::Result<&mut File> {
        if self.current_file.is_none() {
            let path = self.shard_path(self.current_id);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .read(true)
                .open(&path)?;
            set_file_permissions(&file)?;
            self.current_file = Some(file);
        }
        Ok(self.current_file.as_mut().expect("just populated"))
    }

    /// Append `payload`, rolling over to a new shard file first if it
    /// wouldn't fit in the current one. Returns `(shard_id, offset)` for
    /// the index entry.
    pub fn append(&mut self, payload: &[u8]) -> io::Result<(u32, u64)> {
        if self.current_size > 0 && self.current_size + payload.len() as u64 > self.shard_bytes {
            self.current_id += 1;
            self.current_size = 0;
            self.current_file = None;
        }
        let shard_id = self.current_id;
        let offset = self.current_size;
        let file = self.current_file()?;
        file.write_all(payload)?;
        file.flush()?;
        self.current_size += payload.len() as u64;
        Ok((shard_id, offset))
    }

    /// Read back a previously-appended payload.
    pub fn read(&self, shard_id: u32, offset: u64, size: u32) -> io::Result<Vec<u8>> {
        let mut file = File::open(self.shard_path(shard_id))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn current_shard_id(&self) -> u32 {
        self.current_id
    }
}

#[cfg(unix)]
fn set_file_permissions(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_file_permissions(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_dir_permissions(_dir: &Path) -> io::Result<()> {
    Ok(())
}
