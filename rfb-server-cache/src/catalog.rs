//! Process-wide content catalog and per-client cache state.
//!
//! [`ServerCatalog`] is the server's half of the content-addressable cache
//! protocol: one instance per server process, shared across every connected
//! client, deciding for each candidate rectangle whether it has been seen
//! before and whether *this* client already holds the bytes. The per-client
//! "does this client know about id X" bookkeeping lives separately in
//! [`ClientCacheState`], one per connection.

use crate::config::ServerCacheConfig;
use rfb_common::Rect;
use rfb_encodings::hashing::content_hash;
use rfb_encodings::ArcCache;
use rfb_pixelbuffer::PixelBuffer;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Outcome of [`ServerCatalog::try_reference`] for a candidate rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The client already knows this id; emit a `CachedRect` reference.
    SendRef(u64),
    /// The content is known to the server but not yet to this client;
    /// queue a `CachedRectInit` for the end of this frame.
    QueueInit(u64),
    /// Not eligible for caching (too small, or never seen before); encode
    /// the rectangle normally.
    NoCache,
}

/// A rectangle queued for `CachedRectInit` delivery at the end of the
/// current frame, alongside the id the encoder should claim for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInit {
    pub id: u64,
    pub rect: Rect,
}

/// Per-connection cache bookkeeping: which ids this client is known to
/// hold, and which rectangles are queued to become `CachedRectInit`
/// payloads at the end of the frame currently being encoded.
#[derive(Debug, Default)]
pub struct ClientCacheState {
    known_ids: HashSet<u64>,
    pending_init: VecDeque<PendingInit>,
    /// `(canonicalHash, lossyHash)` pairs this client has reported, so a
    /// lossily-seeded entry can still be recognized as a hit.
    lossy_aliases: std::collections::HashMap<u64, u64>,
}

impl ClientCacheState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if this client is already known to hold `id`, either directly
    /// or via a canonical hash it was previously aliased to through a
    /// `LossyHashReport`.
    pub fn knows(&self, id: u64) -> bool {
        self.known_ids.contains(&id)
            || self
                .lossy_aliases
                .get(&id)
                .is_some_and(|canonical| self.known_ids.contains(canonical))
    }

    /// Record a `(canonicalHash, lossyHash)` pair reported via
    /// `LossyHashReport`: the client decoded an init sent under
    /// `canonical` but computed `lossy` from the resulting pixels. The
    /// client still holds usable content for `canonical`, so it stays
    /// known; `lossy` is remembered only so a future alias report citing
    /// the same pair is idempotent.
    pub fn note_lossy_alias(&mut self, canonical: u64, lossy: u64) {
        self.lossy_aliases.insert(lossy, canonical);
        self.known_ids.insert(canonical);
    }

    /// Queue `(id, rect)` for delivery as a `CachedRectInit` at the end of
    /// the current frame.
    pub fn queue_init(&mut self, id: u64, rect: Rect) {
        self.pending_init.push_back(PendingInit { id, rect });
    }

    /// Drain every rectangle queued for `CachedRectInit` delivery this
    /// frame. Call at end-of-frame, before `FramebufferUpdateEnd`.
    pub fn take_pending_inits(&mut self) -> Vec<PendingInit> {
        self.pending_init.drain(..).collect()
    }

    /// Number of rectangles currently queued for init delivery.
    pub fn pending_init_len(&self) -> usize {
        self.pending_init.len()
    }

    /// Called after the server has emitted an init rectangle for `id` to
    /// this client: marks it as known so future references to the same
    /// content become `SendRef`.
    pub fn note_init(&mut self, id: u64) {
        self.known_ids.insert(id);
    }

    /// Called when the client reports local evictions (`CacheEviction`):
    /// these ids must be re-sent as full init rectangles if referenced
    /// again.
    pub fn note_eviction(&mut self, ids: &[u64]) {
        for id in ids {
            self.known_ids.remove(id);
        }
    }

    /// Drop all per-client state, e.g. on a framebuffer resize.
    pub fn clear(&mut self) {
        self.known_ids.clear();
        self.pending_init.clear();
        self.lossy_aliases.clear();
    }

    pub fn known_id_count(&self) -> usize {
        self.known_ids.len()
    }
}

/// Snapshot of catalog-wide counters, exposed for logging/monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogStats {
    pub known_content_entries: usize,
    pub send_ref_count: u64,
    pub queue_init_count: u64,
    pub no_cache_count: u64,
    pub t1_size: usize,
    pub t2_size: usize,
    pub b1_size: usize,
    pub b2_size: usize,
}

struct CatalogInner {
    arc: ArcCache<u64>,
    send_ref_count: u64,
    queue_init_count: u64,
    no_cache_count: u64,
}

/// Process-wide catalog of content this server has already encoded at
/// least once, shared read-write across every connection. Decides, per
/// candidate rectangle, whether a client can be sent a reference instead
/// of a full payload.
///
/// Ids are the rectangle's canonical content hash (see
/// [`rfb_encodings::hashing::content_hash`]) — there is no separate
/// counter-based id space; see this crate's `DESIGN.md` entry "Open
/// question resolution" for why.
pub struct ServerCatalog {
    config: ServerCacheConfig,
    inner: Mutex<CatalogInner>,
}

impl ServerCatalog {
    pub fn new(config: ServerCacheConfig) -> Self {
        let arc = ArcCache::new(config.ram_budget_bytes());
        Self {
            config,
            inner: Mutex::new(CatalogInner {
                arc,
                send_ref_count: 0,
                queue_init_count: 0,
                no_cache_count: 0,
            }),
        }
    }

    /// Decide whether `rect`'s current pixel content is cacheable, and if
    /// so, whether `client` already holds it.
    ///
    /// Steps (see spec): reject rects below `min_rect_size`; compute the
    /// content hash; consult (and update) the process-wide ARC instance;
    /// branch on client knowledge.
    pub fn try_reference(
        &self,
        rect: Rect,
        pb: &dyn PixelBuffer,
        client: &mut ClientCacheState,
    ) -> Decision {
        if !self.config.enabled {
            return Decision::NoCache;
        }
        if rect.area() < self.config.min_rect_size as u64 {
            let mut inner = self.inner.lock().expect("catalog mutex poisoned");
            inner.no_cache_count += 1;
            return Decision::NoCache;
        }

        let mut stride = 0usize;
        let Some(pixels) = pb.get_buffer(rect, &mut stride) else {
            return Decision::NoCache;
        };
        let id = content_hash(
            pixels,
            pb.pixel_format(),
            rect.width,
            rect.height,
            stride,
        );
        if id == 0 {
            // Reserved "no content"/empty-rect id; never cacheable.
            let mut inner = self.inner.lock().expect("catalog mutex poisoned");
            inner.no_cache_count += 1;
            return Decision::NoCache;
        }

        let mut inner = self.inner.lock().expect("catalog mutex poisoned");
        let already_known_content = inner.arc.contains_resident(&id);

        if already_known_content {
            inner.arc.on_hit(&id);
            if client.knows(id) {
                inner.send_ref_count += 1;
                Decision::SendRef(id)
            } else {
                client.queue_init(id, rect);
                inner.queue_init_count += 1;
                Decision::QueueInit(id)
            }
        } else {
            let size_bytes =
                rect.width as usize * rect.height as usize * pb.pixel_format().bytes_per_pixel() as usize;
            inner.arc.insert_resident(id, size_bytes);
            inner.no_cache_count += 1;
            Decision::NoCache
        }
    }

    /// Called after the server has emitted an init rectangle for `id` to
    /// `client`: marks it known on that client.
    pub fn note_init(&self, id: u64, client: &mut ClientCacheState) {
        client.note_init(id);
    }

    /// Called when `client` reports local evictions via `CacheEviction`.
    pub fn note_eviction(&self, client: &mut ClientCacheState, ids: &[u64]) {
        tracing::debug!(count = ids.len(), "client reported cache evictions");
        client.note_eviction(ids);
    }

    /// Drop all cached content, e.g. on a framebuffer resize. Per-client
    /// known-id sets must be cleared separately by the caller (each
    /// connection owns its own `ClientCacheState`).
    pub fn clear(&self) {
        tracing::info!("server cache catalog cleared");
        let mut inner = self.inner.lock().expect("catalog mutex poisoned");
        inner.arc.clear();
        inner.send_ref_count = 0;
        inner.queue_init_count = 0;
        inner.no_cache_count = 0;
    }

    pub fn stats(&self) -> CatalogStats {
        let inner = self.inner.lock().expect("catalog mutex poisoned");
        let (t1, t2, b1, b2) = inner.arc.list_lengths();
        CatalogStats {
            known_content_entries: t1 + t2,
            send_ref_count: inner.send_ref_count,
            queue_init_count: inner.queue_init_count,
            no_cache_count: inner.no_cache_count,
            t1_size: t1,
            t2_size: t2,
            b1_size: b1,
            b2_size: b2,
        }
    }
}
