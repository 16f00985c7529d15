//! Encode-side glue between [`crate::catalog::ServerCatalog`] and the
//! per-rectangle encode loop.
//!
//! One [`CacheIntegrator`] lives per connection, pairing a
//! [`ClientCacheState`] with a running [`CacheProtocolStats`] tally so the
//! connection can decide, rectangle by rectangle, whether to emit a
//! `CachedRect` reference, a `CachedRectInit`, or fall through to normal
//! encoding — and log a bandwidth summary when the connection ends.

use crate::catalog::{ClientCacheState, Decision, PendingInit, ServerCatalog};
use rfb_encodings::cache_stats::{
    track_content_cache_init, track_content_cache_ref, CacheProtocolStats,
};
use rfb_pixelbuffer::PixelBuffer;
use rfb_protocol::messages::types::{PixelFormat as WirePixelFormat, Rectangle};
use std::sync::Arc;

/// What the encode loop should do with a candidate rectangle, as decided
/// by [`CacheIntegrator::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeAction {
    /// Emit a bare `CachedRect(id)` reference; skip normal encoding
    /// entirely.
    Reference(u64),
    /// Encode normally, but wrap the result in a `CachedRectInit(id, ...)`
    /// instead of a plain rectangle, so the client stores it.
    Init(u64),
    /// Encode this rectangle exactly as it would be without caching.
    Normal,
}

fn wire_rectangle(rect: rfb_common::Rect) -> Rectangle {
    Rectangle {
        x: rect.x as u16,
        y: rect.y as u16,
        width: rect.width as u16,
        height: rect.height as u16,
        encoding: 0,
    }
}

fn wire_pixel_format(pf: &rfb_pixelbuffer::PixelFormat) -> WirePixelFormat {
    WirePixelFormat {
        bits_per_pixel: pf.bits_per_pixel,
        depth: pf.depth,
        big_endian: u8::from(pf.big_endian),
        true_color: u8::from(pf.true_color),
        red_max: pf.red_max,
        green_max: pf.green_max,
        blue_max: pf.blue_max,
        red_shift: pf.red_shift,
        green_shift: pf.green_shift,
        blue_shift: pf.blue_shift,
    }
}

/// Per-connection encode-side cache state.
pub struct CacheIntegrator {
    catalog: Arc<ServerCatalog>,
    client: ClientCacheState,
    stats: CacheProtocolStats,
}

impl CacheIntegrator {
    pub fn new(catalog: Arc<ServerCatalog>) -> Self {
        Self {
            catalog,
            client: ClientCacheState::new(),
            stats: CacheProtocolStats::default(),
        }
    }

    /// Decide what to do with `rect`, and record bandwidth accounting for
    /// `Reference` decisions immediately (the `Init` case is accounted for
    /// in [`Self::record_init_sent`], once the caller knows the encoded
    /// payload size).
    pub fn evaluate(&mut self, rect: rfb_common::Rect, pb: &dyn PixelBuffer) -> EncodeAction {
        match self.catalog.try_reference(rect, pb, &mut self.client) {
            Decision::SendRef(id) => {
                let wire_rect = wire_rectangle(rect);
                let wire_pf = wire_pixel_format(pb.pixel_format());
                track_content_cache_ref(&mut self.stats, &wire_rect, &wire_pf);
                EncodeAction::Reference(id)
            }
            Decision::QueueInit(id) => EncodeAction::Init(id),
            Decision::NoCache => EncodeAction::Normal,
        }
    }

    /// Record that a `CachedRectInit` for `id` was actually encoded and
    /// sent, with `compressed_bytes` being the size of the encoded payload
    /// (the caller's normal encoder output). Marks `id` as known to this
    /// client so subsequent identical content becomes a `Reference`.
    pub fn record_init_sent(&mut self, id: u64, compressed_bytes: u64) {
        track_content_cache_init(&mut self.stats, compressed_bytes);
        self.catalog.note_init(id, &mut self.client);
    }

    /// Rectangles queued via `QueueInit` decisions that the caller hasn't
    /// yet confirmed with [`Self::record_init_sent`]. Exposed so a caller
    /// that batches end-of-frame work can see what's outstanding; this
    /// integrator itself does not require draining it.
    pub fn pending_inits(&mut self) -> Vec<PendingInit> {
        self.client.take_pending_inits()
    }

    /// Apply a `CacheEviction` report from the client: these ids must be
    /// treated as unknown to the client again.
    pub fn apply_client_eviction(&mut self, ids: &[u64]) {
        self.catalog.note_eviction(&mut self.client, ids);
    }

    /// Apply a `LossyHashReport`: the client seeded its cache from a lossy
    /// copy of this content, under a different hash. Future lookups of
    /// either hash should recognize the client already has it.
    pub fn apply_lossy_hash_report(&mut self, canonical_id: u64, lossy_id: u64) {
        self.client.note_lossy_alias(canonical_id, lossy_id);
    }

    /// Reset all per-connection cache state, e.g. on a framebuffer resize.
    pub fn reset(&mut self) {
        self.client.clear();
    }

    pub fn stats(&self) -> CacheProtocolStats {
        self.stats
    }

    /// Human-readable bandwidth summary for this connection's content-cache
    /// traffic, in the same format as the client-side viewer.
    pub fn summary(&self) -> String {
        self.stats.format_summary("ContentCache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerCacheConfig;
    use rfb_common::Rect;
    use rfb_pixelbuffer::{ManagedPixelBuffer, PixelFormat};

    fn integrator(min_rect_size: u32) -> CacheIntegrator {
        let catalog = Arc::new(ServerCatalog::new(ServerCacheConfig {
            enabled: true,
            min_rect_size,
            ram_budget_mb: 64,
            ..ServerCacheConfig::default()
        }));
        CacheIntegrator::new(catalog)
    }

    fn filled_buffer(w: u32, h: u32, fill: u8) -> ManagedPixelBuffer {
        let mut buf = ManagedPixelBuffer::new(w, h, PixelFormat::rgb888());
        let rect = Rect::new(0, 0, w, h);
        let mut stride = 0;
        if let Some(pixels) = buf.get_buffer_rw(rect, &mut stride) {
            for p in pixels.iter_mut() {
                *p = fill;
            }
        }
        buf.commit_buffer(rect);
        buf
    }

    #[test]
    fn first_sighting_then_init_then_reference_flow() {
        let mut integrator = integrator(16);
        let buf = filled_buffer(8, 8, 0x10);
        let rect = Rect::new(0, 0, 8, 8);

        assert_eq!(integrator.evaluate(rect, &buf), EncodeAction::Normal);

        let action = integrator.evaluate(rect, &buf);
        let id = match action {
            EncodeAction::Init(id) => id,
            other => panic!("expected Init, got {other:?}"),
        };
        integrator.record_init_sent(id, 1200);

        let action = integrator.evaluate(rect, &buf);
        assert_eq!(action, EncodeAction::Reference(id));

        let stats = integrator.stats();
        assert_eq!(stats.cached_rect_init_count, 1);
        assert_eq!(stats.cached_rect_count, 1);
    }

    #[test]
    fn eviction_report_clears_known_id() {
        let mut integrator = integrator(16);
        let buf = filled_buffer(8, 8, 0x20);
        let rect = Rect::new(0, 0, 8, 8);

        integrator.evaluate(rect, &buf); // Normal, records content
        let id = match integrator.evaluate(rect, &buf) {
            EncodeAction::Init(id) => id,
            other => panic!("expected Init, got {other:?}"),
        };
        integrator.record_init_sent(id, 1000);
        assert_eq!(integrator.evaluate(rect, &buf), EncodeAction::Reference(id));

        integrator.apply_client_eviction(&[id]);
        assert_eq!(integrator.evaluate(rect, &buf), EncodeAction::Init(id));
    }

    #[test]
    fn reset_clears_client_state_but_not_catalog() {
        let mut integrator = integrator(16);
        let buf = filled_buffer(8, 8, 0x30);
        let rect = Rect::new(0, 0, 8, 8);

        integrator.evaluate(rect, &buf);
        let id = match integrator.evaluate(rect, &buf) {
            EncodeAction::Init(id) => id,
            other => panic!("expected Init, got {other:?}"),
        };
        integrator.record_init_sent(id, 1000);
        integrator.reset();

        // Catalog still remembers the content, but this client forgot it
        // locally, so it gets Init again rather than Reference.
        assert_eq!(integrator.evaluate(rect, &buf), EncodeAction::Init(id));
    }

    #[test]
    fn disabled_catalog_is_always_normal() {
        let catalog = Arc::new(ServerCatalog::new(ServerCacheConfig::default()));
        let mut integrator = CacheIntegrator::new(catalog);
        let buf = filled_buffer(8, 8, 0x40);
        let rect = Rect::new(0, 0, 8, 8);

        assert_eq!(integrator.evaluate(rect, &buf), EncodeAction::Normal);
        assert_eq!(integrator.evaluate(rect, &buf), EncodeAction::Normal);
    }
}
