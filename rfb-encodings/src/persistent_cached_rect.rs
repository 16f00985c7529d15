//! Decoder for PersistentCachedRect (encoding 102): reference by 16-byte hash.

use crate::persistent_cache::PersistentClientCache;
use crate::ENCODING_PERSISTENT_CACHED_RECT;
use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream};
use anyhow::{Context, Result};
use rfb_common::Rect;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncRead;

pub struct PersistentCachedRectDecoder {
    cache: Arc<Mutex<PersistentClientCache>>,
    /// Queue that misses are appended to for the framebuffer's batched
    /// `PersistentCacheQuery`. Like [`crate::cached_rect::CachedRectDecoder`],
    /// a miss here never fails the decode.
    pending_misses: Option<Arc<Mutex<Vec<[u8; 16]>>>>,
}

impl PersistentCachedRectDecoder {
    pub fn new(cache: Arc<Mutex<PersistentClientCache>>) -> Self {
        Self {
            cache,
            pending_misses: None,
        }
    }

    pub fn new_with_miss_reporter(
        cache: Arc<Mutex<PersistentClientCache>>,
        misses: Arc<Mutex<Vec<[u8; 16]>>>,
    ) -> Self {
        Self {
            cache,
            pending_misses: Some(misses),
        }
    }
}

impl Decoder for PersistentCachedRectDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_PERSISTENT_CACHED_RECT
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        _pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        // Read 16-byte cache ID
        let mut id = [0u8; 16];
        stream
            .read_bytes(&mut id)
            .await
            .context("read persistent cache id")?;

        // Lookup
        let hit = {
            let mut cache = self
                .cache
                .lock()
                .map_err(|e| anyhow::anyhow!("lock pcache: {}", e))?;
            cache.lookup(&id).cloned()
        };

        if let Some(entry) = hit {
            // Blit
            let dest_rect = Rect::new(
                rect.x as i32,
                rect.y as i32,
                rect.width as u32,
                rect.height as u32,
            );
            buffer
                .image_rect(dest_rect, &entry.pixels, entry.stride_pixels)
                .context("blit persistent cache hit")?;
            tracing::info!(
                "PersistentCache HIT: rect {}x{} id={:02x?}",
                rect.width,
                rect.height,
                &id
            );
        } else {
            // Soft miss: queue the id and leave the rectangle undrawn. The
            // server will follow up with PersistentCachedRectInit once it
            // sees our PersistentCacheQuery.
            tracing::warn!(
                "PersistentCache MISS: rect {}x{} id={:02x?}",
                rect.width,
                rect.height,
                &id
            );
            if let Some(misses) = &self.pending_misses {
                if let Ok(mut queue) = misses.lock() {
                    queue.push(id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistent_cache::PersistentCachedPixels;
    use rfb_pixelbuffer::{ManagedPixelBuffer, PixelFormat};
    use std::io::Cursor;

    fn rect(w: u16, h: u16) -> Rectangle {
        Rectangle {
            x: 0,
            y: 0,
            width: w,
            height: h,
            encoding: ENCODING_PERSISTENT_CACHED_RECT,
        }
    }

    #[tokio::test]
    async fn hit_blits_cached_pixels() {
        let mut cache = PersistentClientCache::new(16);
        let id = [7u8; 16];
        let pixels = vec![0xAAu8; 8 * 8 * 4];
        cache.insert(PersistentCachedPixels {
            id,
            pixels: pixels.clone(),
            format: PixelFormat::rgb888(),
            width: 8,
            height: 8,
            stride_pixels: 8,
            last_used: std::time::Instant::now(),
        }, true);
        let cache = Arc::new(Mutex::new(cache));
        let decoder = PersistentCachedRectDecoder::new(cache);

        let mut stream = RfbInStream::new(Cursor::new(id.to_vec()));
        let mut buffer = ManagedPixelBuffer::new(64, 64, PixelFormat::rgb888());
        let result = decoder
            .decode(&mut stream, &rect(8, 8), &PixelFormat::rgb888(), &mut buffer)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn miss_is_soft_and_reports_id() {
        let cache = Arc::new(Mutex::new(PersistentClientCache::new(16)));
        let misses = Arc::new(Mutex::new(Vec::new()));
        let decoder = PersistentCachedRectDecoder::new_with_miss_reporter(cache, misses.clone());

        let id = [9u8; 16];
        let mut stream = RfbInStream::new(Cursor::new(id.to_vec()));
        let mut buffer = ManagedPixelBuffer::new(64, 64, PixelFormat::rgb888());
        let result = decoder
            .decode(&mut stream, &rect(8, 8), &PixelFormat::rgb888(), &mut buffer)
            .await;
        assert!(result.is_ok());
        assert_eq!(*misses.lock().unwrap(), vec![id]);
    }
}
