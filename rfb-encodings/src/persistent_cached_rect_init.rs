//! Decoder for PersistentCachedRectInit (encoding 103): hash + actual encoding + pixel data.

use crate::errors::CacheError;
use crate::hashing::content_hash_16;
use crate::persistent_cache::{PersistentCachedPixels, PersistentClientCache};
use crate::ENCODING_PERSISTENT_CACHED_RECT_INIT;
use crate::{
    CopyRectDecoder, Decoder, HextileDecoder, MutablePixelBuffer, PixelFormat, RREDecoder,
    RawDecoder, Rectangle, RfbInStream, TightDecoder, ZRLEDecoder, ENCODING_COPY_RECT,
    ENCODING_HEXTILE, ENCODING_RAW, ENCODING_RRE, ENCODING_TIGHT, ENCODING_ZRLE,
};
use anyhow::{Context, Result};
use rfb_common::Rect;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncRead;

pub struct PersistentCachedRectInitDecoder {
    cache: Arc<Mutex<PersistentClientCache>>,
    raw: RawDecoder,
    copyrect: CopyRectDecoder,
    rre: RREDecoder,
    hextile: HextileDecoder,
    tight: TightDecoder,
    zrle: ZRLEDecoder,
}

impl PersistentCachedRectInitDecoder {
    pub fn new(cache: Arc<Mutex<PersistentClientCache>>) -> Self {
        Self {
            cache,
            raw: RawDecoder,
            copyrect: CopyRectDecoder,
            rre: RREDecoder,
            hextile: HextileDecoder,
            tight: TightDecoder::default(),
            zrle: ZRLEDecoder::default(),
        }
    }
}

impl Decoder for PersistentCachedRectInitDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_PERSISTENT_CACHED_RECT_INIT
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        // Read 16-byte id + actual encoding (i32)
        let mut id = [0u8; 16];
        stream
            .read_bytes(&mut id)
            .await
            .context("read persistent cache id")?;
        let actual = stream
            .read_i32()
            .await
            .context("read persistent actual encoding")?;

        // Build a Rectangle for inner decoder
        let actual_rect = Rectangle {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            encoding: actual,
        };

        // Dispatch
        match actual {
            ENCODING_RAW => {
                self.raw
                    .decode(stream, &actual_rect, pixel_format, buffer)
                    .await?
            }
            ENCODING_COPY_RECT => {
                self.copyrect
                    .decode(stream, &actual_rect, pixel_format, buffer)
                    .await?
            }
            ENCODING_RRE => {
                self.rre
                    .decode(stream, &actual_rect, pixel_format, buffer)
                    .await?
            }
            ENCODING_HEXTILE => {
                self.hextile
                    .decode(stream, &actual_rect, pixel_format, buffer)
                    .await?
            }
            ENCODING_TIGHT => {
                self.tight
                    .decode(stream, &actual_rect, pixel_format, buffer)
                    .await?
            }
            ENCODING_ZRLE => {
                self.zrle
                    .decode(stream, &actual_rect, pixel_format, buffer)
                    .await?
            }
            _ => anyhow::bail!(
                "Unsupported inner encoding {} for PersistentCachedRectInit",
                actual
            ),
        }

        // Extract pixels from buffer and store
        let dest_rect = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );
        let mut stride_pixels = 0usize;
        if let Some(pixels) = buffer.get_buffer(dest_rect, &mut stride_pixels) {
            let bpp = buffer.pixel_format().bytes_per_pixel() as usize;
            let byte_len = rect.height as usize * stride_pixels * bpp;
            let payload = &pixels[..byte_len];

            let computed = content_hash_16(
                payload,
                buffer.pixel_format(),
                rect.width as u32,
                rect.height as u32,
                stride_pixels,
            );
            if computed != id {
                let err = CacheError::HashMismatch {
                    id: id.to_vec(),
                    expected: format!("{:02x?}", id),
                    computed: format!("{:02x?}", computed),
                };
                tracing::warn!(
                    "{} for rect {}x{} at ({},{}); marking session broken",
                    err, rect.width, rect.height, rect.x, rect.y
                );
                let mut cache = self
                    .cache
                    .lock()
                    .map_err(|e| anyhow::anyhow!("lock pcache: {}", e))?;
                cache.invalidate_by_content_id(&id);
                cache.mark_broken();
                return Ok(());
            }

            let entry = PersistentCachedPixels {
                id,
                pixels: payload.to_vec(),
                format: *buffer.pixel_format(),
                width: rect.width as u32,
                height: rect.height as u32,
                stride_pixels,
                last_used: std::time::Instant::now(),
            };
            // Conservatively only persist lossless inner encodings: Tight
            // may carry a JPEG-compressed payload, so pixels decoded from
            // it can drift from the canonical hash on a future re-encode
            // even though this decode's hash matched.
            let persistent = actual != ENCODING_TIGHT;
            let mut cache = self
                .cache
                .lock()
                .map_err(|e| anyhow::anyhow!("lock pcache: {}", e))?;
            cache.insert(entry, persistent);
            tracing::info!(
                "PersistentCache STORE: rect {}x{} id={:02x?}",
                rect.width,
                rect.height,
                &id
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_pixelbuffer::{ManagedPixelBuffer, PixelFormat};
    use rfb_protocol::io::RfbOutStream;
    use std::io::Cursor;

    fn wire_rgb888() -> crate::PixelFormat {
        crate::PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: 0,
            true_color: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    #[tokio::test]
    async fn stores_entry_with_matching_hash() {
        let cache = Arc::new(Mutex::new(PersistentClientCache::new(16)));
        let decoder = PersistentCachedRectInitDecoder::new(cache.clone());
        let mut buffer = ManagedPixelBuffer::new(2, 2, PixelFormat::rgb888());

        let raw_pixels = vec![0x10u8, 0x20, 0x30, 0x00].repeat(4);
        let id = content_hash_16(&raw_pixels, &PixelFormat::rgb888(), 2, 2, 2);

        let mut stream_data = Vec::new();
        let mut out = RfbOutStream::new(&mut stream_data);
        out.write_bytes(&id);
        out.write_i32(ENCODING_RAW);
        out.flush().await.unwrap();
        stream_data.extend_from_slice(&raw_pixels);
        let mut stream = RfbInStream::new(Cursor::new(stream_data));

        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            encoding: ENCODING_PERSISTENT_CACHED_RECT_INIT,
        };
        let result = decoder
            .decode(&mut stream, &rect, &wire_rgb888(), &mut buffer)
            .await;
        assert!(result.is_ok());
        assert!(!cache.lock().unwrap().is_broken());
        assert!(cache.lock().unwrap().lookup(&id).is_some());
    }

    #[tokio::test]
    async fn hash_mismatch_marks_session_broken() {
        let cache = Arc::new(Mutex::new(PersistentClientCache::new(16)));
        let decoder = PersistentCachedRectInitDecoder::new(cache.clone());
        let mut buffer = ManagedPixelBuffer::new(2, 2, PixelFormat::rgb888());

        let raw_pixels = vec![0x10u8, 0x20, 0x30, 0x00].repeat(4);
        let bogus_id = [0xEEu8; 16];

        let mut stream_data = Vec::new();
        let mut out = RfbOutStream::new(&mut stream_data);
        out.write_bytes(&bogus_id);
        out.write_i32(ENCODING_RAW);
        out.flush().await.unwrap();
        stream_data.extend_from_slice(&raw_pixels);
        let mut stream = RfbInStream::new(Cursor::new(stream_data));

        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            encoding: ENCODING_PERSISTENT_CACHED_RECT_INIT,
        };
        let result = decoder
            .decode(&mut stream, &rect, &wire_rgb888(), &mut buffer)
            .await;
        assert!(result.is_ok());
        assert!(cache.lock().unwrap().is_broken());
        assert!(cache.lock().unwrap().lookup(&bogus_id).is_none());
    }
}
