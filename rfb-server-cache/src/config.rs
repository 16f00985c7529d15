//! Server-side cache configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the server-side content-addressable cache catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCacheConfig {
    /// Enable the cache catalog. When false, `tryReference` always returns
    /// `Decision::NoCache` and no ARC bookkeeping happens.
    #[serde(default)]
    pub enabled: bool,
    /// Minimum rectangle area (in pixels) eligible for caching.
    #[serde(default = "default_min_rect_size")]
    pub min_rect_size: u32,
    /// Entry lifetime in seconds before the catalog considers an id stale
    /// (0 = no expiration). Matches the client's `max_age_seconds` knob.
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
    /// RAM budget for the catalog's `ArcCache`, in megabytes. This tracks
    /// original (uncompressed) rectangle sizes, not wire bytes.
    #[serde(default = "default_ram_budget_mb")]
    pub ram_budget_mb: usize,
}

fn default_min_rect_size() -> u32 {
    4096 // 64x64 pixels, matching ContentCacheConfig::min_rect_size on the client
}

fn default_max_age_seconds() -> u64 {
    300
}

fn default_ram_budget_mb() -> usize {
    8192 // servers typically cache many more clients' worth of content than one viewer
}

impl Default for ServerCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_rect_size: default_min_rect_size(),
            max_age_seconds: default_max_age_seconds(),
            ram_budget_mb: default_ram_budget_mb(),
        }
    }
}

impl ServerCacheConfig {
    /// RAM budget in bytes, for constructing the underlying `ArcCache`.
    pub fn ram_budget_bytes(&self) -> usize {
        self.ram_budget_mb.saturating_mul(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        let config = ServerCacheConfig::default();
        assert!(!config.enabled);
    }

    #[test]
    fn ram_budget_converts_to_bytes() {
        let config = ServerCacheConfig {
            ram_budget_mb: 1,
            ..ServerCacheConfig::default()
        };
        assert_eq!(config.ram_budget_bytes(), 1024 * 1024);
    }
}
