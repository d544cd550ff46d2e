//! Asset pre-warming seam.
//!
//! Byte caching lives outside the core. The scheduler only hands the URLs of a
//! newly seen configuration to an [`AssetCache`].

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::Configuration;

#[async_trait]
pub trait AssetCache: Send + Sync + 'static {
    /// Fetch `urls` ahead of playback. Failures are the cache's concern.
    async fn prewarm(&self, urls: Vec<String>);
}

/// Every media URL of `configuration`, first occurrence order, no blanks.
pub fn collect_asset_urls(configuration: &Configuration) -> Vec<String> {
    let mut seen = HashSet::new();
    configuration
        .schedules
        .iter()
        .flat_map(|s| &s.regions)
        .flat_map(|r| &r.media)
        .map(|m| m.source_url.trim())
        .filter(|url| !url.is_empty())
        .filter(|url| seen.insert(*url))
        .map(str::to_string)
        .collect()
}
