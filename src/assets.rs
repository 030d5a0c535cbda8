//! Asset identity, bytes, and URL resolution.
//!
//! The engine never does its own networking: opaque asset identifiers are
//! turned into URLs by an [`AssetResolver`] supplied by the host, and raw
//! bytes come back through an [`AssetFetcher`] running on loader worker
//! threads. `data:` URLs short-circuit both and decode in-process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose};

/// Metadata + raw bytes for a single asset.
#[derive(Debug, Clone)]
pub struct AssetData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Thread-safe, clone-friendly in-memory asset cache keyed by asset id.
/// Doubles as an [`AssetFetcher`] for hosts that preload everything.
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    inner: Arc<Mutex<HashMap<String, AssetData>>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an asset. If the id already exists, this is a no-op
    /// (content-addressed dedup).
    pub fn insert(&self, asset_id: impl Into<String>, data: AssetData) {
        let asset_id = asset_id.into();
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        map.entry(asset_id).or_insert(data);
    }

    pub fn get(&self, asset_id: &str) -> Option<AssetData> {
        let map = self.inner.lock().ok()?;
        map.get(asset_id).cloned()
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.inner
            .lock()
            .ok()
            .is_some_and(|map| map.contains_key(asset_id))
    }

    pub fn remove(&self, asset_id: &str) -> Option<AssetData> {
        self.inner.lock().ok()?.remove(asset_id)
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.inner.lock() {
            map.clear();
        }
    }
}

/// Blocking byte fetch, called from loader worker threads.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

impl AssetFetcher for AssetStore {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.get(url)
            .map(|d| d.bytes)
            .ok_or_else(|| anyhow!("asset '{url}' not in store"))
    }
}

/// Resolved stream source for a streamed-music input.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Opaque-identifier -> URL resolution, supplied by the host.
pub trait AssetResolver {
    fn resolve(&self, asset_id: &str) -> Result<String>;

    /// Six face URLs for a cubemap asset. The default derives
    /// `name_0.ext .. name_5.ext` from the base URL.
    fn resolve_cubemap(&self, asset_id: &str) -> Result<[String; 6]> {
        let base = self.resolve(asset_id)?;
        let (stem, ext) = match base.rsplit_once('.') {
            Some((s, e)) => (s.to_string(), format!(".{e}")),
            None => (base, String::new()),
        };
        Ok(std::array::from_fn(|i| format!("{stem}_{i}{ext}")))
    }

    /// Stream URL + metadata for a streamed-music identifier. Hosts without
    /// a stream backend leave the default, which fails the bind (the slot
    /// then stays unloaded, never fatal).
    fn resolve_stream(&self, asset_id: &str) -> Result<StreamInfo> {
        bail!("no stream resolver available for '{asset_id}'")
    }
}

/// Identity resolver: asset ids are already URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl AssetResolver for IdentityResolver {
    fn resolve(&self, asset_id: &str) -> Result<String> {
        Ok(asset_id.to_string())
    }
}

// ---------------------------------------------------------------------------
// data: URL decoding
// ---------------------------------------------------------------------------

pub fn is_data_url(url: &str) -> bool {
    url.trim_start().starts_with("data:")
}

fn percent_decode_to_bytes(s: &str) -> Result<Vec<u8>> {
    // Minimal percent-decoder for data URLs with non-base64 payloads.
    // (We keep it strict: invalid percent sequences error.)
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len() {
                    bail!("invalid percent-encoding: truncated");
                }
                let hex = |b: u8| -> Option<u8> {
                    match b {
                        b'0'..=b'9' => Some(b - b'0'),
                        b'a'..=b'f' => Some(b - b'a' + 10),
                        b'A'..=b'F' => Some(b - b'A' + 10),
                        _ => None,
                    }
                };
                let hi = hex(bytes[i + 1]).ok_or_else(|| anyhow!("invalid percent-encoding"))?;
                let lo = hex(bytes[i + 2]).ok_or_else(|| anyhow!("invalid percent-encoding"))?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    Ok(out)
}

pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let s = data_url.trim();
    if !s.starts_with("data:") {
        bail!("not a data URL");
    }

    let (_, rest) = s.split_at("data:".len());
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("invalid data URL: missing comma"))?;

    let is_base64 = meta
        .split(';')
        .any(|t| t.trim().eq_ignore_ascii_case("base64"));

    if is_base64 {
        // Some producers use URL-safe base64; try both.
        general_purpose::STANDARD
            .decode(data.trim())
            .or_else(|_| general_purpose::URL_SAFE.decode(data.trim()))
            .map_err(|e| anyhow!("invalid base64 in data URL: {e}"))
    } else {
        percent_decode_to_bytes(data)
    }
}

/// Fetch bytes for a URL: `data:` URLs decode in-process, everything else
/// goes through the fetcher.
pub fn fetch_bytes(fetcher: &dyn AssetFetcher, url: &str) -> Result<Vec<u8>> {
    if is_data_url(url) {
        decode_data_url(url).with_context(|| "failed to decode data URL".to_string())
    } else {
        fetcher
            .fetch(url)
            .with_context(|| format!("failed to fetch '{url}'"))
    }
}
