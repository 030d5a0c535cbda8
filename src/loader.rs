//! Async fetch -> decode pipeline for texture-like inputs.
//!
//! Binds are fire-and-forget: a worker thread fetches and decodes, then
//! posts a completion on a channel the scheduler drains once per tick. A
//! completion carries the bind generation it was started for, so a slot
//! that was rebound in the meantime simply drops the stale result.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::assets::{AssetFetcher, fetch_bytes};
use crate::pass::PassId;

/// CPU-side result of a finished decode, ready for texture upload.
#[derive(Debug, Clone)]
pub enum DecodedAsset {
    Texture {
        pixels: Vec<u8>,
        width: u32,
        height: u32,
    },
    Volume {
        voxels: Vec<u8>,
        width: u32,
        height: u32,
        depth: u32,
        channels: u8,
    },
    Cubemap {
        /// Six RGBA8 faces in +x -x +y -y +z -z order.
        faces: Vec<Vec<u8>>,
        face_size: u32,
    },
}

#[derive(Debug)]
pub struct LoadComplete {
    pub pass: PassId,
    pub slot: usize,
    pub generation: u64,
    pub result: Result<DecodedAsset, String>,
}

/// Where a volume's voxels come from.
#[derive(Debug, Clone)]
pub enum VolumeSource {
    /// Binary asset: 16-byte header (xres/yres/zres as LE u32, channel
    /// count byte, three reserved bytes) followed by tightly packed voxels.
    Asset(String),
    /// Deterministic procedural noise, generated on the worker.
    Noise { size: u32, channels: u8 },
}

pub struct Loader {
    tx: Sender<LoadComplete>,
    rx: Receiver<LoadComplete>,
    fetcher: Arc<dyn AssetFetcher>,
}

impl Loader {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, fetcher }
    }

    /// Drain all completions that arrived since the last tick.
    pub fn poll(&self) -> Vec<LoadComplete> {
        self.rx.try_iter().collect()
    }

    pub fn request_texture(&self, pass: PassId, slot: usize, generation: u64, url: String, vflip: bool) {
        self.spawn(pass, slot, generation, move |fetcher| {
            let bytes = fetch_bytes(fetcher, &url)?;
            decode_texture(&bytes, vflip)
        });
    }

    pub fn request_volume(&self, pass: PassId, slot: usize, generation: u64, source: VolumeSource) {
        self.spawn(pass, slot, generation, move |fetcher| match &source {
            VolumeSource::Asset(url) => {
                let bytes = fetch_bytes(fetcher, url)?;
                decode_volume(&bytes)
            }
            VolumeSource::Noise { size, channels } => Ok(noise_volume(*size, *channels)),
        });
    }

    pub fn request_cubemap(
        &self,
        pass: PassId,
        slot: usize,
        generation: u64,
        face_urls: [String; 6],
        vflip: bool,
    ) {
        self.spawn(pass, slot, generation, move |fetcher| {
            let mut faces: Vec<Vec<u8>> = Vec::with_capacity(6);
            let mut face_size = 0u32;
            for url in &face_urls {
                let bytes = fetch_bytes(fetcher, url)?;
                let DecodedAsset::Texture {
                    pixels,
                    width,
                    height,
                } = decode_texture(&bytes, vflip)?
                else {
                    unreachable!()
                };
                if width != height {
                    bail!("cubemap face '{url}' is {width}x{height}, expected square");
                }
                if face_size == 0 {
                    face_size = width;
                } else if width != face_size {
                    bail!("cubemap face '{url}' is {width}px, other faces are {face_size}px");
                }
                faces.push(pixels);
            }
            Ok(DecodedAsset::Cubemap { faces, face_size })
        });
    }

    fn spawn(
        &self,
        pass: PassId,
        slot: usize,
        generation: u64,
        work: impl FnOnce(&dyn AssetFetcher) -> Result<DecodedAsset> + Send + 'static,
    ) {
        let tx = self.tx.clone();
        let fetcher = Arc::clone(&self.fetcher);
        std::thread::spawn(move || {
            let result = work(fetcher.as_ref()).map_err(|e| format!("{e:#}"));
            if let Err(msg) = &result {
                eprintln!("[loader] {pass} channel {slot}: {msg}");
            }
            // The receiver dropping just means the engine was torn down.
            let _ = tx.send(LoadComplete {
                pass,
                slot,
                generation,
                result,
            });
        });
    }
}

fn decode_texture(bytes: &[u8], vflip: bool) -> Result<DecodedAsset> {
    let mut img = image::load_from_memory(bytes)
        .context("failed to decode image bytes")?
        .to_rgba8();
    if vflip {
        image::imageops::flip_vertical_in_place(&mut img);
    }
    let (width, height) = img.dimensions();
    Ok(DecodedAsset::Texture {
        pixels: img.into_raw(),
        width,
        height,
    })
}

const VOLUME_HEADER_LEN: usize = 16;

pub fn decode_volume(bytes: &[u8]) -> Result<DecodedAsset> {
    if bytes.len() < VOLUME_HEADER_LEN {
        bail!("volume blob is {} bytes, header needs {VOLUME_HEADER_LEN}", bytes.len());
    }
    let dim = |off: usize| u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
    let (width, height, depth) = (dim(0), dim(4), dim(8));
    let channels = bytes[12];
    if channels != 1 && channels != 4 {
        bail!("volume declares {channels} channels, expected 1 or 4");
    }
    let expected = width as usize * height as usize * depth as usize * channels as usize;
    let voxels = &bytes[VOLUME_HEADER_LEN..];
    if voxels.len() < expected {
        bail!("volume payload is {} bytes, header promises {expected}", voxels.len());
    }
    Ok(DecodedAsset::Volume {
        voxels: voxels[..expected].to_vec(),
        width,
        height,
        depth,
        channels,
    })
}

/// Stateless integer hash; stable across platforms so procedural volumes
/// are bit-identical everywhere.
fn hash3(x: u32, y: u32, z: u32) -> u32 {
    let mut h = x.wrapping_mul(0x8da6b343)
        ^ y.wrapping_mul(0xd8163841)
        ^ z.wrapping_mul(0xcb1ab31f);
    h ^= h >> 13;
    h = h.wrapping_mul(0x9e3779b1);
    h ^ (h >> 16)
}

fn noise_volume(size: u32, channels: u8) -> DecodedAsset {
    let channels = if channels == 4 { 4u8 } else { 1u8 };
    let n = size as usize;
    let mut voxels = vec![0u8; n * n * n * channels as usize];
    let mut i = 0;
    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                for c in 0..channels {
                    voxels[i] = (hash3(x, y, z.wrapping_add(c as u32 * 0x1000)) & 0xff) as u8;
                    i += 1;
                }
            }
        }
    }
    DecodedAsset::Volume {
        voxels,
        width: size,
        height: size,
        depth: size,
        channels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_blob(w: u32, h: u32, d: u32, channels: u8) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&w.to_le_bytes());
        out.extend_from_slice(&h.to_le_bytes());
        out.extend_from_slice(&d.to_le_bytes());
        out.push(channels);
        out.extend_from_slice(&[0, 0, 0]);
        out.extend(std::iter::repeat_n(7u8, (w * h * d * channels as u32) as usize));
        out
    }

    #[test]
    fn volume_header_roundtrip() {
        let blob = volume_blob(4, 4, 2, 1);
        let DecodedAsset::Volume {
            voxels,
            width,
            height,
            depth,
            channels,
        } = decode_volume(&blob).unwrap()
        else {
            panic!("expected volume");
        };
        assert_eq!((width, height, depth, channels), (4, 4, 2, 1));
        assert_eq!(voxels.len(), 32);
    }

    #[test]
    fn short_volume_payload_errors() {
        let mut blob = volume_blob(8, 8, 8, 4);
        blob.truncate(40);
        assert!(decode_volume(&blob).is_err());
    }

    #[test]
    fn noise_volume_is_deterministic() {
        let DecodedAsset::Volume { voxels: a, .. } = noise_volume(8, 1) else {
            panic!()
        };
        let DecodedAsset::Volume { voxels: b, .. } = noise_volume(8, 1) else {
            panic!()
        };
        assert_eq!(a, b);
        // Not constant.
        assert!(a.iter().any(|&v| v != a[0]));
    }
}
