//! Shared stubs for the integration suites: canned media elements, audio
//! contexts, and in-memory assets.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use shaderdeck::audio::{AUDIO_TEXTURE_WIDTH, Analyser, AudioContext};
use shaderdeck::gfx::trace::{TraceEvent, TraceRenderer};
use shaderdeck::gfx::{TargetId, TextureId};
use shaderdeck::media::{MediaElement, MediaFrame, MediaProvider};

/// Observable state of a stub media element, shared with the test body
/// after the element itself moves into a channel.
#[derive(Debug)]
pub struct MediaState {
    pub url: String,
    pub paused: bool,
    pub muted: bool,
    pub time: f64,
    pub ready: bool,
    pub failed: bool,
    pub frames_served: usize,
}

#[derive(Debug, Clone)]
pub struct SharedMediaState(pub Arc<Mutex<MediaState>>);

impl SharedMediaState {
    fn new(url: &str) -> Self {
        Self(Arc::new(Mutex::new(MediaState {
            url: url.to_string(),
            paused: false,
            muted: false,
            time: 0.0,
            ready: true,
            failed: false,
            frames_served: 0,
        })))
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut MediaState) -> T) -> T {
        f(&mut self.0.lock().unwrap())
    }
}

pub struct StubMedia {
    pub state: SharedMediaState,
    pub dims: (u32, u32),
}

impl MediaElement for StubMedia {
    fn play(&mut self) {
        self.state.with(|s| s.paused = false);
    }

    fn pause(&mut self) {
        self.state.with(|s| s.paused = true);
    }

    fn is_paused(&self) -> bool {
        self.state.with(|s| s.paused)
    }

    fn set_muted(&mut self, muted: bool) {
        self.state.with(|s| s.muted = muted);
    }

    fn muted(&self) -> bool {
        self.state.with(|s| s.muted)
    }

    fn seek(&mut self, seconds: f64) {
        self.state.with(|s| s.time = seconds);
    }

    fn current_time(&self) -> f64 {
        self.state.with(|s| s.time)
    }

    fn ready(&self) -> bool {
        self.state.with(|s| s.ready)
    }

    fn failed(&self) -> bool {
        self.state.with(|s| s.failed)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some(self.dims)
    }

    fn take_frame(&mut self) -> Option<MediaFrame> {
        let (w, h) = self.dims;
        self.state.with(|s| {
            if s.paused || !s.ready || s.failed {
                return None;
            }
            s.frames_served += 1;
            Some(MediaFrame {
                width: w,
                height: h,
                pixels: vec![s.frames_served as u8; (w * h * 4) as usize],
            })
        })
    }
}

/// Media provider that hands out [`StubMedia`] and records every open.
#[derive(Default)]
pub struct StubProvider {
    pub opened: Vec<String>,
    pub fail_urls: HashSet<String>,
    pub deny_webcam: bool,
    pub last: Option<SharedMediaState>,
}

impl StubProvider {
    fn open(&mut self, url: &str) -> Result<Box<dyn MediaElement>> {
        self.opened.push(url.to_string());
        if self.fail_urls.contains(url) {
            return Err(anyhow!("cannot open '{url}'"));
        }
        let state = SharedMediaState::new(url);
        self.last = Some(state.clone());
        Ok(Box::new(StubMedia {
            state,
            dims: (32, 16),
        }))
    }
}

impl MediaProvider for StubProvider {
    fn open_video(&mut self, url: &str) -> Result<Box<dyn MediaElement>> {
        self.open(url)
    }

    fn open_webcam(&mut self) -> Result<Box<dyn MediaElement>> {
        if self.deny_webcam {
            return Err(anyhow!("camera denied"));
        }
        self.open("webcam:0")
    }

    fn open_audio(&mut self, url: &str) -> Result<Box<dyn MediaElement>> {
        self.open(url)
    }
}

/// Analyser producing a constant byte everywhere; trivially distinguishable
/// from the synthetic fallback.
pub struct ConstAnalyser(pub u8);

impl Analyser for ConstAnalyser {
    fn fill_frequency(&mut self, _time: f32, out: &mut [u8]) {
        out.fill(self.0);
    }

    fn fill_waveform(&mut self, _time: f32, out: &mut [u8]) {
        out.fill(self.0);
    }
}

pub struct StubAudioContext {
    pub rate: f32,
    pub deny_mic: bool,
    pub analyser_byte: u8,
}

impl Default for StubAudioContext {
    fn default() -> Self {
        Self {
            rate: 48_000.0,
            deny_mic: false,
            analyser_byte: 200,
        }
    }
}

impl AudioContext for StubAudioContext {
    fn sample_rate(&self) -> f32 {
        self.rate
    }

    fn create_media_analyser(
        &mut self,
        _element: &mut dyn MediaElement,
    ) -> Option<Box<dyn Analyser>> {
        Some(Box::new(ConstAnalyser(self.analyser_byte)))
    }

    fn create_mic_analyser(&mut self) -> Option<Box<dyn Analyser>> {
        if self.deny_mic {
            None
        } else {
            Some(Box::new(ConstAnalyser(self.analyser_byte)))
        }
    }
}

/// Expected audio texture contents for [`ConstAnalyser`].
pub fn const_audio_bytes(byte: u8) -> Vec<u8> {
    vec![byte; AUDIO_TEXTURE_WIDTH * 2]
}

/// Encode a solid-color RGBA image as PNG bytes, decodable by the loader.
pub fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("png encode");
    out.into_inner()
}

/// The textures attached by the last AttachTextures event before each
/// draw, paired with the draw's render target.
pub fn draw_attachments(r: &TraceRenderer) -> Vec<([Option<TextureId>; 4], Option<TargetId>)> {
    let mut out = Vec::new();
    let mut current: [Option<TextureId>; 4] = [None; 4];
    for ev in &r.events {
        match ev {
            TraceEvent::AttachTextures(units) => current = *units,
            TraceEvent::Draw { target, .. } => out.push((current, *target)),
            _ => {}
        }
    }
    out
}

/// Spin the effect's tick until `done` reports true or ~2 seconds pass.
/// Loader completions arrive from worker threads, so tests poll the same
/// way a host loop would.
pub fn wait_until(mut step: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if step() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    false
}
