//! Media element seam for video, webcam, and music inputs.
//!
//! The engine does not own a decoder or a capture stack; the host hands it
//! [`MediaElement`]s through a [`MediaProvider`]. Elements are created at
//! bind time, frames are pulled once per tick while playing, and pause/mute
//! are idempotent toggles valid in any load state.

use anyhow::Result;

/// One decoded RGBA8 video frame.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub trait MediaElement {
    fn play(&mut self);
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    fn set_muted(&mut self, muted: bool);
    fn muted(&self) -> bool;
    fn seek(&mut self, seconds: f64);
    fn current_time(&self) -> f64;
    /// Enough data buffered to produce frames.
    fn ready(&self) -> bool;
    /// Unrecoverable decode/network failure.
    fn failed(&self) -> bool;
    fn dimensions(&self) -> Option<(u32, u32)>;
    /// Newest decoded video frame since the last call, if any. Audio-only
    /// elements always return `None`.
    fn take_frame(&mut self) -> Option<MediaFrame>;
}

pub trait MediaProvider {
    fn open_video(&mut self, url: &str) -> Result<Box<dyn MediaElement>>;
    fn open_webcam(&mut self) -> Result<Box<dyn MediaElement>>;
    fn open_audio(&mut self, url: &str) -> Result<Box<dyn MediaElement>>;
}

/// The container-format fallback tried once when a media URL fails to load:
/// mp4 <-> webm for video, mp3 <-> ogg for audio.
pub fn alternate_extension(url: &str) -> Option<String> {
    let (stem, ext) = url.rsplit_once('.')?;
    let swapped = match ext.to_ascii_lowercase().as_str() {
        "mp4" => "webm",
        "webm" => "mp4",
        "mp3" => "ogg",
        "ogg" => "mp3",
        _ => return None,
    };
    Some(format!("{stem}.{swapped}"))
}
