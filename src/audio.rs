//! Audio analysis seam and the synthetic fallback.
//!
//! Mic/music channels sample a 512x2 texture: row 0 holds spectrum
//! magnitudes, row 1 the time-domain waveform, one byte per texel. Real
//! analyser nodes come from the host's [`AudioContext`]; when the context
//! is unavailable, denied, or the element is muted, the channel switches to
//! [`SyntheticAnalyser`] so bound shaders keep receiving deterministic,
//! time-varying data instead of silence or null.

use crate::media::MediaElement;

/// Texel width of the audio texture; also the FFT bin count.
pub const AUDIO_TEXTURE_WIDTH: usize = 512;

pub trait Analyser {
    /// Write `AUDIO_TEXTURE_WIDTH` spectrum magnitudes (0..=255) into `out`.
    fn fill_frequency(&mut self, time: f32, out: &mut [u8]);
    /// Write `AUDIO_TEXTURE_WIDTH` waveform samples (0..=255, 128 = zero).
    fn fill_waveform(&mut self, time: f32, out: &mut [u8]);
}

pub trait AudioContext {
    fn sample_rate(&self) -> f32;
    /// Tap a media element's output. `None` when the context cannot attach
    /// (cross-origin stream, suspended context).
    fn create_media_analyser(&mut self, element: &mut dyn MediaElement)
        -> Option<Box<dyn Analyser>>;
    /// Tap the microphone. `None` when capture is denied or absent.
    fn create_mic_analyser(&mut self) -> Option<Box<dyn Analyser>>;
}

/// Closed-form stand-in spectrum/waveform. The exact shape carries no
/// meaning; the contract is non-null, deterministic, time-varying output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticAnalyser;

impl Analyser for SyntheticAnalyser {
    fn fill_frequency(&mut self, time: f32, out: &mut [u8]) {
        for (i, v) in out.iter_mut().enumerate().take(AUDIO_TEXTURE_WIDTH) {
            let x = i as f32 / AUDIO_TEXTURE_WIDTH as f32;
            let envelope = (1.0 - x).powf(1.5);
            let flutter = 0.5 + 0.5 * (time * 1.7 + x * 9.0).sin();
            *v = (255.0 * envelope * flutter).clamp(0.0, 255.0) as u8;
        }
    }

    fn fill_waveform(&mut self, time: f32, out: &mut [u8]) {
        for (i, v) in out.iter_mut().enumerate().take(AUDIO_TEXTURE_WIDTH) {
            let x = i as f32 / AUDIO_TEXTURE_WIDTH as f32;
            let phase = std::f32::consts::TAU * (x * 3.0 + 0.25 * time.sin());
            *v = (127.5 + 127.5 * (phase + time).sin()).clamp(0.0, 255.0) as u8;
        }
    }
}
