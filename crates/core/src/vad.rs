//! Voice activity detection for turn-taking and barge-in.
//!
//! A lightweight energy detector over mono PCM16 frames. It does not try to
//! tell speech from other loud sounds; the realtime model does its own turn
//! detection, this only has to notice that the user started talking so queued
//! agent audio can be cut off.

use std::time::Duration;

/// Tuning for [`VoiceActivityDetector`].
#[derive(Clone, Debug, PartialEq)]
pub struct VadOptions {
    /// RMS level, as a fraction of full scale, at or above which a frame counts as voiced.
    pub activation_threshold: f32,
    /// Continuous voiced audio needed before speech is reported.
    pub min_speech_duration: Duration,
    /// Continuous silence needed before the end of speech is reported.
    pub min_silence_duration: Duration,
}

impl Default for VadOptions {
    fn default() -> Self {
        Self {
            activation_threshold: 0.02,
            min_speech_duration: Duration::from_millis(50),
            min_silence_duration: Duration::from_millis(550),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechEnded { speech_duration: Duration },
}

#[derive(Debug)]
pub struct VoiceActivityDetector {
    options: VadOptions,
    speaking: bool,
    voiced_run: Duration,
    silent_run: Duration,
    speech_duration: Duration,
}

impl VoiceActivityDetector {
    pub fn new(options: VadOptions) -> Self {
        Self {
            options,
            speaking: false,
            voiced_run: Duration::ZERO,
            silent_run: Duration::ZERO,
            speech_duration: Duration::ZERO,
        }
    }

    pub fn options(&self) -> &VadOptions {
        &self.options
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn reset(&mut self) {
        self.speaking = false;
        self.voiced_run = Duration::ZERO;
        self.silent_run = Duration::ZERO;
        self.speech_duration = Duration::ZERO;
    }

    /// Feeds one mono frame and reports a transition, if this frame caused one.
    pub fn process(&mut self, samples: &[i16], sample_rate: u32) -> Option<VadEvent> {
        if samples.is_empty() || sample_rate == 0 {
            return None;
        }
        let frame = Duration::from_nanos(samples.len() as u64 * 1_000_000_000 / sample_rate as u64);
        let voiced = rms(samples) >= self.options.activation_threshold;

        if self.speaking {
            self.speech_duration += frame;
            if voiced {
                self.silent_run = Duration::ZERO;
                return None;
            }
            self.silent_run += frame;
            if self.silent_run >= self.options.min_silence_duration {
                let speech_duration = self.speech_duration.saturating_sub(self.silent_run);
                self.reset();
                return Some(VadEvent::SpeechEnded { speech_duration });
            }
            return None;
        }

        if !voiced {
            self.voiced_run = Duration::ZERO;
            return None;
        }
        self.voiced_run += frame;
        if self.voiced_run >= self.options.min_speech_duration {
            self.speaking = true;
            self.speech_duration = self.voiced_run;
            self.voiced_run = Duration::ZERO;
            self.silent_run = Duration::ZERO;
            return Some(VadEvent::SpeechStarted);
        }
        None
    }
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::new(VadOptions::default())
    }
}

/// Root-mean-square level of a PCM16 frame, normalised to `0.0..=1.0`.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    // 10 ms at 16 kHz.
    const FRAME: usize = 160;

    fn loud() -> Vec<i16> {
        (0..FRAME)
            .map(|i| if i % 2 == 0 { 8000 } else { -8000 })
            .collect()
    }

    fn quiet() -> Vec<i16> {
        vec![0; FRAME]
    }

    fn feed(vad: &mut VoiceActivityDetector, frame: &[i16], times: usize) -> Vec<VadEvent> {
        (0..times).filter_map(|_| vad.process(frame, RATE)).collect()
    }

    #[test]
    fn test_rms_levels() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&quiet()), 0.0);
        let level = rms(&loud());
        assert!((level - 8000.0 / 32768.0).abs() < 1e-4);
    }

    #[test]
    fn test_silence_never_triggers() {
        let mut vad = VoiceActivityDetector::default();
        assert!(feed(&mut vad, &quiet(), 500).is_empty());
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_speech_starts_after_min_duration() {
        let mut vad = VoiceActivityDetector::default();
        assert!(feed(&mut vad, &loud(), 4).is_empty());
        assert_eq!(vad.process(&loud(), RATE), Some(VadEvent::SpeechStarted));
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_short_blip_is_ignored() {
        let mut vad = VoiceActivityDetector::default();
        assert!(feed(&mut vad, &loud(), 3).is_empty());
        assert!(feed(&mut vad, &quiet(), 1).is_empty());
        assert!(feed(&mut vad, &loud(), 3).is_empty());
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_speech_ends_after_min_silence() {
        let mut vad = VoiceActivityDetector::default();
        assert_eq!(feed(&mut vad, &loud(), 15), vec![VadEvent::SpeechStarted]);
        assert!(feed(&mut vad, &quiet(), 54).is_empty());
        assert_eq!(
            vad.process(&quiet(), RATE),
            Some(VadEvent::SpeechEnded {
                speech_duration: Duration::from_millis(150)
            })
        );
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_short_pause_keeps_speaking() {
        let mut vad = VoiceActivityDetector::default();
        feed(&mut vad, &loud(), 5);
        assert!(feed(&mut vad, &quiet(), 30).is_empty());
        assert!(feed(&mut vad, &loud(), 1).is_empty());
        assert!(feed(&mut vad, &quiet(), 54).is_empty());
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_custom_threshold() {
        let mut vad = VoiceActivityDetector::new(VadOptions {
            activation_threshold: 0.5,
            ..VadOptions::default()
        });
        assert!(feed(&mut vad, &loud(), 20).is_empty());
    }
}
