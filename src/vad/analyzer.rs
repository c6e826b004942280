// Frequency analyser
//
// Turns the most recent block of samples into byte-scaled bin magnitudes the
// same way a web audio analyser node does: Blackman window, DFT magnitude
// scaled by 1/N, exponential smoothing against the previous block, then dB
// mapped linearly from [min_db, max_db] onto 0..=255.

use std::collections::VecDeque;
use std::f32::consts::PI;

use crate::media::AudioFrame;

pub const DEFAULT_FFT_SIZE: usize = 256;
pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const DEFAULT_MIN_DB: f32 = -100.0;
pub const DEFAULT_MAX_DB: f32 = -30.0;

pub struct FrequencyAnalyzer {
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    window: Vec<f32>,
    samples: VecDeque<f32>,
    previous: Vec<f32>,
}

impl FrequencyAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        Self {
            fft_size,
            smoothing: DEFAULT_SMOOTHING,
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
            window: blackman_window(fft_size),
            samples: VecDeque::from(vec![0.0; fft_size]),
            previous: vec![0.0; fft_size / 2],
        }
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed captured audio; only the newest `fft_size` mono samples are kept
    pub fn push_frame(&mut self, frame: &AudioFrame) {
        let channels = frame.channels.max(1) as usize;
        for chunk in frame.samples.chunks_exact(channels) {
            let sum: f32 = chunk.iter().map(|&s| s as f32 / 32768.0).sum();
            self.samples.push_back(sum / channels as f32);
        }
        while self.samples.len() > self.fft_size {
            self.samples.pop_front();
        }
    }

    /// Current spectrum as 0..=255 magnitudes, one per bin
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let n = self.fft_size;
        let windowed: Vec<f32> = self
            .samples
            .iter()
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();

        let range = self.max_db - self.min_db;
        let mut bytes = Vec::with_capacity(self.bin_count());

        for k in 0..self.bin_count() {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (t, x) in windowed.iter().enumerate() {
                let angle = 2.0 * PI * k as f32 * t as f32 / n as f32;
                re += x * angle.cos();
                im -= x * angle.sin();
            }
            let magnitude = (re * re + im * im).sqrt() / n as f32;

            let smoothed = self.smoothing * self.previous[k] + (1.0 - self.smoothing) * magnitude;
            self.previous[k] = smoothed;

            let db = if smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 * (db - self.min_db) / range;
            bytes.push(scaled.clamp(0.0, 255.0) as u8);
        }

        bytes
    }
}

impl Default for FrequencyAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}

fn blackman_window(n: usize) -> Vec<f32> {
    let alpha = 0.16f32;
    let a0 = 0.5 * (1.0 - alpha);
    let a1 = 0.5;
    let a2 = 0.5 * alpha;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_silence_is_all_zero() {
        let mut analyzer = FrequencyAnalyzer::default();
        analyzer.push_frame(&frame(vec![0; 1600]));
        let bins = analyzer.byte_frequency_data();
        assert_eq!(bins.len(), DEFAULT_FFT_SIZE / 2);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tone_peaks_at_its_bin() {
        // 2 kHz at 16 kHz with 256 points lands on bin 32
        let samples: Vec<i16> = (0..1600)
            .map(|i| ((2.0 * PI * 2000.0 * i as f32 / 16000.0).sin() * 16000.0) as i16)
            .collect();
        let mut analyzer = FrequencyAnalyzer::default();
        analyzer.push_frame(&frame(samples));
        let bins = analyzer.byte_frequency_data();

        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, b)| **b)
            .map(|(i, _)| i)
            .unwrap();
        assert!((31..=33).contains(&peak), "peak at bin {}", peak);
    }
}
