//! Frame format conversion shared by the recorder and provider uplinks

use super::stream::AudioFrame;

/// Downsample and convert to the target channel layout
pub fn process_frame(frame: AudioFrame, target_sample_rate: u32, target_channels: u16) -> AudioFrame {
    let mut processed = frame;

    // Convert to mono first so decimation steps over whole frames
    if processed.channels != target_channels && target_channels == 1 {
        processed = to_mono(processed);
    }

    if processed.sample_rate != target_sample_rate {
        processed = downsample(processed, target_sample_rate);
    }

    processed
}

/// Downsample by decimation
///
/// Only integer ratios are supported; anything else (including upsampling)
/// returns the frame unchanged.
pub fn downsample(frame: AudioFrame, target_rate: u32) -> AudioFrame {
    if frame.sample_rate == target_rate || target_rate == 0 {
        return frame;
    }

    let ratio = frame.sample_rate / target_rate;
    if ratio <= 1 {
        return frame;
    }

    decimate(frame, ratio)
}

/// Keep every `factor`-th sample frame
pub fn decimate(frame: AudioFrame, factor: u32) -> AudioFrame {
    if factor <= 1 {
        return frame;
    }

    let channels = frame.channels.max(1) as usize;
    let decimated: Vec<i16> = frame
        .samples
        .chunks_exact(channels)
        .step_by(factor as usize)
        .flatten()
        .copied()
        .collect();

    AudioFrame {
        samples: decimated,
        sample_rate: frame.sample_rate / factor,
        channels: frame.channels,
        timestamp_ms: frame.timestamp_ms,
    }
}

/// Average all channels into one
pub fn to_mono(frame: AudioFrame) -> AudioFrame {
    if frame.channels <= 1 {
        return frame;
    }

    let channels = frame.channels as usize;
    let mono_samples: Vec<i16> = frame
        .samples
        .chunks_exact(channels)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect();

    AudioFrame {
        samples: mono_samples,
        sample_rate: frame.sample_rate,
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
    }
}

/// Little-endian PCM bytes, the layout provider sockets expect
pub fn to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>, sample_rate: u32, channels: u16) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_stereo_to_mono_averages_channels() {
        let mono = to_mono(frame(vec![100, 300, -200, 200], 16000, 2));
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples, vec![200, 0]);
    }

    #[test]
    fn test_downsample_48k_to_16k() {
        let samples: Vec<i16> = (0..12).collect();
        let out = downsample(frame(samples, 48000, 1), 16000);
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.samples, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_downsample_refuses_to_upsample() {
        let out = downsample(frame(vec![1, 2, 3], 8000, 1), 16000);
        assert_eq!(out.sample_rate, 8000);
        assert_eq!(out.samples.len(), 3);
    }

    #[test]
    fn test_decimate_keeps_interleaved_pairs() {
        let out = decimate(frame(vec![1, 2, 3, 4, 5, 6, 7, 8], 32000, 2), 2);
        assert_eq!(out.samples, vec![1, 2, 5, 6]);
        assert_eq!(out.sample_rate, 16000);
    }

    #[test]
    fn test_pcm_bytes_little_endian() {
        assert_eq!(to_pcm_bytes(&[1, -1]), vec![0x01, 0x00, 0xff, 0xff]);
    }
}
