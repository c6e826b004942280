use std::io::Cursor;
use tracing::{debug, info};

use crate::error::RecorderFault;
use crate::media::{convert, AudioFrame};

/// Encodings to try, most preferred first
pub const MIME_CANDIDATES: &[&str] = &[
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8,opus",
    "audio/wav",
];

/// Target bitrate; keeps session-length recordings manageable in memory
pub const DEFAULT_BITS_PER_SECOND: u32 = 100_000;

/// Lowest sample rate the bitrate budget may push a recording down to
const MIN_SAMPLE_RATE: u32 = 8000;

#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub mime_type: String,
    pub bits_per_second: u32,
}

/// Container encoder fed with captured frames
pub trait MediaEncoder: Send {
    fn mime_type(&self) -> &str;

    fn push(&mut self, frame: &AudioFrame) -> Result<(), RecorderFault>;

    /// Finalize and return the encoded bytes (may be empty if nothing was pushed)
    fn finish(self: Box<Self>) -> Result<Vec<u8>, RecorderFault>;
}

/// Creates encoders for the encodings this platform supports
pub trait EncoderFactory: Send + Sync {
    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn create(&self, options: &EncoderOptions) -> Result<Box<dyn MediaEncoder>, RecorderFault>;
}

/// First candidate the factory supports
pub fn select_mime_type<'a>(factory: &dyn EncoderFactory, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(String::as_str)
        .find(|mime| factory.is_type_supported(mime))
}

/// File extension for a mime type, ignoring codec parameters
pub fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    match essence {
        "video/webm" | "audio/webm" => "webm",
        "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "video/mp4" | "audio/mp4" => "mp4",
        "audio/mpeg" => "mp3",
        _ => "bin",
    }
}

/// 16-bit PCM WAV encoder
pub struct WavEncoderFactory;

impl EncoderFactory for WavEncoderFactory {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        extension_for(mime_type) == "wav"
    }

    fn create(&self, options: &EncoderOptions) -> Result<Box<dyn MediaEncoder>, RecorderFault> {
        if !self.is_type_supported(&options.mime_type) {
            return Err(RecorderFault::UnsupportedEncoding(vec![options.mime_type.clone()]));
        }
        Ok(Box::new(WavEncoder::new(options.clone())))
    }
}

/// Buffers PCM and writes one WAV file when finished
///
/// Like a recorder started without a timeslice, all data arrives as a single
/// chunk at the end.
pub struct WavEncoder {
    options: EncoderOptions,
    samples: Vec<i16>,
    format: Option<(u32, u16)>,
    decimation: u32,
}

impl WavEncoder {
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            options,
            samples: Vec::new(),
            format: None,
            decimation: 1,
        }
    }

    /// Output sample rate and channel count, known after the first frame
    pub fn output_format(&self) -> Option<(u32, u16)> {
        self.format
    }
}

/// Smallest integer factor that fits 16-bit PCM under the bitrate budget
/// without dropping below 8 kHz
pub fn decimation_for(sample_rate: u32, channels: u16, bits_per_second: u32) -> u32 {
    if bits_per_second == 0 || sample_rate <= MIN_SAMPLE_RATE {
        return 1;
    }

    let raw_bps = sample_rate as u64 * 16 * channels.max(1) as u64;
    let mut factor = raw_bps.div_ceil(bits_per_second as u64).max(1) as u32;
    while factor > 1 && sample_rate / factor < MIN_SAMPLE_RATE {
        factor -= 1;
    }
    factor
}

impl MediaEncoder for WavEncoder {
    fn mime_type(&self) -> &str {
        &self.options.mime_type
    }

    fn push(&mut self, frame: &AudioFrame) -> Result<(), RecorderFault> {
        if frame.samples.is_empty() {
            return Ok(());
        }

        match self.format {
            None => {
                self.decimation =
                    decimation_for(frame.sample_rate, frame.channels, self.options.bits_per_second);
                let rate = frame.sample_rate / self.decimation;
                self.format = Some((rate, frame.channels));
                info!(
                    "WAV encoder: {}Hz x{} in, {}Hz out ({} bps budget)",
                    frame.sample_rate, frame.channels, rate, self.options.bits_per_second
                );
            }
            Some((_, channels)) if channels != frame.channels => {
                return Err(RecorderFault::Encoder(format!(
                    "channel count changed mid-recording ({} -> {})",
                    channels, frame.channels
                )));
            }
            Some(_) => {}
        }

        let decimated = convert::decimate(frame.clone(), self.decimation);
        self.samples.extend_from_slice(&decimated.samples);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, RecorderFault> {
        let Some((sample_rate, channels)) = self.format else {
            debug!("WAV encoder finished without data");
            return Ok(Vec::new());
        };

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| RecorderFault::Encoder(e.to_string()))?;
            for &sample in &self.samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| RecorderFault::Encoder(e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| RecorderFault::Encoder(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_first_supported_candidate() {
        let candidates: Vec<String> = MIME_CANDIDATES.iter().map(|s| s.to_string()).collect();
        assert_eq!(select_mime_type(&WavEncoderFactory, &candidates), Some("audio/wav"));
    }

    #[test]
    fn test_select_none_when_unsupported() {
        let candidates = vec!["video/webm;codecs=vp9".to_string()];
        assert_eq!(select_mime_type(&WavEncoderFactory, &candidates), None);
    }

    #[test]
    fn test_extension_ignores_codecs() {
        assert_eq!(extension_for("video/webm;codecs=vp8,opus"), "webm");
        assert_eq!(extension_for("audio/wav"), "wav");
        assert_eq!(extension_for("application/x-unknown"), "bin");
    }

    #[test]
    fn test_decimation_respects_budget_and_floor() {
        // 48kHz mono = 768 kbps, budget 100 kbps -> factor 8 (6kHz) floored to 6 (8kHz)
        assert_eq!(decimation_for(48000, 1, 100_000), 6);
        // 16kHz mono = 256 kbps -> factor 3 would be 5.3kHz, floored to 2 (8kHz)
        assert_eq!(decimation_for(16000, 1, 100_000), 2);
        assert_eq!(decimation_for(8000, 1, 100_000), 1);
        assert_eq!(decimation_for(16000, 1, 1_000_000), 1);
    }
}
