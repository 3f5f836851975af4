use std::io::Cursor;
use std::path::Path;

use rubato::{FftFixedInOut, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::types::{AudioBuffer, TimeWindow, ANALYSIS_SAMPLE_RATE};
use crate::error::{AudioError, Result};

/// Chunk size fed to the FFT resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Decoded but not yet resampled audio
struct DecodedAudio {
    /// Mono mixdown
    samples: Vec<f32>,
    sample_rate: u32,
}

/// Audio file loader: decodes any supported format to mono at a fixed
/// analysis sample rate and trims it to a time window.
#[derive(Debug, Clone)]
pub struct AudioLoader {
    sample_rate: u32,
}

impl Default for AudioLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioLoader {
    /// Loader targeting the default 22050 Hz analysis rate
    pub fn new() -> Self {
        Self::with_sample_rate(ANALYSIS_SAMPLE_RATE)
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Load a file and trim it to `window`.
    ///
    /// Returns the trimmed buffer and the window with its end resolved.
    pub fn load<P: AsRef<Path>>(&self, path: P, window: &TimeWindow) -> Result<(AudioBuffer, TimeWindow)> {
        let full = self.load_full(path)?;
        full.trim(window)
    }

    /// Load a whole file without trimming
    pub fn load_full<P: AsRef<Path>>(&self, path: P) -> Result<AudioBuffer> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|_| AudioError::LoadFailed {
            path: path.display().to_string(),
        })?;
        let extension = Self::detect_format(path).unwrap_or_default();

        self.decode_bytes(&bytes, &extension, &path.display().to_string())
    }

    /// Decode an in-memory file, dispatching on its extension
    pub fn decode_bytes(&self, bytes: &[u8], extension: &str, name: &str) -> Result<AudioBuffer> {
        let extension = extension.to_lowercase();
        if !Self::is_format_supported(&extension) {
            return Err(AudioError::UnsupportedFormat { format: extension }.into());
        }

        let decoded = if extension == "wav" {
            Self::decode_wav(bytes, name)?
        } else {
            Self::decode_with_symphonia(bytes, &extension, name)?
        };

        tracing::debug!(
            "Decoded {}: {} samples at {} Hz",
            name,
            decoded.samples.len(),
            decoded.sample_rate
        );

        let samples = if decoded.sample_rate == self.sample_rate {
            decoded.samples
        } else {
            self.resample(&decoded.samples, decoded.sample_rate, name)?
        };

        Ok(AudioBuffer::new(samples, self.sample_rate))
    }

    /// Decode WAV with hound
    fn decode_wav(bytes: &[u8], name: &str) -> Result<DecodedAudio> {
        let decode_failed = |e: hound::Error| AudioError::DecodeFailed {
            path: name.to_string(),
            reason: e.to_string(),
        };

        let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(decode_failed)?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(decode_failed)?,
            hound::SampleFormat::Int => {
                let bit_depth = spec.bits_per_sample;
                reader
                    .into_samples::<i32>()
                    .map(|sample| sample.map(|s| Self::int_to_float(s, bit_depth)))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(decode_failed)?
            }
        };

        Ok(DecodedAudio {
            samples: Self::downmix(&interleaved, spec.channels as usize),
            sample_rate: spec.sample_rate,
        })
    }

    /// Decode any other container with Symphonia
    fn decode_with_symphonia(bytes: &[u8], extension: &str, name: &str) -> Result<DecodedAudio> {
        let decode_failed = |reason: String| AudioError::DecodeFailed {
            path: name.to_string(),
            reason,
        };

        let source = Cursor::new(bytes.to_vec());
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(extension);

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| decode_failed(e.to_string()))?;

        let mut format = probed.format;

        // Find the first audio track with a known (decodable) codec
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| decode_failed("no audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| decode_failed("no sample rate found".to_string()))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| decode_failed(e.to_string()))?;

        let mut samples = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(decode_failed(e.to_string()).into()),
            };

            // Consume any new metadata
            while !format.metadata().is_latest() {
                format.metadata().pop();
            }

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let channels = spec.channels.count();
                    let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    sample_buf.copy_interleaved_ref(decoded);
                    samples.extend(Self::downmix(sample_buf.samples(), channels));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!("Skipping undecodable packet in {}: {}", name, e);
                    continue;
                }
                Err(e) => return Err(decode_failed(e.to_string()).into()),
            }
        }

        if samples.is_empty() {
            return Err(decode_failed("no audio samples decoded".to_string()).into());
        }

        Ok(DecodedAudio {
            samples,
            sample_rate,
        })
    }

    /// Resample mono audio to the analysis rate
    fn resample(&self, samples: &[f32], source_rate: u32, name: &str) -> Result<Vec<f32>> {
        let resample_failed = |reason: String| AudioError::DecodeFailed {
            path: name.to_string(),
            reason,
        };

        let mut resampler = FftFixedInOut::<f32>::new(
            source_rate as usize,
            self.sample_rate as usize,
            RESAMPLE_CHUNK,
            1,
        )
        .map_err(|e| resample_failed(e.to_string()))?;

        let expected_len = (samples.len() as f64 * self.sample_rate as f64 / source_rate as f64)
            .round() as usize;
        let delay = resampler.output_delay();

        let mut output = Vec::with_capacity(expected_len + delay + RESAMPLE_CHUNK);
        let mut pos = 0;

        // Keep feeding (zero padded past the end) until the delayed tail is out
        while output.len() < expected_len + delay {
            let chunk_size = resampler.input_frames_next();
            let mut chunk = vec![0.0f32; chunk_size];
            if pos < samples.len() {
                let available = (samples.len() - pos).min(chunk_size);
                chunk[..available].copy_from_slice(&samples[pos..pos + available]);
            }
            pos += chunk_size;

            let resampled = resampler
                .process(&[chunk], None)
                .map_err(|e| resample_failed(e.to_string()))?;
            output.extend_from_slice(&resampled[0]);
        }

        tracing::debug!(
            "Resampled {} Hz -> {} Hz ({} -> {} samples)",
            source_rate,
            self.sample_rate,
            samples.len(),
            expected_len
        );

        Ok(output[delay..delay + expected_len].to_vec())
    }

    /// Average interleaved channels into one
    fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
        if channels <= 1 {
            return interleaved.to_vec();
        }

        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    /// Convert integer sample to float (-1.0 to 1.0)
    fn int_to_float(sample: i32, bit_depth: u16) -> f32 {
        match bit_depth {
            8 => sample as f32 / 128.0,
            16 => sample as f32 / 32768.0,
            24 => sample as f32 / 8388608.0,
            32 => sample as f32 / 2147483648.0,
            _ => sample as f32 / 32768.0, // Default to 16-bit
        }
    }

    /// Detect audio format from file extension
    pub fn detect_format<P: AsRef<Path>>(path: P) -> Option<String> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    /// Check if a file format is supported
    pub fn is_format_supported(extension: &str) -> bool {
        matches!(
            extension.to_lowercase().as_str(),
            "wav" | "mp3" | "flac" | "ogg" | "m4a" | "aac" | "wma" | "aiff" | "aif"
        )
    }
}
