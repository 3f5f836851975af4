//! Onset strength envelope: log-power mel spectrogram reduced to a per-frame
//! positive spectral flux.

use std::sync::Arc;

use rayon::prelude::*;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::audio::types::AudioBuffer;

/// STFT frame length
pub const N_FFT: usize = 2048;

/// Number of mel bands
pub const N_MELS: usize = 128;

/// Dynamic range kept below the loudest bin, in dB
const TOP_DB: f32 = 80.0;

/// Power floor before taking the log
const AMIN: f32 = 1e-10;

/// How per-band flux is reduced to one value per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Used for tempo estimation
    Mean,
    /// Used for beat tracking
    Median,
}

/// Triangular mel filter stored as its non-zero span of FFT bins
struct MelFilter {
    first_bin: usize,
    weights: Vec<f32>,
}

/// Log-power mel spectrogram, one row of `N_MELS` dB values per frame
pub struct MelSpectrogram {
    frames: Vec<Vec<f32>>,
    hop_length: usize,
}

impl MelSpectrogram {
    /// Centered STFT (zero padded by `N_FFT / 2` on both sides) with a
    /// periodic Hann window, mapped onto a Slaney mel filterbank.
    pub fn compute(buffer: &AudioBuffer, hop_length: usize) -> Self {
        let hop_length = hop_length.max(1);
        let half = N_FFT / 2;

        let mut padded = vec![0.0f32; buffer.len() + N_FFT];
        padded[half..half + buffer.len()].copy_from_slice(&buffer.samples);

        let n_frames = 1 + (padded.len() - N_FFT) / hop_length;
        let window = hann_window(N_FFT);
        let filters = mel_filterbank(buffer.sample_rate, N_FFT, N_MELS);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft: Arc<dyn RealToComplex<f32>> = planner.plan_fft_forward(N_FFT);

        let mut frames: Vec<Vec<f32>> = (0..n_frames)
            .into_par_iter()
            .map_init(
                || (fft.make_input_vec(), fft.make_output_vec()),
                |(input, spectrum), t| {
                    let start = t * hop_length;
                    for ((dst, &s), &w) in input
                        .iter_mut()
                        .zip(&padded[start..start + N_FFT])
                        .zip(&window)
                    {
                        *dst = s * w;
                    }

                    // Lengths are fixed by the plan, so this cannot fail
                    if fft.process(input, spectrum).is_err() {
                        return vec![10.0 * AMIN.log10(); N_MELS];
                    }

                    mel_frame(spectrum, &filters)
                },
            )
            .collect();

        // Keep TOP_DB of dynamic range below the global maximum
        let max_db = frames
            .iter()
            .flat_map(|f| f.iter().copied())
            .fold(f32::NEG_INFINITY, f32::max);
        let floor = max_db - TOP_DB;
        for frame in &mut frames {
            for v in frame.iter_mut() {
                *v = v.max(floor);
            }
        }

        Self { frames, hop_length }
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Onset strength per frame.
    ///
    /// Flux between consecutive frames is half-wave rectified per band and
    /// aggregated, then delayed by `1 + N_FFT / (2 * hop)` frames to undo the
    /// centering of the STFT. The envelope has exactly `n_frames()` values.
    pub fn onset_envelope(&self, aggregate: Aggregate) -> Vec<f32> {
        let n = self.frames.len();
        let shift = 1 + N_FFT / (2 * self.hop_length);

        let mut envelope = vec![0.0f32; n];
        let mut flux = vec![0.0f32; N_MELS];

        for t in 1..n {
            let target = t - 1 + shift;
            if target >= n {
                break;
            }

            for ((f, &cur), &prev) in flux
                .iter_mut()
                .zip(&self.frames[t])
                .zip(&self.frames[t - 1])
            {
                *f = (cur - prev).max(0.0);
            }

            envelope[target] = match aggregate {
                Aggregate::Mean => flux.iter().sum::<f32>() / N_MELS as f32,
                Aggregate::Median => median(&mut flux),
            };
        }

        envelope
    }
}

/// Periodic Hann window
pub(crate) fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / len as f64).cos())
        .map(|w| w as f32)
        .collect()
}

/// Power spectrum of one frame through the filterbank, in dB
fn mel_frame(spectrum: &[Complex<f32>], filters: &[MelFilter]) -> Vec<f32> {
    filters
        .iter()
        .map(|filter| {
            let energy: f32 = filter
                .weights
                .iter()
                .zip(&spectrum[filter.first_bin..])
                .map(|(w, c)| w * c.norm_sqr())
                .sum();
            10.0 * energy.max(AMIN).log10()
        })
        .collect()
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Slaney-style mel scale: linear below 1 kHz, logarithmic above
fn hz_to_mel(hz: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;

    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;

    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// Area-normalized triangular filters spanning 0 Hz to Nyquist
fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<MelFilter> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let mel_freqs: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (mel_freqs[m], mel_freqs[m + 1], mel_freqs[m + 2]);
            let enorm = 2.0 / (hi - lo);

            let dense: Vec<f32> = fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - lo) / (center - lo);
                    let upper = (hi - f) / (hi - center);
                    (lower.min(upper).max(0.0) * enorm) as f32
                })
                .collect();

            let first_bin = dense.iter().position(|&w| w > 0.0).unwrap_or(0);
            let last_bin = dense.iter().rposition(|&w| w > 0.0).unwrap_or(first_bin);

            MelFilter {
                first_bin,
                weights: dense[first_bin..=last_bin].to_vec(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_buffer(sample_rate: u32, seconds: f64, click_times: &[f64]) -> AudioBuffer {
        let mut samples = vec![0.0f32; (seconds * sample_rate as f64) as usize];
        for &t in click_times {
            let start = (t * sample_rate as f64) as usize;
            for i in 0..2205 {
                if let Some(s) = samples.get_mut(start + i) {
                    let decay = 2f32.powf(-10.0 * i as f32 / 2205.0);
                    *s += decay * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sample_rate as f32).sin();
                }
            }
        }
        AudioBuffer::new(samples, sample_rate)
    }

    #[test]
    fn test_mel_scale_roundtrip() {
        for hz in [0.0, 200.0, 999.0, 1000.0, 4000.0, 11025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_filterbank_shape() {
        let filters = mel_filterbank(22050, N_FFT, N_MELS);
        assert_eq!(filters.len(), N_MELS);
        // Filters move up the spectrum and never overrun it
        for pair in filters.windows(2) {
            assert!(pair[0].first_bin <= pair[1].first_bin);
        }
        for f in &filters {
            assert!(!f.weights.is_empty());
            assert!(f.first_bin + f.weights.len() <= N_FFT / 2 + 1);
            assert!(f.weights.iter().all(|&w| w >= 0.0));
        }
    }

    #[test]
    fn test_frame_count() {
        for (len, hop) in [(0, 256), (100, 256), (22050, 256), (22050, 512), (10_000, 1)] {
            let buffer = AudioBuffer::new(vec![0.0; len], 22050);
            let env = MelSpectrogram::compute(&buffer, hop).onset_envelope(Aggregate::Mean);
            assert_eq!(env.len(), 1 + len / hop, "len {len} hop {hop}");
        }
    }

    #[test]
    fn test_silence_has_no_onsets() {
        let buffer = AudioBuffer::new(vec![0.0; 22050], 22050);
        let spec = MelSpectrogram::compute(&buffer, 256);
        assert!(spec.onset_envelope(Aggregate::Mean).iter().all(|&v| v == 0.0));
        assert!(spec.onset_envelope(Aggregate::Median).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_click_onset_lands_on_click_frame() {
        let sample_rate = 22050;
        let hop = 256;
        let buffer = click_buffer(sample_rate, 3.0, &[1.0]);
        let spec = MelSpectrogram::compute(&buffer, hop);

        for aggregate in [Aggregate::Mean, Aggregate::Median] {
            let env = spec.onset_envelope(aggregate);
            let (peak, &value) = env
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .unwrap();

            let expected = sample_rate as usize / hop; // frame of t = 1.0 s
            assert!(value > 0.0);
            assert!(
                peak.abs_diff(expected) <= 4,
                "{aggregate:?}: peak at frame {peak}, click at {expected}"
            );
            // Nothing before the click reaches the window
            assert!(env[..expected - 8].iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }
}
