//! Autocorrelation tempo estimation.
//!
//! The onset envelope is cut into overlapping windows of `ac_size` seconds
//! (one per onset frame), each window is Hann weighted and autocorrelated,
//! and every lag is scored against a log-normal tempo prior centred on the
//! seed tempo. Averaging the autocorrelations gives the static tempo, taking
//! the best lag per frame gives the dynamic tempo curve.

use std::sync::Arc;

use rayon::prelude::*;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use tracing::debug;

use crate::audio::beat::{BeatTracker, TempoGuide};
use crate::audio::onset::{hann_window, Aggregate, MelSpectrogram};
use crate::audio::types::{frames_to_time, round2, AudioBuffer, TempoCurve, TempoParameters};
use crate::error::Result;

/// Static tempo estimate with its first-pass beats
#[derive(Debug, Clone, PartialEq)]
pub struct StaticTempo {
    /// Representative tempo in BPM (0.0 for a signal without onsets)
    pub bpm: f64,

    /// Beat times in seconds, relative to the analyzed buffer
    pub beats: Vec<f64>,

    /// Seed tempo every later stage runs with
    pub start_bpm: f64,
}

/// Tempo estimator over one buffer.
///
/// Holds both onset envelopes (mean-aggregated for tempo, median-aggregated
/// for beat tracking) so the spectrogram is computed once.
pub struct TempoEstimator {
    params: TempoParameters,
    sample_rate: u32,
    tempo_onsets: Vec<f32>,
    beat_onsets: Vec<f32>,
}

impl TempoEstimator {
    pub fn new(buffer: &AudioBuffer, params: &TempoParameters) -> Result<Self> {
        params.validate()?;

        let spectrogram = MelSpectrogram::compute(buffer, params.hop_length);
        debug!(
            "Onset analysis: {} frames (hop {}, {} Hz)",
            spectrogram.n_frames(),
            params.hop_length,
            buffer.sample_rate
        );

        Ok(Self {
            params: params.clone(),
            sample_rate: buffer.sample_rate,
            tempo_onsets: spectrogram.onset_envelope(Aggregate::Mean),
            beat_onsets: spectrogram.onset_envelope(Aggregate::Median),
        })
    }

    /// Onset frames per second
    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.params.hop_length as f64
    }

    /// Static tempo under the auto-seed policy.
    ///
    /// With `start_bpm_auto`, a first pass seeded with `params.start_bpm`
    /// yields a tempo which, rounded to two decimals, seeds the second pass.
    /// The second pass is the result.
    pub fn static_tempo(&self) -> StaticTempo {
        let start_bpm = self.operative_start_bpm();
        let (bpm, beats) = self.beat_track(start_bpm);

        debug!("Static tempo {:.2} BPM, {} beats (seed {:.2})", bpm, beats.len(), start_bpm);

        StaticTempo {
            bpm,
            beats,
            start_bpm,
        }
    }

    /// Seed tempo for everything after the first pass
    pub fn operative_start_bpm(&self) -> f64 {
        if self.params.start_bpm_auto {
            let (first_pass, _) = self.beat_track(self.params.start_bpm);
            round2(first_pass)
        } else {
            self.params.start_bpm
        }
    }

    /// One tempo estimate plus beat tracking, seeded with `start_bpm`
    pub fn beat_track(&self, start_bpm: f64) -> (f64, Vec<f64>) {
        if self.beat_onsets.iter().all(|&v| v == 0.0) {
            return (0.0, Vec::new());
        }

        let bpm = self.global_tempo(&self.beat_onsets, start_bpm);
        let frames = self.tracker().track(&self.beat_onsets, self.frame_rate(), TempoGuide::Global(bpm));

        (bpm, self.frames_to_times(&frames))
    }

    /// Tempo per onset frame, seeded with `start_bpm`
    pub fn dynamic_tempo(&self, start_bpm: f64) -> TempoCurve {
        let tempogram = Tempogram::new(&self.tempo_onsets, self.win_length());
        let prior = self.log_prior(tempogram.win_length, start_bpm);
        let bpms = lag_bpms(tempogram.win_length, self.frame_rate());

        // Frames are independent; the parallel map is order preserving
        let per_frame: Vec<f64> = (0..tempogram.n_frames())
            .into_par_iter()
            .map_init(
                || tempogram.scratch(),
                |scratch, t| {
                    let column = tempogram.column(t, scratch);
                    bpms[best_lag(column, &prior)]
                },
            )
            .collect();

        debug!("Dynamic tempo: {} frames, seed {:.2}", per_frame.len(), start_bpm);

        TempoCurve::from_frames(per_frame, self.params.hop_length, self.sample_rate)
    }

    /// Beat times following a per-frame tempo curve
    pub fn align(&self, curve: &TempoCurve) -> Vec<f64> {
        if curve.is_empty() {
            return Vec::new();
        }

        let bpms = curve.bpms();
        let last = bpms[bpms.len() - 1];
        let local: Vec<f64> = (0..self.beat_onsets.len())
            .map(|i| bpms.get(i).copied().unwrap_or(last))
            .collect();

        let frames = self
            .tracker()
            .track(&self.beat_onsets, self.frame_rate(), TempoGuide::Local(&local));

        self.frames_to_times(&frames)
    }

    /// Best lag of the frame-averaged tempogram
    fn global_tempo(&self, onsets: &[f32], start_bpm: f64) -> f64 {
        let tempogram = Tempogram::new(onsets, self.win_length());
        let mut scratch = tempogram.scratch();
        let mut mean = vec![0.0f64; tempogram.win_length];

        for t in 0..tempogram.n_frames() {
            for (m, &v) in mean.iter_mut().zip(tempogram.column(t, &mut scratch)) {
                *m += v as f64;
            }
        }
        let n = tempogram.n_frames().max(1) as f64;
        let mean: Vec<f32> = mean.into_iter().map(|v| (v / n) as f32).collect();

        let prior = self.log_prior(tempogram.win_length, start_bpm);
        lag_bpms(tempogram.win_length, self.frame_rate())[best_lag(&mean, &prior)]
    }

    /// Autocorrelation window in onset frames
    fn win_length(&self) -> usize {
        let samples = (self.params.ac_size * self.sample_rate as f64).floor() as usize;
        (samples / self.params.hop_length).max(1)
    }

    fn log_prior(&self, win_length: usize, start_bpm: f64) -> Vec<f64> {
        log_prior(
            &lag_bpms(win_length, self.frame_rate()),
            start_bpm,
            self.params.std_bpm,
            self.params.max_bpm,
        )
    }

    fn tracker(&self) -> BeatTracker {
        BeatTracker::new(self.params.tightness, self.params.trim)
    }

    fn frames_to_times(&self, frames: &[usize]) -> Vec<f64> {
        frames
            .iter()
            .map(|&f| frames_to_time(f, self.params.hop_length, self.sample_rate))
            .collect()
    }
}

/// Static tempo and first-pass beats for a buffer
pub fn static_tempo(buffer: &AudioBuffer, params: &TempoParameters) -> Result<StaticTempo> {
    Ok(TempoEstimator::new(buffer, params)?.static_tempo())
}

/// Tempo curve seeded with the operative start tempo
pub fn dynamic_tempo(buffer: &AudioBuffer, params: &TempoParameters) -> Result<TempoCurve> {
    let estimator = TempoEstimator::new(buffer, params)?;
    Ok(estimator.dynamic_tempo(estimator.operative_start_bpm()))
}

/// Seed tempo after the auto-seed policy
pub fn operative_start_bpm(buffer: &AudioBuffer, params: &TempoParameters) -> Result<f64> {
    Ok(TempoEstimator::new(buffer, params)?.operative_start_bpm())
}

/// Tempo of each autocorrelation lag; lag 0 is infinitely fast
pub fn lag_bpms(win_length: usize, frame_rate: f64) -> Vec<f64> {
    (0..win_length)
        .map(|lag| {
            if lag == 0 {
                f64::INFINITY
            } else {
                60.0 * frame_rate / lag as f64
            }
        })
        .collect()
}

/// Log-normal prior over log2 tempo; lags at or above `max_bpm` are excluded
pub fn log_prior(bpms: &[f64], start_bpm: f64, std_bpm: f64, max_bpm: f64) -> Vec<f64> {
    bpms.iter()
        .map(|&bpm| {
            if !bpm.is_finite() || bpm >= max_bpm {
                f64::NEG_INFINITY
            } else {
                -0.5 * ((bpm.log2() - start_bpm.log2()) / std_bpm).powi(2)
            }
        })
        .collect()
}

/// First lag maximising `ln(1 + 1e6 * ac) + prior`
fn best_lag(column: &[f32], prior: &[f64]) -> usize {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;

    for (lag, (&ac, &p)) in column.iter().zip(prior).enumerate() {
        let score = (1e6 * ac as f64).ln_1p() + p;
        if score > best_score {
            best_score = score;
            best = lag;
        }
    }

    best
}

/// Per-frame scratch buffers for the FFT autocorrelation
struct Scratch {
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    output: Vec<f32>,
    column: Vec<f32>,
}

/// Local autocorrelation of an onset envelope, one column per frame
struct Tempogram {
    /// Envelope padded with linear ramps to zero on both sides
    padded: Vec<f32>,
    n_frames: usize,
    win_length: usize,
    window: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
    ifft: Arc<dyn ComplexToReal<f32>>,
}

impl Tempogram {
    fn new(onsets: &[f32], win_length: usize) -> Self {
        let pad = win_length / 2;
        let n = onsets.len();

        let mut padded = Vec::with_capacity(n + 2 * pad);
        let first = onsets.first().copied().unwrap_or(0.0);
        let last = onsets.last().copied().unwrap_or(0.0);
        padded.extend((0..pad).map(|j| first * j as f32 / pad as f32));
        padded.extend_from_slice(onsets);
        padded.extend((0..pad).map(|j| last * (pad - 1 - j) as f32 / pad as f32));

        let n_fft = (2 * win_length - 1).next_power_of_two().max(2);
        let mut planner = RealFftPlanner::<f32>::new();

        Self {
            padded,
            n_frames: n,
            win_length,
            window: hann_window(win_length),
            fft: planner.plan_fft_forward(n_fft),
            ifft: planner.plan_fft_inverse(n_fft),
        }
    }

    fn n_frames(&self) -> usize {
        self.n_frames
    }

    fn scratch(&self) -> Scratch {
        Scratch {
            input: self.fft.make_input_vec(),
            spectrum: self.fft.make_output_vec(),
            output: self.ifft.make_output_vec(),
            column: vec![0.0; self.win_length],
        }
    }

    /// Max-normalised autocorrelation (lags `0..win_length`) of frame `t`
    fn column<'s>(&self, t: usize, scratch: &'s mut Scratch) -> &'s [f32] {
        let frame = &self.padded[t..t + self.win_length];

        scratch.input.fill(0.0);
        for ((dst, &x), &w) in scratch.input.iter_mut().zip(frame).zip(&self.window) {
            *dst = x * w;
        }

        // Power spectrum back to the time domain gives the autocorrelation
        let n_fft = scratch.input.len();
        let ok = self.fft.process(&mut scratch.input, &mut scratch.spectrum).is_ok() && {
            for c in scratch.spectrum.iter_mut() {
                *c = Complex::new(c.norm_sqr(), 0.0);
            }
            self.ifft
                .process(&mut scratch.spectrum, &mut scratch.output)
                .is_ok()
        };
        if !ok {
            scratch.column.fill(0.0);
            return &scratch.column;
        }

        for (dst, &v) in scratch.column.iter_mut().zip(&scratch.output) {
            *dst = v / n_fft as f32;
        }

        let max = scratch.column.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        if max > f32::MIN_POSITIVE {
            for v in scratch.column.iter_mut() {
                *v /= max;
            }
        }

        &scratch.column
    }
}
