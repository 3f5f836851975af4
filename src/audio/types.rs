use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AudioError, Result};

/// Sample rate every file is decoded to before analysis
pub const ANALYSIS_SAMPLE_RATE: u32 = 22050;

/// Mono audio samples at a known sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Mono samples, nominally in -1.0..=1.0
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Sample index for a time in seconds, rounded to the nearest sample
    pub fn time_to_sample(&self, time: f64) -> usize {
        (time * self.sample_rate as f64).round().max(0.0) as usize
    }

    /// Slice the buffer to a window, returning the trimmed copy and the
    /// window with its end resolved against this buffer's duration.
    pub fn trim(&self, window: &TimeWindow) -> Result<(AudioBuffer, TimeWindow)> {
        let resolved = window.resolve(self.duration())?;
        let start = self.time_to_sample(resolved.start).min(self.len());
        let end = self
            .time_to_sample(resolved.end_or(self.duration()))
            .clamp(start, self.len());

        let trimmed = AudioBuffer::new(self.samples[start..end].to_vec(), self.sample_rate);
        Ok((trimmed, resolved))
    }
}

/// Time range of the file that gets analyzed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeWindow {
    /// Start time in seconds
    pub start: f64,

    /// End time in seconds; `None` or `0.0` means the full duration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: None,
        }
    }
}

impl TimeWindow {
    pub fn new(start: f64, end: Option<f64>) -> Self {
        Self { start, end }
    }

    /// The whole file
    pub fn full() -> Self {
        Self::default()
    }

    /// End time, falling back to `duration` when unspecified
    pub fn end_or(&self, duration: f64) -> f64 {
        match self.end {
            Some(end) if end != 0.0 => end,
            _ => duration,
        }
    }

    /// Resolve the end against a decoded duration and check `0 <= start < end`.
    ///
    /// An end past the duration is clamped to it.
    pub fn resolve(&self, duration: f64) -> Result<TimeWindow> {
        let end = self.end_or(duration).min(duration);
        let start = self.start;

        if !start.is_finite() || !end.is_finite() || start < 0.0 || start >= end {
            return Err(AudioError::InvalidWindow {
                start,
                end,
                duration,
            }
            .into());
        }

        Ok(TimeWindow {
            start,
            end: Some(end),
        })
    }
}

/// Tempo estimation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoParameters {
    /// Initial tempo guess in BPM (replaced by a first-pass estimate when
    /// `start_bpm_auto` is set)
    pub start_bpm: f64,

    /// Standard deviation of the log2 tempo prior
    pub std_bpm: f64,

    /// Upper bound on considered tempo
    pub max_bpm: f64,

    /// How strongly beat placement is pulled toward the tempo estimate
    pub tightness: f64,

    /// Samples between analysis frames
    pub hop_length: usize,

    /// Autocorrelation window length in seconds
    pub ac_size: f64,

    /// Discard weak leading/trailing beats
    pub trim: bool,

    /// Derive `start_bpm` from a first static estimate
    pub start_bpm_auto: bool,
}

impl Default for TempoParameters {
    fn default() -> Self {
        Self {
            start_bpm: 120.0,
            std_bpm: 1.0,
            max_bpm: 320.0,
            tightness: 100.0,
            hop_length: 256,
            ac_size: 8.0,
            trim: true,
            start_bpm_auto: true,
        }
    }
}

impl TempoParameters {
    /// Check every numeric field against its domain
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("start_bpm", self.start_bpm),
            ("std_bpm", self.std_bpm),
            ("max_bpm", self.max_bpm),
            ("tightness", self.tightness),
            ("ac_size", self.ac_size),
        ];

        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(AnalysisError::invalid(name, value).into());
            }
        }

        if self.hop_length == 0 {
            return Err(AnalysisError::invalid("hop_length", self.hop_length).into());
        }

        Ok(())
    }

    /// Same parameters with a different seed tempo
    pub fn with_start_bpm(&self, start_bpm: f64) -> Self {
        Self {
            start_bpm,
            ..self.clone()
        }
    }
}

/// Click-track playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickParameters {
    /// Volume of the original audio under the clicks, 0..=100
    pub volume: u8,

    /// Click tone frequency in Hz
    pub click_freq: f64,

    /// Click length in seconds
    pub click_duration: f64,
}

impl Default for ClickParameters {
    fn default() -> Self {
        Self {
            volume: 20,
            click_freq: 660.0,
            click_duration: 0.1,
        }
    }
}

impl ClickParameters {
    pub fn validate(&self) -> Result<()> {
        if self.volume > 100 {
            return Err(AnalysisError::invalid("volume", self.volume).into());
        }
        if !self.click_freq.is_finite() || self.click_freq <= 0.0 {
            return Err(AnalysisError::invalid("click_freq", self.click_freq).into());
        }
        if !self.click_duration.is_finite() || self.click_duration <= 0.0 {
            return Err(AnalysisError::invalid("click_duration", self.click_duration).into());
        }
        Ok(())
    }
}

/// One sample of the dynamic tempo curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoPoint {
    /// Seconds from the start of the analyzed window
    pub time: f64,

    /// Tempo in BPM
    pub bpm: f64,
}

/// Per-hop tempo estimates, ordered by time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempoCurve {
    pub points: Vec<TempoPoint>,
}

impl TempoCurve {
    pub fn new(points: Vec<TempoPoint>) -> Self {
        Self { points }
    }

    /// Build a curve from per-frame tempi using frame * hop / sample_rate times
    pub fn from_frames(bpms: Vec<f64>, hop_length: usize, sample_rate: u32) -> Self {
        let points = bpms
            .into_iter()
            .enumerate()
            .map(|(frame, bpm)| TempoPoint {
                time: frames_to_time(frame, hop_length, sample_rate),
                bpm,
            })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bpms(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.bpm).collect()
    }

    /// Points with times moved by `offset` seconds
    pub fn shifted(&self, offset: f64) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.time + offset, p.bpm))
            .collect()
    }
}

/// A maximal run of constant (2-decimal rounded) tempo, in absolute time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub bpm: f64,
}

/// Frame index to seconds
pub fn frames_to_time(frame: usize, hop_length: usize, sample_rate: u32) -> f64 {
    (frame * hop_length) as f64 / sample_rate as f64
}

/// Round to two decimals, ties to even
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_defaults_to_full_duration() {
        let resolved = TimeWindow::full().resolve(12.5).unwrap();
        assert_eq!(resolved.start, 0.0);
        assert_eq!(resolved.end, Some(12.5));

        // An explicit zero end also means "until the end"
        let resolved = TimeWindow::new(2.0, Some(0.0)).resolve(12.5).unwrap();
        assert_eq!(resolved.end, Some(12.5));
    }

    #[test]
    fn test_window_end_is_clamped() {
        let resolved = TimeWindow::new(1.0, Some(30.0)).resolve(10.0).unwrap();
        assert_eq!(resolved.end, Some(10.0));
    }

    #[test]
    fn test_invalid_windows() {
        assert!(TimeWindow::new(-1.0, None)
            .resolve(10.0)
            .unwrap_err()
            .is_invalid_window());
        assert!(TimeWindow::new(5.0, Some(5.0))
            .resolve(10.0)
            .unwrap_err()
            .is_invalid_window());
        assert!(TimeWindow::new(6.0, Some(3.0))
            .resolve(10.0)
            .unwrap_err()
            .is_invalid_window());
        assert!(TimeWindow::new(11.0, None)
            .resolve(10.0)
            .unwrap_err()
            .is_invalid_window());
        assert!(TimeWindow::new(f64::NAN, None)
            .resolve(10.0)
            .unwrap_err()
            .is_invalid_window());
    }

    #[test]
    fn test_trim_length_matches_window() {
        let sample_rate = 22050;
        let buffer = AudioBuffer::new(vec![0.25; sample_rate as usize * 10], sample_rate);

        for &(start, end) in &[(0.0, 10.0), (1.3, 7.77), (0.01, 0.02), (9.5, 10.0), (2.0, 2.00005)] {
            let (trimmed, _) = buffer.trim(&TimeWindow::new(start, Some(end))).unwrap();
            let expected = ((end - start) * sample_rate as f64).round() as i64;
            assert!(
                (trimmed.len() as i64 - expected).abs() <= 1,
                "window [{start}, {end}) gave {} samples, expected {expected}",
                trimmed.len()
            );
        }
    }

    #[test]
    fn test_full_window_is_identity() {
        let samples: Vec<f32> = (0..10_007).map(|i| (i as f32 * 0.01).sin()).collect();
        let buffer = AudioBuffer::new(samples, 22050);

        let (trimmed, window) = buffer.trim(&TimeWindow::full()).unwrap();
        assert_eq!(trimmed, buffer);
        assert_eq!(window.end, Some(buffer.duration()));

        let (trimmed, _) = buffer
            .trim(&TimeWindow::new(0.0, Some(buffer.duration())))
            .unwrap();
        assert_eq!(trimmed, buffer);
    }

    #[test]
    fn test_parameter_validation() {
        assert!(TempoParameters::default().validate().is_ok());

        let cases = [
            TempoParameters { hop_length: 0, ..Default::default() },
            TempoParameters { std_bpm: 0.0, ..Default::default() },
            TempoParameters { max_bpm: -10.0, ..Default::default() },
            TempoParameters { ac_size: 0.0, ..Default::default() },
            TempoParameters { start_bpm: f64::NAN, ..Default::default() },
            TempoParameters { tightness: 0.0, ..Default::default() },
        ];
        for params in cases {
            let err = params.validate().unwrap_err();
            assert!(err.is_invalid_parameter(), "{params:?} should be rejected");
        }
    }

    #[test]
    fn test_click_parameter_validation() {
        assert!(ClickParameters::default().validate().is_ok());
        assert!(ClickParameters { volume: 101, ..Default::default() }.validate().is_err());
        assert!(ClickParameters { click_freq: 0.0, ..Default::default() }.validate().is_err());
        assert!(ClickParameters { click_duration: -0.1, ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_curve_frame_times() {
        let curve = TempoCurve::from_frames(vec![120.0, 121.0, 122.0], 256, 22050);
        let times: Vec<f64> = curve.points.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 256.0 / 22050.0, 512.0 / 22050.0]);

        let shifted = curve.shifted(10.0);
        assert_eq!(shifted[0], (10.0, 120.0));
        assert_eq!(shifted[2].1, 122.0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(120.187), 120.19);
        assert_eq!(round2(99.994), 99.99);
        assert_eq!(round2(0.0), 0.0);
    }
}
