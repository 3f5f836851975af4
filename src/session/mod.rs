//! # Analysis Session
//!
//! Runs the whole tempo pipeline for one file and parameter set and hands the
//! outputs to callers as one immutable [`AnalysisResult`]. Results are looked
//! up in an injected [`AnalysisCache`] keyed by file contents and settings.
//!
//! The pipeline:
//! 1. Load and trim the audio to the requested window
//! 2. Static tempo (two passes when `start_bpm_auto` is set)
//! 3. Dynamic tempo curve seeded with the operative start tempo
//! 4. Beat alignment along the curve
//! 5. Segmentation of the curve

pub mod cache;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::audio::{
    click, segment, AudioBuffer, AudioLoader, ClickParameters, Segment, TempoCurve, TempoEstimator,
    TempoParameters, TimeWindow,
};
use crate::audio::types::round2;
use crate::error::{AudioError, Result};

pub use cache::{AnalysisCache, CacheKey, InMemoryCache, NoCache};

/// Everything derived from one (file, parameters, window) triple
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    audio: AudioBuffer,
    window: TimeWindow,
    start_bpm: f64,
    static_tempo: f64,
    static_beats: Vec<f64>,
    curve: TempoCurve,
    beats: Vec<f64>,
    segments: Vec<Segment>,
}

impl AnalysisResult {
    /// Assemble a result from pipeline outputs; beat times are relative to
    /// the trimmed buffer and segments are derived from the curve.
    pub fn from_parts(
        audio: AudioBuffer,
        window: TimeWindow,
        start_bpm: f64,
        static_tempo: f64,
        static_beats: Vec<f64>,
        curve: TempoCurve,
        beats: Vec<f64>,
    ) -> Self {
        let segments = segment::segmentize(&curve, window.start);
        Self {
            audio,
            window,
            start_bpm,
            static_tempo,
            static_beats,
            curve,
            beats,
            segments,
        }
    }

    /// The analyzed (trimmed) audio
    pub fn audio(&self) -> &AudioBuffer {
        &self.audio
    }

    /// The analyzed window with its end resolved
    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Static tempo rounded to two decimals
    pub fn static_tempo(&self) -> f64 {
        round2(self.static_tempo)
    }

    /// Seed tempo the curve and beats were computed with
    pub fn operative_start_bpm(&self) -> f64 {
        self.start_bpm
    }

    /// Tempo curve with times relative to the window start
    pub fn tempo_curve(&self) -> &TempoCurve {
        &self.curve
    }

    /// `(time, bpm)` pairs with absolute times
    pub fn tempo_points(&self) -> Vec<(f64, f64)> {
        self.curve.shifted(self.window.start)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Curve-aligned beat times, absolute
    pub fn beat_times(&self) -> Vec<f64> {
        self.beats.iter().map(|t| t + self.window.start).collect()
    }

    /// Static-pass beat times, absolute
    pub fn static_beat_times(&self) -> Vec<f64> {
        self.static_beats.iter().map(|t| t + self.window.start).collect()
    }

    /// First static-pass beat, absolute
    pub fn first_beat(&self) -> Option<f64> {
        self.static_beat_times().first().copied()
    }

    /// Source audio at `volume` percent with clicks on the aligned beats
    pub fn render_audio(&self, volume: u8, click_freq: f64, click_duration: f64) -> Result<(Vec<f32>, u32)> {
        click::render(&self.audio, &self.beats, volume, click_freq, click_duration)
    }

    pub fn render_with(&self, playback: &ClickParameters) -> Result<(Vec<f32>, u32)> {
        self.render_audio(playback.volume, playback.click_freq, playback.click_duration)
    }

    /// Serializable summary of the result
    pub fn report(&self) -> AnalysisReport {
        AnalysisReport {
            start: self.window.start,
            end: self.window.end_or(self.window.start + self.audio.duration()),
            static_tempo: self.static_tempo(),
            start_bpm: self.start_bpm,
            first_beat: self.first_beat(),
            static_beats: self.static_beat_times(),
            segments: self.segments.clone(),
            tempo: self.tempo_points(),
            beats: self.beat_times(),
        }
    }
}

/// Plain-data view of an [`AnalysisResult`] for JSON output
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub start: f64,
    pub end: f64,
    pub static_tempo: f64,
    pub start_bpm: f64,
    pub first_beat: Option<f64>,
    pub static_beats: Vec<f64>,
    pub segments: Vec<Segment>,
    pub tempo: Vec<(f64, f64)>,
    pub beats: Vec<f64>,
}

/// Orchestrates loading, analysis and caching
pub struct AnalysisSession {
    loader: AudioLoader,
    cache: Arc<dyn AnalysisCache>,
}

impl AnalysisSession {
    pub fn new(cache: Arc<dyn AnalysisCache>) -> Self {
        Self::with_loader(AudioLoader::new(), cache)
    }

    pub fn with_loader(loader: AudioLoader, cache: Arc<dyn AnalysisCache>) -> Self {
        Self { loader, cache }
    }

    /// Analyze `path` over `window`, reusing a cached result when the file
    /// contents and settings match a previous call
    pub fn analyze<P: AsRef<Path>>(
        &self,
        path: P,
        params: &TempoParameters,
        window: &TimeWindow,
    ) -> Result<Arc<AnalysisResult>> {
        let path = path.as_ref();
        params.validate()?;

        let name = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|_| AudioError::LoadFailed { path: name.clone() })?;
        let extension = AudioLoader::detect_format(path).unwrap_or_default();
        let key = CacheKey::new(&bytes, self.loader.sample_rate(), params, window)?;

        info!("Analyzing {:?}", path);
        self.cache.get_or_compute(&key, &mut || {
            let full = self.loader.decode_bytes(&bytes, &extension, &name)?;
            analyze_buffer(&full, params, window)
        })
    }
}

/// Run the pipeline on an already decoded buffer
pub fn analyze_buffer(
    full: &AudioBuffer,
    params: &TempoParameters,
    window: &TimeWindow,
) -> Result<AnalysisResult> {
    let (audio, window) = full.trim(window)?;
    info!(
        "   Window {:.3}s - {:.3}s ({} samples at {} Hz)",
        window.start,
        window.end_or(full.duration()),
        audio.len(),
        audio.sample_rate
    );

    let estimator = TempoEstimator::new(&audio, params)?;

    let static_pass = estimator.static_tempo();
    info!(
        "   Static tempo: {:.2} BPM (seed {:.2}), {} beats",
        static_pass.bpm,
        static_pass.start_bpm,
        static_pass.beats.len()
    );

    let curve = estimator.dynamic_tempo(static_pass.start_bpm);
    let beats = estimator.align(&curve);
    debug!("Dynamic tempo: {} points, {} aligned beats", curve.len(), beats.len());

    let result = AnalysisResult::from_parts(
        audio,
        window,
        static_pass.start_bpm,
        static_pass.bpm,
        static_pass.beats,
        curve,
        beats,
    );
    info!("   Segments: {}", result.segments().len());

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::click::synthesize_clicks;

    fn click_buffer(bpm: f64, seconds: f64) -> AudioBuffer {
        let times: Vec<f64> = (0..)
            .map(|i| i as f64 * 60.0 / bpm)
            .take_while(|&t| t < seconds)
            .collect();
        let len = (seconds * 22050.0) as usize;
        AudioBuffer::new(synthesize_clicks(&times, 22050, len, 1000.0, 0.1), 22050)
    }

    #[test]
    fn test_result_shifts_times_by_window_start() {
        let curve = TempoCurve::from_frames(vec![100.0, 100.0, 110.0], 22050, 22050);
        let result = AnalysisResult::from_parts(
            AudioBuffer::new(vec![0.0; 22050 * 3], 22050),
            TimeWindow::new(2.0, Some(5.0)),
            100.0,
            100.004,
            vec![0.25, 0.85],
            curve,
            vec![0.5, 1.1],
        );

        assert_eq!(result.static_tempo(), 100.0);
        assert_eq!(result.first_beat(), Some(2.25));
        assert_eq!(result.static_beat_times(), vec![2.25, 2.85]);
        assert_eq!(result.beat_times(), vec![2.5, 3.1]);
        assert_eq!(result.tempo_points(), vec![(2.0, 100.0), (3.0, 100.0), (4.0, 110.0)]);
        assert_eq!(
            result.segments(),
            &[
                Segment { start: 2.0, end: 4.0, bpm: 100.0 },
                Segment { start: 4.0, end: 4.0, bpm: 110.0 },
            ]
        );

        let report = result.report();
        assert_eq!(report.start, 2.0);
        assert_eq!(report.end, 5.0);
        assert_eq!(report.static_beats, result.static_beat_times());
    }

    #[test]
    fn test_analyze_buffer_over_window() {
        let full = click_buffer(120.0, 12.0);
        let params = TempoParameters::default();
        let result = analyze_buffer(&full, &params, &TimeWindow::new(1.0, Some(11.0))).unwrap();

        assert_eq!(result.window().end, Some(11.0));
        assert_eq!(result.audio().len(), 10 * 22050);
        assert!((result.static_tempo() - 120.0).abs() < 2.0);
        assert_eq!(result.tempo_points()[0].0, 1.0);
        assert!(result.beat_times().iter().all(|&t| (1.0..11.0).contains(&t)));

        let (mixed, sample_rate) = result.render_with(&ClickParameters::default()).unwrap();
        assert_eq!(sample_rate, 22050);
        assert_eq!(mixed.len(), result.audio().len());
    }

    #[test]
    fn test_analyze_buffer_rejects_bad_window() {
        let full = click_buffer(120.0, 2.0);
        let err = analyze_buffer(&full, &TempoParameters::default(), &TimeWindow::new(3.0, None)).unwrap_err();
        assert!(err.is_invalid_window());
    }

    #[test]
    fn test_silent_audio_is_degenerate_not_an_error() {
        let silent = AudioBuffer::new(vec![0.0; 22050 * 3], 22050);
        let result = analyze_buffer(&silent, &TempoParameters::default(), &TimeWindow::full()).unwrap();

        assert_eq!(result.static_tempo(), 0.0);
        assert_eq!(result.first_beat(), None);
        assert!(result.beat_times().is_empty());
        let (mixed, _) = result.render_audio(0, 660.0, 0.1).unwrap();
        assert!(mixed.iter().all(|&v| v == 0.0));
    }
}
