//! # Audio Analysis Module
//!
//! Tempo extraction from recorded audio: decoding and windowing, static and
//! time-varying tempo estimation, tempo-guided beat tracking, segmentation of
//! the tempo curve and click-track rendering.
//!
//! ## Pipeline
//!
//! - **Loading**: any supported file is decoded to mono at 22050 Hz and
//!   sliced to a [`TimeWindow`]
//! - **Onsets**: log-mel spectral flux ([`onset`])
//! - **Tempo**: windowed autocorrelation under a log-normal prior, once for
//!   the whole buffer and once per hop ([`tempo`])
//! - **Beats**: dynamic programming over onset strength ([`beat`])
//! - **Segments**: runs of equal rounded tempo ([`segment`])
//! - **Clicks**: beat clicks mixed over the source ([`click`])
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tanal::audio::{AudioLoader, TempoEstimator, TempoParameters, TimeWindow};
//!
//! # fn main() -> tanal::Result<()> {
//! let (buffer, window) = AudioLoader::new().load("song.wav", &TimeWindow::full())?;
//!
//! let estimator = TempoEstimator::new(&buffer, &TempoParameters::default())?;
//! let tempo = estimator.static_tempo();
//! let curve = estimator.dynamic_tempo(tempo.start_bpm);
//!
//! println!("{:.2} BPM over {:?}, {} curve points", tempo.bpm, window, curve.len());
//! # Ok(())
//! # }
//! ```

pub mod beat;
pub mod click;
pub mod loader;
pub mod onset;
pub mod segment;
pub mod tempo;
pub mod types;

pub use beat::{align, BeatTracker, TempoGuide};
pub use click::render;
pub use loader::AudioLoader;
pub use segment::segmentize;
pub use tempo::{dynamic_tempo, static_tempo, StaticTempo, TempoEstimator};
pub use types::{
    AudioBuffer, ClickParameters, Segment, TempoCurve, TempoParameters, TempoPoint, TimeWindow,
    ANALYSIS_SAMPLE_RATE,
};
