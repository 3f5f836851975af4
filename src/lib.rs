//! # tanal
//!
//! Tempo analysis for recorded music: a static tempo, a tempo curve sampled
//! every analysis hop, beats that follow the curve, constant-tempo segments
//! and a click track mixed over the source for checking the result by ear.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tanal::{AnalysisSession, InMemoryCache, TempoParameters, TimeWindow};
//!
//! # fn main() -> tanal::Result<()> {
//! let session = AnalysisSession::new(Arc::new(InMemoryCache::new()));
//! let result = session.analyze("song.flac", &TempoParameters::default(), &TimeWindow::full())?;
//!
//! println!("Static tempo: {} BPM", result.static_tempo());
//! for segment in result.segments() {
//!     println!("{:8.3} - {:8.3}  {:.2} BPM", segment.start, segment.end, segment.bpm);
//! }
//!
//! let (samples, sample_rate) = result.render_audio(20, 660.0, 0.1)?;
//! # let _ = (samples, sample_rate);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`audio`] - Decoding, tempo estimation, beat tracking, segmentation, clicks
//! - [`session`] - Pipeline orchestration and the result cache
//! - [`config`] - TOML configuration

pub mod audio;
pub mod config;
pub mod error;
pub mod session;

// Re-export commonly used types for convenience
pub use crate::{
    audio::{AudioBuffer, AudioLoader, Segment, TempoCurve, TempoParameters, TimeWindow},
    config::Config,
    error::{Result, TanalError},
    session::{AnalysisCache, AnalysisResult, AnalysisSession, InMemoryCache, NoCache},
};
