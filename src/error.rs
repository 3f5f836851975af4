use thiserror::Error;

/// Main error type for the tanal library
#[derive(Error, Debug)]
pub enum TanalError {
    #[error("Audio processing error: {0}")]
    Audio(#[from] AudioError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio loading and windowing errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to load audio file: {path}")]
    LoadFailed { path: String },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Failed to decode audio file {path}: {reason}")]
    DecodeFailed { path: String, reason: String },

    #[error("Invalid time window [{start}, {end}) for {duration:.3}s of audio")]
    InvalidWindow { start: f64, end: f64, duration: f64 },
}

/// Tempo analysis errors
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using TanalError
pub type Result<T> = std::result::Result<T, TanalError>;

impl AnalysisError {
    pub(crate) fn invalid<N: Into<String>, V: ToString>(name: N, value: V) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

impl TanalError {
    /// Unreadable, unsupported or corrupt audio input
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::Audio(
                AudioError::LoadFailed { .. }
                    | AudioError::UnsupportedFormat { .. }
                    | AudioError::DecodeFailed { .. }
            )
        )
    }

    /// Start/end out of range or inverted
    pub fn is_invalid_window(&self) -> bool {
        matches!(self, Self::Audio(AudioError::InvalidWindow { .. }))
    }

    /// A numeric parameter outside its documented domain
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self, Self::Analysis(AnalysisError::InvalidParameter { .. }))
    }
}
