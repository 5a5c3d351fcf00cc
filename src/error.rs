//! Error taxonomy for the synthesis engine and its training phases.
//!
//! Every variant maps to one process exit code so drivers can tell failure
//! classes apart without parsing messages.

use std::path::PathBuf;

/// Result type alias using [`TtsError`].
pub type Result<T> = std::result::Result<T, TtsError>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// A mandatory argument is missing or an option is out of range.
    #[error("configuration: {0}")]
    Configuration(String),

    /// A corpus example or persisted artifact is incomplete or malformed.
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// A character or context tag is absent from the loaded encodings.
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    /// The speaker identity is absent from the loaded encodings.
    #[error("unknown speaker '{0}'")]
    UnknownSpeaker(String),

    /// Checkpoint path absent or record incompatible with the model layout.
    #[error("model load: {0}")]
    ModelLoad(String),

    /// Decoding ran into the hard ceiling without a stop signal.
    #[error("synthesis exceeded {ceiling} decode steps without a stop signal")]
    SynthesisLength { ceiling: usize },

    /// The input text is empty after whitespace collapsing.
    #[error("input text is empty")]
    EmptyInput,

    /// A folder or file required by the active phase does not exist.
    #[error("required path not found: {}", .0.display())]
    MissingPath(PathBuf),

    /// Audio decode/encode or resampling error.
    #[error("audio: {0}")]
    Audio(String),

    /// Spectrogram image rendering error.
    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (encodings, progress) error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (model configuration) error.
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SafeTensors feature array error.
    #[error("safetensors: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl TtsError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> u8 {
        match self {
            TtsError::Configuration(_) => 2,
            TtsError::DataIntegrity(_) => 3,
            TtsError::UnknownSymbol(_) | TtsError::UnknownSpeaker(_) => 4,
            TtsError::ModelLoad(_) => 5,
            TtsError::SynthesisLength { .. } => 6,
            TtsError::EmptyInput => 7,
            TtsError::MissingPath(_) => 8,
            TtsError::Audio(_)
            | TtsError::Image(_)
            | TtsError::Json(_)
            | TtsError::Yaml(_)
            | TtsError::SafeTensors(_)
            | TtsError::Io(_) => 1,
        }
    }
}

impl From<hound::Error> for TtsError {
    fn from(error: hound::Error) -> Self {
        TtsError::Audio(error.to_string())
    }
}

impl From<burn::record::RecorderError> for TtsError {
    fn from(error: burn::record::RecorderError) -> Self {
        TtsError::ModelLoad(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::TtsError;
    use std::path::PathBuf;

    #[test]
    fn exit_codes_are_distinct_per_class() {
        let errors = [
            TtsError::Configuration("speaker".into()),
            TtsError::DataIntegrity("pair".into()),
            TtsError::UnknownSymbol("x".into()),
            TtsError::ModelLoad("missing".into()),
            TtsError::SynthesisLength { ceiling: 10 },
            TtsError::EmptyInput,
            TtsError::MissingPath(PathBuf::from("data")),
        ];
        let mut codes: Vec<u8> = errors.iter().map(TtsError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|code| *code > 1));
    }

    #[test]
    fn unknown_speaker_shares_symbol_code() {
        assert_eq!(
            TtsError::UnknownSpeaker("S9".into()).exit_code(),
            TtsError::UnknownSymbol("q".into()).exit_code()
        );
    }
}
