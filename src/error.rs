use std::time::Duration;

/// Errors surfaced by the reader, either returned directly or carried in a
/// [`ReaderEvent`](crate::ReaderEvent).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SpeechError {
    #[error("No speech voices available. Try refreshing the page.")]
    NoVoicesAvailable,
    #[error("Speech did not start within {0:?}, even after recovery")]
    SynthesisStalled(Duration),
    #[error("Speech system unavailable. Try refreshing the page.")]
    SpeechUnavailable,
    #[error("Could not speak text ({code})")]
    HostSynthesis { code: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Speech synthesis failed: {0}")]
    Host(String),
    #[error("Invalid settings: {0}")]
    Settings(String),
    #[error("Missing field '{0}' when building an utterance request")]
    UninitializedField(&'static str),
}

impl SpeechError {
    /// Warnings are worth showing but do not end the request.
    pub fn is_warning(&self) -> bool {
        matches!(self, SpeechError::NoVoicesAvailable)
    }
}

impl From<derive_builder::UninitializedFieldError> for SpeechError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        SpeechError::UninitializedField(e.field_name())
    }
}

impl From<serde_json::Error> for SpeechError {
    fn from(e: serde_json::Error) -> Self {
        SpeechError::Settings(e.to_string())
    }
}

impl From<HostError> for SpeechError {
    fn from(e: HostError) -> Self {
        SpeechError::Host(e.0)
    }
}

/// Raised by a [`SpeechHost`](crate::SpeechHost) that refuses an utterance outright.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("host speech engine rejected utterance: {0}")]
pub struct HostError(pub String);
