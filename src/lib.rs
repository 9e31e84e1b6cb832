//! # hover-tts
//!
//! Reads page text aloud through a host speech engine: detects the language of
//! a text sample, picks a matching voice from the host's catalog and drives the
//! engine through its start/stall/recovery quirks.
//!
//! ## Features
//!
//! - **Script heuristics**: first-match-wins character-class language detection
//! - **Voice resolution**: exact tag, then primary subtag, then first voice
//! - **Catalog loading**: bounded linear-backoff probing for hosts whose voice
//!   list is not ready at startup
//! - **Dispatch**: cancel-before-speak, keep-alive pulses, single-level stall recovery
//!
//! The crate is sans-IO. The embedding feeds it trigger calls, typed host
//! events and time, and drains [`ReaderEvent`]s for its UI.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use hover_tts::{engines::scripted::ScriptedHost, ReaderEvent, Settings, SpeechReader, Voice};
//!
//! let host = ScriptedHost::with_voices(vec![
//!     Voice::new("Amelie", "fr-FR", true),
//!     Voice::new("Samantha", "en-US", true),
//! ]);
//! let mut reader = SpeechReader::new(host, Settings::default(), "en-US");
//! reader.start();
//!
//! reader.handle("Ça va très bien")?;
//! reader.advance_by(Duration::from_millis(100));
//!
//! let spoken = reader.host().last_spoken().expect("utterance issued");
//! assert_eq!(spoken.lang, "pt-BR");
//! assert_eq!(reader.drain_events()[0], ReaderEvent::Preparing);
//! # Ok::<(), hover_tts::SpeechError>(())
//! ```

pub mod diagnostics;
pub mod dispatcher;
pub mod engines;
pub mod error;
pub mod language;
pub mod reader;
pub mod scheduler;
pub mod settings;
pub mod voices;

mod loader;
mod runtime;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use dispatcher::{DispatchState, UtteranceRequest, UtteranceRequestBuilder};
pub use error::{HostError, SpeechError};
pub use language::LanguageDetector;
pub use reader::{ReaderEvent, SpeechReader};
pub use settings::{ambient_locale, Settings, Timings, TimingsBuilder, Trigger, TriggerMode};
pub use voices::{resolve, Voice, VoiceCatalog};

/// Identifier the reader assigns to every utterance it hands to the host.
///
/// Hosts echo it back with each [`HostEvent`] so events can be routed to the
/// component that issued the utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtteranceId(pub u64);

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A fully configured utterance as handed to the host engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceSpec {
    pub id: UtteranceId,
    pub text: String,
    pub lang: String,
    pub voice: Option<Voice>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl UtteranceSpec {
    /// A zero-volume utterance used to nudge a dormant engine.
    pub(crate) fn silent(id: UtteranceId, text: &str, lang: &str) -> Self {
        Self {
            id,
            text: text.to_string(),
            lang: lang.to_string(),
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            volume: 0.0,
        }
    }
}

/// Lifecycle callbacks reported by the host for one utterance.
///
/// Host payloads are loosely typed; adapters convert them with
/// [`HostEvent::from_raw`] or [`HostEvent::from_json`] as soon as they arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostEvent {
    Start,
    End,
    Error {
        #[serde(rename = "error", default = "unknown_error_code")]
        code: String,
    },
}

/// Code reported for host errors that carry none.
const UNKNOWN_ERROR_CODE: &str = "unknown";

fn unknown_error_code() -> String {
    UNKNOWN_ERROR_CODE.to_string()
}

impl HostEvent {
    /// Convert an untyped callback (`"start"`, `"end"`, `"error"`).
    ///
    /// Returns `None` for kinds the reader does not act on (`"boundary"`, `"mark"`, ...).
    pub fn from_raw(kind: &str, error: Option<&str>) -> Option<Self> {
        match kind {
            "start" => Some(HostEvent::Start),
            "end" => Some(HostEvent::End),
            "error" => Some(HostEvent::Error {
                code: error.unwrap_or(UNKNOWN_ERROR_CODE).to_string(),
            }),
            _ => None,
        }
    }

    /// Convert a JSON payload such as `{"type":"error","error":"interrupted"}`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// The host speech engine the reader drives.
///
/// Implementations wrap whatever the platform offers (a browser's
/// `speechSynthesis`, a system daemon, a test double). Every method is
/// non-blocking; outcomes of [`speak`](SpeechHost::speak) arrive later as
/// [`HostEvent`]s passed to [`SpeechReader::on_host_event`].
pub trait SpeechHost {
    /// Current voice list. May be empty while the engine is still warming up.
    fn voices(&self) -> Vec<Voice>;

    /// Queue an utterance.
    fn speak(&mut self, utterance: &UtteranceSpec) -> Result<(), HostError>;

    /// Drop the current and all pending utterances.
    fn cancel(&mut self);

    /// Resume a paused engine. Also used as a wake-up nudge.
    fn resume(&mut self);

    /// Whether an utterance is currently being spoken.
    fn is_speaking(&self) -> bool;

    /// Whether the engine is paused.
    fn is_paused(&self) -> bool;

    /// Whether the engine exists at all on this platform.
    fn is_available(&self) -> bool {
        true
    }
}
