use std::cell::Cell;

use crate::{HostError, HostEvent, SpeechHost, UtteranceId, UtteranceSpec, Voice};

/// A host call recorded by [`ScriptedHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Speak(UtteranceId),
    Cancel,
    Resume,
}

/// In-memory speech host whose behaviour is driven by hand.
///
/// It never produces events on its own. Call [`start`](ScriptedHost::start),
/// [`finish`](ScriptedHost::finish) or [`fail`](ScriptedHost::fail) to get
/// the event for the current utterance, then feed it to the reader.
///
/// ```rust
/// use hover_tts::engines::scripted::ScriptedHost;
/// use hover_tts::Voice;
///
/// let mut host = ScriptedHost::with_voices(vec![Voice::new("Kyoko", "ja-JP", true)]);
/// // Nothing has been spoken, so there is nothing to start.
/// assert_eq!(host.start(), None);
/// ```
#[derive(Debug)]
pub struct ScriptedHost {
    voices: Vec<Voice>,
    voice_reads: Cell<usize>,
    spoken: Vec<UtteranceSpec>,
    calls: Vec<HostCall>,
    current: Option<UtteranceId>,
    speaking: bool,
    paused: bool,
    available: bool,
    refuse_next: Option<String>,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHost {
    /// A host with an empty catalog, like an engine that has not warmed up.
    pub fn new() -> Self {
        Self {
            voices: Vec::new(),
            voice_reads: Cell::new(0),
            spoken: Vec::new(),
            calls: Vec::new(),
            current: None,
            speaking: false,
            paused: false,
            available: true,
            refuse_next: None,
        }
    }

    pub fn with_voices(voices: Vec<Voice>) -> Self {
        Self {
            voices,
            ..Self::new()
        }
    }

    /// Replace what [`voices`](SpeechHost::voices) reports from now on.
    pub fn set_voices(&mut self, voices: Vec<Voice>) {
        self.voices = voices;
    }

    /// Make the next `speak` call fail with `message`.
    pub fn refuse_next_speak(&mut self, message: impl Into<String>) {
        self.refuse_next = Some(message.into());
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Every utterance accepted so far, probes included.
    pub fn spoken(&self) -> &[UtteranceSpec] {
        &self.spoken
    }

    pub fn spoken_texts(&self) -> Vec<&str> {
        self.spoken.iter().map(|u| u.text.as_str()).collect()
    }

    pub fn last_spoken(&self) -> Option<&UtteranceSpec> {
        self.spoken.last()
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    pub fn cancel_count(&self) -> usize {
        self.calls.iter().filter(|c| **c == HostCall::Cancel).count()
    }

    pub fn resume_count(&self) -> usize {
        self.calls.iter().filter(|c| **c == HostCall::Resume).count()
    }

    pub fn voice_reads(&self) -> usize {
        self.voice_reads.get()
    }

    /// The utterance that would receive the next event.
    pub fn current(&self) -> Option<UtteranceId> {
        self.current
    }

    /// Begin speaking the current utterance.
    pub fn start(&mut self) -> Option<(UtteranceId, HostEvent)> {
        let id = self.current?;
        self.speaking = true;
        Some((id, HostEvent::Start))
    }

    /// Complete the current utterance.
    pub fn finish(&mut self) -> Option<(UtteranceId, HostEvent)> {
        let id = self.current.take()?;
        self.speaking = false;
        Some((id, HostEvent::End))
    }

    /// Fail the current utterance with `code`.
    pub fn fail(&mut self, code: &str) -> Option<(UtteranceId, HostEvent)> {
        let id = self.current.take()?;
        self.speaking = false;
        Some((
            id,
            HostEvent::Error {
                code: code.to_string(),
            },
        ))
    }
}

impl SpeechHost for ScriptedHost {
    fn voices(&self) -> Vec<Voice> {
        self.voice_reads.set(self.voice_reads.get() + 1);
        self.voices.clone()
    }

    fn speak(&mut self, utterance: &UtteranceSpec) -> Result<(), HostError> {
        if let Some(message) = self.refuse_next.take() {
            return Err(HostError(message));
        }
        self.calls.push(HostCall::Speak(utterance.id));
        self.spoken.push(utterance.clone());
        self.current = Some(utterance.id);
        self.speaking = false;
        Ok(())
    }

    fn cancel(&mut self) {
        self.calls.push(HostCall::Cancel);
        self.current = None;
        self.speaking = false;
    }

    fn resume(&mut self) {
        self.calls.push(HostCall::Resume);
        self.paused = false;
    }

    fn is_speaking(&self) -> bool {
        self.speaking
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_available(&self) -> bool {
        self.available
    }
}
