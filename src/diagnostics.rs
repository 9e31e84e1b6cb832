//! Snapshot of the host engine and reader state for troubleshooting.

use std::fmt;

use serde::Serialize;

use crate::{DispatchState, SpeechHost, Voice, VoiceCatalog};

/// Voices listed individually in a report.
pub const SAMPLE_VOICES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub available: bool,
    pub speaking: bool,
    pub paused: bool,
    /// Voices the host reports right now.
    pub host_voice_count: usize,
    /// The first few host voices, formatted as `name (lang), Local|Remote`.
    pub sample_voices: Vec<String>,
    /// Voices in the reader's catalog, which may outlive the host's list.
    pub cached_voice_count: usize,
    pub dispatch_state: DispatchState,
}

/// Read the host's current state alongside the reader's.
pub fn collect<H: SpeechHost>(host: &H, catalog: &VoiceCatalog, state: DispatchState) -> DiagnosticsReport {
    let voices = host.voices();
    DiagnosticsReport {
        available: host.is_available(),
        speaking: host.is_speaking(),
        paused: host.is_paused(),
        host_voice_count: voices.len(),
        sample_voices: voices.iter().take(SAMPLE_VOICES).map(describe).collect(),
        cached_voice_count: catalog.len(),
        dispatch_state: state,
    }
}

fn describe(voice: &Voice) -> String {
    let service = if voice.is_local { "Local" } else { "Remote" };
    format!("{} ({}), {}", voice.name, voice.language_tag, service)
}

impl fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(f, "Speech engine available: {}", yes_no(self.available))?;
        writeln!(
            f,
            "Speaking: {}, paused: {}",
            yes_no(self.speaking),
            yes_no(self.paused)
        )?;
        writeln!(f, "Host voices: {}", self.host_voice_count)?;
        for (i, voice) in self.sample_voices.iter().enumerate() {
            writeln!(f, "  Voice {}: {voice}", i + 1)?;
        }
        if self.host_voice_count > self.sample_voices.len() {
            writeln!(
                f,
                "  ... and {} more voices",
                self.host_voice_count - self.sample_voices.len()
            )?;
        }
        writeln!(f, "Cached voices: {}", self.cached_voice_count)?;
        write!(f, "Reader state: {}", self.dispatch_state)
    }
}
