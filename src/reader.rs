use std::time::Duration;

use serde_json::{Map, Value};

use crate::diagnostics::{self, DiagnosticsReport};
use crate::dispatcher::{DispatchState, Followup, SpeechDispatcher, UtteranceRequest, UtteranceRequestBuilder};
use crate::loader::VoiceCatalogLoader;
use crate::runtime::{Runtime, Timer};
use crate::scheduler::TimerHandle;
use crate::settings::{Settings, Timings, Trigger};
use crate::{HostEvent, LanguageDetector, SpeechError, SpeechHost, UtteranceId, VoiceCatalog};

/// Sentence spoken by [`SpeechReader::test_speech`].
pub const TEST_SENTENCE: &str =
    "This is a test of the speech synthesis system. If you can hear this, speech is working correctly.";

/// Lifecycle notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    /// A request was accepted and is waiting for the engine.
    Preparing,
    /// The engine started speaking.
    Speaking {
        /// Display name of the language, e.g. `"French"`.
        language: String,
        voice: Option<String>,
    },
    Ended,
    /// The request stalled and the engine is being reset.
    Recovering,
    Warning(SpeechError),
    Error(SpeechError),
}

/// Reads text aloud through a [`SpeechHost`].
///
/// Wires detection, voice resolution, catalog loading and dispatch together
/// and owns the clock they share. The embedding drives it:
///
/// - trigger calls: [`handle`](Self::handle), [`stop`](Self::stop),
///   [`focus_regained`](Self::focus_regained), ...
/// - host callbacks: [`on_host_event`](Self::on_host_event),
///   [`on_voices_changed`](Self::on_voices_changed)
/// - time: [`advance_to`](Self::advance_to) / [`advance_by`](Self::advance_by)
///
/// and drains [`ReaderEvent`]s with [`drain_events`](Self::drain_events).
pub struct SpeechReader<H: SpeechHost> {
    rt: Runtime<H>,
    settings: Settings,
    detector: LanguageDetector,
    loader: VoiceCatalogLoader,
    dispatcher: SpeechDispatcher,
    liveness: Option<TimerHandle>,
}

impl<H: SpeechHost> SpeechReader<H> {
    /// Create a reader with default timings. `locale` is the tag used when
    /// detection finds nothing (see [`ambient_locale`](crate::ambient_locale)).
    pub fn new(host: H, settings: Settings, locale: impl Into<String>) -> Self {
        Self::with_timings(host, settings, locale, Timings::default())
    }

    pub fn with_timings(host: H, settings: Settings, locale: impl Into<String>, timings: Timings) -> Self {
        let locale = locale.into();
        Self {
            detector: LanguageDetector::new(locale.clone()),
            rt: Runtime::new(host, timings, locale),
            settings,
            loader: VoiceCatalogLoader::new(),
            dispatcher: SpeechDispatcher::new(),
            liveness: None,
        }
    }

    /// Load the voice catalog and arm the periodic liveness probe.
    ///
    /// Calling it again has no further effect.
    pub fn start(&mut self) {
        if self.liveness.is_some() {
            return;
        }
        log::info!("Starting speech reader (locale {})", self.detector.locale());
        self.loader.load(&mut self.rt);
        self.liveness = Some(self.rt.schedule(self.rt.timings.liveness_interval, Timer::Liveness));
        if let Some(delay) = self.rt.timings.startup_refresh_delay {
            self.rt.schedule(delay, Timer::Refresh);
        }
    }

    /// Detect the language of `text` (or use the forced language), pick a
    /// voice and speak it, replacing anything already speaking.
    pub fn handle(&mut self, text: &str) -> Result<(), SpeechError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SpeechError::InvalidInput("nothing to read".to_string()));
        }

        let language = if self.settings.language_auto_detect {
            self.detector.detect(Some(text)).to_string()
        } else {
            self.settings.forced_language().to_string()
        };
        self.speak_in(text, &language)
    }

    /// Like [`handle`](Self::handle), gated by the settings for `trigger`.
    ///
    /// Returns `Ok(false)` when the trigger is currently disabled.
    pub fn handle_trigger(&mut self, trigger: Trigger, site: &str, text: &str) -> Result<bool, SpeechError> {
        if !self.settings.permits(trigger, site) {
            log::debug!("{trigger:?} reading disabled on {site}");
            return Ok(false);
        }
        self.handle(text).map(|()| true)
    }

    /// Speak `text` in an explicit language, skipping detection.
    pub fn speak_in(&mut self, text: &str, language_tag: &str) -> Result<(), SpeechError> {
        let mut request = self.build_request(text, language_tag)?;

        if self.loader.catalog().is_empty() {
            self.loader.reread(&mut self.rt);
            log::info!(
                "Refreshed voices before speaking. Count: {}",
                self.loader.catalog().len()
            );
        }
        request.set_voice(self.loader.catalog().resolve(request.language_tag()).cloned());

        self.rt.emit(ReaderEvent::Preparing);
        self.dispatcher.speak(&mut self.rt, request);
        Ok(())
    }

    /// Speak a fixed sentence in the ambient locale.
    pub fn test_speech(&mut self) -> Result<(), SpeechError> {
        log::info!("Running speech test");
        let locale = self.detector.locale().to_string();
        self.speak_in(TEST_SENTENCE, &locale)
    }

    /// Silence everything. Not reported as an error.
    pub fn stop(&mut self) {
        self.dispatcher.stop(&mut self.rt);
    }

    /// Run the recovery protocol for `text`: cancel, refresh the catalog,
    /// speak a quiet probe and re-issue `text` if the probe completes.
    pub fn recover(&mut self, text: &str, language_tag: &str) -> Result<(), SpeechError> {
        let request = self.build_request(text, language_tag)?;
        self.dispatcher.recover(&mut self.rt, request);
        Ok(())
    }

    /// Cancel speech, wake the engine and reload the catalog.
    pub fn refresh(&mut self) {
        self.dispatcher.stop(&mut self.rt);
        self.loader.refresh(&mut self.rt);
    }

    /// Nudge the engine; reload voices if the catalog is still empty.
    pub fn liveness_probe(&mut self) {
        self.rt.host.resume();
        if self.loader.catalog().is_empty() {
            log::info!("No voices in periodic check, attempting reload");
            self.refresh();
        }
    }

    /// The page regained focus; engines may have unloaded meanwhile.
    pub fn focus_regained(&mut self) {
        self.rt.schedule(self.rt.timings.focus_refresh_delay, Timer::Refresh);
    }

    /// Replace the settings. Turning auto speech off stops speech.
    pub fn update_settings(&mut self, settings: Settings) {
        let was_enabled = self.settings.auto_speech_enabled;
        self.settings = settings;
        if was_enabled && !self.settings.auto_speech_enabled {
            self.stop();
        }
    }

    /// Apply a change notification from the settings store.
    pub fn apply_setting_changes(&mut self, changes: &Map<String, Value>) -> Result<(), SpeechError> {
        let mut settings = self.settings.clone();
        settings.apply_changes(changes)?;
        log::info!("Settings updated: {:?}", changes.keys().collect::<Vec<_>>());
        self.update_settings(settings);
        Ok(())
    }

    /// Deliver a host callback for utterance `id`.
    pub fn on_host_event(&mut self, id: UtteranceId, event: HostEvent) {
        if self.loader.owns(id) {
            self.loader.on_host_event(&mut self.rt, id, event);
        } else {
            self.dispatcher.on_host_event(&mut self.rt, id, event);
        }
    }

    /// The host reported that its voice list changed.
    pub fn on_voices_changed(&mut self) {
        self.loader.on_voices_changed(&mut self.rt);
    }

    /// Run every task due at or before `now`.
    pub fn advance_to(&mut self, now: Duration) {
        while let Some(timer) = self.rt.timers_mut().pop_due(now) {
            self.fire(timer);
        }
        self.rt.timers_mut().advance_to(now);
    }

    pub fn advance_by(&mut self, delta: Duration) {
        let now = self.now() + delta;
        self.advance_to(now);
    }

    pub fn now(&self) -> Duration {
        self.rt.timers().now()
    }

    /// When the next task is due, for embeddings that sleep between ticks.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.rt.timers().next_deadline()
    }

    pub fn drain_events(&mut self) -> Vec<ReaderEvent> {
        self.rt.drain_events()
    }

    pub fn state(&self) -> DispatchState {
        self.dispatcher.state()
    }

    pub fn recovery_count(&self) -> u32 {
        self.dispatcher.recovery_count()
    }

    /// The request currently queued or speaking.
    pub fn current_request(&self) -> Option<&UtteranceRequest> {
        self.dispatcher.current_request()
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        self.loader.catalog()
    }

    /// Whether catalog retries or the fallback read are still pending.
    pub fn loading_voices(&self) -> bool {
        self.loader.is_armed()
    }

    /// Whether the resume pulse is running for the current utterance.
    pub fn keep_alive_active(&self) -> bool {
        self.dispatcher.keep_alive_active()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn detector(&self) -> &LanguageDetector {
        &self.detector
    }

    pub fn host(&self) -> &H {
        &self.rt.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.rt.host
    }

    pub fn diagnostics(&self) -> DiagnosticsReport {
        diagnostics::collect(&self.rt.host, self.loader.catalog(), self.dispatcher.state())
    }

    fn build_request(&self, text: &str, language_tag: &str) -> Result<UtteranceRequest, SpeechError> {
        let language_tag = if language_tag.is_empty() {
            self.detector.locale()
        } else {
            language_tag
        };
        UtteranceRequestBuilder::default()
            .text(text.trim())
            .language_tag(language_tag)
            .rate(self.settings.effective_rate())
            .pitch(self.settings.effective_pitch())
            .build()
    }

    fn fire(&mut self, timer: Timer) {
        match timer {
            Timer::Dispatch(t) => {
                let followup = self.dispatcher.on_timer(&mut self.rt, t);
                self.follow(followup);
            }
            Timer::Loader(t) => self.loader.on_timer(&mut self.rt, t),
            Timer::Liveness => {
                self.liveness = Some(self.rt.schedule(self.rt.timings.liveness_interval, Timer::Liveness));
                self.liveness_probe();
            }
            Timer::Refresh => self.refresh(),
        }
    }

    fn follow(&mut self, followup: Option<Followup>) {
        match followup {
            Some(Followup::RefreshCatalog) => {
                if self.loader.reread(&mut self.rt) {
                    log::info!("Recovered {} voices", self.loader.catalog().len());
                }
            }
            Some(Followup::Reissue(mut request)) => {
                request.set_voice(self.loader.catalog().resolve(request.language_tag()).cloned());
                self.dispatcher.reissue(&mut self.rt, request);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::scripted::ScriptedHost;
    use crate::settings::TimingsBuilder;
    use crate::Voice;
    use serde_json::json;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn voices() -> Vec<Voice> {
        vec![
            Voice::new("Amelie", "fr-FR", true),
            Voice::new("Samantha", "en-US", true),
        ]
    }

    fn reader_with(host: ScriptedHost, locale: &str) -> SpeechReader<ScriptedHost> {
        let timings = TimingsBuilder::default()
            .startup_refresh_delay(None)
            .build()
            .unwrap();
        let mut reader = SpeechReader::with_timings(host, Settings::default(), locale, timings);
        reader.start();
        reader
    }

    fn reader() -> SpeechReader<ScriptedHost> {
        reader_with(ScriptedHost::with_voices(voices()), "en-US")
    }

    fn start(reader: &mut SpeechReader<ScriptedHost>) {
        let (id, ev) = reader.host_mut().start().expect("utterance in flight");
        reader.on_host_event(id, ev);
    }

    fn finish(reader: &mut SpeechReader<ScriptedHost>) {
        let (id, ev) = reader.host_mut().finish().expect("utterance in flight");
        reader.on_host_event(id, ev);
    }

    #[test]
    fn french_text_gets_french_voice() {
        let mut r = reader_with(ScriptedHost::with_voices(voices()), "fr-FR");
        r.handle("Bonjour le monde").unwrap();
        r.advance_by(ms(100));

        let spoken = r.host().last_spoken().unwrap();
        assert_eq!(spoken.lang, "fr-FR");
        assert_eq!(spoken.voice.as_ref().map(|v| v.name.as_str()), Some("Amelie"));

        start(&mut r);
        finish(&mut r);
        assert_eq!(
            r.drain_events(),
            vec![
                ReaderEvent::Preparing,
                ReaderEvent::Speaking {
                    language: "French".to_string(),
                    voice: Some("Amelie".to_string())
                },
                ReaderEvent::Ended,
            ]
        );
        assert_eq!(r.state(), DispatchState::Ended);
    }

    #[test]
    fn blank_text_never_reaches_host() {
        let mut r = reader();
        let calls_before = r.host().calls().len();
        assert!(matches!(r.handle("  \n\t "), Err(SpeechError::InvalidInput(_))));
        assert_eq!(r.host().calls().len(), calls_before);
        assert!(r.drain_events().is_empty());
    }

    #[test]
    fn forced_language_skips_detection() {
        let mut r = reader();
        r.update_settings(Settings {
            language_auto_detect: false,
            forced_language_tag: "en-US".to_string(),
            voice_rate: 1.4,
            ..Default::default()
        });
        r.handle("Привет").unwrap();
        r.advance_by(ms(100));

        let spoken = r.host().last_spoken().unwrap();
        assert_eq!(spoken.lang, "en-US");
        assert_eq!(spoken.rate, 1.4);
        assert_eq!(spoken.voice.as_ref().map(|v| v.name.as_str()), Some("Samantha"));
    }

    #[test]
    fn empty_forced_language_uses_default_not_locale() {
        let mut r = reader_with(ScriptedHost::with_voices(voices()), "fr-FR");
        r.update_settings(Settings {
            language_auto_detect: false,
            forced_language_tag: String::new(),
            ..Default::default()
        });
        r.handle("Bonjour").unwrap();
        r.advance_by(ms(100));

        let spoken = r.host().last_spoken().unwrap();
        assert_eq!(spoken.lang, "en-US");
        assert_eq!(spoken.voice.as_ref().map(|v| v.name.as_str()), Some("Samantha"));
    }

    #[test]
    fn back_to_back_requests_speak_only_the_last() {
        let mut r = reader();
        r.handle("first").unwrap();
        r.handle("second").unwrap();
        r.advance_by(ms(100));
        start(&mut r);
        finish(&mut r);

        assert_eq!(r.host().spoken_texts(), vec!["second"]);
        let ended = r
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, ReaderEvent::Ended | ReaderEvent::Error(_)))
            .count();
        assert_eq!(ended, 1);
    }

    #[test]
    fn stalled_request_recovers_once_and_ends() {
        let mut r = reader();
        r.handle("Hello").unwrap();

        // Issued at 100ms, never starts; the stall check fires at 1100ms and
        // the probe goes out after the 300ms recovery settle.
        r.advance_by(ms(1400));
        assert_eq!(r.state(), DispatchState::Recovering);
        assert_eq!(r.host().last_spoken().unwrap().text, "Test");

        finish(&mut r);
        r.advance_by(ms(200));
        assert_eq!(r.state(), DispatchState::Queued);
        r.advance_by(ms(100));
        assert_eq!(r.host().spoken_texts(), vec!["Hello", "Test", "Hello"]);

        start(&mut r);
        finish(&mut r);
        assert_eq!(r.state(), DispatchState::Ended);
        assert_eq!(r.recovery_count(), 1);

        let events = r.drain_events();
        assert_eq!(events.iter().filter(|e| **e == ReaderEvent::Recovering).count(), 1);
        assert_eq!(events.last(), Some(&ReaderEvent::Ended));
    }

    #[test]
    fn second_stall_after_recovery_is_terminal() {
        let mut r = reader();
        r.handle("Hello").unwrap();
        r.advance_by(ms(1400));
        finish(&mut r);
        r.advance_by(ms(300));

        // Re-issued but never starts.
        r.advance_by(ms(1000));
        assert_eq!(r.state(), DispatchState::Errored);
        assert_eq!(r.recovery_count(), 1);
        assert_eq!(
            r.drain_events().last(),
            Some(&ReaderEvent::Error(SpeechError::SynthesisStalled(ms(1000))))
        );
    }

    #[test]
    fn unresponsive_engine_ends_with_speech_unavailable() {
        let mut r = reader();
        r.handle("Hello").unwrap();
        r.advance_by(Duration::from_secs(25));

        assert_eq!(r.state(), DispatchState::Errored);
        assert_eq!(
            r.drain_events(),
            vec![
                ReaderEvent::Preparing,
                ReaderEvent::Recovering,
                ReaderEvent::Error(SpeechError::SpeechUnavailable),
            ]
        );
        assert_eq!(r.host().spoken_texts(), vec!["Hello", "Test"]);
    }

    #[test]
    fn stop_after_end_is_silent() {
        let mut r = reader();
        r.handle("Hello").unwrap();
        r.advance_by(ms(100));
        start(&mut r);
        finish(&mut r);
        r.drain_events();

        r.stop();
        assert_eq!(r.state(), DispatchState::Ended);
        assert!(r.drain_events().is_empty());
    }

    #[test]
    fn explicit_recover_reissues_original_text() {
        let mut r = reader();
        r.recover("Salut", "fr-FR").unwrap();
        r.advance_by(ms(300));
        finish(&mut r);
        r.advance_by(ms(300));

        let spoken = r.host().last_spoken().unwrap();
        assert_eq!(spoken.text, "Salut");
        assert_eq!(spoken.voice.as_ref().map(|v| v.name.as_str()), Some("Amelie"));
    }

    #[test]
    fn recovery_refreshes_catalog() {
        let mut r = reader_with(ScriptedHost::new(), "en-US");
        r.host_mut().set_voices(voices());
        let reads_before = r.host().voice_reads();

        r.recover("Hello", "en-US").unwrap();
        r.advance_by(ms(300));
        assert!(r.host().voice_reads() > reads_before);
        assert_eq!(r.catalog().len(), 2);
    }

    #[test]
    fn empty_catalog_is_reread_before_speaking() {
        let mut r = reader_with(ScriptedHost::new(), "en-US");
        r.host_mut().set_voices(voices());
        r.handle("Hello").unwrap();
        assert_eq!(r.catalog().len(), 2);
        assert_eq!(
            r.current_request().and_then(|q| q.voice()).map(|v| v.name.as_str()),
            Some("Samantha")
        );
    }

    #[test]
    fn late_catalog_push_is_visible_to_resolution() {
        let mut r = reader_with(ScriptedHost::new(), "en-US");
        assert!(r.catalog().is_empty());
        assert!(r.loading_voices());

        r.host_mut().set_voices(voices());
        r.on_voices_changed();
        r.host_mut().set_voices(vec![]);
        r.on_voices_changed();
        r.advance_by(Duration::from_secs(3));

        assert_eq!(r.catalog().resolve("fr-FR").map(|v| v.name.as_str()), Some("Amelie"));
        assert!(!r.loading_voices());
        assert!(!r
            .drain_events()
            .contains(&ReaderEvent::Warning(SpeechError::NoVoicesAvailable)));
    }

    #[test]
    fn no_voices_warning_then_liveness_retries() {
        let mut r = reader_with(ScriptedHost::new(), "en-US");
        r.advance_by(ms(2000));
        assert_eq!(
            r.drain_events(),
            vec![ReaderEvent::Warning(SpeechError::NoVoicesAvailable)]
        );

        r.host_mut().set_voices(voices());
        r.advance_to(Duration::from_secs(30));
        assert_eq!(r.catalog().len(), 2);
    }

    #[test]
    fn liveness_probe_only_nudges_when_voices_are_loaded() {
        let mut r = reader();
        r.handle("A long paragraph").unwrap();
        r.advance_by(ms(100));
        start(&mut r);

        r.advance_to(Duration::from_secs(30));
        assert_eq!(r.state(), DispatchState::Speaking);
        assert!(r.keep_alive_active());
    }

    #[test]
    fn focus_refresh_cancels_speech() {
        let mut r = reader();
        r.handle("Hello").unwrap();
        r.advance_by(ms(100));
        start(&mut r);

        r.focus_regained();
        r.advance_by(ms(299));
        assert_eq!(r.state(), DispatchState::Speaking);
        r.advance_by(ms(1));
        assert_eq!(r.state(), DispatchState::Cancelled);
        assert_eq!(r.host().last_spoken().unwrap().volume, 0.0);
    }

    #[test]
    fn disabling_auto_speech_stops_reading() {
        let mut r = reader();
        r.handle("Hello").unwrap();
        r.advance_by(ms(100));
        start(&mut r);

        let changes = match json!({"autoSpeechEnabled": false}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        r.apply_setting_changes(&changes).unwrap();
        assert_eq!(r.state(), DispatchState::Cancelled);
        assert!(!r.settings().auto_speech_enabled);
    }

    #[test]
    fn triggers_respect_settings() {
        let mut r = reader();
        assert_eq!(r.handle_trigger(Trigger::Selection, "example.org", "Hello"), Ok(false));
        assert_eq!(r.state(), DispatchState::Idle);
        assert_eq!(r.handle_trigger(Trigger::Hover, "example.org", "Hello"), Ok(true));
        assert_eq!(r.state(), DispatchState::Queued);
    }

    #[test]
    fn speech_test_uses_locale() {
        let mut r = reader_with(ScriptedHost::with_voices(voices()), "fr-FR");
        r.test_speech().unwrap();
        r.advance_by(ms(100));
        let spoken = r.host().last_spoken().unwrap();
        assert_eq!(spoken.text, TEST_SENTENCE);
        assert_eq!(spoken.lang, "fr-FR");
    }

    #[test]
    fn startup_refresh_runs_once() {
        let mut r = SpeechReader::new(ScriptedHost::with_voices(voices()), Settings::default(), "en-US");
        r.start();
        r.start();
        r.advance_by(ms(500));
        // One responsiveness probe from the startup refresh.
        assert_eq!(r.host().spoken().len(), 1);
    }
}
