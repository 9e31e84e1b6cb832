//! Lifecycle of the one utterance the reader is speaking.
//!
//! ```text
//! Idle -> Queued -> Speaking -> Ended | Errored | Cancelled
//!           |
//!           +-- no start within the stall window --> Recovering -> Queued (once)
//! ```
//!
//! Every new request first cancels the host engine and drops whatever session
//! or recovery was in flight, so at most one session is ever observable.
//! Events for utterances the dispatcher no longer tracks are ignored.

use std::fmt;
use std::time::Duration;

use derive_builder::Builder;
use serde::Serialize;

use crate::language::display_name;
use crate::reader::ReaderEvent;
use crate::runtime::{Runtime, Timer};
use crate::scheduler::TimerHandle;
use crate::settings::{DEFAULT_PITCH, DEFAULT_RATE, MAX_PROSODY, MIN_PROSODY};
use crate::{HostEvent, SpeechError, SpeechHost, UtteranceId, UtteranceSpec, Voice};

/// Text of the quiet utterance spoken during recovery.
const RECOVERY_PROBE_TEXT: &str = "Test";

/// Characters of the text shown in logs.
const PREVIEW_CHARS: usize = 50;

/// One request to read a span of text.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(build_fn(validate = "Self::validate", error = "SpeechError"))]
pub struct UtteranceRequest {
    #[builder(setter(into))]
    text: String,
    #[builder(setter(into))]
    language_tag: String,
    #[builder(default = "DEFAULT_RATE")]
    rate: f32,
    #[builder(default = "DEFAULT_PITCH")]
    pitch: f32,
    #[builder(default = "1.0")]
    volume: f32,
    #[builder(default, setter(strip_option))]
    voice: Option<Voice>,
}

impl UtteranceRequestBuilder {
    fn validate(&self) -> Result<(), SpeechError> {
        if let Some(text) = &self.text {
            if text.trim().is_empty() {
                return Err(SpeechError::InvalidInput("text is empty".to_string()));
            }
        }
        for (name, value) in [("rate", self.rate), ("pitch", self.pitch)] {
            if let Some(value) = value {
                if !(MIN_PROSODY..=MAX_PROSODY).contains(&value) {
                    return Err(SpeechError::InvalidInput(format!(
                        "{name} {value} outside {MIN_PROSODY}..={MAX_PROSODY}"
                    )));
                }
            }
        }
        if let Some(volume) = self.volume {
            if !(0.0..=1.0).contains(&volume) {
                return Err(SpeechError::InvalidInput(format!(
                    "volume {volume} outside 0..=1"
                )));
            }
        }
        Ok(())
    }
}

impl UtteranceRequest {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language_tag(&self) -> &str {
        &self.language_tag
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    pub(crate) fn set_voice(&mut self, voice: Option<Voice>) {
        self.voice = voice;
    }

    fn to_spec(&self, id: UtteranceId) -> UtteranceSpec {
        UtteranceSpec {
            id,
            text: self.text.clone(),
            lang: self.language_tag.clone(),
            voice: self.voice.clone(),
            rate: self.rate,
            pitch: self.pitch,
            volume: self.volume,
        }
    }

    fn preview(&self) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

/// Observable dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchState {
    Idle,
    /// Waiting for the settle delay or for the host to report start.
    Queued,
    Speaking,
    /// Running the stall recovery protocol.
    Recovering,
    Ended,
    Errored,
    Cancelled,
}

impl DispatchState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DispatchState::Queued | DispatchState::Speaking | DispatchState::Recovering
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Queued => "queued",
            DispatchState::Speaking => "speaking",
            DispatchState::Recovering => "recovering",
            DispatchState::Ended => "ended",
            DispatchState::Errored => "errored",
            DispatchState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchTimer {
    Settle,
    StallCheck,
    KeepAlive,
    RecoveryRefresh,
    RecoveryProbe,
    /// The probe went unanswered for the stall window.
    ProbeTimeout,
    RecoveryReissue,
}

/// Work the dispatcher needs from components it does not own.
#[derive(Debug)]
pub(crate) enum Followup {
    /// Re-read the host voice catalog.
    RefreshCatalog,
    /// Recovery succeeded; resolve a voice again and re-issue.
    Reissue(UtteranceRequest),
}

#[derive(Debug)]
struct Session {
    request: UtteranceRequest,
    /// Times this request has been handed to the host, counting re-issues.
    attempt_count: u32,
    utterance: Option<UtteranceId>,
    keep_alive_active: bool,
    settle: Option<TimerHandle>,
    stall: Option<TimerHandle>,
    keep_alive: Option<TimerHandle>,
}

impl Session {
    fn new(request: UtteranceRequest, attempt_count: u32) -> Self {
        Self {
            request,
            attempt_count,
            utterance: None,
            keep_alive_active: false,
            settle: None,
            stall: None,
            keep_alive: None,
        }
    }

    fn clear_timers<H>(&mut self, rt: &mut Runtime<H>) {
        rt.cancel_timer(&mut self.settle);
        rt.cancel_timer(&mut self.stall);
        rt.cancel_timer(&mut self.keep_alive);
        self.keep_alive_active = false;
    }
}

#[derive(Debug)]
struct Recovery {
    request: UtteranceRequest,
    probe: Option<UtteranceId>,
    timer: Option<TimerHandle>,
}

/// Owns the active utterance session.
#[derive(Debug)]
pub(crate) struct SpeechDispatcher {
    state: DispatchState,
    session: Option<Session>,
    recovery: Option<Recovery>,
    recoveries: u32,
}

impl Default for SpeechDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechDispatcher {
    pub fn new() -> Self {
        Self {
            state: DispatchState::Idle,
            session: None,
            recovery: None,
            recoveries: 0,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Recovery cycles started since creation.
    pub fn recovery_count(&self) -> u32 {
        self.recoveries
    }

    /// The request currently queued or speaking.
    pub fn current_request(&self) -> Option<&UtteranceRequest> {
        self.session.as_ref().map(|s| &s.request)
    }

    /// Whether the resume pulse is running.
    pub fn keep_alive_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.keep_alive_active)
    }

    pub(crate) fn owns(&self, id: UtteranceId) -> bool {
        self.session.as_ref().is_some_and(|s| s.utterance == Some(id))
            || self.recovery.as_ref().is_some_and(|r| r.probe == Some(id))
    }

    /// Cancel whatever is in flight and queue `request`.
    pub(crate) fn speak<H: SpeechHost>(&mut self, rt: &mut Runtime<H>, request: UtteranceRequest) {
        self.enqueue(rt, request, 1);
    }

    /// Queue a request coming out of recovery. It gets no second recovery.
    pub(crate) fn reissue<H: SpeechHost>(&mut self, rt: &mut Runtime<H>, request: UtteranceRequest) {
        self.enqueue(rt, request, 2);
    }

    pub(crate) fn stop<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) {
        self.abandon(rt);
    }

    /// Start the recovery protocol for `request`: cancel, refresh the
    /// catalog, speak a quiet probe, and re-issue on the probe's success.
    pub(crate) fn recover<H: SpeechHost>(&mut self, rt: &mut Runtime<H>, request: UtteranceRequest) {
        self.abandon(rt);
        self.recoveries += 1;
        log::info!("Attempting speech recovery");
        rt.emit(ReaderEvent::Recovering);

        let timer = rt.schedule(
            rt.timings.recovery_settle,
            Timer::Dispatch(DispatchTimer::RecoveryRefresh),
        );
        self.recovery = Some(Recovery {
            request,
            probe: None,
            timer: Some(timer),
        });
        self.state = DispatchState::Recovering;
    }

    pub(crate) fn on_timer<H: SpeechHost>(
        &mut self,
        rt: &mut Runtime<H>,
        timer: DispatchTimer,
    ) -> Option<Followup> {
        match timer {
            DispatchTimer::Settle => self.issue(rt),
            DispatchTimer::StallCheck => self.check_stall(rt),
            DispatchTimer::KeepAlive => self.pulse(rt),
            DispatchTimer::RecoveryRefresh => {
                let recovery = self.recovery.as_mut()?;
                recovery.timer = Some(rt.schedule(
                    Duration::ZERO,
                    Timer::Dispatch(DispatchTimer::RecoveryProbe),
                ));
                return Some(Followup::RefreshCatalog);
            }
            DispatchTimer::RecoveryProbe => self.issue_probe(rt),
            DispatchTimer::ProbeTimeout => {
                let recovery = self.recovery.as_mut()?;
                recovery.timer = None;
                log::error!("Recovery test got no response from the speech engine");
                rt.host.cancel();
                self.give_up(rt);
            }
            DispatchTimer::RecoveryReissue => {
                let recovery = self.recovery.take()?;
                log::info!("Recovery test successful, trying original text");
                return Some(Followup::Reissue(recovery.request));
            }
        }
        None
    }

    pub(crate) fn on_host_event<H: SpeechHost>(
        &mut self,
        rt: &mut Runtime<H>,
        id: UtteranceId,
        event: HostEvent,
    ) {
        if self.recovery.as_ref().is_some_and(|r| r.probe == Some(id)) {
            self.on_probe_event(rt, event);
            return;
        }

        let Some(session) = self.session.as_mut().filter(|s| s.utterance == Some(id)) else {
            log::debug!("Ignoring {event:?} for stale utterance {id}");
            return;
        };

        match event {
            HostEvent::Start => {
                if self.state != DispatchState::Queued {
                    return;
                }
                rt.cancel_timer(&mut session.stall);
                session.keep_alive_active = true;
                session.keep_alive = Some(rt.schedule(
                    rt.timings.keep_alive_interval,
                    Timer::Dispatch(DispatchTimer::KeepAlive),
                ));
                let language = display_name(session.request.language_tag());
                let voice = session.request.voice().map(|v| v.name.clone());
                log::info!("Started speaking in {}", session.request.language_tag());
                self.state = DispatchState::Speaking;
                rt.emit(ReaderEvent::Speaking { language, voice });
            }
            HostEvent::End => {
                log::info!("Finished speaking");
                self.finish(rt, DispatchState::Ended);
                rt.emit(ReaderEvent::Ended);
            }
            HostEvent::Error { code } => {
                log::error!("Speech error: {code}");
                self.finish(rt, DispatchState::Errored);
                rt.emit(ReaderEvent::Error(SpeechError::HostSynthesis { code }));
            }
        }
    }

    fn enqueue<H: SpeechHost>(&mut self, rt: &mut Runtime<H>, request: UtteranceRequest, attempt_count: u32) {
        self.abandon(rt);

        let mut session = Session::new(request, attempt_count);
        session.settle = Some(rt.schedule(
            rt.timings.settle_delay,
            Timer::Dispatch(DispatchTimer::Settle),
        ));
        self.session = Some(session);
        self.state = DispatchState::Queued;
    }

    /// Cancel the engine and drop any session or recovery without notifying anyone.
    fn abandon<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) {
        rt.host.cancel();

        let mut dropped = false;
        if let Some(mut session) = self.session.take() {
            session.clear_timers(rt);
            dropped = true;
        }
        if let Some(mut recovery) = self.recovery.take() {
            rt.cancel_timer(&mut recovery.timer);
            dropped = true;
        }
        if dropped {
            log::debug!("Cancelled in-flight speech");
            self.state = DispatchState::Cancelled;
        }
    }

    fn finish<H>(&mut self, rt: &mut Runtime<H>, state: DispatchState) {
        if let Some(mut session) = self.session.take() {
            session.clear_timers(rt);
        }
        self.state = state;
    }

    fn issue<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.settle = None;
        if session.utterance.is_some() {
            return;
        }

        let id = rt.next_id();
        let spec = session.request.to_spec(id);
        log::info!(
            "Speaking text in {} (Rate: {}, Pitch: {})",
            spec.lang,
            spec.rate,
            spec.pitch
        );
        log::debug!("Text to speak: {:?}", session.request.preview());
        match &spec.voice {
            Some(voice) => log::info!("Using voice: {} ({})", voice.name, voice.language_tag),
            None => log::warn!("No matching voice found for {}, using host default", spec.lang),
        }

        // Some engines ignore speak() while dormant; resume first.
        rt.host.resume();
        match rt.host.speak(&spec) {
            Ok(()) => {
                session.utterance = Some(id);
                session.stall = Some(rt.schedule(
                    rt.timings.stall_window,
                    Timer::Dispatch(DispatchTimer::StallCheck),
                ));
            }
            Err(e) => {
                log::error!("Error in speech synthesis: {e}");
                self.finish(rt, DispatchState::Errored);
                rt.emit(ReaderEvent::Error(e.into()));
            }
        }
    }

    fn check_stall<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) {
        if self.state != DispatchState::Queued {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.stall = None;
        if session.utterance.is_none() {
            return;
        }

        if session.attempt_count > 1 {
            log::error!("Recovered utterance did not start either, giving up");
            let window = rt.timings.stall_window;
            self.abandon(rt);
            self.state = DispatchState::Errored;
            rt.emit(ReaderEvent::Error(SpeechError::SynthesisStalled(window)));
        } else {
            log::warn!("Speech didn't start in expected time, trying recovery");
            let request = session.request.clone();
            self.recover(rt, request);
        }
    }

    fn pulse<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.keep_alive = None;
        if self.state == DispatchState::Speaking && rt.host.is_speaking() {
            log::debug!("Keep-alive resume");
            rt.host.resume();
            session.keep_alive = Some(rt.schedule(
                rt.timings.keep_alive_interval,
                Timer::Dispatch(DispatchTimer::KeepAlive),
            ));
        } else {
            session.keep_alive_active = false;
        }
    }

    fn issue_probe<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) {
        let Some(recovery) = self.recovery.as_mut() else {
            return;
        };
        recovery.timer = None;

        let id = rt.next_id();
        let spec = UtteranceSpec::silent(id, RECOVERY_PROBE_TEXT, recovery.request.language_tag());
        match rt.host.speak(&spec) {
            Ok(()) => {
                recovery.probe = Some(id);
                recovery.timer = Some(rt.schedule(
                    rt.timings.stall_window,
                    Timer::Dispatch(DispatchTimer::ProbeTimeout),
                ));
            }
            Err(e) => {
                log::error!("Recovery test failed: {e}");
                self.give_up(rt);
            }
        }
    }

    fn on_probe_event<H: SpeechHost>(&mut self, rt: &mut Runtime<H>, event: HostEvent) {
        match event {
            HostEvent::Start => {}
            HostEvent::End => {
                if let Some(recovery) = self.recovery.as_mut() {
                    recovery.probe = None;
                    rt.cancel_timer(&mut recovery.timer);
                    recovery.timer = Some(rt.schedule(
                        rt.timings.recovery_reissue_delay,
                        Timer::Dispatch(DispatchTimer::RecoveryReissue),
                    ));
                }
            }
            HostEvent::Error { code } => {
                log::error!("Recovery test failed ({code})");
                self.give_up(rt);
            }
        }
    }

    fn give_up<H>(&mut self, rt: &mut Runtime<H>) {
        if let Some(mut recovery) = self.recovery.take() {
            rt.cancel_timer(&mut recovery.timer);
        }
        self.state = DispatchState::Errored;
        rt.emit(ReaderEvent::Error(SpeechError::SpeechUnavailable));
    }
}
