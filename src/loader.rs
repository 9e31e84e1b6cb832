//! Getting a voice list out of a host that may not have one yet.
//!
//! Some engines report an empty catalog until they have been poked. Loading
//! runs several paths at once and all of them write through
//! [`VoiceCatalog::offer`], so the first non-empty read wins and later empty
//! reads never clear it:
//!
//! 1. an immediate read,
//! 2. the host's catalog-changed notification,
//! 3. a ladder of silent probe utterances, re-reading after each one and
//!    backing off `step * attempt` between attempts,
//! 4. one final read at a fixed horizon.
//!
//! If the horizon passes with nothing loaded a
//! [`SpeechError::NoVoicesAvailable`] warning is emitted.

use crate::reader::ReaderEvent;
use crate::runtime::{Runtime, Timer};
use crate::scheduler::TimerHandle;
use crate::{HostEvent, SpeechError, SpeechHost, UtteranceId, UtteranceSpec, VoiceCatalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoaderTimer {
    Retry { attempt: u32 },
    Fallback,
}

/// Owns the voice catalog and the strategies that fill it.
#[derive(Debug, Default)]
pub(crate) struct VoiceCatalogLoader {
    catalog: VoiceCatalog,
    /// Catalog-changed notifications are honoured once loading has needed them.
    listening: bool,
    ladder_active: bool,
    ladder_probe: Option<(UtteranceId, u32)>,
    responsiveness_probe: Option<UtteranceId>,
    retry: Option<TimerHandle>,
    fallback: Option<TimerHandle>,
}

impl VoiceCatalogLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    /// Whether a retry ladder or the fallback read is still pending.
    pub fn is_armed(&self) -> bool {
        self.ladder_active || self.fallback.is_some()
    }

    pub(crate) fn owns(&self, id: UtteranceId) -> bool {
        self.ladder_probe.is_some_and(|(probe, _)| probe == id) || self.responsiveness_probe == Some(id)
    }

    /// Start loading. Does nothing beyond the immediate read if the host
    /// already has voices, and never starts a second ladder while one runs.
    pub(crate) fn load<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) {
        if self.catalog.offer(rt.host.voices()) {
            log::info!("Loaded {} voices immediately", self.catalog.len());
            self.disarm(rt);
            return;
        }

        log::info!("No voices available immediately, trying alternative methods");
        self.listening = true;
        if self.is_armed() {
            log::debug!("Voice loading already in progress");
            return;
        }

        self.ladder_active = true;
        self.attempt(rt, 1);
        self.fallback = Some(rt.schedule(
            rt.timings.loader_horizon,
            Timer::Loader(LoaderTimer::Fallback),
        ));
    }

    /// Cancel pending speech, wake the engine, re-read the catalog, and
    /// re-arm loading if the host still reports nothing.
    pub(crate) fn refresh<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) {
        rt.host.cancel();
        rt.host.resume();

        let voices = rt.host.voices();
        if voices.is_empty() {
            log::info!("No voices found during refresh, restarting voice loading");
            self.load(rt);
        } else {
            self.catalog.offer(voices);
            self.disarm(rt);
            log::info!(
                "Refreshed speech synthesis. Available voices: {}",
                self.catalog.len()
            );
        }

        let id = rt.next_id();
        let probe = UtteranceSpec::silent(id, "", &rt.locale);
        match rt.host.speak(&probe) {
            Ok(()) => self.responsiveness_probe = Some(id),
            Err(e) => log::error!("Error testing speech synthesis: {e}"),
        }
    }

    /// Single catalog read. Returns `true` if it replaced the catalog.
    pub(crate) fn reread<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) -> bool {
        let replaced = self.catalog.offer(rt.host.voices());
        if replaced {
            log::info!("Re-read {} voices", self.catalog.len());
            self.disarm(rt);
        }
        replaced
    }

    pub(crate) fn on_voices_changed<H: SpeechHost>(&mut self, rt: &mut Runtime<H>) {
        if !self.listening {
            return;
        }
        if self.catalog.offer(rt.host.voices()) {
            log::info!(
                "Loaded {} voices after catalog-changed notification",
                self.catalog.len()
            );
            self.disarm(rt);
        }
    }

    pub(crate) fn on_timer<H: SpeechHost>(&mut self, rt: &mut Runtime<H>, timer: LoaderTimer) {
        match timer {
            LoaderTimer::Retry { attempt } => {
                self.retry = None;
                if self.ladder_active {
                    self.attempt(rt, attempt);
                }
            }
            LoaderTimer::Fallback => {
                self.fallback = None;
                if self.catalog.offer(rt.host.voices()) {
                    log::info!("Loaded {} voices with final fallback", self.catalog.len());
                    self.disarm(rt);
                } else if self.catalog.is_empty() {
                    log::warn!("Could not load any voices even with fallbacks");
                    rt.emit(ReaderEvent::Warning(SpeechError::NoVoicesAvailable));
                }
            }
        }
    }

    pub(crate) fn on_host_event<H: SpeechHost>(
        &mut self,
        rt: &mut Runtime<H>,
        id: UtteranceId,
        event: HostEvent,
    ) {
        if self.responsiveness_probe == Some(id) {
            match event {
                HostEvent::Start => {}
                HostEvent::End => {
                    log::debug!("Speech system responsive");
                    self.responsiveness_probe = None;
                }
                HostEvent::Error { code } => {
                    log::error!("Speech system error: {code}");
                    self.responsiveness_probe = None;
                }
            }
            return;
        }

        let Some((probe, attempt)) = self.ladder_probe else {
            return;
        };
        if probe != id {
            return;
        }

        match event {
            HostEvent::Start => {}
            HostEvent::End => {
                self.ladder_probe = None;
                if self.catalog.offer(rt.host.voices()) {
                    log::info!(
                        "Loaded {} voices after attempt {attempt}",
                        self.catalog.len()
                    );
                    self.disarm(rt);
                } else {
                    self.schedule_retry(rt, attempt);
                }
            }
            HostEvent::Error { code } => {
                log::debug!("Voice loading probe {attempt} failed ({code})");
                self.ladder_probe = None;
                self.schedule_retry(rt, attempt);
            }
        }
    }

    fn attempt<H: SpeechHost>(&mut self, rt: &mut Runtime<H>, attempt: u32) {
        let max = rt.timings.loader_max_attempts;
        if attempt > max {
            log::warn!("Failed to load voices after {max} attempts");
            self.ladder_active = false;
            return;
        }

        log::debug!("Voice loading attempt {attempt}/{max}");
        let id = rt.next_id();
        let probe = UtteranceSpec::silent(id, "", &rt.locale);
        match rt.host.speak(&probe) {
            Ok(()) => self.ladder_probe = Some((id, attempt)),
            Err(e) => {
                log::error!("Error in voice loading attempt {attempt}: {e}");
                self.schedule_retry(rt, attempt);
            }
        }
    }

    fn schedule_retry<H>(&mut self, rt: &mut Runtime<H>, attempt: u32) {
        let delay = rt.timings.loader_backoff(attempt);
        self.retry = Some(rt.schedule(
            delay,
            Timer::Loader(LoaderTimer::Retry {
                attempt: attempt + 1,
            }),
        ));
    }

    fn disarm<H>(&mut self, rt: &mut Runtime<H>) {
        self.ladder_active = false;
        self.ladder_probe = None;
        rt.cancel_timer(&mut self.retry);
        rt.cancel_timer(&mut self.fallback);
    }
}
