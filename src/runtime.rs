use std::collections::VecDeque;
use std::time::Duration;

use crate::dispatcher::DispatchTimer;
use crate::loader::LoaderTimer;
use crate::reader::ReaderEvent;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::settings::Timings;
use crate::UtteranceId;

/// Every task the reader's scheduler can hold.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Timer {
    Dispatch(DispatchTimer),
    Loader(LoaderTimer),
    Liveness,
    Refresh,
}

/// State shared by the reader's components: the host, the clock, id
/// allocation and the outgoing event queue.
///
/// Components never hold it; it is lent to each operation.
pub(crate) struct Runtime<H> {
    pub host: H,
    pub timings: Timings,
    pub locale: String,
    timers: Scheduler<Timer>,
    events: VecDeque<ReaderEvent>,
    next_utterance: u64,
}

impl<H> Runtime<H> {
    pub fn new(host: H, timings: Timings, locale: String) -> Self {
        Self {
            host,
            timings,
            locale,
            timers: Scheduler::new(),
            events: VecDeque::new(),
            next_utterance: 1,
        }
    }

    pub fn next_id(&mut self) -> UtteranceId {
        let id = UtteranceId(self.next_utterance);
        self.next_utterance += 1;
        id
    }

    pub fn emit(&mut self, event: ReaderEvent) {
        self.events.push_back(event);
    }

    pub fn drain_events(&mut self) -> Vec<ReaderEvent> {
        self.events.drain(..).collect()
    }

    pub fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerHandle {
        self.timers.schedule(delay, timer)
    }

    /// Cancel the timer in `slot`, if any, and clear the slot.
    pub fn cancel_timer(&mut self, slot: &mut Option<TimerHandle>) {
        if let Some(handle) = slot.take() {
            self.timers.cancel(handle);
        }
    }

    pub fn timers(&self) -> &Scheduler<Timer> {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut Scheduler<Timer> {
        &mut self.timers
    }
}
