use crossbeam::channel::Sender;
use log::debug;

/// Asynchronous notifications raised by the card.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PhoneEvent {
    /// Reported hookstate changed; `true` is off-hook.
    Hookstate(bool),
    Flash,
    /// The PSTN ring cadence matched (or, without a cadence, a ring burst).
    PstnRing,
    /// The DAA captured an inbound Caller-ID burst.
    CallerId,
    PstnWink,
    FilterCadence(usize),
    FilterTrigger(usize),
    Dtmf(char),
    /// Outbound Caller-ID playback finished.
    CallerIdSent,
}

pub type EventSink = Sender<PhoneEvent>;

/// Latched event flags, read and cleared as one.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Exceptions {
    pub hookstate: bool,
    pub flash: bool,
    pub pstn_ring: bool,
    pub caller_id: bool,
    pub pstn_wink: bool,
    pub filter_cadence: [bool; 4],
    pub filter_trigger: [bool; 4],
    pub dtmf_ready: bool,
    pub caller_id_sent: bool,
}

impl Exceptions {
    fn latch(&mut self, event: PhoneEvent) {
        match event {
            PhoneEvent::Hookstate(_)     => self.hookstate = true,
            PhoneEvent::Flash            => self.flash = true,
            PhoneEvent::PstnRing         => self.pstn_ring = true,
            PhoneEvent::CallerId         => self.caller_id = true,
            PhoneEvent::PstnWink         => self.pstn_wink = true,
            PhoneEvent::FilterCadence(n) => self.filter_cadence[n] = true,
            PhoneEvent::FilterTrigger(n) => self.filter_trigger[n] = true,
            PhoneEvent::Dtmf(_)          => self.dtmf_ready = true,
            PhoneEvent::CallerIdSent     => self.caller_id_sent = true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Exceptions::default()
    }
}

/// Events raised during one tick, waiting for delivery.
#[derive(Default)]
pub struct EventQueue {
    pending: Vec<PhoneEvent>,
    exceptions: Exceptions,
    sink: Option<EventSink>,
}

impl EventQueue {
    /// An event raised twice in the same tick is delivered once.
    pub fn raise(&mut self, event: PhoneEvent) {
        self.exceptions.latch(event);
        if !self.pending.contains(&event) {
            self.pending.push(event);
        }
    }

    pub fn set_sink(&mut self, sink: Option<EventSink>) {
        self.sink = sink;
    }

    pub fn take_exceptions(&mut self) -> Exceptions {
        std::mem::take(&mut self.exceptions)
    }

    pub fn pending(&self) -> &[PhoneEvent] {
        &self.pending
    }

    /// Hand this tick's events to the sink, if anyone is listening.
    pub fn deliver(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let Some(sink) = &self.sink else {
            return;
        };
        for event in pending {
            if sink.send(event).is_err() {
                debug!("event receiver gone; dropping sink");
                self.sink = None;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam::channel::unbounded;

    #[test]
    fn duplicate_events_in_one_tick_collapse() {
        let (tx, rx) = unbounded();
        let mut queue = EventQueue::default();
        queue.set_sink(Some(tx));

        queue.raise(PhoneEvent::Hookstate(true));
        queue.raise(PhoneEvent::Hookstate(true));
        queue.raise(PhoneEvent::FilterCadence(2));
        queue.deliver();

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got, vec![PhoneEvent::Hookstate(true), PhoneEvent::FilterCadence(2)]);
        assert!(queue.pending().is_empty());
    }

    #[test]
    fn exceptions_read_and_clear() {
        let mut queue = EventQueue::default();
        queue.raise(PhoneEvent::PstnWink);
        queue.raise(PhoneEvent::FilterTrigger(1));
        queue.deliver();

        let ex = queue.take_exceptions();
        assert!(ex.pstn_wink);
        assert!(ex.filter_trigger[1]);
        assert!(!ex.flash);
        assert!(queue.take_exceptions().is_empty());
    }

    #[test]
    fn dropped_receiver_is_not_fatal() {
        let (tx, rx) = unbounded();
        let mut queue = EventQueue::default();
        queue.set_sink(Some(tx));
        drop(rx);

        queue.raise(PhoneEvent::Flash);
        queue.deliver();
        queue.raise(PhoneEvent::Flash);
        queue.deliver();
        assert!(queue.take_exceptions().flash);
    }
}
