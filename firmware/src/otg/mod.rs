//! Glue between the firmware tasks and the `otg-core` negotiation engine.
//!
//! Everything that touches the engine goes through [`OtgCell`]. Producers
//! that must not block (input sensing, the USB device handler) never lock
//! it; they post [`OtgEvent`]s to the event queue and the OTG task applies
//! them in order.

pub mod console;
pub mod port;
pub mod sense;
pub mod stacks;
pub mod timers;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use embassy_time::Instant;
use otg_core::fsm::{FsmError, OtgFsm, RunSummary};
use otg_core::port::{OtgPort, Transceiver};
use otg_core::signals::{IdPin, Signal};
use portable_atomic::{AtomicU32, Ordering};

use self::port::BoardPort;

/// Depth of the queue feeding the OTG task.
pub const EVENT_QUEUE_DEPTH: usize = 16;

#[cfg(target_os = "none")]
pub type OtgMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
pub type OtgMutex = NoopRawMutex;

/// The one engine instance, shared by the OTG task and the console.
pub type OtgCell<P> = Mutex<OtgMutex, RefCell<OtgFsm<P>>>;

/// Input changes reported to the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum OtgEvent {
    Signal(Signal, bool),
    Id(IdPin),
    /// The remote host suspended (`true`) or resumed the bus while this
    /// port is the gadget.
    RemoteSuspend(bool),
    /// The gadget stack saw the host enable HNP.
    HnpEnabled,
}

pub type EventQueue = Channel<OtgMutex, OtgEvent, EVENT_QUEUE_DEPTH>;
pub type EventSender<'a> = Sender<'a, OtgMutex, OtgEvent, EVENT_QUEUE_DEPTH>;
pub type EventReceiver<'a> = Receiver<'a, OtgMutex, OtgEvent, EVENT_QUEUE_DEPTH>;

/// Applies one event to the engine without running it. Returns whether the
/// engine saw a change.
pub fn apply_event<P: OtgPort>(fsm: &mut OtgFsm<P>, event: OtgEvent) -> bool {
    match event {
        OtgEvent::Signal(signal, level) => fsm.set_signal(signal, level),
        OtgEvent::Id(id) => fsm.set_id(id),
        OtgEvent::RemoteSuspend(level) => {
            let signal = match fsm.signals().id {
                IdPin::A => Signal::BBusSuspend,
                IdPin::B => Signal::ABusSuspend,
            };
            fsm.set_signal(signal, level)
        }
        OtgEvent::HnpEnabled => {
            let before = fsm.signals().b_hnp_enable();
            fsm.gadget_hnp_enabled();
            !before
        }
    }
}

/// Delivers every timer whose deadline passed at `now`, oldest deadline
/// first, runs the engine and pins newly armed timers to `now`.
///
/// # Errors
///
/// Propagates [`FsmError::Unconverged`] from the run.
pub fn service<T: Transceiver>(
    fsm: &mut OtgFsm<BoardPort<'_, T>>,
    now: Instant,
) -> Result<RunSummary, FsmError> {
    let due = fsm.port_mut().timers_mut().take_due(now);
    for token in due {
        fsm.timer_fired(token);
    }
    let result = fsm.run();
    fsm.port_mut().timers_mut().schedule(now);
    result
}

/// Non-blocking producer side of the event queue.
///
/// A full queue drops the event and bumps a counter the console reports.
#[derive(Clone, Copy)]
pub struct EventPublisher<'a> {
    sender: EventSender<'a>,
    dropped: &'a AtomicU32,
}

impl<'a> EventPublisher<'a> {
    pub const fn new(sender: EventSender<'a>, dropped: &'a AtomicU32) -> Self {
        Self { sender, dropped }
    }

    /// Posts `event`. Returns `false` when the queue was full.
    pub fn publish(&self, event: OtgEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_time::Duration;
    use otg_core::fsm::{FsmConfig, OtgState};
    use otg_core::port::NullPort;
    use otg_core::timers::OtgTimer;

    use crate::otg::port::tests::FakeTransceiver;
    use crate::otg::stacks::StackSignals;

    #[test]
    fn events_map_onto_engine_inputs() {
        let mut fsm = OtgFsm::new(NullPort, FsmConfig::new());
        assert!(apply_event(&mut fsm, OtgEvent::Id(IdPin::A)));
        assert!(!apply_event(&mut fsm, OtgEvent::Id(IdPin::A)));
        assert!(apply_event(&mut fsm, OtgEvent::Signal(Signal::ABusReq, true)));
        assert!(apply_event(&mut fsm, OtgEvent::HnpEnabled));
        assert!(!apply_event(&mut fsm, OtgEvent::HnpEnabled));
        assert!(fsm.signals().get(Signal::ABusReq));
        assert!(fsm.signals().b_hnp_enable());
    }

    #[test]
    fn remote_suspend_follows_the_id_side() {
        let mut fsm = OtgFsm::new(NullPort, FsmConfig::new());
        assert!(apply_event(&mut fsm, OtgEvent::RemoteSuspend(true)));
        assert!(fsm.signals().get(Signal::ABusSuspend));

        apply_event(&mut fsm, OtgEvent::Id(IdPin::A));
        assert!(apply_event(&mut fsm, OtgEvent::RemoteSuspend(true)));
        assert!(fsm.signals().get(Signal::BBusSuspend));
    }

    #[test]
    fn full_queue_counts_dropped_events() {
        let queue = EventQueue::new();
        let dropped = AtomicU32::new(0);
        let publisher = EventPublisher::new(queue.sender(), &dropped);

        for _ in 0..EVENT_QUEUE_DEPTH {
            assert!(publisher.publish(OtgEvent::HnpEnabled));
        }
        assert!(!publisher.publish(OtgEvent::Id(IdPin::A)));
        assert_eq!(publisher.dropped(), 1);
        assert_eq!(queue.try_receive(), Ok(OtgEvent::HnpEnabled));
    }

    #[test]
    fn service_delivers_due_timers_and_reschedules() {
        let stacks = StackSignals::new();
        let port = BoardPort::new(FakeTransceiver::default(), &stacks);
        let mut fsm = OtgFsm::new(port, FsmConfig::new());
        let start = Instant::from_millis(1_000);

        fsm.set_id(IdPin::A);
        fsm.set_signal(Signal::ABusReq, true);
        let summary = service(&mut fsm, start).expect("converges");
        assert_eq!(summary.state, OtgState::AWaitVrise);
        let vrise = fsm
            .port()
            .timers()
            .deadline(OtgTimer::AWaitVrise)
            .expect("vrise armed");
        assert_eq!(vrise, start + Duration::from_millis(100));
        assert_eq!(fsm.port().timers().next_deadline(), Some(vrise));

        let summary = service(&mut fsm, start + Duration::from_millis(50)).expect("converges");
        assert_eq!(summary.transitions, 0);
        assert_eq!(fsm.state(), OtgState::AWaitVrise);

        fsm.set_signal(Signal::AVbusVld, true);
        let rose = start + Duration::from_millis(60);
        let summary = service(&mut fsm, rose).expect("converges");
        assert_eq!(summary.state, OtgState::AWaitBcon);
        assert!(fsm.port().timers().deadline(OtgTimer::AWaitVrise).is_none());
        let bcon = fsm
            .port()
            .timers()
            .deadline(OtgTimer::AWaitBcon)
            .expect("bcon armed");
        assert_eq!(bcon, rose + Duration::from_millis(1_100));

        let summary = service(&mut fsm, bcon).expect("converges");
        assert_eq!(summary.initial, OtgState::AWaitBcon);
        assert_eq!(summary.state, OtgState::AIdle);
        assert!(!fsm.signals().get(Signal::ABusReq));
        assert_eq!(fsm.port().timers().next_deadline(), None);
    }
}
