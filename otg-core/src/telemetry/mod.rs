//! Transition trace kept by the negotiation engine.
//!
//! Every side effect the engine issues, and every timeout it accepts or
//! drops, lands in a fixed-size ring so that the emulator `trace` command and
//! firmware diagnostics can replay what happened without allocating. Events
//! encode to compact numeric codes for transport over diagnostics channels.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::fsm::OtgState;
use crate::outputs::{OutputKind, Protocol};
use crate::port::{Capability, PortError};
use crate::timers::OtgTimer;

/// Monotonic identifier for trace records. Wraps on overflow.
pub type EventId = u32;

/// Default number of retained trace records.
pub const TRACE_RING_CAPACITY: usize = 64;

/// Discriminated trace events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TraceEvent {
    StateEntered(OtgState),
    OutputOn(OutputKind),
    OutputOff(OutputKind),
    ProtocolSwitched(Protocol),
    TimerArmed(OtgTimer),
    TimerCancelled(OtgTimer),
    TimerExpired(OtgTimer),
    StaleTimeout(OtgTimer),
    SrpPulse,
    ChargeVbus(bool),
    CollaboratorFailed(Capability),
    Unconverged,
    Custom(u16),
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::StateEntered(state) => write!(f, "enter {state}"),
            TraceEvent::OutputOn(kind) => write!(f, "{kind}=1"),
            TraceEvent::OutputOff(kind) => write!(f, "{kind}=0"),
            TraceEvent::ProtocolSwitched(protocol) => write!(f, "protocol {protocol}"),
            TraceEvent::TimerArmed(timer) => write!(f, "arm {timer}"),
            TraceEvent::TimerCancelled(timer) => write!(f, "cancel {timer}"),
            TraceEvent::TimerExpired(timer) => write!(f, "expired {timer}"),
            TraceEvent::StaleTimeout(timer) => write!(f, "stale {timer}"),
            TraceEvent::SrpPulse => f.write_str("srp-pulse"),
            TraceEvent::ChargeVbus(on) => write!(f, "chrg_vbus={}", u8::from(*on)),
            TraceEvent::CollaboratorFailed(capability) => write!(f, "failed {capability}"),
            TraceEvent::Unconverged => f.write_str("unconverged"),
            TraceEvent::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TraceEvent {
    const STATE_BASE: u16 = 0x0000;
    const OUTPUT_ON_BASE: u16 = 0x0010;
    const OUTPUT_OFF_BASE: u16 = 0x0014;
    const PROTOCOL_BASE: u16 = 0x0018;
    const TIMER_ARMED_BASE: u16 = 0x0020;
    const TIMER_CANCELLED_BASE: u16 = 0x0028;
    const TIMER_EXPIRED_BASE: u16 = 0x0030;
    const STALE_TIMEOUT_BASE: u16 = 0x0038;
    const SRP_PULSE_CODE: u16 = 0x0040;
    const CHARGE_OFF_CODE: u16 = 0x0041;
    const CHARGE_ON_CODE: u16 = 0x0042;
    const UNCONVERGED_CODE: u16 = 0x0043;
    const FAILURE_BASE: u16 = 0x0048;
    const FAILURE_END: u16 = Self::FAILURE_BASE + 7;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TraceEvent::StateEntered(state) => Self::STATE_BASE + state.as_index() as u16,
            TraceEvent::OutputOn(kind) => Self::OUTPUT_ON_BASE + kind.as_index() as u16,
            TraceEvent::OutputOff(kind) => Self::OUTPUT_OFF_BASE + kind.as_index() as u16,
            TraceEvent::ProtocolSwitched(protocol) => Self::PROTOCOL_BASE + protocol_index(protocol),
            TraceEvent::TimerArmed(timer) => Self::TIMER_ARMED_BASE + timer.as_index() as u16,
            TraceEvent::TimerCancelled(timer) => {
                Self::TIMER_CANCELLED_BASE + timer.as_index() as u16
            }
            TraceEvent::TimerExpired(timer) => Self::TIMER_EXPIRED_BASE + timer.as_index() as u16,
            TraceEvent::StaleTimeout(timer) => Self::STALE_TIMEOUT_BASE + timer.as_index() as u16,
            TraceEvent::SrpPulse => Self::SRP_PULSE_CODE,
            TraceEvent::ChargeVbus(false) => Self::CHARGE_OFF_CODE,
            TraceEvent::ChargeVbus(true) => Self::CHARGE_ON_CODE,
            TraceEvent::CollaboratorFailed(capability) => {
                Self::FAILURE_BASE + capability_index(capability)
            }
            TraceEvent::Unconverged => Self::UNCONVERGED_CODE,
            TraceEvent::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TraceEvent::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        let offset = |base: u16| usize::from(code - base);
        match code {
            Self::SRP_PULSE_CODE => TraceEvent::SrpPulse,
            Self::CHARGE_OFF_CODE => TraceEvent::ChargeVbus(false),
            Self::CHARGE_ON_CODE => TraceEvent::ChargeVbus(true),
            Self::UNCONVERGED_CODE => TraceEvent::Unconverged,
            value if value < Self::OUTPUT_ON_BASE => OtgState::from_index(offset(Self::STATE_BASE))
                .map_or(TraceEvent::Custom(value), TraceEvent::StateEntered),
            value if (Self::OUTPUT_ON_BASE..Self::OUTPUT_OFF_BASE).contains(&value) => {
                output_from_index(offset(Self::OUTPUT_ON_BASE))
                    .map_or(TraceEvent::Custom(value), TraceEvent::OutputOn)
            }
            value if (Self::OUTPUT_OFF_BASE..Self::PROTOCOL_BASE).contains(&value) => {
                output_from_index(offset(Self::OUTPUT_OFF_BASE))
                    .map_or(TraceEvent::Custom(value), TraceEvent::OutputOff)
            }
            value if (Self::PROTOCOL_BASE..Self::TIMER_ARMED_BASE).contains(&value) => {
                protocol_from_index(offset(Self::PROTOCOL_BASE))
                    .map_or(TraceEvent::Custom(value), TraceEvent::ProtocolSwitched)
            }
            value if (Self::TIMER_ARMED_BASE..Self::TIMER_CANCELLED_BASE).contains(&value) => {
                OtgTimer::from_index(offset(Self::TIMER_ARMED_BASE))
                    .map_or(TraceEvent::Custom(value), TraceEvent::TimerArmed)
            }
            value if (Self::TIMER_CANCELLED_BASE..Self::TIMER_EXPIRED_BASE).contains(&value) => {
                OtgTimer::from_index(offset(Self::TIMER_CANCELLED_BASE))
                    .map_or(TraceEvent::Custom(value), TraceEvent::TimerCancelled)
            }
            value if (Self::TIMER_EXPIRED_BASE..Self::STALE_TIMEOUT_BASE).contains(&value) => {
                OtgTimer::from_index(offset(Self::TIMER_EXPIRED_BASE))
                    .map_or(TraceEvent::Custom(value), TraceEvent::TimerExpired)
            }
            value if (Self::STALE_TIMEOUT_BASE..Self::SRP_PULSE_CODE).contains(&value) => {
                OtgTimer::from_index(offset(Self::STALE_TIMEOUT_BASE))
                    .map_or(TraceEvent::Custom(value), TraceEvent::StaleTimeout)
            }
            value if (Self::FAILURE_BASE..Self::FAILURE_END).contains(&value) => {
                capability_from_index(offset(Self::FAILURE_BASE))
                    .map_or(TraceEvent::Custom(value), TraceEvent::CollaboratorFailed)
            }
            other => TraceEvent::Custom(other),
        }
    }
}

/// Extra context attached to a trace record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TraceDetail {
    None,
    Transition { from: OtgState },
    Failure(PortError),
    Passes(u8),
}

impl fmt::Display for TraceDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceDetail::None => Ok(()),
            TraceDetail::Transition { from } => write!(f, "from {from}"),
            TraceDetail::Failure(error) => error.fmt(f),
            TraceDetail::Passes(passes) => write!(f, "after {passes} passes"),
        }
    }
}

/// Trace record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TraceRecord {
    pub id: EventId,
    /// `run()` invocation the record belongs to (0 before the first run).
    pub run: u32,
    pub event: TraceEvent,
    pub detail: TraceDetail,
}

/// Records trace events into a fixed-size ring buffer.
pub struct TraceRecorder<const CAPACITY: usize = TRACE_RING_CAPACITY> {
    ring: HistoryBuf<TraceRecord, CAPACITY>,
    next_event_id: EventId,
    run: u32,
}

impl<const CAPACITY: usize> TraceRecorder<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
            run: 0,
        }
    }

    /// Returns an iterator over the retained records in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TraceRecord> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TraceRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of `run()` invocations that did work.
    #[must_use]
    pub const fn runs(&self) -> u32 {
        self.run
    }

    pub(crate) fn begin_run(&mut self) {
        self.run = self.run.wrapping_add(1);
    }

    /// Records an event and returns its identifier.
    pub fn record(&mut self, event: TraceEvent, detail: TraceDetail) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TraceRecord {
            id,
            run: self.run,
            event,
            detail,
        });
        id
    }
}

impl<const CAPACITY: usize> Default for TraceRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

const fn protocol_index(protocol: Protocol) -> u16 {
    match protocol {
        Protocol::Undefined => 0,
        Protocol::Host => 1,
        Protocol::Gadget => 2,
    }
}

fn protocol_from_index(index: usize) -> Option<Protocol> {
    match index {
        0 => Some(Protocol::Undefined),
        1 => Some(Protocol::Host),
        2 => Some(Protocol::Gadget),
        _ => None,
    }
}

fn output_from_index(index: usize) -> Option<OutputKind> {
    OutputKind::ALL.get(index).copied()
}

const CAPABILITIES: [Capability; 7] = [
    Capability::DriveVbus,
    Capability::LocalConnect,
    Capability::LocalSof,
    Capability::ChargeVbus,
    Capability::SrpPulse,
    Capability::HostStack,
    Capability::GadgetStack,
];

const fn capability_index(capability: Capability) -> u16 {
    match capability {
        Capability::DriveVbus => 0,
        Capability::LocalConnect => 1,
        Capability::LocalSof => 2,
        Capability::ChargeVbus => 3,
        Capability::SrpPulse => 4,
        Capability::HostStack => 5,
        Capability::GadgetStack => 6,
    }
}

fn capability_from_index(index: usize) -> Option<Capability> {
    CAPABILITIES.get(index).copied()
}

impl TryFrom<u16> for TraceEvent {
    type Error = u16;

    /// Strict decoding that rejects codes outside the catalog.
    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match TraceEvent::from_raw(code) {
            TraceEvent::Custom(_) => Err(code),
            event => Ok(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codes_decode_for_catalog_events() {
        let events = [
            TraceEvent::StateEntered(OtgState::BHost),
            TraceEvent::OutputOn(OutputKind::DriveVbus),
            TraceEvent::OutputOff(OutputKind::LocalSof),
            TraceEvent::ProtocolSwitched(Protocol::Gadget),
            TraceEvent::TimerArmed(OtgTimer::AWaitEnum),
            TraceEvent::TimerCancelled(OtgTimer::AWaitVrise),
            TraceEvent::StaleTimeout(OtgTimer::BSrpFail),
            TraceEvent::ChargeVbus(true),
            TraceEvent::CollaboratorFailed(Capability::GadgetStack),
        ];
        for event in events {
            assert_eq!(TraceEvent::from_raw(event.to_raw()), event);
        }
    }

    #[test]
    fn unknown_codes_fall_back_to_custom() {
        assert_eq!(TraceEvent::from_raw(0x000F), TraceEvent::Custom(0x000F));
        assert_eq!(TraceEvent::from_raw(0x7777), TraceEvent::Custom(0x7777));
        assert_eq!(TraceEvent::try_from(0x7777), Err(0x7777));
    }

    #[test]
    fn recorder_keeps_newest_records_and_tags_runs() {
        let mut recorder: TraceRecorder<2> = TraceRecorder::new();
        recorder.record(TraceEvent::SrpPulse, TraceDetail::None);
        recorder.begin_run();
        recorder.record(TraceEvent::Unconverged, TraceDetail::Passes(13));
        let last = recorder.record(TraceEvent::ChargeVbus(false), TraceDetail::None);

        assert_eq!(recorder.len(), 2);
        assert_eq!(last, 2);
        let first = recorder.oldest_first().next().expect("record present");
        assert_eq!(first.event, TraceEvent::Unconverged);
        assert_eq!(first.run, 1);
        assert_eq!(
            recorder.latest().map(|record| record.event),
            Some(TraceEvent::ChargeVbus(false))
        );
    }
}
