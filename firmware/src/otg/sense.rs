//! Board input sampling.
//!
//! The sense task samples the ID pin, the VBUS comparators and the bus
//! request button, and turns level changes into [`OtgEvent`]s.

use heapless::Vec;
use otg_core::signals::{IdPin, Signal};

use super::OtgEvent;

/// Most events one sample can produce.
pub const MAX_SENSE_EVENTS: usize = 6;

/// One sample of the board inputs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SenseLevels {
    pub id: IdPin,
    /// VBUS above the A-device valid threshold.
    pub vbus_valid: bool,
    /// VBUS above the session valid threshold.
    pub session_valid: bool,
    /// VBUS below the session end threshold.
    pub session_end: bool,
    /// Bus request button held.
    pub bus_request: bool,
}

impl SenseLevels {
    /// Events that move the engine from `previous` to `self`.
    ///
    /// The ID change goes first so the level changes that follow are read
    /// against the new side. The bus request button maps to the request
    /// signal of the current side.
    pub fn diff(&self, previous: &Self) -> Vec<OtgEvent, MAX_SENSE_EVENTS> {
        let mut events = Vec::new();
        if self.id != previous.id {
            let _ = events.push(OtgEvent::Id(self.id));
        }

        let levels = [
            (Signal::AVbusVld, self.vbus_valid, previous.vbus_valid),
            (Signal::ASessVld, self.session_valid, previous.session_valid),
            (Signal::BSessVld, self.session_valid, previous.session_valid),
            (Signal::BSessEnd, self.session_end, previous.session_end),
        ];
        for (signal, now, before) in levels {
            if now != before {
                let _ = events.push(OtgEvent::Signal(signal, now));
            }
        }

        if self.bus_request != previous.bus_request || self.id != previous.id {
            let _ = events.push(OtgEvent::Signal(
                request_signal(self.id),
                self.bus_request,
            ));
        }
        events
    }

    /// Events that load the first sample into a fresh engine.
    pub fn initial(&self) -> Vec<OtgEvent, MAX_SENSE_EVENTS> {
        let mut events = Vec::new();
        let _ = events.push(OtgEvent::Id(self.id));
        for (signal, level) in [
            (Signal::AVbusVld, self.vbus_valid),
            (Signal::ASessVld, self.session_valid),
            (Signal::BSessVld, self.session_valid),
            (Signal::BSessEnd, self.session_end),
            (request_signal(self.id), self.bus_request),
        ] {
            let _ = events.push(OtgEvent::Signal(signal, level));
        }
        events
    }
}

const fn request_signal(id: IdPin) -> Signal {
    match id {
        IdPin::A => Signal::ABusReq,
        IdPin::B => Signal::BBusReq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_sample_produces_nothing() {
        let levels = SenseLevels::default();
        assert!(levels.diff(&levels).is_empty());
    }

    #[test]
    fn session_valid_feeds_both_sides() {
        let before = SenseLevels::default();
        let after = SenseLevels {
            session_valid: true,
            ..before
        };
        assert_eq!(
            after.diff(&before).as_slice(),
            [
                OtgEvent::Signal(Signal::ASessVld, true),
                OtgEvent::Signal(Signal::BSessVld, true),
            ]
        );
    }

    #[test]
    fn id_change_leads_and_moves_the_request() {
        let before = SenseLevels {
            bus_request: true,
            ..SenseLevels::default()
        };
        let after = SenseLevels {
            id: IdPin::A,
            ..before
        };
        assert_eq!(
            after.diff(&before).as_slice(),
            [
                OtgEvent::Id(IdPin::A),
                OtgEvent::Signal(Signal::ABusReq, true),
            ]
        );
    }

    #[test]
    fn initial_sample_sets_every_input() {
        let levels = SenseLevels {
            session_end: true,
            ..SenseLevels::default()
        };
        let events = levels.initial();
        assert_eq!(events.len(), MAX_SENSE_EVENTS);
        assert_eq!(events[0], OtgEvent::Id(IdPin::B));
        assert!(events.contains(&OtgEvent::Signal(Signal::BSessEnd, true)));
        assert!(events.contains(&OtgEvent::Signal(Signal::BBusReq, false)));
    }
}
