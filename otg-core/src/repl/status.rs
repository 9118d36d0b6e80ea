//! Shared status surface for the REPL.
//!
//! [`StatusSnapshot`] copies what the `status` command shows out of the
//! engine so the front-end can release its lock before rendering.
//! [`StatusFormatter`] keeps the text identical across front-ends.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::fsm::{OtgFsm, OtgState};
use crate::outputs::{OutputKind, Protocol};
use crate::port::OtgPort;
use crate::signals::{IdPin, SIGNAL_COUNT, Signal};
use crate::timers::{OtgTimer, TIMER_COUNT};

/// Armed timer together with its configured duration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArmedTimer {
    pub timer: OtgTimer,
    pub duration: Duration,
    /// Time left before expiry when the front-end tracks deadlines.
    pub remaining: Option<Duration>,
}

/// Point-in-time copy of the engine state shown by `status`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: OtgState,
    pub protocol: Protocol,
    pub id: IdPin,
    pub outputs: [(OutputKind, bool); 3],
    pub asserted: Vec<Signal, SIGNAL_COUNT>,
    pub timers: Vec<ArmedTimer, TIMER_COUNT>,
}

impl StatusSnapshot {
    /// Copies the status fields out of `fsm`.
    pub fn capture<P: OtgPort>(fsm: &OtgFsm<P>) -> Self {
        let latch = fsm.outputs();
        let outputs = OutputKind::ALL.map(|kind| (kind, latch.get(kind)));

        let mut asserted = Vec::new();
        for signal in fsm.signals().asserted() {
            let _ = asserted.push(signal);
        }

        let mut timers = Vec::new();
        for timer in fsm.timers().armed() {
            let _ = timers.push(ArmedTimer {
                timer,
                duration: fsm.config().timers.duration(timer),
                remaining: None,
            });
        }

        Self {
            state: fsm.state(),
            protocol: fsm.protocol(),
            id: fsm.signals().id,
            outputs,
            asserted,
            timers,
        }
    }

    /// Fills in the time left for each armed timer.
    #[must_use]
    pub fn with_remaining(mut self, remaining: impl Fn(OtgTimer) -> Option<Duration>) -> Self {
        for armed in &mut self.timers {
            armed.remaining = remaining(armed.timer);
        }
        self
    }
}

/// Renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes `state a_host role=host id=a`.
    pub fn write_state_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "state {} role={} id={}",
            self.snapshot.state, self.snapshot.protocol, self.snapshot.id
        )
    }

    /// Writes `outputs drv_vbus=on loc_conn=off loc_sof=on`.
    pub fn write_outputs_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("outputs")?;
        for (kind, on) in self.snapshot.outputs {
            write!(writer, " {kind}={}", if on { "on" } else { "off" })?;
        }
        Ok(())
    }

    /// Writes the asserted signals, or `signals none`.
    pub fn write_signals_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("signals")?;
        if self.snapshot.asserted.is_empty() {
            return writer.write_str(" none");
        }
        for signal in &self.snapshot.asserted {
            write!(writer, " {signal}")?;
        }
        Ok(())
    }

    /// Writes `timers a_wait_bcon=1100ms(+350ms)` style entries.
    pub fn write_timers_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("timers")?;
        if self.snapshot.timers.is_empty() {
            return writer.write_str(" none");
        }
        for armed in &self.snapshot.timers {
            write!(writer, " {}={}ms", armed.timer, armed.duration.as_millis())?;
            if let Some(remaining) = armed.remaining {
                writer.write_char('(')?;
                write_duration(writer, remaining)?;
                writer.write_char(')')?;
            }
        }
        Ok(())
    }
}

fn write_duration<W: fmt::Write>(writer: &mut W, value: Duration) -> fmt::Result {
    if value >= Duration::from_secs(1) {
        let millis = value.as_millis();
        let seconds = millis / 1_000;
        let tenths = (millis % 1_000) / 100;
        write!(writer, "+{seconds}.{tenths}s")
    } else if value >= Duration::from_millis(1) {
        write!(writer, "+{}ms", value.as_millis())
    } else {
        write!(writer, "+{}us", value.as_micros())
    }
}

#[cfg(test)]
mod tests {
    use heapless::String;

    use super::*;
    use crate::fsm::FsmConfig;
    use crate::port::NullPort;

    fn render(write: impl Fn(&mut String<128>) -> fmt::Result) -> String<128> {
        let mut line = String::new();
        write(&mut line).expect("line fits");
        line
    }

    #[test]
    fn captures_fresh_b_device() {
        let mut fsm = OtgFsm::new(NullPort, FsmConfig::new());
        fsm.run().expect("converges");
        let snapshot = StatusSnapshot::capture(&fsm);
        let formatter = StatusFormatter::new(&snapshot);

        assert_eq!(
            render(|w| formatter.write_state_line(w)).as_str(),
            "state b_idle role=undefined id=b"
        );
        assert_eq!(
            render(|w| formatter.write_outputs_line(w)).as_str(),
            "outputs drv_vbus=off loc_conn=off loc_sof=off"
        );
        assert_eq!(
            render(|w| formatter.write_signals_line(w)).as_str(),
            "signals none"
        );
        assert_eq!(
            render(|w| formatter.write_timers_line(w)).as_str(),
            "timers b_se0_srp=1000ms"
        );
    }

    #[test]
    fn remaining_time_is_rendered() {
        let mut fsm = OtgFsm::new(NullPort, FsmConfig::new());
        fsm.set_signal(Signal::BBusReq, true);
        fsm.run().expect("converges");
        let snapshot = StatusSnapshot::capture(&fsm)
            .with_remaining(|_| Some(Duration::from_millis(1_250)));
        let formatter = StatusFormatter::new(&snapshot);

        assert_eq!(
            render(|w| formatter.write_signals_line(w)).as_str(),
            "signals b_bus_req"
        );
        assert_eq!(
            render(|w| formatter.write_timers_line(w)).as_str(),
            "timers b_se0_srp=1000ms(+1.2s)"
        );
    }
}
