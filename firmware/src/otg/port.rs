//! The engine's view of the board.
//!
//! Line-level actions go straight to the board [`Transceiver`]. Stack and
//! timer actions are recorded for the async tasks, because the engine calls
//! them synchronously while holding the engine lock.

use core::time::Duration;

use otg_core::outputs::OutputKind;
use otg_core::port::{GadgetController, HostController, PortError, TimerService, Transceiver};
use otg_core::timers::{OtgTimer, TimerToken};

use super::stacks::StackSignals;
use super::timers::TimerSlots;

pub struct BoardPort<'a, T> {
    transceiver: T,
    timers: TimerSlots,
    stacks: &'a StackSignals,
}

impl<'a, T> BoardPort<'a, T> {
    pub const fn new(transceiver: T, stacks: &'a StackSignals) -> Self {
        Self {
            transceiver,
            timers: TimerSlots::new(),
            stacks,
        }
    }

    pub fn timers(&self) -> &TimerSlots {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut TimerSlots {
        &mut self.timers
    }

    pub fn transceiver(&self) -> &T {
        &self.transceiver
    }
}

impl<T: Transceiver> Transceiver for BoardPort<'_, T> {
    fn has_output(&self, output: OutputKind) -> bool {
        output == OutputKind::LocalSof || self.transceiver.has_output(output)
    }

    fn drive_vbus(&mut self, on: bool) -> Result<(), PortError> {
        self.transceiver.drive_vbus(on)
    }

    fn local_connect(&mut self, on: bool) -> Result<(), PortError> {
        self.transceiver.local_connect(on)
    }

    // SOF generation belongs to the host controller, not the line driver.
    fn local_sof(&mut self, on: bool) -> Result<(), PortError> {
        self.stacks.request_sof(on);
        Ok(())
    }

    fn charge_vbus(&mut self, on: bool) -> Result<(), PortError> {
        self.transceiver.charge_vbus(on)
    }

    fn start_pulse(&mut self) -> Result<(), PortError> {
        self.transceiver.start_pulse()
    }
}

impl<T> TimerService for BoardPort<'_, T> {
    fn arm(&mut self, token: TimerToken, timeout: Duration) {
        self.timers.request(token, timeout);
        self.stacks.notify_rearm();
    }

    fn cancel(&mut self, timer: OtgTimer) {
        self.timers.cancel(timer);
    }
}

impl<T> HostController for BoardPort<'_, T> {
    fn start_host(&mut self, on: bool) -> Result<(), PortError> {
        self.stacks.request_host(on);
        Ok(())
    }
}

impl<T> GadgetController for BoardPort<'_, T> {
    fn start_gadget(&mut self, on: bool) -> Result<(), PortError> {
        self.stacks.request_gadget(on);
        Ok(())
    }
}
