//! Board wiring for the dual-role port.
//!
//! VBUS is switched by a load switch, the D+ pull-up and the VBUS charge
//! resistor sit behind GPIO-driven analog switches, and the SRP data-line
//! pulse is shaped by a monostable triggered from a GPIO edge. The VBUS
//! comparators and the ID pin are plain digital inputs.

use embassy_stm32::gpio::{Input, Level, Output};
use otg_core::outputs::OutputKind;
use otg_core::port::{PortError, Transceiver};
use otg_core::signals::IdPin;

use crate::otg::sense::SenseLevels;

pub struct BoardTransceiver<'d> {
    vbus_enable: Output<'d>,
    pullup: Output<'d>,
    charge: Output<'d>,
    pulse_trigger: Output<'d>,
}

impl<'d> BoardTransceiver<'d> {
    pub fn new(
        vbus_enable: Output<'d>,
        pullup: Output<'d>,
        charge: Output<'d>,
        pulse_trigger: Output<'d>,
    ) -> Self {
        Self {
            vbus_enable,
            pullup,
            charge,
            pulse_trigger,
        }
    }
}

impl Transceiver for BoardTransceiver<'_> {
    // SOF comes from the USB block, not from a GPIO.
    fn has_output(&self, output: OutputKind) -> bool {
        matches!(output, OutputKind::DriveVbus | OutputKind::LocalConnect)
    }

    fn drive_vbus(&mut self, on: bool) -> Result<(), PortError> {
        self.vbus_enable.set_level(Level::from(on));
        defmt::debug!("hw: vbus {}", on);
        Ok(())
    }

    fn local_connect(&mut self, on: bool) -> Result<(), PortError> {
        self.pullup.set_level(Level::from(on));
        Ok(())
    }

    fn charge_vbus(&mut self, on: bool) -> Result<(), PortError> {
        self.charge.set_level(Level::from(on));
        Ok(())
    }

    // The monostable fires on the rising edge and times the pulse itself.
    fn start_pulse(&mut self) -> Result<(), PortError> {
        self.pulse_trigger.set_high();
        self.pulse_trigger.set_low();
        defmt::debug!("hw: srp pulse");
        Ok(())
    }
}

/// Digital inputs sampled by the sense task.
pub struct SenseInputs<'d> {
    /// Low when an A-plug grounds the ID pin.
    pub id: Input<'d>,
    pub vbus_valid: Input<'d>,
    pub session_valid: Input<'d>,
    pub session_end: Input<'d>,
    /// Active-low push button.
    pub bus_request: Input<'d>,
}

impl SenseInputs<'_> {
    pub fn sample(&self) -> SenseLevels {
        SenseLevels {
            id: if self.id.is_low() { IdPin::A } else { IdPin::B },
            vbus_valid: self.vbus_valid.is_high(),
            session_valid: self.session_valid.is_high(),
            session_end: self.session_end.is_high(),
            bus_request: self.bus_request.is_low(),
        }
    }
}
