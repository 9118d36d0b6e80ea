//! Collaborator capabilities the negotiation engine drives.
//!
//! Each trait method that has a default returns [`PortError::Unsupported`],
//! which is how a board reports that it never registered a handler for that
//! action. Implementations override only what their hardware can do, and list
//! the output lines they wire in [`Transceiver::has_output`].

use core::fmt;
use core::time::Duration;

use crate::outputs::OutputKind;
use crate::timers::{OtgTimer, TimerToken};

/// Actions a port may or may not support.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Capability {
    DriveVbus,
    LocalConnect,
    LocalSof,
    ChargeVbus,
    SrpPulse,
    HostStack,
    GadgetStack,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::DriveVbus => "drv_vbus",
            Capability::LocalConnect => "loc_conn",
            Capability::LocalSof => "loc_sof",
            Capability::ChargeVbus => "chrg_vbus",
            Capability::SrpPulse => "srp_pulse",
            Capability::HostStack => "host_stack",
            Capability::GadgetStack => "gadget_stack",
        })
    }
}

/// Error returned by a collaborator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError {
    /// No handler is registered for the capability.
    Unsupported(Capability),
    /// The handler ran and reported a failure.
    Failed {
        capability: Capability,
        reason: &'static str,
    },
}

impl PortError {
    #[must_use]
    pub const fn capability(self) -> Capability {
        match self {
            PortError::Unsupported(capability) | PortError::Failed { capability, .. } => {
                capability
            }
        }
    }
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::Unsupported(capability) => write!(f, "{capability} not supported"),
            PortError::Failed { capability, reason } => write!(f, "{capability} failed: {reason}"),
        }
    }
}

/// Line driver for the port's analog front end.
pub trait Transceiver {
    /// Whether a handler drives `output`. The engine checks this before
    /// every output request, so a missing line is reported even when the
    /// requested level is already in place.
    fn has_output(&self, output: OutputKind) -> bool {
        let _ = output;
        false
    }

    /// Switches the VBUS supply.
    fn drive_vbus(&mut self, on: bool) -> Result<(), PortError> {
        let _ = on;
        Err(PortError::Unsupported(Capability::DriveVbus))
    }

    /// Connects or disconnects the local D+ pull-up.
    fn local_connect(&mut self, on: bool) -> Result<(), PortError> {
        let _ = on;
        Err(PortError::Unsupported(Capability::LocalConnect))
    }

    /// Starts or stops start-of-frame generation.
    fn local_sof(&mut self, on: bool) -> Result<(), PortError> {
        let _ = on;
        Err(PortError::Unsupported(Capability::LocalSof))
    }

    /// Switches the VBUS charge resistor used while requesting a session.
    fn charge_vbus(&mut self, on: bool) -> Result<(), PortError> {
        let _ = on;
        Err(PortError::Unsupported(Capability::ChargeVbus))
    }

    /// Emits the SRP data-line pulse. Must return without waiting for the
    /// pulse to finish.
    fn start_pulse(&mut self) -> Result<(), PortError> {
        Err(PortError::Unsupported(Capability::SrpPulse))
    }
}

/// Platform timer service. Expiries are reported back through
/// [`crate::fsm::OtgFsm::timer_fired`] with the token handed to `arm`.
pub trait TimerService {
    /// Arms `token.timer`, replacing any deadline already pending on that
    /// channel.
    fn arm(&mut self, token: TimerToken, timeout: Duration);

    /// Cancels `timer`. Cancelling an idle channel is a no-op.
    fn cancel(&mut self, timer: OtgTimer);
}

/// Host controller stack entry point.
pub trait HostController {
    fn start_host(&mut self, on: bool) -> Result<(), PortError> {
        let _ = on;
        Err(PortError::Unsupported(Capability::HostStack))
    }
}

/// Gadget controller stack entry point.
pub trait GadgetController {
    fn start_gadget(&mut self, on: bool) -> Result<(), PortError> {
        let _ = on;
        Err(PortError::Unsupported(Capability::GadgetStack))
    }
}

/// Everything the engine needs from one physical port.
pub trait OtgPort: Transceiver + TimerService + HostController + GadgetController {}

impl<T> OtgPort for T where T: Transceiver + TimerService + HostController + GadgetController {}

/// Port without any registered handler.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullPort;

impl NullPort {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transceiver for NullPort {}

impl TimerService for NullPort {
    fn arm(&mut self, _: TimerToken, _: Duration) {}

    fn cancel(&mut self, _: OtgTimer) {}
}

impl HostController for NullPort {}

impl GadgetController for NullPort {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_port_reports_every_capability_unsupported() {
        let mut port = NullPort::new();
        assert!(!port.has_output(OutputKind::DriveVbus));
        assert_eq!(
            port.drive_vbus(true),
            Err(PortError::Unsupported(Capability::DriveVbus))
        );
        assert_eq!(
            port.start_pulse(),
            Err(PortError::Unsupported(Capability::SrpPulse))
        );
        assert_eq!(
            port.start_gadget(false),
            Err(PortError::Unsupported(Capability::GadgetStack))
        );
    }

    #[test]
    fn error_exposes_capability() {
        let error = PortError::Failed {
            capability: Capability::HostStack,
            reason: "phy not clocked",
        };
        assert_eq!(error.capability(), Capability::HostStack);
    }
}
