#![allow(dead_code)]

use core::time::Duration;

use heapless::Vec;
use otg_core::fsm::{FsmConfig, OtgFsm, OtgState};
use otg_core::outputs::OutputKind;
use otg_core::port::{
    Capability, GadgetController, HostController, PortError, TimerService, Transceiver,
};
use otg_core::signals::{IdPin, Signal};
use otg_core::timers::{OtgTimer, TimerToken};

pub const CALL_LOG: usize = 256;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Vbus(bool),
    Connect(bool),
    Sof(bool),
    Charge(bool),
    Pulse,
    Arm(OtgTimer, Duration),
    Cancel(OtgTimer),
    Host(bool),
    Gadget(bool),
}

/// Port that logs every collaborator call and can refuse chosen ones.
#[derive(Default)]
pub struct RecordingPort {
    pub calls: Vec<Call, CALL_LOG>,
    unsupported: Vec<Capability, 7>,
    fail_once: Option<Capability>,
    host_running: bool,
    gadget_running: bool,
}

impl RecordingPort {
    pub fn without(capabilities: &[Capability]) -> Self {
        let mut port = Self::default();
        for capability in capabilities {
            port.unsupported
                .push(*capability)
                .expect("too many capabilities");
        }
        port
    }

    /// Makes the next call for `capability` fail.
    pub fn fail_once(&mut self, capability: Capability) {
        self.fail_once = Some(capability);
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls.iter().filter(|logged| **logged == call).count()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    fn log(&mut self, call: Call, capability: Capability) -> Result<(), PortError> {
        self.calls.push(call).expect("call log full");
        if self.unsupported.contains(&capability) {
            return Err(PortError::Unsupported(capability));
        }
        if self.fail_once == Some(capability) {
            self.fail_once = None;
            return Err(PortError::Failed {
                capability,
                reason: "injected",
            });
        }
        Ok(())
    }
}

impl Transceiver for RecordingPort {
    fn has_output(&self, output: OutputKind) -> bool {
        !self.unsupported.contains(&output.capability())
    }

    fn drive_vbus(&mut self, on: bool) -> Result<(), PortError> {
        self.log(Call::Vbus(on), Capability::DriveVbus)
    }

    fn local_connect(&mut self, on: bool) -> Result<(), PortError> {
        self.log(Call::Connect(on), Capability::LocalConnect)
    }

    fn local_sof(&mut self, on: bool) -> Result<(), PortError> {
        self.log(Call::Sof(on), Capability::LocalSof)
    }

    fn charge_vbus(&mut self, on: bool) -> Result<(), PortError> {
        self.log(Call::Charge(on), Capability::ChargeVbus)
    }

    fn start_pulse(&mut self) -> Result<(), PortError> {
        self.log(Call::Pulse, Capability::SrpPulse)
    }
}

impl TimerService for RecordingPort {
    fn arm(&mut self, token: TimerToken, timeout: Duration) {
        self.calls
            .push(Call::Arm(token.timer, timeout))
            .expect("call log full");
    }

    fn cancel(&mut self, timer: OtgTimer) {
        self.calls.push(Call::Cancel(timer)).expect("call log full");
    }
}

impl HostController for RecordingPort {
    fn start_host(&mut self, on: bool) -> Result<(), PortError> {
        assert!(
            !(on && self.gadget_running),
            "host started while the gadget stack runs"
        );
        self.log(Call::Host(on), Capability::HostStack)?;
        self.host_running = on;
        Ok(())
    }
}

impl GadgetController for RecordingPort {
    fn start_gadget(&mut self, on: bool) -> Result<(), PortError> {
        assert!(
            !(on && self.host_running),
            "gadget started while the host stack runs"
        );
        self.log(Call::Gadget(on), Capability::GadgetStack)?;
        self.gadget_running = on;
        Ok(())
    }
}

pub fn engine(port: RecordingPort) -> OtgFsm<RecordingPort> {
    OtgFsm::new(port, FsmConfig::new())
}

/// Runs the engine and requires a clean fixed point.
pub fn settle(fsm: &mut OtgFsm<RecordingPort>) -> OtgState {
    let summary = fsm.run().expect("run converges");
    assert!(summary.is_clean(), "collaborator errors: {summary:?}");
    summary.state
}

pub fn set(fsm: &mut OtgFsm<RecordingPort>, signal: Signal, value: bool) -> OtgState {
    fsm.set_signal(signal, value);
    settle(fsm)
}

pub fn expire(fsm: &mut OtgFsm<RecordingPort>, timer: OtgTimer) -> OtgState {
    assert!(fsm.timer_expired(timer), "{timer} was not armed");
    settle(fsm)
}

/// Brings a fresh A-device up to `a_host`.
pub fn a_host() -> OtgFsm<RecordingPort> {
    let mut fsm = engine(RecordingPort::default());
    fsm.set_id(IdPin::A);
    assert_eq!(settle(&mut fsm), OtgState::AIdle);
    assert_eq!(set(&mut fsm, Signal::ABusReq, true), OtgState::AWaitVrise);
    assert_eq!(set(&mut fsm, Signal::AVbusVld, true), OtgState::AWaitBcon);
    assert_eq!(set(&mut fsm, Signal::BConn, true), OtgState::AHost);
    fsm
}

/// Brings a fresh B-device up to `b_peripheral`.
pub fn b_peripheral() -> OtgFsm<RecordingPort> {
    let mut fsm = engine(RecordingPort::default());
    assert_eq!(settle(&mut fsm), OtgState::BIdle);
    assert_eq!(set(&mut fsm, Signal::BSessVld, true), OtgState::BPeripheral);
    fsm
}
