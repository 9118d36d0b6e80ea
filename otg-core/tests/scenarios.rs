mod support;

use otg_core::fsm::{DEFAULT_MAX_PASSES, FsmError, OtgState};
use otg_core::outputs::{OutputKind, Protocol};
use otg_core::signals::{IdPin, Signal};
use otg_core::telemetry::TraceEvent;
use otg_core::timers::{DEFAULT_A_WAIT_BCON, DEFAULT_A_WAIT_VRISE, DEFAULT_B_SRP_FAIL, OtgTimer};

use support::{Call, RecordingPort, engine, expire, set, settle};

fn a_idle() -> otg_core::fsm::OtgFsm<RecordingPort> {
    let mut fsm = engine(RecordingPort::default());
    fsm.set_id(IdPin::A);
    assert_eq!(settle(&mut fsm), OtgState::AIdle);
    fsm
}

#[test]
fn a_device_without_request_stays_idle_and_unpowered() {
    let fsm = a_idle();

    assert!(!fsm.outputs().get(OutputKind::DriveVbus));
    assert_eq!(fsm.protocol(), Protocol::Undefined);
    assert_eq!(fsm.port().count(Call::Host(true)), 0);
    assert!(fsm.port().calls.is_empty());
}

#[test]
fn bus_request_powers_vbus_once_and_arms_rise_timer() {
    let mut fsm = a_idle();

    assert_eq!(set(&mut fsm, Signal::ABusReq, true), OtgState::AWaitVrise);
    assert_eq!(
        fsm.port().calls.as_slice(),
        [
            Call::Vbus(true),
            Call::Arm(OtgTimer::AWaitVrise, DEFAULT_A_WAIT_VRISE)
        ]
    );
    assert!(fsm.timers().is_armed(OtgTimer::AWaitVrise));
}

#[test]
fn vbus_valid_swaps_rise_timer_for_connect_timer() {
    let mut fsm = a_idle();
    set(&mut fsm, Signal::ABusReq, true);
    fsm.port_mut().clear();

    assert_eq!(set(&mut fsm, Signal::AVbusVld, true), OtgState::AWaitBcon);
    assert_eq!(
        fsm.port().calls.as_slice(),
        [
            Call::Cancel(OtgTimer::AWaitVrise),
            Call::Arm(OtgTimer::AWaitBcon, DEFAULT_A_WAIT_BCON)
        ]
    );
    assert!(!fsm.timers().is_armed(OtgTimer::AWaitVrise));
}

#[test]
fn rise_timeout_drops_vbus_and_returns_to_idle() {
    let mut fsm = a_idle();
    set(&mut fsm, Signal::ABusReq, true);
    fsm.port_mut().clear();

    assert_eq!(expire(&mut fsm, OtgTimer::AWaitVrise), OtgState::AIdle);
    assert_eq!(fsm.port().calls.as_slice(), [Call::Vbus(false)]);
    assert!(!fsm.signals().a_bus_req);
    assert!(fsm.timers().armed().next().is_none());
}

#[test]
fn connect_timeout_drops_vbus_once_and_returns_to_idle() {
    let mut fsm = a_idle();
    set(&mut fsm, Signal::ABusReq, true);
    set(&mut fsm, Signal::AVbusVld, true);
    fsm.port_mut().clear();

    assert_eq!(expire(&mut fsm, OtgTimer::AWaitBcon), OtgState::AIdle);
    assert_eq!(fsm.port().count(Call::Vbus(false)), 1);
    assert_eq!(fsm.port().count(Call::Vbus(true)), 0);
    assert!(!fsm.signals().a_bus_req);
    assert!(fsm.timers().armed().next().is_none());
}

#[test]
fn hnp_enabled_peripheral_becomes_host_after_resume() {
    let mut fsm = support::b_peripheral();
    fsm.gadget_hnp_enabled();
    fsm.set_signal(Signal::BBusReq, true);
    fsm.port_mut().clear();

    assert_eq!(set(&mut fsm, Signal::BBusResume, true), OtgState::BHost);

    let calls = fsm.port().calls.as_slice();
    let gadget_stop = calls.iter().position(|call| *call == Call::Gadget(false));
    let host_start = calls.iter().position(|call| *call == Call::Host(true));
    assert!(gadget_stop.is_some());
    assert!(host_start > gadget_stop);
    assert_eq!(fsm.protocol(), Protocol::Host);
}

#[test]
fn peripheral_without_hnp_ignores_resume() {
    let mut fsm = support::b_peripheral();
    fsm.set_signal(Signal::BBusReq, true);

    assert_eq!(set(&mut fsm, Signal::BBusResume, true), OtgState::BPeripheral);
    assert_eq!(fsm.protocol(), Protocol::Gadget);
}

#[test]
fn repeated_run_makes_no_calls() {
    let mut fsm = a_idle();
    set(&mut fsm, Signal::ABusReq, true);
    fsm.port_mut().clear();

    let summary = fsm.run().expect("idle run");
    assert_eq!(summary.transitions, 0);
    assert!(!fsm.set_signal(Signal::ABusReq, true));
    fsm.run().expect("idle run");
    assert!(fsm.port().calls.is_empty());
}

#[test]
fn contradictory_session_signals_hit_pass_bound() {
    let mut fsm = engine(RecordingPort::default());
    fsm.set_signal(Signal::BSessVld, true);
    fsm.set_signal(Signal::BSessEnd, true);

    let error = fsm.run().expect_err("b_sess_vld with b_sess_end cycles");
    assert_eq!(
        error,
        FsmError::Unconverged {
            state: OtgState::Undefined,
            passes: DEFAULT_MAX_PASSES,
        }
    );
    assert_eq!(fsm.state(), OtgState::Undefined);
    assert!(matches!(
        fsm.trace().latest().map(|record| record.event),
        Some(TraceEvent::Unconverged)
    ));

    // Once the inputs agree the next event settles normally.
    assert_eq!(set(&mut fsm, Signal::BSessEnd, false), OtgState::BPeripheral);
}

#[test]
fn contradictory_inputs_leave_the_bus_alone() {
    let mut fsm = engine(RecordingPort::default());
    assert_eq!(settle(&mut fsm), OtgState::BIdle);
    fsm.port_mut().clear();
    fsm.set_signal(Signal::BSessVld, true);
    fsm.set_signal(Signal::BSessEnd, true);

    assert!(matches!(
        fsm.run(),
        Err(FsmError::Unconverged {
            state: OtgState::BIdle,
            ..
        })
    ));
    assert_eq!(fsm.state(), OtgState::BIdle);
    assert!(fsm.port().calls.is_empty());
    assert_eq!(fsm.protocol(), Protocol::Undefined);
    assert!(!fsm.outputs().get(OutputKind::LocalConnect));
    assert!(fsm.timers().is_armed(OtgTimer::BSe0Srp));
}

#[test]
fn expiry_of_cancelled_timer_is_stale() {
    let mut fsm = a_idle();
    set(&mut fsm, Signal::ABusReq, true);
    set(&mut fsm, Signal::AVbusVld, true);
    set(&mut fsm, Signal::BConn, true);
    assert_eq!(fsm.state(), OtgState::AHost);

    assert!(!fsm.timer_expired(OtgTimer::AWaitBcon));
    assert!(!fsm.is_dirty());
    assert_eq!(
        fsm.trace().latest().map(|record| record.event),
        Some(TraceEvent::StaleTimeout(OtgTimer::AWaitBcon))
    );
    assert_eq!(settle(&mut fsm), OtgState::AHost);
}

#[test]
fn id_change_crosses_sides_through_idle() {
    let mut fsm = support::b_peripheral();
    fsm.set_id(IdPin::A);
    assert_eq!(settle(&mut fsm), OtgState::AIdle);
    assert_eq!(fsm.protocol(), Protocol::Undefined);
    assert!(!fsm.outputs().get(OutputKind::LocalConnect));
}

#[test]
fn failed_session_request_gives_up_after_one_pulse() {
    let mut fsm = engine(RecordingPort::default());
    settle(&mut fsm);
    fsm.set_signal(Signal::BSessEnd, true);
    fsm.set_signal(Signal::BBusReq, true);
    assert_eq!(expire(&mut fsm, OtgTimer::BSe0Srp), OtgState::BSrpInit);
    assert_eq!(fsm.port().count(Call::Pulse), 1);
    assert_eq!(fsm.port().count(Call::Charge(true)), 1);

    assert_eq!(expire(&mut fsm, OtgTimer::BSrpFail), OtgState::BIdle);
    assert!(fsm.signals().b_srp_done());
    assert!(!fsm.signals().b_bus_req);
    assert_eq!(fsm.port().count(Call::Pulse), 1);
}

#[test]
fn vbus_error_waits_for_acknowledgement() {
    let mut fsm = a_idle();
    set(&mut fsm, Signal::ABusReq, true);
    set(&mut fsm, Signal::AVbusVld, true);
    set(&mut fsm, Signal::BConn, true);

    assert_eq!(set(&mut fsm, Signal::AVbusVld, false), OtgState::AVbusErr);
    assert!(!fsm.outputs().get(OutputKind::DriveVbus));

    fsm.set_signal(Signal::BConn, false);
    assert_eq!(set(&mut fsm, Signal::AClrErr, true), OtgState::AIdle);
    assert!(!fsm.signals().a_clr_err);
}

#[test]
fn detach_during_session_request_releases_charge() {
    let mut fsm = engine(RecordingPort::default());
    settle(&mut fsm);
    fsm.set_signal(Signal::BSessEnd, true);
    fsm.set_signal(Signal::BBusReq, true);
    fsm.port_mut().clear();
    assert_eq!(expire(&mut fsm, OtgTimer::BSe0Srp), OtgState::BSrpInit);

    let port = fsm.detach();
    assert_eq!(
        port.calls.as_slice(),
        [
            Call::Pulse,
            Call::Charge(true),
            Call::Arm(OtgTimer::BSrpFail, DEFAULT_B_SRP_FAIL),
            Call::Cancel(OtgTimer::BSrpFail),
            Call::Charge(false),
        ]
    );
}
