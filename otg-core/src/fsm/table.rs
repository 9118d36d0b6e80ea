//! Ordered decision table and per-state entry profiles.
//!
//! Rules are grouped by role side. Within a side they are scanned top to
//! bottom and the first rule whose `from` matches the current state and whose
//! guard holds wins.

use crate::outputs::{OutputLevels, Protocol};
use crate::signals::{IdPin, SignalSet};
use crate::timers::OtgTimer;

use super::{OtgState, Side};

pub(crate) type Guard = fn(&SignalSet) -> bool;

/// Bookkeeping applied between leaving one state and entering the next.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Effect {
    None,
    /// The A-device session ended; its bus request is consumed.
    DropBusRequest,
    /// A-host grants HNP to the attached B-device.
    GrantHnp,
    /// The A-device takes the bus back.
    RevokeHnp,
    /// A VBUS error was acknowledged.
    ClearError,
    /// The session request went unanswered.
    SrpFailed,
}

impl Effect {
    fn apply(self, signals: &mut SignalSet) {
        match self {
            Effect::None => {}
            Effect::DropBusRequest => signals.a_bus_req = false,
            Effect::GrantHnp => signals.a_set_b_hnp_en = true,
            Effect::RevokeHnp => signals.a_set_b_hnp_en = false,
            Effect::ClearError => {
                signals.a_clr_err = false;
                signals.a_bus_req = false;
            }
            Effect::SrpFailed => {
                signals.b_srp_done = true;
                signals.b_bus_req = false;
            }
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct Rule {
    pub from: OtgState,
    pub guard: Guard,
    pub effect: Effect,
    pub to: OtgState,
}

impl Rule {
    const fn new(from: OtgState, guard: Guard, effect: Effect, to: OtgState) -> Self {
        Self {
            from,
            guard,
            effect,
            to,
        }
    }
}

use Effect as E;
use OtgState as S;

const UNDEFINED_RULES: [Rule; 2] = [
    Rule::new(S::Undefined, |s| s.id == IdPin::A, E::None, S::AIdle),
    Rule::new(S::Undefined, |s| s.id == IdPin::B, E::None, S::BIdle),
];

const A_DEVICE_RULES: [Rule; 23] = [
    Rule::new(S::AIdle, |s| s.id == IdPin::B, E::None, S::BIdle),
    Rule::new(
        S::AIdle,
        |s| !s.a_bus_drop && (s.a_bus_req || s.a_srp_det),
        E::None,
        S::AWaitVrise,
    ),
    Rule::new(S::AWaitVrise, |s| s.a_vbus_vld, E::None, S::AWaitBcon),
    Rule::new(
        S::AWaitVrise,
        |s| s.id == IdPin::B || s.a_bus_drop || s.timed_out(OtgTimer::AWaitVrise),
        E::DropBusRequest,
        S::AWaitVfall,
    ),
    Rule::new(S::AWaitBcon, |s| !s.a_vbus_vld, E::None, S::AVbusErr),
    Rule::new(S::AWaitBcon, |s| s.b_conn, E::None, S::AHost),
    Rule::new(
        S::AWaitBcon,
        |s| s.id == IdPin::B || s.a_bus_drop || s.timed_out(OtgTimer::AWaitBcon),
        E::DropBusRequest,
        S::AWaitVfall,
    ),
    Rule::new(
        S::AHost,
        |s| s.id == IdPin::B || s.a_bus_drop,
        E::DropBusRequest,
        S::AWaitVfall,
    ),
    Rule::new(
        S::AHost,
        |s| {
            s.timed_out(OtgTimer::AWaitEnum) && s.b_bus_req && (!s.a_bus_req || s.a_suspend_req)
        },
        E::GrantHnp,
        S::ASuspend,
    ),
    Rule::new(
        S::AHost,
        |s| s.timed_out(OtgTimer::AWaitEnum) && s.a_suspend_req,
        E::None,
        S::ASuspend,
    ),
    Rule::new(S::AHost, |s| !s.b_conn, E::None, S::AWaitBcon),
    Rule::new(S::AHost, |s| !s.a_vbus_vld, E::None, S::AVbusErr),
    Rule::new(
        S::ASuspend,
        |s| s.id == IdPin::B || s.a_bus_drop,
        E::DropBusRequest,
        S::AWaitVfall,
    ),
    Rule::new(
        S::ASuspend,
        |s| !s.b_conn && s.a_set_b_hnp_en,
        E::None,
        S::APeripheral,
    ),
    Rule::new(S::ASuspend, |s| !s.b_conn, E::None, S::AWaitBcon),
    Rule::new(
        S::ASuspend,
        |s| s.b_bus_resume || (s.a_bus_req && !s.a_suspend_req),
        E::RevokeHnp,
        S::AHost,
    ),
    Rule::new(
        S::ASuspend,
        |s| s.timed_out(OtgTimer::AAidlBdis),
        E::DropBusRequest,
        S::AWaitVfall,
    ),
    Rule::new(S::ASuspend, |s| !s.a_vbus_vld, E::None, S::AVbusErr),
    Rule::new(
        S::APeripheral,
        |s| s.id == IdPin::B || s.a_bus_drop,
        E::DropBusRequest,
        S::AWaitVfall,
    ),
    Rule::new(
        S::APeripheral,
        |s| s.b_bus_suspend || s.timed_out(OtgTimer::AAidlBdis),
        E::RevokeHnp,
        S::AWaitBcon,
    ),
    Rule::new(S::APeripheral, |s| !s.a_vbus_vld, E::None, S::AVbusErr),
    Rule::new(
        S::AVbusErr,
        |s| s.id == IdPin::B || s.a_bus_drop || s.a_clr_err,
        E::ClearError,
        S::AWaitVfall,
    ),
    Rule::new(
        S::AWaitVfall,
        |s| s.id == IdPin::B || s.a_bus_req || (!s.a_sess_vld && !s.b_conn),
        E::None,
        S::AIdle,
    ),
];

const B_DEVICE_RULES: [Rule; 10] = [
    Rule::new(S::BIdle, |s| s.id == IdPin::A, E::None, S::AIdle),
    Rule::new(S::BIdle, |s| s.b_sess_vld, E::None, S::BPeripheral),
    Rule::new(
        S::BIdle,
        |s| s.b_bus_req && s.b_sess_end && (s.b_se0_srp || s.timed_out(OtgTimer::BSe0Srp)),
        E::None,
        S::BSrpInit,
    ),
    Rule::new(S::BSrpInit, |s| s.id == IdPin::A, E::None, S::BIdle),
    Rule::new(S::BSrpInit, |s| s.b_sess_vld, E::None, S::BPeripheral),
    Rule::new(
        S::BSrpInit,
        |s| s.timed_out(OtgTimer::BSrpFail),
        E::SrpFailed,
        S::BIdle,
    ),
    Rule::new(
        S::BPeripheral,
        |s| s.id == IdPin::A || !s.b_sess_vld || s.b_sess_end,
        E::None,
        S::BIdle,
    ),
    Rule::new(
        S::BPeripheral,
        |s| s.b_hnp_enable && s.b_bus_req && (s.b_bus_resume || s.a_bus_suspend),
        E::None,
        S::BHost,
    ),
    Rule::new(
        S::BHost,
        |s| s.id == IdPin::A || !s.b_sess_vld,
        E::None,
        S::BIdle,
    ),
    Rule::new(
        S::BHost,
        |s| s.a_bus_resume || !s.b_bus_req || (s.timed_out(OtgTimer::BAse0Brst) && !s.a_conn),
        E::None,
        S::BPeripheral,
    ),
];

fn rules_for(state: OtgState) -> &'static [Rule] {
    match state.side() {
        Side::Undefined => &UNDEFINED_RULES,
        Side::A => &A_DEVICE_RULES,
        Side::B => &B_DEVICE_RULES,
    }
}

/// Returns the first rule that fires from `state`, if any.
pub(crate) fn select(state: OtgState, signals: &SignalSet) -> Option<&'static Rule> {
    rules_for(state)
        .iter()
        .filter(|rule| rule.from == state)
        .find(|rule| (rule.guard)(signals))
}

/// Applies the signal bookkeeping of taking `rule`: the timeout flags of the
/// left and entered states are cleared, the effect runs, and the entered
/// state resets its own flags. Touches nothing but `signals`.
pub(crate) fn advance(signals: &mut SignalSet, rule: &Rule) {
    if let Some(timer) = profile(rule.from).timer {
        signals.set_timeout(timer, false);
    }
    if rule.from == S::ASuspend {
        signals.a_suspend_req = false;
    }

    rule.effect.apply(signals);

    match rule.to {
        S::AIdle | S::AWaitVfall => signals.a_set_b_hnp_en = false,
        S::BIdle => signals.b_hnp_enable = false,
        S::BSrpInit => signals.b_srp_done = false,
        _ => {}
    }
    if let Some(timer) = profile(rule.to).timer {
        signals.set_timeout(timer, false);
    }
}

/// Walks the table from `state` on a copy of `signals`.
///
/// Returns the fixed point and the number of transitions to reach it, or
/// `Err` with the state the walk was in once `max_passes` ran out.
pub(crate) fn plan(
    state: OtgState,
    signals: &SignalSet,
    max_passes: usize,
) -> Result<(OtgState, usize), OtgState> {
    let mut signals = *signals;
    let mut state = state;
    let mut passes = 0;
    while let Some(rule) = select(state, &signals) {
        if passes >= max_passes {
            return Err(state);
        }
        passes += 1;
        advance(&mut signals, rule);
        state = rule.to;
    }
    Ok((state, passes))
}

/// Outputs, role and timer a state establishes on entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct StateProfile {
    pub outputs: OutputLevels,
    pub protocol: Protocol,
    pub timer: Option<OtgTimer>,
}

impl StateProfile {
    const fn new(outputs: OutputLevels, protocol: Protocol, timer: Option<OtgTimer>) -> Self {
        Self {
            outputs,
            protocol,
            timer,
        }
    }
}

const VBUS_ONLY: OutputLevels = OutputLevels::new(true, false, false);
const HOSTING: OutputLevels = OutputLevels::new(true, false, true);

pub(crate) const fn profile(state: OtgState) -> StateProfile {
    use Protocol::{Gadget, Host, Undefined};

    match state {
        S::Undefined | S::AIdle | S::AWaitVfall | S::AVbusErr => {
            StateProfile::new(OutputLevels::OFF, Undefined, None)
        }
        S::AWaitVrise => StateProfile::new(VBUS_ONLY, Undefined, Some(OtgTimer::AWaitVrise)),
        S::AWaitBcon => StateProfile::new(VBUS_ONLY, Undefined, Some(OtgTimer::AWaitBcon)),
        S::AHost => StateProfile::new(HOSTING, Host, Some(OtgTimer::AWaitEnum)),
        S::ASuspend => StateProfile::new(VBUS_ONLY, Undefined, Some(OtgTimer::AAidlBdis)),
        S::APeripheral => StateProfile::new(
            OutputLevels::new(true, true, false),
            Gadget,
            Some(OtgTimer::AAidlBdis),
        ),
        S::BIdle => StateProfile::new(OutputLevels::OFF, Undefined, Some(OtgTimer::BSe0Srp)),
        S::BSrpInit => StateProfile::new(OutputLevels::OFF, Undefined, Some(OtgTimer::BSrpFail)),
        S::BPeripheral => StateProfile::new(OutputLevels::new(false, true, false), Gadget, None),
        S::BHost => StateProfile::new(HOSTING, Host, Some(OtgTimer::BAse0Brst)),
    }
}
