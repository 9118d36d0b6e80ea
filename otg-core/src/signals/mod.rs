//! Boolean signal bundle evaluated by the negotiation engine.
//!
//! Signal names follow the OTG state machine vocabulary (`a_bus_req`,
//! `b_sess_vld`, ...) so that transcripts read the same as bus analyser
//! captures. Only [`Signal`] values and the ID pin are writable from outside
//! the engine; internal signals and timeout flags are maintained by
//! [`crate::fsm::OtgFsm`] itself.

use core::fmt;

use crate::timers::{OtgTimer, TIMER_COUNT};

/// Connector ID pin state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IdPin {
    /// ID grounded: an A-plug is inserted and the port defaults to host.
    A,
    /// ID floating: a B-plug (or nothing) is inserted.
    #[default]
    B,
}

impl IdPin {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("a") {
            Some(IdPin::A)
        } else if name.eq_ignore_ascii_case("b") {
            Some(IdPin::B)
        } else {
            None
        }
    }
}

impl fmt::Display for IdPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdPin::A => "a",
            IdPin::B => "b",
        })
    }
}

/// Who is allowed to write a [`Signal`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SignalClass {
    /// Reported by the transceiver or board driver.
    Input,
    /// Advisory request from policy software.
    Informative,
}

/// Number of externally writable boolean signals.
pub const SIGNAL_COUNT: usize = 17;

/// Externally writable boolean signals.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Signal {
    ABusResume,
    ABusSuspend,
    AConn,
    ASessVld,
    ASrpDet,
    AVbusVld,
    BBusResume,
    BBusSuspend,
    BConn,
    BSe0Srp,
    BSessEnd,
    BSessVld,
    ABusDrop,
    ABusReq,
    AClrErr,
    ASuspendReq,
    BBusReq,
}

impl Signal {
    pub const ALL: [Signal; SIGNAL_COUNT] = [
        Signal::ABusResume,
        Signal::ABusSuspend,
        Signal::AConn,
        Signal::ASessVld,
        Signal::ASrpDet,
        Signal::AVbusVld,
        Signal::BBusResume,
        Signal::BBusSuspend,
        Signal::BConn,
        Signal::BSe0Srp,
        Signal::BSessEnd,
        Signal::BSessVld,
        Signal::ABusDrop,
        Signal::ABusReq,
        Signal::AClrErr,
        Signal::ASuspendReq,
        Signal::BBusReq,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Signal::ABusResume => "a_bus_resume",
            Signal::ABusSuspend => "a_bus_suspend",
            Signal::AConn => "a_conn",
            Signal::ASessVld => "a_sess_vld",
            Signal::ASrpDet => "a_srp_det",
            Signal::AVbusVld => "a_vbus_vld",
            Signal::BBusResume => "b_bus_resume",
            Signal::BBusSuspend => "b_bus_suspend",
            Signal::BConn => "b_conn",
            Signal::BSe0Srp => "b_se0_srp",
            Signal::BSessEnd => "b_sess_end",
            Signal::BSessVld => "b_sess_vld",
            Signal::ABusDrop => "a_bus_drop",
            Signal::ABusReq => "a_bus_req",
            Signal::AClrErr => "a_clr_err",
            Signal::ASuspendReq => "a_suspend_req",
            Signal::BBusReq => "b_bus_req",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|signal| signal.name().eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub const fn class(self) -> SignalClass {
        match self {
            Signal::ABusDrop
            | Signal::ABusReq
            | Signal::AClrErr
            | Signal::ASuspendReq
            | Signal::BBusReq => SignalClass::Informative,
            _ => SignalClass::Input,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The complete signal bundle for one dual-role port.
#[allow(clippy::struct_excessive_bools)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SignalSet {
    pub id: IdPin,

    pub a_bus_resume: bool,
    pub a_bus_suspend: bool,
    pub a_conn: bool,
    pub a_sess_vld: bool,
    pub a_srp_det: bool,
    pub a_vbus_vld: bool,
    pub b_bus_resume: bool,
    pub b_bus_suspend: bool,
    pub b_conn: bool,
    pub b_se0_srp: bool,
    pub b_sess_end: bool,
    pub b_sess_vld: bool,

    pub a_bus_drop: bool,
    pub a_bus_req: bool,
    pub a_clr_err: bool,
    pub a_suspend_req: bool,
    pub b_bus_req: bool,

    /// A-host has granted HNP to the attached B-device.
    pub(crate) a_set_b_hnp_en: bool,
    /// The last session request went unanswered.
    pub(crate) b_srp_done: bool,
    /// The host enabled HNP on this B-device.
    pub(crate) b_hnp_enable: bool,

    pub(crate) timeouts: [bool; TIMER_COUNT],
}

impl SignalSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            id: IdPin::B,
            a_bus_resume: false,
            a_bus_suspend: false,
            a_conn: false,
            a_sess_vld: false,
            a_srp_det: false,
            a_vbus_vld: false,
            b_bus_resume: false,
            b_bus_suspend: false,
            b_conn: false,
            b_se0_srp: false,
            b_sess_end: false,
            b_sess_vld: false,
            a_bus_drop: false,
            a_bus_req: false,
            a_clr_err: false,
            a_suspend_req: false,
            b_bus_req: false,
            a_set_b_hnp_en: false,
            b_srp_done: false,
            b_hnp_enable: false,
            timeouts: [false; TIMER_COUNT],
        }
    }

    #[must_use]
    pub const fn get(&self, signal: Signal) -> bool {
        match signal {
            Signal::ABusResume => self.a_bus_resume,
            Signal::ABusSuspend => self.a_bus_suspend,
            Signal::AConn => self.a_conn,
            Signal::ASessVld => self.a_sess_vld,
            Signal::ASrpDet => self.a_srp_det,
            Signal::AVbusVld => self.a_vbus_vld,
            Signal::BBusResume => self.b_bus_resume,
            Signal::BBusSuspend => self.b_bus_suspend,
            Signal::BConn => self.b_conn,
            Signal::BSe0Srp => self.b_se0_srp,
            Signal::BSessEnd => self.b_sess_end,
            Signal::BSessVld => self.b_sess_vld,
            Signal::ABusDrop => self.a_bus_drop,
            Signal::ABusReq => self.a_bus_req,
            Signal::AClrErr => self.a_clr_err,
            Signal::ASuspendReq => self.a_suspend_req,
            Signal::BBusReq => self.b_bus_req,
        }
    }

    /// Writes `signal`, returning `true` when the stored value changed.
    pub fn set(&mut self, signal: Signal, value: bool) -> bool {
        let slot = match signal {
            Signal::ABusResume => &mut self.a_bus_resume,
            Signal::ABusSuspend => &mut self.a_bus_suspend,
            Signal::AConn => &mut self.a_conn,
            Signal::ASessVld => &mut self.a_sess_vld,
            Signal::ASrpDet => &mut self.a_srp_det,
            Signal::AVbusVld => &mut self.a_vbus_vld,
            Signal::BBusResume => &mut self.b_bus_resume,
            Signal::BBusSuspend => &mut self.b_bus_suspend,
            Signal::BConn => &mut self.b_conn,
            Signal::BSe0Srp => &mut self.b_se0_srp,
            Signal::BSessEnd => &mut self.b_sess_end,
            Signal::BSessVld => &mut self.b_sess_vld,
            Signal::ABusDrop => &mut self.a_bus_drop,
            Signal::ABusReq => &mut self.a_bus_req,
            Signal::AClrErr => &mut self.a_clr_err,
            Signal::ASuspendReq => &mut self.a_suspend_req,
            Signal::BBusReq => &mut self.b_bus_req,
        };
        core::mem::replace(slot, value) != value
    }

    #[must_use]
    pub const fn a_set_b_hnp_en(&self) -> bool {
        self.a_set_b_hnp_en
    }

    #[must_use]
    pub const fn b_srp_done(&self) -> bool {
        self.b_srp_done
    }

    #[must_use]
    pub const fn b_hnp_enable(&self) -> bool {
        self.b_hnp_enable
    }

    /// Whether the expiry of `timer` is pending consumption.
    #[must_use]
    pub const fn timed_out(&self, timer: OtgTimer) -> bool {
        self.timeouts[timer.as_index()]
    }

    pub(crate) fn set_timeout(&mut self, timer: OtgTimer, value: bool) {
        self.timeouts[timer.as_index()] = value;
    }

    /// Iterates over the writable signals currently asserted.
    pub fn asserted(&self) -> impl Iterator<Item = Signal> + '_ {
        Signal::ALL
            .iter()
            .copied()
            .filter(|signal| self.get(*signal))
    }
}
