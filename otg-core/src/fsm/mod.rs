//! OTG negotiation engine.
//!
//! [`OtgFsm`] owns the signal bundle of one dual-role port together with the
//! applied output levels, the role tag, and the armed timer set. Callers feed
//! signal changes and timer expiries, then call [`OtgFsm::run`] to move the
//! state machine to its next fixed point. Every hardware side effect goes
//! through the injected [`OtgPort`].
//!
//! The engine is not reentrant. Firmware wraps it in a single lock shared by
//! the interrupt-side signal reporters and the timer callbacks.

mod table;

use core::fmt;

use heapless::Vec;

use crate::outputs::{OutputKind, OutputLatch, OutputLevels, Protocol};
use crate::port::{OtgPort, PortError};
use crate::signals::{IdPin, Signal, SignalSet};
use crate::telemetry::{TraceDetail, TraceEvent, TraceRecorder};
use crate::timers::{OtgTimer, TimerBank, TimerConfig, TimerToken};

/// Number of trace records retained by the engine.
pub const TRACE_CAPACITY: usize = 64;

/// Collaborator errors kept per [`RunSummary`].
pub const MAX_DIAGNOSTICS: usize = 8;

/// Default bound on transitions taken by a single [`OtgFsm::run`] call.
pub const DEFAULT_MAX_PASSES: usize = OtgState::COUNT;

/// Which half of the state table a state belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Side {
    Undefined,
    A,
    B,
}

/// OTG states.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtgState {
    #[default]
    Undefined,
    AIdle,
    AWaitVrise,
    AWaitBcon,
    AHost,
    ASuspend,
    APeripheral,
    AWaitVfall,
    AVbusErr,
    BIdle,
    BSrpInit,
    BPeripheral,
    BHost,
}

impl OtgState {
    pub const COUNT: usize = 13;

    pub const ALL: [OtgState; Self::COUNT] = [
        OtgState::Undefined,
        OtgState::AIdle,
        OtgState::AWaitVrise,
        OtgState::AWaitBcon,
        OtgState::AHost,
        OtgState::ASuspend,
        OtgState::APeripheral,
        OtgState::AWaitVfall,
        OtgState::AVbusErr,
        OtgState::BIdle,
        OtgState::BSrpInit,
        OtgState::BPeripheral,
        OtgState::BHost,
    ];

    #[must_use]
    pub const fn as_index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < Self::COUNT {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    #[must_use]
    pub const fn side(self) -> Side {
        match self {
            OtgState::Undefined => Side::Undefined,
            OtgState::AIdle
            | OtgState::AWaitVrise
            | OtgState::AWaitBcon
            | OtgState::AHost
            | OtgState::ASuspend
            | OtgState::APeripheral
            | OtgState::AWaitVfall
            | OtgState::AVbusErr => Side::A,
            OtgState::BIdle | OtgState::BSrpInit | OtgState::BPeripheral | OtgState::BHost => {
                Side::B
            }
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OtgState::Undefined => "undefined",
            OtgState::AIdle => "a_idle",
            OtgState::AWaitVrise => "a_wait_vrise",
            OtgState::AWaitBcon => "a_wait_bcon",
            OtgState::AHost => "a_host",
            OtgState::ASuspend => "a_suspend",
            OtgState::APeripheral => "a_peripheral",
            OtgState::AWaitVfall => "a_wait_vfall",
            OtgState::AVbusErr => "a_vbus_err",
            OtgState::BIdle => "b_idle",
            OtgState::BSrpInit => "b_srp_init",
            OtgState::BPeripheral => "b_peripheral",
            OtgState::BHost => "b_host",
        }
    }
}

impl fmt::Display for OtgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FsmConfig {
    pub timers: TimerConfig,
    /// Transitions allowed per `run()` before the inputs are declared
    /// contradictory.
    pub max_passes: usize,
}

impl FsmConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timers: TimerConfig::new(),
            max_passes: DEFAULT_MAX_PASSES,
        }
    }

    #[must_use]
    pub const fn with_timers(mut self, timers: TimerConfig) -> Self {
        self.timers = timers;
        self
    }

    #[must_use]
    pub const fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors returned by [`OtgFsm::run`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsmError {
    /// The inputs kept the table cycling past the pass bound. The engine stays
    /// in `state` and waits for the next event.
    Unconverged { state: OtgState, passes: usize },
    /// A collaborator rejected an action.
    Collaborator(PortError),
}

impl fmt::Display for FsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsmError::Unconverged { state, passes } => {
                write!(f, "no fixed point after {passes} passes (stopped in {state})")
            }
            FsmError::Collaborator(error) => error.fmt(f),
        }
    }
}

impl From<PortError> for FsmError {
    fn from(error: PortError) -> Self {
        FsmError::Collaborator(error)
    }
}

/// Outcome of one [`OtgFsm::run`] call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunSummary {
    /// State the call started from.
    pub initial: OtgState,
    /// State the call settled in.
    pub state: OtgState,
    /// Number of transitions taken.
    pub transitions: usize,
    /// Non-fatal collaborator errors, oldest first.
    pub diagnostics: Vec<PortError, MAX_DIAGNOSTICS>,
    /// Errors that did not fit in `diagnostics`.
    pub dropped_diagnostics: usize,
}

impl RunSummary {
    const fn new(initial: OtgState) -> Self {
        Self {
            initial,
            state: initial,
            transitions: 0,
            diagnostics: Vec::new(),
            dropped_diagnostics: 0,
        }
    }

    fn push(&mut self, error: PortError) {
        if self.diagnostics.push(error).is_err() {
            self.dropped_diagnostics = self.dropped_diagnostics.saturating_add(1);
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty() && self.dropped_diagnostics == 0
    }

    #[must_use]
    pub fn first_error(&self) -> Option<PortError> {
        self.diagnostics.first().copied()
    }

    /// Converts the first collaborator error into an [`FsmError`].
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::Collaborator`] when any collaborator call failed.
    pub fn into_result(self) -> Result<OtgState, FsmError> {
        match self.first_error() {
            Some(error) => Err(FsmError::Collaborator(error)),
            None => Ok(self.state),
        }
    }
}

/// Negotiation engine for one dual-role port.
pub struct OtgFsm<P> {
    port: P,
    config: FsmConfig,
    state: OtgState,
    signals: SignalSet,
    outputs: OutputLatch,
    protocol: Protocol,
    timers: TimerBank,
    trace: TraceRecorder<TRACE_CAPACITY>,
    dirty: bool,
}

impl<P> OtgFsm<P>
where
    P: OtgPort,
{
    /// Creates an engine in [`OtgState::Undefined`]. The first [`run`](Self::run)
    /// selects a side from the ID pin.
    pub fn new(port: P, config: FsmConfig) -> Self {
        Self {
            port,
            config,
            state: OtgState::Undefined,
            signals: SignalSet::new(),
            outputs: OutputLatch::new(),
            protocol: Protocol::Undefined,
            timers: TimerBank::new(),
            trace: TraceRecorder::new(),
            dirty: true,
        }
    }

    pub const fn state(&self) -> OtgState {
        self.state
    }

    pub const fn signals(&self) -> &SignalSet {
        &self.signals
    }

    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub const fn outputs(&self) -> &OutputLatch {
        &self.outputs
    }

    pub const fn timers(&self) -> &TimerBank {
        &self.timers
    }

    pub const fn config(&self) -> &FsmConfig {
        &self.config
    }

    pub const fn trace(&self) -> &TraceRecorder<TRACE_CAPACITY> {
        &self.trace
    }

    pub const fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Whether a signal changed since the last [`run`](Self::run).
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Changes the duration used the next time `timer` is armed.
    pub fn set_timeout(&mut self, timer: OtgTimer, duration: core::time::Duration) {
        self.config.timers.set(timer, duration);
    }

    /// Records a signal change. Returns `true` when the value changed.
    pub fn set_signal(&mut self, signal: Signal, value: bool) -> bool {
        let changed = self.signals.set(signal, value);
        self.dirty |= changed;
        changed
    }

    /// Records the ID pin level. Returns `true` when it changed.
    pub fn set_id(&mut self, id: IdPin) -> bool {
        let changed = self.signals.id != id;
        self.signals.id = id;
        self.dirty |= changed;
        changed
    }

    /// Called by the gadget stack once the host enabled HNP on this device.
    pub fn gadget_hnp_enabled(&mut self) {
        if !self.signals.b_hnp_enable {
            self.signals.b_hnp_enable = true;
            self.dirty = true;
        }
    }

    /// Delivers an expiry for whatever arm of `timer` is pending. Returns
    /// `false` when the channel is idle, in which case the expiry is ignored.
    ///
    /// Platform timer callbacks should use [`timer_fired`](Self::timer_fired),
    /// which also rejects the expiry of a superseded arm.
    pub fn timer_expired(&mut self, timer: OtgTimer) -> bool {
        match self.timers.current(timer) {
            Some(token) => self.timer_fired(token),
            None => {
                self.stale_expiry(timer);
                false
            }
        }
    }

    /// Delivers the expiry of the arm `token` was issued for. Returns `false`
    /// when that arm has since been cancelled or replaced.
    pub fn timer_fired(&mut self, token: TimerToken) -> bool {
        if !self.timers.disarm_token(token) {
            self.stale_expiry(token.timer);
            return false;
        }

        self.signals.set_timeout(token.timer, true);
        self.dirty = true;
        self.trace
            .record(TraceEvent::TimerExpired(token.timer), TraceDetail::None);
        true
    }

    /// Evaluates the decision table until no rule fires.
    ///
    /// Returns immediately without side effects when nothing changed since
    /// the previous call. The transition path is worked out on the signals
    /// alone before any collaborator is called. Collaborator failures do not
    /// stop evaluation; they are reported in [`RunSummary::diagnostics`] and
    /// retried by the next call that follows a signal change.
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::Unconverged`] when more than
    /// [`FsmConfig::max_passes`] transitions would be needed. Nothing is
    /// applied in that case and the engine stays in its current state.
    pub fn run(&mut self) -> Result<RunSummary, FsmError> {
        let mut summary = RunSummary::new(self.state);
        if !self.dirty {
            return Ok(summary);
        }
        self.dirty = false;
        self.trace.begin_run();

        let max_passes = self.config.max_passes;
        let (target, passes) = match table::plan(self.state, &self.signals, max_passes) {
            Ok(plan) => plan,
            Err(cycling) => {
                log::warn!(
                    "otg: inputs keep {} cycling through {cycling} past {max_passes} passes",
                    self.state
                );
                self.trace.record(
                    TraceEvent::Unconverged,
                    TraceDetail::Passes(u8::try_from(max_passes).unwrap_or(u8::MAX)),
                );
                return Err(FsmError::Unconverged {
                    state: self.state,
                    passes: max_passes,
                });
            }
        };

        self.settle(self.state, &mut summary);

        while let Some(rule) = table::select(self.state, &self.signals) {
            let from = self.state;
            self.leave(from, &mut summary);
            table::advance(&mut self.signals, rule);
            self.state = rule.to;
            log::debug!("otg: {from} -> {}", rule.to);
            self.trace.record(
                TraceEvent::StateEntered(rule.to),
                TraceDetail::Transition { from },
            );
            self.enter(rule.to, &mut summary);
        }
        debug_assert_eq!(self.state, target);

        summary.state = self.state;
        summary.transitions = passes;
        Ok(summary)
    }

    /// Drives `kind` to `on`, calling the transceiver only when the level
    /// differs from the last applied one. Returns whether the transceiver was
    /// called.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Unsupported`] whenever no handler drives `kind`,
    /// including when the level is already in place. Otherwise propagates
    /// the transceiver error; the applied level is left unchanged.
    pub fn apply_output(&mut self, kind: OutputKind, on: bool) -> Result<bool, PortError> {
        if !self.port.has_output(kind) {
            let error = PortError::Unsupported(kind.capability());
            self.report_failure(error);
            return Err(error);
        }
        if self.outputs.get(kind) == on {
            return Ok(false);
        }

        let result = match kind {
            OutputKind::DriveVbus => self.port.drive_vbus(on),
            OutputKind::LocalConnect => self.port.local_connect(on),
            OutputKind::LocalSof => self.port.local_sof(on),
        };
        if let Err(error) = result {
            self.report_failure(error);
            return Err(error);
        }

        self.outputs.latch(kind, on);
        let event = if on {
            TraceEvent::OutputOn(kind)
        } else {
            TraceEvent::OutputOff(kind)
        };
        self.trace.record(event, TraceDetail::None);
        Ok(true)
    }

    /// Starts or stops the host stack through the role tag.
    ///
    /// Starting stops a running gadget stack first. Stopping is a no-op
    /// unless the host role is current. The next run that follows a signal
    /// change puts back the role its state calls for.
    ///
    /// # Errors
    ///
    /// Propagates the controller error; the role tag keeps the old role when
    /// its stack could not be stopped.
    pub fn start_host(&mut self, on: bool) -> Result<(), PortError> {
        self.request_role(Protocol::Host, on)
    }

    /// Starts or stops the gadget stack through the role tag. See
    /// [`start_host`](Self::start_host).
    ///
    /// # Errors
    ///
    /// Propagates the controller error.
    pub fn start_gadget(&mut self, on: bool) -> Result<(), PortError> {
        self.request_role(Protocol::Gadget, on)
    }

    /// Releases the port: leaves the current state, cancels armed timers,
    /// deasserts every output and stops the running stack.
    pub fn detach(mut self) -> P {
        let mut summary = RunSummary::new(self.state);
        self.leave(self.state, &mut summary);
        for timer in OtgTimer::ALL {
            self.cancel_timer(timer);
        }
        for (kind, on) in OutputLevels::OFF.ordered() {
            if let Err(error) = self.refresh_output(kind, on) {
                log::warn!("otg: detach left {kind} asserted: {error}");
            }
        }
        if let Err(error) = self.switch_protocol(Protocol::Undefined) {
            log::warn!("otg: detach could not stop {} stack: {error}", self.protocol);
        }
        self.port
    }

    fn stale_expiry(&mut self, timer: OtgTimer) {
        log::trace!("otg: stale {timer} expiry in {}", self.state);
        self.trace
            .record(TraceEvent::StaleTimeout(timer), TraceDetail::None);
    }

    // Levels already in place are left alone, with or without a handler.
    fn refresh_output(&mut self, kind: OutputKind, on: bool) -> Result<(), PortError> {
        if self.outputs.get(kind) == on {
            return Ok(());
        }
        self.apply_output(kind, on).map(drop)
    }

    fn settle(&mut self, state: OtgState, summary: &mut RunSummary) {
        let profile = table::profile(state);
        for (kind, on) in profile.outputs.ordered() {
            if let Err(error) = self.refresh_output(kind, on) {
                summary.push(error);
            }
        }
        if let Err(error) = self.switch_protocol(profile.protocol) {
            summary.push(error);
        }
    }

    fn enter(&mut self, state: OtgState, summary: &mut RunSummary) {
        self.settle(state, summary);

        match state {
            OtgState::BIdle => self.charge_vbus(false, summary),
            OtgState::BSrpInit => {
                match self.port.start_pulse() {
                    Ok(()) => {
                        self.trace.record(TraceEvent::SrpPulse, TraceDetail::None);
                    }
                    Err(error) => {
                        self.report_failure(error);
                        summary.push(error);
                    }
                }
                self.charge_vbus(true, summary);
            }
            _ => {}
        }

        if let Some(timer) = table::profile(state).timer {
            self.arm_timer(timer);
        }
    }

    fn leave(&mut self, state: OtgState, summary: &mut RunSummary) {
        if let Some(timer) = table::profile(state).timer {
            self.cancel_timer(timer);
        }
        if state == OtgState::BSrpInit {
            self.charge_vbus(false, summary);
        }
    }

    fn request_role(&mut self, role: Protocol, on: bool) -> Result<(), PortError> {
        if on {
            self.switch_protocol(role)
        } else if self.protocol == role {
            self.switch_protocol(Protocol::Undefined)
        } else {
            Ok(())
        }
    }

    // Stops the running stack before starting the other one and leaves the
    // tag on the old role if the stop fails, so both never run together.
    fn switch_protocol(&mut self, protocol: Protocol) -> Result<(), PortError> {
        if self.protocol == protocol {
            return Ok(());
        }

        match self.protocol {
            Protocol::Host => self.host_stack(false)?,
            Protocol::Gadget => self.gadget_stack(false)?,
            Protocol::Undefined => {}
        }
        self.protocol = Protocol::Undefined;

        match protocol {
            Protocol::Host => self.host_stack(true)?,
            Protocol::Gadget => self.gadget_stack(true)?,
            Protocol::Undefined => {}
        }
        self.protocol = protocol;
        self.trace
            .record(TraceEvent::ProtocolSwitched(protocol), TraceDetail::None);
        Ok(())
    }

    fn host_stack(&mut self, on: bool) -> Result<(), PortError> {
        self.port
            .start_host(on)
            .inspect_err(|error| self.report_failure(*error))
    }

    fn gadget_stack(&mut self, on: bool) -> Result<(), PortError> {
        self.port
            .start_gadget(on)
            .inspect_err(|error| self.report_failure(*error))
    }

    fn charge_vbus(&mut self, on: bool, summary: &mut RunSummary) {
        match self.port.charge_vbus(on) {
            Ok(()) => {
                self.trace
                    .record(TraceEvent::ChargeVbus(on), TraceDetail::None);
            }
            Err(error) => {
                self.report_failure(error);
                summary.push(error);
            }
        }
    }

    fn arm_timer(&mut self, timer: OtgTimer) {
        let token = self.timers.arm(timer);
        self.signals.set_timeout(timer, false);
        self.port.arm(token, self.config.timers.duration(timer));
        self.trace
            .record(TraceEvent::TimerArmed(timer), TraceDetail::None);
    }

    fn cancel_timer(&mut self, timer: OtgTimer) {
        self.signals.set_timeout(timer, false);
        if self.timers.disarm(timer) {
            self.port.cancel(timer);
            self.trace
                .record(TraceEvent::TimerCancelled(timer), TraceDetail::None);
        }
    }

    fn report_failure(&mut self, error: PortError) {
        log::warn!("otg: {error} in {}", self.state);
        self.trace.record(
            TraceEvent::CollaboratorFailed(error.capability()),
            TraceDetail::Failure(error),
        );
    }
}
