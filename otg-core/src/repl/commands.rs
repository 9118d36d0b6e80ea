//! REPL command dispatcher.
//!
//! Engine commands (`set`, `id`, `expire`, `hnp`, `run`) are applied through
//! [`EngineControl`] and followed by a run. `wait`, `timeout`, `status`,
//! `trace` and `help` are handed back to the front-end, which owns the clock
//! and the output sink.

use core::fmt;
use core::time::Duration;

use crate::fsm::{FsmError, OtgFsm, RunSummary};
use crate::port::OtgPort;
use crate::signals::{IdPin, Signal};
use crate::timers::OtgTimer;

use super::grammar::{self, Command};

/// Engine operations the REPL drives.
pub trait EngineControl {
    fn set_signal(&mut self, signal: Signal, value: bool) -> bool;
    fn set_id(&mut self, id: IdPin) -> bool;
    fn timer_expired(&mut self, timer: OtgTimer) -> bool;
    fn gadget_hnp_enabled(&mut self);
    fn timeout(&self, timer: OtgTimer) -> Duration;
    fn set_timeout(&mut self, timer: OtgTimer, duration: Duration);
    fn run(&mut self) -> Result<RunSummary, FsmError>;
}

impl<P> EngineControl for OtgFsm<P>
where
    P: OtgPort,
{
    fn set_signal(&mut self, signal: Signal, value: bool) -> bool {
        OtgFsm::set_signal(self, signal, value)
    }

    fn set_id(&mut self, id: IdPin) -> bool {
        OtgFsm::set_id(self, id)
    }

    fn timer_expired(&mut self, timer: OtgTimer) -> bool {
        OtgFsm::timer_expired(self, timer)
    }

    fn gadget_hnp_enabled(&mut self) {
        OtgFsm::gadget_hnp_enabled(self);
    }

    fn timeout(&self, timer: OtgTimer) -> Duration {
        self.config().timers.duration(timer)
    }

    fn set_timeout(&mut self, timer: OtgTimer, duration: Duration) {
        OtgFsm::set_timeout(self, timer, duration);
    }

    fn run(&mut self) -> Result<RunSummary, FsmError> {
        OtgFsm::run(self)
    }
}

/// Command execution successes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome<'a> {
    /// An engine command was applied and the engine was run.
    Applied(RunAck),
    /// The front-end should advance its clock by this much.
    Wait(Duration),
    /// Current duration of `timer`, after any change.
    Timeout {
        timer: OtgTimer,
        duration: Duration,
        changed: bool,
    },
    Status,
    Trace,
    Help(Option<&'a str>),
}

/// Result of an engine command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunAck {
    /// Whether the input changed engine state. Repeated levels and stale
    /// expiries report `false`.
    pub accepted: bool,
    pub summary: RunSummary,
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandError<'a> {
    Parse(grammar::ParseError<'a>),
    Engine(FsmError),
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => error.fmt(f),
            CommandError::Engine(error) => error.fmt(f),
        }
    }
}

impl<'a> From<grammar::ParseError<'a>> for CommandError<'a> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl From<FsmError> for CommandError<'_> {
    fn from(error: FsmError) -> Self {
        Self::Engine(error)
    }
}

/// Parses REPL lines and applies them to an engine.
pub struct CommandExecutor<E> {
    engine: E,
}

impl<E> CommandExecutor<E> {
    pub const fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_inner(self) -> E {
        self.engine
    }
}

impl<E> CommandExecutor<E>
where
    E: EngineControl,
{
    /// Parses and executes a REPL command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Parse`] for malformed lines and
    /// [`CommandError::Engine`] when the run after an engine command does
    /// not converge.
    pub fn execute<'a>(&mut self, line: &'a str) -> Result<CommandOutcome<'a>, CommandError<'a>> {
        let command = grammar::parse(line)?;
        self.dispatch(command)
    }

    fn dispatch<'a>(&mut self, command: Command<'a>) -> Result<CommandOutcome<'a>, CommandError<'a>> {
        let accepted = match command {
            Command::Set { signal, level } => self.engine.set_signal(signal, level),
            Command::Id(id) => self.engine.set_id(id),
            Command::Expire(timer) => self.engine.timer_expired(timer),
            Command::Hnp => {
                self.engine.gadget_hnp_enabled();
                true
            }
            Command::Run => true,
            Command::Wait(duration) => return Ok(CommandOutcome::Wait(duration)),
            Command::Timeout { timer, duration } => {
                let changed = duration.is_some_and(|value| value != self.engine.timeout(timer));
                if let Some(value) = duration {
                    self.engine.set_timeout(timer, value);
                }
                return Ok(CommandOutcome::Timeout {
                    timer,
                    duration: self.engine.timeout(timer),
                    changed,
                });
            }
            Command::Status => return Ok(CommandOutcome::Status),
            Command::Trace => return Ok(CommandOutcome::Trace),
            Command::Help(help) => return Ok(CommandOutcome::Help(help.topic)),
        };

        let summary = self.engine.run()?;
        Ok(CommandOutcome::Applied(RunAck { accepted, summary }))
    }
}
