//! Operator console served over the gadget's CDC ACM interface.
//!
//! Bytes from the host are fed in one at a time. The console edits the line
//! locally (echo, backspace, tab completion) and runs complete lines through
//! the shared command executor. Output is collected in a [`Response`] that
//! the USB task flushes after every packet.

use core::fmt::{self, Write as _};

use embassy_time::Instant;
use heapless::String;
use otg_core::fsm::{FsmError, RunSummary};
use otg_core::port::Transceiver;
use otg_core::repl::catalog;
use otg_core::repl::commands::{
    CommandError, CommandExecutor, CommandOutcome, EngineControl, RunAck,
};
use otg_core::repl::completion::{CompletionEngine, Replacement};
use otg_core::repl::status::{StatusFormatter, StatusSnapshot};
use otg_core::signals::{IdPin, Signal};
use otg_core::telemetry::TraceDetail;
use otg_core::timers::OtgTimer;
use portable_atomic::{AtomicU32, Ordering};

use super::OtgCell;
use super::port::BoardPort;
use super::timers::core_duration_to_embassy;

pub const MAX_LINE_LEN: usize = 96;
pub const MAX_RESPONSE_LEN: usize = 1536;
pub const PROMPT: &str = "otg> ";

/// Trace records shown by `trace`, newest last.
const MAX_TRACE_LINES: usize = 16;

pub type Response = String<MAX_RESPONSE_LEN>;

/// The engine as seen from the console. Every call takes the engine lock
/// for its own duration only.
pub struct SharedEngine<'c, 'p, T> {
    cell: &'c OtgCell<BoardPort<'p, T>>,
}

impl<'c, 'p, T> SharedEngine<'c, 'p, T> {
    pub const fn new(cell: &'c OtgCell<BoardPort<'p, T>>) -> Self {
        Self { cell }
    }
}

impl<T: Transceiver> SharedEngine<'_, '_, T> {
    /// Captures `status` with time left measured from `now`.
    pub fn status(&self, now: Instant) -> StatusSnapshot {
        self.cell.lock(|fsm| {
            let fsm = fsm.borrow();
            let timers = fsm.port().timers();
            StatusSnapshot::capture(&*fsm).with_remaining(|timer| timers.remaining(timer, now))
        })
    }

    pub fn write_trace<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        self.cell.lock(|fsm| {
            let fsm = fsm.borrow();
            let trace = fsm.trace();
            if trace.is_empty() {
                return out.write_str("trace empty\r\n");
            }
            let skip = trace.len().saturating_sub(MAX_TRACE_LINES);
            for record in trace.oldest_first().skip(skip) {
                write!(out, "#{} run={} {}", record.id, record.run, record.event)?;
                if !matches!(record.detail, TraceDetail::None) {
                    write!(out, " ({})", record.detail)?;
                }
                out.write_str("\r\n")?;
            }
            Ok(())
        })
    }
}

impl<T: Transceiver> EngineControl for SharedEngine<'_, '_, T> {
    fn set_signal(&mut self, signal: Signal, value: bool) -> bool {
        self.cell
            .lock(|fsm| fsm.borrow_mut().set_signal(signal, value))
    }

    fn set_id(&mut self, id: IdPin) -> bool {
        self.cell.lock(|fsm| fsm.borrow_mut().set_id(id))
    }

    fn timer_expired(&mut self, timer: OtgTimer) -> bool {
        self.cell.lock(|fsm| {
            let mut fsm = fsm.borrow_mut();
            fsm.port_mut().timers_mut().cancel(timer);
            fsm.timer_expired(timer)
        })
    }

    fn gadget_hnp_enabled(&mut self) {
        self.cell.lock(|fsm| fsm.borrow_mut().gadget_hnp_enabled());
    }

    fn timeout(&self, timer: OtgTimer) -> core::time::Duration {
        self.cell
            .lock(|fsm| fsm.borrow().config().timers.duration(timer))
    }

    fn set_timeout(&mut self, timer: OtgTimer, duration: core::time::Duration) {
        self.cell
            .lock(|fsm| fsm.borrow_mut().set_timeout(timer, duration));
    }

    fn run(&mut self) -> Result<RunSummary, FsmError> {
        self.cell.lock(|fsm| fsm.borrow_mut().run())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Edit {
    Echo(char),
    Erase,
    Submit,
    Complete,
    Overflow,
    Ignored,
}

/// Single-line editor with the cursor pinned to the end of the line.
#[derive(Default)]
struct LineEditor {
    buffer: String<MAX_LINE_LEN>,
    after_cr: bool,
}

impl LineEditor {
    fn push(&mut self, byte: u8) -> Edit {
        let after_cr = core::mem::replace(&mut self.after_cr, byte == b'\r');
        match byte {
            b'\n' if after_cr => Edit::Ignored,
            b'\r' | b'\n' => Edit::Submit,
            0x08 | 0x7f => {
                if self.buffer.pop().is_some() {
                    Edit::Erase
                } else {
                    Edit::Ignored
                }
            }
            b'\t' => Edit::Complete,
            0x20..=0x7e => {
                let ch = char::from(byte);
                if self.buffer.push(ch).is_ok() {
                    Edit::Echo(ch)
                } else {
                    Edit::Overflow
                }
            }
            _ => Edit::Ignored,
        }
    }

    fn as_str(&self) -> &str {
        self.buffer.as_str()
    }

    fn take(&mut self) -> String<MAX_LINE_LEN> {
        core::mem::take(&mut self.buffer)
    }

    /// Applies a completion. Returns `false` when the result would not fit.
    fn apply(&mut self, replacement: &Replacement) -> bool {
        let mut line: String<MAX_LINE_LEN> = String::new();
        let fits = line.push_str(&self.buffer[..replacement.start]).is_ok()
            && line.push_str(replacement.value).is_ok()
            && (!replacement.append_space || line.push(' ').is_ok())
            && line.push_str(&self.buffer[replacement.end..]).is_ok();
        if fits {
            self.buffer = line;
        }
        fits
    }
}

/// What the USB task should do after flushing the response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reply {
    Ready,
    /// Sleep, then call [`Console::finish_wait`].
    Wait(embassy_time::Duration),
}

pub struct Console<'c, 'p, T> {
    executor: CommandExecutor<SharedEngine<'c, 'p, T>>,
    editor: LineEditor,
    completion: CompletionEngine,
    dropped: &'c AtomicU32,
}

impl<'c, 'p, T: Transceiver> Console<'c, 'p, T> {
    pub fn new(engine: SharedEngine<'c, 'p, T>, dropped: &'c AtomicU32) -> Self {
        Self {
            executor: CommandExecutor::new(engine),
            editor: LineEditor::default(),
            completion: CompletionEngine::new(),
            dropped,
        }
    }

    /// Starts a fresh session after the host opened the port.
    pub fn greet(&mut self, out: &mut Response) {
        self.editor = LineEditor::default();
        let result = out
            .write_str("usb otg console, `help` lists commands\r\n")
            .and_then(|()| out.write_str(PROMPT));
        finish(result, out);
    }

    pub fn feed(&mut self, byte: u8, now: Instant, out: &mut Response) -> Reply {
        let mut reply = Reply::Ready;
        let result = match self.editor.push(byte) {
            Edit::Echo(ch) => out.write_char(ch),
            Edit::Erase => out.write_str("\x08 \x08"),
            Edit::Overflow => out.write_char('\x07'),
            Edit::Ignored => Ok(()),
            Edit::Complete => self.complete(out),
            Edit::Submit => {
                let line = self.editor.take();
                match self.submit(line.trim(), now, out) {
                    Ok(Some(duration)) => {
                        reply = Reply::Wait(core_duration_to_embassy(duration));
                        Ok(())
                    }
                    Ok(None) => out.write_str(PROMPT),
                    Err(error) => Err(error),
                }
            }
        };
        finish(result, out);
        reply
    }

    /// Reports the end of a `wait` and shows the prompt again.
    pub fn finish_wait(&mut self, waited: embassy_time::Duration, out: &mut Response) {
        let result = write!(out, "OK waited {}ms\r\n", waited.as_millis())
            .and_then(|()| out.write_str(PROMPT));
        finish(result, out);
    }

    fn submit(
        &mut self,
        line: &str,
        now: Instant,
        out: &mut Response,
    ) -> Result<Option<core::time::Duration>, fmt::Error> {
        out.write_str("\r\n")?;
        if line.is_empty() {
            return Ok(None);
        }

        match self.executor.execute(line) {
            Ok(CommandOutcome::Applied(RunAck { accepted, summary })) => {
                write_run(out, accepted, &summary)?;
            }
            Ok(CommandOutcome::Wait(duration)) => return Ok(Some(duration)),
            Ok(CommandOutcome::Timeout {
                timer,
                duration,
                changed,
            }) => {
                let verb = if changed { "set" } else { "is" };
                write!(
                    out,
                    "OK timeout {timer} {verb} {}ms\r\n",
                    duration.as_millis()
                )?;
            }
            Ok(CommandOutcome::Status) => self.write_status(now, out)?,
            Ok(CommandOutcome::Trace) => self.executor.engine().write_trace(out)?,
            Ok(CommandOutcome::Help(topic)) => write_help(out, topic)?,
            Err(CommandError::Parse(error)) => write!(out, "ERR syntax {error}\r\n")?,
            Err(CommandError::Engine(error)) => write!(out, "ERR engine {error}\r\n")?,
        }
        Ok(None)
    }

    fn write_status(&self, now: Instant, out: &mut Response) -> fmt::Result {
        let snapshot = self.executor.engine().status(now);
        let formatter = StatusFormatter::new(&snapshot);
        formatter.write_state_line(out)?;
        out.write_str("\r\n")?;
        formatter.write_outputs_line(out)?;
        out.write_str("\r\n")?;
        formatter.write_signals_line(out)?;
        out.write_str("\r\n")?;
        formatter.write_timers_line(out)?;
        out.write_str("\r\n")?;
        write!(
            out,
            "events dropped={}\r\n",
            self.dropped.load(Ordering::Relaxed)
        )
    }

    fn complete(&mut self, out: &mut Response) -> fmt::Result {
        let line = self.editor.as_str();
        let result = self.completion.complete(line, line.len());

        if let Some(replacement) = result.replacement {
            if !self.editor.apply(&replacement) {
                return out.write_char('\x07');
            }
            out.write_char('\r')?;
            out.write_str(PROMPT)?;
            return out.write_str(self.editor.as_str());
        }

        if result.options.len() < 2 {
            return out.write_char('\x07');
        }
        out.write_str("\r\n")?;
        for (index, option) in result.options.iter().enumerate() {
            if index > 0 {
                out.write_str("  ")?;
            }
            out.write_str(option)?;
        }
        out.write_str("\r\n")?;
        out.write_str(PROMPT)?;
        out.write_str(self.editor.as_str())
    }
}

// A response that overflowed is replaced by a short notice.
fn finish(result: fmt::Result, out: &mut Response) {
    if result.is_err() {
        out.clear();
        let _ = out.push_str("\r\nERR response too long\r\n");
        let _ = out.push_str(PROMPT);
    }
}

fn write_run<W: fmt::Write>(out: &mut W, accepted: bool, summary: &RunSummary) -> fmt::Result {
    if summary.transitions == 0 {
        let note = if accepted { "" } else { " (no change)" };
        write!(out, "OK {}{note}\r\n", summary.state)?;
    } else {
        write!(
            out,
            "OK {} -> {} transitions={}\r\n",
            summary.initial, summary.state, summary.transitions
        )?;
    }
    for error in &summary.diagnostics {
        write!(out, "WARN {error}\r\n")?;
    }
    if summary.dropped_diagnostics > 0 {
        write!(
            out,
            "WARN {} more collaborator errors\r\n",
            summary.dropped_diagnostics
        )?;
    }
    Ok(())
}

fn write_help<W: fmt::Write>(out: &mut W, topic: Option<&str>) -> fmt::Result {
    match topic {
        Some(target) => match catalog::find(target) {
            Some(spec) => write!(out, "{} - {}\r\n", spec.usage, spec.summary),
            None => {
                write!(out, "No help available for `{target}`.\r\n")?;
                out.write_str("Available topics:")?;
                for name in catalog::command_names() {
                    write!(out, " {name}")?;
                }
                out.write_str("\r\n")
            }
        },
        None => {
            out.write_str("Available commands:\r\n")?;
            for spec in catalog::commands() {
                write!(out, "  {:<28} {}\r\n", spec.usage, spec.summary)?;
            }
            out.write_str("Type `help <command>` for a specific command.\r\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use embassy_sync::blocking_mutex::Mutex;
    use otg_core::fsm::{FsmConfig, OtgFsm, OtgState};

    use super::*;
    use crate::otg::port::tests::FakeTransceiver;
    use crate::otg::stacks::StackSignals;

    fn type_line<T: Transceiver>(
        console: &mut Console<'_, '_, T>,
        text: &str,
        out: &mut Response,
    ) -> Reply {
        let mut reply = Reply::Ready;
        for byte in text.bytes() {
            reply = console.feed(byte, Instant::from_millis(0), out);
        }
        reply
    }

    fn prompts(out: &Response) -> usize {
        out.matches(PROMPT).count()
    }

    #[test]
    fn engine_command_reports_transition() {
        let stacks = StackSignals::new();
        let cell = Mutex::new(RefCell::new(OtgFsm::new(
            BoardPort::new(FakeTransceiver::default(), &stacks),
            FsmConfig::new(),
        )));
        let dropped = AtomicU32::new(0);
        let mut console = Console::new(SharedEngine::new(&cell), &dropped);
        let mut out = Response::new();

        assert_eq!(type_line(&mut console, "id a\r\n", &mut out), Reply::Ready);
        assert!(out.starts_with("id a\r\n"));
        assert!(out.contains("OK undefined -> a_idle transitions=1\r\n"));
        assert_eq!(prompts(&out), 1);
        assert_eq!(cell.lock(|fsm| fsm.borrow().state()), OtgState::AIdle);
    }

    #[test]
    fn status_shows_pending_timer_and_drop_count() {
        let stacks = StackSignals::new();
        let cell = Mutex::new(RefCell::new(OtgFsm::new(
            BoardPort::new(FakeTransceiver::default(), &stacks),
            FsmConfig::new(),
        )));
        let dropped = AtomicU32::new(3);
        let mut console = Console::new(SharedEngine::new(&cell), &dropped);
        let mut out = Response::new();

        type_line(&mut console, "id a\r", &mut out);
        type_line(&mut console, "set a_bus_req on\r", &mut out);
        assert!(out.contains("OK a_idle -> a_wait_vrise transitions=1"));
        out.clear();

        type_line(&mut console, "status\r", &mut out);
        assert!(out.contains("state a_wait_vrise role=undefined id=a\r\n"));
        assert!(out.contains("outputs drv_vbus=on loc_conn=off loc_sof=off\r\n"));
        assert!(out.contains("timers a_wait_vrise=100ms(+100ms)\r\n"));
        assert!(out.contains("events dropped=3\r\n"));
    }

    #[test]
    fn tab_completes_and_backspace_erases() {
        let stacks = StackSignals::new();
        let cell = Mutex::new(RefCell::new(OtgFsm::new(
            BoardPort::new(FakeTransceiver::default(), &stacks),
            FsmConfig::new(),
        )));
        let dropped = AtomicU32::new(0);
        let mut console = Console::new(SharedEngine::new(&cell), &dropped);
        let mut out = Response::new();

        type_line(&mut console, "sta\t", &mut out);
        assert!(out.ends_with("\rotg> status"));
        out.clear();

        type_line(&mut console, "x\x7f", &mut out);
        assert_eq!(out.as_str(), "x\x08 \x08");
        out.clear();

        type_line(&mut console, "\r", &mut out);
        assert!(out.contains("state undefined role=undefined id=b"));
    }

    #[test]
    fn ambiguous_completion_lists_options() {
        let stacks = StackSignals::new();
        let cell = Mutex::new(RefCell::new(OtgFsm::new(
            BoardPort::new(FakeTransceiver::default(), &stacks),
            FsmConfig::new(),
        )));
        let dropped = AtomicU32::new(0);
        let mut console = Console::new(SharedEngine::new(&cell), &dropped);
        let mut out = Response::new();

        type_line(&mut console, "help t\t", &mut out);
        assert!(out.contains("\r\ntimeout  trace\r\notg> help t"));
    }

    #[test]
    fn wait_is_handed_to_the_caller() {
        let stacks = StackSignals::new();
        let cell = Mutex::new(RefCell::new(OtgFsm::new(
            BoardPort::new(FakeTransceiver::default(), &stacks),
            FsmConfig::new(),
        )));
        let dropped = AtomicU32::new(0);
        let mut console = Console::new(SharedEngine::new(&cell), &dropped);
        let mut out = Response::new();

        let reply = type_line(&mut console, "wait 250ms\r", &mut out);
        assert_eq!(
            reply,
            Reply::Wait(embassy_time::Duration::from_millis(250))
        );
        assert_eq!(prompts(&out), 0);

        console.finish_wait(embassy_time::Duration::from_millis(250), &mut out);
        assert!(out.ends_with("OK waited 250ms\r\notg> "));
    }

    #[test]
    fn syntax_errors_keep_the_session_alive() {
        let stacks = StackSignals::new();
        let cell = Mutex::new(RefCell::new(OtgFsm::new(
            BoardPort::new(FakeTransceiver::default(), &stacks),
            FsmConfig::new(),
        )));
        let dropped = AtomicU32::new(0);
        let mut console = Console::new(SharedEngine::new(&cell), &dropped);
        let mut out = Response::new();

        type_line(&mut console, "set a_bus_reqq on\r", &mut out);
        assert!(out.contains("ERR syntax unknown signal `a_bus_reqq`"));
        assert!(out.ends_with(PROMPT));
    }

    #[test]
    fn console_expire_clears_the_pending_deadline() {
        let stacks = StackSignals::new();
        let cell = Mutex::new(RefCell::new(OtgFsm::new(
            BoardPort::new(FakeTransceiver::default(), &stacks),
            FsmConfig::new(),
        )));
        let dropped = AtomicU32::new(0);
        let mut console = Console::new(SharedEngine::new(&cell), &dropped);
        let mut out = Response::new();

        type_line(&mut console, "id b\r", &mut out);
        assert!(cell.lock(|fsm| fsm.borrow().port().timers().has_requests()));
        type_line(&mut console, "expire b_se0_srp\r", &mut out);
        assert!(!cell.lock(|fsm| fsm.borrow().port().timers().has_requests()));
    }
}
