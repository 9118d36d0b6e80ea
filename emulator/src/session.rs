use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::Path;
use std::time::Duration;

use otg_core::fsm::{FsmConfig, FsmError, OtgFsm, RunSummary};
use otg_core::outputs::OutputKind;
use otg_core::port::{GadgetController, HostController, PortError, TimerService, Transceiver};
use otg_core::repl::catalog;
use otg_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome, RunAck};
use otg_core::repl::completion::{CompletionEngine, Replacement};
use otg_core::repl::status::{StatusFormatter, StatusSnapshot};
use otg_core::signals::IdPin;
use otg_core::telemetry::TraceDetail;
use otg_core::timers::{OtgTimer, TIMER_COUNT, TimerConfig, TimerToken};

/// Upper bound on timer expiries delivered by one `wait`.
const MAX_EXPIRIES_PER_WAIT: usize = 64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    ADevice,
    BDevice,
    Hnp,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::ADevice => "transcripts/emulator-a-device.log",
            TranscriptProfile::BDevice => "transcripts/emulator-b-device.log",
            TranscriptProfile::Hnp => "transcripts/emulator-hnp.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::ADevice => "USB OTG emulator A-device transcript",
            TranscriptProfile::BDevice => "USB OTG emulator B-device transcript",
            TranscriptProfile::Hnp => "USB OTG emulator host negotiation transcript",
        }
    }

    /// ID pin level the session starts with.
    pub fn id(self) -> IdPin {
        match self {
            TranscriptProfile::ADevice | TranscriptProfile::Hnp => IdPin::A,
            TranscriptProfile::BDevice => IdPin::B,
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("a-device") {
            Ok(Self::ADevice)
        } else if tag.eq_ignore_ascii_case("b-device") {
            Ok(Self::BDevice)
        } else if tag.eq_ignore_ascii_case("hnp") {
            Ok(Self::Hnp)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

/// Startup options for a [`Session`].
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub profile: TranscriptProfile,
    pub timers: TimerConfig,
}

impl SessionConfig {
    pub fn new(profile: TranscriptProfile) -> Self {
        Self {
            profile,
            timers: TimerConfig::default(),
        }
    }
}

#[derive(Debug)]
pub enum CompletionResponse {
    NoMatches,
    Applied { replacement: Replacement },
    Suggestions { options: Vec<&'static str> },
}

/// Port model that narrates every collaborator call and keeps timer
/// deadlines on a virtual clock.
#[derive(Default)]
pub struct SimulatedPort {
    now: Duration,
    deadlines: [Option<(TimerToken, Duration)>; TIMER_COUNT],
    events: Vec<String>,
}

impl SimulatedPort {
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn remaining(&self, timer: OtgTimer) -> Option<Duration> {
        self.deadlines[timer.as_index()].map(|(_, deadline)| deadline.saturating_sub(self.now))
    }

    /// Earliest pending deadline at or before `until`.
    fn next_due(&self, until: Duration) -> Option<(TimerToken, Duration)> {
        self.deadlines
            .iter()
            .flatten()
            .copied()
            .filter(|(_, at)| *at <= until)
            .min_by_key(|(token, at)| (*at, token.timer.as_index()))
    }

    fn fire(&mut self, token: TimerToken, at: Duration) {
        self.now = self.now.max(at);
        self.deadlines[token.timer.as_index()] = None;
    }

    fn advance_to(&mut self, at: Duration) {
        self.now = self.now.max(at);
    }

    fn take_events(&mut self) -> Vec<String> {
        mem::take(&mut self.events)
    }

    fn narrate(&mut self, event: String) -> Result<(), PortError> {
        self.events.push(event);
        Ok(())
    }
}

fn level(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

impl Transceiver for SimulatedPort {
    fn has_output(&self, _: OutputKind) -> bool {
        true
    }

    fn drive_vbus(&mut self, on: bool) -> Result<(), PortError> {
        self.narrate(format!("drv_vbus={}", level(on)))
    }

    fn local_connect(&mut self, on: bool) -> Result<(), PortError> {
        self.narrate(format!("loc_conn={}", level(on)))
    }

    fn local_sof(&mut self, on: bool) -> Result<(), PortError> {
        self.narrate(format!("loc_sof={}", level(on)))
    }

    fn charge_vbus(&mut self, on: bool) -> Result<(), PortError> {
        self.narrate(format!("chrg_vbus={}", level(on)))
    }

    fn start_pulse(&mut self) -> Result<(), PortError> {
        self.narrate("srp pulse".to_string())
    }
}

impl TimerService for SimulatedPort {
    fn arm(&mut self, token: TimerToken, timeout: Duration) {
        self.deadlines[token.timer.as_index()] = Some((token, self.now + timeout));
        self.events.push(format!(
            "arm {} {}",
            token.timer,
            format_duration_short(timeout)
        ));
    }

    fn cancel(&mut self, timer: OtgTimer) {
        if self.deadlines[timer.as_index()].take().is_some() {
            self.events.push(format!("cancel {timer}"));
        }
    }
}

impl HostController for SimulatedPort {
    fn start_host(&mut self, on: bool) -> Result<(), PortError> {
        let verb = if on { "started" } else { "stopped" };
        self.narrate(format!("host stack {verb}"))
    }
}

impl GadgetController for SimulatedPort {
    fn start_gadget(&mut self, on: bool) -> Result<(), PortError> {
        let verb = if on { "started" } else { "stopped" };
        self.narrate(format!("gadget stack {verb}"))
    }
}

type Engine = OtgFsm<SimulatedPort>;

pub struct Session {
    executor: CommandExecutor<Engine>,
    transcript: TranscriptLogger,
    completion: CompletionEngine,
}

impl Session {
    /// Opens the profile's transcript file and builds the engine.
    pub fn new(config: SessionConfig) -> io::Result<Self> {
        let writer = TranscriptLogger::open(config.profile.log_path())?;
        Self::with_writer(config, writer)
    }

    pub fn with_writer(config: SessionConfig, writer: Box<dyn Write>) -> io::Result<Self> {
        let mut transcript = TranscriptLogger {
            writer: BufWriter::new(writer),
        };
        transcript.write_header(config.profile)?;

        let mut fsm = OtgFsm::new(
            SimulatedPort::default(),
            FsmConfig::new().with_timers(config.timers),
        );
        fsm.set_id(config.profile.id());

        Ok(Self {
            executor: CommandExecutor::new(fsm),
            transcript,
            completion: CompletionEngine::new(),
        })
    }

    pub fn engine(&self) -> &Engine {
        self.executor.engine()
    }

    fn now(&self) -> Duration {
        self.engine().port().now()
    }

    /// Settles the engine on the profile's ID level.
    pub fn start(&mut self) -> io::Result<Vec<String>> {
        let elapsed = self.now();
        let mut lines = Vec::new();
        let result = self.executor.engine_mut().run();
        self.describe_run(true, result, &mut lines);
        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.now();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let lines = match self.executor.execute(trimmed) {
            Ok(CommandOutcome::Applied(RunAck { accepted, summary })) => {
                let mut lines = Vec::new();
                self.describe_run(accepted, Ok(summary), &mut lines);
                lines
            }
            Ok(CommandOutcome::Wait(duration)) => self.advance(duration),
            Ok(CommandOutcome::Timeout {
                timer,
                duration,
                changed,
            }) => {
                let verb = if changed { "set" } else { "is" };
                vec![format!(
                    "OK timeout {timer} {verb} {}",
                    format_duration_short(duration)
                )]
            }
            Ok(CommandOutcome::Status) => self.status_lines(),
            Ok(CommandOutcome::Trace) => self.trace_lines(),
            Ok(CommandOutcome::Help(topic)) => help_lines(topic),
            Err(CommandError::Parse(err)) => vec![format!("ERR syntax {err}")],
            Err(CommandError::Engine(err)) => vec![format!("ERR engine {err}")],
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    pub fn handle_completion(
        &mut self,
        buffer: &str,
        cursor: usize,
    ) -> io::Result<CompletionResponse> {
        let cursor = cursor.min(buffer.len());
        let (prefix, suffix) = buffer.split_at(cursor);
        let elapsed = self.now();
        self.transcript
            .log_completion_request(elapsed, prefix, suffix, cursor)?;

        let result = self.completion.complete(buffer, cursor);
        if result.options.is_empty() {
            self.transcript.log_completion_none(elapsed)?;
            return Ok(CompletionResponse::NoMatches);
        }

        let options: Vec<&'static str> = result.options.iter().copied().collect();
        match (options.as_slice(), result.replacement) {
            ([candidate], Some(replacement)) => {
                self.transcript
                    .log_completion_applied(elapsed, candidate, Some(&replacement))?;
                Ok(CompletionResponse::Applied { replacement })
            }
            ([candidate], None) => {
                self.transcript
                    .log_completion_applied(elapsed, candidate, None)?;
                Ok(CompletionResponse::NoMatches)
            }
            _ => {
                self.transcript.log_completion_options(elapsed, &options)?;
                Ok(CompletionResponse::Suggestions { options })
            }
        }
    }

    // Delivers every deadline that falls inside the window, oldest first,
    // running the engine after each one.
    fn advance(&mut self, duration: Duration) -> Vec<String> {
        let target = self.now() + duration;
        let mut lines = Vec::new();

        for _ in 0..MAX_EXPIRIES_PER_WAIT {
            let Some((token, at)) = self.engine().port().next_due(target) else {
                break;
            };
            let fsm = self.executor.engine_mut();
            fsm.port_mut().fire(token, at);
            let accepted = fsm.timer_fired(token);
            lines.push(format!("+{}ms {} expired", at.as_millis(), token.timer));
            let result = fsm.run();
            self.describe_run(accepted, result, &mut lines);
        }

        if self.engine().port().next_due(target).is_some() {
            log::warn!("emulator: more than {MAX_EXPIRIES_PER_WAIT} expiries in one wait");
            lines.push(format!(
                "WARN stopped after {MAX_EXPIRIES_PER_WAIT} expiries"
            ));
        } else {
            self.executor.engine_mut().port_mut().advance_to(target);
        }
        lines.push(format!("OK clock=+{}ms", self.now().as_millis()));
        lines
    }

    fn describe_run(
        &mut self,
        accepted: bool,
        result: Result<RunSummary, FsmError>,
        lines: &mut Vec<String>,
    ) {
        let events = self.executor.engine_mut().port_mut().take_events();
        lines.extend(events.into_iter().map(|event| format!("  {event}")));

        match result {
            Ok(summary) => {
                let head = if summary.transitions == 0 {
                    let note = if accepted { "" } else { " (no change)" };
                    format!("OK {}{note}", summary.state)
                } else {
                    format!(
                        "OK {} -> {} transitions={}",
                        summary.initial, summary.state, summary.transitions
                    )
                };
                lines.push(head);
                for error in &summary.diagnostics {
                    lines.push(format!("WARN {error}"));
                }
                if summary.dropped_diagnostics > 0 {
                    lines.push(format!(
                        "WARN {} more collaborator errors",
                        summary.dropped_diagnostics
                    ));
                }
            }
            Err(error) => lines.push(format!("ERR engine {error}")),
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let port = self.engine().port();
        let snapshot = StatusSnapshot::capture(self.engine())
            .with_remaining(|timer| port.remaining(timer));
        let formatter = StatusFormatter::new(&snapshot);

        vec![
            render(|line| formatter.write_state_line(line)),
            render(|line| formatter.write_outputs_line(line)),
            render(|line| formatter.write_signals_line(line)),
            render(|line| formatter.write_timers_line(line)),
        ]
    }

    fn trace_lines(&self) -> Vec<String> {
        let trace = self.engine().trace();
        if trace.is_empty() {
            return vec!["trace empty".to_string()];
        }
        trace
            .oldest_first()
            .map(|record| match record.detail {
                TraceDetail::None => {
                    format!("#{} run={} {}", record.id, record.run, record.event)
                }
                detail => format!(
                    "#{} run={} {} ({detail})",
                    record.id, record.run, record.event
                ),
            })
            .collect()
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

// Writing into a `String` cannot fail.
fn render(write: impl FnOnce(&mut String) -> fmt::Result) -> String {
    let mut line = String::new();
    let _ = write(&mut line);
    line
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some(spec) = catalog::find(target) {
                lines.push(format!("{} - {}", spec.usage, spec.summary));
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!(
                    "Available topics: {}",
                    catalog::command_names().join(", ")
                ));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for spec in catalog::commands() {
                lines.push(format!("  {:<28} {}", spec.usage, spec.summary));
            }
            lines.push("Type `help <command>` for a specific command.".to_string());
        }
    }
    lines
}

struct TranscriptLogger {
    writer: BufWriter<Box<dyn Write>>,
}

impl TranscriptLogger {
    fn open(path: &str) -> io::Result<Box<dyn Write>> {
        let path = Path::new(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(file))
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds of simulated time"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }

    fn log_completion_request(
        &mut self,
        elapsed: Duration,
        prefix: &str,
        suffix: &str,
        cursor: usize,
    ) -> io::Result<()> {
        let message = format!("[TAB] prefix={prefix:?} suffix={suffix:?} cursor={cursor}");
        self.append_line(elapsed, TranscriptRole::Host, &message)
    }

    fn log_completion_none(&mut self, elapsed: Duration) -> io::Result<()> {
        self.append_line(elapsed, TranscriptRole::Emulator, "completion: no matches")
    }

    fn log_completion_applied(
        &mut self,
        elapsed: Duration,
        candidate: &str,
        replacement: Option<&Replacement>,
    ) -> io::Result<()> {
        let message = match replacement {
            Some(rep) => format!(
                "completion applied: {candidate} (range={}..{})",
                rep.start, rep.end
            ),
            None => format!("completion candidate: {candidate} (no replacement applied)"),
        };
        self.append_line(elapsed, TranscriptRole::Emulator, &message)
    }

    fn log_completion_options(
        &mut self,
        elapsed: Duration,
        options: &[&'static str],
    ) -> io::Result<()> {
        let summary = format!("completion options ({})", options.len());
        self.append_line(elapsed, TranscriptRole::Emulator, &summary)?;
        for option in options {
            self.append_line(elapsed, TranscriptRole::Emulator, &format!("  {option}"))?;
        }
        Ok(())
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

fn format_duration_short(duration: Duration) -> String {
    if duration.as_secs() == 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use otg_core::fsm::OtgState;

    use super::*;

    fn session(profile: TranscriptProfile) -> Session {
        let mut session = Session::with_writer(SessionConfig::new(profile), Box::new(io::sink()))
            .expect("sink never fails");
        session.start().expect("sink never fails");
        session
    }

    fn command(session: &mut Session, line: &str) -> Vec<String> {
        session.handle_command(line).expect("sink never fails")
    }

    #[test]
    fn a_device_profile_starts_idle() {
        let session = session(TranscriptProfile::ADevice);
        assert_eq!(session.engine().state(), OtgState::AIdle);
    }

    #[test]
    fn bus_request_narrates_vbus_and_timer() {
        let mut session = session(TranscriptProfile::ADevice);
        let lines = command(&mut session, "set a_bus_req on");
        assert_eq!(
            lines,
            [
                "  drv_vbus=on",
                "  arm a_wait_vrise 100ms",
                "OK a_idle -> a_wait_vrise transitions=1",
            ]
        );
    }

    #[test]
    fn wait_fires_connect_timeout() {
        let mut session = session(TranscriptProfile::ADevice);
        command(&mut session, "set a_bus_req on");
        command(&mut session, "set a_vbus_vld on");

        let lines = command(&mut session, "wait 2s");
        assert!(lines.contains(&"+1100ms a_wait_bcon expired".to_string()));
        assert!(lines.contains(&"  drv_vbus=off".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("OK clock=+2000ms"));
        assert_eq!(session.engine().state(), OtgState::AIdle);
    }

    #[test]
    fn wait_short_of_deadline_keeps_state() {
        let mut session = session(TranscriptProfile::ADevice);
        command(&mut session, "set a_bus_req on");
        let lines = command(&mut session, "wait 50ms");
        assert_eq!(lines, ["OK clock=+50ms"]);
        assert_eq!(
            session.engine().port().remaining(OtgTimer::AWaitVrise),
            Some(Duration::from_millis(50))
        );
    }

    #[test]
    fn timeout_change_applies_to_next_arm() {
        let mut session = session(TranscriptProfile::BDevice);
        assert_eq!(
            command(&mut session, "timeout b_srp_fail 250ms"),
            ["OK timeout b_srp_fail set 250ms"]
        );
        command(&mut session, "set b_sess_end on");
        command(&mut session, "set b_bus_req on");
        command(&mut session, "set b_se0_srp on");
        assert_eq!(session.engine().state(), OtgState::BSrpInit);

        command(&mut session, "wait 300ms");
        assert_eq!(session.engine().state(), OtgState::BIdle);
        assert!(session.engine().signals().b_srp_done());
    }

    #[test]
    fn status_reports_remaining_time() {
        let mut session = session(TranscriptProfile::BDevice);
        command(&mut session, "wait 400ms");
        let lines = command(&mut session, "status");
        assert_eq!(lines[0], "state b_idle role=undefined id=b");
        assert_eq!(lines[3], "timers b_se0_srp=1000ms(+600ms)");
    }

    #[test]
    fn repeated_level_reports_no_change() {
        let mut session = session(TranscriptProfile::ADevice);
        assert_eq!(
            command(&mut session, "set a_bus_req off"),
            ["OK a_idle (no change)"]
        );
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut session = session(TranscriptProfile::ADevice);
        let lines = command(&mut session, "set a_bus_req sometimes");
        assert_eq!(lines, ["ERR syntax unknown level `sometimes`"]);
    }

    #[test]
    fn help_describes_one_command() {
        let mut session = session(TranscriptProfile::ADevice);
        assert_eq!(
            command(&mut session, "help expire"),
            ["expire <timer> - deliver a timer expiry immediately"]
        );
        let lines = command(&mut session, "help");
        assert_eq!(lines.len(), catalog::commands().len() + 2);
    }

    #[test]
    fn completion_lists_timers() {
        let mut session = session(TranscriptProfile::ADevice);
        let response = session
            .handle_completion("expire a_wait_", "expire a_wait_".len())
            .expect("sink never fails");
        match response {
            CompletionResponse::Suggestions { options } => {
                assert_eq!(options, ["a_wait_vrise", "a_wait_bcon", "a_wait_enum"]);
            }
            other => panic!("expected suggestions, got {other:?}"),
        }
    }

    #[test]
    fn trace_lists_transitions() {
        let mut session = session(TranscriptProfile::ADevice);
        let lines = command(&mut session, "trace");
        assert!(lines.iter().any(|line| line.contains("enter a_idle")));
    }
}
