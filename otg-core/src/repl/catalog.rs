//! Command catalog shared by the parser, the completion engine and `help`.
//!
//! Each command is a keyword followed by a fixed list of typed arguments.
//! Optional arguments may only trail the required ones.

use crate::signals::{SIGNAL_COUNT, Signal};
use crate::timers::{OtgTimer, TIMER_COUNT};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Set,
    Id,
    Expire,
    Wait,
    Timeout,
    Hnp,
    Run,
    Status,
    Trace,
    Help,
}

/// Value shape expected at an argument position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Signal,
    Level,
    IdSide,
    Timer,
    Duration,
    Topic,
}

impl ArgKind {
    /// Literal values offered by completion for this position.
    #[must_use]
    pub const fn candidates(self) -> &'static [&'static str] {
        match self {
            ArgKind::Signal => &SIGNAL_NAMES,
            ArgKind::Level => &LEVEL_NAMES,
            ArgKind::IdSide => &ID_NAMES,
            ArgKind::Timer => &TIMER_NAMES,
            ArgKind::Duration => &[],
            ArgKind::Topic => &COMMAND_NAMES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArgSpec {
    pub label: &'static str,
    pub kind: ArgKind,
    pub optional: bool,
}

impl ArgSpec {
    const fn required(label: &'static str, kind: ArgKind) -> Self {
        Self {
            label,
            kind,
            optional: false,
        }
    }

    const fn optional(label: &'static str, kind: ArgKind) -> Self {
        Self {
            label,
            kind,
            optional: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub args: &'static [ArgSpec],
    pub usage: &'static str,
    pub summary: &'static str,
}

const LEVEL_NAMES: [&str; 2] = ["on", "off"];
const ID_NAMES: [&str; 2] = ["a", "b"];

const SIGNAL_NAMES: [&str; SIGNAL_COUNT] = {
    let mut names = [""; SIGNAL_COUNT];
    let mut index = 0;
    while index < SIGNAL_COUNT {
        names[index] = Signal::ALL[index].name();
        index += 1;
    }
    names
};

const TIMER_NAMES: [&str; TIMER_COUNT] = {
    let mut names = [""; TIMER_COUNT];
    let mut index = 0;
    while index < TIMER_COUNT {
        names[index] = OtgTimer::ALL[index].name();
        index += 1;
    }
    names
};

const SET_ARGS: [ArgSpec; 2] = [
    ArgSpec::required("signal", ArgKind::Signal),
    ArgSpec::required("level", ArgKind::Level),
];
const ID_ARGS: [ArgSpec; 1] = [ArgSpec::required("side", ArgKind::IdSide)];
const EXPIRE_ARGS: [ArgSpec; 1] = [ArgSpec::required("timer", ArgKind::Timer)];
const WAIT_ARGS: [ArgSpec; 1] = [ArgSpec::required("duration", ArgKind::Duration)];
const TIMEOUT_ARGS: [ArgSpec; 2] = [
    ArgSpec::required("timer", ArgKind::Timer),
    ArgSpec::optional("duration", ArgKind::Duration),
];
const HELP_ARGS: [ArgSpec; 1] = [ArgSpec::optional("topic", ArgKind::Topic)];

const COMMAND_COUNT: usize = 10;

const COMMANDS: [CommandSpec; COMMAND_COUNT] = [
    CommandSpec {
        name: "set",
        tag: CommandTag::Set,
        args: &SET_ARGS,
        usage: "set <signal> <on|off>",
        summary: "report a bus signal or policy request",
    },
    CommandSpec {
        name: "id",
        tag: CommandTag::Id,
        args: &ID_ARGS,
        usage: "id <a|b>",
        summary: "report the connector ID pin",
    },
    CommandSpec {
        name: "expire",
        tag: CommandTag::Expire,
        args: &EXPIRE_ARGS,
        usage: "expire <timer>",
        summary: "deliver a timer expiry immediately",
    },
    CommandSpec {
        name: "wait",
        tag: CommandTag::Wait,
        args: &WAIT_ARGS,
        usage: "wait <duration>",
        summary: "advance the clock and fire due timers",
    },
    CommandSpec {
        name: "timeout",
        tag: CommandTag::Timeout,
        args: &TIMEOUT_ARGS,
        usage: "timeout <timer> [duration]",
        summary: "show or change a timer duration",
    },
    CommandSpec {
        name: "hnp",
        tag: CommandTag::Hnp,
        args: &[],
        usage: "hnp",
        summary: "report that the host enabled HNP on this B-device",
    },
    CommandSpec {
        name: "run",
        tag: CommandTag::Run,
        args: &[],
        usage: "run",
        summary: "re-evaluate the state machine",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        args: &[],
        usage: "status",
        summary: "show state, outputs, signals and timers",
    },
    CommandSpec {
        name: "trace",
        tag: CommandTag::Trace,
        args: &[],
        usage: "trace",
        summary: "show recent engine events",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        args: &HELP_ARGS,
        usage: "help [command]",
        summary: "list commands or describe one",
    },
];

const COMMAND_NAMES: [&str; COMMAND_COUNT] = {
    let mut names = [""; COMMAND_COUNT];
    let mut index = 0;
    while index < COMMAND_COUNT {
        names[index] = COMMANDS[index].name;
        index += 1;
    }
    names
};

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Command keywords in catalog order.
#[must_use]
pub const fn command_names() -> &'static [&'static str] {
    &COMMAND_NAMES
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

/// Parses a level literal.
#[must_use]
pub fn level_from_name(name: &str) -> Option<bool> {
    const ON: [&str; 3] = ["on", "1", "true"];
    const OFF: [&str; 3] = ["off", "0", "false"];

    if ON.iter().any(|value| value.eq_ignore_ascii_case(name)) {
        Some(true)
    } else if OFF.iter().any(|value| value.eq_ignore_ascii_case(name)) {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_arguments_trail_required_ones() {
        for command in commands() {
            let first_optional = command.args.iter().position(|arg| arg.optional);
            if let Some(start) = first_optional {
                assert!(
                    command.args[start..].iter().all(|arg| arg.optional),
                    "{} has a required argument after an optional one",
                    command.name
                );
            }
        }
    }

    #[test]
    fn candidate_tables_follow_enums() {
        assert_eq!(ArgKind::Signal.candidates()[0], "a_bus_resume");
        assert_eq!(ArgKind::Timer.candidates().len(), TIMER_COUNT);
        assert_eq!(ArgKind::Topic.candidates(), command_names());
    }

    #[test]
    fn find_is_case_insensitive() {
        assert_eq!(find("STATUS").map(|spec| spec.tag), Some(CommandTag::Status));
        assert!(find("reboot").is_none());
    }

    #[test]
    fn levels_accept_numeric_and_words() {
        assert_eq!(level_from_name("1"), Some(true));
        assert_eq!(level_from_name("Off"), Some(false));
        assert_eq!(level_from_name("maybe"), None);
    }
}
