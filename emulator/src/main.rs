mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;
use std::time::Duration;

use crossterm::style::{Stylize, style};
use crossterm::tty::IsTty;
use otg_core::timers::OtgTimer;
use session::{Session, SessionConfig, TranscriptProfile};

const USAGE: &str = "Usage: otg-emulator [--profile <a-device|b-device|hnp>] [--timeout <timer>=<ms>]...";

fn main() -> io::Result<()> {
    env_logger::init();

    let config = parse_args(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let styled = stdout.is_tty();
    let mut writer = stdout.lock();
    let mut session = Session::new(config)?;
    let mut line = String::new();

    writeln!(
        writer,
        "USB OTG Emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for response in session.start()? {
        write_response(&mut writer, &response, styled)?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            write_response(&mut writer, &response, styled)?;
        }
    }

    Ok(())
}

fn write_response<W: Write>(writer: &mut W, response: &str, styled: bool) -> io::Result<()> {
    if !styled {
        return writeln!(writer, "{response}");
    }
    if response.starts_with("ERR") {
        writeln!(writer, "{}", style(response).red())
    } else if response.starts_with("WARN") {
        writeln!(writer, "{}", style(response).yellow())
    } else if response.starts_with("OK") {
        writeln!(writer, "{}", style(response).green())
    } else {
        writeln!(writer, "{response}")
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<SessionConfig, String> {
    let mut config = SessionConfig::new(TranscriptProfile::ADevice);
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            config.profile = TranscriptProfile::from_tag(value)?;
        } else if arg == "--profile" {
            let value = args.next().ok_or("Expected value after --profile")?;
            config.profile = TranscriptProfile::from_tag(&value)?;
        } else if let Some(value) = arg.strip_prefix("--timeout=") {
            apply_timeout(&mut config, value)?;
        } else if arg == "--timeout" {
            let value = args.next().ok_or("Expected <timer>=<ms> after --timeout")?;
            apply_timeout(&mut config, &value)?;
        } else {
            config.profile = TranscriptProfile::from_tag(&arg)?;
        }
    }

    Ok(config)
}

fn apply_timeout(config: &mut SessionConfig, value: &str) -> Result<(), String> {
    let (name, millis) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected <timer>=<ms>, got `{value}`"))?;
    let timer = OtgTimer::from_name(name).ok_or_else(|| format!("Unknown timer `{name}`"))?;
    let millis: u64 = millis
        .parse()
        .map_err(|err| format!("Invalid duration for {timer}: {err}"))?;
    config.timers.set(timer, Duration::from_millis(millis));
    Ok(())
}
