use std::io;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, SessionConfig, TranscriptProfile};

fn main() -> io::Result<()> {
    env_logger::init();
    record_profile(TranscriptProfile::ADevice)?;
    record_profile(TranscriptProfile::BDevice)?;
    record_profile(TranscriptProfile::Hnp)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(SessionConfig::new(profile))?;
    session.start()?;
    match profile {
        TranscriptProfile::ADevice => record_a_device(&mut session),
        TranscriptProfile::BDevice => record_b_device(&mut session),
        TranscriptProfile::Hnp => record_hnp(&mut session),
    }
}

fn run(session: &mut Session, lines: &[&str]) -> io::Result<()> {
    for line in lines {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}

fn complete(session: &mut Session, buffers: &[&str]) -> io::Result<()> {
    for buffer in buffers {
        session.handle_completion(buffer, buffer.len())?;
    }
    Ok(())
}

fn record_a_device(session: &mut Session) -> io::Result<()> {
    complete(session, &["se", "set a_bus_r", "set a_bus_req ", "exp"])?;
    run(
        session,
        &[
            "status",
            "set a_bus_req on",
            "set a_vbus_vld on",
            "wait 2s",
            "set a_bus_req on",
            "set a_vbus_vld on",
            "set b_conn on",
            "status",
            "set a_vbus_vld off",
            "set a_clr_err on",
            "trace",
        ],
    )
}

fn record_b_device(session: &mut Session) -> io::Result<()> {
    complete(session, &["set b_s", "expire b_", "help t"])?;
    run(
        session,
        &[
            "set b_sess_end on",
            "set b_bus_req on",
            "wait 1s",
            "status",
            "wait 5s",
            "set b_bus_req on",
            "wait 1s",
            "set b_sess_end off",
            "set b_sess_vld on",
            "status",
        ],
    )
}

fn record_hnp(session: &mut Session) -> io::Result<()> {
    complete(session, &["h", "timeout a_"])?;
    run(
        session,
        &[
            "timeout a_aidl_bdis 500ms",
            "set a_bus_req on",
            "set a_vbus_vld on",
            "set b_conn on",
            "set b_bus_req on",
            "set a_bus_req off",
            "wait 250ms",
            "set b_conn off",
            "status",
            "wait 1s",
            "set b_conn on",
            "status",
            "trace",
        ],
    )
}
