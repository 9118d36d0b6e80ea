mod support;

use heapless::String;
use otg_core::fsm::OtgState;
use otg_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome};
use otg_core::repl::status::{StatusFormatter, StatusSnapshot};

use support::{RecordingPort, engine};

fn run_script(
    executor: &mut CommandExecutor<otg_core::fsm::OtgFsm<RecordingPort>>,
    lines: &[&str],
) {
    for line in lines {
        match executor.execute(line) {
            Ok(CommandOutcome::Applied(ack)) => {
                assert!(ack.summary.is_clean(), "`{line}` reported {ack:?}");
            }
            Ok(other) => panic!("`{line}` is not an engine command: {other:?}"),
            Err(error) => panic!("`{line}` failed: {error}"),
        }
    }
}

#[test]
fn scripted_a_device_session_reaches_host() {
    let mut executor = CommandExecutor::new(engine(RecordingPort::default()));
    run_script(
        &mut executor,
        &[
            "id a",
            "set a_bus_req on",
            "set a_vbus_vld 1",
            "SET b_conn TRUE",
        ],
    );
    assert_eq!(executor.engine().state(), OtgState::AHost);

    let snapshot = StatusSnapshot::capture(executor.engine());
    let formatter = StatusFormatter::new(&snapshot);
    let mut line: String<128> = String::new();
    formatter.write_state_line(&mut line).expect("line fits");
    assert_eq!(line.as_str(), "state a_host role=host id=a");

    line.clear();
    formatter.write_outputs_line(&mut line).expect("line fits");
    assert_eq!(line.as_str(), "outputs drv_vbus=on loc_conn=off loc_sof=on");

    line.clear();
    formatter.write_signals_line(&mut line).expect("line fits");
    assert_eq!(line.as_str(), "signals a_vbus_vld b_conn a_bus_req");

    line.clear();
    formatter.write_timers_line(&mut line).expect("line fits");
    assert_eq!(line.as_str(), "timers a_wait_enum=200ms");
}

#[test]
fn scripted_srp_uses_configured_window() {
    let mut executor = CommandExecutor::new(engine(RecordingPort::default()));
    assert!(matches!(
        executor.execute("timeout b_srp_fail 3s"),
        Ok(CommandOutcome::Timeout { changed: true, .. })
    ));
    run_script(
        &mut executor,
        &[
            "run",
            "set b_sess_end on",
            "set b_bus_req on",
            "set b_se0_srp on",
        ],
    );
    assert_eq!(executor.engine().state(), OtgState::BSrpInit);
    assert!(executor.engine().port().calls.iter().any(|call| {
        *call == support::Call::Arm(
            otg_core::timers::OtgTimer::BSrpFail,
            core::time::Duration::from_secs(3),
        )
    }));

    run_script(&mut executor, &["set b_sess_vld on"]);
    assert_eq!(executor.engine().state(), OtgState::BPeripheral);
}

#[test]
fn parse_errors_render_for_the_operator() {
    let mut executor = CommandExecutor::new(engine(RecordingPort::default()));
    let error = executor
        .execute("set a_bus_reqq on")
        .expect_err("typo should fail");
    assert!(matches!(error, CommandError::Parse(_)));

    let mut message: String<96> = String::new();
    core::fmt::write(&mut message, format_args!("{error}")).expect("message fits");
    assert_eq!(message.as_str(), "unknown signal `a_bus_reqq`");
}
