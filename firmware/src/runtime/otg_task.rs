use embassy_futures::select::{Either3, select3};
use embassy_time::{Instant, Timer};
use otg_core::fsm::{FsmError, RunSummary};

use super::{Board, STACKS};
use crate::otg::{self, EventReceiver, OtgCell};

/// Owns the engine's clock: applies queued events, fires due timers and
/// runs the engine after each wake-up.
#[embassy_executor::task]
pub async fn run(engine: &'static OtgCell<Board>, events: EventReceiver<'static>) -> ! {
    loop {
        let now = Instant::now();
        let result = engine.lock(|cell| otg::service(&mut *cell.borrow_mut(), now));
        report(&result);

        // Timers armed by the run above are already scheduled.
        STACKS.take_rearm();
        let deadline = engine.lock(|cell| cell.borrow().port().timers().next_deadline());
        let expiry = async {
            match deadline {
                Some(at) => Timer::at(at).await,
                None => core::future::pending::<()>().await,
            }
        };

        if let Either3::First(event) = select3(events.receive(), expiry, STACKS.rearmed()).await {
            engine.lock(|cell| {
                let mut fsm = cell.borrow_mut();
                otg::apply_event(&mut *fsm, event);
                while let Ok(event) = events.try_receive() {
                    otg::apply_event(&mut *fsm, event);
                }
            });
        }
    }
}

fn report(result: &Result<RunSummary, FsmError>) {
    match result {
        Ok(summary) => {
            if summary.transitions > 0 {
                defmt::info!(
                    "otg: {} -> {} transitions={}",
                    summary.initial,
                    summary.state,
                    summary.transitions
                );
            }
            for error in &summary.diagnostics {
                defmt::warn!("otg: {}", error);
            }
        }
        Err(error) => defmt::warn!("otg: {}", error),
    }
}
