use embassy_futures::select::{Either, select};

use super::STACKS;

/// Tracks the host-role requests from the engine.
///
/// The embassy-stm32 USB driver only implements the device role, so the
/// host side stops at bookkeeping. VBUS and the line state are already
/// handled by the transceiver.
#[embassy_executor::task]
pub async fn run() -> ! {
    let mut host = false;
    let mut sof = false;
    loop {
        match select(STACKS.host_request(), STACKS.sof_request()).await {
            Either::First(on) => host = on,
            Either::Second(on) => sof = on,
        }
        // TODO: enumerate the attached device once embassy-stm32 exposes host
        // mode for the G0 USB block.
        defmt::info!("host: stack={} sof={}", host, sof);
    }
}
