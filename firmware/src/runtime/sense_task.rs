use embassy_time::{Duration, Ticker};

use crate::hw::SenseInputs;
use crate::otg::EventPublisher;

const SENSE_PERIOD: Duration = Duration::from_millis(5);

#[embassy_executor::task]
pub async fn run(inputs: SenseInputs<'static>, publisher: EventPublisher<'static>) -> ! {
    let mut previous = inputs.sample();
    for event in previous.initial() {
        publisher.publish(event);
    }

    let mut ticker = Ticker::every(SENSE_PERIOD);
    loop {
        ticker.next().await;
        let levels = inputs.sample();
        for event in levels.diff(&previous) {
            if !publisher.publish(event) {
                defmt::warn!("sense: event queue full, {} dropped", event);
            }
        }
        previous = levels;
    }
}
