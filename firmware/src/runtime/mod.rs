use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_sync::blocking_mutex::Mutex;
use otg_core::fsm::{FsmConfig, OtgFsm};
use portable_atomic::AtomicU32;
use static_cell::StaticCell;

use crate::hw::{BoardTransceiver, SenseInputs};
use crate::otg::port::BoardPort;
use crate::otg::stacks::StackSignals;
use crate::otg::{EventPublisher, EventQueue, OtgCell};
use crate::usb;

mod host_task;
mod otg_task;
mod sense_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) type Board = BoardPort<'static, BoardTransceiver<'static>>;

pub(super) static EVENTS: EventQueue = EventQueue::new();
pub(super) static DROPPED_EVENTS: AtomicU32 = AtomicU32::new(0);
pub(super) static STACKS: StackSignals = StackSignals::new();
static ENGINE: StaticCell<OtgCell<Board>> = StaticCell::new();
static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA6,
        PA7,
        PB4,
        PB5,
        PB6,
        PB7,
        PB8,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(config);

    let transceiver = BoardTransceiver::new(
        Output::new(PA0, Level::Low, Speed::Low),
        Output::new(PA1, Level::Low, Speed::Low),
        Output::new(PA6, Level::Low, Speed::Low),
        Output::new(PA7, Level::Low, Speed::Low),
    );
    let inputs = SenseInputs {
        id: Input::new(PB4, Pull::Up),
        vbus_valid: Input::new(PB5, Pull::None),
        session_valid: Input::new(PB6, Pull::None),
        session_end: Input::new(PB7, Pull::None),
        bus_request: Input::new(PB8, Pull::Up),
    };

    let engine: &'static OtgCell<Board> = ENGINE.init(Mutex::new(RefCell::new(OtgFsm::new(
        BoardPort::new(transceiver, &STACKS),
        FsmConfig::new(),
    ))));
    let publisher = EventPublisher::new(EVENTS.sender(), &DROPPED_EVENTS);
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new(publisher));

    spawner
        .spawn(otg_task::run(engine, EVENTS.receiver()))
        .expect("failed to spawn OTG task");

    spawner
        .spawn(sense_task::run(inputs, publisher))
        .expect("failed to spawn sense task");

    spawner
        .spawn(usb_task::run(engine, storage, USB, PA12, PA11))
        .expect("failed to spawn USB task");

    spawner
        .spawn(host_task::run())
        .expect("failed to spawn host task");

    core::future::pending::<()>().await;
}
