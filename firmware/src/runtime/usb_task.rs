use embassy_futures::join::join;
use embassy_futures::select::{Either, select};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_time::{Instant, Timer};
use embassy_usb::class::cdc_acm::Sender;
use embassy_usb::driver::{Driver, EndpointError};

use super::{Board, DROPPED_EVENTS, STACKS};
use crate::hw::BoardTransceiver;
use crate::otg::OtgCell;
use crate::otg::console::{Console, Reply, Response, SharedEngine};
use crate::usb::{self, CdcAcmHandle, OtgGadget, UsbDeviceStrings};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

type Gadget = hal::usb::Driver<'static, hal::peripherals::USB>;
type BoardConsole = Console<'static, 'static, BoardTransceiver<'static>>;

/// Runs the gadget stack while the engine asks for it.
#[embassy_executor::task]
pub async fn run(
    engine: &'static OtgCell<Board>,
    storage: &'static mut usb::UsbDeviceStorage,
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let driver = hal::usb::Driver::new(usb, UsbIrqs, dp, dm);
    let OtgGadget {
        mut device,
        console: mut handle,
    } = OtgGadget::new(driver, storage, UsbDeviceStrings::default());
    let mut console = Console::new(SharedEngine::new(engine), &DROPPED_EVENTS);

    loop {
        while !STACKS.gadget_request().await {}
        defmt::info!("usb: gadget stack started");

        let stopped = async { while STACKS.gadget_request().await {} };
        select(
            join(device.run(), serve_console(&mut handle, &mut console)),
            stopped,
        )
        .await;

        device.disable().await;
        defmt::info!("usb: gadget stack stopped");
    }
}

async fn serve_console(
    handle: &mut CdcAcmHandle<Gadget>,
    console: &mut BoardConsole,
) -> ! {
    let mut ingress = [0u8; usb::MAX_PACKET_SIZE as usize];
    let mut response = Response::new();

    loop {
        handle.wait_ready().await;
        handle.wait_dtr().await;
        defmt::info!("usb: console connected");

        console.greet(&mut response);
        if flush(&mut handle.sender, &mut response).await.is_err() {
            continue;
        }

        loop {
            match select(
                handle.receiver.read_packet(&mut ingress),
                handle.control.control_changed(),
            )
            .await
            {
                Either::First(Ok(count)) => {
                    if feed(handle, console, &ingress[..count], &mut response)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Either::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: console interface disabled");
                    break;
                }
                Either::First(Err(_)) => defmt::warn!("usb: console read error"),
                Either::Second(()) => {
                    if !handle.sender.dtr() {
                        defmt::warn!("usb: console host dropped DTR");
                        break;
                    }
                }
            }
        }
    }
}

async fn feed(
    handle: &mut CdcAcmHandle<Gadget>,
    console: &mut BoardConsole,
    bytes: &[u8],
    response: &mut Response,
) -> Result<(), EndpointError> {
    for &byte in bytes {
        if let Reply::Wait(duration) = console.feed(byte, Instant::now(), response) {
            flush(&mut handle.sender, response).await?;
            Timer::after(duration).await;
            console.finish_wait(duration, response);
        }
    }
    flush(&mut handle.sender, response).await
}

async fn flush<D: Driver<'static>>(
    sender: &mut Sender<'static, D>,
    response: &mut Response,
) -> Result<(), EndpointError> {
    let result = write_packets(sender, response.as_bytes()).await;
    response.clear();
    result
}

async fn write_packets<D: Driver<'static>>(
    sender: &mut Sender<'static, D>,
    bytes: &[u8],
) -> Result<(), EndpointError> {
    let packet = usize::from(usb::MAX_PACKET_SIZE);
    for chunk in bytes.chunks(packet) {
        sender.write_packet(chunk).await?;
    }
    // A transfer that ends on a packet boundary needs a zero-length packet.
    if !bytes.is_empty() && bytes.len() % packet == 0 {
        sender.write_packet(&[]).await?;
    }
    Ok(())
}
