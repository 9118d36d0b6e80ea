//! USB device side of the port: descriptors, storage and the gadget's
//! single CDC ACM console interface.

use embassy_usb::class::cdc_acm::{CdcAcmClass, ControlChanged, Receiver, Sender, State};
use embassy_usb::driver::Driver;
use embassy_usb::{Builder, Config, Handler, UsbDevice};

use crate::otg::{EventPublisher, OtgEvent};

pub const MAX_PACKET_SIZE: u16 = 64;

const CONTROL_BUFFER_LEN: usize = 64;
const CONFIG_DESCRIPTOR_LEN: usize = 256;
const BOS_DESCRIPTOR_LEN: usize = 256;
const MSOS_DESCRIPTOR_LEN: usize = 256;

/// User-visible strings advertised in the USB descriptors.
#[derive(Clone, Copy, Debug)]
pub struct UsbDeviceStrings {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: Option<&'static str>,
}

impl Default for UsbDeviceStrings {
    fn default() -> Self {
        Self {
            manufacturer: "usb-otg",
            product: "OTG dual-role port",
            serial_number: None,
        }
    }
}

/// Forwards bus state the device stack observes to the engine.
pub struct GadgetEvents {
    publisher: EventPublisher<'static>,
}

impl Handler for GadgetEvents {
    fn suspended(&mut self, suspended: bool) {
        if !self.publisher.publish(OtgEvent::RemoteSuspend(suspended)) {
            defmt::warn!("usb: event queue full, suspend={} dropped", suspended);
        }
    }

    fn configured(&mut self, configured: bool) {
        defmt::info!("usb: configured={}", configured);
    }
}

/// Backing storage for the Embassy USB builder and the console class.
pub struct UsbDeviceStorage {
    control_buf: [u8; CONTROL_BUFFER_LEN],
    config_descriptor: [u8; CONFIG_DESCRIPTOR_LEN],
    bos_descriptor: [u8; BOS_DESCRIPTOR_LEN],
    msos_descriptor: [u8; MSOS_DESCRIPTOR_LEN],
    console_state: State<'static>,
    events: GadgetEvents,
}

impl UsbDeviceStorage {
    pub fn new(publisher: EventPublisher<'static>) -> Self {
        Self {
            control_buf: [0; CONTROL_BUFFER_LEN],
            config_descriptor: [0; CONFIG_DESCRIPTOR_LEN],
            bos_descriptor: [0; BOS_DESCRIPTOR_LEN],
            msos_descriptor: [0; MSOS_DESCRIPTOR_LEN],
            console_state: State::new(),
            events: GadgetEvents { publisher },
        }
    }
}

/// Split handles for the console interface.
pub struct CdcAcmHandle<D: Driver<'static>> {
    pub sender: Sender<'static, D>,
    pub receiver: Receiver<'static, D>,
    pub control: ControlChanged<'static>,
}

impl<D: Driver<'static>> CdcAcmHandle<D> {
    /// Waits until the host enables both IN and OUT endpoints.
    pub async fn wait_ready(&mut self) {
        embassy_futures::join::join(
            self.sender.wait_connection(),
            self.receiver.wait_connection(),
        )
        .await;
    }

    /// Waits until the host asserts DTR.
    pub async fn wait_dtr(&self) {
        while !self.sender.dtr() {
            self.control.control_changed().await;
        }
    }
}

/// The gadget: the device stack plus its console interface.
pub struct OtgGadget<D: Driver<'static>> {
    pub device: UsbDevice<'static, D>,
    pub console: CdcAcmHandle<D>,
}

impl<D: Driver<'static>> OtgGadget<D> {
    pub fn new(driver: D, storage: &'static mut UsbDeviceStorage, strings: UsbDeviceStrings) -> Self {
        let mut config = Config::new(0x1209, 0x0002);
        config.manufacturer = Some(strings.manufacturer);
        config.product = Some(strings.product);
        config.serial_number = strings.serial_number;
        config.max_packet_size_0 = 64;
        config.max_power = 100;
        config.device_class = 0xEF;
        config.device_sub_class = 0x02;
        config.device_protocol = 0x01;
        config.composite_with_iads = true;

        let mut builder = Builder::new(
            driver,
            config,
            &mut storage.config_descriptor,
            &mut storage.bos_descriptor,
            &mut storage.msos_descriptor,
            &mut storage.control_buf,
        );
        builder.handler(&mut storage.events);

        let class = CdcAcmClass::new(&mut builder, &mut storage.console_state, MAX_PACKET_SIZE);
        let (sender, receiver, control) = class.split_with_control();

        Self {
            device: builder.build(),
            console: CdcAcmHandle {
                sender,
                receiver,
                control,
            },
        }
    }
}
