//! A small USB Video Class host library built on `rusb`.
//!
//! Typical use:
//! - create a [`Context`] and look up a device with [`Context::find_device`],
//! - [`UvcDeviceDesc::open`] it,
//! - adjust image controls through [`UvcDevice::camera_terminal`] and
//!   [`UvcDevice::processing_unit`] (or the shorthand setters on [`UvcDevice`]),
//! - optionally start a [`streaming::Stream`] and convert its frames with [`Frame::to_bgr`].
//!
//! Dealing with a device entity `Ent`:
//! - `EntDesc` describes an entity's static properties, read from the device descriptor.
//! - `EntId` is a small `Copy` type that refers to an `EntDesc`.
//! - `Ent<'a>` grants access to the entity's controls, borrowing the opened device.

#[macro_use]
pub mod control;
pub mod camera;
mod detect;
mod error;
pub mod frame;
pub mod processing_unit;
pub mod streaming;
pub mod topo;
mod util;

use std::{fmt, time::Duration};

use camera::CameraTerminal;
use control::{AutoExposureMode, Request};
use detect::UvcInfo;
pub use error::Error;
use error::*;
pub use frame::{Frame, FrameFormat};
use processing_unit::ProcessingUnit;
use rusb::{DeviceHandle, UsbContext};
use streaming::{Stream, StreamingInterface};
use topo::{
    CameraId, ProcessingUnitId, StreamDirection, StreamingInterfaceDesc, StreamingInterfaceId,
    Topology,
};
pub use util::BcdVersion;

pub type Result<T> = std::result::Result<T, Error>;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// A USB session. Dropping it closes the underlying libusb context.
pub struct Context {
    usb: rusb::Context,
}

impl Context {
    pub fn new() -> Result<Self> {
        let usb = rusb::Context::new().during(Action::InitializingContext)?;
        Ok(Self { usb })
    }

    /// Lists all attached UVC devices.
    ///
    /// Devices that look like UVC devices but have unusable descriptors are logged and skipped.
    pub fn devices(&self) -> Result<Vec<UvcDeviceDesc>> {
        let list = self.usb.devices().during(Action::EnumeratingDevices)?;

        let devices = list
            .iter()
            .filter_map(|dev| match detect::detect_uvc(&dev) {
                Ok(Some(info)) => Some(UvcDeviceDesc {
                    usb: dev,
                    uvc_info: info,
                }),
                Ok(None) => None,
                Err(e) => {
                    log::error!("{:?}: {}", dev, e);
                    None
                }
            })
            .collect();

        Ok(devices)
    }

    /// Returns the first UVC device accepted by `filter`.
    pub fn find_device(&self, filter: &DeviceFilter) -> Result<UvcDeviceDesc> {
        for desc in self.devices()? {
            if filter.matches(&desc) {
                log::debug!(
                    "found {:04x}:{:04x} on bus {:03} address {:03}",
                    desc.vendor_id(),
                    desc.product_id(),
                    desc.bus_number(),
                    desc.address()
                );
                return Ok(desc);
            }
        }

        err(
            ErrorKind::NotFound(format!("no UVC device matches {}", filter)),
            Action::FindingDevice,
        )
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").finish()
    }
}

/// Lists all attached UVC devices, using a fresh [`Context`].
pub fn list() -> Result<impl Iterator<Item = UvcDeviceDesc>> {
    Ok(Context::new()?.devices()?.into_iter())
}

/// Selects devices by USB IDs and serial number. Unset fields match anything.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub serial_number: Option<String>,
}

impl DeviceFilter {
    fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.map_or(true, |vid| vid == vendor_id)
            && self.product_id.map_or(true, |pid| pid == product_id)
    }

    fn matches(&self, desc: &UvcDeviceDesc) -> bool {
        if !self.matches_ids(desc.vendor_id(), desc.product_id()) {
            return false;
        }

        match &self.serial_number {
            None => true,
            Some(wanted) => match desc.read_serial_number() {
                Ok(serial) => serial == *wanted,
                Err(e) => {
                    log::debug!("couldn't read serial number: {}", e);
                    false
                }
            },
        }
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(vid) => write!(f, "{:04x}:", vid)?,
            None => f.write_str("*:")?,
        }
        match self.product_id {
            Some(pid) => write!(f, "{:04x}", pid)?,
            None => f.write_str("*")?,
        }
        if let Some(serial) = &self.serial_number {
            write!(f, " (serial {})", serial)?;
        }
        Ok(())
    }
}

/// Identifies a UVC device.
pub struct UvcDeviceDesc {
    usb: rusb::Device<rusb::Context>,
    uvc_info: UvcInfo,
}

impl UvcDeviceDesc {
    pub fn vendor_id(&self) -> u16 {
        self.usb
            .device_descriptor()
            .map_or(0, |desc| desc.vendor_id())
    }

    pub fn product_id(&self) -> u16 {
        self.usb
            .device_descriptor()
            .map_or(0, |desc| desc.product_id())
    }

    pub fn bus_number(&self) -> u8 {
        self.usb.bus_number()
    }

    pub fn address(&self) -> u8 {
        self.usb.address()
    }

    /// Reads the serial number string, opening the device briefly.
    pub fn read_serial_number(&self) -> Result<String> {
        let handle = self.usb.open().during(Action::ReadingDeviceString)?;
        let desc = self
            .usb
            .device_descriptor()
            .during(Action::AccessingDeviceDescriptor)?;
        handle
            .read_serial_number_string_ascii(&desc)
            .during(Action::ReadingDeviceString)
    }

    pub fn open(self) -> Result<UvcDevice> {
        UvcDevice::open(self)
    }
}

impl fmt::Debug for UvcDeviceDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UvcDeviceDesc")
            .field("uvc_info", &self.uvc_info)
            .finish()
    }
}

/// An opened UVC device.
///
/// The control and streaming interfaces are claimed while the device is open. Dropping the
/// device (or calling [`UvcDevice::close`]) releases them.
pub struct UvcDevice {
    usb: DeviceHandle<rusb::Context>,
    uvc_info: UvcInfo,
    timeout: Duration,
    claimed: Vec<u8>,
}

impl UvcDevice {
    fn open(desc: UvcDeviceDesc) -> Result<Self> {
        let usb = desc.usb.open().during(Action::OpeningDevice)?;
        if let Err(e) = usb.set_auto_detach_kernel_driver(true) {
            log::warn!("set_auto_detach_kernel_driver failed: {}", e);
        }

        let config = usb.active_configuration().during(Action::OpeningDevice)?;
        if config != 1 {
            usb.set_active_configuration(1)
                .during(Action::OpeningDevice)?;
        }

        let mut device = UvcDevice {
            usb,
            uvc_info: desc.uvc_info,
            timeout: DEFAULT_TIMEOUT,
            claimed: Vec::new(),
        };

        // Interfaces claimed so far are released by `Drop` if a later claim fails.
        let interfaces = std::iter::once(device.control_interface_number())
            .chain(device.uvc_info.streaming_interfaces.iter().map(|i| i.id().0))
            .collect::<Vec<_>>();
        for interface in interfaces {
            device
                .usb
                .claim_interface(interface)
                .during(Action::OpeningDevice)?;
            device.claimed.push(interface);
        }

        let config = device
            .usb
            .active_configuration()
            .during(Action::OpeningDevice)?;
        if config != 1 {
            return err(
                ErrorKind::InvalidDevice("failed to claim device".into()),
                Action::OpeningDevice,
            );
        }

        log::debug!(
            "opened device, control interface {} (interrupt endpoint {:?}), {} streaming interface(s)",
            device.control_interface_number(),
            device.uvc_info.control_interface.interrupt_ep,
            device.uvc_info.streaming_interfaces.len()
        );

        Ok(device)
    }

    /// Releases all claimed interfaces and closes the device.
    pub fn close(mut self) -> Result<()> {
        self.release_interfaces()
    }

    fn release_interfaces(&mut self) -> Result<()> {
        let mut result = Ok(());
        while let Some(interface) = self.claimed.pop() {
            if let Err(e) = self.usb.release_interface(interface) {
                log::warn!("failed to release interface {}: {}", interface, e);
                if result.is_ok() {
                    result = Err(Error::with_action(e, Action::ClosingDevice));
                }
            }
        }
        result
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn control_interface_number(&self) -> u8 {
        self.uvc_info.control_interface.interface_number
    }

    pub(crate) fn with_usb<T>(
        &self,
        mut cb: impl FnMut(&DeviceHandle<rusb::Context>) -> Result<T>,
    ) -> Result<T> {
        // Some devices time out on one of the first transfers after opening them.
        match cb(&self.usb) {
            Err(e) if e.is_usb_timeout() => {
                log::warn!("USB timeout, retrying request");
                cb(&self.usb)
            }
            other => other,
        }
    }

    /// Performs a `SET_CUR` request on a control of `entity_id` on `interface`.
    pub(crate) fn set_interface_entity(
        &self,
        interface: u8,
        entity_id: u8,
        cs: u8,
        data: &[u8],
        action: Action,
    ) -> Result<()> {
        const SET_ENTITY_REQ: u8 = 0b00100001;

        let value = u16::from(cs) << 8;
        let index = u16::from(entity_id) << 8 | u16::from(interface);
        self.with_usb(|usb| {
            let written = usb
                .write_control(
                    SET_ENTITY_REQ,
                    Request::SetCur as u8,
                    value,
                    index,
                    data,
                    self.timeout,
                )
                .during(action)?;
            if written != data.len() {
                return err(
                    format!("control write only wrote {}/{} bytes", written, data.len()),
                    action,
                );
            }
            Ok(())
        })
    }

    /// Performs a `GET_*` request on a control of `entity_id` on `interface`.
    ///
    /// Returns the number of bytes the device sent.
    pub(crate) fn read_interface_entity(
        &self,
        interface: u8,
        entity_id: u8,
        request: Request,
        cs: u8,
        buf: &mut [u8],
        action: Action,
    ) -> Result<usize> {
        const GET_ENTITY_REQ: u8 = 0b10100001;

        let value = u16::from(cs) << 8;
        let index = u16::from(entity_id) << 8 | u16::from(interface);
        log::trace!("{:?}(cs {:#04x}, index {:#06x})", request, cs, index);

        self.with_usb(|usb| {
            usb.read_control(
                GET_ENTITY_REQ,
                request as u8,
                value,
                index,
                &mut *buf,
                self.timeout,
            )
            .during(action)
        })
    }

    fn device_descriptor(&self) -> Result<rusb::DeviceDescriptor> {
        self.usb
            .device()
            .device_descriptor()
            .during(Action::AccessingDeviceDescriptor)
    }

    pub fn read_manufacturer_string(&self) -> Result<String> {
        let desc = self.device_descriptor()?;
        self.usb
            .read_manufacturer_string_ascii(&desc)
            .during(Action::ReadingDeviceString)
    }

    pub fn read_product_string(&self) -> Result<String> {
        let desc = self.device_descriptor()?;
        self.usb
            .read_product_string_ascii(&desc)
            .during(Action::ReadingDeviceString)
    }

    pub fn read_serial_number_string(&self) -> Result<String> {
        let desc = self.device_descriptor()?;
        self.usb
            .read_serial_number_string_ascii(&desc)
            .during(Action::ReadingDeviceString)
    }

    pub fn topology(&self) -> &Topology {
        &self.uvc_info.control_interface.topo
    }

    /// Returns the device's streaming interfaces.
    ///
    /// Streaming interfaces transport video data over the USB channel (either from the device to
    /// the host, or from the host to the device).
    pub fn streaming_interfaces(&self) -> &[StreamingInterfaceDesc] {
        &self.uvc_info.streaming_interfaces
    }

    pub fn streaming_interface_by_id(
        &self,
        id: StreamingInterfaceId,
    ) -> Result<StreamingInterface<'_>> {
        match self.streaming_interfaces().iter().find(|i| i.id() == id) {
            Some(desc) => Ok(StreamingInterface::new(self, desc)),
            None => err(
                ErrorKind::InvalidParam(format!("no streaming interface {:?}", id)),
                Action::StreamNegotiation,
            ),
        }
    }

    /// Starts streaming from the first device-to-host streaming interface, in its first format
    /// and that format's default frame size.
    pub fn start_default_stream(&self) -> Result<Stream<'_>> {
        let selected = self
            .streaming_interfaces()
            .iter()
            .filter(|i| i.direction() == StreamDirection::Input)
            .find_map(|i| {
                let format = i.formats().first()?;
                let frame = format.default_frame()?;
                Some((i, format.index(), frame.index()))
            });

        match selected {
            Some((desc, format, frame)) => {
                log::debug!(
                    "streaming from interface {:?}, format {:?}, frame {:?}",
                    desc.id(),
                    format,
                    frame
                );
                StreamingInterface::new(self, desc).start_stream(format, frame)
            }
            None => err(
                ErrorKind::NotSupported("device has no usable video input".into()),
                Action::StreamNegotiation,
            ),
        }
    }

    pub fn camera_terminal_by_id(&self, id: CameraId) -> Result<CameraTerminal<'_>> {
        match self.topology().camera_terminal_by_id(id) {
            Some(desc) => Ok(CameraTerminal::new(self, desc)),
            None => err(
                ErrorKind::InvalidParam(format!("no camera terminal {:?}", id)),
                Action::WritingControl,
            ),
        }
    }

    pub fn processing_unit_by_id(&self, id: ProcessingUnitId) -> Result<ProcessingUnit<'_>> {
        match self.topology().processing_unit_by_id(id) {
            Some(desc) => Ok(ProcessingUnit::new(self, desc)),
            None => err(
                ErrorKind::InvalidParam(format!("no processing unit {:?}", id)),
                Action::WritingControl,
            ),
        }
    }

    /// Returns the device's first camera terminal.
    pub fn camera_terminal(&self) -> Result<CameraTerminal<'_>> {
        match self.topology().first_camera_terminal() {
            Some(desc) => Ok(CameraTerminal::new(self, desc)),
            None => err(
                ErrorKind::NotSupported("device has no camera terminal".into()),
                Action::WritingControl,
            ),
        }
    }

    /// Returns the device's first processing unit.
    pub fn processing_unit(&self) -> Result<ProcessingUnit<'_>> {
        match self.topology().first_processing_unit() {
            Some(desc) => Ok(ProcessingUnit::new(self, desc)),
            None => err(
                ErrorKind::NotSupported("device has no processing unit".into()),
                Action::WritingControl,
            ),
        }
    }

    pub fn set_ae_mode(&self, mode: AutoExposureMode) -> Result<()> {
        self.camera_terminal()?
            .set_control::<camera::AutoExposureMode>(mode)
    }

    pub fn set_gain(&self, gain: u16) -> Result<()> {
        self.processing_unit()?
            .set_control::<processing_unit::Gain>(gain)
    }

    pub fn set_brightness(&self, brightness: i16) -> Result<()> {
        self.processing_unit()?
            .set_control::<processing_unit::Brightness>(brightness)
    }

    pub fn set_white_balance_temperature_auto(&self, auto: bool) -> Result<()> {
        self.processing_unit()?
            .set_control::<processing_unit::WhiteBalanceTemperatureAuto>(auto)
    }

    pub fn set_white_balance_temperature(&self, kelvin: u16) -> Result<()> {
        self.processing_unit()?
            .set_control::<processing_unit::WhiteBalanceTemperature>(kelvin)
    }
}

impl Drop for UvcDevice {
    fn drop(&mut self) {
        // errors are logged by `release_interfaces`
        let _ = self.release_interfaces();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_any_ids() {
        let filter = DeviceFilter::default();
        assert!(filter.matches_ids(0x046d, 0x085e));
        assert!(filter.matches_ids(0, 0));
        assert_eq!(filter.to_string(), "*:*");
    }

    #[test]
    fn filter_checks_set_ids_only() {
        let filter = DeviceFilter {
            vendor_id: Some(0x046d),
            ..Default::default()
        };
        assert!(filter.matches_ids(0x046d, 0x085e));
        assert!(!filter.matches_ids(0x045e, 0x085e));

        let filter = DeviceFilter {
            vendor_id: Some(0x046d),
            product_id: Some(0x0825),
            serial_number: Some("ABC123".into()),
        };
        assert!(!filter.matches_ids(0x046d, 0x085e));
        assert!(filter.matches_ids(0x046d, 0x0825));
        assert_eq!(filter.to_string(), "046d:0825 (serial ABC123)");
    }
}
