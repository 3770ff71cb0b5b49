use crate::{
    error::*,
    topo::{self, StreamingInterfaceDesc, Topology},
    util::split_descriptors,
    Result,
};
use rusb::{Context, Device, TransferType};
use zerocopy::FromBytes;

const IAD_DEVICE_CLASS: u8 = 0xEF;
const IAD_DEVICE_SUBCLASS: u8 = 0x02;
const IAD_DEVICE_PROTOCOL: u8 = 0x01;

const UVC_IAD_CLASS: u8 = 0x0E;
const UVC_IAD_SUBCLASS: u8 = 0x03;

const UVC_INTERF_CLASS: u8 = 0x0E;
const UVC_INTERF_SUBCLASS_CONTROL: u8 = 1;
const UVC_INTERF_SUBCLASS_STREAMING: u8 = 2;

const DESC_TYPE_IAD: u8 = 11;

/// Everything needed to talk to a UVC function, extracted from the configuration descriptor.
#[derive(Debug)]
pub(crate) struct UvcInfo {
    pub(crate) control_interface: ControlInterface,
    pub(crate) streaming_interfaces: Vec<StreamingInterfaceDesc>,
}

#[derive(Debug)]
pub(crate) struct ControlInterface {
    pub(crate) interface_number: u8,
    /// Interrupt endpoint of the Video Control interface, if present.
    pub(crate) interrupt_ep: Option<u8>,
    pub(crate) topo: Topology,
}

#[derive(Debug, FromBytes)]
#[repr(C)]
#[allow(non_snake_case)]
struct InterfaceAssociationDescriptor {
    bLength: u8,
    bDescriptorType: u8,
    bFirstInterface: u8,
    bInterfaceCount: u8,
    bFunctionClass: u8,
    bFunctionSubClass: u8,
    bFunctionProtocol: u8,
    iFunction: u8,
}

impl InterfaceAssociationDescriptor {
    fn is_video(&self) -> bool {
        self.bFunctionClass == UVC_IAD_CLASS && self.bFunctionSubClass == UVC_IAD_SUBCLASS
    }

    fn contains(&self, interface_number: u8) -> bool {
        let first = u16::from(self.bFirstInterface);
        let end = first + u16::from(self.bInterfaceCount);
        (first..end).contains(&u16::from(interface_number))
    }
}

/// Finds the first video function IAD among the descriptors following a configuration descriptor.
fn find_video_iad(config_extra: &[u8]) -> Option<InterfaceAssociationDescriptor> {
    split_descriptors(config_extra)
        .filter(|(ty, _)| *ty == DESC_TYPE_IAD)
        .filter_map(
            |(_, data)| match InterfaceAssociationDescriptor::read_from_prefix(data) {
                Some(iad) => Some(iad),
                None => {
                    log::warn!("failed to parse IAD from {:x?}", data);
                    None
                }
            },
        )
        .inspect(|iad| log::debug!("{:?}", iad))
        .find(InterfaceAssociationDescriptor::is_video)
}

/// How a device announces its video function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Announcement {
    /// Device class "Miscellaneous, IAD": the function is delimited by an IAD.
    Iad,
    /// Device class 0: each interface states its own class. An IAD may still be present.
    PerInterface,
}

fn announcement(class: u8, subclass: u8, protocol: u8) -> Option<Announcement> {
    match (class, subclass, protocol) {
        (IAD_DEVICE_CLASS, IAD_DEVICE_SUBCLASS, IAD_DEVICE_PROTOCOL) => Some(Announcement::Iad),
        (0, _, _) => Some(Announcement::PerInterface),
        _ => None,
    }
}

/// Decides whether an interface is part of the video function.
///
/// Inside an IAD, membership is by interface number. Without one, any Video class interface
/// counts.
fn is_video_interface(
    iad: Option<&InterfaceAssociationDescriptor>,
    interface_number: u8,
    interface_class: u8,
) -> bool {
    match iad {
        Some(iad) => iad.contains(interface_number),
        None => interface_class == UVC_INTERF_CLASS,
    }
}

fn invalid_device<T>(msg: String) -> Result<T> {
    err(
        ErrorKind::InvalidDevice(msg),
        Action::AccessingDeviceDescriptor,
    )
}

/// Checks whether `device` is a UVC device and parses its descriptors if so.
pub(crate) fn detect_uvc(device: &Device<Context>) -> Result<Option<UvcInfo>> {
    let device_desc = device
        .device_descriptor()
        .during(Action::AccessingDeviceDescriptor)?;

    log::trace!(
        "Bus {:03} Device {:03} {:04x}:{:04x}",
        device.bus_number(),
        device.address(),
        device_desc.vendor_id(),
        device_desc.product_id(),
    );

    let announced = match announcement(
        device_desc.class_code(),
        device_desc.sub_class_code(),
        device_desc.protocol_code(),
    ) {
        Some(announced) => announced,
        None => {
            log::trace!(
                "device class {:#04x} can't carry a video function",
                device_desc.class_code()
            );
            return Ok(None);
        }
    };

    if device_desc.num_configurations() != 1 {
        log::debug!(
            "device has {} configurations, we can only handle 1",
            device_desc.num_configurations()
        );
        return Ok(None);
    }

    let config_desc = device
        .config_descriptor(0)
        .during(Action::AccessingDeviceDescriptor)?;

    let iad = find_video_iad(config_desc.extra());
    if iad.is_none() && announced == Announcement::Iad {
        log::trace!("no video function IAD");
        return Ok(None);
    }

    let mut control_interface = None;
    let mut streaming_interfaces = Vec::new();
    for interface in config_desc.interfaces() {
        // Class-specific descriptors are attached to alternate setting 0.
        let desc = match interface.descriptors().next() {
            Some(desc) => desc,
            None if iad.as_ref().map_or(false, |iad| iad.contains(interface.number())) => {
                return invalid_device(format!(
                    "interface {} has no descriptors",
                    interface.number()
                ))
            }
            None => continue,
        };
        if !is_video_interface(iad.as_ref(), interface.number(), desc.class_code()) {
            continue;
        }
        if desc.class_code() != UVC_INTERF_CLASS {
            return invalid_device(format!(
                "interface {} uses unexpected class code {}",
                interface.number(),
                desc.class_code()
            ));
        }

        match desc.sub_class_code() {
            UVC_INTERF_SUBCLASS_CONTROL => {
                if control_interface.is_some() {
                    return invalid_device("device lists more than one control interface".into());
                }

                let interrupt_ep = match desc.endpoint_descriptors().next() {
                    Some(ep) if ep.transfer_type() == TransferType::Interrupt => Some(ep.address()),
                    Some(ep) => {
                        return invalid_device(format!(
                            "control interface has {:?} endpoint, only interrupt EPs are allowed",
                            ep.transfer_type()
                        ))
                    }
                    None => None,
                };

                control_interface = Some(ControlInterface {
                    interface_number: desc.interface_number(),
                    interrupt_ep,
                    topo: topo::parse::parse_control_interface(desc.extra())?,
                });
            }
            UVC_INTERF_SUBCLASS_STREAMING => {
                streaming_interfaces.push(topo::parse::parse_streaming_interface(
                    desc.interface_number(),
                    desc.extra(),
                )?);
            }
            e => {
                log::warn!(
                    "interface {} uses unexpected subclass code {}, ignoring it",
                    interface.number(),
                    e
                );
            }
        }
    }

    match control_interface {
        Some(control_interface) => Ok(Some(UvcInfo {
            control_interface,
            streaming_interfaces,
        })),
        // a class 0 device without Video interfaces is simply not a camera
        None if iad.is_none() && streaming_interfaces.is_empty() => Ok(None),
        None => invalid_device("device does not have a UVC control interface".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_video_iad_after_other_functions() {
        let raw = [
            // audio function IAD, interfaces 2..4
            8, 11, 2, 2, 0x01, 0x02, 0x00, 0,
            // video function IAD, interfaces 0..2
            8, 11, 0, 2, 0x0e, 0x03, 0x00, 0,
        ];
        let iad = find_video_iad(&raw).unwrap();
        assert!(iad.contains(0));
        assert!(iad.contains(1));
        assert!(!iad.contains(2));
    }

    #[test]
    fn no_iad_means_no_video_function() {
        let raw = [8, 11, 0, 1, 0x01, 0x01, 0x00, 0];
        assert!(find_video_iad(&raw).is_none());
        assert!(find_video_iad(&[]).is_none());
        // truncated IAD
        assert!(find_video_iad(&[4, 11, 0, 2]).is_none());
    }

    #[test]
    fn class_zero_devices_are_inspected() {
        assert_eq!(announcement(0xef, 0x02, 0x01), Some(Announcement::Iad));
        assert_eq!(announcement(0x00, 0x00, 0x00), Some(Announcement::PerInterface));
        // vendor-specific and hub devices are skipped
        assert_eq!(announcement(0xff, 0x00, 0x00), None);
        assert_eq!(announcement(0x09, 0x00, 0x02), None);
        // misc class without the IAD protocol
        assert_eq!(announcement(0xef, 0x02, 0x00), None);
    }

    #[test]
    fn interfaces_without_iad_are_picked_by_class() {
        assert!(is_video_interface(None, 0, UVC_INTERF_CLASS));
        assert!(!is_video_interface(None, 0, 0x01));
        assert!(!is_video_interface(None, 2, 0x03));

        let raw = [8, 11, 1, 2, 0x0e, 0x03, 0x00, 0];
        let iad = find_video_iad(&raw).unwrap();
        // inside an IAD the interface number decides, the class is checked afterwards
        assert!(is_video_interface(Some(&iad), 1, 0x01));
        assert!(!is_video_interface(Some(&iad), 0, UVC_INTERF_CLASS));
    }

    #[test]
    fn iad_range_does_not_overflow() {
        let raw = [8, 11, 0xff, 2, 0x0e, 0x03, 0x00, 0];
        let iad = find_video_iad(&raw).unwrap();
        assert!(iad.contains(0xff));
        assert!(!iad.contains(0));
    }
}
