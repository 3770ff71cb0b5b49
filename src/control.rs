//! Raw values of entity and streaming controls.

use std::mem;

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes};

use crate::{
    error::{err, Action, ErrorKind},
    util::BcdVersion,
    Result, UvcDevice,
};

/// Class-specific request codes (`bRequest`).
#[derive(Debug, Clone, Copy)]
pub(crate) enum Request {
    SetCur = 0x01,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetDef = 0x87,
}

/// A value that can be transferred in a control request.
///
/// All UVC control values are little-endian and of fixed size.
pub trait ControlValue: Sized {
    type Buf: Default + AsMut<[u8]>;

    fn decode(buf: &[u8]) -> Self;
    fn encode(&self, buf: &mut [u8]);
}

impl ControlValue for bool {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0 => false,
            1 => true,
            n => {
                log::warn!("invalid bool value (should be 0 or 1 only): {}", n);
                true
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}

macro_rules! le_control_value {
    ($($ty:ty),+) => {
        $(
            impl ControlValue for $ty {
                type Buf = [u8; mem::size_of::<$ty>()];

                fn decode(buf: &[u8]) -> Self {
                    let mut bytes = [0; mem::size_of::<$ty>()];
                    bytes.copy_from_slice(buf);
                    Self::from_le_bytes(bytes)
                }

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes())
                }
            }
        )+
    };
}

le_control_value!(u8, i8, u16, i16, u32);

bitflags! {
    /// Value of the camera terminal's auto-exposure mode control.
    ///
    /// `GET_RES` returns a bitmap of all supported modes; `GET_CUR`/`SET_CUR` use exactly one bit.
    pub struct AutoExposureMode: u8 {
        const MANUAL = 1 << 0;
        const AUTO = 1 << 1;
        const SHUTTER_PRIORITY = 1 << 2;
        const APERTURE_PRIORITY = 1 << 3;
    }
}

impl ControlValue for AutoExposureMode {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        Self::from_bits_truncate(buf[0])
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.bits();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerLineFrequency {
    Disabled = 0,
    Freq50Hz = 1,
    Freq60Hz = 2,
    Auto = 3,
}

impl ControlValue for PowerLineFrequency {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0 => Self::Disabled,
            1 => Self::Freq50Hz,
            2 => Self::Freq60Hz,
            3 => Self::Auto,
            n => {
                log::warn!("invalid power line frequency value {}", n);
                Self::Disabled
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = (*self) as u8;
    }
}

/// Video Probe and Commit controls.
///
/// This is the UVC 1.0 part of the structure. UVC 1.1 and 1.5 devices expect longer transfers
/// (see [`ProbeCommitControls::wire_len`]); the fields past this prefix are sent as zeros and
/// otherwise passed through unchanged.
#[derive(Default, AsBytes, FromBytes, Debug, Clone, Copy)]
#[repr(C, packed)]
#[allow(non_snake_case)]
pub struct ProbeCommitControls {
    pub bmHint: ProbeHint,
    pub bFormatIndex: u8,
    pub bFrameIndex: u8,
    pub dwFrameInterval: u32,
    pub wKeyFrameRate: u16,
    pub wPFrameRate: u16,
    pub wCompQuality: u16,
    pub wCompWindowSize: u16,
    pub wDelay: u16,
    pub dwMaxVideoFrameSize: u32,
    pub dwMaxPayloadTransferSize: u32,
}

impl ControlValue for ProbeCommitControls {
    type Buf = ProbeCommitControlsBuf;

    fn decode(buf: &[u8]) -> Self {
        // `Buf` has exactly the size of `Self`
        Self::read_from(buf).unwrap_or_default()
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self.as_bytes());
    }
}

impl ProbeCommitControls {
    /// Size of the UVC 1.0 layout.
    pub const UVC10_LEN: usize = mem::size_of::<Self>();

    /// Returns the probe/commit transfer length a device of the given UVC version expects.
    pub fn wire_len(uvc_version: BcdVersion) -> usize {
        match uvc_version.0 {
            v if v < 0x0110 => Self::UVC10_LEN,
            v if v < 0x0150 => 34,
            _ => 48,
        }
    }

    pub(crate) fn to_wire(&self, uvc_version: BcdVersion) -> Vec<u8> {
        let mut buf = vec![0; Self::wire_len(uvc_version)];
        self.encode(&mut buf[..Self::UVC10_LEN]);
        buf
    }

    /// Decodes the UVC 1.0 prefix of a probe/commit transfer of any length.
    pub(crate) fn from_wire(buf: &[u8]) -> Option<Self> {
        Self::read_from_prefix(buf)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ProbeCommitControlsBuf([u8; mem::size_of::<ProbeCommitControls>()]);

impl Default for ProbeCommitControlsBuf {
    fn default() -> Self {
        Self([0; mem::size_of::<ProbeCommitControls>()])
    }
}

impl AsMut<[u8]> for ProbeCommitControlsBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

bitflags! {
    #[derive(Default, AsBytes, FromBytes)]
    #[repr(transparent)]
    pub struct ProbeHint: u16 {
        const FIX_FRAME_INTERVAL = 1 << 0;
        const FIX_KEY_FRAME_RATE = 1 << 1;
        const FIX_P_FRAME_RATE = 1 << 2;
        const FIX_COMP_QUALITY = 1 << 3;
        const FIX_COMP_WINDOW_SIZE = 1 << 4;
    }
}

/// Addresses the controls of one entity (or of a streaming interface, with entity ID 0).
#[derive(Clone, Copy)]
pub(crate) struct ControlTarget<'a> {
    device: &'a UvcDevice,
    interface: u8,
    entity: u8,
    read_action: Action,
    write_action: Action,
}

impl<'a> ControlTarget<'a> {
    pub(crate) fn entity(device: &'a UvcDevice, entity: u8) -> Self {
        Self {
            device,
            interface: device.control_interface_number(),
            entity,
            read_action: Action::ReadingControl,
            write_action: Action::WritingControl,
        }
    }

    pub(crate) fn streaming(device: &'a UvcDevice, interface: u8) -> Self {
        Self {
            device,
            interface,
            entity: 0,
            read_action: Action::StreamNegotiation,
            write_action: Action::StreamNegotiation,
        }
    }

    pub(crate) fn read_raw(&self, request: Request, selector: u8, buf: &mut [u8]) -> Result<usize> {
        self.device.read_interface_entity(
            self.interface,
            self.entity,
            request,
            selector,
            buf,
            self.read_action,
        )
    }

    pub(crate) fn write_raw(&self, selector: u8, data: &[u8]) -> Result<()> {
        self.device.set_interface_entity(
            self.interface,
            self.entity,
            selector,
            data,
            self.write_action,
        )
    }

    pub(crate) fn read<V: ControlValue>(&self, request: Request, selector: u8) -> Result<V> {
        let mut buf = V::Buf::default();
        let buf = buf.as_mut();
        let n = self.read_raw(request, selector, buf)?;
        if n != buf.len() {
            return err(
                ErrorKind::InvalidDevice(format!(
                    "{:?}(control {:#04x}) returned {} bytes, expected {}",
                    request,
                    selector,
                    n,
                    buf.len()
                )),
                self.read_action,
            );
        }
        Ok(V::decode(buf))
    }

    pub(crate) fn write<V: ControlValue>(&self, selector: u8, value: &V) -> Result<()> {
        let mut buf = V::Buf::default();
        let buf = buf.as_mut();
        value.encode(buf);
        self.write_raw(selector, buf)
    }
}

/// Generates the `GET_*`/`SET_CUR` accessor methods shared by entity wrappers.
///
/// The wrapper needs a `target(&self) -> ControlTarget<'_>` method.
macro_rules! control_accessors {
    ($bound:ident) => {
        pub fn read_control<C: $bound>(&self) -> crate::Result<C::Value> {
            self.target().read(crate::control::Request::GetCur, C::ID as u8)
        }

        pub fn read_control_min<C: $bound>(&self) -> crate::Result<C::Value> {
            self.target().read(crate::control::Request::GetMin, C::ID as u8)
        }

        pub fn read_control_max<C: $bound>(&self) -> crate::Result<C::Value> {
            self.target().read(crate::control::Request::GetMax, C::ID as u8)
        }

        pub fn read_control_res<C: $bound>(&self) -> crate::Result<C::Value> {
            self.target().read(crate::control::Request::GetRes, C::ID as u8)
        }

        pub fn read_control_default<C: $bound>(&self) -> crate::Result<C::Value> {
            self.target().read(crate::control::Request::GetDef, C::ID as u8)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<V: ControlValue>(value: &V) -> (Vec<u8>, V) {
        let mut buf = V::Buf::default();
        value.encode(buf.as_mut());
        let bytes = buf.as_mut().to_vec();
        (bytes.clone(), V::decode(&bytes))
    }

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(round_trip(&200u16).0, vec![200, 0]);
        assert_eq!(round_trip(&6500u16).0, vec![0x64, 0x19]);
        let (bytes, value) = round_trip(&-5i16);
        assert_eq!(bytes, vec![0xfb, 0xff]);
        assert_eq!(value, -5);
    }

    #[test]
    fn invalid_bool_decodes_as_true() {
        assert!(!bool::decode(&[0]));
        assert!(bool::decode(&[1]));
        assert!(bool::decode(&[7]));
    }

    #[test]
    fn manual_exposure_mode_is_bit_zero() {
        let (bytes, _) = round_trip(&AutoExposureMode::MANUAL);
        assert_eq!(bytes, vec![1]);
        assert_eq!(
            AutoExposureMode::decode(&[0x0f]),
            AutoExposureMode::all()
        );
    }

    #[test]
    fn probe_commit_layout() {
        assert_eq!(mem::size_of::<ProbeCommitControls>(), 26);

        let controls = ProbeCommitControls {
            bmHint: ProbeHint::FIX_FRAME_INTERVAL,
            bFormatIndex: 1,
            bFrameIndex: 2,
            dwFrameInterval: 333_333,
            dwMaxVideoFrameSize: 614_400,
            ..Default::default()
        };
        let (bytes, decoded) = round_trip(&controls);
        assert_eq!(&bytes[0..4], &[0x01, 0x00, 0x01, 0x02]);
        assert_eq!(&bytes[4..8], &333_333u32.to_le_bytes());
        assert_eq!(&bytes[18..22], &614_400u32.to_le_bytes());
        let interval = decoded.dwFrameInterval;
        assert_eq!(interval, 333_333);
    }

    #[test]
    fn probe_commit_length_follows_uvc_version() {
        assert_eq!(ProbeCommitControls::wire_len(BcdVersion(0x0100)), 26);
        assert_eq!(ProbeCommitControls::wire_len(BcdVersion(0x0110)), 34);
        assert_eq!(ProbeCommitControls::wire_len(BcdVersion(0x0150)), 48);

        let controls = ProbeCommitControls {
            bFormatIndex: 1,
            bFrameIndex: 3,
            ..Default::default()
        };
        let wire = controls.to_wire(BcdVersion(0x0110));
        assert_eq!(wire.len(), 34);
        assert_eq!(&wire[2..4], &[1, 3]);
        assert!(wire[26..].iter().all(|&b| b == 0));
    }

    #[test]
    fn long_probe_answers_decode_their_prefix() {
        let mut wire = vec![0xee; 48];
        wire[..26].copy_from_slice(ProbeCommitControls::default().as_bytes());
        wire[2] = 2;
        wire[18..22].copy_from_slice(&1_843_200u32.to_le_bytes());
        let decoded = ProbeCommitControls::from_wire(&wire).unwrap();
        assert_eq!(decoded.bFormatIndex, 2);
        let size = decoded.dwMaxVideoFrameSize;
        assert_eq!(size, 1_843_200);

        assert!(ProbeCommitControls::from_wire(&wire[..25]).is_none());
    }
}
