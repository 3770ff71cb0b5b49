use crate::{
    control::{ControlTarget, ControlValue},
    topo::{CameraControls, CameraId, CameraTerminalDesc},
    Result, UvcDevice,
};

/// Grants access to a camera input terminal.
pub struct CameraTerminal<'a> {
    device: &'a UvcDevice,
    desc: &'a CameraTerminalDesc,
}

impl<'a> CameraTerminal<'a> {
    pub(crate) fn new(device: &'a UvcDevice, desc: &'a CameraTerminalDesc) -> Self {
        Self { device, desc }
    }

    pub fn id(&self) -> CameraId {
        self.desc.id()
    }

    /// Returns whether the terminal descriptor advertises control `C`.
    pub fn is_supported<C: CameraControl>(&self) -> bool {
        self.desc.controls().contains(C::FLAG)
    }

    control_accessors!(CameraControl);

    pub fn set_control<C: CameraControl>(&mut self, value: C::Value) -> Result<()> {
        if !self.is_supported::<C>() {
            log::debug!(
                "camera terminal {:?} does not advertise {:?}, sending anyway",
                self.id(),
                C::ID
            );
        }
        log::trace!("SET_CUR({:?}) on camera terminal {:?}", C::ID, self.id());
        self.target().write(C::ID as u8, &value)
    }

    fn target(&self) -> ControlTarget<'_> {
        ControlTarget::entity(self.device, self.desc.id().as_raw())
    }
}

/// Camera terminal control selectors.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum ControlId {
    ScanningMode = 0x01,
    AutoExposureMode = 0x02,
    AutoExposurePriority = 0x03,
    ExposureTimeAbs = 0x04,
    FocusAbs = 0x06,
    FocusAuto = 0x08,
    ZoomAbs = 0x0B,
    Privacy = 0x11,
}

pub trait CameraControl {
    type Value: ControlValue;
    const ID: ControlId;
    const FLAG: CameraControls;
}

macro_rules! camera_control {
    ($(#[$attr:meta])* $name:ident: $value:ty => $flag:ident) => {
        $(#[$attr])*
        pub struct $name;
        impl CameraControl for $name {
            type Value = $value;
            const ID: ControlId = ControlId::$name;
            const FLAG: CameraControls = CameraControls::$flag;
        }
    };
}

camera_control!(ScanningMode: bool => SCANNING_MODE);
camera_control!(AutoExposureMode: crate::control::AutoExposureMode => AUTO_EXPOSURE_MODE);
camera_control!(AutoExposurePriority: u8 => AUTO_EXPOSURE_PRIORITY);
camera_control!(
    /// Exposure time in units of 100µs.
    ExposureTimeAbs: u32 => EXPOSURE_TIME_ABS
);
camera_control!(FocusAbs: u16 => FOCUS_ABS);
camera_control!(FocusAuto: bool => FOCUS_AUTO);
camera_control!(ZoomAbs: u16 => ZOOM_ABS);
camera_control!(Privacy: bool => PRIVACY);
