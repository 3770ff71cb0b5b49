use crate::{
    control::{ControlTarget, ControlValue},
    topo::{ProcessingUnitControls, ProcessingUnitDesc, ProcessingUnitId},
    Result, UvcDevice,
};

/// Grants access to a processing unit.
pub struct ProcessingUnit<'a> {
    device: &'a UvcDevice,
    desc: &'a ProcessingUnitDesc,
}

impl<'a> ProcessingUnit<'a> {
    pub(crate) fn new(device: &'a UvcDevice, desc: &'a ProcessingUnitDesc) -> Self {
        Self { device, desc }
    }

    pub fn id(&self) -> ProcessingUnitId {
        self.desc.id()
    }

    pub fn is_supported<C: ProcessingUnitControl>(&self) -> bool {
        self.desc.controls().contains(C::FLAG)
    }

    control_accessors!(ProcessingUnitControl);

    pub fn set_control<C: ProcessingUnitControl>(&mut self, value: C::Value) -> Result<()> {
        if !self.is_supported::<C>() {
            log::debug!(
                "processing unit {:?} does not advertise {:?}, sending anyway",
                self.id(),
                C::ID
            );
        }
        log::trace!("SET_CUR({:?}) on processing unit {:?}", C::ID, self.id());
        self.target().write(C::ID as u8, &value)
    }

    fn target(&self) -> ControlTarget<'_> {
        ControlTarget::entity(self.device, self.desc.id().as_raw())
    }
}

/// Processing unit control selectors.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum ControlId {
    BacklightCompensation = 0x01,
    Brightness = 0x02,
    Contrast = 0x03,
    Gain = 0x04,
    PowerLineFrequency = 0x05,
    Hue = 0x06,
    Saturation = 0x07,
    Sharpness = 0x08,
    Gamma = 0x09,
    WhiteBalanceTemperature = 0x0A,
    WhiteBalanceTemperatureAuto = 0x0B,
}

pub trait ProcessingUnitControl {
    type Value: ControlValue;
    const ID: ControlId;
    const FLAG: ProcessingUnitControls;
}

macro_rules! pu_control {
    ($(#[$attr:meta])* $name:ident: $value:ty => $flag:ident) => {
        $(#[$attr])*
        pub struct $name;
        impl ProcessingUnitControl for $name {
            type Value = $value;
            const ID: ControlId = ControlId::$name;
            const FLAG: ProcessingUnitControls = ProcessingUnitControls::$flag;
        }
    };
}

pu_control!(BacklightCompensation: u16 => BACKLIGHT_COMPENSATION);
pu_control!(
    /// Signed brightness offset; the range is device specific.
    Brightness: i16 => BRIGHTNESS
);
pu_control!(Contrast: u16 => CONTRAST);
pu_control!(Gain: u16 => GAIN);
pu_control!(PowerLineFrequency: crate::control::PowerLineFrequency => POWER_LINE_FREQUENCY);
pu_control!(Hue: i16 => HUE);
pu_control!(Saturation: u16 => SATURATION);
pu_control!(Sharpness: u16 => SHARPNESS);
pu_control!(Gamma: u16 => GAMMA);
pu_control!(
    /// White balance color temperature in Kelvin.
    WhiteBalanceTemperature: u16 => WHITE_BALANCE_TEMPERATURE
);
pu_control!(
    /// Automatic white balance temperature adjustment.
    WhiteBalanceTemperatureAuto: bool => WHITE_BALANCE_TEMPERATURE_AUTO
);
