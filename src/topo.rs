//! UVC device topology.
//!
//! The Video Control interface describes a graph of *terminals* (video sources and sinks) and
//! *units* (processing nodes between them). This crate only gives typed access to the two entity
//! kinds that carry the image controls it needs: camera input terminals and processing units.
//! Everything else is recorded by ID and kind only.
//!
//! The Video Streaming interfaces describe the formats and frame sizes a device can deliver.

pub(crate) mod parse;

use std::{num::NonZeroU8, time::Duration};

use bitflags::bitflags;
use uuid::Uuid;

use crate::{frame::FrameFormat, util::BcdVersion};

/// Identifies a camera input terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraId(NonZeroU8);

impl CameraId {
    pub(crate) fn as_raw(self) -> u8 {
        self.0.get()
    }
}

/// Identifies a processing unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessingUnitId(NonZeroU8);

impl ProcessingUnitId {
    pub(crate) fn as_raw(self) -> u8 {
        self.0.get()
    }
}

/// The device topology as reported by the Video Control interface descriptors.
#[derive(Debug)]
pub struct Topology {
    header: ControlHeader,
    camera_terminals: Vec<CameraTerminalDesc>,
    processing_units: Vec<ProcessingUnitDesc>,
    other_entities: Vec<EntityDesc>,
}

impl Topology {
    pub fn uvc_version(&self) -> BcdVersion {
        self.header.uvc_version
    }

    pub fn clock_frequency_hz(&self) -> u32 {
        self.header.clock_freq_hz
    }

    /// Interface numbers of the Video Streaming interfaces listed in the header.
    pub fn streaming_interface_numbers(&self) -> &[u8] {
        &self.header.streaming_interfaces
    }

    pub fn camera_terminals(&self) -> &[CameraTerminalDesc] {
        &self.camera_terminals
    }

    pub fn processing_units(&self) -> &[ProcessingUnitDesc] {
        &self.processing_units
    }

    /// Terminals and units without typed control access.
    pub fn other_entities(&self) -> &[EntityDesc] {
        &self.other_entities
    }

    pub fn first_camera_terminal(&self) -> Option<&CameraTerminalDesc> {
        self.camera_terminals.first()
    }

    pub fn first_processing_unit(&self) -> Option<&ProcessingUnitDesc> {
        self.processing_units.first()
    }

    pub fn camera_terminal_by_id(&self, id: CameraId) -> Option<&CameraTerminalDesc> {
        self.camera_terminals.iter().find(|cam| cam.id == id)
    }

    pub fn processing_unit_by_id(&self, id: ProcessingUnitId) -> Option<&ProcessingUnitDesc> {
        self.processing_units.iter().find(|pu| pu.id == id)
    }
}

#[derive(Debug)]
pub struct ControlHeader {
    uvc_version: BcdVersion,
    clock_freq_hz: u32,
    streaming_interfaces: Vec<u8>,
}

/// A terminal or unit that has no typed accessor.
#[derive(Debug)]
pub struct EntityDesc {
    id: u8,
    kind: EntityKind,
}

impl EntityDesc {
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum EntityKind {
    /// An input terminal that is not a camera, with its `wTerminalType`.
    InputTerminal(u16),
    OutputTerminal(u16),
    Selector,
    Extension(Uuid),
}

#[derive(Debug)]
pub struct CameraTerminalDesc {
    id: CameraId,
    objective_focal_length_min: u16,
    objective_focal_length_max: u16,
    ocular_focal_length: u16,
    controls: CameraControls,
}

impl CameraTerminalDesc {
    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn controls(&self) -> CameraControls {
        self.controls
    }

    /// Objective focal length range `(L_min, L_max)`, 0 if optical zoom is unsupported.
    pub fn objective_focal_length(&self) -> (u16, u16) {
        (
            self.objective_focal_length_min,
            self.objective_focal_length_max,
        )
    }

    pub fn ocular_focal_length(&self) -> u16 {
        self.ocular_focal_length
    }
}

bitflags! {
    pub struct CameraControls: u32 {
        const SCANNING_MODE = 1 << 0;
        const AUTO_EXPOSURE_MODE = 1 << 1;
        const AUTO_EXPOSURE_PRIORITY = 1 << 2;
        const EXPOSURE_TIME_ABS = 1 << 3;
        const EXPOSURE_TIME_REL = 1 << 4;
        const FOCUS_ABS = 1 << 5;
        const FOCUS_REL = 1 << 6;
        const IRIS_ABS = 1 << 7;
        const IRIS_REL = 1 << 8;
        const ZOOM_ABS = 1 << 9;
        const ZOOM_REL = 1 << 10;
        const PAN_TILT_ABS = 1 << 11;
        const PAN_TILT_REL = 1 << 12;
        const ROLL_ABS = 1 << 13;
        const ROLL_REL = 1 << 14;

        const FOCUS_AUTO = 1 << 17;
        const PRIVACY = 1 << 18;
        const FOCUS_SIMPLE = 1 << 19;
        const WINDOW = 1 << 20;
        const REGION_OF_INTEREST = 1 << 21;
    }
}

#[derive(Debug)]
pub struct ProcessingUnitDesc {
    id: ProcessingUnitId,
    source: u8,
    max_multiplier: u16,
    controls: ProcessingUnitControls,
}

impl ProcessingUnitDesc {
    pub fn id(&self) -> ProcessingUnitId {
        self.id
    }

    /// ID of the terminal or unit feeding this processing unit.
    pub fn source_id(&self) -> u8 {
        self.source
    }

    /// Digital zoom multiplier limit times 100, 0 if digital zoom is unsupported.
    pub fn max_multiplier(&self) -> u16 {
        self.max_multiplier
    }

    pub fn controls(&self) -> ProcessingUnitControls {
        self.controls
    }
}

bitflags! {
    pub struct ProcessingUnitControls: u32 {
        const BRIGHTNESS                     = 1 << 0;
        const CONTRAST                       = 1 << 1;
        const HUE                            = 1 << 2;
        const SATURATION                     = 1 << 3;
        const SHARPNESS                      = 1 << 4;
        const GAMMA                          = 1 << 5;
        const WHITE_BALANCE_TEMPERATURE      = 1 << 6;
        const WHITE_BALANCE_COMPONENT        = 1 << 7;
        const BACKLIGHT_COMPENSATION         = 1 << 8;
        const GAIN                           = 1 << 9;
        const POWER_LINE_FREQUENCY           = 1 << 10;
        const HUE_AUTO                       = 1 << 11;
        const WHITE_BALANCE_TEMPERATURE_AUTO = 1 << 12;
        const WHITE_BALANCE_COMPONENT_AUTO   = 1 << 13;
        const DIGITAL_MULTIPLIER             = 1 << 14;
        const DIGITAL_MULTIPLIER_LIMIT       = 1 << 15;
        const ANALOG_VIDEO_STANDARD          = 1 << 16;
        const ANALOG_VIDEO_LOCK_STATUS       = 1 << 17;
        const CONTRAST_AUTO                  = 1 << 18;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingInterfaceId(pub(crate) u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Device to host (a camera).
    Input,
    /// Host to device.
    Output,
}

#[derive(Debug)]
pub struct StreamingInterfaceDesc {
    id: StreamingInterfaceId,
    direction: StreamDirection,
    endpoint_address: u8,
    terminal_link: u8,
    formats: Vec<FormatDesc>,
}

impl StreamingInterfaceDesc {
    pub fn id(&self) -> StreamingInterfaceId {
        self.id
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    pub fn endpoint_address(&self) -> u8 {
        self.endpoint_address
    }

    /// ID of the output terminal this interface is connected to.
    pub fn terminal_link(&self) -> u8 {
        self.terminal_link
    }

    pub fn formats(&self) -> &[FormatDesc] {
        &self.formats
    }

    pub fn format_by_index(&self, index: FormatIndex) -> Option<&FormatDesc> {
        self.formats.iter().find(|f| f.index == index)
    }

    /// Returns the frame descriptors of `format`, or an empty slice if there is no such format.
    pub fn frames_of(&self, format: FormatIndex) -> &[FrameDesc] {
        self.format_by_index(format)
            .map(FormatDesc::frames)
            .unwrap_or_default()
    }

    /// Finds the first frame descriptor with the given format and size.
    pub fn find_frame(
        &self,
        format: FrameFormat,
        width: u16,
        height: u16,
    ) -> Option<(&FormatDesc, &FrameDesc)> {
        self.formats
            .iter()
            .filter(|f| f.frame_format == format)
            .find_map(|f| {
                f.frames
                    .iter()
                    .find(|fr| fr.width == width && fr.height == height)
                    .map(|fr| (f, fr))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatIndex(pub(crate) u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIndex(pub(crate) u8);

#[derive(Debug)]
pub struct FormatDesc {
    index: FormatIndex,
    kind: FormatKind,
    frame_format: FrameFormat,
    bits_per_pixel: u8,
    default_frame_index: FrameIndex,
    frames: Vec<FrameDesc>,
}

impl FormatDesc {
    pub fn index(&self) -> FormatIndex {
        self.index
    }

    pub fn kind(&self) -> &FormatKind {
        &self.kind
    }

    pub fn frame_format(&self) -> FrameFormat {
        self.frame_format
    }

    /// Bits per pixel, or 0 for MJPEG where the descriptor doesn't state it.
    pub fn bits_per_pixel(&self) -> u8 {
        self.bits_per_pixel
    }

    pub fn frames(&self) -> &[FrameDesc] {
        &self.frames
    }

    pub fn frame_by_index(&self, index: FrameIndex) -> Option<&FrameDesc> {
        self.frames.iter().find(|f| f.index == index)
    }

    pub fn default_frame(&self) -> Option<&FrameDesc> {
        self.frame_by_index(self.default_frame_index)
            .or_else(|| self.frames.first())
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum FormatKind {
    Uncompressed { guid: Uuid },
    Mjpeg,
    FrameBased { guid: Uuid, variable_size: bool },
}

#[derive(Debug)]
pub struct FrameDesc {
    index: FrameIndex,
    width: u16,
    height: u16,
    max_video_frame_buffer_size: u32,
    default_frame_interval: Duration,
    frame_intervals: SupportedFrameIntervals,
}

impl FrameDesc {
    pub fn index(&self) -> FrameIndex {
        self.index
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Largest frame size in bytes, 0 if the descriptor doesn't say (frame-based formats).
    pub fn max_video_frame_buffer_size(&self) -> u32 {
        self.max_video_frame_buffer_size
    }

    pub fn default_frame_interval(&self) -> Duration {
        self.default_frame_interval
    }

    pub fn frame_intervals(&self) -> &SupportedFrameIntervals {
        &self.frame_intervals
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SupportedFrameIntervals {
    Continuous {
        min_frame_interval: Duration,
        max_frame_interval: Duration,
        frame_interval_step: Duration,
    },

    Discrete {
        supported_frame_intervals: Vec<Duration>,
    },
}
