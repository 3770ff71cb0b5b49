use std::io;

use byteorder::{ReadBytesExt, LE};

use crate::{
    error::*,
    util::{io_err_res, split_descriptors, BcdVersion, BytesExt},
    Result,
};

use super::*;

/// The value of `bDescriptorType` of all descriptors we're interested in.
const VIDEO_INTERFACE_DESC_TYPE: u8 = 36;

const CONTROL_DESC_SUBTYPE_HEADER: u8 = 0x01;
const CONTROL_DESC_SUBTYPE_INPUT_TERMINAL: u8 = 0x02;
const CONTROL_DESC_SUBTYPE_OUTPUT_TERMINAL: u8 = 0x03;
const CONTROL_DESC_SUBTYPE_SELECTOR_UNIT: u8 = 0x04;
const CONTROL_DESC_SUBTYPE_PROCESSING_UNIT: u8 = 0x05;
const CONTROL_DESC_SUBTYPE_EXTENSION_UNIT: u8 = 0x06;

const STREAM_DESC_SUBTYPE_INPUT_HEADER: u8 = 0x01;
const STREAM_DESC_SUBTYPE_OUTPUT_HEADER: u8 = 0x02;
const STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED: u8 = 0x04;
const STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED: u8 = 0x05;
const STREAM_DESC_SUBTYPE_FORMAT_MJPEG: u8 = 0x06;
const STREAM_DESC_SUBTYPE_FRAME_MJPEG: u8 = 0x07;
const STREAM_DESC_SUBTYPE_FORMAT_FRAME_BASED: u8 = 0x10;
const STREAM_DESC_SUBTYPE_FRAME_FRAME_BASED: u8 = 0x11;

const INPUT_TERMINAL_TYPE_CAMERA: u16 = 0x0201;

fn invalid_descriptor(e: io::Error) -> Error {
    Error::with_action(
        ErrorKind::InvalidDevice(e.to_string()),
        Action::AccessingDeviceDescriptor,
    )
}

/// Runs `parse` on a class-specific descriptor body (starting at `bDescriptorSubtype`).
///
/// Some firmware reports descriptors that are a few bytes shorter than the layout they
/// announce. If parsing runs out of data, it is retried once with zero padding.
fn parse_padded<F>(raw: &[u8], mut parse: F) -> io::Result<()>
where
    F: FnMut(&[u8]) -> io::Result<()>,
{
    match parse(raw) {
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            log::warn!("UVC descriptor too short, please report a bug to the device manufacturer");
            log::debug!("descriptor data: {:02x?}", raw);

            let mut buf = vec![0; raw.len() + 100];
            buf[..raw.len()].copy_from_slice(raw);

            parse(&buf)
        }
        res => res,
    }
}

/// Parses the class-specific descriptors of a Video Control interface.
pub(crate) fn parse_control_interface(extra: &[u8]) -> Result<Topology> {
    let mut parser = ControlDescParser::default();
    for (ty, data) in split_descriptors(extra) {
        if ty == VIDEO_INTERFACE_DESC_TYPE && data.len() > 2 {
            parse_padded(&data[2..], |raw| parser.parse_descriptor(raw))
                .map_err(invalid_descriptor)?;
        } else {
            log::debug!("skipping descriptor of type {}", ty);
        }
    }

    let header = match parser.header {
        Some(header) => header,
        None => {
            return err(
                ErrorKind::InvalidDevice("missing VC_HEADER descriptor".into()),
                Action::AccessingDeviceDescriptor,
            );
        }
    };

    Ok(Topology {
        header,
        camera_terminals: parser.camera_terminals,
        processing_units: parser.processing_units,
        other_entities: parser.other_entities,
    })
}

#[derive(Default)]
struct ControlDescParser {
    header: Option<ControlHeader>,
    camera_terminals: Vec<CameraTerminalDesc>,
    processing_units: Vec<ProcessingUnitDesc>,
    other_entities: Vec<EntityDesc>,
}

impl ControlDescParser {
    fn parse_descriptor(&mut self, mut raw: &[u8]) -> io::Result<()> {
        let subtype = raw.read_u8()?;
        match subtype {
            CONTROL_DESC_SUBTYPE_HEADER => {
                if self.header.is_some() {
                    return io_err_res("duplicate VC_HEADER descriptor");
                }

                let uvc_version = BcdVersion(raw.read_u16::<LE>()?);
                let _total_len = raw.read_u16::<LE>()?;
                let clock_freq_hz = raw.read_u32::<LE>()?;
                let count = raw.read_u8()?;
                let streaming_interfaces = (0..count)
                    .map(|_| raw.read_u8())
                    .collect::<io::Result<Vec<_>>>()?;

                log::debug!("UVC {}, clock {} Hz", uvc_version, clock_freq_hz);
                self.header = Some(ControlHeader {
                    uvc_version,
                    clock_freq_hz,
                    streaming_interfaces,
                });
            }
            CONTROL_DESC_SUBTYPE_INPUT_TERMINAL => {
                let id = raw.read_nonzero_id("bTerminalID")?;
                let term_type = raw.read_u16::<LE>()?;
                let _assoc = raw.read_u8()?;
                let _string = raw.read_u8()?;

                if term_type == INPUT_TERMINAL_TYPE_CAMERA {
                    self.camera_terminals.push(CameraTerminalDesc {
                        id: CameraId(id),
                        objective_focal_length_min: raw.read_u16::<LE>()?,
                        objective_focal_length_max: raw.read_u16::<LE>()?,
                        ocular_focal_length: raw.read_u16::<LE>()?,
                        controls: CameraControls::from_bits_truncate(
                            raw.read_length_prefixed_bitmask()?,
                        ),
                    });
                } else {
                    self.other_entities.push(EntityDesc {
                        id: id.get(),
                        kind: EntityKind::InputTerminal(term_type),
                    });
                }
            }
            CONTROL_DESC_SUBTYPE_OUTPUT_TERMINAL => {
                let id = raw.read_nonzero_id("bTerminalID")?;
                let term_type = raw.read_u16::<LE>()?;
                self.other_entities.push(EntityDesc {
                    id: id.get(),
                    kind: EntityKind::OutputTerminal(term_type),
                });
            }
            CONTROL_DESC_SUBTYPE_SELECTOR_UNIT => {
                let id = raw.read_nonzero_id("bUnitID")?;
                self.other_entities.push(EntityDesc {
                    id: id.get(),
                    kind: EntityKind::Selector,
                });
            }
            CONTROL_DESC_SUBTYPE_PROCESSING_UNIT => {
                // UVC 1.0 devices end the descriptor after `iProcessing`; `bmVideoStandards` is
                // not read.
                let id = raw.read_nonzero_id("bUnitID")?;
                self.processing_units.push(ProcessingUnitDesc {
                    id: ProcessingUnitId(id),
                    source: raw.read_nonzero_id("bSourceID")?.get(),
                    max_multiplier: raw.read_u16::<LE>()?,
                    controls: ProcessingUnitControls::from_bits_truncate(
                        raw.read_length_prefixed_bitmask()?,
                    ),
                });
            }
            CONTROL_DESC_SUBTYPE_EXTENSION_UNIT => {
                let id = raw.read_nonzero_id("bUnitID")?;
                let guid = raw.read_guid()?;
                self.other_entities.push(EntityDesc {
                    id: id.get(),
                    kind: EntityKind::Extension(guid),
                });
            }
            _ => log::debug!("skipping Video Control descriptor subtype {}", subtype),
        }

        Ok(())
    }
}

/// Parses the class-specific descriptors of a Video Streaming interface.
pub(crate) fn parse_streaming_interface(
    interface_number: u8,
    extra: &[u8],
) -> Result<StreamingInterfaceDesc> {
    let mut parser = StreamingDescParser::default();

    for (ty, data) in split_descriptors(extra) {
        if ty == VIDEO_INTERFACE_DESC_TYPE && data.len() > 2 {
            parse_padded(&data[2..], |raw| parser.parse_descriptor(raw))
                .map_err(invalid_descriptor)?;
        } else {
            log::debug!("skipping descriptor of type {}", ty);
        }
    }

    let header = match parser.header {
        Some(header) => header,
        None => {
            return err(
                ErrorKind::InvalidDevice(format!(
                    "missing header in Video Streaming interface {}",
                    interface_number
                )),
                Action::AccessingDeviceDescriptor,
            )
        }
    };

    if header.num_formats as usize != parser.formats.len() {
        log::warn!(
            "streaming interface {} announces {} formats, found {}",
            interface_number,
            header.num_formats,
            parser.formats.len()
        );
    }

    Ok(StreamingInterfaceDesc {
        id: StreamingInterfaceId(interface_number),
        direction: header.direction,
        endpoint_address: header.endpoint_address,
        terminal_link: header.terminal_link,
        formats: parser.formats,
    })
}

struct StreamingHeader {
    direction: StreamDirection,
    num_formats: u8,
    endpoint_address: u8,
    terminal_link: u8,
}

#[derive(Default)]
struct StreamingDescParser {
    header: Option<StreamingHeader>,
    formats: Vec<FormatDesc>,
}

impl StreamingDescParser {
    fn parse_descriptor(&mut self, mut raw: &[u8]) -> io::Result<()> {
        let subtype = raw.read_u8()?;
        match subtype {
            STREAM_DESC_SUBTYPE_INPUT_HEADER | STREAM_DESC_SUBTYPE_OUTPUT_HEADER => {
                if self.header.is_some() {
                    return io_err_res("duplicate Video Streaming header descriptor");
                }

                let num_formats = raw.read_u8()?;
                let _total_length = raw.read_u16::<LE>()?;
                let endpoint_address = raw.read_u8()?;
                let direction = if subtype == STREAM_DESC_SUBTYPE_INPUT_HEADER {
                    let _info = raw.read_u8()?;
                    StreamDirection::Input
                } else {
                    StreamDirection::Output
                };
                let terminal_link = raw.read_nonzero_id("bTerminalLink")?.get();

                self.header = Some(StreamingHeader {
                    direction,
                    num_formats,
                    endpoint_address,
                    terminal_link,
                });
            }
            STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED | STREAM_DESC_SUBTYPE_FORMAT_FRAME_BASED => {
                let index = FormatIndex(raw.read_u8()?);
                let _num_frames = raw.read_u8()?;
                let guid = raw.read_guid()?;
                let bits_per_pixel = raw.read_u8()?;
                let default_frame_index = FrameIndex(raw.read_u8()?);
                let _aspect_x = raw.read_u8()?;
                let _aspect_y = raw.read_u8()?;
                let _interlace = raw.read_u8()?;
                let _copy_protect = raw.read_u8()?;

                let kind = if subtype == STREAM_DESC_SUBTYPE_FORMAT_UNCOMPRESSED {
                    FormatKind::Uncompressed { guid }
                } else {
                    FormatKind::FrameBased {
                        guid,
                        variable_size: raw.read_u8()? != 0,
                    }
                };

                self.formats.push(FormatDesc {
                    index,
                    kind,
                    frame_format: FrameFormat::from_guid(&guid),
                    bits_per_pixel,
                    default_frame_index,
                    frames: Vec::new(),
                });
            }
            STREAM_DESC_SUBTYPE_FORMAT_MJPEG => {
                let index = FormatIndex(raw.read_u8()?);
                let _num_frames = raw.read_u8()?;
                let _flags = raw.read_u8()?;
                let default_frame_index = FrameIndex(raw.read_u8()?);

                self.formats.push(FormatDesc {
                    index,
                    kind: FormatKind::Mjpeg,
                    frame_format: FrameFormat::Mjpeg,
                    bits_per_pixel: 0,
                    default_frame_index,
                    frames: Vec::new(),
                });
            }
            STREAM_DESC_SUBTYPE_FRAME_UNCOMPRESSED
            | STREAM_DESC_SUBTYPE_FRAME_MJPEG
            | STREAM_DESC_SUBTYPE_FRAME_FRAME_BASED => {
                let frame = parse_frame(subtype == STREAM_DESC_SUBTYPE_FRAME_FRAME_BASED, raw)?;
                match self.formats.last_mut() {
                    Some(format) => format.frames.push(frame),
                    None => return io_err_res("frame descriptor precedes any format descriptor"),
                }
            }
            _ => log::debug!("skipping Video Streaming descriptor subtype {}", subtype),
        }

        Ok(())
    }
}

fn parse_frame(frame_based: bool, mut raw: &[u8]) -> io::Result<FrameDesc> {
    let index = FrameIndex(raw.read_u8()?);
    let _capabilities = raw.read_u8()?;
    let width = raw.read_u16::<LE>()?;
    let height = raw.read_u16::<LE>()?;
    let _min_bit_rate = raw.read_u32::<LE>()?;
    let _max_bit_rate = raw.read_u32::<LE>()?;
    let max_video_frame_buffer_size = if frame_based {
        0
    } else {
        raw.read_u32::<LE>()?
    };
    let default_frame_interval = raw.read_time_100ns()?;
    let interval_type = raw.read_u8()?;
    if frame_based {
        let _bytes_per_line = raw.read_u32::<LE>()?;
    }

    let frame_intervals = match interval_type {
        0 => SupportedFrameIntervals::Continuous {
            min_frame_interval: raw.read_time_100ns()?,
            max_frame_interval: raw.read_time_100ns()?,
            frame_interval_step: raw.read_time_100ns()?,
        },
        n => SupportedFrameIntervals::Discrete {
            supported_frame_intervals: (0..n)
                .map(|_| raw.read_time_100ns())
                .collect::<io::Result<Vec<_>>>()?,
        },
    };

    Ok(FrameDesc {
        index,
        width,
        height,
        max_video_frame_buffer_size,
        default_frame_interval,
        frame_intervals,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Wraps a descriptor body in `bLength` and `CS_INTERFACE`.
    fn cs(body: &[u8]) -> Vec<u8> {
        let mut desc = vec![body.len() as u8 + 2, VIDEO_INTERFACE_DESC_TYPE];
        desc.extend_from_slice(body);
        desc
    }

    fn control_descriptors() -> Vec<u8> {
        let mut raw = Vec::new();
        // VC_HEADER: UVC 1.10, clock 48 MHz, one streaming interface (1)
        raw.extend(cs(&[0x01, 0x10, 0x01, 0x4d, 0x00, 0x00, 0x6c, 0xdc, 0x02, 0x01, 0x01]));
        // camera terminal 1: AE mode + exposure abs + focus auto
        raw.extend(cs(&[
            0x02, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x0a,
            0x00, 0x02,
        ]));
        // processing unit 2, source 1: brightness, gain, WB temp, WB temp auto
        raw.extend(cs(&[0x05, 0x02, 0x01, 0x00, 0x40, 0x02, 0x41, 0x12, 0x00]));
        // output terminal 3 (USB streaming), source 2
        raw.extend(cs(&[0x03, 0x03, 0x01, 0x01, 0x00, 0x02, 0x00]));
        // an unrelated standard endpoint descriptor
        raw.extend(&[0x07, 0x05, 0x83, 0x03, 0x10, 0x00, 0x08]);
        raw
    }

    #[test]
    fn parses_camera_and_processing_unit() {
        let topo = parse_control_interface(&control_descriptors()).unwrap();
        assert_eq!(topo.uvc_version().to_string(), "1.10");
        assert_eq!(topo.clock_frequency_hz(), 48_000_000);
        assert_eq!(topo.streaming_interface_numbers(), &[1]);

        let cam = topo.first_camera_terminal().unwrap();
        assert_eq!(cam.id().as_raw(), 1);
        assert!(cam.controls().contains(CameraControls::AUTO_EXPOSURE_MODE));
        assert!(cam.controls().contains(CameraControls::EXPOSURE_TIME_ABS));
        assert!(cam.controls().contains(CameraControls::FOCUS_AUTO));
        assert!(!cam.controls().contains(CameraControls::ZOOM_ABS));

        let pu = topo.first_processing_unit().unwrap();
        assert_eq!(pu.id().as_raw(), 2);
        assert_eq!(pu.source_id(), 1);
        assert_eq!(pu.max_multiplier(), 0x4000);
        let c = pu.controls();
        assert!(c.contains(ProcessingUnitControls::BRIGHTNESS));
        assert!(c.contains(ProcessingUnitControls::GAIN));
        assert!(c.contains(ProcessingUnitControls::WHITE_BALANCE_TEMPERATURE));
        assert!(c.contains(ProcessingUnitControls::WHITE_BALANCE_TEMPERATURE_AUTO));
        assert!(!c.contains(ProcessingUnitControls::CONTRAST));

        assert_eq!(topo.other_entities().len(), 1);
        assert_eq!(topo.other_entities()[0].id(), 3);
        assert!(matches!(
            topo.other_entities()[0].kind(),
            EntityKind::OutputTerminal(0x0101)
        ));
    }

    #[test]
    fn missing_header_is_rejected() {
        let raw = cs(&[0x05, 0x02, 0x01, 0x00, 0x00, 0x02, 0x01, 0x00, 0x00]);
        let e = parse_control_interface(&raw).unwrap_err();
        assert_eq!(e.code(), -50);
    }

    #[test]
    fn zero_unit_id_is_rejected() {
        let mut raw = cs(&[0x01, 0x00, 0x01, 0x0d, 0x00, 0, 0, 0, 0, 0x00]);
        raw.extend(cs(&[0x05, 0x00, 0x01, 0x00, 0x00, 0x02, 0x01, 0x00, 0x00]));
        assert!(parse_control_interface(&raw).is_err());

        let mut raw = cs(&[0x01, 0x00, 0x01, 0x0d, 0x00, 0, 0, 0, 0, 0x00]);
        raw.extend(cs(&[
            0x02, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x0a,
            0x00, 0x02,
        ]));
        let e = parse_control_interface(&raw).unwrap_err();
        assert_eq!(e.code(), -50);
    }

    #[test]
    fn short_processing_unit_is_padded() {
        let mut raw = cs(&[0x01, 0x00, 0x01, 0x0d, 0x00, 0, 0, 0, 0, 0x00]);
        // bmControls announced as 2 bytes, only 1 present
        raw.extend(cs(&[0x05, 0x02, 0x01, 0x00, 0x00, 0x02, 0x01]));
        let topo = parse_control_interface(&raw).unwrap();
        let pu = topo.first_processing_unit().unwrap();
        assert_eq!(pu.controls(), ProcessingUnitControls::BRIGHTNESS);
    }

    fn yuy2_guid() -> [u8; 16] {
        [
            0x59, 0x55, 0x59, 0x32, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38,
            0x9b, 0x71,
        ]
    }

    fn streaming_descriptors() -> Vec<u8> {
        let mut raw = Vec::new();
        // VS_INPUT_HEADER: 2 formats, endpoint 0x81, terminal link 3
        raw.extend(cs(&[
            0x01, 0x02, 0x00, 0x00, 0x81, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
        ]));

        // uncompressed YUY2 format 1, default frame 1
        let mut format = vec![0x04, 0x01, 0x01];
        format.extend_from_slice(&yuy2_guid());
        format.extend_from_slice(&[16, 0x01, 0, 0, 0, 0]);
        raw.extend(cs(&format));

        // 640x480, 30 fps and 15 fps discrete intervals
        let mut frame = vec![0x05, 0x01, 0x00];
        frame.extend_from_slice(&640u16.to_le_bytes());
        frame.extend_from_slice(&480u16.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&(640u32 * 480 * 2).to_le_bytes());
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        frame.push(2);
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        frame.extend_from_slice(&666_666u32.to_le_bytes());
        raw.extend(cs(&frame));

        // MJPEG format 2
        raw.extend(cs(&[0x06, 0x02, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00]));

        // 1280x720, continuous 30..5 fps
        let mut frame = vec![0x07, 0x01, 0x00];
        frame.extend_from_slice(&1280u16.to_le_bytes());
        frame.extend_from_slice(&720u16.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&(1280u32 * 720 * 2).to_le_bytes());
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        frame.push(0);
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        frame.extend_from_slice(&2_000_000u32.to_le_bytes());
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        raw.extend(cs(&frame));

        raw
    }

    #[test]
    fn parses_formats_and_frames() {
        let intf = parse_streaming_interface(1, &streaming_descriptors()).unwrap();
        assert_eq!(intf.id(), StreamingInterfaceId(1));
        assert_eq!(intf.direction(), StreamDirection::Input);
        assert_eq!(intf.endpoint_address(), 0x81);
        assert_eq!(intf.terminal_link(), 3);
        assert_eq!(intf.formats().len(), 2);

        let yuyv = &intf.formats()[0];
        assert_eq!(yuyv.frame_format(), FrameFormat::Yuyv);
        assert_eq!(yuyv.bits_per_pixel(), 16);
        let frame = yuyv.default_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (640, 480));
        assert_eq!(frame.max_video_frame_buffer_size(), 640 * 480 * 2);
        assert_eq!(
            frame.default_frame_interval(),
            Duration::from_nanos(33_333_300)
        );
        assert_eq!(
            frame.frame_intervals(),
            &SupportedFrameIntervals::Discrete {
                supported_frame_intervals: vec![
                    Duration::from_nanos(33_333_300),
                    Duration::from_nanos(66_666_600),
                ],
            }
        );

        let mjpeg = intf.format_by_index(FormatIndex(2)).unwrap();
        assert!(matches!(mjpeg.kind(), FormatKind::Mjpeg));
        assert!(matches!(
            mjpeg.frames()[0].frame_intervals(),
            SupportedFrameIntervals::Continuous { .. }
        ));

        let (format, frame) = intf.find_frame(FrameFormat::Mjpeg, 1280, 720).unwrap();
        assert_eq!(format.index(), FormatIndex(2));
        assert_eq!(frame.index(), FrameIndex(1));
        assert!(intf.find_frame(FrameFormat::Yuyv, 1280, 720).is_none());
    }

    #[test]
    fn frame_before_format_is_rejected() {
        let mut raw = cs(&[
            0x01, 0x01, 0x00, 0x00, 0x81, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00,
        ]);
        let mut frame = vec![0x05, 0x01, 0x00];
        frame.extend_from_slice(&[0; 4 + 12 + 4]);
        frame.push(1);
        frame.extend_from_slice(&333_333u32.to_le_bytes());
        raw.extend(cs(&frame));
        assert!(parse_streaming_interface(1, &raw).is_err());
    }

    #[test]
    fn streaming_interface_needs_header() {
        let mut format = vec![0x04, 0x01, 0x00];
        format.extend_from_slice(&yuy2_guid());
        format.extend_from_slice(&[16, 0x01, 0, 0, 0, 0]);
        let e = parse_streaming_interface(1, &cs(&format)).unwrap_err();
        assert_eq!(e.code(), -50);
    }
}
