//! Captured video frames and colorspace conversion.

use std::fmt;

use uuid::Uuid;

use crate::{
    error::{err, Action, ErrorKind},
    Result,
};

/// Trailing 12 bytes shared by all FOURCC-derived media subtype GUIDs.
const FOURCC_GUID_SUFFIX: (u16, u16, [u8; 8]) =
    (0x0000, 0x0010, [0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71]);

/// `MEDIASUBTYPE_RGB24`, which stores pixels in B, G, R order.
const GUID_RGB24: (u32, u16, u16, [u8; 8]) = (
    0xe436eb7d,
    0x524f,
    0x11ce,
    [0x9f, 0x53, 0x00, 0x20, 0xaf, 0x0b, 0xa7, 0x70],
);

/// Pixel or encoding format of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameFormat {
    /// Packed 4:2:2, `Y0 U Y1 V`.
    Yuyv,
    /// Packed 4:2:2, `U Y0 V Y1`.
    Uyvy,
    Nv12,
    Gray8,
    Rgb,
    Bgr,
    Mjpeg,
    H264,
    Unknown,
}

impl FrameFormat {
    /// Maps the format GUID of an uncompressed or frame-based format descriptor.
    pub fn from_guid(guid: &Uuid) -> Self {
        let (d1, d2, d3, d4) = guid.as_fields();
        if (d1, d2, d3, *d4) == GUID_RGB24 {
            return FrameFormat::Bgr;
        }
        if (d2, d3, *d4) != FOURCC_GUID_SUFFIX {
            return FrameFormat::Unknown;
        }

        match &d1.to_le_bytes() {
            b"YUY2" | b"YUYV" => FrameFormat::Yuyv,
            b"UYVY" => FrameFormat::Uyvy,
            b"NV12" => FrameFormat::Nv12,
            b"Y800" | b"Y8  " | b"GREY" => FrameFormat::Gray8,
            b"H264" => FrameFormat::H264,
            b"MJPG" => FrameFormat::Mjpeg,
            _ => FrameFormat::Unknown,
        }
    }

    /// Bytes per pixel of packed formats, `None` for planar and compressed ones.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            FrameFormat::Yuyv | FrameFormat::Uyvy => Some(2),
            FrameFormat::Gray8 => Some(1),
            FrameFormat::Rgb | FrameFormat::Bgr => Some(3),
            FrameFormat::Nv12 | FrameFormat::Mjpeg | FrameFormat::H264 | FrameFormat::Unknown => {
                None
            }
        }
    }
}

/// A complete video frame read from a stream.
#[derive(Clone)]
pub struct Frame {
    format: FrameFormat,
    width: u16,
    height: u16,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(format: FrameFormat, width: u16, height: u16, data: Vec<u8>) -> Self {
        Self {
            format,
            width,
            height,
            data,
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn pixel_count(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }

    /// Converts this frame to packed 24-bit BGR.
    ///
    /// Supports YUYV, UYVY, grayscale, RGB and BGR input. Compressed formats are not decoded.
    pub fn to_bgr(&self) -> Result<Frame> {
        let bpp = match self.format.bytes_per_pixel() {
            Some(bpp) => bpp,
            None => {
                return err(
                    ErrorKind::NotSupported(format!(
                        "cannot convert {:?} frames to BGR",
                        self.format
                    )),
                    Action::ConvertingFrame,
                )
            }
        };

        let pixels = self.pixel_count();
        let needed = pixels * bpp;
        if self.data.len() < needed {
            return err(
                ErrorKind::InvalidParam(format!(
                    "{:?} frame of {}x{} needs {} bytes, got {}",
                    self.format,
                    self.width,
                    self.height,
                    needed,
                    self.data.len()
                )),
                Action::ConvertingFrame,
            );
        }
        if bpp == 2 && pixels % 2 != 0 {
            return err(
                ErrorKind::InvalidParam(format!(
                    "4:2:2 frame has odd pixel count {}",
                    pixels
                )),
                Action::ConvertingFrame,
            );
        }

        let src = &self.data[..needed];
        let mut bgr = Vec::with_capacity(pixels * 3);
        match self.format {
            FrameFormat::Yuyv => {
                for chunk in src.chunks_exact(4) {
                    let (b0, g0, r0) = yuv_to_bgr(chunk[0], chunk[1], chunk[3]);
                    let (b1, g1, r1) = yuv_to_bgr(chunk[2], chunk[1], chunk[3]);
                    bgr.extend_from_slice(&[b0, g0, r0, b1, g1, r1]);
                }
            }
            FrameFormat::Uyvy => {
                for chunk in src.chunks_exact(4) {
                    let (b0, g0, r0) = yuv_to_bgr(chunk[1], chunk[0], chunk[2]);
                    let (b1, g1, r1) = yuv_to_bgr(chunk[3], chunk[0], chunk[2]);
                    bgr.extend_from_slice(&[b0, g0, r0, b1, g1, r1]);
                }
            }
            FrameFormat::Gray8 => {
                for &y in src {
                    bgr.extend_from_slice(&[y, y, y]);
                }
            }
            FrameFormat::Rgb => {
                for px in src.chunks_exact(3) {
                    bgr.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            FrameFormat::Bgr => bgr.extend_from_slice(src),
            _ => unreachable!("formats without a packed layout are rejected above"),
        }

        Ok(Frame::new(FrameFormat::Bgr, self.width, self.height, bgr))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data_bytes", &self.data.len())
            .finish()
    }
}

// BT.601, fixed-point with 8 fractional bits
fn yuv_to_bgr(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = i32::from(y);
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;
    let r = (y + ((359 * v) >> 8)).clamp(0, 255) as u8;
    let g = (y - ((88 * u + 183 * v) >> 8)).clamp(0, 255) as u8;
    let b = (y + ((454 * u) >> 8)).clamp(0, 255) as u8;
    (b, g, r)
}
