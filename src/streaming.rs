//! Video Streaming interfaces: parameter negotiation and frame reception.

use std::{
    collections::VecDeque,
    io::{self, Read},
    mem,
};

use crate::{
    control::{ControlTarget, ControlValue, ProbeCommitControls, ProbeHint, Request},
    error::{err, Action, ErrorKind, ResultExt},
    frame::{Frame, FrameFormat},
    topo::{FormatIndex, FrameIndex, StreamDirection, StreamingInterfaceDesc},
    util::duration_to_100ns,
    Result, UvcDevice,
};

/// Payload buffer size used when the device reports a `dwMaxPayloadTransferSize` of 0.
const FALLBACK_PAYLOAD_SIZE: usize = 16 * 1024;

pub struct StreamingInterface<'a> {
    device: &'a UvcDevice,
    desc: &'a StreamingInterfaceDesc,
}

impl<'a> StreamingInterface<'a> {
    pub(crate) fn new(device: &'a UvcDevice, desc: &'a StreamingInterfaceDesc) -> Self {
        Self { device, desc }
    }

    pub fn desc(&self) -> &'a StreamingInterfaceDesc {
        self.desc
    }

    control_accessors!(StreamingControl);

    pub fn set_control<C: StreamingControl>(&mut self, value: C::Value) -> Result<()> {
        log::trace!("SET_CUR({:?}) on streaming interface {:?}", C::ID, self.desc.id());
        self.target().write(C::ID as u8, &value)
    }

    fn target(&self) -> ControlTarget<'_> {
        ControlTarget::streaming(self.device, self.desc.id().0)
    }

    /// Runs the probe/commit handshake for the given format and frame.
    ///
    /// The frame's default interval is requested. Returns the parameters the device committed
    /// to, which may differ from the requested ones.
    pub fn negotiate(
        &mut self,
        format_index: FormatIndex,
        frame_index: FrameIndex,
    ) -> Result<ProbeCommitControls> {
        let frame = self
            .desc
            .format_by_index(format_index)
            .and_then(|format| format.frame_by_index(frame_index));
        let frame = match frame {
            Some(frame) => frame,
            None => {
                return err(
                    ErrorKind::InvalidMode(format!(
                        "no frame {:?} in format {:?} of streaming interface {:?}",
                        frame_index,
                        format_index,
                        self.desc.id()
                    )),
                    Action::StreamNegotiation,
                )
            }
        };

        let controls = ProbeCommitControls {
            bmHint: ProbeHint::FIX_FRAME_INTERVAL,
            bFormatIndex: format_index.0,
            bFrameIndex: frame_index.0,
            dwFrameInterval: duration_to_100ns(frame.default_frame_interval()),
            ..Default::default()
        };
        // The device's answer is committed byte for byte, so fields past the UVC 1.0 prefix
        // survive the round trip.
        let mut buf = controls.to_wire(self.device.topology().uvc_version());
        log::debug!(
            "negotiating parameters ({} byte probe): {:?}",
            buf.len(),
            controls
        );
        let target = self.target();
        target.write_raw(ControlId::Probe as u8, &buf)?;
        let n = target.read_raw(Request::GetCur, ControlId::Probe as u8, &mut buf)?;
        let controls = match ProbeCommitControls::from_wire(&buf[..n]) {
            Some(controls) => controls,
            None => {
                return err(
                    ErrorKind::InvalidDevice(format!(
                        "GET_CUR(PROBE) returned {} bytes, expected at least {}",
                        n,
                        ProbeCommitControls::UVC10_LEN
                    )),
                    Action::StreamNegotiation,
                )
            }
        };
        log::debug!("final parameters: {:?}", controls);
        target.write_raw(ControlId::Commit as u8, &buf[..n])?;
        Ok(controls)
    }

    /// Negotiates the given format and frame and starts receiving video data.
    pub fn start_stream(&mut self, format: FormatIndex, frame: FrameIndex) -> Result<Stream<'a>> {
        if self.desc.direction() != StreamDirection::Input {
            return err(
                ErrorKind::NotSupported(format!(
                    "streaming interface {:?} is a host-to-device interface",
                    self.desc.id()
                )),
                Action::StreamNegotiation,
            );
        }

        let params = self.negotiate(format, frame)?;

        // `negotiate` already validated both indices
        let frame_format = self
            .desc
            .format_by_index(format)
            .map_or(FrameFormat::Unknown, |f| f.frame_format());
        let (width, height) = self
            .desc
            .format_by_index(format)
            .and_then(|f| f.frame_by_index(frame))
            .map_or((0, 0), |f| (f.width(), f.height()));

        let payload_size = match params.dwMaxPayloadTransferSize {
            0 => FALLBACK_PAYLOAD_SIZE,
            n => n as usize,
        };
        let max_frame_size = params.dwMaxVideoFrameSize as usize;

        Ok(Stream {
            device: self.device,
            ep: self.desc.endpoint_address(),
            payload: vec![0; payload_size],
            assembler: FrameAssembler::new(frame_format, width, height, max_frame_size),
        })
    }
}

/// An active video stream.
///
/// Implements [`Read`] for access to raw payloads (one bulk transfer per call), and
/// reassembles payloads into [`Frame`]s with [`Stream::next_frame`].
pub struct Stream<'a> {
    device: &'a UvcDevice,
    ep: u8,
    payload: Vec<u8>,
    assembler: FrameAssembler,
}

impl Stream<'_> {
    fn read_payload(&mut self) -> Result<usize> {
        let device = self.device;
        let ep = self.ep;
        let payload = &mut self.payload[..];
        device.with_usb(|usb| {
            usb.read_bulk(ep, &mut *payload, device.timeout())
                .during(Action::StreamRead)
        })
    }

    /// Blocks until the next complete frame has been received.
    pub fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.assembler.pop() {
                return Ok(frame);
            }

            let n = self.read_payload()?;
            self.assembler.push(&self.payload[..n]);
        }
    }

    /// Receives `max_frames` frames, passing each to `callback`.
    ///
    /// Returns the number of frames delivered.
    pub fn run<F>(&mut self, max_frames: usize, mut callback: F) -> Result<usize>
    where
        F: FnMut(&Frame),
    {
        for count in 0..max_frames {
            match self.next_frame() {
                Ok(frame) => callback(&frame),
                Err(e) if count > 0 && e.is_usb_timeout() => {
                    log::warn!("stream stalled after {} frames: {}", count, e);
                    return Ok(count);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(max_frames)
    }
}

impl Read for Stream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.device
            .with_usb(|usb| {
                usb.read_bulk(self.ep, &mut *buf, self.device.timeout())
                    .during(Action::StreamRead)
            })
            .map_err(io::Error::from)
    }
}

const HEADER_FID: u8 = 1 << 0;
const HEADER_EOF: u8 = 1 << 1;
const HEADER_ERR: u8 = 1 << 6;

/// Reassembles frames from UVC payloads.
///
/// A frame ends when a payload has the end-of-frame bit set, or when the frame ID bit toggles.
pub struct FrameAssembler {
    format: FrameFormat,
    width: u16,
    height: u16,
    /// 0 means unlimited.
    max_frame_size: usize,
    buf: Vec<u8>,
    fid: Option<bool>,
    corrupt: bool,
    overflow: bool,
    ready: VecDeque<Frame>,
}

impl FrameAssembler {
    pub fn new(format: FrameFormat, width: u16, height: u16, max_frame_size: usize) -> Self {
        Self {
            format,
            width,
            height,
            max_frame_size,
            buf: Vec::new(),
            fid: None,
            corrupt: false,
            overflow: false,
            ready: VecDeque::new(),
        }
    }

    /// Feeds one payload (header included).
    pub fn push(&mut self, payload: &[u8]) {
        let (header_len, info) = match payload {
            [len, info, ..] => (usize::from(*len), *info),
            // zero-length packets are normal between frames
            _ => return,
        };
        if header_len < 2 || header_len > payload.len() {
            log::warn!(
                "invalid payload header length {} (payload is {} bytes), dropping payload",
                header_len,
                payload.len()
            );
            return;
        }

        let fid = info & HEADER_FID != 0;
        if let Some(prev) = self.fid {
            if prev != fid {
                self.finish();
            }
        }
        self.fid = Some(fid);

        if info & HEADER_ERR != 0 {
            log::debug!("payload error bit set, discarding frame");
            self.corrupt = true;
        }

        let data = &payload[header_len..];
        if !self.corrupt && !self.overflow {
            if self.max_frame_size != 0 && self.buf.len() + data.len() > self.max_frame_size {
                self.overflow = true;
                self.buf.clear();
            } else {
                self.buf.extend_from_slice(data);
            }
        }

        if info & HEADER_EOF != 0 {
            self.finish();
        }
    }

    /// Takes the oldest completed frame.
    pub fn pop(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    fn finish(&mut self) {
        let data = mem::take(&mut self.buf);
        let corrupt = mem::replace(&mut self.corrupt, false);
        let overflow = mem::replace(&mut self.overflow, false);

        if overflow {
            log::warn!(
                "frame exceeds negotiated maximum of {} bytes, dropping it",
                self.max_frame_size
            );
        } else if corrupt {
            log::debug!("dropping corrupt frame of {} bytes", data.len());
        } else if !data.is_empty() {
            self.ready
                .push_back(Frame::new(self.format, self.width, self.height, data));
        }
    }
}

/// Controls associated with Video Streaming Interfaces.
#[derive(Debug, Clone, Copy)]
pub enum ControlId {
    Probe = 0x01,
    Commit = 0x02,
}

pub trait StreamingControl {
    type Value: ControlValue;
    const ID: ControlId;
}

pub struct Probe;
impl StreamingControl for Probe {
    type Value = ProbeCommitControls;
    const ID: ControlId = ControlId::Probe;
}

pub struct Commit;
impl StreamingControl for Commit {
    type Value = ProbeCommitControls;
    const ID: ControlId = ControlId::Commit;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(info: u8, data: &[u8]) -> Vec<u8> {
        let mut p = vec![2, info];
        p.extend_from_slice(data);
        p
    }

    fn assembler() -> FrameAssembler {
        FrameAssembler::new(FrameFormat::Yuyv, 2, 1, 0)
    }

    #[test]
    fn eof_completes_frame() {
        let mut a = assembler();
        a.push(&payload(0, &[1, 2]));
        assert!(a.pop().is_none());
        a.push(&payload(HEADER_EOF, &[3, 4]));
        let frame = a.pop().unwrap();
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
        assert_eq!(frame.format(), FrameFormat::Yuyv);
        assert_eq!((frame.width(), frame.height()), (2, 1));
        assert!(a.pop().is_none());
    }

    #[test]
    fn fid_toggle_completes_frame() {
        let mut a = assembler();
        a.push(&payload(0, &[1, 2]));
        a.push(&payload(0, &[3, 4]));
        a.push(&payload(HEADER_FID, &[5, 6]));
        assert_eq!(a.pop().unwrap().data(), &[1, 2, 3, 4]);
        assert!(a.pop().is_none());

        // toggle and EOF in the same payload produce two frames
        a.push(&payload(HEADER_EOF, &[7, 8]));
        assert_eq!(a.pop().unwrap().data(), &[5, 6]);
        assert_eq!(a.pop().unwrap().data(), &[7, 8]);
    }

    #[test]
    fn header_bytes_are_stripped() {
        let mut a = assembler();
        // 12-byte header with PTS and SCR
        let mut p = vec![12, HEADER_EOF | 0x0c];
        p.extend_from_slice(&[0xaa; 10]);
        p.extend_from_slice(&[9, 9]);
        a.push(&p);
        assert_eq!(a.pop().unwrap().data(), &[9, 9]);
    }

    #[test]
    fn error_bit_drops_frame() {
        let mut a = assembler();
        a.push(&payload(0, &[1, 2]));
        a.push(&payload(HEADER_ERR, &[3, 4]));
        a.push(&payload(HEADER_EOF, &[5, 6]));
        assert!(a.pop().is_none());

        a.push(&payload(HEADER_FID | HEADER_EOF, &[7, 8]));
        assert_eq!(a.pop().unwrap().data(), &[7, 8]);
    }

    #[test]
    fn empty_and_malformed_payloads_are_ignored() {
        let mut a = assembler();
        a.push(&[]);
        a.push(&[2]);
        a.push(&[9, HEADER_EOF, 1]);
        a.push(&[1, HEADER_EOF, 1]);
        // header-only EOF with nothing buffered yields no frame
        a.push(&payload(HEADER_EOF, &[]));
        assert!(a.pop().is_none());
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let mut a = FrameAssembler::new(FrameFormat::Mjpeg, 0, 0, 4);
        a.push(&payload(0, &[1, 2, 3]));
        a.push(&payload(HEADER_EOF, &[4, 5, 6]));
        assert!(a.pop().is_none());

        a.push(&payload(HEADER_FID | HEADER_EOF, &[1, 2, 3, 4]));
        assert_eq!(a.pop().unwrap().data_bytes(), 4);
    }
}
