use std::{
    fmt,
    io::{self, Read},
    num::NonZeroU8,
    time::Duration,
};

use byteorder::{ReadBytesExt, LE};
use uuid::Uuid;

/// Splits a blob of concatenated USB descriptors into `(bDescriptorType, descriptor)` pairs.
///
/// Each yielded descriptor still includes its `bLength` and `bDescriptorType` bytes.
pub(crate) fn split_descriptors(mut raw: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    std::iter::from_fn(move || match raw {
        [0, ..] => {
            log::warn!("zero-length descriptor, ignoring {} trailing bytes", raw.len());
            None
        }
        [length, descriptor_type, ..] => {
            let length = *length as usize;
            if length > raw.len() {
                log::warn!(
                    "descriptor length {} exceeds available data ({} bytes)",
                    length,
                    raw.len()
                );
                return None;
            }
            let (desc_data, next) = raw.split_at(length);

            raw = next;

            Some((*descriptor_type, desc_data))
        }
        [] => None,
        _ => {
            log::warn!("invalid trailing descriptor bytes: {:x?}", raw);
            None
        }
    })
}

pub(crate) trait BytesExt {
    fn read_length_prefixed_bitmask(&mut self) -> io::Result<u32>;
    fn read_bitmask(&mut self, len: u8) -> io::Result<u32>;
    fn read_nonzero_id(&mut self, field: &str) -> io::Result<NonZeroU8>;
    fn read_guid(&mut self) -> io::Result<Uuid>;
    fn read_time_100ns(&mut self) -> io::Result<Duration>;
}

impl BytesExt for &'_ [u8] {
    fn read_length_prefixed_bitmask(&mut self) -> io::Result<u32> {
        let len = self.read_u8()?;
        self.read_bitmask(len)
    }

    fn read_bitmask(&mut self, len: u8) -> io::Result<u32> {
        let len = usize::from(len);
        if len > self.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if len > 4 {
            log::warn!("bitmask length {}, discarding data past 32 bits", len);
        }

        let (bytes, rest) = self.split_at(len);
        *self = rest;

        let mut buf = [0u8; 4];
        buf.iter_mut()
            .zip(bytes)
            .for_each(|(dest, src)| *dest = *src);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_nonzero_id(&mut self, field: &str) -> io::Result<NonZeroU8> {
        NonZeroU8::new(self.read_u8()?).ok_or_else(|| {
            io_err(format!(
                "{} is 0, only non-zero numbers are allowed",
                field
            ))
        })
    }

    fn read_guid(&mut self) -> io::Result<Uuid> {
        // The first three GUID groups are little-endian integers, the last 8 bytes are raw.
        let d1 = self.read_u32::<LE>()?;
        let d2 = self.read_u16::<LE>()?;
        let d3 = self.read_u16::<LE>()?;
        let mut d4 = [0; 8];
        self.read_exact(&mut d4)?;
        Uuid::from_fields(d1, d2, d3, &d4).map_err(|e| io_err(e.to_string()))
    }

    fn read_time_100ns(&mut self) -> io::Result<Duration> {
        let units = self.read_u32::<LE>()?;
        Ok(Duration::from_nanos(u64::from(units) * 100))
    }
}

pub(crate) fn io_err_res<T, M>(msg: M) -> io::Result<T>
where
    M: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Err(io_err(msg))
}

pub(crate) fn io_err<M>(msg: M) -> io::Error
where
    M: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::Other, msg)
}

/// Converts a duration to the 100ns units used by UVC interval fields, saturating at `u32::MAX`.
pub(crate) fn duration_to_100ns(dur: Duration) -> u32 {
    let units = dur.as_nanos() / 100;
    if units > u128::from(u32::MAX) {
        u32::MAX
    } else {
        units as u32
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BcdVersion(pub(crate) u16);

impl fmt::Display for BcdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let maj = self.0 >> 8;
        let min = self.0 & 0xff;
        write!(f, "{:x}.{:02x}", maj, min)
    }
}

impl fmt::Debug for BcdVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
