use std::{fmt, io};

pub struct Error {
    action: Option<Action>,
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn with_action(kind: impl Into<ErrorKind>, action: Action) -> Self {
        Self {
            action: Some(action),
            kind: kind.into(),
        }
    }

    pub(crate) fn is_usb_timeout(&self) -> bool {
        matches!(&self.kind, ErrorKind::Rusb(rusb::Error::Timeout))
    }

    /// Returns the numeric error code of this error.
    ///
    /// Codes are negative and follow the libusb/libuvc numbering, so a command-line tool can hand
    /// them to the OS as an exit status.
    pub fn code(&self) -> i32 {
        match &self.kind {
            ErrorKind::Rusb(e) => rusb_code(e),
            ErrorKind::Io(_) => -1,
            ErrorKind::InvalidParam(_) => -2,
            ErrorKind::NotFound(_) => -5,
            ErrorKind::NotSupported(_) => -12,
            ErrorKind::InvalidDevice(_) => -50,
            ErrorKind::InvalidMode(_) => -51,
            ErrorKind::Other(_) => -99,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(&self.kind, ErrorKind::NotFound(_))
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(&self.kind, ErrorKind::NotSupported(_))
    }
}

fn rusb_code(e: &rusb::Error) -> i32 {
    match e {
        rusb::Error::Io => -1,
        rusb::Error::InvalidParam => -2,
        rusb::Error::Access => -3,
        rusb::Error::NoDevice => -4,
        rusb::Error::NotFound => -5,
        rusb::Error::Busy => -6,
        rusb::Error::Timeout => -7,
        rusb::Error::Overflow => -8,
        rusb::Error::Pipe => -9,
        rusb::Error::Interrupted => -10,
        rusb::Error::NoMem => -11,
        rusb::Error::NotSupported => -12,
        #[allow(unreachable_patterns)]
        _ => -99,
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(action) = &self.action {
            write!(f, "error while {}: ", action)?;
        }

        match &self.kind {
            ErrorKind::Rusb(e) => write!(f, "{}", e),
            ErrorKind::Io(e) => write!(f, "{}", e),
            ErrorKind::InvalidParam(msg)
            | ErrorKind::NotFound(msg)
            | ErrorKind::NotSupported(msg)
            | ErrorKind::InvalidDevice(msg)
            | ErrorKind::InvalidMode(msg) => f.write_str(msg),
            ErrorKind::Other(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e.kind {
            ErrorKind::Rusb(rusb::Error::Timeout) => io::ErrorKind::TimedOut,
            ErrorKind::Rusb(rusb::Error::Interrupted) => io::ErrorKind::Interrupted,
            ErrorKind::Io(inner) => inner.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Rusb(rusb::Error),
    Io(io::Error),
    InvalidParam(String),
    NotFound(String),
    NotSupported(String),
    InvalidDevice(String),
    InvalidMode(String),
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ErrorKind {
    fn from(v: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(v)
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}

impl From<&'_ str> for ErrorKind {
    fn from(s: &str) -> Self {
        Self::Other(s.into())
    }
}

impl From<rusb::Error> for ErrorKind {
    fn from(e: rusb::Error) -> Self {
        Self::Rusb(e)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// A list of actions during which this library might encounter errors.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Action {
    InitializingContext,
    AccessingDeviceDescriptor,
    EnumeratingDevices,
    FindingDevice,
    OpeningDevice,
    ClosingDevice,
    ReadingDeviceString,
    ReadingControl,
    WritingControl,
    StreamNegotiation,
    StreamRead,
    ConvertingFrame,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::InitializingContext => "initializing the USB context",
            Action::AccessingDeviceDescriptor => "accessing device descriptor",
            Action::EnumeratingDevices => "enumerating USB devices",
            Action::FindingDevice => "looking for a UVC device",
            Action::OpeningDevice => "opening UVC device",
            Action::ClosingDevice => "closing UVC device",
            Action::ReadingDeviceString => "reading device strings",
            Action::ReadingControl => "reading a device control",
            Action::WritingControl => "writing a device control",
            Action::StreamNegotiation => "negotiating stream parameters",
            Action::StreamRead => "reading from the video stream",
            Action::ConvertingFrame => "converting a video frame",
        };
        f.write_str(s)
    }
}

pub(crate) trait ResultExt<T, E> {
    fn during(self, action: Action) -> Result<T, Error>;
}

impl<T, E: Into<ErrorKind>> ResultExt<T, E> for Result<T, E> {
    fn during(self, action: Action) -> Result<T, Error> {
        self.map_err(|e| Error::with_action(e, action))
    }
}

pub(crate) fn err<T>(err: impl Into<ErrorKind>, action: Action) -> Result<T, Error> {
    Err(Error::with_action(err, action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb_errors_map_to_libusb_codes() {
        let e = Error::with_action(rusb::Error::Access, Action::OpeningDevice);
        assert_eq!(e.code(), -3);
        let e = Error::with_action(rusb::Error::Pipe, Action::WritingControl);
        assert_eq!(e.code(), -9);
        let e = Error::with_action(rusb::Error::Timeout, Action::StreamRead);
        assert_eq!(e.code(), -7);
        assert!(e.is_usb_timeout());
    }

    #[test]
    fn library_errors_have_their_own_codes() {
        let e = Error::with_action(
            ErrorKind::NotFound("no device".into()),
            Action::FindingDevice,
        );
        assert_eq!(e.code(), -5);
        assert!(e.is_not_found());

        let e = Error::with_action(
            ErrorKind::NotSupported("no processing unit".into()),
            Action::WritingControl,
        );
        assert_eq!(e.code(), -12);

        let e = Error::with_action("something odd", Action::StreamRead);
        assert_eq!(e.code(), -99);
    }

    #[test]
    fn usb_timeouts_stay_timeouts_as_io_errors() {
        let e: io::Error = Error::with_action(rusb::Error::Timeout, Action::StreamRead).into();
        assert_eq!(e.kind(), io::ErrorKind::TimedOut);

        let e: io::Error = Error::with_action(rusb::Error::Pipe, Action::StreamRead).into();
        assert_eq!(e.kind(), io::ErrorKind::Other);
        assert_eq!(
            e.to_string(),
            "error while reading from the video stream: Pipe error"
        );
    }

    #[test]
    fn display_includes_action() {
        let e = Error::with_action(
            ErrorKind::NotFound("no matching device".into()),
            Action::FindingDevice,
        );
        assert_eq!(
            e.to_string(),
            "error while looking for a UVC device: no matching device"
        );
    }
}
