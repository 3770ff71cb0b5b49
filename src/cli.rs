//! Command-line front end: parses the arguments and runs the control sequence.

use std::fmt;

use clap::{ArgAction, Parser};
use uvc_tune::{control::AutoExposureMode, Context, DeviceFilter, Frame, FrameFormat, UvcDevice};

const DEFAULT_GAIN: u16 = 200;

/// Sets exposure, gain, brightness and white balance of the first attached UVC camera.
///
/// Positional arguments: `BRIGHTNESS WHITE_BALANCE [GAIN]`. White balance is a temperature in
/// Kelvin or `auto`, gain defaults to 200. Numbers are read like C's `atoi`. Options must come
/// before the positional arguments; everything after them is taken as positional, and
/// arguments past the third are ignored.
#[derive(Parser, Debug)]
#[command(author, about, long_about = None, disable_help_flag = true, disable_version_flag = true)]
pub struct Args {
    /// BRIGHTNESS WHITE_BALANCE [GAIN]
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    positional: Vec<String>,

    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    #[allow(dead_code)]
    help: Option<bool>,

    /// Only use a device with this USB vendor ID (hex with `0x` prefix, or decimal).
    #[arg(long, env = "UVC_VENDOR_ID", value_parser = parse_usb_id)]
    vendor_id: Option<u16>,

    /// Only use a device with this USB product ID (hex with `0x` prefix, or decimal).
    #[arg(long, env = "UVC_PRODUCT_ID", value_parser = parse_usb_id)]
    product_id: Option<u16>,

    /// Only use a device with this serial number.
    #[arg(long, env = "UVC_SERIAL")]
    serial: Option<String>,

    /// Number of frames to stream through the frame callback after setting the controls.
    #[arg(long, default_value_t = 0)]
    frames: usize,
}

fn parse_usb_id(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid USB ID `{}`: {}", s, e))
}

/// Parses a number the way C's `atoi` does.
///
/// Leading whitespace and one sign are accepted, parsing stops at the first non-digit, and
/// input without leading digits yields 0. Overflow wraps.
fn atoi(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i32, |acc, d| {
            acc.wrapping_mul(10).wrapping_add(i32::from(d - b'0'))
        });

    if negative {
        value.wrapping_neg()
    } else {
        value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WhiteBalance {
    Auto,
    Kelvin(u16),
}

impl fmt::Display for WhiteBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhiteBalance::Auto => f.write_str("(auto)"),
            WhiteBalance::Kelvin(k) => write!(f, "{} K", k),
        }
    }
}

/// The control values to apply, after C-style integer truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Settings {
    brightness: i16,
    white_balance: WhiteBalance,
    gain: u16,
}

impl Settings {
    /// Returns `None` if one of the two required positional arguments is missing.
    fn from_args(args: &Args) -> Option<Self> {
        let mut positional = args.positional.iter().map(String::as_str);
        let brightness = positional.next()?;
        let white_balance = positional.next()?;

        let white_balance = match white_balance {
            "auto" => WhiteBalance::Auto,
            kelvin => WhiteBalance::Kelvin(atoi(kelvin) as u16),
        };
        let gain = positional
            .next()
            .map_or(DEFAULT_GAIN, |gain| atoi(gain) as u16);

        Some(Self {
            brightness: atoi(brightness) as i16,
            white_balance,
            gain,
        })
    }

    fn auto_white_balance(&self) -> bool {
        self.white_balance == WhiteBalance::Auto
    }

    /// The temperature to set, if any. A temperature of 0 is never sent.
    fn white_balance_temperature(&self) -> Option<u16> {
        match self.white_balance {
            WhiteBalance::Kelvin(0) | WhiteBalance::Auto => None,
            WhiteBalance::Kelvin(k) => Some(k),
        }
    }
}

impl Args {
    fn filter(&self) -> DeviceFilter {
        DeviceFilter {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial_number: self.serial.clone(),
        }
    }
}

/// Prints a failed call in the form `<call>: <error> (<code>)`.
fn report(call: &str, result: uvc_tune::Result<()>) {
    if let Err(e) = result {
        eprintln!("{}: {} ({})", call, e, e.code());
    }
}

/// Handles one received frame.
///
/// Compressed frames are left alone, YUYV frames are converted to BGR.
pub fn on_frame(frame: &Frame) {
    println!(
        "callback! frame_format = {:?}, width = {}, height = {}, length = {}",
        frame.format(),
        frame.width(),
        frame.height(),
        frame.data_bytes()
    );

    match frame.format() {
        FrameFormat::H264 | FrameFormat::Mjpeg => {}
        FrameFormat::Yuyv => match frame.to_bgr() {
            Ok(bgr) => log::debug!("converted frame to {} bytes of BGR", bgr.data_bytes()),
            Err(e) => eprintln!("any2bgr: {} ({})", e, e.code()),
        },
        _ => {}
    }
}

fn apply(device: &UvcDevice, settings: &Settings) {
    report("set_ae_mode", device.set_ae_mode(AutoExposureMode::MANUAL));
    report("set_gain", device.set_gain(settings.gain));
    report("set_brightness", device.set_brightness(settings.brightness));
    report(
        "set_white_balance_temperature_auto",
        device.set_white_balance_temperature_auto(settings.auto_white_balance()),
    );
    if let Some(kelvin) = settings.white_balance_temperature() {
        report(
            "set_white_balance_temperature",
            device.set_white_balance_temperature(kelvin),
        );
    }
}

fn stream(device: &UvcDevice, frames: usize) {
    let result = device
        .start_default_stream()
        .and_then(|mut stream| stream.run(frames, on_frame));
    match result {
        Ok(n) => log::info!("received {} frame(s)", n),
        Err(e) => eprintln!("stream: {} ({})", e, e.code()),
    }
}

/// Runs the program and returns the process exit code.
pub fn run(prog: &str, args: &Args) -> i32 {
    let settings = match Settings::from_args(args) {
        Some(settings) => settings,
        None => {
            println!(
                "Usage: {} brightness_pct white_balance_kelvin [gain, default=200]",
                prog
            );
            return 1;
        }
    };

    println!(
        "Setting brightness = {}%, white balance = {}...",
        settings.brightness, settings.white_balance
    );

    let ctx = match Context::new() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("uvc_init: {} ({})", e, e.code());
            return e.code();
        }
    };
    println!("UVC initialized");

    match ctx.find_device(&args.filter()) {
        Ok(desc) => {
            println!("Device found");

            match desc.open() {
                Ok(device) => {
                    println!("Device opened");

                    apply(&device, &settings);
                    if args.frames > 0 {
                        stream(&device, args.frames);
                    }

                    report("close", device.close());
                    println!("Device closed");
                }
                Err(e) => eprintln!("open: {} ({})", e, e.code()),
            }
        }
        Err(e) => eprintln!("find_device: {} ({})", e, e.code()),
    }

    drop(ctx);
    println!("UVC exited");

    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("uvc-tune").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn atoi_follows_c() {
        assert_eq!(atoi("42"), 42);
        assert_eq!(atoi("  -17"), -17);
        assert_eq!(atoi("+8"), 8);
        assert_eq!(atoi("12abc"), 12);
        assert_eq!(atoi("abc"), 0);
        assert_eq!(atoi(""), 0);
        assert_eq!(atoi("-"), 0);
        assert_eq!(atoi("4.5"), 4);
    }

    #[test]
    fn missing_white_balance_is_usage_error() {
        assert_eq!(Settings::from_args(&parse(&[])), None);
        assert_eq!(Settings::from_args(&parse(&["50"])), None);
        assert_eq!(run("uvc-tune", &parse(&[])), 1);
        assert_eq!(run("uvc-tune", &parse(&["50"])), 1);
    }

    #[test]
    fn lone_short_help_is_usage_error() {
        let args = parse(&["-h"]);
        assert_eq!(Settings::from_args(&args), None);
        assert_eq!(run("uvc-tune", &args), 1);
        assert_eq!(run("uvc-tune", &parse(&["-V"])), 1);
    }

    #[test]
    fn extra_arguments_are_ignored() {
        let settings = Settings::from_args(&parse(&["10", "auto", "200", "extra"])).unwrap();
        assert_eq!(settings.brightness, 10);
        assert!(settings.auto_white_balance());
        assert_eq!(settings.gain, 200);

        let settings = Settings::from_args(&parse(&["10", "5000", "7", "--more", "-x"])).unwrap();
        assert_eq!(settings.white_balance, WhiteBalance::Kelvin(5000));
        assert_eq!(settings.gain, 7);
    }

    #[test]
    fn hyphen_led_arguments_go_through_atoi() {
        let settings = Settings::from_args(&parse(&["-abc", "auto"])).unwrap();
        assert_eq!(settings.brightness, 0);
        assert!(settings.auto_white_balance());

        let settings = Settings::from_args(&parse(&["-30", "-1", "-2"])).unwrap();
        assert_eq!(settings.brightness, -30);
        assert_eq!(settings.white_balance, WhiteBalance::Kelvin(u16::MAX));
        assert_eq!(settings.gain, 0xfffe);
    }

    #[test]
    fn options_before_positionals() {
        let args = parse(&["--frames", "3", "--serial", "ABC", "10", "auto"]);
        assert_eq!(args.frames, 3);
        assert_eq!(args.filter().serial_number.as_deref(), Some("ABC"));
        assert!(Settings::from_args(&args).is_some());

        let e = Args::try_parse_from(["uvc-tune", "--help"]).unwrap_err();
        assert_eq!(e.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn auto_white_balance() {
        let settings = Settings::from_args(&parse(&["50", "auto"])).unwrap();
        assert_eq!(settings.brightness, 50);
        assert_eq!(settings.gain, DEFAULT_GAIN);
        assert!(settings.auto_white_balance());
        assert_eq!(settings.white_balance_temperature(), None);
        assert_eq!(settings.white_balance.to_string(), "(auto)");
    }

    #[test]
    fn manual_white_balance_and_gain() {
        let settings = Settings::from_args(&parse(&["-20", "6500", "100"])).unwrap();
        assert_eq!(settings.brightness, -20);
        assert_eq!(settings.gain, 100);
        assert!(!settings.auto_white_balance());
        assert_eq!(settings.white_balance_temperature(), Some(6500));
        assert_eq!(settings.white_balance.to_string(), "6500 K");
    }

    #[test]
    fn auto_is_case_sensitive() {
        let settings = Settings::from_args(&parse(&["0", "AUTO"])).unwrap();
        assert_eq!(settings.white_balance, WhiteBalance::Kelvin(0));
        assert!(!settings.auto_white_balance());
        // a zero temperature is not sent
        assert_eq!(settings.white_balance_temperature(), None);
    }

    #[test]
    fn values_are_truncated_like_c() {
        let settings = Settings::from_args(&parse(&["40000", "70000", "65737"])).unwrap();
        assert_eq!(settings.brightness, 40000u32 as i16);
        assert_eq!(settings.white_balance, WhiteBalance::Kelvin(70000u32 as u16));
        assert_eq!(settings.gain, 201);
    }

    #[test]
    fn device_filter_options() {
        let args = parse(&["--vendor-id", "0x046d", "--product-id", "2085", "10", "auto"]);
        let filter = args.filter();
        assert_eq!(filter.vendor_id, Some(0x046d));
        assert_eq!(filter.product_id, Some(2085));
        assert_eq!(args.frames, 0);

        assert!(Args::try_parse_from(["uvc-tune", "--vendor-id", "0xzz", "1", "2"]).is_err());
    }

    #[test]
    fn usb_ids() {
        assert_eq!(parse_usb_id("0x1A2b"), Ok(0x1a2b));
        assert_eq!(parse_usb_id("0XFFFF"), Ok(0xffff));
        assert_eq!(parse_usb_id("1133"), Ok(1133));
        assert!(parse_usb_id("0x10000").is_err());
        assert!(parse_usb_id("").is_err());
    }
}
