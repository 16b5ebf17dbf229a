//! Command line and environment configuration

use std::path::PathBuf;

use clap::Parser;
use vavr_bridge::BridgeConfig;
use vavr_sim::{FirmwareKind, DEFAULT_BAUD};

use crate::transport::SerialEndpoint;

/// Default WebSocket port
pub const DEFAULT_WS_PORT: u16 = 8080;

/// Tracing filter used when `RUST_LOG` is not set
const LOG_FILTER: &str = "virtualavr=info,vavr_bridge=info,vavr_protocol=info,vavr_sim=info";
const LOG_FILTER_DEBUG: &str =
    "virtualavr=debug,vavr_bridge=debug,vavr_protocol=debug,vavr_sim=debug";

/// virtualavr settings
///
/// Every option can also be given through the environment variable named in
/// its help text, so container deployments work without arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "virtualavr",
    version,
    about = "Run an Arduino program on a virtual AVR and expose its pins over WebSocket"
)]
pub struct Config {
    /// Sketch (.ino), project directory or precompiled image (.hex, .bin)
    #[arg(env = "FILENAME", default_value = "sketch.ino")]
    pub filename: PathBuf,

    /// Serial device to attach the emulated UART to
    #[arg(long, env = "VIRTUALDEVICE")]
    pub virtual_device: Option<PathBuf>,

    /// Connect the emulated UART to this TCP address (host:port)
    #[arg(long, env = "SERIAL_TCP")]
    pub serial_tcp: Option<String>,

    /// UART baud rate
    #[arg(long, env = "BAUDRATE", default_value_t = DEFAULT_BAUD)]
    pub baudrate: u32,

    /// Interval between analog publishes in milliseconds
    #[arg(long, env = "PUBLISH_MILLIS", default_value_t = 250)]
    pub publish_millis: u64,

    /// Minimum change of an analog value before it is published again
    #[arg(long, env = "MIN_DIFF_TO_PUBLISH", default_value_t = 0)]
    pub min_diff_to_publish: u8,

    /// Start paused; a `control` `play` message starts execution
    #[arg(long, env = "PAUSE_ON_START")]
    pub pause_on_start: bool,

    /// Extra compiler flags, e.g. "-DBLINK_MS=100 -DDEBUG"
    #[arg(long, env = "BUILD_EXTRA_FLAGS")]
    pub build_extra_flags: Option<String>,

    /// Verbose logging and serial traffic mirroring
    #[arg(short, long = "verbose", env = "DEBUG")]
    pub debug: bool,

    /// WebSocket listen port
    #[arg(long, env = "WS_PORT", default_value_t = DEFAULT_WS_PORT)]
    pub ws_port: u16,

    /// Program model run by the virtual MCU
    #[arg(long, env = "FIRMWARE", default_value_t = FirmwareKind::Blink)]
    pub firmware: FirmwareKind,

    /// Instructions executed per scheduler tick
    #[arg(long, env = "BATCH_SIZE", default_value_t = 500_000)]
    pub batch_size: u32,
}

impl Config {
    /// Settings for the simulation session
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            batch_size: self.batch_size,
            publish_interval_ms: self.publish_millis,
            min_diff_to_publish: self.min_diff_to_publish,
            pause_on_start: self.pause_on_start,
            serial_debug: self.debug,
        }
    }

    /// Compiler flags split into arguments
    pub fn extra_flags(&self) -> Vec<String> {
        self.build_extra_flags
            .as_deref()
            .map(|flags| flags.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Where the emulated UART is connected
    ///
    /// TCP wins over a device path; with neither, stdin/stdout are used.
    pub fn serial_endpoint(&self) -> SerialEndpoint {
        if let Some(addr) = &self.serial_tcp {
            let addr = addr.strip_prefix("tcp://").unwrap_or(addr);
            return SerialEndpoint::Tcp(addr.to_string());
        }
        match &self.virtual_device {
            Some(path) => SerialEndpoint::Device {
                path: path.clone(),
                baud: self.baudrate,
            },
            None => SerialEndpoint::Stdio,
        }
    }

    /// Startup notice naming the model that runs in place of the program
    pub fn firmware_notice(&self) -> String {
        format!(
            "{} is loaded into flash but not executed; the '{}' firmware model runs instead (set FIRMWARE to choose another)",
            self.filename.display(),
            self.firmware
        )
    }

    /// Default tracing filter
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            LOG_FILTER_DEBUG
        } else {
            LOG_FILTER
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("virtualavr").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["blink.ino"]);
        assert_eq!(config.filename, PathBuf::from("blink.ino"));
        assert_eq!(config.ws_port, 8080);
        assert_eq!(config.firmware, FirmwareKind::Blink);

        let bridge = config.bridge_config();
        assert_eq!(bridge, BridgeConfig::default());
        assert_eq!(config.serial_endpoint(), SerialEndpoint::Stdio);
        assert!(config.extra_flags().is_empty());
    }

    #[test]
    fn test_bridge_settings() {
        let config = parse(&[
            "fade.hex",
            "--publish-millis",
            "100",
            "--min-diff-to-publish",
            "3",
            "--pause-on-start",
            "--batch-size",
            "1000",
            "--firmware",
            "fade",
        ]);
        let bridge = config.bridge_config();
        assert_eq!(bridge.publish_interval_ms, 100);
        assert_eq!(bridge.min_diff_to_publish, 3);
        assert!(bridge.pause_on_start);
        assert_eq!(bridge.batch_size, 1000);
        assert_eq!(config.firmware, FirmwareKind::Fade);
    }

    #[test]
    fn test_serial_endpoint_selection() {
        let tcp = parse(&[
            "a.ino",
            "--serial-tcp",
            "tcp://localhost:4000",
            "--virtual-device",
            "/dev/ttyUSB0",
        ]);
        assert_eq!(tcp.serial_endpoint(), SerialEndpoint::Tcp("localhost:4000".into()));

        let device = parse(&["a.ino", "--virtual-device", "/dev/ttyUSB0", "--baudrate", "9600"]);
        assert_eq!(
            device.serial_endpoint(),
            SerialEndpoint::Device {
                path: PathBuf::from("/dev/ttyUSB0"),
                baud: 9600
            }
        );
    }

    #[test]
    fn test_extra_flags_and_debug() {
        let config = parse(&["a.ino", "--build-extra-flags", "-DBLINK_MS=100  -DDEBUG", "-v"]);
        assert_eq!(config.extra_flags(), vec!["-DBLINK_MS=100", "-DDEBUG"]);
        assert!(config.bridge_config().serial_debug);
        assert!(config.log_filter().contains("vavr_bridge=debug"));
    }

    #[test]
    fn test_firmware_notice_names_program_and_model() {
        let notice = parse(&["sketch.ino"]).firmware_notice();
        assert!(notice.contains("sketch.ino"));
        assert!(notice.contains("not executed"));
        assert!(notice.contains("'blink'"));

        let notice = parse(&["echo.hex", "--firmware", "echo"]).firmware_notice();
        assert!(notice.contains("'echo'"));
    }

    #[test]
    fn test_unknown_firmware_rejected() {
        let result = Config::try_parse_from(["virtualavr", "a.ino", "--firmware", "tetris"]);
        assert!(result.is_err());
    }
}
