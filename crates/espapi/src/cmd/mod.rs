use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand, ValueEnum};
use espapi_client::{Client, ClientConfig, LogLevel};
use espapi_transport::{DeviceAddress, DEFAULT_PORT};
use tracing::debug;

use crate::exit::{client_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod entities;
pub mod grab;
pub mod info;
pub mod light;
pub mod logs;
pub mod switch;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and print what the device says about itself.
    Info(InfoArgs),
    /// List the device's entities with their current state.
    Entities(EntitiesArgs),
    /// Stream the device's log output.
    Logs(LogsArgs),
    /// Fetch camera frames.
    Grab(GrabArgs),
    /// Turn a switch on or off.
    Switch(SwitchArgs),
    /// Change a light.
    Light(LightArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Info(args) => info::run(args, format),
        Command::Entities(args) => entities::run(args, format),
        Command::Logs(args) => logs::run(args, format),
        Command::Grab(args) => grab::run(args, format),
        Command::Switch(args) => switch::run(args, format),
        Command::Light(args) => light::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the device is and how to log in.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Device host name or IP address.
    #[arg(long, short = 'H', env = "ESPHOME_HOST")]
    pub host: String,
    /// API port.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// API password; empty when the device has none.
    #[arg(long, env = "ESPHOME_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,
    /// Dial and request timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

impl DeviceArgs {
    pub fn addr(&self) -> String {
        DeviceAddress {
            port: self.port,
            ..DeviceAddress::from_host(self.host.clone())
        }
        .addr()
    }

    /// Dial and log in.
    pub fn connect(&self) -> CliResult<Client> {
        let timeout = parse_timeout(&self.timeout)?;
        let config = ClientConfig::default()
            .with_timeout(timeout)
            .with_client_info(concat!("espapi-cli ", env!("CARGO_PKG_VERSION")));

        let addr = self.addr();
        debug!(%addr, "connecting");
        let client = Client::dial_with_config(&addr, config)
            .map_err(|err| client_error("connect failed", err))?;
        client
            .login(&self.password)
            .map_err(|err| client_error("login failed", err))?;
        Ok(client)
    }
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Args, Debug)]
pub struct EntitiesArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// How long to wait for initial states (e.g. 2s, 0s to skip).
    #[arg(long, default_value = "2s")]
    pub settle: String,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Lowest level to receive.
    #[arg(long, default_value = "debug")]
    pub level: DeviceLogLevel,
    /// Ask the device to print its configuration first.
    #[arg(long)]
    pub dump_config: bool,
    /// Exit after N lines.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct GrabArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Number of frames to fetch; more than one streams.
    #[arg(long, short = 'n', default_value_t = 1)]
    pub count: usize,
    /// Write frames here; with several frames the index goes before the
    /// extension.
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<std::path::PathBuf>,
    /// Decode each frame and report its dimensions.
    #[arg(long)]
    pub decode: bool,
}

#[derive(Args, Debug)]
pub struct SwitchArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Switch object id, e.g. `relay`.
    pub object_id: String,
    pub state: SwitchState,
}

#[derive(Args, Debug)]
pub struct LightArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Light object id, e.g. `porch_light`.
    pub object_id: String,
    /// Turn the light on or off.
    pub state: Option<OnOff>,
    /// Brightness from 0.0 to 1.0.
    #[arg(long)]
    pub brightness: Option<f32>,
    /// Color as three components from 0.0 to 1.0.
    #[arg(long, value_delimiter = ',', value_name = "R,G,B")]
    pub rgb: Option<Vec<f32>>,
    /// White channel from 0.0 to 1.0.
    #[arg(long)]
    pub white: Option<f32>,
    /// Color temperature in mireds.
    #[arg(long)]
    pub color_temperature: Option<f32>,
    /// One of the light's effects.
    #[arg(long)]
    pub effect: Option<String>,
    /// Transition length (e.g. 1s, 250ms).
    #[arg(long, conflicts_with = "flash")]
    pub transition: Option<String>,
    /// Flash for this long (e.g. 2s).
    #[arg(long)]
    pub flash: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OnOff {
    On,
    Off,
}

impl OnOff {
    pub fn is_on(self) -> bool {
        self == OnOff::On
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SwitchState {
    On,
    Off,
    Toggle,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DeviceLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Verbose,
    VeryVerbose,
}

impl From<DeviceLogLevel> for LogLevel {
    fn from(level: DeviceLogLevel) -> Self {
        match level {
            DeviceLogLevel::Error => LogLevel::Error,
            DeviceLogLevel::Warn => LogLevel::Warn,
            DeviceLogLevel::Info => LogLevel::Info,
            DeviceLogLevel::Debug => LogLevel::Debug,
            DeviceLogLevel::Verbose => LogLevel::Verbose,
            DeviceLogLevel::VeryVerbose => LogLevel::VeryVerbose,
        }
    }
}

/// Parse `5s`, `500ms` or a bare number of seconds. Zero is allowed.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let timeout = parse_duration(input)?;
    if timeout.is_zero() {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }
    Ok(timeout)
}

/// Poll until `ready` holds or `settle` has passed.
pub fn settle(settle: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + settle;
    loop {
        if ready() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(25));
    }
}

/// Close `client` on Ctrl-C so blocking streams end cleanly.
///
/// The returned flag is true once the user interrupted.
pub fn close_on_interrupt(client: &Arc<Client>) -> CliResult<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    let client = Arc::clone(client);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = client.close();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(interrupted)
}
