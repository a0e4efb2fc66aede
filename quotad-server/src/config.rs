use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use quotad::ReaperConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub transports: TransportConfig,
    pub config_file: Option<PathBuf>,
    pub event_buffer_size: usize,
    pub reaper: ReaperSettings,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub http: Option<HttpConfig>,
    pub native: Option<NativeConfig>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct NativeConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct ReaperSettings {
    pub frequency_ms: u64,
    pub init_sleep_ms: u64,
}

impl ReaperSettings {
    pub fn to_reaper_config(self) -> ReaperConfig {
        ReaperConfig {
            min_frequency: Duration::from_millis(self.frequency_ms),
            init_sleep: Duration::from_millis(self.init_sleep_ms),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "quotad-server",
    about = "Distributed quota service",
    long_about = "A distributed quota service: clients ask whether they may consume N tokens from a named bucket and receive an immediate grant, a grant-after-wait, or a rejection.\n\nAt least one transport must be specified.\n\nEnvironment variables with QUOTAD_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // HTTP Transport
    #[arg(long, help = "Enable HTTP transport", env = "QUOTAD_HTTP")]
    pub http: bool,
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "127.0.0.1",
        env = "QUOTAD_HTTP_HOST"
    )]
    pub http_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "QUOTAD_HTTP_PORT"
    )]
    pub http_port: u16,

    // Native Transport
    #[arg(long, help = "Enable Native transport", env = "QUOTAD_NATIVE")]
    pub native: bool,
    #[arg(
        long,
        value_name = "HOST",
        help = "Native host",
        default_value = "127.0.0.1",
        env = "QUOTAD_NATIVE_HOST"
    )]
    pub native_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "Native port",
        default_value_t = 8072,
        env = "QUOTAD_NATIVE_PORT"
    )]
    pub native_port: u16,

    // Configuration source
    #[arg(
        long,
        value_name = "PATH",
        help = "JSON service config file; omit for an empty in-memory config",
        env = "QUOTAD_CONFIG_FILE"
    )]
    pub config_file: Option<PathBuf>,

    // Engine options
    #[arg(
        long,
        value_name = "SIZE",
        help = "Event buffer size",
        default_value_t = 10_000,
        env = "QUOTAD_EVENT_BUFFER_SIZE"
    )]
    pub event_buffer_size: usize,
    #[arg(
        long,
        value_name = "MS",
        help = "Floor on the reaper wake interval (milliseconds)",
        default_value_t = 60_000,
        env = "QUOTAD_REAPER_FREQUENCY_MS"
    )]
    pub reaper_frequency_ms: u64,
    #[arg(
        long,
        value_name = "MS",
        help = "Delay before the reaper's first sweep (milliseconds)",
        default_value_t = 30_000,
        env = "QUOTAD_REAPER_INIT_SLEEP_MS"
    )]
    pub reaper_init_sleep_ms: u64,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "QUOTAD_LOG_LEVEL"
    )]
    pub log_level: String,
}

impl Config {
    pub fn from_env_and_args() -> Result<Self> {
        // Clap handles the precedence: CLI arguments, then environment
        // variables, then defaults.
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self> {
        let mut config = Config {
            transports: TransportConfig {
                http: None,
                native: None,
            },
            config_file: args.config_file,
            event_buffer_size: args.event_buffer_size,
            reaper: ReaperSettings {
                frequency_ms: args.reaper_frequency_ms,
                init_sleep_ms: args.reaper_init_sleep_ms,
            },
            log_level: args.log_level,
        };

        if args.http {
            config.transports.http = Some(HttpConfig {
                host: args.http_host,
                port: args.http_port,
            });
        }

        if args.native {
            config.transports.native = Some(NativeConfig {
                host: args.native_host,
                port: args.native_port,
            });
        }

        config.validate()?;

        Ok(config)
    }

    pub fn has_any_transport(&self) -> bool {
        self.transports.http.is_some() || self.transports.native.is_some()
    }

    fn validate(&self) -> Result<()> {
        if !self.has_any_transport() {
            return Err(anyhow!(
                "At least one transport must be specified.\n\n\
                Available transports:\n  \
                --http       Enable HTTP transport\n  \
                --native     Enable Native transport\n\n\
                Example:\n  \
                quotad-server --http --http-port 8080\n  \
                quotad-server --native\n\n\
                For more information, try '--help'"
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(anyhow!("Event buffer size must be at least 1"));
        }

        Ok(())
    }
}
