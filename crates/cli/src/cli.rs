//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// evsync - event camera / RGBD hardware-trigger synchronization
#[derive(Parser, Debug)]
#[command(
    name = "evsync",
    author,
    version,
    about = "Event camera and RGBD camera trigger synchronization",
    long_about = "Pairs every RGBD frame with the events captured between its trigger pulse \n\
                  and the next one. Runs live (mock or replayed devices), replays capture \n\
                  recordings deterministically, and writes pairs to the configured sinks."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "EVSYNC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "EVSYNC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run live devices through the aligner into the configured sinks
    Run(RunArgs),

    /// Align a capture recording deterministically
    Replay(ReplayArgs),

    /// Generate a mock capture recording
    Record(RecordArgs),

    /// Validate a configuration file without running
    Validate(ValidateArgs),

    /// Show build, components and configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "rig.toml", env = "EVSYNC_CONFIG")]
    pub config: PathBuf,

    /// Stop after this many seconds (runs until Ctrl-C or device end if unset)
    #[arg(short, long, env = "EVSYNC_DURATION")]
    pub duration: Option<f64>,

    /// Prometheus listen address, e.g. 127.0.0.1:9000
    #[arg(long, env = "EVSYNC_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Pairs queued between the aligner and the dispatcher
    #[arg(long, default_value = "256", env = "EVSYNC_DISPATCH_QUEUE")]
    pub dispatch_queue: usize,
}

/// Arguments for the `replay` command
#[derive(Parser, Debug, Clone)]
pub struct ReplayArgs {
    /// Capture recording to align
    pub recording: PathBuf,

    /// Configuration supplying sync tuning and sinks
    #[arg(short, long, env = "EVSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print a stable hash of the emitted pair stream
    #[arg(long)]
    pub digest: bool,
}

/// Arguments for the `record` command
#[derive(Parser, Debug, Clone)]
pub struct RecordArgs {
    /// Output recording path
    #[arg(short, long, default_value = "capture.evrec")]
    pub out: PathBuf,

    /// Seconds of capture to generate
    #[arg(short, long, default_value = "10")]
    pub duration: f64,

    /// Configuration whose mock device params shape the capture
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "rig.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Configuration file to describe
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "evsync",
            "-v",
            "run",
            "--config",
            "lab.toml",
            "--duration",
            "2.5",
            "--metrics-addr",
            "127.0.0.1:9000",
        ]);
        assert_eq!(cli.log_level(), "debug");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from("lab.toml"));
        assert_eq!(args.duration, Some(2.5));
        assert_eq!(args.metrics_addr.map(|a| a.port()), Some(9000));
    }

    #[test]
    fn test_parse_replay_with_digest() {
        let cli = Cli::parse_from(["evsync", "-q", "replay", "capture.evrec", "--digest"]);
        assert_eq!(cli.log_level(), "warn");
        let Commands::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert!(args.digest);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["evsync", "-q", "-v", "info"]).is_err());
    }
}
