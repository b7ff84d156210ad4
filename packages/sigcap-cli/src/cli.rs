use clap::{Args, Parser, Subcommand, ValueEnum};
use sigcap::{SessionConfig, SimulatedStreamConfig, StreamKind, TransportConfig, UdpBinding};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sigcap",
    version,
    about = "Record physiological signal streams (EEG, PPG, ACC, ...) to CSV",
    long_about = "Resolve one stream per requested type, record them concurrently and\n\
                  save each to <output-dir>/<YYYYMMDD_HHMMSS>/<TYPE>_signal.csv.\n\
                  Stop with the duration limit, Ctrl+C, or by typing the hotkey and Enter."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Record streams until the duration elapses or the operator stops
    Record(RecordArgs),
    /// Show which streams the transport can resolve
    Discover(DiscoverArgs),
    /// List the supported stream types
    Kinds(KindsArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Synthetic Muse-like headband
    Simulated,
    /// JSON chunks over UDP, one socket per stream type
    Udp,
}

#[derive(Args, Clone)]
pub struct TransportArgs {
    /// Where streams come from
    #[arg(long, value_enum, default_value_t = TransportKind::Simulated, env = "SIGCAP_TRANSPORT")]
    pub transport: TransportKind,

    /// UDP listen address per type as KIND=ADDR (e.g. EEG=0.0.0.0:5000)
    #[arg(
        long = "udp-bind",
        value_parser = parse_binding,
        value_delimiter = ',',
        env = "SIGCAP_UDP_BIND"
    )]
    pub udp_bind: Vec<UdpBinding>,

    /// Receive buffer per UDP datagram in bytes
    #[arg(long, default_value_t = 65_507)]
    pub udp_buffer_size: usize,

    /// Uniform timestamp jitter of the simulated device, in seconds
    #[arg(long, default_value_t = 0.0, env = "SIGCAP_SIM_JITTER")]
    pub sim_jitter: f64,

    /// Clock offset reported by the simulated device, in seconds
    #[arg(long, default_value_t = 0.0)]
    pub sim_clock_offset: f64,

    /// Seed of the simulated device's jitter generator
    #[arg(long, default_value_t = 0)]
    pub sim_seed: u64,
}

impl TransportArgs {
    pub fn to_config(&self) -> Result<TransportConfig, String> {
        match self.transport {
            TransportKind::Simulated => {
                if !(self.sim_jitter.is_finite() && self.sim_jitter >= 0.0) {
                    return Err(format!(
                        "--sim-jitter must be a non-negative number, got {}",
                        self.sim_jitter
                    ));
                }
                Ok(TransportConfig::Simulated {
                    streams: SimulatedStreamConfig::muse_preset(),
                    jitter_secs: self.sim_jitter,
                    clock_offset_secs: self.sim_clock_offset,
                    seed: self.sim_seed,
                })
            }
            TransportKind::Udp => {
                if self.udp_bind.is_empty() {
                    return Err(
                        "the udp transport needs at least one --udp-bind KIND=ADDR".to_string()
                    );
                }
                Ok(TransportConfig::Udp {
                    bindings: self.udp_bind.clone(),
                    buffer_size: Some(self.udp_buffer_size),
                })
            }
        }
    }
}

#[derive(Args)]
pub struct RecordArgs {
    /// Stream types to record (EEG, PPG, ACC, GYRO, ECG, EMG)
    #[arg(
        short = 't',
        long = "types",
        num_args = 1..,
        value_delimiter = ',',
        value_parser = parse_kind,
        default_values_t = vec![StreamKind::Eeg],
        env = "SIGCAP_TYPES"
    )]
    pub types: Vec<StreamKind>,

    #[command(flatten)]
    pub transport: TransportArgs,

    /// Stop after this many seconds (default: until stopped)
    #[arg(short, long, env = "SIGCAP_DURATION")]
    pub duration: Option<f64>,

    /// Seconds to wait for each stream type during discovery
    #[arg(long, default_value_t = 5.0, env = "SIGCAP_DISCOVERY_TIMEOUT")]
    pub discovery_timeout: f64,

    /// Target length of one pulled chunk in seconds
    #[arg(long, default_value_t = 0.05)]
    pub chunk_duration: f64,

    /// Timeout of a single pull in seconds
    #[arg(long, default_value_t = 0.01)]
    pub pull_timeout: f64,

    /// Keep the raw (offset-corrected) timestamps
    #[arg(long, default_value_t = false)]
    pub no_dejitter: bool,

    /// Save periodically while recording
    #[arg(long, default_value_t = false, env = "SIGCAP_CONTINUOUS_SAVE")]
    pub continuous_save: bool,

    /// Seconds between continuous saves
    #[arg(long, default_value_t = 5.0, env = "SIGCAP_SAVE_INTERVAL")]
    pub save_interval: f64,

    /// Root directory for recordings
    #[arg(short, long, default_value = "signal_data", env = "SIGCAP_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Write directly into --output-dir instead of a timestamped subdirectory
    #[arg(long, default_value_t = false)]
    pub flat: bool,

    /// Channel names overriding the advertised ones (used only if the count matches)
    #[arg(long, num_args = 1.., value_delimiter = ',', env = "SIGCAP_CUSTOM_CHANNELS")]
    pub custom_channels: Vec<String>,

    /// Decimal places in the CSV output
    #[arg(long, default_value_t = 6)]
    pub precision: usize,

    /// Key that stops the recording when typed followed by Enter
    #[arg(long, default_value_t = 'q')]
    pub hotkey: char,

    /// Do not listen for the stop key on stdin
    #[arg(long, default_value_t = false)]
    pub no_hotkey: bool,

    /// Do not write logs/collection_log_<time>.log into the session directory
    #[arg(long, default_value_t = false)]
    pub no_log_file: bool,

    /// Print the session summary as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Also write the JSON session summary to this file
    #[arg(long)]
    pub summary_out: Option<PathBuf>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}

impl RecordArgs {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            stream_kinds: self.types.clone(),
            duration_secs: self.duration,
            discovery_timeout_secs: self.discovery_timeout,
            chunk_duration_secs: self.chunk_duration,
            pull_timeout_secs: self.pull_timeout,
            dejitter: !self.no_dejitter,
            continuous_save: self.continuous_save,
            save_interval_secs: self.save_interval,
            output_dir: self.output_dir.clone(),
            timestamped_session_dir: !self.flat,
            custom_channel_names: self.custom_channels.clone(),
            precision: self.precision,
            ..SessionConfig::default()
        }
    }

    pub fn hotkey(&self) -> Option<char> {
        (!self.no_hotkey).then_some(self.hotkey)
    }
}

#[derive(Args)]
pub struct DiscoverArgs {
    /// Stream types to look for (default: all)
    #[arg(
        short = 't',
        long = "types",
        num_args = 1..,
        value_delimiter = ',',
        value_parser = parse_kind
    )]
    pub types: Vec<StreamKind>,

    #[command(flatten)]
    pub transport: TransportArgs,

    /// Seconds to wait for each stream type
    #[arg(long, default_value_t = 2.0)]
    pub timeout: f64,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl DiscoverArgs {
    pub fn kinds(&self) -> Vec<StreamKind> {
        if self.types.is_empty() {
            StreamKind::ALL.to_vec()
        } else {
            self.types.clone()
        }
    }
}

#[derive(Args)]
pub struct KindsArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Parse a stream type name, case-insensitively.
pub fn parse_kind(s: &str) -> Result<StreamKind, String> {
    s.parse::<StreamKind>().map_err(|_| {
        let known: Vec<&str> = StreamKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown stream type '{}' (expected one of {})", s, known.join(", "))
    })
}

/// Parse a UDP binding "KIND=ADDR".
pub fn parse_binding(s: &str) -> Result<UdpBinding, String> {
    let (kind, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid binding '{}': expected KIND=ADDR", s))?;
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(format!("Invalid binding '{}': address is empty", s));
    }
    Ok(UdpBinding::new(parse_kind(kind)?, addr))
}
