//! Clap derive structures for the `meshctl` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use meshctl_core::DfuKind;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// meshctl -- BLE mesh provisioning and firmware distribution tools
#[derive(Debug, Parser)]
#[command(
    name = "meshctl",
    version,
    about = "BLE mesh provisioning and firmware distribution tools",
    long_about = "Offline tools for a BLE mesh network controller.\n\n\
        Decodes distributor status payloads, parses device app-info strings,\n\
        manages configuration, and runs the provisioning harness, DFU\n\
        distribution, and direct OTA controllers against a simulated mesh.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config dir)
    #[arg(long, env = "MESHCTL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', env = "MESHCTL_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output [default: from config, else auto]
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode a hex-encoded DFU status payload
    #[command(alias = "dec")]
    Decode(DecodeArgs),

    /// Extract the application version from a device app-info string
    AppVersion {
        /// App-info text, e.g. "CID:0x0211 PID:0x0001 VER:1.3.7"
        text: String,
    },

    /// Run a controller against the in-process simulated mesh
    #[command(alias = "sim")]
    Simulate(SimulateArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Decode ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DecodeArgs {
    #[command(subcommand)]
    pub command: DecodeCommand,
}

#[derive(Debug, Subcommand)]
pub enum DecodeCommand {
    /// Upload-phase payload: empty, or a leading percent byte
    Upload {
        /// Payload as hex (whitespace, ':' and a 0x prefix are ignored)
        #[arg(default_value = "")]
        hex: String,
    },

    /// Distribute-phase node report
    Distribute {
        /// Payload as hex: u16le node count, then 4 bytes per node
        hex: String,
    },

    /// Completion node report with final per-node phases
    Complete {
        /// Payload as hex: u16le node count, then 4 bytes per node
        hex: String,
    },
}

// ── Simulate ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[command(subcommand)]
    pub command: SimulateCommand,
}

#[derive(Debug, Subcommand)]
pub enum SimulateCommand {
    /// Repeat scan -> provision -> identify -> delete against one beacon
    Harness(HarnessSimArgs),

    /// Distribute a firmware image through a simulated distributor
    Dfu(DfuSimArgs),

    /// Direct single-device firmware transfer
    Ota(OtaSimArgs),
}

#[derive(Debug, Args)]
pub struct HarnessSimArgs {
    /// Stop gracefully after this many passes
    #[arg(long, default_value = "3")]
    pub passes: u32,

    /// Make the Nth accepted provisioning attempt fail
    #[arg(long)]
    pub fail_at: Option<u32>,

    /// Reject the first provisioning submission as network busy
    #[arg(long)]
    pub busy_first: bool,

    /// Provision nodes without groups or methods
    #[arg(long)]
    pub illegal: bool,

    /// Delay between simulated notifications
    #[arg(long, default_value = "200ms")]
    pub step_delay: humantime::Duration,
}

#[derive(Debug, Args)]
pub struct DfuSimArgs {
    /// Nodes reported by the distributor
    #[arg(long, default_value = "3")]
    pub nodes: u16,

    /// Distribution strategy
    #[arg(long, default_value = "proxy-dfu-to-all")]
    pub kind: DfuKind,

    /// Firmware image size in bytes
    #[arg(long, default_value = "65536")]
    pub size: usize,

    /// Report this distributor error code instead of distributing
    #[arg(long)]
    pub error_code: Option<i32>,

    /// Delay between simulated notifications
    #[arg(long, default_value = "200ms")]
    pub step_delay: humantime::Duration,
}

#[derive(Debug, Args)]
pub struct OtaSimArgs {
    /// Firmware image size in bytes
    #[arg(long, default_value = "65536")]
    pub size: usize,

    /// Bytes acknowledged per progress report
    #[arg(long, default_value = "4096")]
    pub chunk: u64,

    /// Peripheral handle of the target device
    #[arg(long, default_value = "peripheral-1")]
    pub device: String,

    /// App-info string the device reports
    #[arg(long)]
    pub app_info: Option<String>,

    /// Delay between simulated notifications
    #[arg(long, default_value = "200ms")]
    pub step_delay: humantime::Duration,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (file + environment)
    Show,

    /// Print the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
