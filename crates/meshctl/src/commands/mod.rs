//! Command dispatch: bridges CLI args -> core controllers -> output formatting.

pub mod app_version;
pub mod config_cmd;
pub mod decode;
pub mod simulate;

use meshctl_config::Config;

use crate::cli::{Command, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output;

/// Resolved presentation settings shared by every handler.
#[derive(Debug, Clone, Copy)]
pub struct Ctx {
    pub format: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

impl Ctx {
    pub fn new(global: &GlobalOpts, cfg: &Config) -> Self {
        Self {
            format: config::output_format(global, cfg),
            color: output::should_color(config::color_mode(global, cfg)),
            quiet: global.quiet,
        }
    }

    /// Live progress only makes sense for an interactive table view.
    pub fn interactive(&self) -> bool {
        use std::io::IsTerminal;
        !self.quiet && self.format == OutputFormat::Table && std::io::stderr().is_terminal()
    }
}

/// Dispatch a command that needs the loaded configuration.
pub async fn dispatch(cmd: Command, cfg: &Config, ctx: &Ctx) -> Result<(), CliError> {
    match cmd {
        Command::Decode(args) => decode::handle(args, ctx),
        Command::AppVersion { text } => app_version::handle(&text, ctx),
        Command::Simulate(args) => simulate::handle(args, cfg, ctx).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Validation {
            field: "command".into(),
            reason: "handled before dispatch".into(),
        }),
    }
}
