//! CLI configuration: thin wrapper around `meshctl_config`.
//!
//! Adds resolution that respects the `--config` flag and the
//! output/color defaults stored in the file.

use std::path::PathBuf;

pub use meshctl_config::{Config, save_config_to};

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};
use crate::error::CliError;

/// `--config` if given, else the platform config path.
pub fn resolve_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(meshctl_config::config_path)
}

/// Load and validate the effective configuration.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(meshctl_config::load_config_from(&resolve_path(global))?)
}

/// Output format: flag > config default > table.
pub fn output_format(global: &GlobalOpts, cfg: &Config) -> OutputFormat {
    global.output.unwrap_or(match cfg.defaults.output.as_str() {
        "json" => OutputFormat::Json,
        "json-compact" => OutputFormat::JsonCompact,
        "yaml" => OutputFormat::Yaml,
        "plain" => OutputFormat::Plain,
        _ => OutputFormat::Table,
    })
}

/// Color mode: flag > config default > auto.
pub fn color_mode(global: &GlobalOpts, cfg: &Config) -> ColorMode {
    global.color.unwrap_or(match cfg.defaults.color.as_str() {
        "always" => ColorMode::Always,
        "never" => ColorMode::Never,
        _ => ColorMode::Auto,
    })
}
