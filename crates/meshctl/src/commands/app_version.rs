//! App-version command handler.

use serde::Serialize;

use meshctl_core::parse_app_version;

use crate::error::CliError;
use crate::output;

use super::Ctx;

#[derive(Debug, Serialize)]
struct AppVersionView<'a> {
    input: &'a str,
    version: String,
}

pub fn handle(text: &str, ctx: &Ctx) -> Result<(), CliError> {
    let version = parse_app_version(text).ok_or_else(|| CliError::NoVersion {
        text: text.to_owned(),
    })?;
    let view = AppVersionView {
        input: text,
        version,
    };
    let out = output::render_single(ctx.format, &view, |v| v.version.clone(), |v| v.version.clone())?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
