//! Decode command handlers: DFU status payloads given as hex.

use data_encoding::HEXLOWER_PERMISSIVE;
use serde::Serialize;
use tabled::Tabled;

use meshctl_core::status::{
    aggregate_distribution_progress, decode_node_report, decode_upload_status,
    distribution_overall_percent,
};
use meshctl_core::{NodePhase, NodeReport, UploadStatus};

use crate::cli::{DecodeArgs, DecodeCommand};
use crate::error::CliError;
use crate::output;

use super::Ctx;

// ── Views ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct UploadView {
    pending: bool,
    upload_percent: Option<u8>,
    overall_percent: Option<u8>,
}

#[derive(Debug, Serialize)]
struct DistributeView {
    nodes: Vec<NodeReport>,
    aggregate_percent: u8,
    overall_percent: u8,
}

#[derive(Debug, Serialize)]
struct CompleteView {
    nodes: Vec<NodeReport>,
    succeeded: usize,
    failed: usize,
}

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Progress")]
    progress: String,
}

impl From<&NodeReport> for NodeRow {
    fn from(n: &NodeReport) -> Self {
        Self {
            address: n.address.to_string(),
            phase: n.phase.to_string(),
            progress: format!("{}%", n.progress),
        }
    }
}

fn node_table(nodes: &[NodeReport], ctx: &Ctx, outcome: bool) -> String {
    let rows: Vec<NodeRow> = nodes
        .iter()
        .map(|n| {
            let mut row = NodeRow::from(n);
            if outcome {
                row.phase = output::verdict(&row.phase, n.phase.is_success(), ctx.color);
            }
            row
        })
        .collect();
    output::render_table(&rows)
}

// ── Hex input ───────────────────────────────────────────────────────

/// Accepts `0x`-prefixed input and ignores whitespace, `:` and `-`.
pub(crate) fn parse_hex(input: &str) -> Result<Vec<u8>, CliError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = body
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();

    HEXLOWER_PERMISSIVE
        .decode(digits.as_bytes())
        .map_err(|e| CliError::Validation {
            field: "payload".into(),
            reason: format!("not valid hex: {e}"),
        })
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: DecodeArgs, ctx: &Ctx) -> Result<(), CliError> {
    let out = match args.command {
        DecodeCommand::Upload { hex } => {
            let status = decode_upload_status(&parse_hex(&hex)?);
            let view = UploadView {
                pending: status == UploadStatus::Pending,
                upload_percent: match status {
                    UploadStatus::Pending => None,
                    UploadStatus::Percent(p) => Some(p),
                },
                overall_percent: status.overall_percent(),
            };
            let show = |p: Option<u8>| p.map_or_else(|| "-".into(), |p| format!("{p}%"));
            output::render_single(
                ctx.format,
                &view,
                |v| {
                    output::render_fields(&[
                        ("upload", if v.pending { "pending".into() } else { show(v.upload_percent) }),
                        ("overall", show(v.overall_percent)),
                    ])
                },
                |v| show(v.overall_percent),
            )?
        }

        DecodeCommand::Distribute { hex } => {
            let nodes = decode_node_report(&parse_hex(&hex)?)?;
            let aggregate = aggregate_distribution_progress(&nodes);
            let view = DistributeView {
                aggregate_percent: aggregate,
                overall_percent: distribution_overall_percent(aggregate),
                nodes,
            };
            output::render_single(
                ctx.format,
                &view,
                |v| {
                    format!(
                        "{}\n{}",
                        node_table(&v.nodes, ctx, false),
                        output::render_fields(&[
                            ("aggregate", format!("{}%", v.aggregate_percent)),
                            ("overall", format!("{}%", v.overall_percent)),
                        ])
                    )
                },
                |v| v.overall_percent.to_string(),
            )?
        }

        DecodeCommand::Complete { hex } => {
            let nodes = decode_node_report(&parse_hex(&hex)?)?;
            let succeeded = nodes.iter().filter(|n| n.phase.is_success()).count();
            let view = CompleteView {
                failed: nodes.len() - succeeded,
                succeeded,
                nodes,
            };
            output::render_single(
                ctx.format,
                &view,
                |v| {
                    format!(
                        "{}\n{}",
                        node_table(&v.nodes, ctx, true),
                        output::render_fields(&[
                            ("succeeded", v.succeeded.to_string()),
                            ("failed", v.failed.to_string()),
                        ])
                    )
                },
                |v| {
                    v.nodes
                        .iter()
                        .map(|n| format!("{} {}", n.address, phase_word(n.phase)))
                        .collect::<Vec<_>>()
                        .join("\n")
                },
            )?
        }
    };

    output::print_output(&out, ctx.quiet);
    Ok(())
}

fn phase_word(phase: NodePhase) -> &'static str {
    if phase.is_success() { "ok" } else { "failed" }
}
