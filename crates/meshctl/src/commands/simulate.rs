//! Simulation command handlers: run the real controllers against
//! `SimulatedMesh` with its autopilot enabled.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use meshctl_config::Config;
use meshctl_core::{
    Autopilot, CommandKind, DeviceId, DeviceRef, DfuDistributionController, DfuProgress,
    DfuRequest, EventBus, FirmwareMetadata, FirmwareVersion, HarnessReport, HarnessStage,
    HarnessStatus, MeshConfig, NodeOutcome, OtaCompletion, OtaProgress, OtaSummary,
    OtaTransferController, ResultCode, ScanProvisionHarness, SimulatedMesh,
};

use crate::cli::{
    DfuSimArgs, HarnessSimArgs, OtaSimArgs, OutputFormat, SimulateArgs, SimulateCommand,
};
use crate::error::CliError;
use crate::output;

use super::Ctx;

/// Beacon the harness provisions when the config names no target.
const SIM_TARGET: &str = "6f1c2a10-9b7e-4c3d-8a5f-0e2d4b6c8a90";

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: SimulateArgs, cfg: &Config, ctx: &Ctx) -> Result<(), CliError> {
    let config = cfg.to_mesh_config()?;
    let cancel = CancellationToken::new();
    let interrupt = cancel_on_ctrl_c(&cancel);

    let result = match args.command {
        SimulateCommand::Harness(a) => harness(a, config, &cancel, ctx).await,
        SimulateCommand::Dfu(a) => dfu(a, &config, &cancel, ctx).await,
        SimulateCommand::Ota(a) => ota(a, &config, &cancel, ctx).await,
    };
    interrupt.abort();
    result
}

fn cancel_on_ctrl_c(cancel: &CancellationToken) -> JoinHandle<()> {
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping");
            token.cancel();
        }
    })
}

fn simulated_mesh(config: &MeshConfig, autopilot: Autopilot) -> Arc<SimulatedMesh> {
    Arc::new(SimulatedMesh::new(EventBus::new(config.event_capacity)).with_autopilot(autopilot))
}

// ── Progress display ────────────────────────────────────────────────

fn progress_bar(ctx: &Ctx, len: u64, template: &str) -> ProgressBar {
    if !ctx.interactive() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Mirror a controller's watch channel onto a progress bar.
fn follow<T>(
    mut rx: watch::Receiver<T>,
    bar: ProgressBar,
    update: impl Fn(&ProgressBar, &T) + Send + 'static,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            update(&bar, &snapshot);
        }
    })
}

fn elapsed_text(elapsed: Duration) -> String {
    let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    humantime::format_duration(Duration::from_millis(millis)).to_string()
}

// ── Harness ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct HarnessView {
    target: String,
    passes: u32,
    requested_passes: u32,
    slow_cycles: u32,
    started: Option<String>,
    finished: String,
    elapsed: Option<String>,
    failed_stage: Option<HarnessStage>,
    error: Option<String>,
}

impl HarnessView {
    fn new(report: &HarnessReport, target: &DeviceId, requested_passes: u32) -> Self {
        let elapsed = report
            .started
            .and_then(|s| (report.finished - s).to_std().ok())
            .map(elapsed_text);
        Self {
            target: target.to_string(),
            passes: report.pass_count,
            requested_passes,
            slow_cycles: report.slow_cycles,
            started: report.started.map(|t| t.to_rfc3339()),
            finished: report.finished.to_rfc3339(),
            elapsed,
            failed_stage: report.failed_stage,
            error: report.error.as_ref().map(ToString::to_string),
        }
    }

    fn detail(&self, color: bool) -> String {
        let result = match (&self.failed_stage, &self.error) {
            (_, None) => output::verdict("passed", true, color),
            (Some(stage), Some(e)) => output::verdict(&format!("failed while {stage}: {e}"), false, color),
            (None, Some(e)) => output::verdict(&format!("failed: {e}"), false, color),
        };
        output::render_fields(&[
            ("target", self.target.clone()),
            ("passes", format!("{}/{}", self.passes, self.requested_passes)),
            ("slow cycles", self.slow_cycles.to_string()),
            ("elapsed", self.elapsed.clone().unwrap_or_else(|| "-".into())),
            ("result", result),
        ])
    }
}

async fn harness(
    args: HarnessSimArgs,
    mut config: MeshConfig,
    cancel: &CancellationToken,
    ctx: &Ctx,
) -> Result<(), CliError> {
    if args.passes == 0 {
        return Err(CliError::Validation {
            field: "passes".into(),
            reason: "must be at least 1".into(),
        });
    }
    let target = config
        .harness
        .target
        .clone()
        .unwrap_or_else(|| DeviceId::from(SIM_TARGET));
    config.harness.target = Some(target.clone());
    config.harness.max_passes = Some(args.passes);

    let sim = simulated_mesh(
        &config,
        Autopilot {
            step_delay: *args.step_delay,
            fail_provision_attempts: args.fail_at.into_iter().collect(),
            provision_illegal: args.illegal,
            ..Autopilot::default()
        },
    );
    sim.add_beacon(target.clone(), "sim-beacon");
    if args.busy_first {
        sim.script(CommandKind::BeginProvisioning, [ResultCode::InvalidState]);
    }

    let mut harness = ScanProvisionHarness::new(Arc::clone(&sim), &config);
    let mut events = sim.bus().subscribe();

    let bar = progress_bar(ctx, u64::from(args.passes), "{spinner} pass {pos}/{len} {msg}");
    let watcher = follow(harness.subscribe_status(), bar.clone(), |bar, s: &HarnessStatus| {
        bar.set_position(u64::from(s.pass_count));
        bar.set_message(s.stage.to_string());
    });

    harness.start()?;
    let report = harness.run(&mut events, cancel).await;
    watcher.abort();
    bar.finish_and_clear();

    let view = HarnessView::new(&report, &target, args.passes);
    let out = output::render_single(ctx.format, &view, |v| v.detail(ctx.color), |v| v.passes.to_string())?;
    output::print_output(&out, ctx.quiet);

    match report.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

// ── DFU ─────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct NodeOutcomeRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Final phase")]
    phase: String,
}

fn sim_metadata() -> FirmwareMetadata {
    FirmwareMetadata {
        firmware_id: "02110001000a0103".into(),
        company_id: 0x0211,
        product_id: 0x0001,
        hardware_id: 0x000a,
        version: FirmwareVersion {
            major: 1,
            minor: 3,
            patch: 7,
        },
    }
}

async fn dfu(
    args: DfuSimArgs,
    config: &MeshConfig,
    cancel: &CancellationToken,
    ctx: &Ctx,
) -> Result<(), CliError> {
    let sim = simulated_mesh(
        config,
        Autopilot {
            step_delay: *args.step_delay,
            dfu_nodes: args.nodes,
            dfu_error_code: args.error_code,
            ..Autopilot::default()
        },
    );
    let mut ctl = DfuDistributionController::new(Arc::clone(&sim), config);
    let mut events = sim.bus().subscribe();

    let bar = progress_bar(ctx, 100, "{spinner} [{bar:30}] {pos:>3}% {msg}");
    let watcher = follow(ctl.subscribe_progress(), bar.clone(), |bar, p: &DfuProgress| {
        if let Some(percent) = p.overall_percent {
            bar.set_position(u64::from(percent));
        }
        bar.set_message(p.state.to_string());
    });

    let request = DfuRequest {
        kind: args.kind,
        image: Bytes::from(vec![0xA5_u8; args.size]),
        metadata: args.kind.uses_distributor().then(sim_metadata),
    };
    let result = match ctl.start(request) {
        Ok(()) => ctl.run(&mut events, cancel).await,
        Err(e) => Err(e),
    };
    watcher.abort();
    bar.finish_and_clear();

    let summary = result?;
    let color = ctx.color;
    let out = output::render_list(
        ctx.format,
        &summary.nodes,
        |n: &NodeOutcome| NodeOutcomeRow {
            address: n.address.to_string(),
            phase: output::verdict(&n.phase.to_string(), n.phase.is_success(), color),
        },
        |n| format!("{} {}", n.address, n.phase),
    )?;
    output::print_output(&out, ctx.quiet);
    if !ctx.quiet && ctx.format == OutputFormat::Table {
        let ok = summary.nodes.iter().filter(|n| n.phase.is_success()).count();
        eprintln!("{} distribution complete: {ok}/{} node(s) updated", summary.kind, summary.nodes.len());
    }
    Ok(())
}

// ── OTA ─────────────────────────────────────────────────────────────

fn completion_text(completion: OtaCompletion) -> &'static str {
    match completion {
        OtaCompletion::ByteExact => "all bytes acknowledged",
        OtaCompletion::Explicit => "device reported complete",
    }
}

fn ota_detail(s: &OtaSummary) -> String {
    output::render_fields(&[
        ("device", s.device.to_string()),
        ("transferred", format!("{}/{} bytes", s.transferred_bytes, s.total_bytes)),
        ("completion", completion_text(s.completion).into()),
        ("app version", s.app_version.clone().unwrap_or_else(|| "unknown".into())),
    ])
}

async fn ota(
    args: OtaSimArgs,
    config: &MeshConfig,
    cancel: &CancellationToken,
    ctx: &Ctx,
) -> Result<(), CliError> {
    if args.chunk == 0 {
        return Err(CliError::Validation {
            field: "chunk".into(),
            reason: "must be at least 1 byte".into(),
        });
    }
    let mut autopilot = Autopilot {
        step_delay: *args.step_delay,
        ota_chunk: args.chunk,
        ..Autopilot::default()
    };
    if let Some(info) = args.app_info {
        autopilot.app_info = info;
    }
    let sim = simulated_mesh(config, autopilot);
    let mut ctl = OtaTransferController::new(Arc::clone(&sim));
    let mut events = sim.bus().subscribe();

    let total = u64::try_from(args.size).unwrap_or(u64::MAX);
    let bar = progress_bar(ctx, total, "{spinner} [{bar:30}] {bytes}/{total_bytes} {msg}");
    let watcher = follow(ctl.subscribe_progress(), bar.clone(), |bar, p: &OtaProgress| {
        bar.set_position(p.transferred_bytes);
        bar.set_message(p.state.to_string());
    });

    let result = match ctl.start(DeviceRef::new(args.device), Bytes::from(vec![0x5A_u8; args.size])) {
        Ok(()) => ctl.run(&mut events, cancel).await,
        Err(e) => Err(e),
    };
    watcher.abort();
    bar.finish_and_clear();

    let summary = result?;
    let out = output::render_single(ctx.format, &summary, ota_detail, |s| {
        s.app_version.clone().unwrap_or_default()
    })?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
