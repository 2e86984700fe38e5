#![allow(clippy::unwrap_used)]
// Integration tests for `ScanProvisionHarness` driven by the simulated
// stack's autopilot on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use meshctl_core::{
    Autopilot, CommandKind, CoreError, DeviceId, EventBus, HarnessReport, HarnessStage,
    MeshConfig, ResultCode, ScanProvisionHarness, SimulatedMesh,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn target() -> DeviceId {
    DeviceId::from("6f1c2a10-9b7e-4c3d-8a5f-0e2d4b6c8a90")
}

fn config(max_passes: Option<u32>) -> MeshConfig {
    let mut config = MeshConfig::default();
    config.harness.target = Some(target());
    config.harness.max_passes = max_passes;
    config
}

fn sim_with(autopilot: Autopilot) -> Arc<SimulatedMesh> {
    let sim = SimulatedMesh::new(EventBus::new(256)).with_autopilot(autopilot);
    sim.add_beacon(target(), "bench-lamp");
    Arc::new(sim)
}

async fn run_harness(
    sim: &Arc<SimulatedMesh>,
    config: &MeshConfig,
) -> (HarnessReport, ScanProvisionHarness<SimulatedMesh>) {
    let mut harness = ScanProvisionHarness::new(Arc::clone(sim), config);
    let mut events = sim.bus().subscribe();
    let cancel = CancellationToken::new();
    harness.start().unwrap();
    let report = harness.run(&mut events, &cancel).await;
    (report, harness)
}

// ── Pass counting ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_three_clean_cycles_count_three_passes() {
    let sim = sim_with(Autopilot::default());
    let (report, harness) = run_harness(&sim, &config(Some(3))).await;

    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    assert_eq!(report.pass_count, 3);
    assert_eq!(report.slow_cycles, 0);
    assert_eq!(sim.count(CommandKind::BeginProvisioning), 3);
    assert_eq!(sim.count(CommandKind::IdentifyDevice), 3);
    assert_eq!(sim.count(CommandKind::DeleteDevice), 3);
    assert_eq!(sim.node_count(), 0);

    let cycle = harness.cycle();
    assert!(!cycle.enabled);
    assert_eq!(cycle.stage, HarnessStage::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failure_on_second_cycle_halts_after_one_pass() {
    let sim = sim_with(Autopilot {
        fail_provision_attempts: vec![2],
        ..Autopilot::default()
    });
    let (report, harness) = run_harness(&sim, &config(None)).await;

    assert_eq!(report.pass_count, 1);
    assert!(matches!(report.error, Some(CoreError::Failed { .. })));
    assert_eq!(report.failed_stage, Some(HarnessStage::Provisioning));
    assert!(!harness.cycle().enabled);
    assert_eq!(harness.cycle().stage, HarnessStage::Idle);
    assert_eq!(sim.count(CommandKind::BeginProvisioning), 2);
}

#[tokio::test(start_paused = true)]
async fn test_identify_rejection_fails_without_counting_pass() {
    let sim = sim_with(Autopilot::default());
    sim.script(CommandKind::IdentifyDevice, [ResultCode::Other(9)]);
    let (report, _) = run_harness(&sim, &config(None)).await;

    assert_eq!(report.pass_count, 0);
    assert!(matches!(
        report.error,
        Some(CoreError::Rejected {
            code: ResultCode::Other(9),
            ..
        })
    ));
    assert_eq!(sim.count(CommandKind::DeleteDevice), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_stop_scan_does_not_halt_cycle() {
    let sim = sim_with(Autopilot::default());
    sim.script(CommandKind::StopScan, [ResultCode::Other(9)]);
    let (report, _) = run_harness(&sim, &config(Some(1))).await;

    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    assert_eq!(report.pass_count, 1);
    assert_eq!(sim.count(CommandKind::StopScan), 1);
}

// ── Busy handling ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_busy_provision_is_retried_after_backoff() {
    let sim = sim_with(Autopilot::default());
    sim.script(CommandKind::BeginProvisioning, [ResultCode::InvalidState]);
    let began = tokio::time::Instant::now();
    let (report, _) = run_harness(&sim, &config(Some(1))).await;

    assert!(report.succeeded());
    assert_eq!(report.pass_count, 1);
    assert_eq!(sim.count(CommandKind::BeginProvisioning), 2);
    assert!(began.elapsed() >= Duration::from_secs(10));

    // The retry reissues the same attempt; the scan is not restarted.
    assert_eq!(sim.count(CommandKind::StartScan), 1);
    let kinds: Vec<CommandKind> = sim.commands().iter().map(CommandKind::from).collect();
    let begins: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, k)| **k == CommandKind::BeginProvisioning)
        .map(|(i, _)| i)
        .collect();
    assert!(
        kinds[begins[0]..begins[1]]
            .iter()
            .all(|k| !matches!(k, CommandKind::StartScan | CommandKind::StopScan)),
        "scan restarted between attempts: {kinds:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_busy_delete_is_retried_after_backoff() {
    let sim = sim_with(Autopilot::default());
    sim.script(CommandKind::DeleteDevice, [ResultCode::InvalidState]);
    let (report, _) = run_harness(&sim, &config(Some(1))).await;

    assert!(report.succeeded());
    assert_eq!(sim.count(CommandKind::DeleteDevice), 2);
    assert_eq!(sim.node_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_busy_retries_are_bounded() {
    let sim = sim_with(Autopilot::default());
    sim.script(CommandKind::BeginProvisioning, [ResultCode::InvalidState; 4]);
    let (report, _) = run_harness(&sim, &config(None)).await;

    assert!(report.error.as_ref().is_some_and(CoreError::is_busy));
    assert_eq!(sim.count(CommandKind::BeginProvisioning), 4);
    assert_eq!(report.pass_count, 0);
}

// ── Timers ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_slow_provisioning_is_counted_not_fatal() {
    let sim = sim_with(Autopilot {
        step_delay: Duration::from_millis(500),
        ..Autopilot::default()
    });
    let mut config = config(Some(1));
    config.harness.slow_provision_threshold = Some(Duration::from_secs(1));
    let (report, _) = run_harness(&sim, &config).await;

    assert!(report.succeeded());
    assert_eq!(report.pass_count, 1);
    assert_eq!(report.slow_cycles, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rescan_watchdog_restarts_scan() {
    // No beacon: the harness keeps scanning until cancelled.
    let sim = Arc::new(SimulatedMesh::new(EventBus::new(16)).with_autopilot(Autopilot::default()));
    let mut harness = ScanProvisionHarness::new(Arc::clone(&sim), &config(None));
    let mut events = sim.bus().subscribe();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        trigger.cancel();
    });

    harness.start().unwrap();
    let report = harness.run(&mut events, &cancel).await;

    assert!(report.succeeded());
    assert_eq!(sim.count(CommandKind::StartScan), 3);
    assert!(!sim.is_scanning());
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_stop_invalidates_timers_and_scan() {
    let sim = sim_with(Autopilot::default());
    let mut harness = ScanProvisionHarness::new(Arc::clone(&sim), &config(None));

    harness.start().unwrap();
    assert_eq!(harness.cycle().stage, HarnessStage::Scanning);
    assert!(harness.next_deadline().is_some());

    harness.stop();
    assert!(!harness.cycle().enabled);
    assert_eq!(harness.cycle().stage, HarnessStage::Idle);
    assert!(harness.next_deadline().is_none());
    assert!(!sim.is_scanning());

    let mut events = sim.bus().subscribe();
    let report = harness.run(&mut events, &CancellationToken::new()).await;
    assert_eq!(report.pass_count, 0);
    assert_eq!(sim.count(CommandKind::BeginProvisioning), 0);
}

#[tokio::test]
async fn test_start_without_target_is_rejected() {
    let sim = Arc::new(SimulatedMesh::new(EventBus::new(16)));
    let mut harness = ScanProvisionHarness::new(Arc::clone(&sim), &MeshConfig::default());

    assert!(matches!(
        harness.start(),
        Err(CoreError::InvalidArguments { .. })
    ));
    assert_eq!(sim.count(CommandKind::StartScan), 0);
}

#[tokio::test(start_paused = true)]
async fn test_status_channel_tracks_passes() {
    let sim = sim_with(Autopilot::default());
    let mut harness = ScanProvisionHarness::new(Arc::clone(&sim), &config(Some(2)));
    let status = harness.subscribe_status();
    let mut events = sim.bus().subscribe();

    harness.start().unwrap();
    assert!(status.borrow().enabled);
    harness.run(&mut events, &CancellationToken::new()).await;

    let last = *status.borrow();
    assert_eq!(last.pass_count, 2);
    assert!(!last.enabled);
    assert_eq!(last.stage, HarnessStage::Idle);
}
