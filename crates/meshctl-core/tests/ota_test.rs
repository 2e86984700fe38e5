#![allow(clippy::unwrap_used)]
// Integration tests for `OtaTransferController`.

use std::sync::Arc;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use meshctl_core::{
    Autopilot, CommandKind, CoreError, DeviceRef, EventBus, MeshEvent, OtaCompletion, OtaState,
    OtaStatusReport, OtaTransferController, ResultCode, SimulatedMesh,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn setup() -> (Arc<SimulatedMesh>, OtaTransferController<SimulatedMesh>) {
    let sim = Arc::new(SimulatedMesh::new(EventBus::new(64)));
    let controller = OtaTransferController::new(Arc::clone(&sim));
    (sim, controller)
}

fn image() -> Bytes {
    Bytes::from_static(&[0x5A; 100])
}

fn report(state: OtaState, transferred: u64, description: &str) -> MeshEvent {
    MeshEvent::OtaStatus(OtaStatusReport {
        state,
        error_code: 0,
        transferred,
        total: 100,
        description: description.into(),
    })
}

// ── Completion ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_byte_exact_transfer_completes() {
    let (_sim, mut ctl) = setup();
    ctl.start(DeviceRef::new("peripheral-1"), image()).unwrap();
    assert_eq!(ctl.session().unwrap().state(), OtaState::DiscoveringService);

    ctl.handle_event(&report(OtaState::DiscoveringService, 0, ""));
    ctl.handle_event(&report(
        OtaState::ReadingAppInfo,
        0,
        "CID:0x0211 PID:0x0001 VER:1.3.7",
    ));
    assert_eq!(ctl.session().unwrap().app_version(), Some("1.3.7"));

    assert!(ctl.handle_event(&report(OtaState::TransferringData, 40, "")).is_none());
    assert_eq!(ctl.session().unwrap().transferred_bytes(), 40);

    let summary = ctl
        .handle_event(&report(OtaState::TransferringData, 100, ""))
        .unwrap()
        .unwrap();
    assert_eq!(summary.completion, OtaCompletion::ByteExact);
    assert_eq!(summary.transferred_bytes, 100);
    assert_eq!(summary.app_version.as_deref(), Some("1.3.7"));
    assert!(!ctl.is_active());
}

#[tokio::test]
async fn test_explicit_complete_report_finishes_short_transfer() {
    let (_sim, mut ctl) = setup();
    ctl.start(DeviceRef::new("peripheral-1"), image()).unwrap();
    ctl.handle_event(&report(OtaState::TransferringData, 60, ""));

    let summary = ctl
        .handle_event(&report(OtaState::Complete, 60, ""))
        .unwrap()
        .unwrap();
    assert_eq!(summary.completion, OtaCompletion::Explicit);
    assert_eq!(summary.transferred_bytes, 60);
}

#[tokio::test]
async fn test_over_reported_bytes_are_clamped() {
    let (_sim, mut ctl) = setup();
    ctl.start(DeviceRef::new("peripheral-1"), image()).unwrap();

    let summary = ctl
        .handle_event(&report(OtaState::TransferringData, 150, ""))
        .unwrap()
        .unwrap();
    assert_eq!(summary.transferred_bytes, 100);
    assert_eq!(summary.completion, OtaCompletion::ByteExact);
}

#[tokio::test]
async fn test_unparseable_app_info_leaves_version_unset() {
    let (_sim, mut ctl) = setup();
    ctl.start(DeviceRef::new("peripheral-1"), image()).unwrap();
    ctl.handle_event(&report(OtaState::ReadingAppInfo, 0, "bootloader only"));
    assert_eq!(ctl.session().unwrap().app_version(), None);
    assert_eq!(ctl.session().unwrap().state(), OtaState::ReadingAppInfo);
}

// ── Failure and stop ────────────────────────────────────────────────

#[tokio::test]
async fn test_error_code_fails_transfer() {
    let (_sim, mut ctl) = setup();
    ctl.start(DeviceRef::new("peripheral-1"), image()).unwrap();

    let event = MeshEvent::OtaStatus(OtaStatusReport {
        state: OtaState::TransferringData,
        error_code: 133,
        transferred: 10,
        total: 100,
        description: "link lost".into(),
    });
    let err = ctl.handle_event(&event).unwrap().unwrap_err();
    assert!(matches!(err, CoreError::Failed { ref message, .. } if message.contains("link lost")));
    assert_eq!(ctl.session().unwrap().state(), OtaState::Failed);
}

#[tokio::test]
async fn test_stop_returns_to_idle_and_ignores_late_reports() {
    let (sim, mut ctl) = setup();
    ctl.start(DeviceRef::new("peripheral-1"), image()).unwrap();
    ctl.handle_event(&report(OtaState::TransferringData, 20, ""));

    ctl.stop();
    assert_eq!(sim.count(CommandKind::StopOta), 1);
    assert_eq!(ctl.session().unwrap().state(), OtaState::Idle);

    assert!(ctl.handle_event(&report(OtaState::TransferringData, 100, "")).is_none());
    assert_eq!(ctl.session().unwrap().state(), OtaState::Idle);
}

#[tokio::test]
async fn test_start_validation() {
    let (sim, mut ctl) = setup();
    assert!(matches!(
        ctl.start(DeviceRef::new("peripheral-1"), Bytes::new()),
        Err(CoreError::InvalidArguments { .. })
    ));
    assert!(matches!(
        ctl.start(DeviceRef::new(""), image()),
        Err(CoreError::InvalidArguments { .. })
    ));
    assert_eq!(sim.count(CommandKind::StartOta), 0);

    sim.script(CommandKind::StartOta, [ResultCode::Other(8)]);
    assert!(matches!(
        ctl.start(DeviceRef::new("peripheral-1"), image()),
        Err(CoreError::Rejected { .. })
    ));
    assert_eq!(ctl.session().unwrap().state(), OtaState::Failed);
}

// ── End to end ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_autopilot_transfer_runs_to_completion() {
    let sim = Arc::new(
        SimulatedMesh::new(EventBus::new(64)).with_autopilot(Autopilot {
            ota_chunk: 32,
            ..Autopilot::default()
        }),
    );
    let mut ctl = OtaTransferController::new(Arc::clone(&sim));
    let mut events = sim.bus().subscribe();
    let progress = ctl.subscribe_progress();

    ctl.start(DeviceRef::new("peripheral-1"), image()).unwrap();
    let summary = ctl.run(&mut events, &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.completion, OtaCompletion::ByteExact);
    assert_eq!(summary.app_version.as_deref(), Some("1.3.7"));
    assert!((progress.borrow().fraction() - 1.0).abs() < f64::EPSILON);
}
