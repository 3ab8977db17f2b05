//! Joint home/move behavior of the dual-axis coordinator against simulated
//! axes, including the one-axis-failure cases.

use std::time::Duration;

use xy_stage::config::StageConfig;
use xy_stage::error::{AxisError, MotionOp};
use xy_stage::hardware::mock::{MockAxis, MockBehavior, MockCall};
use xy_stage::hardware::AxisId;
use xy_stage::stage::StageController;

fn stage_with_mocks() -> (StageController, MockAxis, MockAxis) {
    let x = MockAxis::new();
    let y = MockAxis::new();
    let stage = StageController::from_config(
        &StageConfig::default(),
        Box::new(x.clone()),
        Box::new(y.clone()),
    );
    (stage, x, y)
}

#[tokio::test]
async fn home_both_homes_both_axes() {
    let (stage, x, y) = stage_with_mocks();
    stage.connect().await.unwrap();
    stage.home_both(Duration::from_secs(1)).await.unwrap();

    assert!(x.calls().contains(&MockCall::Home));
    assert!(y.calls().contains(&MockCall::Home));
    assert_eq!(
        stage.axis(AxisId::X).last_known_position_mm(),
        Some(0.0)
    );
    assert_eq!(
        stage.axis(AxisId::Y).last_known_position_mm(),
        Some(0.0)
    );
}

#[tokio::test(start_paused = true)]
async fn one_axis_timeout_reports_other_axis_truthfully() {
    let (stage, x, _y) = stage_with_mocks();
    stage.connect().await.unwrap();

    x.script_home(MockBehavior::Hang);
    let err = stage.home_both(Duration::from_millis(500)).await.unwrap_err();

    assert_eq!(err.op, MotionOp::Home);
    assert!(matches!(
        err.x,
        Err(AxisError::Timeout {
            axis: AxisId::X,
            op: MotionOp::Home,
            ..
        })
    ));
    // Y finished on its own; its sub-result is a real success, not a
    // forced failure.
    assert_eq!(err.y, Ok(()));

    // The timed-out axis's position is unknown until the next success.
    assert_eq!(stage.axis(AxisId::X).last_known_position_mm(), None);
    assert_eq!(stage.axis(AxisId::Y).last_known_position_mm(), Some(0.0));
}

#[tokio::test]
async fn joint_move_reaches_both_targets() {
    let (stage, x, y) = stage_with_mocks();
    stage.connect().await.unwrap();
    stage.home_both(Duration::from_secs(1)).await.unwrap();

    stage
        .move_both(16.0, 4.0, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(x.move_targets(), vec![16.0]);
    assert_eq!(y.move_targets(), vec![4.0]);
    assert_eq!(stage.axis(AxisId::X).last_known_position_mm(), Some(16.0));
    assert_eq!(stage.axis(AxisId::Y).last_known_position_mm(), Some(4.0));
}

#[tokio::test]
async fn joint_move_aggregates_fault_with_success() {
    let (stage, _x, y) = stage_with_mocks();
    stage.connect().await.unwrap();
    stage.home_both(Duration::from_secs(1)).await.unwrap();

    y.script_move(MockBehavior::Fault("encoder glitch".into()));
    let err = stage
        .move_both(10.0, 10.0, Duration::from_secs(1))
        .await
        .unwrap_err();

    assert_eq!(err.x, Ok(()));
    match &err.y {
        Err(AxisError::Hardware { op, reason, .. }) => {
            assert_eq!(*op, MotionOp::Move);
            assert!(reason.contains("encoder glitch"));
        }
        other => panic!("unexpected Y outcome: {other:?}"),
    }
    // X confirmed; Y did not.
    assert_eq!(stage.axis(AxisId::X).last_known_position_mm(), Some(10.0));
    assert_eq!(stage.axis(AxisId::Y).last_known_position_mm(), None);
}

#[tokio::test(start_paused = true)]
async fn both_axes_can_fail_jointly() {
    let (stage, x, y) = stage_with_mocks();
    stage.connect().await.unwrap();

    x.script_home(MockBehavior::Hang);
    y.script_home(MockBehavior::Fault("no reference switch".into()));
    let err = stage.home_both(Duration::from_millis(200)).await.unwrap_err();

    assert!(matches!(err.x, Err(AxisError::Timeout { .. })));
    assert!(matches!(err.y, Err(AxisError::Hardware { .. })));
}

#[tokio::test]
async fn connect_failure_is_fatal() {
    let (stage, x, y) = stage_with_mocks();
    x.fail_next_connect();

    let err = stage.connect().await.unwrap_err();
    assert!(matches!(err, AxisError::Connection { axis: AxisId::X, .. }));
    // Initialization aborted before Y was touched.
    assert!(y.calls().is_empty());
}
