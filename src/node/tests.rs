use super::*;
use crate::acquisition::ActionOutcome;
use crate::brightness::SearchMode;
use crate::camera::CameraState;
use crate::error::CamnodeError;
use crate::testing::test_camera_config;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn test_config() -> CamnodeConfig {
    CamnodeConfig {
        camera: test_camera_config(),
        ..CamnodeConfig::default()
    }
}

async fn started_node(config: CamnodeConfig) -> (CameraNode, SimulatedHandle) {
    let (node, handle) = CameraNode::simulated(config).unwrap();
    node.start().await.unwrap();
    (node, handle)
}

#[tokio::test]
async fn test_start_applies_startup_parameters() {
    let mut config = test_config();
    config.startup.exposure = Some(2000.0);
    config.startup.gain = Some(5.0);
    config.startup.gamma = Some(1.2);

    let (node, handle) = started_node(config).await;
    assert_eq!(node.controller().state(), CameraState::Grabbing);
    assert_eq!(handle.current(ParameterKind::Exposure), 2000.0);
    assert_eq!(handle.current(ParameterKind::Gain), 5.0);
    assert_eq!(handle.current(ParameterKind::Gamma), 1.2);
}

#[tokio::test]
async fn test_start_runs_startup_brightness() {
    let mut config = test_config();
    config.startup.brightness = Some(20);
    let (_node, handle) = started_node(config).await;
    // 20 lies outside the native range, so the search wrote exposure values
    assert!(!handle.writes_of(ParameterKind::Exposure).is_empty());
}

#[tokio::test]
async fn test_start_fails_when_camera_never_ready() {
    let (node, handle) = CameraNode::simulated(test_config()).unwrap();
    handle.set_ready_after(Duration::from_secs(60));

    let err = node.start().await.unwrap_err();
    assert!(matches!(err, CamnodeError::Camera(CameraError::NotReady)));
    assert!(!node.controller().is_grabbing());
}

#[tokio::test]
async fn test_parameter_responses() {
    let (node, _) = started_node(test_config()).await;

    let response = node.set_exposure(3000.0).await.unwrap();
    assert_eq!(response.reached, 3000.0);
    assert!(response.success);

    let response = node.set_exposure(1_000_000.0).await.unwrap();
    assert_eq!(response.reached, 50000.0);
    assert!(response.within_tolerance);
    assert!(!response.success);

    let response = node.set_gain(12.5).await.unwrap();
    assert!(response.success);
    let response = node.set_gamma(0.8).await.unwrap();
    assert!(response.success);
}

#[tokio::test]
async fn test_brightness_responses() {
    let (node, _) = started_node(test_config()).await;

    let response = node.set_brightness(30, true, true).await.unwrap();
    assert!(response.success);
    assert_eq!(response.mode, SearchMode::Extended);
    assert!((response.reached_brightness - 30.0).abs() <= 2.0);

    let response = node.set_brightness(100, true, false).await.unwrap();
    assert_eq!(response.mode, SearchMode::NativeAuto);
    assert_eq!(response.iterations, 0);

    assert!(matches!(
        node.set_brightness(0, true, true).await,
        Err(BrightnessError::InvalidTarget { target: 0 })
    ));
}

#[tokio::test]
async fn test_sleep_toggle() {
    let (node, handle) = started_node(test_config()).await;

    assert!(node.set_sleeping(true).await);
    assert!(handle.is_sleeping());
    assert_eq!(
        node.set_exposure(1000.0).await,
        Err(ParameterError::Camera(CameraError::Sleeping))
    );
    assert!(matches!(
        node.grab_images(GrabRequest::new(2)),
        Err(AcquisitionError::Camera(CameraError::Sleeping))
    ));

    assert!(node.set_sleeping(false).await);
    assert!(node.controller().is_grabbing());
    assert!(node.set_exposure(1000.0).await.unwrap().success);
}

#[tokio::test]
async fn test_digital_output_pass_through() {
    let (node, handle) = started_node(test_config()).await;
    assert!(node.set_digital_output(2, true).await);
    assert_eq!(handle.digital_output(2), Some(true));
    assert!(node.set_digital_output(2, false).await);
    assert_eq!(handle.digital_output(2), Some(false));
}

#[tokio::test]
async fn test_acquisition_frames_are_published_before_feedback() {
    let (node, _) = started_node(test_config()).await;
    let mut frames = node.publisher().subscribe();

    let mut goal = node.grab_images(GrabRequest::new(3)).unwrap();
    let mut feedback_ids = Vec::new();
    while let Some(feedback) = goal.next_feedback().await {
        // The frame for this feedback has already been published
        let frame = frames.try_recv().unwrap();
        assert_eq!(frame.id, feedback.frame_id);
        assert_eq!(&*frame.camera_frame, "sim_camera");
        feedback_ids.push(feedback.frame_id);
    }
    let result = goal.result().await.unwrap();

    assert_eq!(result.outcome, ActionOutcome::Succeeded);
    assert_eq!(
        feedback_ids,
        result.images.iter().map(|f| f.id).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_spin_publishes_only_with_subscribers() {
    let (node, handle) = started_node(test_config()).await;
    let token = CancellationToken::new();
    let spinner = {
        let node = node.clone();
        let token = token.clone();
        tokio::spawn(async move { node.spin(token).await })
    };

    sleep(Duration::from_millis(80)).await;
    assert_eq!(handle.grab_count(), 0);

    let mut frames = node.publisher().subscribe();
    let frame = timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(frame.id > 0);
    assert_eq!(&*frame.camera_frame, node.config().camera.camera_frame);

    assert!(node.set_sleeping(true).await);
    let grabs = handle.grab_count();
    sleep(Duration::from_millis(80)).await;
    assert_eq!(handle.grab_count(), grabs);

    token.cancel();
    timeout(Duration::from_secs(2), spinner)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_run_until_shutdown_requested() {
    let (node, handle) = CameraNode::simulated(test_config()).unwrap();
    let runner = {
        let node = node.clone();
        tokio::spawn(async move { node.run().await })
    };

    let started = timeout(Duration::from_secs(2), async {
        while !node.controller().is_grabbing() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(started.is_ok());

    node.request_shutdown();
    let exit_code = timeout(Duration::from_secs(2), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(exit_code, 0);
    assert_eq!(node.controller().state(), CameraState::Stopped);
    assert!(!handle.is_streaming());
}
