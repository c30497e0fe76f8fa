use super::*;
use crate::brightness::BrightnessSearchEngine;
use crate::camera::CameraController;
use crate::config::AcquisitionConfig;
use crate::driver::{ParameterKind, SimulatedCamera, SimulatedHandle, SimulationSettings};
use crate::error::{AcquisitionError, CameraError, DriverError, GrabError};
use crate::parameter::ParameterAdjuster;
use crate::testing::{opened_controller, test_brightness_config, test_tolerances};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Fixture {
    executor: AcquisitionExecutor,
    adjuster: ParameterAdjuster,
    controller: Arc<CameraController>,
    handle: SimulatedHandle,
}

fn fixture_with(settings: SimulationSettings, start: bool) -> Fixture {
    let (controller, handle) = opened_controller(SimulatedCamera::new(settings));
    if start {
        assert!(controller.start_grabbing());
    }
    let adjuster = ParameterAdjuster::new(Arc::clone(&controller), test_tolerances());
    let brightness = BrightnessSearchEngine::new(
        Arc::clone(&controller),
        adjuster.clone(),
        &test_brightness_config(),
    );
    let executor = AcquisitionExecutor::new(
        Arc::clone(&controller),
        adjuster.clone(),
        brightness,
        AcquisitionConfig {
            default_timeout_per_image_ms: 200,
            max_images: 100,
        },
    );
    Fixture {
        executor,
        adjuster,
        controller,
        handle,
    }
}

fn fixture() -> Fixture {
    fixture_with(SimulationSettings::default(), true)
}

fn slow_settings() -> SimulationSettings {
    SimulationSettings {
        grab_delay: Duration::from_millis(5),
        ..SimulationSettings::default()
    }
}

/// Cancels the goal once a given number of feedback messages has arrived
struct CancelAfter {
    remaining: usize,
    token: CancellationToken,
    received: Vec<GrabFeedback>,
}

impl FeedbackSink for CancelAfter {
    fn publish(&mut self, feedback: GrabFeedback) {
        self.received.push(feedback);
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.token.cancel();
        }
    }
}

#[tokio::test]
async fn test_full_success_reports_every_image_in_order() {
    let f = fixture();
    let mut handle = f.executor.submit(GrabRequest::new(5)).unwrap();
    let goal_id = handle.goal_id();

    let mut feedback = Vec::new();
    while let Some(fb) = handle.next_feedback().await {
        feedback.push(fb);
    }
    let result = handle.result().await.unwrap();

    assert_eq!(
        feedback.iter().map(|fb| fb.images_completed).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert!(feedback.iter().all(|fb| fb.goal_id == goal_id));
    assert_eq!(result.goal_id, goal_id);
    assert_eq!(result.outcome, ActionOutcome::Succeeded);
    assert_eq!(result.images.len(), 5);
    assert_eq!(result.success_count, 5);
    assert!(result.reached_all_requested);
    assert!(result.error.is_none());
    assert!(result.images.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(
        feedback.iter().map(|fb| fb.frame_id).collect::<Vec<_>>(),
        result.images.iter().map(|img| img.id).collect::<Vec<_>>()
    );
    assert!(!f.controller.acquisition_active());
}

#[test]
fn test_cancellation_after_three_images_is_exact() {
    let f = fixture();
    let token = CancellationToken::new();
    let mut sink = CancelAfter {
        remaining: 3,
        token: token.clone(),
        received: Vec::new(),
    };

    let result = f
        .executor
        .run_blocking(Uuid::new_v4(), &GrabRequest::new(10), &token, &mut sink)
        .unwrap();

    assert_eq!(result.outcome, ActionOutcome::Preempted);
    assert_eq!(result.success_count, 3);
    assert_eq!(result.images.len(), 3);
    assert!(!result.reached_all_requested);
    assert_eq!(sink.received.len(), 3);
    assert_eq!(f.handle.grab_count(), 3);
}

#[tokio::test]
async fn test_cancellation_through_handle_keeps_partial_images() {
    let f = fixture_with(slow_settings(), true);
    let mut handle = f.executor.submit(GrabRequest::new(50)).unwrap();

    let mut received = 0;
    while let Some(_fb) = handle.next_feedback().await {
        received += 1;
        if received == 3 {
            handle.cancel();
        }
    }
    let result = handle.result().await.unwrap();

    assert_eq!(result.outcome, ActionOutcome::Preempted);
    assert!(!result.reached_all_requested);
    assert!(result.success_count >= 3 && result.success_count < 50);
    assert_eq!(result.success_count, received);
    assert_eq!(result.images.len(), received as usize);
}

#[test]
fn test_cancelled_before_start_captures_nothing() {
    let f = fixture();
    let token = CancellationToken::new();
    token.cancel();
    let mut sink = Vec::new();

    let result = f
        .executor
        .run_blocking(Uuid::new_v4(), &GrabRequest::new(4), &token, &mut sink)
        .unwrap();

    assert_eq!(result.outcome, ActionOutcome::Preempted);
    assert_eq!(result.success_count, 0);
    assert!(sink.is_empty());
    assert_eq!(f.handle.grab_count(), 0);
}

#[tokio::test]
async fn test_grab_timeout_aborts_with_partial_result() {
    let f = fixture();
    f.handle
        .fail_grab_at(3, DriverError::Timeout { timeout: Duration::ZERO });
    let timeout = Duration::from_millis(150);

    let mut handle = f
        .executor
        .submit(GrabRequest::new(5).with_timeout(timeout))
        .unwrap();
    let mut received = 0;
    while handle.next_feedback().await.is_some() {
        received += 1;
    }
    let result = handle.result().await.unwrap();

    assert_eq!(received, 2);
    assert_eq!(result.outcome, ActionOutcome::Aborted);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.images.len(), 2);
    assert!(!result.reached_all_requested);
    assert_eq!(
        result.error,
        Some(AcquisitionError::Grab(GrabError::Timeout { timeout }))
    );
    // No retry after the failure
    assert_eq!(f.handle.grab_count(), 3);
    // The session stays usable
    assert!(f.controller.grab_image().is_ok());
}

#[tokio::test]
async fn test_driver_failure_aborts() {
    let f = fixture();
    f.handle.fail_grab_at(1, DriverError::failure("link lost"));
    let result = f
        .executor
        .submit(GrabRequest::new(3))
        .unwrap()
        .result()
        .await
        .unwrap();

    assert_eq!(result.outcome, ActionOutcome::Aborted);
    assert_eq!(result.success_count, 0);
    assert!(matches!(
        result.error,
        Some(AcquisitionError::Grab(GrabError::DriverFailure { .. }))
    ));
}

#[tokio::test]
async fn test_sleeping_camera_rejects_goal() {
    let f = fixture();
    f.controller.enter_sleep().unwrap();

    let err = f.executor.submit(GrabRequest::new(3)).err();
    assert_eq!(err, Some(AcquisitionError::Camera(CameraError::Sleeping)));
    assert_eq!(f.handle.grab_count(), 0);
    assert!(!f.controller.acquisition_active());
}

#[tokio::test]
async fn test_invalid_goals_are_rejected() {
    let f = fixture();
    let invalid = [
        GrabRequest::new(0),
        GrabRequest::new(101),
        GrabRequest::new(3).with_exposure(ParameterSchedule::PerImage(vec![1000.0, 2000.0])),
        GrabRequest::new(2).with_gain(ParameterSchedule::Fixed(f64::NAN)),
        GrabRequest::new(2).with_timeout(Duration::ZERO),
    ];
    for request in invalid {
        assert!(matches!(
            f.executor.submit(request),
            Err(AcquisitionError::InvalidGoal { .. })
        ));
    }
    assert_eq!(f.handle.grab_count(), 0);
}

#[tokio::test]
async fn test_second_goal_is_rejected_while_running() {
    let f = fixture_with(slow_settings(), true);
    let mut first = f.executor.submit(GrabRequest::new(50)).unwrap();
    // The first feedback proves the worker holds the acquisition lease
    assert!(first.next_feedback().await.is_some());

    let err = f.executor.submit(GrabRequest::new(1)).err();
    assert_eq!(err, Some(AcquisitionError::Camera(CameraError::Busy)));

    first.cancel();
    let result = first.result().await.unwrap();
    assert_eq!(result.outcome, ActionOutcome::Preempted);
    assert!(f.executor.submit(GrabRequest::new(1)).is_ok());
}

#[tokio::test]
async fn test_per_image_overrides() {
    let f = fixture();
    let request = GrabRequest::new(3)
        .with_exposure(ParameterSchedule::PerImage(vec![1000.0, 2000.0, 3000.0]))
        .with_gain(ParameterSchedule::Fixed(10.0));
    let result = f.executor.submit(request).unwrap().result().await.unwrap();

    assert!(result.reached_all_requested);
    let exposures: Vec<_> = result.reached.iter().map(|r| r.exposure).collect();
    assert_eq!(
        exposures,
        vec![Some(1000.0), Some(2000.0), Some(3000.0)]
    );
    assert!(result.reached.iter().all(|r| r.gain == Some(10.0)));
    // 0.004 * exposure * 1.3
    for (reached, expected) in result.reached.iter().zip([5.2, 10.4, 15.6]) {
        assert!((reached.brightness - expected).abs() < 0.01);
    }
    assert_eq!(f.handle.writes_of(ParameterKind::Gain), vec![10.0; 3]);
}

#[tokio::test]
async fn test_brightness_schedule_runs_search_per_image() {
    let f = fixture();
    let request = GrabRequest::new(2).with_brightness(ParameterSchedule::Fixed(30.0));
    let result = f.executor.submit(request).unwrap().result().await.unwrap();

    assert_eq!(result.outcome, ActionOutcome::Succeeded);
    for reached in &result.reached {
        assert!((reached.brightness - 30.0).abs() <= 2.0);
    }
}

#[tokio::test]
async fn test_stopped_camera_starts_grabbing() {
    let f = fixture_with(SimulationSettings::default(), false);
    let result = f
        .executor
        .submit(GrabRequest::new(2))
        .unwrap()
        .result()
        .await
        .unwrap();
    assert!(result.reached_all_requested);
    assert!(f.controller.is_grabbing());
}

#[tokio::test]
async fn test_parameter_requests_never_overlap_acquisition() {
    let f = fixture_with(slow_settings(), true);
    let handle = f.executor.submit(GrabRequest::new(20)).unwrap();

    let adjuster = f.adjuster.clone();
    let writer = tokio::task::spawn_blocking(move || {
        for i in 0..20 {
            adjuster.set_exposure(1000.0 + i as f64 * 100.0).unwrap();
        }
    });

    let result = handle.result().await.unwrap();
    writer.await.unwrap();

    assert!(result.reached_all_requested);
    assert_eq!(f.handle.max_concurrent_calls(), 1);
    assert_eq!(f.handle.writes_of(ParameterKind::Exposure).len(), 20);
}

#[test]
fn test_schedule_values() {
    assert_eq!(ParameterSchedule::Unchanged.value_for(0), None);
    assert_eq!(ParameterSchedule::Fixed(2.5).value_for(7), Some(2.5));
    let per_image = ParameterSchedule::PerImage(vec![1.0, 2.0]);
    assert_eq!(per_image.value_for(1), Some(2.0));
    assert_eq!(per_image.value_for(2), None);
    assert!(per_image.validate("gain", 2).is_ok());
    assert!(per_image.validate("gain", 3).is_err());
}
