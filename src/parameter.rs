use crate::camera::CameraController;
use crate::config::ParameterConfig;
use crate::driver::ParameterKind;
use crate::error::ParameterError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a request asks the device to reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Exposure,
    Gain,
    Gamma,
    Brightness,
}

impl From<ParameterKind> for TargetKind {
    fn from(kind: ParameterKind) -> Self {
        match kind {
            ParameterKind::Exposure => TargetKind::Exposure,
            ParameterKind::Gain => TargetKind::Gain,
            ParameterKind::Gamma => TargetKind::Gamma,
        }
    }
}

/// One set request, discarded once its result is produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterTarget {
    pub kind: TargetKind,
    pub requested_value: f64,
    pub tolerance: f64,
}

impl ParameterTarget {
    pub fn is_reached(&self, value: f64) -> bool {
        (value - self.requested_value).abs() <= self.tolerance
    }
}

/// Outcome of a set request.
///
/// `within_tolerance` compares the read-back against the value actually sent
/// to the device (after clamping); `converged` compares it against the
/// caller's request. A clamped request can be within tolerance yet not
/// converged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterResult {
    pub reached_value: f64,
    pub within_tolerance: bool,
    pub converged: bool,
}

/// Absolute tolerances per parameter kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub exposure_abs_us: f64,
    pub exposure_rel: f64,
    pub gain: f64,
    pub gamma: f64,
}

impl Tolerances {
    pub fn from_config(config: &ParameterConfig) -> Self {
        Self {
            exposure_abs_us: config.exposure_abs_tolerance_us,
            exposure_rel: config.exposure_rel_tolerance,
            gain: config.gain_tolerance,
            gamma: config.gamma_tolerance,
        }
    }

    /// Exposure tolerance grows with the magnitude of the target
    pub fn for_parameter(&self, kind: ParameterKind, target: f64) -> f64 {
        match kind {
            ParameterKind::Exposure => self.exposure_abs_us.max(self.exposure_rel * target.abs()),
            ParameterKind::Gain => self.gain,
            ParameterKind::Gamma => self.gamma,
        }
    }
}

/// Sets single scalar parameters and reports what the hardware really applied
#[derive(Clone)]
pub struct ParameterAdjuster {
    controller: Arc<CameraController>,
    tolerances: Tolerances,
}

impl ParameterAdjuster {
    pub fn new(controller: Arc<CameraController>, tolerances: Tolerances) -> Self {
        Self {
            controller,
            tolerances,
        }
    }

    pub fn tolerances(&self) -> &Tolerances {
        &self.tolerances
    }

    pub fn target(&self, kind: ParameterKind, requested_value: f64) -> ParameterTarget {
        ParameterTarget {
            kind: kind.into(),
            requested_value,
            tolerance: self.tolerances.for_parameter(kind, requested_value),
        }
    }

    /// Exposure time in microseconds
    pub fn set_exposure(&self, target_us: f64) -> Result<ParameterResult, ParameterError> {
        self.set_parameter(ParameterKind::Exposure, target_us)
    }

    /// Gain in percent
    pub fn set_gain(&self, target_pct: f64) -> Result<ParameterResult, ParameterError> {
        self.set_parameter(ParameterKind::Gain, target_pct)
    }

    pub fn set_gamma(&self, target: f64) -> Result<ParameterResult, ParameterError> {
        self.set_parameter(ParameterKind::Gamma, target)
    }

    /// Clamp, write, read back and compare.
    ///
    /// Runs inside the controller's exclusion domain, so it is safe to call
    /// from a thread that already holds a device session.
    pub fn set_parameter(
        &self,
        kind: ParameterKind,
        requested: f64,
    ) -> Result<ParameterResult, ParameterError> {
        if !requested.is_finite() {
            return Err(ParameterError::OutOfRange {
                kind,
                value: requested,
            });
        }
        let target = self.target(kind, requested);

        let _session = self.controller.session();
        self.controller.ensure_awake()?;

        if self.controller.is_grabbing()
            && self.controller.acquisition_active_elsewhere()
            && !self
                .controller
                .with_device(|device| device.can_change_while_streaming(kind))
        {
            warn!("Rejecting {} change during a running acquisition", kind);
            return Err(ParameterError::DeviceBusy { kind });
        }

        let range = self.controller.parameter_range(kind);
        let clamped = range.clamp(requested);
        if clamped != requested {
            debug!(
                "Clamped {} request {} to supported range [{}, {}]",
                kind, requested, range.min, range.max
            );
        }

        let echoed = self
            .controller
            .with_device(|device| device.set_parameter(kind, clamped))
            .map_err(|e| ParameterError::from_driver(kind, e))?;

        let reached = match self.controller.with_device(|device| device.parameter(kind)) {
            Ok(value) => value,
            Err(e) => {
                warn!("Read-back of {} failed ({}), using echoed value", kind, e);
                echoed
            }
        };

        let result = ParameterResult {
            reached_value: reached,
            within_tolerance: (reached - clamped).abs() <= target.tolerance,
            converged: target.is_reached(reached),
        };

        debug!(
            "Set {}: requested {}, reached {} (converged: {})",
            kind, requested, reached, result.converged
        );
        Ok(result)
    }

    /// Currently applied value of a parameter
    pub fn current(&self, kind: ParameterKind) -> Result<f64, ParameterError> {
        self.controller.ensure_awake()?;
        self.controller
            .with_device(|device| device.parameter(kind))
            .map_err(|e| ParameterError::from_driver(kind, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulationSettings;
    use crate::error::CameraError;
    use crate::testing::{grabbing_controller, test_tolerances};
    use std::sync::mpsc;
    use std::thread;

    fn adjuster() -> (ParameterAdjuster, crate::driver::SimulatedHandle, Arc<CameraController>) {
        let (controller, handle) = grabbing_controller(SimulationSettings::default());
        (
            ParameterAdjuster::new(Arc::clone(&controller), test_tolerances()),
            handle,
            controller,
        )
    }

    #[test]
    fn test_in_range_request_converges() {
        let (adjuster, handle, _) = adjuster();
        let result = adjuster.set_gain(25.0).unwrap();
        assert_eq!(result.reached_value, 25.0);
        assert!(result.within_tolerance);
        assert!(result.converged);
        assert_eq!(handle.current(ParameterKind::Gain), 25.0);
    }

    #[test]
    fn test_out_of_range_request_is_clamped() {
        let (adjuster, handle, _) = adjuster();
        let result = adjuster.set_gain(150.0).unwrap();
        assert_eq!(result.reached_value, 100.0);
        assert!(result.within_tolerance);
        assert!(!result.converged);
        assert_eq!(handle.writes_of(ParameterKind::Gain), vec![100.0]);

        let result = adjuster.set_exposure(10.0).unwrap();
        assert_eq!(result.reached_value, 100.0);
        assert!(!result.converged);
    }

    #[test]
    fn test_quantized_exposure_reports_read_back() {
        let (adjuster, _, _) = adjuster();
        let result = adjuster.set_exposure(1234.4).unwrap();
        assert_eq!(result.reached_value, 1234.0);
        assert!(result.converged);
    }

    #[test]
    fn test_exposure_tolerance_scales_with_magnitude() {
        let tolerances = test_tolerances();
        assert_eq!(tolerances.for_parameter(ParameterKind::Exposure, 50.0), 1.0);
        assert_eq!(
            tolerances.for_parameter(ParameterKind::Exposure, 20000.0),
            200.0
        );
        assert_eq!(tolerances.for_parameter(ParameterKind::Gain, 20000.0), 0.5);
    }

    #[test]
    fn test_set_exposure_is_idempotent() {
        let (adjuster, _, _) = adjuster();
        let first = adjuster.set_exposure(7777.7).unwrap();
        let second = adjuster.set_exposure(7777.7).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sleeping_camera_fails_fast() {
        let (adjuster, handle, controller) = adjuster();
        controller.enter_sleep().unwrap();
        assert_eq!(
            adjuster.set_gamma(1.5),
            Err(ParameterError::Camera(CameraError::Sleeping))
        );
        assert!(handle.writes_of(ParameterKind::Gamma).is_empty());
    }

    #[test]
    fn test_driver_rejection_is_out_of_range() {
        let (adjuster, handle, _) = adjuster();
        handle.reject(ParameterKind::Gamma);
        assert_eq!(
            adjuster.set_gamma(1.5),
            Err(ParameterError::OutOfRange {
                kind: ParameterKind::Gamma,
                value: 1.5
            })
        );
    }

    #[test]
    fn test_non_finite_request_is_out_of_range() {
        let (adjuster, handle, _) = adjuster();
        assert!(matches!(
            adjuster.set_exposure(f64::NAN),
            Err(ParameterError::OutOfRange { .. })
        ));
        assert!(handle.parameter_writes().is_empty());
    }

    #[test]
    fn test_device_busy_during_foreign_acquisition() {
        let (adjuster, handle, controller) = adjuster();
        handle.lock_while_streaming(ParameterKind::Gain);

        let (ready_tx, ready_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = {
            let controller = Arc::clone(&controller);
            thread::spawn(move || {
                let _lease = controller.begin_acquisition().unwrap();
                ready_tx.send(()).unwrap();
                let _ = release_rx.recv();
            })
        };
        ready_rx.recv().unwrap();

        assert_eq!(
            adjuster.set_gain(10.0),
            Err(ParameterError::DeviceBusy {
                kind: ParameterKind::Gain
            })
        );
        // Parameters the device can change while streaming are still allowed
        assert!(adjuster.set_exposure(3000.0).unwrap().converged);

        release_tx.send(()).unwrap();
        holder.join().unwrap();
    }
}
