//! Deterministic stand-in for a real camera.
//!
//! Brightness follows a monotonic model of exposure and gain, so both the
//! native auto functions and the extended search can be exercised without
//! hardware. A [`SimulatedHandle`] shares the device state for inspection and
//! fault injection while the driver itself is owned by the controller.

use super::{BrightnessRange, DeviceDriver, ParameterKind, ParameterRange};
use crate::error::DriverError;
use crate::frame::{FrameData, FrameFormat};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Maps (exposure µs, gain %) to a linear mean brightness before clamping and gamma
pub type BrightnessModel = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub width: u32,
    pub height: u32,
    /// Brightness gained per microsecond of exposure at zero gain
    pub scene_radiance: f64,
    pub exposure_range: ParameterRange,
    pub gain_range: ParameterRange,
    pub gamma_range: ParameterRange,
    /// Exposure quantisation in microseconds
    pub exposure_step: f64,
    pub native_auto_range: BrightnessRange,
    pub grab_delay: Duration,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            scene_radiance: 0.004,
            exposure_range: ParameterRange::new(100.0, 50000.0),
            gain_range: ParameterRange::new(0.0, 100.0),
            gamma_range: ParameterRange::new(0.25, 4.0),
            exposure_step: 1.0,
            native_auto_range: BrightnessRange::default(),
            grab_delay: Duration::ZERO,
        }
    }
}

struct SimState {
    open: bool,
    streaming: bool,
    sleeping: bool,
    exposure: f64,
    gain: f64,
    gamma: f64,
    auto_exposure: bool,
    auto_gain: bool,
    auto_target: u8,
    ready_at: Option<Instant>,
    grab_count: usize,
    grab_faults: HashMap<usize, DriverError>,
    locked_while_streaming: HashSet<ParameterKind>,
    rejected: HashSet<ParameterKind>,
    writes: Vec<(ParameterKind, f64)>,
    digital_outputs: HashMap<u8, bool>,
}

struct Shared {
    state: Mutex<SimState>,
    active_calls: AtomicUsize,
    max_concurrent_calls: AtomicUsize,
}

/// Counts overlapping driver calls for the lifetime of one call
struct CallGuard<'a> {
    shared: &'a Shared,
}

impl<'a> CallGuard<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let active = shared.active_calls.fetch_add(1, Ordering::SeqCst) + 1;
        shared
            .max_concurrent_calls
            .fetch_max(active, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.shared.active_calls.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SimulatedCamera {
    settings: SimulationSettings,
    model: BrightnessModel,
    shared: Arc<Shared>,
}

impl SimulatedCamera {
    /// Simulated camera with the default linear scene model
    pub fn new(settings: SimulationSettings) -> Self {
        let radiance = settings.scene_radiance;
        let model: BrightnessModel =
            Arc::new(move |exposure, gain| radiance * exposure * (1.0 + 3.0 * gain / 100.0));
        Self::with_model(settings, model)
    }

    pub fn with_model(settings: SimulationSettings, model: BrightnessModel) -> Self {
        let state = SimState {
            open: false,
            streaming: false,
            sleeping: false,
            exposure: settings.exposure_range.clamp(5000.0),
            gain: settings.gain_range.min,
            gamma: settings.gamma_range.clamp(1.0),
            auto_exposure: false,
            auto_gain: false,
            auto_target: 128,
            ready_at: None,
            grab_count: 0,
            grab_faults: HashMap::new(),
            locked_while_streaming: HashSet::new(),
            rejected: HashSet::new(),
            writes: Vec::new(),
            digital_outputs: HashMap::new(),
        };

        Self {
            settings,
            model,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                active_calls: AtomicUsize::new(0),
                max_concurrent_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn range(&self, kind: ParameterKind) -> ParameterRange {
        match kind {
            ParameterKind::Exposure => self.settings.exposure_range,
            ParameterKind::Gain => self.settings.gain_range,
            ParameterKind::Gamma => self.settings.gamma_range,
        }
    }

    fn quantize(&self, kind: ParameterKind, value: f64) -> f64 {
        match kind {
            ParameterKind::Exposure if self.settings.exposure_step > 0.0 => {
                let step = self.settings.exposure_step;
                self.settings.exposure_range.clamp((value / step).round() * step)
            }
            _ => value,
        }
    }

    fn brightness(&self, exposure: f64, gain: f64, gamma: f64) -> f64 {
        let linear = (self.model)(exposure, gain).clamp(0.0, 255.0);
        if gamma <= 0.0 || (gamma - 1.0).abs() < f64::EPSILON {
            return linear;
        }
        255.0 * (linear / 255.0).powf(1.0 / gamma)
    }

    /// Bisection on the simulated response, standing in for the hardware auto loop
    fn solve(range: ParameterRange, target: f64, response: impl Fn(f64) -> f64) -> f64 {
        let (mut lo, mut hi) = (range.min, range.max);
        for _ in 0..60 {
            let mid = (lo + hi) / 2.0;
            if response(mid) < target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        (lo + hi) / 2.0
    }

    fn run_auto_functions(&self, state: &mut SimState) {
        let target = state.auto_target as f64;
        if state.auto_exposure {
            let (gain, gamma) = (state.gain, state.gamma);
            let solved = Self::solve(self.settings.exposure_range, target, |e| {
                self.brightness(e, gain, gamma)
            });
            state.exposure = self.quantize(ParameterKind::Exposure, solved);
        }
        let current = self.brightness(state.exposure, state.gain, state.gamma);
        if state.auto_gain && (current - target).abs() > 0.5 {
            let (exposure, gamma) = (state.exposure, state.gamma);
            state.gain = Self::solve(self.settings.gain_range, target, |g| {
                self.brightness(exposure, g, gamma)
            });
        }
    }

    /// Dithered mono frame whose mean equals `brightness` to within 1/(2·pixels)
    fn render(&self, brightness: f64) -> Vec<u8> {
        let pixels = self.settings.width as usize * self.settings.height as usize;
        let b = brightness.clamp(0.0, 255.0);
        let base = b.floor();
        let high_count = (((b - base) * pixels as f64).round() as usize).min(pixels);
        let base = base as u8;

        let mut data = vec![base; pixels];
        for px in data.iter_mut().take(high_count) {
            *px = base.saturating_add(1);
        }
        data
    }
}

impl DeviceDriver for SimulatedCamera {
    fn open(&mut self) -> Result<(), DriverError> {
        let _call = CallGuard::enter(&self.shared);
        self.shared.state.lock().open = true;
        debug!(
            "Simulated camera opened ({}x{})",
            self.settings.width, self.settings.height
        );
        Ok(())
    }

    fn close(&mut self) {
        let _call = CallGuard::enter(&self.shared);
        let mut state = self.shared.state.lock();
        state.open = false;
        state.streaming = false;
        debug!("Simulated camera closed");
    }

    fn start_stream(&mut self) -> Result<(), DriverError> {
        let _call = CallGuard::enter(&self.shared);
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(DriverError::NotOpen);
        }
        if state.sleeping {
            return Err(DriverError::failure("cannot stream while sleeping"));
        }
        state.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), DriverError> {
        let _call = CallGuard::enter(&self.shared);
        self.shared.state.lock().streaming = false;
        Ok(())
    }

    fn grab_one(&mut self, timeout: Duration) -> Result<FrameData, DriverError> {
        let _call = CallGuard::enter(&self.shared);
        let data = {
            let mut state = self.shared.state.lock();
            if !state.open {
                return Err(DriverError::NotOpen);
            }
            if state.sleeping {
                return Err(DriverError::failure("device is sleeping"));
            }
            if !state.streaming {
                return Err(DriverError::failure("stream not started"));
            }

            state.grab_count += 1;
            let index = state.grab_count;
            if let Some(fault) = state.grab_faults.remove(&index) {
                debug!("Injecting fault on simulated grab {}: {}", index, fault);
                return Err(match fault {
                    DriverError::Timeout { .. } => DriverError::Timeout { timeout },
                    other => other,
                });
            }

            self.run_auto_functions(&mut state);
            let brightness = self.brightness(state.exposure, state.gain, state.gamma);
            trace!(
                "Simulated grab {}: exposure {:.1}us gain {:.2}% -> brightness {:.3}",
                index,
                state.exposure,
                state.gain,
                brightness
            );
            self.render(brightness)
        };

        if !self.settings.grab_delay.is_zero() {
            std::thread::sleep(self.settings.grab_delay.min(timeout));
        }

        Ok(FrameData::new(
            0,
            Utc::now(),
            data,
            self.settings.width,
            self.settings.height,
            FrameFormat::Mono8,
        ))
    }

    fn set_parameter(&mut self, kind: ParameterKind, value: f64) -> Result<f64, DriverError> {
        let _call = CallGuard::enter(&self.shared);
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(DriverError::NotOpen);
        }
        if state.rejected.contains(&kind) || !self.range(kind).contains(value) {
            return Err(DriverError::Rejected { kind, value });
        }
        if state.streaming && state.locked_while_streaming.contains(&kind) {
            return Err(DriverError::failure(format!(
                "{} is locked while streaming",
                kind
            )));
        }

        let applied = self.quantize(kind, value);
        match kind {
            ParameterKind::Exposure => state.exposure = applied,
            ParameterKind::Gain => state.gain = applied,
            ParameterKind::Gamma => state.gamma = applied,
        }
        state.writes.push((kind, applied));
        Ok(applied)
    }

    fn parameter(&self, kind: ParameterKind) -> Result<f64, DriverError> {
        let _call = CallGuard::enter(&self.shared);
        let state = self.shared.state.lock();
        if !state.open {
            return Err(DriverError::NotOpen);
        }
        Ok(match kind {
            ParameterKind::Exposure => state.exposure,
            ParameterKind::Gain => state.gain,
            ParameterKind::Gamma => state.gamma,
        })
    }

    fn parameter_range(&self, kind: ParameterKind) -> ParameterRange {
        self.range(kind)
    }

    fn native_auto_range(&self) -> BrightnessRange {
        self.settings.native_auto_range
    }

    fn set_auto_brightness_target(&mut self, target: u8) -> Result<(), DriverError> {
        let _call = CallGuard::enter(&self.shared);
        self.shared.state.lock().auto_target = target;
        Ok(())
    }

    fn set_auto_exposure(&mut self, enabled: bool) -> Result<(), DriverError> {
        let _call = CallGuard::enter(&self.shared);
        self.shared.state.lock().auto_exposure = enabled;
        Ok(())
    }

    fn set_auto_gain(&mut self, enabled: bool) -> Result<(), DriverError> {
        let _call = CallGuard::enter(&self.shared);
        self.shared.state.lock().auto_gain = enabled;
        Ok(())
    }

    fn can_change_while_streaming(&self, kind: ParameterKind) -> bool {
        !self.shared.state.lock().locked_while_streaming.contains(&kind)
    }

    fn is_ready(&self) -> bool {
        let state = self.shared.state.lock();
        state.open
            && !state.sleeping
            && state.ready_at.map_or(true, |at| Instant::now() >= at)
    }

    fn enter_sleep(&mut self) -> Result<(), DriverError> {
        let _call = CallGuard::enter(&self.shared);
        let mut state = self.shared.state.lock();
        state.sleeping = true;
        state.streaming = false;
        Ok(())
    }

    fn wake(&mut self) -> Result<(), DriverError> {
        let _call = CallGuard::enter(&self.shared);
        self.shared.state.lock().sleeping = false;
        Ok(())
    }

    fn set_digital_output(&mut self, output_id: u8, on: bool) -> Result<(), DriverError> {
        let _call = CallGuard::enter(&self.shared);
        let mut state = self.shared.state.lock();
        if !state.open {
            return Err(DriverError::NotOpen);
        }
        state.digital_outputs.insert(output_id, on);
        Ok(())
    }
}

/// Inspection and fault injection for a [`SimulatedCamera`] owned elsewhere
#[derive(Clone)]
pub struct SimulatedHandle {
    shared: Arc<Shared>,
}

impl SimulatedHandle {
    /// Number of grab attempts so far, including injected failures
    pub fn grab_count(&self) -> usize {
        self.shared.state.lock().grab_count
    }

    /// Make the grab with the given 1-based attempt number fail
    pub fn fail_grab_at(&self, attempt: usize, error: DriverError) {
        self.shared.state.lock().grab_faults.insert(attempt, error);
    }

    /// Report not-ready until `delay` from now has elapsed
    pub fn set_ready_after(&self, delay: Duration) {
        self.shared.state.lock().ready_at = Some(Instant::now() + delay);
    }

    pub fn lock_while_streaming(&self, kind: ParameterKind) {
        self.shared.state.lock().locked_while_streaming.insert(kind);
    }

    pub fn reject(&self, kind: ParameterKind) {
        self.shared.state.lock().rejected.insert(kind);
    }

    /// Every successful parameter write in order, with the applied value
    pub fn parameter_writes(&self) -> Vec<(ParameterKind, f64)> {
        self.shared.state.lock().writes.clone()
    }

    pub fn writes_of(&self, kind: ParameterKind) -> Vec<f64> {
        self.shared
            .state
            .lock()
            .writes
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn current(&self, kind: ParameterKind) -> f64 {
        let state = self.shared.state.lock();
        match kind {
            ParameterKind::Exposure => state.exposure,
            ParameterKind::Gain => state.gain,
            ParameterKind::Gamma => state.gamma,
        }
    }

    pub fn auto_exposure_enabled(&self) -> bool {
        self.shared.state.lock().auto_exposure
    }

    pub fn auto_gain_enabled(&self) -> bool {
        self.shared.state.lock().auto_gain
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.state.lock().streaming
    }

    pub fn is_sleeping(&self) -> bool {
        self.shared.state.lock().sleeping
    }

    pub fn digital_output(&self, output_id: u8) -> Option<bool> {
        self.shared.state.lock().digital_outputs.get(&output_id).copied()
    }

    /// Highest number of driver calls ever observed in flight at once
    pub fn max_concurrent_calls(&self) -> usize {
        self.shared.max_concurrent_calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_streaming() -> (SimulatedCamera, SimulatedHandle) {
        let mut camera = SimulatedCamera::new(SimulationSettings::default());
        let handle = camera.handle();
        camera.open().unwrap();
        camera.start_stream().unwrap();
        (camera, handle)
    }

    #[test]
    fn test_frame_brightness_follows_exposure() {
        let (mut camera, _) = open_streaming();
        camera
            .set_parameter(ParameterKind::Exposure, 25000.0)
            .unwrap();
        let frame = camera.grab_one(Duration::from_millis(100)).unwrap();
        assert!((frame.mean_brightness() - 100.0).abs() < 0.01);

        camera
            .set_parameter(ParameterKind::Exposure, 12500.0)
            .unwrap();
        let frame = camera.grab_one(Duration::from_millis(100)).unwrap();
        assert!((frame.mean_brightness() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_auto_exposure_reaches_target() {
        let (mut camera, handle) = open_streaming();
        camera.set_auto_brightness_target(120).unwrap();
        camera.set_auto_exposure(true).unwrap();
        let frame = camera.grab_one(Duration::from_millis(100)).unwrap();
        assert!((frame.mean_brightness() - 120.0).abs() < 0.5);
        assert!(handle.writes_of(ParameterKind::Exposure).is_empty());
    }

    #[test]
    fn test_out_of_range_write_is_rejected() {
        let (mut camera, _) = open_streaming();
        let err = camera.set_parameter(ParameterKind::Gain, 150.0).unwrap_err();
        assert_eq!(
            err,
            DriverError::Rejected {
                kind: ParameterKind::Gain,
                value: 150.0
            }
        );
    }

    #[test]
    fn test_injected_timeout_uses_caller_timeout() {
        let (mut camera, handle) = open_streaming();
        handle.fail_grab_at(1, DriverError::Timeout { timeout: Duration::ZERO });
        let timeout = Duration::from_millis(40);
        assert_eq!(
            camera.grab_one(timeout).unwrap_err(),
            DriverError::Timeout { timeout }
        );
        assert!(camera.grab_one(timeout).is_ok());
        assert_eq!(handle.grab_count(), 2);
    }

    #[test]
    fn test_exposure_is_quantized() {
        let (mut camera, _) = open_streaming();
        let applied = camera
            .set_parameter(ParameterKind::Exposure, 1234.4)
            .unwrap();
        assert_eq!(applied, 1234.0);
    }
}
