use crate::camera::CameraController;
use crate::config::BrightnessConfig;
use crate::driver::{ParameterKind, ParameterRange};
use crate::error::{BrightnessError, CameraError};
use crate::frame::FrameData;
use crate::parameter::{ParameterAdjuster, ParameterResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Which branch a brightness request took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    /// Target inside the hardware's own auto range
    NativeAuto,
    /// Bisection over exposure and/or gain
    Extended,
}

/// Bisection bookkeeping for one controlled parameter.
///
/// `low <= current_estimate <= high` holds after every step, and the bounds
/// only ever move towards each other.
#[derive(Debug, Clone, PartialEq)]
pub struct BrightnessSearchState {
    pub target: u8,
    pub controlled: ParameterKind,
    pub low: f64,
    pub high: f64,
    pub current_estimate: f64,
    pub iterations: u32,
    pub max_iterations: u32,
    pub use_exposure_auto: bool,
    pub use_gain_auto: bool,
}

impl BrightnessSearchState {
    pub fn new(
        target: u8,
        controlled: ParameterKind,
        range: ParameterRange,
        max_iterations: u32,
        use_exposure_auto: bool,
        use_gain_auto: bool,
    ) -> Self {
        Self {
            target,
            controlled,
            low: range.min,
            high: range.max,
            current_estimate: range.midpoint(),
            iterations: 0,
            max_iterations,
            use_exposure_auto,
            use_gain_auto,
        }
    }

    /// Move the estimate to the middle of the current bounds
    pub fn advance(&mut self) -> f64 {
        self.current_estimate = (self.low + self.high) / 2.0;
        self.current_estimate
    }

    /// Brightness is non-decreasing in the controlled parameter, so a dark
    /// probe raises the lower bound and a bright one lowers the upper bound.
    pub fn narrow(&mut self, measured: f64) {
        if measured < self.target as f64 {
            self.low = self.current_estimate;
        } else {
            self.high = self.current_estimate;
        }
    }

    pub fn exhausted(&self) -> bool {
        self.iterations >= self.max_iterations
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

/// One grab-and-measure step of the extended search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchProbe {
    pub parameter: ParameterKind,
    /// Midpoint requested for this probe
    pub estimate: f64,
    /// Value the device applied
    pub applied: f64,
    pub brightness: f64,
    /// Bounds in effect when the probe was taken
    pub low: f64,
    pub high: f64,
}

/// Outcome of a brightness request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrightnessReport {
    pub target: u8,
    pub reached_brightness: f64,
    pub converged: bool,
    pub mode: SearchMode,
    /// Probes taken by the extended search (zero for native auto)
    pub iterations: u32,
    pub probes: Vec<SearchProbe>,
}

impl BrightnessReport {
    /// Same report as a parameter result, for callers that treat brightness
    /// like any other target
    pub fn as_parameter_result(&self) -> ParameterResult {
        ParameterResult {
            reached_value: self.reached_brightness,
            within_tolerance: self.converged,
            converged: self.converged,
        }
    }

    /// Escalate soft non-convergence into an error
    pub fn into_strict(self) -> Result<Self, BrightnessError> {
        if self.converged {
            Ok(self)
        } else {
            Err(BrightnessError::NotConverged {
                target: self.target,
                reached: self.reached_brightness,
            })
        }
    }
}

struct BisectOutcome {
    converged: bool,
    applied: f64,
    brightness: f64,
}

/// Mean pixel intensity of a frame
pub fn calc_current_brightness(frame: &FrameData) -> f64 {
    frame.mean_brightness()
}

/// Reaches a target mean brightness over the full [1, 255] range even though
/// the hardware auto functions only work inside their native range.
#[derive(Clone)]
pub struct BrightnessSearchEngine {
    controller: Arc<CameraController>,
    adjuster: ParameterAdjuster,
    tolerance: f64,
    max_iterations: u32,
    last_brightness: Arc<Mutex<Option<f64>>>,
}

impl BrightnessSearchEngine {
    pub fn new(
        controller: Arc<CameraController>,
        adjuster: ParameterAdjuster,
        config: &BrightnessConfig,
    ) -> Self {
        Self {
            controller,
            adjuster,
            tolerance: config.tolerance,
            max_iterations: config.max_iterations.max(1),
            last_brightness: Arc::new(Mutex::new(None)),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Mean brightness of the most recently measured frame
    pub fn last_brightness(&self) -> Option<f64> {
        *self.last_brightness.lock()
    }

    /// Grab one frame and return its mean brightness
    pub fn measure_brightness(&self) -> Result<f64, BrightnessError> {
        let frame = self.controller.grab_image()?;
        Ok(self.record(&frame))
    }

    fn record(&self, frame: &FrameData) -> f64 {
        let brightness = calc_current_brightness(frame);
        *self.last_brightness.lock() = Some(brightness);
        brightness
    }

    /// Drive the mean frame brightness towards `target`.
    ///
    /// The whole search runs inside one device session so no other request
    /// can move the parameters between probes. Grab failures abort at once;
    /// retrying is up to the caller.
    pub fn set_brightness(
        &self,
        target: i32,
        exposure_auto: bool,
        gain_auto: bool,
    ) -> Result<BrightnessReport, BrightnessError> {
        let target = u8::try_from(target)
            .ok()
            .filter(|t| *t >= 1)
            .ok_or(BrightnessError::InvalidTarget { target })?;

        let _session = self.controller.session();
        self.controller.ensure_awake()?;

        let native = self.controller.native_auto_range();
        let report = if native.contains(target) {
            self.native_auto(target, exposure_auto, gain_auto)?
        } else {
            if !exposure_auto && !gain_auto {
                return Err(BrightnessError::NoControllableParameter { target });
            }
            self.extended(target, exposure_auto, gain_auto)?
        };

        info!(
            "Brightness target {} -> reached {:.1} ({:?}, {} probe(s), converged: {})",
            report.target,
            report.reached_brightness,
            report.mode,
            report.iterations,
            report.converged
        );
        Ok(report)
    }

    fn configure_auto(
        &self,
        target: Option<u8>,
        exposure_auto: bool,
        gain_auto: bool,
    ) -> Result<(), CameraError> {
        self.controller.with_device(|device| {
            if let Some(target) = target {
                device.set_auto_brightness_target(target)?;
            }
            device.set_auto_exposure(exposure_auto)?;
            device.set_auto_gain(gain_auto)
        })?;
        Ok(())
    }

    fn native_auto(
        &self,
        target: u8,
        exposure_auto: bool,
        gain_auto: bool,
    ) -> Result<BrightnessReport, BrightnessError> {
        debug!(
            "Brightness {} inside native auto range, exposure_auto={} gain_auto={}",
            target, exposure_auto, gain_auto
        );
        self.configure_auto(Some(target), exposure_auto, gain_auto)?;

        let measured = self.controller.grab_image().map(|frame| self.record(&frame));
        // Hand the converged values back to manual control either way
        if let Err(e) = self.configure_auto(None, false, false) {
            warn!("Failed to disable native auto functions: {}", e);
        }
        let reached = measured?;

        Ok(BrightnessReport {
            target,
            reached_brightness: reached,
            converged: (reached - target as f64).abs() <= self.tolerance,
            mode: SearchMode::NativeAuto,
            iterations: 0,
            probes: Vec::new(),
        })
    }

    fn extended(
        &self,
        target: u8,
        exposure_auto: bool,
        gain_auto: bool,
    ) -> Result<BrightnessReport, BrightnessError> {
        debug!(
            "Brightness {} outside native auto range, starting extended search",
            target
        );
        self.configure_auto(None, false, false)?;

        let mut order = Vec::with_capacity(2);
        if exposure_auto {
            order.push(ParameterKind::Exposure);
        }
        if gain_auto {
            order.push(ParameterKind::Gain);
        }

        // One iteration budget covers every phase
        let mut probes = Vec::new();
        let mut phases: Vec<(ParameterKind, f64)> = Vec::with_capacity(order.len());
        let mut best: Option<(usize, BisectOutcome)> = None;
        for kind in order {
            let remaining = self.max_iterations.saturating_sub(probes.len() as u32);
            if remaining == 0 {
                debug!("No iterations left for the {} search", kind);
                break;
            }
            let start = self.adjuster.current(kind)?;
            let mut state = BrightnessSearchState::new(
                target,
                kind,
                self.controller.parameter_range(kind),
                remaining,
                exposure_auto,
                gain_auto,
            );
            let outcome = self.bisect(&mut state, &mut probes)?;
            debug!(
                "{} search settled at {:.2} with brightness {:.2} after {} probe(s)",
                kind, outcome.applied, outcome.brightness, state.iterations
            );
            phases.push((kind, start));
            let converged = outcome.converged;
            let closer = best.as_ref().map_or(true, |(_, b)| {
                (outcome.brightness - target as f64).abs() <= (b.brightness - target as f64).abs()
            });
            if closer {
                best = Some((phases.len() - 1, outcome));
            }
            if converged {
                break;
            }
            debug!(
                "{} alone could not reach brightness {}, continuing with the next parameter",
                kind, target
            );
        }

        let (phase, best) = best.ok_or(BrightnessError::NoControllableParameter { target })?;
        let mut reached = best.brightness;
        let later = &phases[phase + 1..];
        if !later.is_empty() {
            // Undo what the later, losing phases moved
            for (kind, start) in later {
                self.adjuster.set_parameter(*kind, *start)?;
            }
            reached = self.measure_brightness()?;
            debug!(
                "Restored {} phase(s) after an earlier one came closer, brightness now {:.2}",
                later.len(),
                reached
            );
        }

        Ok(BrightnessReport {
            target,
            reached_brightness: reached,
            converged: (reached - target as f64).abs() <= self.tolerance,
            mode: SearchMode::Extended,
            iterations: probes.len() as u32,
            probes,
        })
    }

    /// Bounded bisection over one parameter. On non-convergence the probe
    /// closest to target is re-applied and reported.
    fn bisect(
        &self,
        state: &mut BrightnessSearchState,
        probes: &mut Vec<SearchProbe>,
    ) -> Result<BisectOutcome, BrightnessError> {
        let kind = state.controlled;
        let target = state.target as f64;
        let resolution = self
            .adjuster
            .tolerances()
            .for_parameter(kind, state.low);
        let mut best: Option<(f64, f64)> = None;
        let mut last_applied = None;

        loop {
            let estimate = state.advance();
            let applied = self.adjuster.set_parameter(kind, estimate)?.reached_value;
            let frame = self.controller.grab_image()?;
            let brightness = self.record(&frame);
            state.iterations += 1;
            last_applied = Some(applied);

            probes.push(SearchProbe {
                parameter: kind,
                estimate,
                applied,
                brightness,
                low: state.low,
                high: state.high,
            });
            trace!(
                "Probe {}/{}: {} {:.2} -> brightness {:.2} (bounds [{:.2}, {:.2}])",
                state.iterations,
                state.max_iterations,
                kind,
                applied,
                brightness,
                state.low,
                state.high
            );

            if best.map_or(true, |(_, b)| (brightness - target).abs() < (b - target).abs()) {
                best = Some((applied, brightness));
            }

            if (brightness - target).abs() <= self.tolerance {
                return Ok(BisectOutcome {
                    converged: true,
                    applied,
                    brightness,
                });
            }

            state.narrow(brightness);
            if state.exhausted() {
                debug!("{} search hit max iterations", kind);
                break;
            }
            if state.width() < resolution {
                debug!("{} search interval collapsed below {}", kind, resolution);
                break;
            }
        }

        let (applied, brightness) = match best {
            Some(best) => best,
            None => return Err(BrightnessError::NoControllableParameter { target: state.target }),
        };
        if last_applied != Some(applied) {
            self.adjuster.set_parameter(kind, applied)?;
        }

        Ok(BisectOutcome {
            converged: false,
            applied,
            brightness,
        })
    }
}
