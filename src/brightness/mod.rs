//! Target-brightness control.
//!
//! Targets inside the device's native auto range are handed to the hardware
//! auto functions. Anything outside it is reached by bisecting exposure, then
//! gain, one grabbed frame per probe.

mod search;

pub use search::{
    calc_current_brightness, BrightnessReport, BrightnessSearchEngine, BrightnessSearchState,
    SearchMode, SearchProbe,
};
