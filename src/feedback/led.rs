//! LED feedback: starts a repeating blink pattern. There is no natural
//! end; the pattern runs until the event ends it.

use tracing::{debug, warn};

use super::{DeviceRefs, DoneHandle, LedFeedback};

pub(super) fn run(cfg: &LedFeedback, devices: &DeviceRefs) {
    let Some(leds) = &devices.leds else {
        warn!("No LED device, LED feedback does nothing");
        return;
    };

    debug!(
        "Periodic LED feedback: color {}, brightness {}%, {} mHz",
        cfg.color.as_str(),
        cfg.max_brightness,
        cfg.frequency
    );
    if let Err(e) = leds.start_periodic(cfg.color, cfg.max_brightness, cfg.frequency) {
        warn!("{e}");
    }
}

pub(super) fn end(cfg: &LedFeedback, devices: &DeviceRefs, done: DoneHandle) {
    if let Some(leds) = &devices.leds {
        if let Err(e) = leds.stop(cfg.color) {
            warn!("{e}");
        }
    }
    done.send();
}
