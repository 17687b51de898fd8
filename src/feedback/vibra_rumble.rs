//! Rumble feedback: one or more strong rumbles with pauses in between.
//!
//! The first rumble uploads a fresh effect; follow-ups replay the same
//! slot on a periodic timer. A watchdog at the configured duration
//! erases the effect and reports completion.

use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::dev::vibra::DEFAULT_VIBRA_DURATION_MS;

use super::{DeviceRefs, DoneHandle, VibraRumbleFeedback};

/// Split the total duration into per-rumble length, pause and count,
/// falling back to a single default-length rumble when the numbers
/// don't work out.
pub(crate) fn rumble_params(duration: u32, count: u32, pause: u32) -> (u32, u32, u32) {
    if count == 0 {
        return (DEFAULT_VIBRA_DURATION_MS, 0, 1);
    }
    let rumble = (duration / count) as i64 - pause as i64;
    if rumble <= 0 {
        (DEFAULT_VIBRA_DURATION_MS, 0, 1)
    } else {
        (rumble as u32, pause, count)
    }
}

pub(super) fn run(
    cfg: &VibraRumbleFeedback,
    devices: &DeviceRefs,
    tasks: &mut Vec<AbortHandle>,
    done: DoneHandle,
) {
    let Some(vibra) = devices.vibra.clone() else {
        warn!("No vibra device, ending rumble feedback right away");
        done.send();
        return;
    };

    let (rumble, pause, count) = rumble_params(cfg.duration, cfg.count, cfg.pause);
    let period = rumble + pause;
    debug!(
        "Rumble vibra event: duration {}, rumble: {}, pause: {}, period: {}",
        cfg.duration, rumble, pause, period
    );

    if let Err(e) = vibra.rumble(rumble, true) {
        warn!("{e}");
    }

    if count > 1 {
        let repeater = vibra.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(period as u64));
            // The first tick fires immediately; the initial rumble is
            // already playing.
            interval.tick().await;
            for _ in 1..count {
                interval.tick().await;
                if let Err(e) = repeater.rumble(rumble, false) {
                    warn!("{e}");
                }
            }
        });
        tasks.push(task.abort_handle());
    }

    let duration = Duration::from_millis(cfg.duration as u64);
    let task = tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        if let Err(e) = vibra.remove_effect() {
            warn!("{e}");
        }
        done.send();
    });
    tasks.push(task.abort_handle());
}

/// Shared end path for both vibra feedback kinds: stop playback, erase
/// the slot and report completion.
pub(super) fn end(devices: &DeviceRefs, done: DoneHandle) {
    if let Some(vibra) = &devices.vibra {
        if let Err(e) = vibra.stop() {
            warn!("{e}");
        }
    }
    done.send();
}
