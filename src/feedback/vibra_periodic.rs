//! Periodic vibra feedback: a sine waveform with fade-in, stopped by a
//! watchdog at the configured duration.

use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::{DeviceRefs, DoneHandle, VibraPeriodicFeedback};

pub(super) fn run(
    cfg: &VibraPeriodicFeedback,
    devices: &DeviceRefs,
    tasks: &mut Vec<AbortHandle>,
    done: DoneHandle,
) {
    let Some(vibra) = devices.vibra.clone() else {
        warn!("No vibra device, ending periodic feedback right away");
        done.send();
        return;
    };

    debug!(
        "Periodic vibra: {} {} {} {}",
        cfg.duration, cfg.magnitude, cfg.fade_in_level, cfg.fade_in_time
    );
    if let Err(e) = vibra.periodic(cfg.duration, cfg.magnitude, cfg.fade_in_level, cfg.fade_in_time)
    {
        warn!("{e}");
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
