//! Sound feedback: plays an XDG sound theme effect, completion comes
//! from the playback callback.

use tracing::{debug, warn};

use super::{DeviceRefs, DoneHandle, SoundFeedback};

pub(super) fn run(cfg: &SoundFeedback, devices: &DeviceRefs, done: DoneHandle) {
    let Some(sound) = devices.sound.clone() else {
        warn!("No sound device, ending sound feedback right away");
        done.send();
        return;
    };

    debug!("Sound event {}", cfg.effect);
    let key = done.playback_key();
    sound.play(key, &cfg.effect, move || done.send());
}

/// Cancel the playback; the play callback reports completion.
pub(super) fn end(devices: &DeviceRefs, done: DoneHandle) {
    match &devices.sound {
        Some(sound) => sound.stop(done.playback_key()),
        // Without a device the run path already completed immediately,
        // so there is nothing to cancel.
        None => done.send(),
    }
}
