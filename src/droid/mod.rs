//! Android HAL device backends (cargo feature `droid`).
//!
//! Probe order per device class: vendor sysfs marker first, then the
//! AIDL HAL on `/dev/binder`, then the HIDL HAL on `/dev/hwbinder`.
//! All backends present the same contracts as the native devices.

pub mod binder;
pub mod leds;
pub mod vibra;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::feedback::{LedController, Vibrator};

use binder::Flavor;
use leds::{BinderLedsBackend, DroidLeds, DroidLedsBackend, SysfsLedsBackend};
use vibra::{BinderVibraBackend, DroidVibra, DroidVibraBackend};

/// Plain open-write-close helper for the vendor sysfs nodes.
pub(crate) fn sysfs_write(path: &Path, value: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::DeviceIo(format!("Unable to open sysfs path {}: {e}", path.display())))?;
    f.write_all(value.as_bytes())
        .map_err(|e| Error::DeviceIo(format!("Failed to write to {}: {e}", path.display())))
}

/// Find a usable HAL vibrator.
pub fn probe_vibra() -> Result<Arc<dyn Vibrator>> {
    let backend: Box<dyn DroidVibraBackend> = if let Ok(sysfs) = vibra::SysfsVibraBackend::probe()
    {
        info!("Using vendor sysfs vibra backend");
        Box::new(sysfs)
    } else if let Ok(aidl) = BinderVibraBackend::connect(Flavor::Aidl) {
        info!("Using AIDL vibra backend");
        Box::new(aidl)
    } else {
        let hidl = BinderVibraBackend::connect(Flavor::Hidl)?;
        info!("Using HIDL vibra backend");
        Box::new(hidl)
    };
    Ok(Arc::new(DroidVibra::new(backend)))
}

/// Find a usable HAL notification LED.
pub fn probe_leds() -> Result<Arc<dyn LedController>> {
    let backend: Box<dyn DroidLedsBackend> = if let Ok(sysfs) = SysfsLedsBackend::probe() {
        info!("Using vendor sysfs LED backend");
        Box::new(sysfs)
    } else if let Ok(aidl) = BinderLedsBackend::connect(Flavor::Aidl) {
        info!("Using AIDL LED backend");
        Box::new(aidl)
    } else {
        let hidl = BinderLedsBackend::connect(Flavor::Hidl)?;
        info!("Using HIDL LED backend");
        Box::new(hidl)
    };

    let leds = DroidLeds::new(backend);
    if !leds.is_supported() {
        debug!("No suitable notification LED found");
        return Err(Error::DeviceUnavailable(
            "HAL exposes no notification LED".to_string(),
        ));
    }
    Ok(Arc::new(leds))
}
