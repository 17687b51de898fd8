//! Android HAL vibrator backends.
//!
//! All backends speak the simple on/off contract of the Android
//! vibrator HALs; the richer evdev waveform parameters collapse onto
//! plain on-for-N-ms calls.

use std::path::Path;

use tracing::debug;

use crate::droid::binder::{BinderClient, Flavor};
use crate::droid::sysfs_write;
use crate::error::{Error, Result};
use crate::feedback::Vibrator;

const SYSFS_VIBRATOR_PATH: &str = "/sys/class/leds/vibrator";

const AIDL_VIBRATOR_IFACE: &str = "android.hardware.vibrator.IVibrator";
const HIDL_VIBRATOR_IFACE: &str = "android.hardware.vibrator@1.0::IVibrator";
const SERVICE_SLOT: &str = "default";

// android.hardware.vibrator.IVibrator
const AIDL_VIBRATOR_ON: u32 = 3;
const AIDL_VIBRATOR_OFF: u32 = 2;

// android.hardware.vibrator@1.0::IVibrator
const HIDL_VIBRATOR_ON: u32 = 1;
const HIDL_VIBRATOR_OFF: u32 = 2;

/// On/off contract shared by every vibrator HAL flavour.
pub trait DroidVibraBackend: Send + Sync {
    fn on(&self, duration_ms: u32) -> Result<()>;
    fn off(&self) -> Result<()>;
}

/// Vendor sysfs vibrator (`duration` + `activate` attributes).
pub struct SysfsVibraBackend;

impl SysfsVibraBackend {
    pub fn probe() -> Result<Self> {
        if !Path::new(SYSFS_VIBRATOR_PATH).exists() {
            return Err(Error::DeviceUnavailable(format!(
                "{SYSFS_VIBRATOR_PATH} not present"
            )));
        }
        Ok(Self)
    }
}

impl DroidVibraBackend for SysfsVibraBackend {
    fn on(&self, duration_ms: u32) -> Result<()> {
        let base = Path::new(SYSFS_VIBRATOR_PATH);
        sysfs_write(&base.join("duration"), &duration_ms.to_string())?;
        sysfs_write(&base.join("activate"), "1")
    }

    fn off(&self) -> Result<()> {
        sysfs_write(&Path::new(SYSFS_VIBRATOR_PATH).join("activate"), "0")
    }
}

/// Vibrator HAL over binder, AIDL or HIDL.
pub struct BinderVibraBackend {
    client: BinderClient,
}

impl BinderVibraBackend {
    pub fn connect(flavor: Flavor) -> Result<Self> {
        let iface = match flavor {
            Flavor::Aidl => AIDL_VIBRATOR_IFACE,
            Flavor::Hidl => HIDL_VIBRATOR_IFACE,
        };
        let client = BinderClient::connect(flavor, iface, SERVICE_SLOT)?;
        debug!("Droid vibra device usable ({flavor:?})");
        Ok(Self { client })
    }
}

impl DroidVibraBackend for BinderVibraBackend {
    fn on(&self, duration_ms: u32) -> Result<()> {
        let mut req = self.client.request();
        req.write_i32(duration_ms as i32);
        let code = match self.client.flavor() {
            Flavor::Aidl => {
                // on(int timeoutMs, IVibratorCallback callback)
                req.write_null_binder();
                AIDL_VIBRATOR_ON
            }
            Flavor::Hidl => HIDL_VIBRATOR_ON,
        };
        self.client.transact(code, &req)?.read_status()
    }

    fn off(&self) -> Result<()> {
        let req = self.client.request();
        let code = match self.client.flavor() {
            Flavor::Aidl => AIDL_VIBRATOR_OFF,
            Flavor::Hidl => HIDL_VIBRATOR_OFF,
        };
        self.client.transact(code, &req)?.read_status()
    }
}

/// Adapter exposing a HAL backend through the daemon-wide [`Vibrator`]
/// contract.
pub struct DroidVibra {
    backend: Box<dyn DroidVibraBackend>,
}

impl DroidVibra {
    pub fn new(backend: Box<dyn DroidVibraBackend>) -> Self {
        Self { backend }
    }
}

impl Vibrator for DroidVibra {
    fn rumble(&self, duration_ms: u32, upload: bool) -> Result<()> {
        // The HAL has no effect slots; re-triggering just turns the
        // motor on again.
        let _ = upload;
        debug!("Playing rumbling vibra effect");
        self.backend.on(duration_ms)
    }

    fn periodic(
        &self,
        duration_ms: u32,
        _magnitude: u16,
        _fade_in_level: u16,
        _fade_in_time: u32,
    ) -> Result<()> {
        debug!("Playing periodic vibra effect");
        self.backend.on(duration_ms)
    }

    fn remove_effect(&self) -> Result<()> {
        self.backend.off()
    }

    fn stop(&self) -> Result<()> {
        self.backend.off()
    }
}
