//! Android HAL LED backends.
//!
//! The binder flavours drive the notification light through the
//! lights HAL; the vendor sysfs flavour toggles three fixed
//! `/sys/class/leds/{red,green,blue}` nodes.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::droid::binder::{BinderClient, Flavor};
use crate::droid::sysfs_write;
use crate::error::{Error, Result};
use crate::feedback::{LedColor, LedController};

const SYSFS_LED_BASE: &str = "/sys/class/leds";

const AIDL_LIGHTS_IFACE: &str = "android.hardware.light.ILights";
const HIDL_LIGHT_IFACE: &str = "android.hardware.light@2.0::ILight";
const SERVICE_SLOT: &str = "default";

// android.hardware.light.ILights
const AIDL_SET_LIGHT_STATE: u32 = 1;
const AIDL_GET_LIGHTS: u32 = 2;

// android.hardware.light@2.0::ILight
const HIDL_SET_LIGHT: u32 = 1;
const HIDL_GET_SUPPORTED_TYPES: u32 = 2;

const LIGHT_TYPE_NOTIFICATIONS: i32 = 4;

const FLASH_TYPE_NONE: i32 = 0;
const FLASH_TYPE_TIMED: i32 = 1;

const BRIGHTNESS_MODE_USER: i32 = 0;

// Binder stability annotation on AIDL parcelables
const BINDER_STABILITY_VINTF: i32 = 0b111111;

/// `LightState` as the lights HALs expect it: 20 bytes, 4-byte
/// aligned.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LightState {
    color: u32,
    flash_mode: i32,
    flash_on_ms: i32,
    flash_off_ms: i32,
    brightness_mode: i32,
}

impl LightState {
    fn as_bytes(&self) -> [u8; 20] {
        let mut bytes = [0u8; 20];
        bytes[0..4].copy_from_slice(&self.color.to_ne_bytes());
        bytes[4..8].copy_from_slice(&self.flash_mode.to_ne_bytes());
        bytes[8..12].copy_from_slice(&self.flash_on_ms.to_ne_bytes());
        bytes[12..16].copy_from_slice(&self.flash_off_ms.to_ne_bytes());
        bytes[16..20].copy_from_slice(&self.brightness_mode.to_ne_bytes());
        bytes
    }
}

/// 32-bit ARGB for a feedback color at a brightness percentage.
pub(crate) fn argb_color(color: LedColor, max_brightness_pct: u8) -> u32 {
    let max = ((max_brightness_pct as u32) * 0xff / 100) & 0xff;
    let argb = 0xff00_0000u32; // full alpha
    match color {
        LedColor::White | LedColor::Rgb => argb | (max << 16) | (max << 8) | max,
        LedColor::Red => argb | (max << 16),
        LedColor::Green => argb | (max << 8),
        LedColor::Blue => argb | max,
    }
}

/// Flash half-period in ms for a frequency in mHz.
pub(crate) fn flash_period_ms(freq_mhz: u32) -> i32 {
    (1_000_000 / freq_mhz / 2) as i32
}

/// Notification-light contract shared by the HAL flavours.
pub trait DroidLedsBackend: Send + Sync {
    /// Whether the HAL exposes a notification light at all.
    fn is_supported(&self) -> bool;
    fn start_periodic(&self, color: LedColor, max_brightness_pct: u8, freq_mhz: u32)
        -> Result<()>;
    fn stop(&self, color: LedColor) -> Result<()>;
}

/// Vendor sysfs notification LED: one node per color channel.
pub struct SysfsLedsBackend {
    led_paths: [PathBuf; 3],
}

impl SysfsLedsBackend {
    pub fn probe() -> Result<Self> {
        let base = Path::new(SYSFS_LED_BASE);
        let led_paths = [base.join("blue"), base.join("green"), base.join("red")];
        if !led_paths.iter().any(|p| p.exists()) {
            return Err(Error::DeviceUnavailable(
                "No vendor LED nodes present".to_string(),
            ));
        }
        Ok(Self { led_paths })
    }

    fn set_all(&self, brightness: u32) -> Result<()> {
        // The vendor nodes only flash while blink is armed
        let blink = if brightness > 0 { "1" } else { "0" };
        let mut result = Ok(());
        for path in &self.led_paths {
            if let Err(e) = sysfs_write(&path.join("brightness"), &brightness.to_string()) {
                warn!("{e}");
                result = Err(Error::DeviceIo("Failed to set LED brightness".to_string()));
            }
            if let Err(e) = sysfs_write(&path.join("blink"), blink) {
                warn!("{e}");
                result = Err(Error::DeviceIo("Failed to set LED blink".to_string()));
            }
        }
        result
    }
}

impl DroidLedsBackend for SysfsLedsBackend {
    fn is_supported(&self) -> bool {
        true
    }

    fn start_periodic(
        &self,
        _color: LedColor,
        _max_brightness_pct: u8,
        _freq_mhz: u32,
    ) -> Result<()> {
        self.set_all(1)
    }

    fn stop(&self, _color: LedColor) -> Result<()> {
        self.set_all(0)
    }
}

/// Lights HAL over binder, AIDL or HIDL.
pub struct BinderLedsBackend {
    client: BinderClient,
}

impl BinderLedsBackend {
    pub fn connect(flavor: Flavor) -> Result<Self> {
        let iface = match flavor {
            Flavor::Aidl => AIDL_LIGHTS_IFACE,
            Flavor::Hidl => HIDL_LIGHT_IFACE,
        };
        let client = BinderClient::connect(flavor, iface, SERVICE_SLOT)?;
        debug!("Droid LED backend usable ({flavor:?})");
        Ok(Self { client })
    }

    fn set_light_state(&self, state: LightState) -> Result<()> {
        let mut req = self.client.request();
        let code = match self.client.flavor() {
            Flavor::Aidl => {
                // setLightState(int id, HwLightState state)
                req.write_i32(LIGHT_TYPE_NOTIFICATIONS);
                req.write_parcelable(&state.as_bytes());
                req.write_i32(BINDER_STABILITY_VINTF);
                AIDL_SET_LIGHT_STATE
            }
            Flavor::Hidl => {
                // setLight(Type type, LightState state)
                req.write_i32(LIGHT_TYPE_NOTIFICATIONS);
                let bytes = state.as_bytes();
                for chunk in bytes.chunks_exact(4) {
                    req.write_u32(u32::from_ne_bytes(chunk.try_into().unwrap()));
                }
                HIDL_SET_LIGHT
            }
        };
        self.client.transact(code, &req)?.read_status()
    }
}

/// Scan a `getLights()` reply (an array of `HwLight {id, ordinal,
/// type}`) for a notification light.
fn aidl_has_notification_light(reply: &mut crate::droid::binder::ReplyParcel) -> bool {
    let Ok(count) = reply.read_i32() else {
        return false;
    };
    for _ in 0..count {
        let Ok(non_null) = reply.read_i32() else {
            return false;
        };
        if non_null == 0 {
            continue;
        }
        let Ok(size) = reply.read_i32() else {
            return false;
        };
        let words = ((size - 4) / 4).max(0);
        let mut fields = Vec::with_capacity(words as usize);
        for _ in 0..words {
            match reply.read_i32() {
                Ok(value) => fields.push(value),
                Err(_) => return false,
            }
        }
        if fields.get(2) == Some(&LIGHT_TYPE_NOTIFICATIONS) {
            return true;
        }
    }
    false
}

impl DroidLedsBackend for BinderLedsBackend {
    fn is_supported(&self) -> bool {
        let req = self.client.request();
        let code = match self.client.flavor() {
            Flavor::Aidl => AIDL_GET_LIGHTS,
            Flavor::Hidl => HIDL_GET_SUPPORTED_TYPES,
        };
        let supported = self.client.transact(code, &req).and_then(|mut reply| {
            reply.read_status()?;
            let ok = match self.client.flavor() {
                Flavor::Aidl => aidl_has_notification_light(&mut reply),
                // HIDL returns the type list in an out-of-line buffer
                Flavor::Hidl => true,
            };
            Ok(ok)
        });
        match supported {
            Ok(ok) => {
                if ok {
                    debug!("droid LED usable");
                } else {
                    warn!("No suitable notification LED found");
                }
                ok
            }
            Err(e) => {
                warn!("Failed to get supported LED types: {e}");
                false
            }
        }
    }

    fn start_periodic(
        &self,
        color: LedColor,
        max_brightness_pct: u8,
        freq_mhz: u32,
    ) -> Result<()> {
        let t = flash_period_ms(freq_mhz);
        self.set_light_state(LightState {
            color: argb_color(color, max_brightness_pct),
            flash_mode: FLASH_TYPE_TIMED,
            flash_on_ms: t,
            flash_off_ms: t,
            brightness_mode: BRIGHTNESS_MODE_USER,
        })
    }

    fn stop(&self, _color: LedColor) -> Result<()> {
        self.set_light_state(LightState {
            color: 0,
            flash_mode: FLASH_TYPE_NONE,
            flash_on_ms: 0,
            flash_off_ms: 0,
            brightness_mode: BRIGHTNESS_MODE_USER,
        })
    }
}

/// Adapter exposing a HAL backend through the daemon-wide
/// [`LedController`] contract.
pub struct DroidLeds {
    backend: Box<dyn DroidLedsBackend>,
}

impl DroidLeds {
    pub fn new(backend: Box<dyn DroidLedsBackend>) -> Self {
        Self { backend }
    }

    pub fn is_supported(&self) -> bool {
        self.backend.is_supported()
    }
}

impl LedController for DroidLeds {
    fn start_periodic(
        &self,
        color: LedColor,
        max_brightness_pct: u8,
        freq_mhz: u32,
    ) -> Result<()> {
        self.backend.start_periodic(color, max_brightness_pct, freq_mhz)
    }

    fn stop(&self, color: LedColor) -> Result<()> {
        self.backend.stop(color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_state_layout() {
        assert_eq!(std::mem::size_of::<LightState>(), 20);
        assert_eq!(std::mem::align_of::<LightState>(), 4);
    }

    #[test]
    fn test_argb_color() {
        assert_eq!(argb_color(LedColor::White, 100), 0xffffffff);
        assert_eq!(argb_color(LedColor::Red, 100), 0xffff0000);
        assert_eq!(argb_color(LedColor::Green, 100), 0xff00ff00);
        assert_eq!(argb_color(LedColor::Blue, 100), 0xff0000ff);
        // 50% scales each active channel
        assert_eq!(argb_color(LedColor::Blue, 50), 0xff00007f);
        assert_eq!(argb_color(LedColor::White, 0), 0xff000000);
    }

    #[test]
    fn test_flash_period() {
        // 1 Hz = 1000 mHz: 500 ms on, 500 ms off
        assert_eq!(flash_period_ms(1000), 500);
        assert_eq!(flash_period_ms(250), 2000);
    }
}
