//! LED set: all usable LEDs on the host, keyed by declared color.

use tracing::{debug, warn};

use crate::dev::led::LedDevice;
use crate::dev::sysfs::{self, DeviceInfo};
use crate::error::{Error, Result};
use crate::feedback::LedColor;

const LED_SUBSYSTEM: &str = "leds";

/// Collection of LED devices in probe order.
pub struct LedSet {
    leds: Vec<LedDevice>,
}

impl LedSet {
    /// Enumerate LEDs marked with `FEEDBACKD_TYPE=led`.
    ///
    /// Fails when no usable LED is found.
    pub fn new() -> Result<Self> {
        let devices = sysfs::enumerate_subsystem(LED_SUBSYSTEM)?;
        Self::from_devices(&devices)
    }

    pub fn from_devices(devices: &[DeviceInfo]) -> Result<Self> {
        let mut leds = Vec::new();
        for info in devices {
            if !info.is_led() {
                continue;
            }
            match LedDevice::probe(info) {
                Ok(led) => leds.push(led),
                Err(e) => warn!("Skipping LED {}: {e}", info.sysname),
            }
        }

        if leds.is_empty() {
            return Err(Error::DeviceUnavailable("No usable LEDs found".to_string()));
        }
        debug!("Found {} usable LED(s)", leds.len());
        Ok(Self { leds })
    }

    /// First LED claiming the color, falling back to the first LED.
    fn find(&self, color: LedColor) -> &LedDevice {
        self.leds
            .iter()
            .find(|led| led.has_color(color))
            .unwrap_or(&self.leds[0])
    }

    pub fn start_periodic(
        &self,
        color: LedColor,
        max_brightness_pct: u8,
        freq_mhz: u32,
    ) -> Result<()> {
        self.find(color)
            .start_periodic(color, max_brightness_pct, freq_mhz)
    }

    pub fn stop(&self, color: LedColor) -> Result<()> {
        self.find(color).stop()
    }

    pub fn len(&self) -> usize {
        self.leds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn led_info(dir: &tempfile::TempDir, name: &str, attrs: &[(&str, &str)]) -> DeviceInfo {
        let path = dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        for (attr, value) in attrs {
            std::fs::write(path.join(attr), value).unwrap();
        }
        DeviceInfo {
            syspath: path,
            sysname: name.to_string(),
            devnode: None,
            feedbackd_type: Some("led".to_string()),
        }
    }

    #[test]
    fn test_empty_set_fails() {
        assert!(LedSet::from_devices(&[]).is_err());

        // Unmarked devices are ignored
        let unmarked = DeviceInfo {
            syspath: PathBuf::from("/sys/class/leds/foo"),
            sysname: "blue:power".to_string(),
            devnode: None,
            feedbackd_type: None,
        };
        assert!(LedSet::from_devices(&[unmarked]).is_err());
    }

    #[test]
    fn test_find_by_color_with_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let blue = led_info(&dir, "blue:status", &[("max_brightness", "255")]);
        let red = led_info(&dir, "red:status", &[("max_brightness", "255")]);
        let set = LedSet::from_devices(&[blue, red]).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.find(LedColor::Red).has_color(LedColor::Red));
        // No white LED: first one wins
        assert!(set.find(LedColor::White).has_color(LedColor::Blue));
    }

    #[test]
    fn test_unusable_led_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = led_info(&dir, "white:notify", &[("max_brightness", "255")]);
        // No max_brightness attribute
        let bad = led_info(&dir, "green:oops", &[]);
        let set = LedSet::from_devices(&[bad, good]).unwrap();
        assert_eq!(set.len(), 1);
    }
}
