//! Single LED abstraction over sysfs.
//!
//! Two flavours exist: plain single-color LEDs (color inferred from the
//! device name) and multi-color LEDs exposing `multi_index` /
//! `multi_intensity`. Blink patterns go through the kernel's pattern
//! trigger.
//!
//! See Documentation/ABI/testing/sysfs-class-led-trigger-pattern.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dev::sysfs::{self, DeviceInfo};
use crate::error::{Error, Result};
use crate::feedback::LedColor;

const LED_BRIGHTNESS_ATTR: &str = "brightness";
const LED_MAX_BRIGHTNESS_ATTR: &str = "max_brightness";
const LED_PATTERN_ATTR: &str = "pattern";
const LED_MULTI_INDEX_ATTR: &str = "multi_index";
const LED_MULTI_INTENSITY_ATTR: &str = "multi_intensity";

#[derive(Debug, Clone, PartialEq, Eq)]
enum LedKind {
    Single {
        color: LedColor,
    },
    /// Slot positions of the color channels within `multi_intensity`.
    Multicolor {
        red_index: usize,
        green_index: usize,
        blue_index: usize,
    },
}

/// One LED sysfs device.
#[derive(Debug)]
pub struct LedDevice {
    syspath: PathBuf,
    max_brightness: u32,
    kind: LedKind,
}

/// Blink pattern: off, ramp up over `t`, on at `max`, ramp down over `t`.
fn pattern_string(max: u32, t_ms: u32) -> String {
    format!("0 {t_ms} {max} {t_ms}\n")
}

/// Half-period in ms for a blink frequency in mHz.
fn half_period_ms(freq_mhz: u32) -> u32 {
    1_000_000 / freq_mhz / 2
}

impl LedDevice {
    /// Probe a udev LED device. The caller has already checked the
    /// `FEEDBACKD_TYPE=led` marker.
    pub fn probe(info: &DeviceInfo) -> Result<Self> {
        let syspath = &info.syspath;

        if let Some(index) = sysfs::attr_strv(syspath, LED_MULTI_INDEX_ATTR) {
            return Self::probe_multicolor(info, &index);
        }

        let max_brightness = sysfs::attr_int(syspath, LED_MAX_BRIGHTNESS_ATTR)
            .filter(|&b| b > 0)
            .ok_or_else(|| {
                Error::DeviceUnavailable(format!("{} has no max_brightness", info.sysname))
            })?;

        // Fixed colors inferred from the device name until the kernel
        // tells us more about diffusors.
        let color = [
            LedColor::White,
            LedColor::Red,
            LedColor::Green,
            LedColor::Blue,
        ]
        .into_iter()
        .find(|c| info.sysname.contains(c.as_str()))
        .ok_or_else(|| {
            Error::DeviceUnavailable(format!("No usable color in LED name {}", info.sysname))
        })?;

        debug!("LED at {} usable as {}", syspath.display(), color.as_str());
        Ok(Self {
            syspath: syspath.clone(),
            max_brightness,
            kind: LedKind::Single { color },
        })
    }

    fn probe_multicolor(info: &DeviceInfo, index: &[String]) -> Result<Self> {
        let syspath = &info.syspath;
        let max_brightness = sysfs::attr_int(syspath, LED_MAX_BRIGHTNESS_ATTR)
            .filter(|&b| b > 0)
            .ok_or_else(|| {
                Error::DeviceUnavailable(format!("{} has no max_brightness", info.sysname))
            })?;

        let (mut red_index, mut green_index, mut blue_index) = (0, 0, 0);
        let mut slot = 0;
        for token in index {
            match token.as_str() {
                "red" => {
                    red_index = slot;
                    slot += 1;
                }
                "green" => {
                    green_index = slot;
                    slot += 1;
                }
                "blue" => {
                    blue_index = slot;
                    slot += 1;
                }
                other => {
                    tracing::warn!("Unsupported LED color index: {slot} {other}");
                }
            }
        }

        debug!("LED at {} usable as multicolor", syspath.display());
        Ok(Self {
            syspath: syspath.clone(),
            max_brightness,
            kind: LedKind::Multicolor {
                red_index,
                green_index,
                blue_index,
            },
        })
    }

    pub fn syspath(&self) -> &Path {
        &self.syspath
    }

    /// Whether this LED can render the requested color. Multi-color
    /// LEDs only answer to [`LedColor::Rgb`].
    pub fn has_color(&self, color: LedColor) -> bool {
        match &self.kind {
            LedKind::Single { color: own } => *own == color,
            LedKind::Multicolor { .. } => color == LedColor::Rgb,
        }
    }

    fn set_brightness(&self, brightness: u32) -> Result<()> {
        sysfs::set_attr_int(&self.syspath, LED_BRIGHTNESS_ATTR, brightness)
    }

    /// Start a repeating blink pattern.
    pub fn start_periodic(
        &self,
        color: LedColor,
        max_brightness_pct: u8,
        freq_mhz: u32,
    ) -> Result<()> {
        let max = (self.max_brightness as f64 * (max_brightness_pct as f64 / 100.0)) as u32;
        let t = half_period_ms(freq_mhz);

        if let LedKind::Multicolor {
            red_index,
            green_index,
            blue_index,
        } = self.kind
        {
            let channels = multi_intensity(color, max, red_index, green_index, blue_index)?;
            let intensity = format!("{} {} {}\n", channels[0], channels[1], channels[2]);
            sysfs::set_attr_string(&self.syspath, LED_MULTI_INTENSITY_ATTR, &intensity)?;
            self.set_brightness(max)?;
        }

        let pattern = pattern_string(max, t);
        debug!(
            "Freq {} mHz, Brightness: {}%, Blink pattern: {:?}",
            freq_mhz, max_brightness_pct, pattern
        );
        sysfs::set_attr_string(&self.syspath, LED_PATTERN_ATTR, &pattern)
    }

    /// Stop any running pattern by forcing the brightness to zero.
    pub fn stop(&self) -> Result<()> {
        self.set_brightness(0)
    }

    pub fn max_brightness(&self) -> u32 {
        self.max_brightness
    }
}

/// Per-slot intensities for a requested color on a multi-color LED.
fn multi_intensity(
    color: LedColor,
    max: u32,
    red_index: usize,
    green_index: usize,
    blue_index: usize,
) -> Result<[u32; 3]> {
    let mut channels = [0u32; 3];
    match color {
        LedColor::White => {
            channels[red_index] = max;
            channels[green_index] = max;
            channels[blue_index] = max;
        }
        LedColor::Red => channels[red_index] = max,
        LedColor::Green => channels[green_index] = max,
        LedColor::Blue => channels[blue_index] = max,
        LedColor::Rgb => {
            return Err(Error::DeviceIo(format!(
                "Unhandled color: {}",
                color.as_str()
            )))
        }
    }
    Ok(channels)
}
