//! Sysfs attribute access and udev enumeration helpers.
//!
//! Device backends address their hardware through a sysfs directory;
//! everything here works on plain paths so the handles stay `Send`
//! even though `udev::Device` itself is not.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// udev property marking a device for feedbackd's use.
pub const FEEDBACKD_UDEV_ATTR: &str = "FEEDBACKD_TYPE";
pub const FEEDBACKD_UDEV_VAL_VIBRA: &str = "vibra";
pub const FEEDBACKD_UDEV_VAL_LED: &str = "led";

/// Write a string to `<sysfs_path>/<attr>` (open, truncate, write, close).
pub fn set_attr_string(sysfs_path: &Path, attr: &str, value: &str) -> Result<()> {
    let path = sysfs_path.join(attr);
    let mut f = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| Error::DeviceIo(format!("Failed to open {}: {e}", path.display())))?;
    f.write_all(value.as_bytes())
        .map_err(|e| Error::DeviceIo(format!("Failed to write {}: {e}", path.display())))?;
    debug!("Wrote {:?} to {}", value, path.display());
    Ok(())
}

/// Write a decimal integer to `<sysfs_path>/<attr>`.
pub fn set_attr_int(sysfs_path: &Path, attr: &str, value: u32) -> Result<()> {
    set_attr_string(sysfs_path, attr, &value.to_string())
}

/// Read `<sysfs_path>/<attr>` as a trimmed string.
pub fn attr_string(sysfs_path: &Path, attr: &str) -> Option<String> {
    let path = sysfs_path.join(attr);
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim_end().to_string())
}

/// Read `<sysfs_path>/<attr>` as an integer.
pub fn attr_int(sysfs_path: &Path, attr: &str) -> Option<u32> {
    attr_string(sysfs_path, attr)?.parse().ok()
}

/// Read `<sysfs_path>/<attr>` as whitespace-separated tokens.
pub fn attr_strv(sysfs_path: &Path, attr: &str) -> Option<Vec<String>> {
    Some(
        attr_string(sysfs_path, attr)?
            .split_ascii_whitespace()
            .map(str::to_string)
            .collect(),
    )
}

/// Snapshot of the udev fields the backends care about, detached from
/// the underlying `udev::Device` so it can cross threads.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub syspath: PathBuf,
    pub sysname: String,
    pub devnode: Option<PathBuf>,
    pub feedbackd_type: Option<String>,
}

impl DeviceInfo {
    pub fn from_udev(dev: &udev::Device) -> Self {
        Self {
            syspath: dev.syspath().to_path_buf(),
            sysname: dev.sysname().to_string_lossy().into_owned(),
            devnode: dev.devnode().map(Path::to_path_buf),
            feedbackd_type: dev
                .property_value(FEEDBACKD_UDEV_ATTR)
                .map(|v| v.to_string_lossy().into_owned()),
        }
    }

    pub fn is_vibra(&self) -> bool {
        self.feedbackd_type.as_deref() == Some(FEEDBACKD_UDEV_VAL_VIBRA)
    }

    pub fn is_led(&self) -> bool {
        self.feedbackd_type.as_deref() == Some(FEEDBACKD_UDEV_VAL_LED)
    }
}

/// Enumerate devices of a subsystem as detached snapshots.
pub fn enumerate_subsystem(subsystem: &str) -> Result<Vec<DeviceInfo>> {
    let mut enumerator = udev::Enumerator::new()
        .map_err(|e| Error::DeviceIo(format!("udev enumerator: {e}")))?;
    enumerator
        .match_subsystem(subsystem)
        .map_err(|e| Error::DeviceIo(format!("udev subsystem match: {e}")))?;
    let devices = enumerator
        .scan_devices()
        .map_err(|e| Error::DeviceIo(format!("udev scan: {e}")))?;
    Ok(devices.map(|d| DeviceInfo::from_udev(&d)).collect())
}
