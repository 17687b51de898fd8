//! Force-feedback haptic motor backend.
//!
//! Drives an evdev force-feedback node: probes the `EV_FF` capability
//! bitmap, uploads rumble/periodic-sine effects and starts/stops them
//! by writing `input_event` records. Only one effect slot is tracked
//! at a time.
//!
//! See <https://www.kernel.org/doc/html/latest/input/ff.html>.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::mem;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::slice;
use std::sync::Mutex;

use nix::{ioctl_write_int, ioctl_write_ptr};
use tracing::debug;

use crate::error::{Error, Result};

const EV_FF: u16 = 0x15;
const FF_RUMBLE: u16 = 0x50;
const FF_PERIODIC: u16 = 0x51;
const FF_SINE: u16 = 0x58;
const FF_GAIN: u16 = 0x60;
const FF_MAX: u16 = 0x7f;

/// Master gain set at init when the device supports `FF_GAIN` (~75%).
const MASTER_GAIN: i32 = 0xC000;

pub const DEFAULT_VIBRA_DURATION_MS: u32 = 1000;

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct FfTrigger {
    button: u16,
    interval: u16,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct FfReplay {
    length: u16,
    delay: u16,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct FfEnvelope {
    attack_length: u16,
    attack_level: u16,
    fade_length: u16,
    fade_level: u16,
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct FfRumbleEffect {
    strong_magnitude: u16,
    weak_magnitude: u16,
}

#[repr(C)]
#[derive(Copy, Clone)]
struct FfPeriodicEffect {
    waveform: u16,
    period: u16,
    magnitude: i16,
    offset: i16,
    phase: u16,
    envelope: FfEnvelope,
    custom_len: u32,
    custom_data: *mut i16,
}

#[repr(C)]
#[derive(Copy, Clone)]
union FfEffectData {
    rumble: FfRumbleEffect,
    periodic: FfPeriodicEffect,
    #[cfg(target_pointer_width = "64")]
    padding: [u64; 4],
    #[cfg(target_pointer_width = "32")]
    padding: [u32; 7],
}

/// Mirror of the kernel's `struct ff_effect`.
#[repr(C)]
#[derive(Copy, Clone)]
struct FfEffect {
    effect_type: u16,
    id: i16,
    direction: u16,
    trigger: FfTrigger,
    replay: FfReplay,
    u: FfEffectData,
}

// EVIOCSFF / EVIOCRMFF / EVIOCGBIT(EV_FF, ..)
ioctl_write_ptr!(eviocsff, b'E', 0x80, FfEffect);
ioctl_write_int!(eviocrmff, b'E', 0x81);

fn eviocgbit_ff(fd: i32, buf: &mut [u8]) -> nix::Result<libc::c_int> {
    // _IOC(_IOC_READ, 'E', 0x20 + EV_FF, len) has a length-dependent
    // request number, so nix's fixed-size macros don't fit here.
    let request = nix::request_code_read!(b'E', 0x20 + EV_FF as u32, buf.len());
    let res = unsafe { libc::ioctl(fd, request as libc::c_ulong, buf.as_mut_ptr()) };
    nix::errno::Errno::result(res)
}

fn has_feature(bits: &[u8], feature: u16) -> bool {
    let idx = (feature / 8) as usize;
    idx < bits.len() && (bits[idx] >> (feature % 8)) & 1 == 1
}

#[derive(Debug)]
struct VibraInner {
    file: File,
    /// Currently uploaded effect id, -1 when none.
    effect_id: i16,
}

/// Haptic motor behind an evdev force-feedback node.
#[derive(Debug)]
pub struct VibraDevice {
    syspath: PathBuf,
    has_gain: bool,
    inner: Mutex<VibraInner>,
}

impl VibraDevice {
    /// Open and probe a force-feedback device node.
    ///
    /// Fails unless the device supports both `FF_RUMBLE` and
    /// `FF_PERIODIC`.
    pub fn new(syspath: &Path, devnode: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(devnode)
            .map_err(|e| {
                Error::DeviceUnavailable(format!("Unable to open {}: {e}", devnode.display()))
            })?;

        let mut features = [0u8; (FF_MAX as usize / 8) + 1];
        eviocgbit_ff(file.as_raw_fd(), &mut features).map_err(|e| {
            Error::DeviceUnavailable(format!(
                "Unable to probe features of {}: {e}",
                devnode.display()
            ))
        })?;

        if !has_feature(&features, FF_RUMBLE) {
            return Err(Error::DeviceUnavailable(format!(
                "No rumble capable vibra device {}",
                devnode.display()
            )));
        }
        if !has_feature(&features, FF_PERIODIC) {
            return Err(Error::DeviceUnavailable(format!(
                "No periodic capable vibra device {}",
                devnode.display()
            )));
        }

        let has_gain = has_feature(&features, FF_GAIN);
        let dev = Self {
            syspath: syspath.to_path_buf(),
            has_gain,
            inner: Mutex::new(VibraInner { file, effect_id: -1 }),
        };

        if has_gain {
            debug!("Setting master gain to 75%");
            if let Err(e) = dev.write_event(FF_GAIN, MASTER_GAIN) {
                tracing::warn!("Unable to set gain of {}: {e}", devnode.display());
            }
        } else {
            debug!("Gain unsupported");
        }

        debug!("Vibra device at {} usable", devnode.display());
        Ok(dev)
    }

    pub fn syspath(&self) -> &Path {
        &self.syspath
    }

    fn write_event(&self, code: u16, value: i32) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        Self::write_event_locked(&inner, code, value)
    }

    fn write_event_locked(inner: &VibraInner, code: u16, value: i32) -> Result<()> {
        let ev = libc::input_event {
            time: libc::timeval { tv_sec: 0, tv_usec: 0 },
            type_: EV_FF,
            code,
            value,
        };
        let bytes = unsafe {
            slice::from_raw_parts(
                &ev as *const libc::input_event as *const u8,
                mem::size_of::<libc::input_event>(),
            )
        };
        (&inner.file)
            .write_all(bytes)
            .map_err(|e| Error::DeviceIo(format!("Failed to write input event: {e}")))
    }

    fn upload(inner: &mut VibraInner, effect: &mut FfEffect) -> Result<()> {
        unsafe { eviocsff(inner.file.as_raw_fd(), effect) }
            .map_err(|e| Error::DeviceIo(format!("Failed to upload vibra effect: {e}")))?;
        inner.effect_id = effect.id;
        Ok(())
    }

    /// Start a rumble of `duration` ms. With `upload` a fresh effect is
    /// uploaded first; otherwise the previously assigned slot replays.
    pub fn rumble(&self, duration: u32, upload: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        if upload {
            let mut effect = FfEffect {
                effect_type: FF_RUMBLE,
                id: -1,
                direction: 0,
                trigger: FfTrigger::default(),
                replay: FfReplay {
                    length: duration.min(u16::MAX as u32) as u16,
                    delay: 0,
                },
                u: FfEffectData {
                    rumble: FfRumbleEffect {
                        strong_magnitude: 0x8000,
                        weak_magnitude: 0,
                    },
                },
            };
            debug!("Uploading rumbling vibra effect");
            Self::upload(&mut inner, &mut effect)?;
        }

        debug!("Playing rumbling vibra effect id {}", inner.effect_id);
        Self::write_event_locked(&inner, inner.effect_id as u16, 1)
    }

    /// Start a periodic sine effect. Zero `magnitude`, `fade_in_level`
    /// or `fade_in_time` fall back to 0x7FFF, the magnitude and the
    /// duration respectively.
    pub fn periodic(
        &self,
        duration: u32,
        magnitude: u16,
        fade_in_level: u16,
        fade_in_time: u32,
    ) -> Result<()> {
        let magnitude = if magnitude == 0 { 0x7FFF } else { magnitude };
        let fade_in_level = if fade_in_level == 0 { magnitude } else { fade_in_level };
        let fade_in_time = if fade_in_time == 0 { duration } else { fade_in_time };

        let mut effect = FfEffect {
            effect_type: FF_PERIODIC,
            id: -1,
            direction: 0x4000,
            trigger: FfTrigger::default(),
            replay: FfReplay {
                length: duration.min(u16::MAX as u32) as u16,
                delay: 200,
            },
            u: FfEffectData {
                periodic: FfPeriodicEffect {
                    waveform: FF_SINE,
                    period: 10,
                    magnitude: magnitude as i16,
                    offset: 0,
                    phase: 0,
                    envelope: FfEnvelope {
                        attack_length: fade_in_time.min(u16::MAX as u32) as u16,
                        attack_level: fade_in_level,
                        fade_length: 0,
                        fade_level: 0,
                    },
                    custom_len: 0,
                    custom_data: std::ptr::null_mut(),
                },
            },
        };

        let mut inner = self.inner.lock().unwrap();
        debug!("Uploading periodic vibra effect");
        Self::upload(&mut inner, &mut effect)?;

        debug!("Playing periodic vibra effect id {}", inner.effect_id);
        Self::write_event_locked(&inner, inner.effect_id as u16, 1)
    }

    /// Erase the currently uploaded effect slot.
    pub fn remove_effect(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.effect_id < 0 {
            return Ok(());
        }
        debug!("Erasing vibra effect id {}", inner.effect_id);
        unsafe { eviocrmff(inner.file.as_raw_fd(), inner.effect_id as libc::c_ulong) }.map_err(|e| {
            Error::DeviceIo(format!(
                "Failed to erase vibra effect with id {}: {e}",
                inner.effect_id
            ))
        })?;
        inner.effect_id = -1;
        Ok(())
    }

    /// Stop playback and erase the effect slot.
    pub fn stop(&self) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.effect_id < 0 {
                return Ok(());
            }
            Self::write_event_locked(&inner, inner.effect_id as u16, 0)?;
        }
        self.remove_effect()
    }

    pub fn has_gain(&self) -> bool {
        self.has_gain
    }
}
