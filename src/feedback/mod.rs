//! Feedback taxonomy: the theme-facing configuration model and the
//! runtime instances that drive the device backends.
//!
//! A [`FeedbackConfig`] is immutable data parsed from a theme. When an
//! event is triggered the manager wraps the matching config into a
//! [`FeedbackInstance`] which owns the transient running state (timers,
//! effect slots, sound sinks). Completions are reported as messages so
//! the manager loop stays the single place that mutates event state.

mod dummy;
mod led;
mod sound;
mod vibra_periodic;
mod vibra_rumble;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

use crate::dev::sound::PlaybackKey;
use crate::dev::vibra::DEFAULT_VIBRA_DURATION_MS;
use crate::error::{Error, Result};

pub use crate::dev::SoundDevice;

/// Color vocabulary shared by LED feedbacks and LED devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedColor {
    White,
    Red,
    Green,
    Blue,
    Rgb,
}

impl LedColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedColor::White => "white",
            LedColor::Red => "red",
            LedColor::Green => "green",
            LedColor::Blue => "blue",
            LedColor::Rgb => "rgb",
        }
    }
}

/// Vibration motor contract shared by the evdev backend and the HAL
/// backends.
pub trait Vibrator: Send + Sync {
    fn rumble(&self, duration_ms: u32, upload: bool) -> Result<()>;
    fn periodic(
        &self,
        duration_ms: u32,
        magnitude: u16,
        fade_in_level: u16,
        fade_in_time: u32,
    ) -> Result<()>;
    /// Erase the active effect slot without interrupting playback.
    fn remove_effect(&self) -> Result<()>;
    /// Stop playback and release the effect slot.
    fn stop(&self) -> Result<()>;
}

impl Vibrator for crate::dev::VibraDevice {
    fn rumble(&self, duration_ms: u32, upload: bool) -> Result<()> {
        crate::dev::VibraDevice::rumble(self, duration_ms, upload)
    }

    fn periodic(
        &self,
        duration_ms: u32,
        magnitude: u16,
        fade_in_level: u16,
        fade_in_time: u32,
    ) -> Result<()> {
        crate::dev::VibraDevice::periodic(self, duration_ms, magnitude, fade_in_level, fade_in_time)
    }

    fn remove_effect(&self) -> Result<()> {
        crate::dev::VibraDevice::remove_effect(self)
    }

    fn stop(&self) -> Result<()> {
        crate::dev::VibraDevice::stop(self)
    }
}

/// LED pattern contract shared by the sysfs LED set and the HAL
/// backends.
pub trait LedController: Send + Sync {
    fn start_periodic(&self, color: LedColor, max_brightness_pct: u8, freq_mhz: u32)
        -> Result<()>;
    fn stop(&self, color: LedColor) -> Result<()>;
}

impl LedController for crate::dev::LedSet {
    fn start_periodic(
        &self,
        color: LedColor,
        max_brightness_pct: u8,
        freq_mhz: u32,
    ) -> Result<()> {
        crate::dev::LedSet::start_periodic(self, color, max_brightness_pct, freq_mhz)
    }

    fn stop(&self, color: LedColor) -> Result<()> {
        crate::dev::LedSet::stop(self, color)
    }
}

/// Snapshot of the device backends taken when an event is triggered.
/// Events keep using the backends they started with even if a device
/// is hot-unplugged mid-run.
#[derive(Clone, Default)]
pub struct DeviceRefs {
    pub vibra: Option<Arc<dyn Vibrator>>,
    pub sound: Option<Arc<SoundDevice>>,
    pub leds: Option<Arc<dyn LedController>>,
}

fn default_vibra_duration() -> u32 {
    DEFAULT_VIBRA_DURATION_MS
}

fn default_count() -> u32 {
    1
}

fn default_magnitude() -> u16 {
    0x7FFF
}

fn default_led_color() -> LedColor {
    LedColor::White
}

fn default_max_brightness() -> u8 {
    100
}

/// No-op feedback, useful as a placeholder slot in themes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DummyFeedback {
    pub event_name: String,
    /// 0 completes immediately.
    #[serde(default)]
    pub duration: u32,
}

/// Repeated strong rumbles with optional pauses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VibraRumbleFeedback {
    pub event_name: String,
    /// Total duration in msecs.
    #[serde(default = "default_vibra_duration")]
    pub duration: u32,
    /// Number of rumbles.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Pause between rumbles in msecs.
    #[serde(default)]
    pub pause: u32,
}

/// Sine waveform with a fade-in envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VibraPeriodicFeedback {
    pub event_name: String,
    #[serde(default = "default_vibra_duration")]
    pub duration: u32,
    #[serde(default = "default_magnitude")]
    pub magnitude: u16,
    #[serde(default = "default_magnitude")]
    pub fade_in_level: u16,
    #[serde(default)]
    pub fade_in_time: u32,
}

/// XDG sound theme effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SoundFeedback {
    pub event_name: String,
    pub effect: String,
}

/// Repeating LED blink pattern. Has no natural end; it runs until the
/// event ends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LedFeedback {
    pub event_name: String,
    /// Blink frequency in mHz.
    pub frequency: u32,
    #[serde(default = "default_led_color")]
    pub color: LedColor,
    /// Percentage of the LED's maximum brightness, 1-100.
    #[serde(default = "default_max_brightness")]
    pub max_brightness: u8,
    #[serde(default)]
    pub priority: u8,
}

/// One concrete feedback as described by a theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedbackConfig {
    Dummy(DummyFeedback),
    VibraRumble(VibraRumbleFeedback),
    VibraPeriodic(VibraPeriodicFeedback),
    Sound(SoundFeedback),
    Led(LedFeedback),
}

impl FeedbackConfig {
    /// The event name this feedback binds to.
    pub fn event_name(&self) -> &str {
        match self {
            FeedbackConfig::Dummy(f) => &f.event_name,
            FeedbackConfig::VibraRumble(f) => &f.event_name,
            FeedbackConfig::VibraPeriodic(f) => &f.event_name,
            FeedbackConfig::Sound(f) => &f.event_name,
            FeedbackConfig::Led(f) => &f.event_name,
        }
    }

    /// Check theme-level constraints that serde defaults can't express.
    pub fn validate(&self) -> Result<()> {
        if self.event_name().is_empty() {
            return Err(Error::ThemeParse("Feedback with empty event-name".to_string()));
        }
        if let FeedbackConfig::Led(led) = self {
            if led.frequency == 0 {
                return Err(Error::ThemeParse(format!(
                    "LED feedback for '{}' has zero frequency",
                    led.event_name
                )));
            }
            if !(1..=100).contains(&led.max_brightness) {
                return Err(Error::ThemeParse(format!(
                    "LED feedback for '{}' has max-brightness {} outside 1-100",
                    led.event_name, led.max_brightness
                )));
            }
        }
        Ok(())
    }

    /// Whether the device backend this feedback needs exists.
    pub fn is_available(&self, devices: &DeviceRefs) -> bool {
        match self {
            FeedbackConfig::Dummy(_) => true,
            FeedbackConfig::VibraRumble(_) | FeedbackConfig::VibraPeriodic(_) => {
                devices.vibra.is_some()
            }
            FeedbackConfig::Sound(_) => devices.sound.is_some(),
            FeedbackConfig::Led(_) => devices.leds.is_some(),
        }
    }
}

/// Completion notice sent from a running feedback to the manager loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub event_id: u32,
    pub index: usize,
}

pub type DoneTx = UnboundedSender<Completion>;

/// Cheap handle a running feedback uses to report completion.
#[derive(Clone)]
pub struct DoneHandle {
    event_id: u32,
    index: usize,
    tx: DoneTx,
}

impl DoneHandle {
    pub fn new(event_id: u32, index: usize, tx: DoneTx) -> Self {
        Self { event_id, index, tx }
    }

    pub fn send(&self) {
        // The manager may already be gone during shutdown
        let _ = self.tx.send(Completion {
            event_id: self.event_id,
            index: self.index,
        });
    }

    /// Key for per-playback sound bookkeeping.
    pub fn playback_key(&self) -> PlaybackKey {
        (self.event_id, self.index)
    }
}

/// A feedback picked for a concrete event, together with its running
/// state.
pub struct FeedbackInstance {
    config: Arc<FeedbackConfig>,
    devices: DeviceRefs,
    ended: bool,
    ending: bool,
    tasks: Vec<AbortHandle>,
}

impl FeedbackInstance {
    pub fn new(config: Arc<FeedbackConfig>, devices: DeviceRefs) -> Self {
        Self {
            config,
            devices,
            ended: false,
            ending: false,
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Mark the instance ended; returns false if it already was (stale
    /// completion).
    pub fn mark_ended(&mut self) -> bool {
        if self.ended {
            return false;
        }
        self.ended = true;
        self.abort_tasks();
        true
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Start (or restart) emitting this feedback.
    pub fn run(&mut self, done: DoneHandle) {
        self.abort_tasks();
        self.ended = false;
        self.ending = false;

        match &*self.config {
            FeedbackConfig::Dummy(cfg) => dummy::run(cfg, &mut self.tasks, done),
            FeedbackConfig::VibraRumble(cfg) => {
                vibra_rumble::run(cfg, &self.devices, &mut self.tasks, done)
            }
            FeedbackConfig::VibraPeriodic(cfg) => {
                vibra_periodic::run(cfg, &self.devices, &mut self.tasks, done)
            }
            FeedbackConfig::Sound(cfg) => sound::run(cfg, &self.devices, done),
            FeedbackConfig::Led(cfg) => led::run(cfg, &self.devices),
        }
    }

    /// End the feedback as early as possible. Completion is still
    /// reported through the done channel.
    pub fn end(&mut self, done: DoneHandle) {
        if self.ended || self.ending {
            return;
        }
        self.ending = true;
        self.abort_tasks();

        match &*self.config {
            FeedbackConfig::Dummy(_) => done.send(),
            FeedbackConfig::VibraRumble(_) | FeedbackConfig::VibraPeriodic(_) => {
                vibra_rumble::end(&self.devices, done)
            }
            FeedbackConfig::Sound(_) => sound::end(&self.devices, done),
            FeedbackConfig::Led(cfg) => led::end(cfg, &self.devices, done),
        }
    }
}

impl Drop for FeedbackInstance {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
