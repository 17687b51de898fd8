//! Native device backends: sysfs helpers, force-feedback vibra, LEDs
//! and sound playback.

pub mod led;
pub mod leds;
pub mod sound;
pub mod sysfs;
pub mod vibra;

pub use leds::LedSet;
pub use sound::SoundDevice;
pub use vibra::VibraDevice;
