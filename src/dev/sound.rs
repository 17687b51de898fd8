//! Sound effect playback.
//!
//! Resolves XDG sound-theme event ids to files and plays them on the
//! default audio output. Every playback gets its own sink so it can be
//! cancelled individually; the completion callback fires on natural
//! end, cancellation and lookup failure alike.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, RwLock};

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Fallback theme of the XDG sound theme spec.
const FALLBACK_SOUND_THEME: &str = "freedesktop";

/// Key identifying one playback: (event id, feedback index).
pub type PlaybackKey = (u32, usize);

/// Sound playback context.
pub struct SoundDevice {
    handle: OutputStreamHandle,
    /// Keeps the output-stream thread alive; dropped with the device.
    _shutdown: mpsc::Sender<()>,
    theme: RwLock<String>,
    data_dirs: Vec<PathBuf>,
    playing: Arc<Mutex<HashMap<PlaybackKey, Arc<Sink>>>>,
}

impl SoundDevice {
    /// Open the default audio output.
    ///
    /// The `rodio` output stream is not `Send`, so it lives on its own
    /// thread and only the handle crosses over.
    pub fn new() -> Result<Self> {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("sound-output".to_string())
            .spawn(move || {
                let stream = OutputStream::try_default();
                match stream {
                    Ok((stream, handle)) => {
                        let _ = handle_tx.send(Ok(handle));
                        // Block until the device is dropped
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = handle_tx.send(Err(e.to_string()));
                    }
                }
            })
            .map_err(|e| Error::DeviceUnavailable(format!("sound thread: {e}")))?;

        let handle = handle_rx
            .recv()
            .map_err(|_| Error::DeviceUnavailable("sound output thread died".to_string()))?
            .map_err(|e| Error::DeviceUnavailable(format!("No audio output: {e}")))?;

        Ok(Self {
            handle,
            _shutdown: shutdown_tx,
            theme: RwLock::new(FALLBACK_SOUND_THEME.to_string()),
            data_dirs: xdg_data_dirs(),
            playing: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Switch the XDG sound theme used for effect lookup.
    pub fn set_theme(&self, name: &str) {
        debug!("Sound theme set to {name:?}");
        *self.theme.write().unwrap() = name.to_string();
    }

    pub fn theme(&self) -> String {
        self.theme.read().unwrap().clone()
    }

    /// Play `effect`, invoking `done` when playback finishes for any
    /// reason (end of file, cancellation, effect not found).
    pub fn play(
        &self,
        key: PlaybackKey,
        effect: &str,
        done: impl FnOnce() + Send + 'static,
    ) {
        let theme = self.theme();
        let Some(path) = resolve_effect(&self.data_dirs, &theme, effect) else {
            warn!("Sound effect {effect:?} not found in theme {theme:?}");
            done();
            return;
        };

        let source = File::open(&path)
            .map_err(|e| e.to_string())
            .and_then(|f| Decoder::new(BufReader::new(f)).map_err(|e| e.to_string()));
        let source = match source {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to decode {}: {e}", path.display());
                done();
                return;
            }
        };

        let sink = match Sink::try_new(&self.handle) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                warn!("Failed to create sound sink: {e}");
                done();
                return;
            }
        };

        debug!("Playing {effect:?} from {}", path.display());
        sink.append(source);
        self.playing.lock().unwrap().insert(key, Arc::clone(&sink));

        let waiter = Arc::clone(&sink);
        let playing_map = Arc::clone(&self.playing);
        tokio::task::spawn_blocking(move || {
            waiter.sleep_until_end();
            playing_map.lock().unwrap().remove(&key);
            done();
        });
    }

    /// Cancel a playback. The completion callback still fires.
    pub fn stop(&self, key: PlaybackKey) {
        if let Some(sink) = self.playing.lock().unwrap().get(&key) {
            debug!("Cancelling sound playback {key:?}");
            sink.stop();
        }
    }
}

/// XDG data dirs in lookup order: `XDG_DATA_HOME` first, then
/// `XDG_DATA_DIRS`.
fn xdg_data_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = dirs::data_dir() {
        dirs.push(home);
    }
    let system = std::env::var("XDG_DATA_DIRS")
        .unwrap_or_else(|_| "/usr/local/share:/usr/share".to_string());
    dirs.extend(std::env::split_paths(&system));
    dirs
}

/// Resolve a sound-theme event id to a file, trying the configured
/// theme first and the freedesktop fallback second.
pub fn resolve_effect(data_dirs: &[PathBuf], theme: &str, effect: &str) -> Option<PathBuf> {
    let themes: &[&str] = if theme == FALLBACK_SOUND_THEME {
        &[FALLBACK_SOUND_THEME]
    } else {
        &[theme, FALLBACK_SOUND_THEME]
    };

    for theme in themes {
        for dir in data_dirs {
            for ext in ["oga", "ogg", "wav"] {
                let path: PathBuf = [
                    dir.as_path(),
                    Path::new("sounds"),
                    Path::new(theme),
                    Path::new("stereo"),
                    Path::new(&format!("{effect}.{ext}")),
                ]
                .iter()
                .collect();
                if path.exists() {
                    return Some(path);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_resolve_effect_theme_order() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().to_path_buf();
        touch(&data.join("sounds/freedesktop/stereo/bell.oga"));
        touch(&data.join("sounds/mytheme/stereo/bell.oga"));

        let dirs = vec![data.clone()];
        let hit = resolve_effect(&dirs, "mytheme", "bell").unwrap();
        assert!(hit.ends_with("sounds/mytheme/stereo/bell.oga"));

        // Unknown theme falls back to freedesktop
        let hit = resolve_effect(&dirs, "other", "bell").unwrap();
        assert!(hit.ends_with("sounds/freedesktop/stereo/bell.oga"));

        assert!(resolve_effect(&dirs, "mytheme", "missing").is_none());
    }

    #[test]
    fn test_resolve_effect_extension_order() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().to_path_buf();
        touch(&data.join("sounds/freedesktop/stereo/click.wav"));

        let hit = resolve_effect(&[data], "freedesktop", "click").unwrap();
        assert!(hit.ends_with("click.wav"));
    }

    #[test]
    fn test_data_dir_order_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(&second.path().join("sounds/freedesktop/stereo/bell.oga"));
        touch(&first.path().join("sounds/freedesktop/stereo/bell.oga"));

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let hit = resolve_effect(&dirs, "freedesktop", "bell").unwrap();
        assert!(hit.starts_with(first.path()));
    }
}
