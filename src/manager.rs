//! The feedback manager: owns the theme, the devices and all live
//! events.
//!
//! The manager runs as a single task fed by two channels: commands
//! (bus methods, udev events, expiry timers) and feedback completions.
//! Everything it tells the outside world goes through the notification
//! channel, which the D-Bus layer turns into signals and peer watches.
//! That keeps the event lifecycle testable without a bus connection.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dev::sysfs::{self, DeviceInfo};
use crate::dev::{LedSet, SoundDevice, VibraDevice};
use crate::error::Result;
use crate::event::{EndReason, Event, EventProgress};
use crate::feedback::{Completion, DeviceRefs, DoneTx, FeedbackInstance, LedController, Vibrator};
use crate::settings::Settings;
use crate::theme::expander::ThemeExpander;
use crate::theme::{ProfileLevel, Theme};

const INPUT_SUBSYSTEM: &str = "input";

/// Hot-plug action forwarded from the udev monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Add,
    Remove,
}

/// Commands handled by the manager loop.
pub enum ManagerMsg {
    Trigger {
        app_id: String,
        event_name: String,
        hint_level: Option<ProfileLevel>,
        timeout: i32,
        sender: Option<String>,
        reply: oneshot::Sender<u32>,
    },
    End {
        id: u32,
    },
    SetProfile {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    GetProfile {
        reply: oneshot::Sender<String>,
    },
    EventExpired {
        event_id: u32,
    },
    PeerVanished {
        peer: String,
    },
    Device {
        action: DeviceAction,
        info: DeviceInfo,
    },
    SettingsChanged,
    ReloadTheme,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Notifications from the manager to the bus layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    FeedbackEnded { id: u32, reason: EndReason },
    ProfileChanged { name: String },
    /// Start watching a bus peer for disappearance.
    WatchPeer { peer: String },
    /// The peer's last event is gone; the watch can be dropped.
    UnwatchPeer { peer: String },
}

/// Channel endpoints for talking to a running manager.
pub struct ManagerHandle {
    pub msg_tx: mpsc::UnboundedSender<ManagerMsg>,
    pub notify_rx: mpsc::UnboundedReceiver<ManagerEvent>,
}

pub struct FeedbackManager {
    msg_rx: mpsc::UnboundedReceiver<ManagerMsg>,
    msg_tx: mpsc::UnboundedSender<ManagerMsg>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    done_tx: DoneTx,
    notify_tx: mpsc::UnboundedSender<ManagerEvent>,

    expander: ThemeExpander,
    theme: Theme,
    settings: Settings,
    level: ProfileLevel,

    events: HashMap<u32, Event>,
    next_id: u32,
    watched_peers: HashSet<String>,

    vibra: Option<Arc<dyn Vibrator>>,
    vibra_syspath: Option<PathBuf>,
    sound: Option<Arc<SoundDevice>>,
    leds: Option<Arc<dyn LedController>>,
}

/// Effective level for a trigger: the quietest of the global level,
/// the per-app level and the caller's hint.
fn effective_level(
    global: ProfileLevel,
    app: Option<ProfileLevel>,
    hint: Option<ProfileLevel>,
) -> ProfileLevel {
    let mut level = global;
    if let Some(app) = app {
        level = level.min(app);
    }
    if let Some(hint) = hint {
        level = level.min(hint);
    }
    level
}

impl FeedbackManager {
    /// Load the theme and set up channels. Theme failure here is fatal
    /// by design; there is no point running without one.
    pub fn new(expander: ThemeExpander, settings: Settings) -> Result<(Self, ManagerHandle)> {
        let theme = expander.load_theme()?;
        info!("Loaded theme '{}'", theme.name());

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let level = settings.profile().unwrap_or(ProfileLevel::Full);

        let manager = Self {
            msg_rx,
            msg_tx: msg_tx.clone(),
            done_rx,
            done_tx,
            notify_tx,
            expander,
            theme,
            settings,
            level,
            events: HashMap::new(),
            next_id: 1,
            watched_peers: HashSet::new(),
            vibra: None,
            vibra_syspath: None,
            sound: None,
            leds: None,
        };

        Ok((manager, ManagerHandle { msg_tx, notify_rx }))
    }

    pub fn profile(&self) -> ProfileLevel {
        self.level
    }

    pub fn set_vibra(&mut self, vibra: Arc<dyn Vibrator>, syspath: Option<PathBuf>) {
        self.vibra = Some(vibra);
        self.vibra_syspath = syspath;
    }

    pub fn set_sound(&mut self, sound: Arc<SoundDevice>) {
        self.sound = Some(sound);
    }

    pub fn set_leds(&mut self, leds: Arc<dyn LedController>) {
        self.leds = Some(leds);
    }

    pub fn sound(&self) -> Option<Arc<SoundDevice>> {
        self.sound.clone()
    }

    /// Probe the host's devices. Absence of any backend is recorded
    /// but never fatal.
    pub fn init_devices(&mut self) {
        match sysfs::enumerate_subsystem(INPUT_SUBSYSTEM) {
            Ok(devices) => {
                for info in devices.iter().filter(|d| d.is_vibra()) {
                    self.try_adopt_vibra(info);
                }
            }
            Err(e) => warn!("Failed to enumerate input devices: {e}"),
        }
        if self.vibra.is_none() {
            debug!("No vibra capable device found");
        }

        match LedSet::new() {
            Ok(leds) => self.leds = Some(Arc::new(leds)),
            Err(e) => warn!("Failed to init LED devices: {e}"),
        }

        match SoundDevice::new() {
            Ok(sound) => self.sound = Some(Arc::new(sound)),
            Err(e) => warn!("Failed to init sound device: {e}"),
        }

        #[cfg(feature = "droid")]
        self.init_droid_devices();
    }

    /// HAL fallbacks for hosts where the native devices are missing.
    #[cfg(feature = "droid")]
    fn init_droid_devices(&mut self) {
        if self.vibra.is_none() {
            match crate::droid::probe_vibra() {
                Ok(vibra) => {
                    info!("Using HAL vibra backend");
                    self.vibra = Some(vibra);
                }
                Err(e) => debug!("No HAL vibra backend: {e}"),
            }
        }
        if self.leds.is_none() {
            match crate::droid::probe_leds() {
                Ok(leds) => {
                    info!("Using HAL LED backend");
                    self.leds = Some(leds);
                }
                Err(e) => debug!("No HAL LED backend: {e}"),
            }
        }
    }

    fn try_adopt_vibra(&mut self, info: &DeviceInfo) {
        if self.vibra.is_some() {
            return;
        }
        let Some(devnode) = &info.devnode else {
            warn!("Vibra device {} has no device node", info.sysname);
            return;
        };
        match VibraDevice::new(&info.syspath, devnode) {
            Ok(vibra) => {
                debug!("Found vibra device at {}", info.syspath.display());
                self.vibra_syspath = Some(vibra.syspath().to_path_buf());
                self.vibra = Some(Arc::new(vibra));
            }
            Err(e) => warn!("Failed to init vibra device: {e}"),
        }
    }

    /// Forward udev add/remove events of the input subsystem into the
    /// manager channel from a dedicated thread (udev types aren't
    /// `Send`).
    pub fn spawn_udev_monitor(msg_tx: mpsc::UnboundedSender<ManagerMsg>) {
        std::thread::Builder::new()
            .name("udev-monitor".to_string())
            .spawn(move || {
                use std::os::unix::io::AsRawFd;

                let socket = tokio_udev::MonitorBuilder::new()
                    .and_then(|b| b.match_subsystem(INPUT_SUBSYSTEM))
                    .and_then(|b| b.listen());
                let socket = match socket {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to start udev monitor: {e}");
                        return;
                    }
                };

                let fd = socket.as_raw_fd();
                loop {
                    if msg_tx.is_closed() {
                        break;
                    }

                    let mut fds = [libc::pollfd {
                        fd,
                        events: libc::POLLIN,
                        revents: 0,
                    }];
                    let ret = unsafe { libc::poll(fds.as_mut_ptr(), 1, 1000) };
                    if ret <= 0 {
                        continue;
                    }

                    for event in socket.iter() {
                        let action = match event.event_type() {
                            tokio_udev::EventType::Add => DeviceAction::Add,
                            tokio_udev::EventType::Remove => DeviceAction::Remove,
                            _ => continue,
                        };
                        let info = DeviceInfo::from_udev(&event.device());
                        debug!("Device changes: action = {action:?}, device = {}",
                               info.syspath.display());
                        if msg_tx.send(ManagerMsg::Device { action, info }).is_err() {
                            return;
                        }
                    }
                }
            })
            .ok();
    }

    fn devices(&self) -> DeviceRefs {
        DeviceRefs {
            vibra: self.vibra.clone(),
            sound: self.sound.clone(),
            leds: self.leds.clone(),
        }
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.notify_tx.send(event);
    }

    /// Run until shutdown, processing commands and completions.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.msg_rx.recv() => match msg {
                    Some(msg) => {
                        if self.handle_msg(msg) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(done) = self.done_rx.recv() => self.on_completion(done),
            }
        }
    }

    /// Returns true on shutdown.
    fn handle_msg(&mut self, msg: ManagerMsg) -> bool {
        match msg {
            ManagerMsg::Trigger {
                app_id,
                event_name,
                hint_level,
                timeout,
                sender,
                reply,
            } => {
                let id = self.handle_trigger(&app_id, &event_name, hint_level, timeout, sender);
                let _ = reply.send(id);
            }
            ManagerMsg::End { id } => self.handle_end(id),
            ManagerMsg::SetProfile { name, reply } => {
                let _ = reply.send(self.handle_set_profile(&name));
            }
            ManagerMsg::GetProfile { reply } => {
                let _ = reply.send(self.level.as_str().to_string());
            }
            ManagerMsg::EventExpired { event_id } => {
                if let Some(event) = self.events.get_mut(&event_id) {
                    event.expire();
                }
            }
            ManagerMsg::PeerVanished { peer } => self.handle_peer_vanished(&peer),
            ManagerMsg::Device { action, info } => self.handle_device_event(action, &info),
            ManagerMsg::SettingsChanged => self.handle_settings_changed(),
            ManagerMsg::ReloadTheme => self.handle_reload_theme(),
            ManagerMsg::Shutdown { reply } => {
                self.handle_shutdown();
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    fn handle_trigger(
        &mut self,
        app_id: &str,
        event_name: &str,
        hint_level: Option<ProfileLevel>,
        timeout: i32,
        sender: Option<String>,
    ) -> u32 {
        debug!("Event '{event_name}' for '{app_id}'");

        let timeout = timeout.max(crate::event::EVENT_TIMEOUT_ONESHOT);
        let id = self.next_id;
        self.next_id += 1;

        let app_level = self.settings.app_level(app_id);
        let level = effective_level(self.level, app_level, hint_level);

        let devices = self.devices();
        let feedback = self
            .theme
            .feedback(level, event_name)
            .filter(|fb| fb.is_available(&devices));

        let Some(feedback) = feedback else {
            // Absent backends reduce the set; an empty set is reported
            // right away and the event is not retained.
            self.emit(ManagerEvent::FeedbackEnded {
                id,
                reason: EndReason::NotFound,
            });
            return id;
        };

        let mut event = Event::new(id, app_id, event_name, sender, timeout, self.done_tx.clone());
        event.add_feedback(FeedbackInstance::new(feedback, devices));

        if timeout > 0 {
            let msg_tx = self.msg_tx.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(timeout as u64)).await;
                let _ = msg_tx.send(ManagerMsg::EventExpired { event_id: id });
            });
            event.set_timeout_task(task.abort_handle());
        }

        if let Some(peer) = event.sender() {
            if self.watched_peers.insert(peer.to_string()) {
                self.emit(ManagerEvent::WatchPeer {
                    peer: peer.to_string(),
                });
            }
        }

        event.run_feedbacks();
        self.events.insert(id, event);
        id
    }

    fn handle_end(&mut self, id: u32) {
        debug!("Ending feedback for event '{id}'");
        match self.events.get_mut(&id) {
            Some(event) => event.end_feedbacks(),
            None => warn!("Tried to end non-existing event {id}"),
        }
    }

    fn handle_set_profile(&mut self, name: &str) -> bool {
        let Some(level) = ProfileLevel::from_name(name) else {
            warn!("Invalid profile '{name}'");
            return false;
        };
        if level == self.level {
            return true;
        }

        debug!("Switching profile to '{name}'");
        self.level = level;
        if let Err(e) = self.settings.set_profile(level) {
            warn!("Failed to persist profile: {e}");
        }
        self.emit(ManagerEvent::ProfileChanged {
            name: name.to_string(),
        });
        true
    }

    fn handle_settings_changed(&mut self) {
        self.settings.reload();
        if let Some(level) = self.settings.profile() {
            if level != self.level {
                debug!("Profile changed externally to '{}'", level.as_str());
                self.level = level;
                self.emit(ManagerEvent::ProfileChanged {
                    name: level.as_str().to_string(),
                });
            }
        }
    }

    fn handle_reload_theme(&mut self) {
        match self.expander.load_theme() {
            Ok(theme) => {
                info!("Reloaded theme '{}'", theme.name());
                // Running events keep their current feedback instances
                self.theme = theme;
            }
            Err(e) => warn!("Theme reload failed, keeping current theme: {e}"),
        }
    }

    // The peer stays in `watched_peers` until its last event finishes;
    // `release_peer_if_idle` then emits the `UnwatchPeer` that lets the
    // bus layer drop the watch.
    fn handle_peer_vanished(&mut self, peer: &str) {
        debug!("Bus peer {peer} vanished");
        let ids: Vec<u32> = self
            .events
            .values()
            .filter(|e| e.sender() == Some(peer))
            .map(Event::id)
            .collect();
        for id in ids {
            if let Some(event) = self.events.get_mut(&id) {
                event.end_feedbacks();
            }
        }
    }

    fn handle_device_event(&mut self, action: DeviceAction, info: &DeviceInfo) {
        match action {
            DeviceAction::Remove => {
                if self.vibra_syspath.as_deref() == Some(info.syspath.as_path()) {
                    debug!("Vibra device {} got removed", info.syspath.display());
                    self.vibra = None;
                    self.vibra_syspath = None;
                }
            }
            DeviceAction::Add => {
                if info.is_vibra() {
                    debug!("Found hotplugged vibra device at {}", info.syspath.display());
                    self.try_adopt_vibra(info);
                }
            }
        }
    }

    fn handle_shutdown(&mut self) {
        info!("Shutting down, cancelling {} event(s)", self.events.len());
        for event in self.events.values_mut() {
            event.end_feedbacks();
        }
        self.events.clear();
        if let Some(vibra) = &self.vibra {
            let _ = vibra.stop();
        }
        self.vibra = None;
        self.leds = None;
        self.sound = None;
    }

    fn on_completion(&mut self, done: Completion) {
        let Some(event) = self.events.get_mut(&done.event_id) else {
            debug!("Feedback ended for unknown event {}", done.event_id);
            return;
        };

        match event.on_feedback_ended(done.index) {
            EventProgress::Pending => {}
            EventProgress::Finished(reason) => {
                debug!("All feedbacks for event {} finished", done.event_id);
                self.emit(ManagerEvent::FeedbackEnded {
                    id: done.event_id,
                    reason,
                });
                let sender = self
                    .events
                    .remove(&done.event_id)
                    .and_then(|e| e.sender().map(str::to_string));
                if let Some(peer) = sender {
                    self.release_peer_if_idle(&peer);
                }
            }
        }
    }

    fn release_peer_if_idle(&mut self, peer: &str) {
        let still_used = self.events.values().any(|e| e.sender() == Some(peer));
        if !still_used && self.watched_peers.remove(peer) {
            self.emit(ManagerEvent::UnwatchPeer {
                peer: peer.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_level_is_minimum() {
        use ProfileLevel::*;
        assert_eq!(effective_level(Full, None, None), Full);
        assert_eq!(effective_level(Full, Some(Quiet), None), Quiet);
        assert_eq!(effective_level(Quiet, Some(Full), None), Quiet);
        assert_eq!(effective_level(Full, Some(Quiet), Some(Silent)), Silent);
        assert_eq!(effective_level(Silent, Some(Full), Some(Full)), Silent);
    }
}
